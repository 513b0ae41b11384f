//! Process exit codes for the `imitate` CLI.

use imitate_store::StoreError;

pub const SUCCESS: i32 = 0;
pub const CONFIG_ERROR: i32 = 1; // Bad configuration or rejected request
pub const INTERNAL_ERROR: i32 = 2;
pub const UNTRUSTED_DATA: i32 = 3; // Corrupt index, schema mismatch or integrity failure
pub const CORRUPT_RECORD: i32 = 4;
pub const IO_ERROR: i32 = 5;
pub const STORE_UNAVAILABLE: i32 = 6;

/// Exit code for a failed command.
pub fn for_error(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<StoreError>()
        .map_or(INTERNAL_ERROR, StoreError::exit_code)
}
