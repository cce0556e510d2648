//! Low-level interface to the SQLite engine.
//!
//! Everything the crate needs from libsqlite3 is funneled through this
//! module: re-exports from `libsqlite3-sys` plus a few safe helpers. Only
//! the surface the wrapper actually uses is exposed.

#![allow(clippy::cast_possible_truncation)]

use std::ffi::{CStr, c_int};

pub use libsqlite3_sys::{
    // Opaque handles
    sqlite3,
    sqlite3_stmt,
    sqlite3_int64,
    sqlite3_destructor_type,
    // Result codes
    SQLITE_OK,
    SQLITE_ERROR,
    SQLITE_BUSY,
    SQLITE_LOCKED,
    SQLITE_CONSTRAINT,
    SQLITE_MISUSE,
    SQLITE_AUTH,
    SQLITE_RANGE,
    SQLITE_ROW,
    SQLITE_DONE,
    // Fundamental data types
    SQLITE_INTEGER,
    SQLITE_FLOAT,
    SQLITE_TEXT,
    SQLITE_BLOB,
    SQLITE_NULL,
    // Open flags
    SQLITE_OPEN_READONLY,
    SQLITE_OPEN_READWRITE,
    SQLITE_OPEN_CREATE,
    SQLITE_OPEN_URI,
    SQLITE_OPEN_MEMORY,
    SQLITE_OPEN_NOMUTEX,
    SQLITE_OPEN_FULLMUTEX,
    // Update-hook actions and authorizer verdicts
    SQLITE_INSERT,
    SQLITE_UPDATE,
    SQLITE_DELETE,
    SQLITE_DENY,
    SQLITE_IGNORE,
    // Special destructor values
    SQLITE_STATIC,
    SQLITE_TRANSIENT,
    // Connection management
    sqlite3_open_v2,
    sqlite3_close,
    // Error reporting
    sqlite3_errmsg,
    sqlite3_errcode,
    sqlite3_errstr,
    // Statement lifecycle
    sqlite3_prepare_v2,
    sqlite3_finalize,
    sqlite3_reset,
    sqlite3_clear_bindings,
    // Parameter binding
    sqlite3_bind_null,
    sqlite3_bind_int,
    sqlite3_bind_int64,
    sqlite3_bind_double,
    sqlite3_bind_text,
    sqlite3_bind_blob,
    sqlite3_bind_parameter_count,
    sqlite3_bind_parameter_index,
    // Stepping and result columns
    sqlite3_step,
    sqlite3_data_count,
    sqlite3_column_count,
    sqlite3_column_name,
    sqlite3_column_type,
    sqlite3_column_decltype,
    sqlite3_column_int64,
    sqlite3_column_double,
    sqlite3_column_text,
    sqlite3_column_blob,
    sqlite3_column_bytes,
    // Execution helpers
    sqlite3_exec,
    sqlite3_free,
    // Connection metadata
    sqlite3_changes,
    sqlite3_total_changes,
    sqlite3_last_insert_rowid,
    // Busy policy and hooks
    sqlite3_busy_timeout,
    sqlite3_busy_handler,
    sqlite3_commit_hook,
    sqlite3_rollback_hook,
    sqlite3_update_hook,
    sqlite3_set_authorizer,
    // Version info
    sqlite3_libversion,
    sqlite3_libversion_number,
};

/// Get the SQLite library version as a string.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe {
        let ptr = sqlite3_libversion();
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

/// Get the SQLite library version as a number.
pub fn version_number() -> i32 {
    // SAFETY: sqlite3_libversion_number is always safe to call
    unsafe { sqlite3_libversion_number() }
}

/// Convert an SQLite result code to a human-readable string.
pub fn error_string(code: c_int) -> &'static str {
    // SAFETY: sqlite3_errstr returns a static string
    unsafe {
        let ptr = sqlite3_errstr(code);
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown error")
    }
}
