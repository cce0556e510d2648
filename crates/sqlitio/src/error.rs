//! Error types for the SQLite access layer.
//!
//! Every fallible operation returns [`Result`]. Engine failures carry the
//! SQLite result code plus the connection's message text; the remaining
//! variants describe failures the wrapper detects on its own, such as a
//! column value that does not fit the requested Rust type or an operation
//! attempted in the wrong statement state.

use std::ffi::{CStr, c_int};
use std::fmt;

use crate::ffi;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to SQLite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The engine itself reported a failure.
    Engine(EngineError),
    /// A lookup that expected at least one row found none.
    NotFound,
    /// A column value does not fit the requested integer type.
    Narrowing(NarrowingError),
    /// An operation was attempted in a state that cannot serve it.
    State(StateError),
    /// Column text is not valid UTF-8.
    Utf8(std::str::Utf8Error),
}

impl Error {
    /// Build an [`Error::Engine`] from a connection handle and result code.
    ///
    /// Reads the connection's error message when a handle is available and
    /// falls back to the generic text for the code otherwise.
    pub(crate) fn engine(db: *mut ffi::sqlite3, code: c_int) -> Self {
        Error::Engine(EngineError::from_db(db, code))
    }

    /// Build a misuse error with no connection context.
    pub(crate) fn misuse(message: impl Into<String>) -> Self {
        Error::Engine(EngineError {
            code: ffi::SQLITE_MISUSE,
            message: message.into(),
        })
    }

    /// Build an [`Error::State`] for the named operation.
    pub(crate) fn state(operation: &'static str, message: impl Into<String>) -> Self {
        Error::State(StateError {
            operation,
            message: message.into(),
        })
    }

    /// The SQLite result code behind this error, when one exists.
    pub fn code(&self) -> Option<c_int> {
        match self {
            Error::Engine(e) => Some(e.code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Engine(e) => write!(f, "{e}"),
            Error::NotFound => write!(f, "no rows returned"),
            Error::Narrowing(e) => write!(f, "{e}"),
            Error::State(e) => write!(f, "{e}"),
            Error::Utf8(e) => write!(f, "column text is not valid UTF-8: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        Error::Engine(err)
    }
}

impl From<NarrowingError> for Error {
    fn from(err: NarrowingError) -> Self {
        Error::Narrowing(err)
    }
}

impl From<StateError> for Error {
    fn from(err: StateError) -> Self {
        Error::State(err)
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::Utf8(err)
    }
}

/// A failure reported by the SQLite engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    /// The SQLite result code.
    pub code: c_int,
    /// The message text associated with the failure.
    pub message: String,
}

impl EngineError {
    /// Capture the current error state of `db` for result code `code`.
    pub(crate) fn from_db(db: *mut ffi::sqlite3, code: c_int) -> Self {
        let message = if db.is_null() {
            ffi::error_string(code).to_owned()
        } else {
            // SAFETY: db is a live connection handle; sqlite3_errmsg never
            // returns a null pointer for one.
            unsafe {
                let ptr = ffi::sqlite3_errmsg(db);
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        EngineError { code, message }
    }

    /// Whether the failure means the database was busy or locked and the
    /// operation may succeed on retry.
    pub fn is_busy(&self) -> bool {
        self.code == ffi::SQLITE_BUSY || self.code == ffi::SQLITE_LOCKED
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sqlite error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for EngineError {}

/// A column value does not fit the requested integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NarrowingError {
    /// The stored value as SQLite holds it.
    pub value: i64,
    /// The name of the type the caller asked for.
    pub target: &'static str,
}

impl fmt::Display for NarrowingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value {} does not fit in {}", self.value, self.target)
    }
}

impl std::error::Error for NarrowingError {}

/// An operation was attempted against an object in the wrong state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateError {
    /// The operation that was refused.
    pub operation: &'static str,
    /// What was wrong with the state.
    pub message: String,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

impl std::error::Error for StateError {}
