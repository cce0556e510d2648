//! sqlitio - a lightweight typed access layer over SQLite.
//!
//! The crate wraps the SQLite C API in a small set of owning types:
//! [`Connection`] for the database handle, [`Command`] for statements that
//! write, [`Query`] and [`Row`] for statements that read, and
//! [`Transaction`] for scoped transactions that roll back on drop.
//! Statements borrow their connection, and row views are invalidated the
//! moment the cursor moves, so the usual SQLite lifetime mistakes fail
//! with an error instead of reading freed memory.
//!
//! # Example
//!
//! ```no_run
//! use sqlitio::{Connection, Result};
//!
//! fn main() -> Result<()> {
//!     let conn = Connection::open_in_memory()?;
//!     conn.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")?;
//!
//!     let mut cmd = conn.command("INSERT INTO users (name) VALUES (?)")?;
//!     cmd.bind(1, "alice")?;
//!     cmd.execute()?;
//!
//!     let mut query = conn.query("SELECT id, name FROM users")?;
//!     let mut rows = query.rows();
//!     while let Some(row) = rows.next()? {
//!         let (id, name): (i64, String) = row.get_columns((0, 1))?;
//!         println!("{id}: {name}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Type mapping
//!
//! Integers are stored as SQLite's 64-bit integers. `u64` values are
//! stored as the same bit pattern, so values above `i64::MAX` appear
//! negative to SQL but round-trip intact through [`Row::get`]. Reads into
//! `i32` and `u32` are checked and fail with a narrowing error when the
//! stored value does not fit.

#![allow(unsafe_code)]

pub mod connection;
pub mod error;
pub mod ffi;
pub mod query;
pub mod statement;
pub mod transaction;

pub use connection::{Action, AuthContext, Authorization, Connection, OpenFlags};
pub use error::{EngineError, Error, NarrowingError, Result, StateError};
pub use query::{ColumnType, FromColumn, FromColumns, Getter, Query, Row, Rows};
pub use statement::{
    Binder, Command, Null, StaticBlob, StaticStr, Statement, Step, ToSql, Unbound,
};
pub use transaction::{Transaction, TransactionBehavior};

/// The version of the linked SQLite library.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// The version of the linked SQLite library as a number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
