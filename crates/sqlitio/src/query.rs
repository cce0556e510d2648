//! Row-returning statements and typed column access.
//!
//! [`Query`] wraps a statement whose SQL yields rows. Results are consumed
//! either one at a time with [`fetchone`](Query::fetchone) or through the
//! lending cursor returned by [`rows`](Query::rows). Each [`Row`] is a view
//! into the statement's current position; moving the cursor invalidates
//! every outstanding view, and a stale view reports a state error instead
//! of reading freed memory.

use std::ffi::{CStr, c_int};
use std::ops::{Deref, DerefMut};
use std::slice;

use crate::connection::Connection;
use crate::error::{Error, NarrowingError, Result};
use crate::ffi;
use crate::statement::{RawStatement, Statement, Step};

/// The storage class of a column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Null,
    Integer,
    Float,
    Text,
    Blob,
}

impl ColumnType {
    fn from_code(code: c_int) -> Self {
        match code {
            ffi::SQLITE_INTEGER => ColumnType::Integer,
            ffi::SQLITE_FLOAT => ColumnType::Float,
            ffi::SQLITE_TEXT => ColumnType::Text,
            ffi::SQLITE_BLOB => ColumnType::Blob,
            _ => ColumnType::Null,
        }
    }
}

/// A statement for SQL that returns rows.
pub struct Query<'conn> {
    stmt: Statement<'conn>,
}

impl<'conn> Query<'conn> {
    /// Prepare `sql` as a query on `conn`.
    pub fn new(conn: &'conn Connection, sql: &str) -> Result<Self> {
        Ok(Query {
            stmt: Statement::new(conn, Some(sql))?,
        })
    }

    /// Build a query with no SQL yet; call
    /// [`prepare`](Statement::prepare) before fetching.
    pub fn unprepared(conn: &'conn Connection) -> Result<Self> {
        Ok(Query {
            stmt: Statement::new(conn, None)?,
        })
    }

    /// The number of columns the statement produces.
    pub fn column_count(&self) -> i32 {
        let raw = self.stmt.raw();
        if raw.ptr.is_null() {
            return 0;
        }
        // SAFETY: the statement handle is valid.
        unsafe { ffi::sqlite3_column_count(raw.ptr) }
    }

    /// The name of result column `index`, or `None` out of range.
    pub fn column_name(&self, index: i32) -> Option<String> {
        let raw = self.stmt.raw();
        if raw.ptr.is_null() || index < 0 || index >= self.column_count() {
            return None;
        }
        // SAFETY: the statement handle is valid and the index is in range.
        unsafe {
            let ptr = ffi::sqlite3_column_name(raw.ptr, index);
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }

    /// The declared type of result column `index`, when the column maps
    /// directly to a table column.
    pub fn column_decltype(&self, index: i32) -> Option<String> {
        let raw = self.stmt.raw();
        if raw.ptr.is_null() {
            return None;
        }
        // SAFETY: the statement handle is valid.
        unsafe {
            let ptr = ffi::sqlite3_column_decltype(raw.ptr, index);
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
            }
        }
    }

    /// Step once and return the row, failing with [`Error::NotFound`] when
    /// the statement produces none.
    pub fn fetchone(&mut self) -> Result<Row<'_>> {
        match self.stmt.step()? {
            Step::Row => Ok(Row::current(self.stmt.raw())),
            Step::Done => Err(Error::NotFound),
            Step::Busy => Err(Error::engine(self.stmt.db(), ffi::SQLITE_BUSY)),
        }
    }

    /// A single-pass cursor over the remaining rows.
    pub fn rows(&mut self) -> Rows<'_, 'conn> {
        Rows {
            query: self,
            done: false,
        }
    }
}

impl<'conn> Deref for Query<'conn> {
    type Target = Statement<'conn>;

    fn deref(&self) -> &Self::Target {
        &self.stmt
    }
}

impl DerefMut for Query<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stmt
    }
}

/// Single-pass row cursor.
///
/// Not a `std::iter::Iterator`: each [`next`](Rows::next) call borrows the
/// cursor mutably, so the returned [`Row`] cannot outlive the advance that
/// would invalidate it.
pub struct Rows<'q, 'conn> {
    query: &'q mut Query<'conn>,
    done: bool,
}

impl Rows<'_, '_> {
    /// Advance to the next row, or `None` when the statement is done.
    pub fn next(&mut self) -> Result<Option<Row<'_>>> {
        if self.done {
            return Ok(None);
        }
        match self.query.stmt.step()? {
            Step::Row => Ok(Some(Row::current(self.query.stmt.raw()))),
            Step::Done => {
                self.done = true;
                Ok(None)
            }
            Step::Busy => Err(Error::engine(self.query.stmt.db(), ffi::SQLITE_BUSY)),
        }
    }
}

/// A view of the statement's current row.
///
/// The view snapshots the statement's cursor epoch. Any later step, reset,
/// re-prepare, or finalize bumps the epoch, after which every access
/// through this view fails with a state error.
pub struct Row<'stmt> {
    raw: &'stmt RawStatement,
    epoch: u64,
}

impl<'stmt> Row<'stmt> {
    pub(crate) fn current(raw: &'stmt RawStatement) -> Self {
        Row {
            raw,
            epoch: raw.epoch.get(),
        }
    }

    fn guard(&self, operation: &'static str) -> Result<()> {
        if self.raw.ptr.is_null() || self.raw.epoch.get() != self.epoch {
            return Err(Error::state(
                operation,
                "row view is stale: the cursor has moved",
            ));
        }
        Ok(())
    }

    /// The number of columns in this row.
    pub fn column_count(&self) -> Result<i32> {
        self.guard("column_count")?;
        // SAFETY: the statement handle is valid and positioned on a row.
        Ok(unsafe { ffi::sqlite3_data_count(self.raw.ptr) })
    }

    /// The storage class of column `index`.
    pub fn column_type(&self, index: i32) -> Result<ColumnType> {
        self.guard("column_type")?;
        // SAFETY: the statement handle is valid and positioned on a row.
        let code = unsafe { ffi::sqlite3_column_type(self.raw.ptr, index) };
        Ok(ColumnType::from_code(code))
    }

    /// The byte length of column `index` as text or blob.
    pub fn column_bytes(&self, index: i32) -> Result<i32> {
        self.guard("column_bytes")?;
        // SAFETY: the statement handle is valid and positioned on a row.
        Ok(unsafe { ffi::sqlite3_column_bytes(self.raw.ptr, index) })
    }

    /// Read column `index` as `T`.
    pub fn get<T: FromColumn>(&self, index: i32) -> Result<T> {
        T::from_column(self, index)
    }

    /// Read column `index` as `T`, substituting `default` when the column
    /// is NULL.
    pub fn get_nullable<T: FromColumn>(&self, index: i32, default: T) -> Result<T> {
        if self.column_type(index)? == ColumnType::Null {
            return Ok(default);
        }
        self.get(index)
    }

    /// Borrow column `index` as text without copying.
    ///
    /// The borrow is tied to the view, and the engine keeps the bytes
    /// alive only until the cursor moves. Fails with [`Error::Utf8`] when
    /// the stored bytes are not valid UTF-8; [`Row::get`] with `String` is
    /// the lossy alternative.
    pub fn text(&self, index: i32) -> Result<&str> {
        let bytes = self.blob(index)?;
        Ok(std::str::from_utf8(bytes)?)
    }

    /// Borrow column `index` as raw bytes without copying.
    ///
    /// Works for both text and blob values. NULL reads as an empty slice.
    pub fn blob(&self, index: i32) -> Result<&[u8]> {
        self.guard("blob")?;
        // SAFETY: the statement handle is valid and positioned on a row.
        // column_bytes is read after column_blob so a type conversion
        // inside the engine cannot invalidate the pointer.
        unsafe {
            let ptr = ffi::sqlite3_column_blob(self.raw.ptr, index);
            let len = usize::try_from(ffi::sqlite3_column_bytes(self.raw.ptr, index))
                .unwrap_or_default();
            if ptr.is_null() || len == 0 {
                Ok(&[])
            } else {
                Ok(slice::from_raw_parts(ptr.cast::<u8>(), len))
            }
        }
    }

    /// Read several columns at once into a tuple.
    pub fn get_columns<T: FromColumns>(&self, indexes: T::Indexes) -> Result<T> {
        T::from_columns(self, indexes)
    }

    /// A sequential column reader starting at column `start`.
    pub fn getter(&self, start: i32) -> Getter<'_, 'stmt> {
        Getter { row: self, index: start }
    }

    fn raw_i64(&self, index: i32) -> Result<i64> {
        self.guard("get")?;
        debug_assert_eq!(
            // SAFETY: the statement handle is valid and positioned on a row.
            unsafe { ffi::sqlite3_column_type(self.raw.ptr, index) },
            ffi::SQLITE_INTEGER,
            "column {index} is not an integer"
        );
        // SAFETY: same as above.
        Ok(unsafe { ffi::sqlite3_column_int64(self.raw.ptr, index) })
    }
}

/// Values readable from a single result column.
pub trait FromColumn: Sized {
    fn from_column(row: &Row<'_>, index: i32) -> Result<Self>;
}

impl FromColumn for i64 {
    fn from_column(row: &Row<'_>, index: i32) -> Result<Self> {
        row.raw_i64(index)
    }
}

impl FromColumn for u64 {
    /// Reinterprets the stored 64-bit pattern; see the bind-side note on
    /// values above `i64::MAX`.
    fn from_column(row: &Row<'_>, index: i32) -> Result<Self> {
        Ok(row.raw_i64(index)? as u64)
    }
}

impl FromColumn for i32 {
    fn from_column(row: &Row<'_>, index: i32) -> Result<Self> {
        let value = row.raw_i64(index)?;
        i32::try_from(value)
            .map_err(|_| NarrowingError { value, target: "i32" }.into())
    }
}

impl FromColumn for u32 {
    fn from_column(row: &Row<'_>, index: i32) -> Result<Self> {
        let value = row.raw_i64(index)?;
        u32::try_from(value)
            .map_err(|_| NarrowingError { value, target: "u32" }.into())
    }
}

impl FromColumn for bool {
    fn from_column(row: &Row<'_>, index: i32) -> Result<Self> {
        Ok(row.raw_i64(index)? != 0)
    }
}

impl FromColumn for f64 {
    fn from_column(row: &Row<'_>, index: i32) -> Result<Self> {
        row.guard("get")?;
        debug_assert_eq!(row.column_type(index)?, ColumnType::Float);
        // SAFETY: the statement handle is valid and positioned on a row.
        Ok(unsafe { ffi::sqlite3_column_double(row.raw.ptr, index) })
    }
}

impl FromColumn for String {
    fn from_column(row: &Row<'_>, index: i32) -> Result<Self> {
        row.guard("get")?;
        debug_assert_eq!(row.column_type(index)?, ColumnType::Text);
        // Invalid UTF-8 is replaced rather than rejected; use Row::text for
        // strict decoding.
        Ok(String::from_utf8_lossy(row.blob(index)?).into_owned())
    }
}

impl FromColumn for Vec<u8> {
    fn from_column(row: &Row<'_>, index: i32) -> Result<Self> {
        debug_assert!(matches!(
            row.column_type(index)?,
            ColumnType::Text | ColumnType::Blob | ColumnType::Null
        ));
        Ok(row.blob(index)?.to_vec())
    }
}

impl FromColumn for () {
    fn from_column(_row: &Row<'_>, _index: i32) -> Result<Self> {
        Ok(())
    }
}

/// Tuples readable from several columns at once.
pub trait FromColumns: Sized {
    /// Matching tuple of column indexes.
    type Indexes;

    fn from_columns(row: &Row<'_>, indexes: Self::Indexes) -> Result<Self>;
}

macro_rules! index_ty {
    ($t:ident) => {
        i32
    };
}

macro_rules! impl_from_columns {
    ($(($($t:ident . $idx:tt),+))+) => {
        $(
            impl<$($t: FromColumn),+> FromColumns for ($($t,)+) {
                type Indexes = ($(index_ty!($t),)+);

                fn from_columns(row: &Row<'_>, indexes: Self::Indexes) -> Result<Self> {
                    Ok(($($t::from_column(row, indexes.$idx)?,)+))
                }
            }
        )+
    };
}

impl_from_columns! {
    (A.0)
    (A.0, B.1)
    (A.0, B.1, C.2)
    (A.0, B.1, C.2, D.3)
    (A.0, B.1, C.2, D.3, E.4)
    (A.0, B.1, C.2, D.3, E.4, F.5)
    (A.0, B.1, C.2, D.3, E.4, F.5, G.6)
    (A.0, B.1, C.2, D.3, E.4, F.5, G.6, H.7)
}

/// Reads consecutive columns from a row.
pub struct Getter<'row, 'stmt> {
    row: &'row Row<'stmt>,
    index: i32,
}

impl Getter<'_, '_> {
    /// Read the current column as `T` and advance.
    pub fn get<T: FromColumn>(&mut self) -> Result<T> {
        let value = self.row.get::<T>(self.index)?;
        self.index += 1;
        Ok(value)
    }

    /// Like [`get`](Getter::get) but substitutes `default` for NULL.
    pub fn get_or<T: FromColumn>(&mut self, default: T) -> Result<T> {
        let value = self.row.get_nullable::<T>(self.index, default)?;
        self.index += 1;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::error::Error;
    use crate::statement::Command;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(
            "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT, age INTEGER, weight REAL)",
        )
        .unwrap();
        conn
    }

    fn insert(conn: &Connection, id: i64, name: &str, age: i64, weight: f64) {
        let mut cmd = Command::new(
            conn,
            "INSERT INTO people (id, name, age, weight) VALUES (?, ?, ?, ?)",
        )
        .unwrap();
        cmd.binder(1)
            .push(&id)
            .push(name)
            .push(&age)
            .push(&weight)
            .finish()
            .unwrap();
        cmd.execute().unwrap();
    }

    #[test]
    fn test_fetchone() {
        let conn = test_db();
        insert(&conn, 1, "alice", 30, 55.5);

        let mut query = Query::new(&conn, "SELECT name, age FROM people WHERE id = 1").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "alice");
        assert_eq!(row.get::<i64>(1).unwrap(), 30);
    }

    #[test]
    fn test_fetchone_not_found() {
        let conn = test_db();
        let mut query = Query::new(&conn, "SELECT name FROM people WHERE id = 99").unwrap();
        assert!(matches!(query.fetchone(), Err(Error::NotFound)));
    }

    #[test]
    fn test_rows_iteration() {
        let conn = test_db();
        insert(&conn, 1, "alice", 30, 55.5);
        insert(&conn, 2, "bob", 40, 80.0);
        insert(&conn, 3, "carol", 50, 65.2);

        let mut query = Query::new(&conn, "SELECT id FROM people ORDER BY id").unwrap();
        let mut rows = query.rows();
        let mut seen = Vec::new();
        while let Some(row) = rows.next().unwrap() {
            seen.push(row.get::<i64>(0).unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
        // The cursor stays exhausted.
        assert!(rows.next().unwrap().is_none());
    }

    #[test]
    fn test_rows_empty() {
        let conn = test_db();
        let mut query = Query::new(&conn, "SELECT id FROM people").unwrap();
        assert!(query.rows().next().unwrap().is_none());
    }

    #[test]
    fn test_narrowing() {
        let conn = test_db();
        insert(&conn, 1, "x", i64::from(i32::MAX) + 1, 0.0);

        let mut query = Query::new(&conn, "SELECT age FROM people").unwrap();
        let row = query.fetchone().unwrap();
        let err = row.get::<i32>(0).unwrap_err();
        assert!(matches!(err, Error::Narrowing(_)));
        // The wide read still works.
        assert_eq!(row.get::<i64>(0).unwrap(), i64::from(i32::MAX) + 1);
    }

    #[test]
    fn test_u32_rejects_negative() {
        let conn = test_db();
        insert(&conn, 1, "x", -5, 0.0);

        let mut query = Query::new(&conn, "SELECT age FROM people").unwrap();
        let row = query.fetchone().unwrap();
        assert!(matches!(row.get::<u32>(0).unwrap_err(), Error::Narrowing(_)));
    }

    #[test]
    fn test_text_with_embedded_nul() {
        let conn = test_db();
        let tricky = "ab\0cd\u{00e9}";
        let mut cmd = Command::new(&conn, "INSERT INTO people (id, name) VALUES (1, ?)").unwrap();
        cmd.bind(1, tricky).unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT name FROM people").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), tricky);
        assert_eq!(row.text(0).unwrap(), tricky);
        assert_eq!(row.get::<Vec<u8>>(0).unwrap(), tricky.as_bytes());
    }

    #[test]
    fn test_borrowed_blob() {
        let conn = test_db();
        conn.execute("CREATE TABLE b (data BLOB)").unwrap();
        let bytes = [0u8, 1, 2, 255, 254];
        let mut cmd = Command::new(&conn, "INSERT INTO b (data) VALUES (?)").unwrap();
        cmd.bind(1, &bytes[..]).unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT data FROM b").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(row.blob(0).unwrap(), bytes);
        assert_eq!(row.column_bytes(0).unwrap(), 5);
    }

    #[test]
    fn test_text_rejects_invalid_utf8() {
        let conn = test_db();
        conn.execute("CREATE TABLE b (data BLOB)").unwrap();
        let mut cmd = Command::new(&conn, "INSERT INTO b (data) VALUES (?)").unwrap();
        cmd.bind(1, &[0xffu8, 0xfe, 0x41][..]).unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT data FROM b").unwrap();
        let row = query.fetchone().unwrap();
        assert!(matches!(row.text(0), Err(Error::Utf8(_))));
        // The bytes are still reachable raw.
        assert_eq!(row.blob(0).unwrap(), [0xff, 0xfe, 0x41]);
    }

    #[test]
    fn test_unit_skips_column() {
        let conn = test_db();
        insert(&conn, 1, "alice", 30, 55.5);

        let mut query = Query::new(&conn, "SELECT id, name, age FROM people").unwrap();
        let row = query.fetchone().unwrap();
        let (id, _, age): (i64, (), i64) = row.get_columns((0, 1, 2)).unwrap();
        assert_eq!(id, 1);
        assert_eq!(age, 30);
    }

    #[test]
    fn test_get_nullable() {
        let conn = test_db();
        conn.execute("INSERT INTO people (id) VALUES (1)").unwrap();

        let mut query = Query::new(&conn, "SELECT name, age FROM people").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(
            row.get_nullable::<String>(0, "none".to_owned()).unwrap(),
            "none"
        );
        assert_eq!(row.get_nullable::<i64>(1, -1).unwrap(), -1);
    }

    #[test]
    fn test_get_columns() {
        let conn = test_db();
        insert(&conn, 1, "alice", 30, 55.5);

        let mut query = Query::new(&conn, "SELECT id, name, age FROM people").unwrap();
        let row = query.fetchone().unwrap();
        let (id, name, age): (i64, String, i64) = row.get_columns((0, 1, 2)).unwrap();
        assert_eq!(id, 1);
        assert_eq!(name, "alice");
        assert_eq!(age, 30);
    }

    #[test]
    fn test_getter() {
        let conn = test_db();
        conn.execute("INSERT INTO people (id, name, age) VALUES (1, 'bob', NULL)")
            .unwrap();

        let mut query = Query::new(&conn, "SELECT id, name, age FROM people").unwrap();
        let row = query.fetchone().unwrap();
        let mut getter = row.getter(0);
        assert_eq!(getter.get::<i64>().unwrap(), 1);
        assert_eq!(getter.get::<String>().unwrap(), "bob");
        assert_eq!(getter.get_or::<i64>(0).unwrap(), 0);
    }

    #[test]
    fn test_metadata() {
        let conn = test_db();
        let query = Query::new(&conn, "SELECT id, name AS label FROM people").unwrap();
        assert_eq!(query.column_count(), 2);
        assert_eq!(query.column_name(0).unwrap(), "id");
        assert_eq!(query.column_name(1).unwrap(), "label");
        assert!(query.column_name(2).is_none());
        assert_eq!(query.column_decltype(0).unwrap(), "INTEGER");
    }

    #[test]
    fn test_column_types() {
        let conn = test_db();
        insert(&conn, 1, "alice", 30, 55.5);

        let mut query =
            Query::new(&conn, "SELECT id, name, weight, NULL FROM people").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(row.column_type(0).unwrap(), ColumnType::Integer);
        assert_eq!(row.column_type(1).unwrap(), ColumnType::Text);
        assert_eq!(row.column_type(2).unwrap(), ColumnType::Float);
        assert_eq!(row.column_type(3).unwrap(), ColumnType::Null);
        assert_eq!(row.column_count().unwrap(), 4);
    }

    #[test]
    fn test_stale_row_view() {
        let conn = test_db();
        insert(&conn, 1, "alice", 30, 55.5);

        let mut query = Query::new(&conn, "SELECT id FROM people").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 1);

        // Simulate the cursor moving out from under the view.
        row.raw.bump();
        let err = row.get::<i64>(0).unwrap_err();
        assert!(matches!(err, Error::State(_)));
        assert!(row.column_type(0).is_err());
        assert!(row.blob(0).is_err());
    }
}
