//! Prepared statements, parameter binding, and write commands.
//!
//! [`Statement`] owns a compiled SQLite statement handle and tracks the
//! unconsumed remainder of multi-statement SQL text. [`Command`] layers the
//! execute operations for SQL that returns no rows on top of it, and
//! [`Binder`] offers a fluent, error-accumulating way to bind a run of
//! positional parameters.

use std::cell::Cell;
use std::ffi::{CString, c_int};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::os::raw::c_char;
use std::ptr;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::ffi;

/// Outcome of advancing a statement one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A result row is available.
    Row,
    /// The statement ran to completion.
    Done,
    /// The database is busy or locked; the step may be retried.
    Busy,
}

/// The raw statement handle plus the cursor epoch.
///
/// The epoch counts every operation that moves or invalidates the cursor.
/// Row views snapshot it when created and refuse access once it changes,
/// so a view can never read past an advance, reset, or finalize.
pub(crate) struct RawStatement {
    pub(crate) ptr: *mut ffi::sqlite3_stmt,
    pub(crate) db: *mut ffi::sqlite3,
    pub(crate) epoch: Cell<u64>,
}

impl RawStatement {
    fn new(db: *mut ffi::sqlite3) -> Self {
        RawStatement {
            ptr: ptr::null_mut(),
            db,
            epoch: Cell::new(0),
        }
    }

    pub(crate) fn bump(&self) {
        self.epoch.set(self.epoch.get().wrapping_add(1));
    }
}

/// A compiled SQL statement tied to a connection.
///
/// A statement starts out unprepared when built from a connection without
/// SQL text. Binding, stepping, and resetting require a prepared statement
/// and fail with a state error otherwise. [`finish`](Statement::finish)
/// returns the statement to the unprepared state; dropping finalizes the
/// handle unconditionally.
pub struct Statement<'conn> {
    raw: RawStatement,
    sql: String,
    rest: Option<String>,
    _conn: PhantomData<&'conn Connection>,
}

impl<'conn> Statement<'conn> {
    pub(crate) fn new(conn: &'conn Connection, sql: Option<&str>) -> Result<Self> {
        let mut stmt = Statement {
            raw: RawStatement::new(conn.as_ptr()),
            sql: String::new(),
            rest: None,
            _conn: PhantomData,
        };
        if let Some(sql) = sql {
            stmt.prepare(sql)?;
        }
        Ok(stmt)
    }

    /// Compile `sql`, replacing any previously prepared statement.
    ///
    /// Only the first statement in `sql` is compiled. The remainder, if
    /// any, is retained and consumed by [`Command::execute_all`].
    pub fn prepare(&mut self, sql: &str) -> Result<()> {
        self.sql = sql.to_owned();
        let source = self.sql.clone();
        self.compile(&source)
    }

    fn compile(&mut self, source: &str) -> Result<()> {
        self.finish()?;
        let c_sql = CString::new(source)
            .map_err(|_| Error::misuse("SQL text contains an interior NUL byte"))?;
        let mut stmt_ptr: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        // SAFETY: c_sql outlives the call, stmt_ptr and tail are valid out
        // parameters, and the byte length includes the terminating NUL.
        let rc = unsafe {
            ffi::sqlite3_prepare_v2(
                self.raw.db,
                c_sql.as_ptr(),
                c_int::try_from(source.len() + 1).map_err(|_| Error::misuse("SQL text too long"))?,
                &mut stmt_ptr,
                &mut tail,
            )
        };
        if rc != ffi::SQLITE_OK {
            return Err(Error::engine(self.raw.db, rc));
        }
        if stmt_ptr.is_null() {
            // Comments and whitespace compile to nothing.
            return Err(Error::misuse("SQL text did not produce a statement"));
        }
        // SAFETY: tail points into c_sql's buffer after a successful prepare.
        let consumed = usize::try_from(unsafe { tail.offset_from(c_sql.as_ptr()) })
            .unwrap_or_default();
        let remainder = source.get(consumed..).unwrap_or_default().trim();
        self.rest = if remainder.is_empty() {
            None
        } else {
            Some(remainder.to_owned())
        };
        self.raw.ptr = stmt_ptr;
        self.raw.bump();
        tracing::trace!(sql = source, "prepared statement");
        Ok(())
    }

    fn require_prepared(&self, operation: &'static str) -> Result<()> {
        if self.raw.ptr.is_null() {
            return Err(Error::state(operation, "statement is not prepared"));
        }
        Ok(())
    }

    fn check(&self, rc: c_int) -> Result<()> {
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(Error::engine(self.raw.db, rc))
        }
    }

    /// Bind `value` to the 1-based positional parameter `index`.
    pub fn bind<T: ToSql + ?Sized>(&mut self, index: i32, value: &T) -> Result<()> {
        value.bind_to(self, index)
    }

    /// Bind `value` to the named parameter `name`.
    ///
    /// The name must match the SQL text exactly, prefix included, so a
    /// parameter written `:id` is bound as `":id"`.
    pub fn bind_named<T: ToSql + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        self.require_prepared("bind")?;
        let c_name = CString::new(name)
            .map_err(|_| Error::misuse("parameter name contains an interior NUL byte"))?;
        // SAFETY: the statement handle is valid and c_name is NUL terminated.
        let index = unsafe { ffi::sqlite3_bind_parameter_index(self.raw.ptr, c_name.as_ptr()) };
        if index == 0 {
            return Err(Error::misuse(format!("unknown parameter name: {name}")));
        }
        value.bind_to(self, index)
    }

    /// Bind SQL NULL to parameter `index`.
    pub fn bind_null(&mut self, index: i32) -> Result<()> {
        self.require_prepared("bind")?;
        // SAFETY: the statement handle is valid.
        let rc = unsafe { ffi::sqlite3_bind_null(self.raw.ptr, index) };
        self.check(rc)
    }

    /// Bind a 32-bit integer to parameter `index`.
    pub fn bind_i32(&mut self, index: i32, value: i32) -> Result<()> {
        self.require_prepared("bind")?;
        // SAFETY: the statement handle is valid.
        let rc = unsafe { ffi::sqlite3_bind_int(self.raw.ptr, index, value) };
        self.check(rc)
    }

    /// Bind a 64-bit integer to parameter `index`.
    pub fn bind_i64(&mut self, index: i32, value: i64) -> Result<()> {
        self.require_prepared("bind")?;
        // SAFETY: the statement handle is valid.
        let rc = unsafe { ffi::sqlite3_bind_int64(self.raw.ptr, index, value) };
        self.check(rc)
    }

    /// Bind a double to parameter `index`.
    pub fn bind_f64(&mut self, index: i32, value: f64) -> Result<()> {
        self.require_prepared("bind")?;
        // SAFETY: the statement handle is valid.
        let rc = unsafe { ffi::sqlite3_bind_double(self.raw.ptr, index, value) };
        self.check(rc)
    }

    /// Bind UTF-8 text to parameter `index`, copying the bytes.
    ///
    /// Embedded NUL bytes are fine: the length is passed explicitly.
    pub fn bind_text(&mut self, index: i32, value: &str) -> Result<()> {
        self.require_prepared("bind")?;
        // SAFETY: the pointer and length describe value's bytes, and
        // SQLITE_TRANSIENT makes the engine take its own copy before the
        // call returns.
        let rc = unsafe {
            ffi::sqlite3_bind_text(
                self.raw.ptr,
                index,
                value.as_ptr().cast::<c_char>(),
                c_int::try_from(value.len()).map_err(|_| Error::misuse("text too long"))?,
                ffi::SQLITE_TRANSIENT(),
            )
        };
        self.check(rc)
    }

    /// Bind a blob to parameter `index`, copying the bytes.
    pub fn bind_blob(&mut self, index: i32, value: &[u8]) -> Result<()> {
        self.require_prepared("bind")?;
        // SAFETY: the pointer and length describe value's bytes, copied by
        // the engine via SQLITE_TRANSIENT.
        let rc = unsafe {
            ffi::sqlite3_bind_blob(
                self.raw.ptr,
                index,
                value.as_ptr().cast(),
                c_int::try_from(value.len()).map_err(|_| Error::misuse("blob too long"))?,
                ffi::SQLITE_TRANSIENT(),
            )
        };
        self.check(rc)
    }

    /// Bind `'static` text without copying.
    pub fn bind_static_text(&mut self, index: i32, value: &'static str) -> Result<()> {
        self.require_prepared("bind")?;
        // SAFETY: the buffer lives for the program's lifetime, so
        // SQLITE_STATIC is sound and no copy is needed.
        let rc = unsafe {
            ffi::sqlite3_bind_text(
                self.raw.ptr,
                index,
                value.as_ptr().cast::<c_char>(),
                c_int::try_from(value.len()).map_err(|_| Error::misuse("text too long"))?,
                ffi::SQLITE_STATIC(),
            )
        };
        self.check(rc)
    }

    /// Bind a `'static` blob without copying.
    pub fn bind_static_blob(&mut self, index: i32, value: &'static [u8]) -> Result<()> {
        self.require_prepared("bind")?;
        // SAFETY: the buffer lives for the program's lifetime.
        let rc = unsafe {
            ffi::sqlite3_bind_blob(
                self.raw.ptr,
                index,
                value.as_ptr().cast(),
                c_int::try_from(value.len()).map_err(|_| Error::misuse("blob too long"))?,
                ffi::SQLITE_STATIC(),
            )
        };
        self.check(rc)
    }

    /// Advance the statement by one step.
    ///
    /// Invalidates any outstanding row views before the engine moves the
    /// cursor. Busy and locked outcomes are reported as [`Step::Busy`]
    /// rather than errors so callers can retry.
    pub fn step(&mut self) -> Result<Step> {
        self.require_prepared("step")?;
        self.raw.bump();
        // SAFETY: the statement handle is valid.
        let rc = unsafe { ffi::sqlite3_step(self.raw.ptr) };
        match rc {
            ffi::SQLITE_ROW => Ok(Step::Row),
            ffi::SQLITE_DONE => Ok(Step::Done),
            ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => Ok(Step::Busy),
            _ => Err(Error::engine(self.raw.db, rc)),
        }
    }

    /// Rewind the statement so it can be stepped again.
    ///
    /// Bindings are kept; use [`clear_bindings`](Statement::clear_bindings)
    /// to reset them to NULL.
    pub fn reset(&mut self) -> Result<()> {
        self.require_prepared("reset")?;
        self.raw.bump();
        // SAFETY: the statement handle is valid.
        let rc = unsafe { ffi::sqlite3_reset(self.raw.ptr) };
        self.check(rc)
    }

    /// Set every parameter back to NULL.
    pub fn clear_bindings(&mut self) -> Result<()> {
        self.require_prepared("clear_bindings")?;
        self.raw.bump();
        // SAFETY: the statement handle is valid.
        let rc = unsafe { ffi::sqlite3_clear_bindings(self.raw.ptr) };
        self.check(rc)
    }

    /// Finalize the prepared statement, returning it to the unprepared
    /// state. Safe to call repeatedly; a no-op when nothing is prepared.
    pub fn finish(&mut self) -> Result<()> {
        if self.raw.ptr.is_null() {
            return Ok(());
        }
        self.raw.bump();
        // SAFETY: the statement handle is valid and finalized exactly once;
        // the pointer is nulled before the result is inspected.
        let rc = unsafe { ffi::sqlite3_finalize(self.raw.ptr) };
        self.raw.ptr = ptr::null_mut();
        self.check(rc)
    }

    /// The number of parameters in the prepared statement.
    pub fn parameter_count(&self) -> i32 {
        if self.raw.ptr.is_null() {
            return 0;
        }
        // SAFETY: the statement handle is valid.
        unsafe { ffi::sqlite3_bind_parameter_count(self.raw.ptr) }
    }

    /// The SQL text this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub(crate) fn raw(&self) -> &RawStatement {
        &self.raw
    }

    pub(crate) fn db(&self) -> *mut ffi::sqlite3 {
        self.raw.db
    }

    pub(crate) fn take_rest(&mut self) -> Option<String> {
        self.rest.take()
    }

    pub(crate) fn compile_next(&mut self, source: &str) -> Result<()> {
        self.compile(source)
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        if !self.raw.ptr.is_null() {
            self.raw.bump();
            // SAFETY: the handle is valid and dropped exactly once. The
            // finalize result repeats the last step error, which has
            // already been surfaced.
            unsafe {
                ffi::sqlite3_finalize(self.raw.ptr);
            }
            self.raw.ptr = ptr::null_mut();
        }
    }
}

/// Values that can be bound to a statement parameter.
pub trait ToSql {
    /// Bind `self` to the 1-based parameter `index` of `stmt`.
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()>;
}

impl ToSql for i32 {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_i32(index, *self)
    }
}

impl ToSql for u32 {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_i64(index, i64::from(*self))
    }
}

impl ToSql for i64 {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_i64(index, *self)
    }
}

impl ToSql for u64 {
    /// Stored as the same 64-bit pattern. Values above `i64::MAX` come back
    /// negative when read as `i64`, and intact when read back as `u64`.
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_i64(index, *self as i64)
    }
}

impl ToSql for f64 {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_f64(index, *self)
    }
}

impl ToSql for bool {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_i32(index, i32::from(*self))
    }
}

impl ToSql for str {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_text(index, self)
    }
}

impl ToSql for String {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_text(index, self)
    }
}

impl ToSql for [u8] {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_blob(index, self)
    }
}

impl ToSql for Vec<u8> {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_blob(index, self)
    }
}

impl<T: ToSql> ToSql for Option<T> {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        match self {
            Some(value) => value.bind_to(stmt, index),
            None => stmt.bind_null(index),
        }
    }
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        (**self).bind_to(stmt, index)
    }
}

/// Binds SQL NULL.
#[derive(Debug, Clone, Copy, Default)]
pub struct Null;

impl ToSql for Null {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_null(index)
    }
}

/// Leaves the parameter untouched. Useful in a [`Binder`] chain to skip a
/// position that should keep its current binding.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unbound;

impl ToSql for Unbound {
    fn bind_to(&self, _stmt: &mut Statement<'_>, _index: i32) -> Result<()> {
        Ok(())
    }
}

/// Text with program lifetime, bound without copying.
#[derive(Debug, Clone, Copy)]
pub struct StaticStr(pub &'static str);

impl ToSql for StaticStr {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_static_text(index, self.0)
    }
}

/// A blob with program lifetime, bound without copying.
#[derive(Debug, Clone, Copy)]
pub struct StaticBlob(pub &'static [u8]);

impl ToSql for StaticBlob {
    fn bind_to(&self, stmt: &mut Statement<'_>, index: i32) -> Result<()> {
        stmt.bind_static_blob(index, self.0)
    }
}

/// A statement for SQL that returns no rows.
pub struct Command<'conn> {
    stmt: Statement<'conn>,
}

impl<'conn> Command<'conn> {
    /// Prepare `sql` as a command on `conn`.
    pub fn new(conn: &'conn Connection, sql: &str) -> Result<Self> {
        Ok(Command {
            stmt: Statement::new(conn, Some(sql))?,
        })
    }

    /// Build a command with no SQL yet; call
    /// [`prepare`](Statement::prepare) before executing.
    pub fn unprepared(conn: &'conn Connection) -> Result<Self> {
        Ok(Command {
            stmt: Statement::new(conn, None)?,
        })
    }

    /// Run the prepared statement to completion.
    ///
    /// Fails with a state error if the statement yields rows; use a
    /// [`Query`](crate::query::Query) for those.
    pub fn execute(&mut self) -> Result<()> {
        match self.stmt.step()? {
            Step::Done => Ok(()),
            Step::Row => Err(Error::state("execute", "command produced result rows")),
            Step::Busy => Err(Error::engine(self.stmt.db(), ffi::SQLITE_BUSY)),
        }
    }

    /// Run the prepared statement and then every remaining statement in the
    /// original SQL text, in order. Stops at the first failure, leaving the
    /// remainder unexecuted.
    pub fn execute_all(&mut self) -> Result<()> {
        self.execute()?;
        while let Some(next) = self.stmt.take_rest() {
            tracing::trace!(sql = %next, "executing batch remainder");
            self.stmt.compile_next(&next)?;
            self.execute()?;
        }
        Ok(())
    }

    /// Start a fluent binding chain at parameter `index`.
    pub fn binder(&mut self, index: i32) -> Binder<'_, 'conn> {
        Binder {
            stmt: &mut self.stmt,
            index,
            state: Ok(()),
        }
    }
}

impl<'conn> Deref for Command<'conn> {
    type Target = Statement<'conn>;

    fn deref(&self) -> &Self::Target {
        &self.stmt
    }
}

impl DerefMut for Command<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stmt
    }
}

/// Error-accumulating fluent binder.
///
/// Each [`push`](Binder::push) binds the next positional parameter. The
/// first failure is recorded and later pushes become no-ops, so a whole
/// chain can be written without intermediate `?` and checked once with
/// [`finish`](Binder::finish).
pub struct Binder<'stmt, 'conn> {
    stmt: &'stmt mut Statement<'conn>,
    index: i32,
    state: Result<()>,
}

impl Binder<'_, '_> {
    /// Bind `value` to the current parameter and advance.
    pub fn push<T: ToSql + ?Sized>(mut self, value: &T) -> Self {
        if self.state.is_ok() {
            self.state = value.bind_to(self.stmt, self.index);
            if self.state.is_ok() {
                self.index += 1;
            }
        }
        self
    }

    /// The recorded outcome of the chain.
    pub fn finish(self) -> Result<()> {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::query::Query;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, data BLOB, score REAL)")
            .unwrap();
        conn
    }

    #[test]
    fn test_bind_all_types() {
        let conn = test_db();
        let mut cmd = Command::new(&conn, "INSERT INTO t (id, name, data, score) VALUES (?, ?, ?, ?)")
            .unwrap();
        cmd.bind(1, &7i64).unwrap();
        cmd.bind(2, "seven").unwrap();
        cmd.bind(3, &b"\x01\x02\x03"[..]).unwrap();
        cmd.bind(4, &2.5f64).unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT id, name, data, score FROM t").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 7);
        assert_eq!(row.get::<String>(1).unwrap(), "seven");
        assert_eq!(row.get::<Vec<u8>>(2).unwrap(), vec![1, 2, 3]);
        assert!((row.get::<f64>(3).unwrap() - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_bind_named() {
        let conn = test_db();
        let mut cmd =
            Command::new(&conn, "INSERT INTO t (id, name) VALUES (:id, :name)").unwrap();
        cmd.bind_named(":id", &1i64).unwrap();
        cmd.bind_named(":name", "alice").unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT name FROM t WHERE id = 1").unwrap();
        assert_eq!(query.fetchone().unwrap().get::<String>(0).unwrap(), "alice");
    }

    #[test]
    fn test_bind_named_unknown() {
        let conn = test_db();
        let mut cmd = Command::new(&conn, "INSERT INTO t (id) VALUES (:id)").unwrap();
        let err = cmd.bind_named(":missing", &1i64).unwrap_err();
        assert_eq!(err.code(), Some(ffi::SQLITE_MISUSE));
    }

    #[test]
    fn test_u64_round_trip() {
        let conn = test_db();
        conn.execute("CREATE TABLE u (v INTEGER)").unwrap();
        let big = u64::MAX - 41;
        let mut cmd = Command::new(&conn, "INSERT INTO u (v) VALUES (?)").unwrap();
        cmd.bind(1, &big).unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT v FROM u").unwrap();
        let row = query.fetchone().unwrap();
        // Stored as the i64 bit pattern: negative through i64, intact
        // through u64.
        assert_eq!(row.get::<u64>(0).unwrap(), big);
        assert!(row.get::<i64>(0).unwrap() < 0);
    }

    #[test]
    fn test_option_and_null() {
        let conn = test_db();
        let mut cmd = Command::new(&conn, "INSERT INTO t (id, name, data) VALUES (?, ?, ?)")
            .unwrap();
        cmd.bind(1, &1i64).unwrap();
        cmd.bind(2, &None::<String>).unwrap();
        cmd.bind(3, &Null).unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT name, data FROM t").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(
            row.column_type(0).unwrap(),
            crate::query::ColumnType::Null
        );
        assert_eq!(
            row.column_type(1).unwrap(),
            crate::query::ColumnType::Null
        );
    }

    #[test]
    fn test_scalar_round_trips() {
        let conn = test_db();
        conn.execute("CREATE TABLE s (flag INTEGER, small INTEGER, wide INTEGER)")
            .unwrap();
        let mut cmd = Command::new(&conn, "INSERT INTO s VALUES (?, ?, ?)").unwrap();
        cmd.bind(1, &true).unwrap();
        cmd.bind(2, &i32::MIN).unwrap();
        cmd.bind(3, &u32::MAX).unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT flag, small, wide FROM s").unwrap();
        let row = query.fetchone().unwrap();
        assert!(row.get::<bool>(0).unwrap());
        assert_eq!(row.get::<i32>(1).unwrap(), i32::MIN);
        assert_eq!(row.get::<u32>(2).unwrap(), u32::MAX);
    }

    #[test]
    fn test_static_blob() {
        let conn = test_db();
        static BYTES: [u8; 4] = [9, 8, 7, 6];
        let mut cmd = Command::new(&conn, "INSERT INTO t (id, data) VALUES (1, ?)").unwrap();
        cmd.bind(1, &StaticBlob(&BYTES)).unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT data FROM t").unwrap();
        assert_eq!(query.fetchone().unwrap().get::<Vec<u8>>(0).unwrap(), BYTES);
    }

    #[test]
    fn test_unbound_skips_parameter() {
        let conn = test_db();
        let mut cmd =
            Command::new(&conn, "INSERT INTO t (id, name, score) VALUES (?, ?, ?)").unwrap();
        // The middle position is left at its unbound NULL default while the
        // chain index still advances past it.
        cmd.binder(1)
            .push(&1i64)
            .push(&Unbound)
            .push(&3.5f64)
            .finish()
            .unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT name, score FROM t").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(row.column_type(0).unwrap(), crate::query::ColumnType::Null);
        assert!((row.get::<f64>(1).unwrap() - 3.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_static_text() {
        let conn = test_db();
        let mut cmd = Command::new(&conn, "INSERT INTO t (id, name) VALUES (1, ?)").unwrap();
        cmd.bind(1, &StaticStr("fixed")).unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT name FROM t").unwrap();
        assert_eq!(query.fetchone().unwrap().get::<String>(0).unwrap(), "fixed");
    }

    #[test]
    fn test_reset_keeps_bindings() {
        let conn = test_db();
        let mut cmd = Command::new(&conn, "INSERT INTO t (id, name) VALUES (?, 'x')").unwrap();
        cmd.bind(1, &1i64).unwrap();
        cmd.execute().unwrap();
        cmd.reset().unwrap();
        // Re-running without rebinding hits the primary key.
        let err = cmd.execute().unwrap_err();
        assert_eq!(err.code(), Some(ffi::SQLITE_CONSTRAINT));
    }

    #[test]
    fn test_clear_bindings() {
        let conn = test_db();
        let mut cmd = Command::new(&conn, "INSERT INTO t (id, name) VALUES (?, ?)").unwrap();
        cmd.bind(1, &1i64).unwrap();
        cmd.bind(2, "a").unwrap();
        cmd.execute().unwrap();
        cmd.reset().unwrap();
        cmd.clear_bindings().unwrap();
        cmd.bind(1, &2i64).unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT name FROM t WHERE id = 2").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(row.column_type(0).unwrap(), crate::query::ColumnType::Null);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let conn = test_db();
        let mut cmd = Command::new(&conn, "INSERT INTO t (id) VALUES (1)").unwrap();
        cmd.finish().unwrap();
        cmd.finish().unwrap();
        let err = cmd.bind(1, &1i64).unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn test_binder_chain() {
        let conn = test_db();
        let mut cmd =
            Command::new(&conn, "INSERT INTO t (id, name, score) VALUES (?, ?, ?)").unwrap();
        cmd.binder(1).push(&5i64).push("bob").push(&1.5f64).finish().unwrap();
        cmd.execute().unwrap();

        let mut query = Query::new(&conn, "SELECT id, name, score FROM t").unwrap();
        let row = query.fetchone().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 5);
        assert_eq!(row.get::<String>(1).unwrap(), "bob");
    }

    #[test]
    fn test_binder_short_circuits() {
        let conn = test_db();
        let mut cmd = Command::new(&conn, "INSERT INTO t (id) VALUES (?)").unwrap();
        // Index 2 is out of range; the error is recorded and the chain
        // reports it at the end.
        let err = cmd.binder(2).push(&1i64).push(&2i64).finish().unwrap_err();
        assert_eq!(err.code(), Some(ffi::SQLITE_RANGE));
    }

    #[test]
    fn test_execute_rejects_rows() {
        let conn = test_db();
        conn.execute("INSERT INTO t (id) VALUES (1)").unwrap();
        let mut cmd = Command::new(&conn, "SELECT id FROM t").unwrap();
        let err = cmd.execute().unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn test_execute_all() {
        let conn = test_db();
        let mut cmd = Command::new(
            &conn,
            "INSERT INTO t (id) VALUES (1);
             INSERT INTO t (id) VALUES (2);
             INSERT INTO t (id) VALUES (3);",
        )
        .unwrap();
        cmd.execute_all().unwrap();

        let mut query = Query::new(&conn, "SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(query.fetchone().unwrap().get::<i64>(0).unwrap(), 3);
    }

    #[test]
    fn test_execute_all_stops_on_error() {
        let conn = test_db();
        let mut cmd = Command::new(
            &conn,
            "INSERT INTO t (id) VALUES (1);
             INSERT INTO t (id) VALUES (1);
             INSERT INTO t (id) VALUES (2);",
        )
        .unwrap();
        let err = cmd.execute_all().unwrap_err();
        assert_eq!(err.code(), Some(ffi::SQLITE_CONSTRAINT));

        let mut query = Query::new(&conn, "SELECT COUNT(*) FROM t").unwrap();
        assert_eq!(query.fetchone().unwrap().get::<i64>(0).unwrap(), 1);
    }

    #[test]
    fn test_unprepared_then_prepare() {
        let conn = test_db();
        let mut cmd = Command::unprepared(&conn).unwrap();
        let err = cmd.execute().unwrap_err();
        assert!(matches!(err, Error::State(_)));
        cmd.prepare("INSERT INTO t (id) VALUES (9)").unwrap();
        cmd.execute().unwrap();
        assert_eq!(conn.changes(), 1);
    }

    #[test]
    fn test_parameter_count_and_sql() {
        let conn = test_db();
        let cmd = Command::new(&conn, "INSERT INTO t (id, name) VALUES (?, ?)").unwrap();
        assert_eq!(cmd.parameter_count(), 2);
        assert_eq!(cmd.sql(), "INSERT INTO t (id, name) VALUES (?, ?)");
    }
}
