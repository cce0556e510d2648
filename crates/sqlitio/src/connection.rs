//! Database connections.
//!
//! [`Connection`] owns an SQLite database handle and is the entry point for
//! everything else: statements and queries borrow the connection, so the
//! borrow checker keeps the handle alive while they exist. A connection can
//! move between threads but cannot be shared across them.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::path::Path;
use std::ptr;

use crate::error::{Error, Result};
use crate::ffi;
use crate::query::Query;
use crate::statement::Command;
use crate::transaction::{Transaction, TransactionBehavior};

/// How to open a database file.
///
/// The default opens read-write and creates the file when missing, which
/// matches the engine's own default.
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    pub read_only: bool,
    pub read_write: bool,
    pub create: bool,
    pub uri: bool,
    pub memory: bool,
    pub no_mutex: bool,
    pub full_mutex: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        OpenFlags {
            read_only: false,
            read_write: true,
            create: true,
            uri: false,
            memory: false,
            no_mutex: false,
            full_mutex: false,
        }
    }
}

impl OpenFlags {
    fn to_engine_flags(self) -> c_int {
        let mut flags = 0;
        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.memory {
            flags |= ffi::SQLITE_OPEN_MEMORY;
        }
        if self.no_mutex {
            flags |= ffi::SQLITE_OPEN_NOMUTEX;
        }
        if self.full_mutex {
            flags |= ffi::SQLITE_OPEN_FULLMUTEX;
        }
        flags
    }
}

/// The write operation reported to an update hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    fn from_code(code: c_int) -> Option<Self> {
        match code {
            ffi::SQLITE_INSERT => Some(Action::Insert),
            ffi::SQLITE_UPDATE => Some(Action::Update),
            ffi::SQLITE_DELETE => Some(Action::Delete),
            _ => None,
        }
    }
}

/// Verdict an authorizer returns for an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    /// Let the action proceed.
    Allow,
    /// Fail statement compilation with an authorization error.
    Deny,
    /// Compile the statement, substituting NULL for the guarded value.
    Ignore,
}

impl Authorization {
    fn into_code(self) -> c_int {
        match self {
            Authorization::Allow => ffi::SQLITE_OK,
            Authorization::Deny => ffi::SQLITE_DENY,
            Authorization::Ignore => ffi::SQLITE_IGNORE,
        }
    }
}

/// What an authorizer callback is being asked about.
///
/// The meaning of `arg1` and `arg2` depends on `action_code`; for the
/// common table operations they are the table and column names. Strings
/// that are absent or not valid UTF-8 come through as `None`.
#[derive(Debug)]
pub struct AuthContext<'a> {
    /// The raw action code, such as `SQLITE_INSERT`.
    pub action_code: c_int,
    pub arg1: Option<&'a str>,
    pub arg2: Option<&'a str>,
    /// The database name, usually `main` or `temp`.
    pub database: Option<&'a str>,
    /// The trigger or view responsible, when the action is indirect.
    pub accessor: Option<&'a str>,
}

type BusyCallback = Box<dyn FnMut(i32) -> bool + Send>;
type CommitCallback = Box<dyn FnMut() -> bool + Send>;
type RollbackCallback = Box<dyn FnMut() + Send>;
type UpdateCallback = Box<dyn FnMut(Action, &str, &str, i64) + Send>;
type AuthorizerCallback = Box<dyn FnMut(&AuthContext<'_>) -> Authorization + Send>;

/// Registered hook closures.
///
/// Each slot holds a second Box so the pointer handed to the engine is a
/// thin pointer into a stable heap cell, unaffected by the `Connection`
/// itself moving.
#[derive(Default)]
struct HookSlots {
    busy: Option<Box<BusyCallback>>,
    commit: Option<Box<CommitCallback>>,
    rollback: Option<Box<RollbackCallback>>,
    update: Option<Box<UpdateCallback>>,
    authorizer: Option<Box<AuthorizerCallback>>,
}

unsafe extern "C" fn busy_trampoline(arg: *mut c_void, count: c_int) -> c_int {
    // SAFETY: arg is the pointer registered in set_busy_handler and stays
    // valid until the handler is replaced or cleared.
    let handler = unsafe { &mut *arg.cast::<BusyCallback>() };
    c_int::from(handler(count))
}

unsafe extern "C" fn commit_trampoline(arg: *mut c_void) -> c_int {
    // SAFETY: arg is the pointer registered in set_commit_hook.
    let handler = unsafe { &mut *arg.cast::<CommitCallback>() };
    c_int::from(handler())
}

unsafe extern "C" fn rollback_trampoline(arg: *mut c_void) {
    // SAFETY: arg is the pointer registered in set_rollback_hook.
    let handler = unsafe { &mut *arg.cast::<RollbackCallback>() };
    handler();
}

unsafe extern "C" fn update_trampoline(
    arg: *mut c_void,
    action: c_int,
    database: *const c_char,
    table: *const c_char,
    rowid: i64,
) {
    let Some(action) = Action::from_code(action) else {
        return;
    };
    // SAFETY: arg is the pointer registered in set_update_hook; the name
    // pointers are NUL-terminated strings owned by the engine for the
    // duration of the call.
    unsafe {
        let handler = &mut *arg.cast::<UpdateCallback>();
        let database = CStr::from_ptr(database).to_str().unwrap_or_default();
        let table = CStr::from_ptr(table).to_str().unwrap_or_default();
        handler(action, database, table, rowid);
    }
}

unsafe extern "C" fn authorizer_trampoline(
    arg: *mut c_void,
    action_code: c_int,
    arg1: *const c_char,
    arg2: *const c_char,
    database: *const c_char,
    accessor: *const c_char,
) -> c_int {
    unsafe fn opt_str<'a>(ptr: *const c_char) -> Option<&'a str> {
        if ptr.is_null() {
            None
        } else {
            // SAFETY: non-null pointers from the engine are NUL terminated
            // and live for the duration of the callback.
            unsafe { CStr::from_ptr(ptr).to_str().ok() }
        }
    }
    // SAFETY: arg is the pointer registered in set_authorizer.
    unsafe {
        let handler = &mut *arg.cast::<AuthorizerCallback>();
        let context = AuthContext {
            action_code,
            arg1: opt_str(arg1),
            arg2: opt_str(arg2),
            database: opt_str(database),
            accessor: opt_str(accessor),
        };
        handler(&context).into_code()
    }
}

/// An open database connection.
pub struct Connection {
    db: *mut ffi::sqlite3,
    hooks: HookSlots,
}

// The handle is opened in serialized or multi-thread mode and all access
// goes through &mut or a single owner, so moving it between threads is
// sound. Sharing is not: Connection is deliberately !Sync.
unsafe impl Send for Connection {}

impl Connection {
    /// Open a database file, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_flags(path, OpenFlags::default())
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_with_flags(":memory:", OpenFlags::default())
    }

    /// Open a database with explicit flags.
    pub fn open_with_flags<P: AsRef<Path>>(path: P, flags: OpenFlags) -> Result<Self> {
        let path = path.as_ref();
        let c_path = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| Error::misuse("database path contains an interior NUL byte"))?;
        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        // SAFETY: c_path is NUL terminated and db is a valid out parameter.
        let rc = unsafe {
            ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags.to_engine_flags(), ptr::null())
        };
        if rc != ffi::SQLITE_OK {
            // A handle is usually allocated even on failure; read the
            // message off it, then release it.
            let err = Error::engine(db, rc);
            if !db.is_null() {
                // SAFETY: sqlite3_close accepts any handle returned by
                // open_v2; a failed open has no statements on it.
                unsafe {
                    ffi::sqlite3_close(db);
                }
            }
            return Err(err);
        }
        tracing::debug!(path = %path.display(), "opened database");
        Ok(Connection {
            db,
            hooks: HookSlots::default(),
        })
    }

    pub(crate) fn check(&self, rc: c_int) -> Result<()> {
        if rc == ffi::SQLITE_OK {
            Ok(())
        } else {
            Err(Error::engine(self.db, rc))
        }
    }

    /// Prepare a write command.
    pub fn command(&self, sql: &str) -> Result<Command<'_>> {
        Command::new(self, sql)
    }

    /// Prepare a row-returning query.
    pub fn query(&self, sql: &str) -> Result<Query<'_>> {
        Query::new(self, sql)
    }

    /// Prepare and run a single statement that returns no rows.
    pub fn execute(&self, sql: &str) -> Result<()> {
        self.command(sql)?.execute()
    }

    /// Run every statement in `sql`, stopping at the first failure.
    ///
    /// Results, if any statement produces them, are discarded.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let c_sql = CString::new(sql)
            .map_err(|_| Error::misuse("SQL text contains an interior NUL byte"))?;
        let mut errmsg: *mut c_char = ptr::null_mut();
        // SAFETY: the handle is valid, c_sql is NUL terminated, and the
        // error message allocated by the engine is freed below.
        let rc = unsafe {
            ffi::sqlite3_exec(
                self.db,
                c_sql.as_ptr(),
                None,
                ptr::null_mut(),
                &mut errmsg,
            )
        };
        if rc != ffi::SQLITE_OK {
            let message = if errmsg.is_null() {
                ffi::error_string(rc).to_owned()
            } else {
                // SAFETY: errmsg is a NUL-terminated string allocated by
                // sqlite3_malloc.
                unsafe {
                    let message = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                    ffi::sqlite3_free(errmsg.cast());
                    message
                }
            };
            return Err(crate::error::EngineError { code: rc, message }.into());
        }
        Ok(())
    }

    /// Attach the database file at `path` under schema name `name`.
    pub fn attach(&self, path: &str, name: &str) -> Result<()> {
        let mut cmd = self.command("ATTACH DATABASE ?1 AS ?2")?;
        cmd.bind(1, path)?;
        cmd.bind(2, name)?;
        cmd.execute()
    }

    /// Detach the schema named `name`.
    pub fn detach(&self, name: &str) -> Result<()> {
        let mut cmd = self.command("DETACH DATABASE ?1")?;
        cmd.bind(1, name)?;
        cmd.execute()
    }

    /// Begin a deferred transaction that rolls back on drop.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        Transaction::new(self, TransactionBehavior::Deferred, false)
    }

    /// Begin a transaction with explicit locking behavior and drop policy.
    ///
    /// With `commit_on_drop` set, dropping the transaction commits instead
    /// of rolling back.
    pub fn transaction_with(
        &self,
        behavior: TransactionBehavior,
        commit_on_drop: bool,
    ) -> Result<Transaction<'_>> {
        Transaction::new(self, behavior, commit_on_drop)
    }

    /// The rowid of the most recent successful insert.
    pub fn last_insert_rowid(&self) -> i64 {
        // SAFETY: the handle is valid.
        unsafe { ffi::sqlite3_last_insert_rowid(self.db) }
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> i32 {
        // SAFETY: the handle is valid.
        unsafe { ffi::sqlite3_changes(self.db) }
    }

    /// Rows changed since the connection opened.
    pub fn total_changes(&self) -> i32 {
        // SAFETY: the handle is valid.
        unsafe { ffi::sqlite3_total_changes(self.db) }
    }

    /// The result code of the most recent failed call on this connection.
    pub fn error_code(&self) -> i32 {
        // SAFETY: the handle is valid.
        unsafe { ffi::sqlite3_errcode(self.db) }
    }

    /// The message text of the most recent failure on this connection.
    pub fn error_message(&self) -> String {
        // SAFETY: the handle is valid and errmsg never returns null for a
        // live connection.
        unsafe {
            CStr::from_ptr(ffi::sqlite3_errmsg(self.db))
                .to_string_lossy()
                .into_owned()
        }
    }

    /// Install the engine's built-in busy handler with the given timeout.
    ///
    /// Replaces any handler set with
    /// [`set_busy_handler`](Connection::set_busy_handler).
    pub fn set_busy_timeout(&mut self, milliseconds: i32) -> Result<()> {
        self.hooks.busy = None;
        // SAFETY: the handle is valid.
        let rc = unsafe { ffi::sqlite3_busy_timeout(self.db, milliseconds) };
        self.check(rc)
    }

    /// Install a busy handler.
    ///
    /// The closure receives the number of times the current operation has
    /// been blocked and returns whether to keep waiting; returning `false`
    /// makes the blocked operation fail as busy.
    pub fn set_busy_handler<F>(&mut self, handler: F) -> Result<()>
    where
        F: FnMut(i32) -> bool + Send + 'static,
    {
        let mut boxed: Box<BusyCallback> = Box::new(Box::new(handler));
        let arg = ptr::from_mut::<BusyCallback>(&mut *boxed).cast::<c_void>();
        // SAFETY: the handle is valid and arg outlives the registration
        // because the box is stored in self.hooks.
        let rc = unsafe { ffi::sqlite3_busy_handler(self.db, Some(busy_trampoline), arg) };
        self.check(rc)?;
        self.hooks.busy = Some(boxed);
        Ok(())
    }

    /// Remove any busy handler or timeout.
    pub fn clear_busy_handler(&mut self) -> Result<()> {
        // SAFETY: the handle is valid; a None callback unregisters.
        let rc = unsafe { ffi::sqlite3_busy_handler(self.db, None, ptr::null_mut()) };
        self.check(rc)?;
        self.hooks.busy = None;
        Ok(())
    }

    /// Install a commit hook.
    ///
    /// Returning `true` from the closure aborts the commit, turning it
    /// into a rollback.
    pub fn set_commit_hook<F>(&mut self, handler: F)
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let mut boxed: Box<CommitCallback> = Box::new(Box::new(handler));
        let arg = ptr::from_mut::<CommitCallback>(&mut *boxed).cast::<c_void>();
        // SAFETY: the handle is valid and arg outlives the registration.
        unsafe {
            ffi::sqlite3_commit_hook(self.db, Some(commit_trampoline), arg);
        }
        self.hooks.commit = Some(boxed);
    }

    /// Remove the commit hook.
    pub fn clear_commit_hook(&mut self) {
        // SAFETY: the handle is valid.
        unsafe {
            ffi::sqlite3_commit_hook(self.db, None, ptr::null_mut());
        }
        self.hooks.commit = None;
    }

    /// Install a rollback hook.
    pub fn set_rollback_hook<F>(&mut self, handler: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut boxed: Box<RollbackCallback> = Box::new(Box::new(handler));
        let arg = ptr::from_mut::<RollbackCallback>(&mut *boxed).cast::<c_void>();
        // SAFETY: the handle is valid and arg outlives the registration.
        unsafe {
            ffi::sqlite3_rollback_hook(self.db, Some(rollback_trampoline), arg);
        }
        self.hooks.rollback = Some(boxed);
    }

    /// Remove the rollback hook.
    pub fn clear_rollback_hook(&mut self) {
        // SAFETY: the handle is valid.
        unsafe {
            ffi::sqlite3_rollback_hook(self.db, None, ptr::null_mut());
        }
        self.hooks.rollback = None;
    }

    /// Install an update hook, called after every row insert, update, or
    /// delete with the database name, table name, and rowid.
    pub fn set_update_hook<F>(&mut self, handler: F)
    where
        F: FnMut(Action, &str, &str, i64) + Send + 'static,
    {
        let mut boxed: Box<UpdateCallback> = Box::new(Box::new(handler));
        let arg = ptr::from_mut::<UpdateCallback>(&mut *boxed).cast::<c_void>();
        // SAFETY: the handle is valid and arg outlives the registration.
        unsafe {
            ffi::sqlite3_update_hook(self.db, Some(update_trampoline), arg);
        }
        self.hooks.update = Some(boxed);
    }

    /// Remove the update hook.
    pub fn clear_update_hook(&mut self) {
        // SAFETY: the handle is valid.
        unsafe {
            ffi::sqlite3_update_hook(self.db, None, ptr::null_mut());
        }
        self.hooks.update = None;
    }

    /// Install an authorizer, consulted during statement compilation.
    pub fn set_authorizer<F>(&mut self, handler: F) -> Result<()>
    where
        F: FnMut(&AuthContext<'_>) -> Authorization + Send + 'static,
    {
        let mut boxed: Box<AuthorizerCallback> = Box::new(Box::new(handler));
        let arg = ptr::from_mut::<AuthorizerCallback>(&mut *boxed).cast::<c_void>();
        // SAFETY: the handle is valid and arg outlives the registration.
        let rc = unsafe { ffi::sqlite3_set_authorizer(self.db, Some(authorizer_trampoline), arg) };
        self.check(rc)?;
        self.hooks.authorizer = Some(boxed);
        Ok(())
    }

    /// Remove the authorizer.
    pub fn clear_authorizer(&mut self) -> Result<()> {
        // SAFETY: the handle is valid.
        let rc = unsafe { ffi::sqlite3_set_authorizer(self.db, None, ptr::null_mut()) };
        self.check(rc)?;
        self.hooks.authorizer = None;
        Ok(())
    }

    /// The raw database handle, for interoperability with other SQLite
    /// bindings. The handle stays owned by this connection.
    pub fn as_ptr(&self) -> *mut ffi::sqlite3 {
        self.db
    }

    /// Close the connection, reporting failure when the engine refuses.
    ///
    /// Statements borrow the connection, so they are always finalized
    /// before this can be called; in practice the close succeeds.
    pub fn close(mut self) -> Result<()> {
        if self.db.is_null() {
            return Ok(());
        }
        // SAFETY: the handle is valid; on success it must not be used
        // again, which nulling the field guarantees.
        let rc = unsafe { ffi::sqlite3_close(self.db) };
        if rc == ffi::SQLITE_OK {
            self.db = ptr::null_mut();
            tracing::debug!("closed database");
            Ok(())
        } else {
            // Drop retries the close, ignoring the result.
            Err(Error::engine(self.db, rc))
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.db.is_null() {
            // SAFETY: the handle is valid and closed exactly once. Every
            // statement has already been finalized by its own drop, so the
            // engine accepts the close.
            unsafe {
                ffi::sqlite3_close(self.db);
            }
            self.db = ptr::null_mut();
            tracing::debug!("closed database");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("db", &self.db).finish()
    }
}
