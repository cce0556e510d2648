//! Scoped transactions.
//!
//! A [`Transaction`] begins when constructed and resolves exactly once:
//! explicitly through [`commit`](Transaction::commit) or
//! [`rollback`](Transaction::rollback), or implicitly on drop. The drop
//! path rolls back unless the transaction was built to commit on drop, and
//! never panics; a failure while finalizing is logged and swallowed.

use crate::connection::Connection;
use crate::error::Result;

/// Locking behavior of the opening `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionBehavior {
    /// Take locks lazily, on first use.
    #[default]
    Deferred,
    /// Take a reserved lock immediately.
    Immediate,
    /// Take an exclusive lock immediately.
    Exclusive,
}

impl TransactionBehavior {
    const fn begin_sql(self) -> &'static str {
        match self {
            TransactionBehavior::Deferred => "BEGIN",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// An open transaction on a connection.
pub struct Transaction<'conn> {
    conn: &'conn Connection,
    commit_on_drop: bool,
    completed: bool,
}

impl<'conn> Transaction<'conn> {
    pub(crate) fn new(
        conn: &'conn Connection,
        behavior: TransactionBehavior,
        commit_on_drop: bool,
    ) -> Result<Self> {
        conn.execute(behavior.begin_sql())?;
        Ok(Transaction {
            conn,
            commit_on_drop,
            completed: false,
        })
    }

    /// The connection this transaction runs on.
    pub fn connection(&self) -> &Connection {
        self.conn
    }

    /// Commit the transaction. A no-op if already resolved.
    pub fn commit(&mut self) -> Result<()> {
        if self.completed {
            return Ok(());
        }
        self.conn.execute("COMMIT")?;
        self.completed = true;
        Ok(())
    }

    /// Roll the transaction back. A no-op if already resolved.
    pub fn rollback(&mut self) -> Result<()> {
        if self.completed {
            return Ok(());
        }
        self.conn.execute("ROLLBACK")?;
        self.completed = true;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let sql = if self.commit_on_drop { "COMMIT" } else { "ROLLBACK" };
        if let Err(err) = self.conn.execute(sql) {
            tracing::warn!(%err, sql, "transaction finalization failed");
        }
    }
}
