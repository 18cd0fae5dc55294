//! Loan lifecycle and credit-risk engine.
//!
//! Every state transition is an explicit method on [`LoanEngine`] that runs
//! inside a single IMMEDIATE transaction; there are no implicit post-save
//! hooks. In-app notification rows are written inside the transaction,
//! external delivery happens after commit and never rolls financial state
//! back.

pub mod application;
pub mod approval;
pub mod credit;
pub mod defaults;
pub mod disbursement;
mod error;
pub mod guarantee;
pub mod interest;
pub mod membership;
pub mod notify;
pub mod payments;
pub mod repayment;
pub mod schedule;

use std::sync::Arc;

use rusqlite::{Transaction, TransactionBehavior};

use sacco_db::Database;
use sacco_types::EngineConfig;

pub use error::{EngineError, EngineResult};
pub use notify::{LogSink, NotificationSink};

pub struct LoanEngine {
    pub(crate) db: Arc<Database>,
    pub(crate) config: EngineConfig,
    pub(crate) sink: Arc<dyn NotificationSink>,
}

impl LoanEngine {
    pub fn new(db: Arc<Database>, config: EngineConfig) -> Self {
        Self::with_sink(db, config, Arc::new(LogSink))
    }

    pub fn with_sink(
        db: Arc<Database>,
        config: EngineConfig,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self { db, config, sink }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Run `f` inside one IMMEDIATE transaction: committed on `Ok`, fully
    /// rolled back on any error. All multi-row financial mutations go
    /// through here.
    pub(crate) fn in_tx<T>(
        &self,
        f: impl FnOnce(&Transaction) -> EngineResult<T>,
    ) -> EngineResult<T> {
        self.db.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| EngineError::Storage(e.into()))?;
            let out = f(&tx)?;
            tx.commit().map_err(|e| EngineError::Storage(e.into()))?;
            Ok(out)
        })
    }
}
