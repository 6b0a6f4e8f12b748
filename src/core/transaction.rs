//! Broker-side transaction object and the callback hooks it drives.
//!
//! Storage components attach themselves to a [`Transaction`] as keyed
//! callbacks. The transaction owns the lifecycle
//! `Active -> Prepared -> {Committed | RolledBack}` and invokes the hooks of
//! every registered callback in registration order.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StoreError};

/// Internal transaction identity.
pub type TransactionId = i64;

/// XA transaction branch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xid {
    pub format_id: i32,
    pub global_transaction_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl Xid {
    pub fn new(
        format_id: i32,
        global_transaction_id: impl Into<Vec<u8>>,
        branch_qualifier: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            format_id,
            global_transaction_id: global_transaction_id.into(),
            branch_qualifier: branch_qualifier.into(),
        }
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.format_id,
            hex::encode(&self.global_transaction_id),
            hex::encode(&self.branch_qualifier)
        )
    }
}

/// A transaction that reached `Prepared` and still has a durable record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedTransaction {
    pub transaction_id: TransactionId,
    pub xid: Xid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Active,
    Prepared,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Prepared => "prepared",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

/// Hooks invoked by a [`Transaction`] around each protocol step.
///
/// `one_phase` is true when commit or rollback happens without a prior
/// prepare.
pub trait TxCallback: Send + Sync {
    fn before_prepare(&self) -> Result<()>;
    fn before_commit(&self, one_phase: bool) -> Result<()>;
    fn before_rollback(&self, one_phase: bool) -> Result<()>;

    fn after_prepare(&self) -> Result<()> {
        Ok(())
    }

    fn after_commit(&self, _one_phase: bool) -> Result<()> {
        Ok(())
    }

    fn after_rollback(&self, _one_phase: bool) -> Result<()> {
        Ok(())
    }
}

/// Broker transaction carrying registered callbacks.
pub struct Transaction {
    id: TransactionId,
    xid: Option<Xid>,
    state: TxState,
    callbacks: Vec<Arc<dyn TxCallback>>,
    keyed: HashMap<&'static str, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("xid", &self.xid)
            .field("state", &self.state)
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    /// Local transaction; it can only complete in one phase.
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            xid: None,
            state: TxState::Active,
            callbacks: Vec::new(),
            keyed: HashMap::new(),
        }
    }

    /// XA transaction branch.
    pub fn with_xid(id: TransactionId, xid: Xid) -> Self {
        Self {
            xid: Some(xid),
            ..Self::new(id)
        }
    }

    /// Transaction reloaded after a restart, already prepared.
    pub fn recovered(id: TransactionId, xid: Xid) -> Self {
        Self {
            state: TxState::Prepared,
            ..Self::with_xid(id, xid)
        }
    }

    pub const fn id(&self) -> TransactionId {
        self.id
    }

    pub const fn xid(&self) -> Option<&Xid> {
        self.xid.as_ref()
    }

    pub const fn state(&self) -> TxState {
        self.state
    }

    /// Register an unkeyed callback.
    pub fn add_callback(&mut self, callback: Arc<dyn TxCallback>) {
        self.callbacks.push(callback);
    }

    /// Fetch the callback registered under `key`, creating it on first use.
    pub fn keyed_callback<C, F>(&mut self, key: &'static str, make: F) -> Result<Arc<C>>
    where
        C: TxCallback + 'static,
        F: FnOnce(&Self) -> C,
    {
        if let Some(existing) = self.keyed.get(key) {
            return Arc::clone(existing).downcast::<C>().map_err(|_| {
                StoreError::InvalidArgument(format!(
                    "callback registered under '{key}' has a different type"
                ))
            });
        }

        let callback = Arc::new(make(self));
        self.keyed
            .insert(key, Arc::clone(&callback) as Arc<dyn Any + Send + Sync>);
        self.callbacks
            .push(Arc::clone(&callback) as Arc<dyn TxCallback>);
        Ok(callback)
    }

    /// Callback previously registered under `key`, if any.
    pub fn find_callback<C>(&self, key: &str) -> Option<Arc<C>>
    where
        C: TxCallback + 'static,
    {
        self.keyed
            .get(key)
            .and_then(|existing| Arc::clone(existing).downcast::<C>().ok())
    }

    pub fn prepare(&mut self) -> Result<()> {
        self.require(TxState::Active, "prepare")?;
        debug!(tx = self.id, "preparing transaction");
        for callback in &self.callbacks {
            callback.before_prepare()?;
        }
        self.state = TxState::Prepared;
        for callback in &self.callbacks {
            callback.after_prepare()?;
        }
        Ok(())
    }

    /// Commit in one phase from `Active`, or in two phases from `Prepared`.
    pub fn commit(&mut self) -> Result<()> {
        let one_phase = self.phase_for("commit")?;
        debug!(tx = self.id, one_phase, "committing transaction");
        for callback in &self.callbacks {
            callback.before_commit(one_phase)?;
        }
        self.state = TxState::Committed;
        for callback in &self.callbacks {
            callback.after_commit(one_phase)?;
        }
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        let one_phase = self.phase_for("rollback")?;
        debug!(tx = self.id, one_phase, "rolling back transaction");
        for callback in &self.callbacks {
            callback.before_rollback(one_phase)?;
        }
        self.state = TxState::RolledBack;
        for callback in &self.callbacks {
            callback.after_rollback(one_phase)?;
        }
        Ok(())
    }

    fn phase_for(&self, action: &str) -> Result<bool> {
        match self.state {
            TxState::Active => Ok(true),
            TxState::Prepared => Ok(false),
            _ => Err(self.invalid(action)),
        }
    }

    fn require(&self, expected: TxState, action: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(self.invalid(action))
        }
    }

    fn invalid(&self, action: &str) -> StoreError {
        StoreError::InvalidTransactionState {
            id: self.id,
            state: self.state.to_string(),
            action: action.to_string(),
        }
    }
}
