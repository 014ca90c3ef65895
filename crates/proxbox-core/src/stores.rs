//! Shared access to the two backing files
//!
//! Registration is a read-modify-write over both files, so it holds the
//! write guard for its whole run. Readers (authentication, audits) share the
//! read guard and never observe a registration half way through.

use crate::key_registry::KeyRegistry;
use crate::rule_store::RuleStore;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// The key registry and rule store behind one process-wide lock
#[derive(Debug)]
pub struct Stores {
    keys: KeyRegistry,
    rules: RuleStore,
    lock: RwLock<()>,
}

impl Stores {
    /// Bundle the two repositories
    pub fn new(keys: KeyRegistry, rules: RuleStore) -> Self {
        Self {
            keys,
            rules,
            lock: RwLock::new(()),
        }
    }

    /// The access-control file
    pub fn keys(&self) -> &KeyRegistry {
        &self.keys
    }

    /// The rule file
    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    /// Shared guard for read-only operations
    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().await
    }

    /// Exclusive guard for registrations
    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().await
    }
}
