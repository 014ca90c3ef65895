//! Port pair allocation
//!
//! No counter is persisted. The next pair is always derived from the ports
//! currently present in the rule table, so a hand-edited table is picked up
//! on the next allocation.

use crate::errors::{ProxboxError, Result};
use crate::rule_store::RuleTable;

/// Derives the next free port pair from the ports already leased
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortLedger {
    base_port: u16,
}

impl PortLedger {
    /// Create a ledger whose first allocation is `(base_port, base_port + 1)`
    pub fn new(base_port: u16) -> Self {
        Self { base_port }
    }

    /// First port handed out on an empty table
    pub fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Next contiguous pair above every port referenced by `table`
    ///
    /// Counts every backend port, including unmanaged backends and halves of
    /// incomplete leases. `table` must be the current, freshly loaded table.
    pub fn allocate_next(&self, table: &RuleTable) -> Result<(u16, u16)> {
        self.allocate_above(table.leased_ports())
    }

    /// Next contiguous pair above every port in `leased`
    pub fn allocate_above<I>(&self, leased: I) -> Result<(u16, u16)>
    where
        I: IntoIterator<Item = u16>,
    {
        let top = leased
            .into_iter()
            .max()
            .unwrap_or_else(|| self.base_port.saturating_sub(1));

        match (top.checked_add(1), top.checked_add(2)) {
            (Some(primary), Some(secondary)) => Ok((primary, secondary)),
            _ => Err(ProxboxError::PortsExhausted { highest: top }),
        }
    }
}
