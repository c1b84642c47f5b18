//! Firewall table adapter.
//!
//! [`IptablesAdapter`] is the seam between the chain builder and the kernel
//! tables. Production code uses [`SystemIptables`], backed by the `iptables`
//! crate; tests use the stateful fake in `test_util`.

use thiserror::Error;

use super::rules::IptablesRule;

/// Failure reported by the firewall tables, with the underlying text.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct IptablesError(pub String);

impl IptablesError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, IptablesError>;

/// Chain and rule operations on one address family's tables.
pub trait IptablesAdapter: Send + Sync {
    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool>;

    /// Create a chain. Creating a chain that already exists is not an error.
    fn new_chain(&self, table: &str, chain: &str) -> Result<()>;

    fn rule_exists(&self, table: &str, chain: &str, rule: &IptablesRule) -> Result<bool>;

    /// Insert `rules` in order, the first one landing at `position` (1-based).
    fn bulk_insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        rules: &[IptablesRule],
    ) -> Result<()>;

    fn bulk_append(&self, table: &str, chain: &str, rules: &[IptablesRule]) -> Result<()>;

    fn delete(&self, table: &str, chain: &str, rule: &IptablesRule) -> Result<()>;

    /// Remove every rule from a chain.
    fn clear_chain(&self, table: &str, chain: &str) -> Result<()>;

    fn delete_chain(&self, table: &str, chain: &str) -> Result<()>;
}

/// IPv4 tables driven through the `iptables` binary.
pub struct SystemIptables {
    inner: iptables::IPTables,
}

impl SystemIptables {
    pub fn new() -> Result<Self> {
        let inner = iptables::new(false).map_err(|e| IptablesError::new(e.to_string()))?;
        Ok(Self { inner })
    }
}

fn wrap(e: Box<dyn std::error::Error>) -> IptablesError {
    IptablesError::new(e.to_string())
}

impl IptablesAdapter for SystemIptables {
    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool> {
        self.inner.chain_exists(table, chain).map_err(wrap)
    }

    fn new_chain(&self, table: &str, chain: &str) -> Result<()> {
        if self.chain_exists(table, chain)? {
            return Ok(());
        }
        self.inner.new_chain(table, chain).map_err(wrap)
    }

    fn rule_exists(&self, table: &str, chain: &str, rule: &IptablesRule) -> Result<bool> {
        self.inner
            .exists(table, chain, &rule.to_rule_string())
            .map_err(wrap)
    }

    fn bulk_insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        rules: &[IptablesRule],
    ) -> Result<()> {
        for (offset, rule) in rules.iter().enumerate() {
            let at = position as i32 + offset as i32;
            self.inner
                .insert(table, chain, &rule.to_rule_string(), at)
                .map_err(wrap)?;
        }
        Ok(())
    }

    fn bulk_append(&self, table: &str, chain: &str, rules: &[IptablesRule]) -> Result<()> {
        for rule in rules {
            self.inner
                .append(table, chain, &rule.to_rule_string())
                .map_err(wrap)?;
        }
        Ok(())
    }

    fn delete(&self, table: &str, chain: &str, rule: &IptablesRule) -> Result<()> {
        self.inner
            .delete(table, chain, &rule.to_rule_string())
            .map_err(wrap)
    }

    fn clear_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.inner.flush_chain(table, chain).map_err(wrap)
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.inner.delete_chain(table, chain).map_err(wrap)
    }
}
