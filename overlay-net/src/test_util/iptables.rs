//! In-memory firewall tables.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::netout::{IptablesAdapter, IptablesError, IptablesRule};

const BUILTIN_CHAINS: [&str; 3] = ["INPUT", "FORWARD", "OUTPUT"];
const BUILTIN_TARGETS: [&str; 5] = ["ACCEPT", "DROP", "REJECT", "RETURN", "LOG"];

struct Failure {
    op: &'static str,
    chain: Option<String>,
    message: String,
}

#[derive(Default)]
struct State {
    chains: BTreeMap<(String, String), Vec<IptablesRule>>,
    failures: Vec<Failure>,
    calls: Vec<String>,
}

/// Stateful firewall fake with the kernel's referential checks: rules may
/// only target built-ins or existing chains, and a chain can only be
/// deleted once it is empty and nothing jumps to it.
///
/// The `filter` table starts with `INPUT`, `FORWARD` and `OUTPUT`.
pub struct FakeIptables {
    state: Mutex<State>,
}

impl Default for FakeIptables {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIptables {
    pub fn new() -> Self {
        let mut state = State::default();
        for chain in BUILTIN_CHAINS {
            state
                .chains
                .insert(("filter".to_string(), chain.to_string()), Vec::new());
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Make every call of `op` (the trait method name) fail with `message`.
    pub fn fail(&self, op: &'static str, message: &str) {
        self.lock().failures.push(Failure {
            op,
            chain: None,
            message: message.to_string(),
        });
    }

    /// Make calls of `op` against `chain` fail with `message`.
    pub fn fail_on_chain(&self, op: &'static str, chain: &str, message: &str) {
        self.lock().failures.push(Failure {
            op,
            chain: Some(chain.to_string()),
            message: message.to_string(),
        });
    }

    /// Seed a chain with rules, creating it if needed.
    pub fn seed(&self, table: &str, chain: &str, rules: Vec<IptablesRule>) {
        self.lock()
            .chains
            .insert((table.to_string(), chain.to_string()), rules);
    }

    /// Rules of a chain, or `None` when it does not exist.
    pub fn rules(&self, table: &str, chain: &str) -> Option<Vec<IptablesRule>> {
        self.lock()
            .chains
            .get(&(table.to_string(), chain.to_string()))
            .cloned()
    }

    /// User-defined chains of a table, sorted.
    pub fn user_chains(&self, table: &str) -> Vec<String> {
        self.lock()
            .chains
            .keys()
            .filter(|(t, c)| t == table && !BUILTIN_CHAINS.contains(&c.as_str()))
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Every call so far, as `"<op> <table> <chain>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn enter(
        &self,
        op: &'static str,
        table: &str,
        chain: &str,
    ) -> Result<MutexGuard<'_, State>, IptablesError> {
        let mut state = self.lock();
        state.calls.push(format!("{op} {table} {chain}"));
        let failure = state
            .failures
            .iter()
            .find(|f| f.op == op && f.chain.as_deref().is_none_or(|c| c == chain));
        if let Some(failure) = failure {
            return Err(IptablesError::new(failure.message.clone()));
        }
        Ok(state)
    }
}

fn key(table: &str, chain: &str) -> (String, String) {
    (table.to_string(), chain.to_string())
}

fn no_chain(chain: &str) -> IptablesError {
    IptablesError::new(format!(
        "iptables: No chain/target/match by that name. ({chain})"
    ))
}

fn check_targets(state: &State, table: &str, rules: &[IptablesRule]) -> Result<(), IptablesError> {
    for rule in rules {
        if let Some(target) = rule.target()
            && !BUILTIN_TARGETS.contains(&target)
            && !state.chains.contains_key(&key(table, target))
        {
            return Err(no_chain(target));
        }
    }
    Ok(())
}

impl IptablesAdapter for FakeIptables {
    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool, IptablesError> {
        let state = self.enter("chain_exists", table, chain)?;
        Ok(state.chains.contains_key(&key(table, chain)))
    }

    fn new_chain(&self, table: &str, chain: &str) -> Result<(), IptablesError> {
        let mut state = self.enter("new_chain", table, chain)?;
        state.chains.entry(key(table, chain)).or_default();
        Ok(())
    }

    fn rule_exists(
        &self,
        table: &str,
        chain: &str,
        rule: &IptablesRule,
    ) -> Result<bool, IptablesError> {
        let state = self.enter("rule_exists", table, chain)?;
        let rules = state.chains.get(&key(table, chain)).ok_or_else(|| no_chain(chain))?;
        Ok(rules.contains(rule))
    }

    fn bulk_insert(
        &self,
        table: &str,
        chain: &str,
        position: u32,
        rules: &[IptablesRule],
    ) -> Result<(), IptablesError> {
        let mut state = self.enter("bulk_insert", table, chain)?;
        check_targets(&state, table, rules)?;
        let existing = state
            .chains
            .get_mut(&key(table, chain))
            .ok_or_else(|| no_chain(chain))?;
        let at = (position as usize).saturating_sub(1);
        if position == 0 || at > existing.len() {
            return Err(IptablesError::new("iptables: Index of insertion too big."));
        }
        existing.splice(at..at, rules.iter().cloned());
        Ok(())
    }

    fn bulk_append(
        &self,
        table: &str,
        chain: &str,
        rules: &[IptablesRule],
    ) -> Result<(), IptablesError> {
        let mut state = self.enter("bulk_append", table, chain)?;
        check_targets(&state, table, rules)?;
        state
            .chains
            .get_mut(&key(table, chain))
            .ok_or_else(|| no_chain(chain))?
            .extend(rules.iter().cloned());
        Ok(())
    }

    fn delete(&self, table: &str, chain: &str, rule: &IptablesRule) -> Result<(), IptablesError> {
        let mut state = self.enter("delete", table, chain)?;
        let rules = state
            .chains
            .get_mut(&key(table, chain))
            .ok_or_else(|| no_chain(chain))?;
        let index = rules
            .iter()
            .position(|r| r == rule)
            .ok_or_else(|| IptablesError::new("iptables: Bad rule (does a matching rule exist in that chain?)."))?;
        rules.remove(index);
        Ok(())
    }

    fn clear_chain(&self, table: &str, chain: &str) -> Result<(), IptablesError> {
        let mut state = self.enter("clear_chain", table, chain)?;
        state
            .chains
            .get_mut(&key(table, chain))
            .ok_or_else(|| no_chain(chain))?
            .clear();
        Ok(())
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<(), IptablesError> {
        let mut state = self.enter("delete_chain", table, chain)?;
        let rules = state
            .chains
            .get(&key(table, chain))
            .ok_or_else(|| no_chain(chain))?;
        if !rules.is_empty() {
            return Err(IptablesError::new(format!(
                "iptables: Directory not empty. ({chain})"
            )));
        }
        let referenced = state
            .chains
            .iter()
            .filter(|((t, _), _)| t == table)
            .flat_map(|(_, rules)| rules)
            .any(|r| r.target() == Some(chain));
        if referenced {
            return Err(IptablesError::new(format!(
                "iptables: Too many links. ({chain})"
            )));
        }
        state.chains.remove(&key(table, chain));
        Ok(())
    }
}
