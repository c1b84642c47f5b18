//! Chain specifications and their installation.

use tracing::debug;

use super::NetOutError;
use super::iptables::IptablesAdapter;
use super::rules::IptablesRule;

/// Ordered rule body whose last rule is always the chain's terminal
/// decision. Everything added goes in front of the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleBody {
    leading: Vec<IptablesRule>,
    terminal: IptablesRule,
}

impl RuleBody {
    pub fn new(terminal: IptablesRule) -> Self {
        Self {
            leading: Vec::new(),
            terminal,
        }
    }

    /// Builder form of [`RuleBody::insert_before_terminal`].
    pub fn with(mut self, rule: IptablesRule) -> Self {
        self.insert_before_terminal(rule);
        self
    }

    /// Splice `rule` directly ahead of the terminal rule.
    pub fn insert_before_terminal(&mut self, rule: IptablesRule) {
        self.leading.push(rule);
    }

    pub fn terminal(&self) -> &IptablesRule {
        &self.terminal
    }

    pub fn len(&self) -> usize {
        self.leading.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &IptablesRule> {
        self.leading.iter().chain(std::iter::once(&self.terminal))
    }

    pub fn to_vec(&self) -> Vec<IptablesRule> {
        self.iter().cloned().collect()
    }
}

/// One chain of a container's topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    pub table: String,
    /// Built-in chain the jump conditions are installed in. `None` for
    /// chains reached only through other rules.
    pub parent: Option<String>,
    pub name: String,
    pub jump_conditions: Vec<IptablesRule>,
    pub body: RuleBody,
}

/// Create every chain, then hook each into its parent. Jump rules already
/// present in the parent are left alone. Returns the names of chains that
/// existed before the call.
pub fn init_chains(
    iptables: &dyn IptablesAdapter,
    chains: &[ChainSpec],
) -> Result<Vec<String>, NetOutError> {
    let mut existing = Vec::new();
    for chain in chains {
        if iptables
            .chain_exists(&chain.table, &chain.name)
            .map_err(NetOutError::CreateChain)?
        {
            existing.push(chain.name.clone());
            continue;
        }
        iptables
            .new_chain(&chain.table, &chain.name)
            .map_err(NetOutError::CreateChain)?;
        debug!(table = %chain.table, chain = %chain.name, "Chain created");
    }

    for chain in chains {
        let Some(parent) = &chain.parent else {
            continue;
        };
        let mut missing = Vec::with_capacity(chain.jump_conditions.len());
        for jump in &chain.jump_conditions {
            if !iptables
                .rule_exists(&chain.table, parent, jump)
                .map_err(NetOutError::InsertJump)?
            {
                missing.push(jump.clone());
            }
        }
        if missing.is_empty() {
            continue;
        }
        iptables
            .bulk_insert(&chain.table, parent, 1, &missing)
            .map_err(NetOutError::InsertJump)?;
    }

    Ok(existing)
}

/// Install each chain's rule body. Chains listed in `reset` are cleared
/// first so a repeated initialisation does not duplicate rules.
pub fn apply_rules(
    iptables: &dyn IptablesAdapter,
    chains: &[ChainSpec],
    reset: &[String],
) -> Result<(), NetOutError> {
    for chain in chains {
        if reset.contains(&chain.name) {
            iptables
                .clear_chain(&chain.table, &chain.name)
                .map_err(NetOutError::AppendRule)?;
        }
        iptables
            .bulk_append(&chain.table, &chain.name, &chain.body.to_vec())
            .map_err(NetOutError::AppendRule)?;
    }
    Ok(())
}

/// Unhook and delete chains. Anything already gone is skipped.
pub fn cleanup_chains(
    iptables: &dyn IptablesAdapter,
    chains: &[ChainSpec],
) -> Result<(), NetOutError> {
    for chain in chains {
        let cleanup = |e| NetOutError::Cleanup {
            chain: chain.name.clone(),
            source: e,
        };

        if let Some(parent) = &chain.parent {
            for jump in &chain.jump_conditions {
                if iptables
                    .rule_exists(&chain.table, parent, jump)
                    .map_err(cleanup)?
                {
                    iptables.delete(&chain.table, parent, jump).map_err(cleanup)?;
                }
            }
        }

        if !iptables
            .chain_exists(&chain.table, &chain.name)
            .map_err(cleanup)?
        {
            continue;
        }
        iptables
            .clear_chain(&chain.table, &chain.name)
            .map_err(cleanup)?;
        iptables
            .delete_chain(&chain.table, &chain.name)
            .map_err(cleanup)?;
        debug!(table = %chain.table, chain = %chain.name, "Chain deleted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netout::rules;

    #[test]
    fn test_terminal_stays_last() {
        let mut body = RuleBody::new(rules::netout_default_reject())
            .with(rules::netout_invalid())
            .with(rules::netout_related_established());
        body.insert_before_terminal(rules::netout_default_reject_log("h", 2));

        let all = body.to_vec();
        assert_eq!(all.len(), 4);
        assert_eq!(body.len(), 4);
        assert_eq!(all[3], rules::netout_default_reject());
        assert_eq!(all[2], rules::netout_default_reject_log("h", 2));
        assert_eq!(body.terminal(), &rules::netout_default_reject());
    }

    #[test]
    fn test_terminal_only_body() {
        let body = RuleBody::new(rules::accept());
        assert_eq!(body.to_vec(), vec![rules::accept()]);
        assert!(!body.is_empty());
    }
}
