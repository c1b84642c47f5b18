//! Deterministic chain names.
//!
//! Names are pure functions of their inputs, so building the topology twice
//! for the same container handle yields the same chains.

use thiserror::Error;
use uuid::Uuid;

/// Longest chain name iptables accepts.
pub const MAX_CHAIN_NAME: usize = 28;

/// Hex digits of digest appended to shortened names.
const DIGEST_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainNameError {
    #[error("suffix '{suffix}' leaves no room for a chain name within {max} characters")]
    SuffixTooLong { suffix: String, max: usize },
}

/// Derives chain names from (prefix, handle) and (chain, suffix).
#[derive(Debug, Clone, Copy)]
pub struct ChainNamer {
    max_length: usize,
}

impl Default for ChainNamer {
    fn default() -> Self {
        Self {
            max_length: MAX_CHAIN_NAME,
        }
    }
}

impl ChainNamer {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    /// `<prefix>--<body>`, shortened to fit.
    pub fn prefix(&self, prefix: &str, body: &str) -> String {
        self.fit(&format!("{prefix}--{body}"))
    }

    /// `<body>-<suffix>`, shortened to fit. The suffix is always kept whole.
    pub fn postfix(&self, body: &str, suffix: &str) -> Result<String, ChainNameError> {
        let full = format!("{body}-{suffix}");
        if full.chars().count() <= self.max_length {
            return Ok(full);
        }

        let reserved = suffix.chars().count() + 1 + DIGEST_LEN + 1;
        if reserved >= self.max_length {
            return Err(ChainNameError::SuffixTooLong {
                suffix: suffix.to_string(),
                max: self.max_length,
            });
        }

        let head: String = body.chars().take(self.max_length - reserved).collect();
        Ok(format!("{head}-{}-{suffix}", digest(&full)))
    }

    fn fit(&self, full: &str) -> String {
        if full.chars().count() <= self.max_length {
            return full.to_string();
        }
        let keep = self.max_length.saturating_sub(DIGEST_LEN + 1);
        let head: String = full.chars().take(keep).collect();
        let digest = digest(full);
        if keep == 0 {
            return digest.chars().take(self.max_length).collect();
        }
        format!("{head}-{digest}")
    }
}

/// Stable short digest of a name (UUIDv5 over the name bytes).
fn digest(name: &str) -> String {
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes());
    id.simple().to_string()[..DIGEST_LEN].to_string()
}
