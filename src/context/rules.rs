//! Filter-key selection
//!
//! A layer's "filter key" is the attribute a generated query should match
//! descriptive text against. Rules are tried in order; the first one that finds a
//! key wins.

use regex::Regex;

use crate::config::GroundingConfig;
use crate::{Error, Result};

/// One way of picking a filter key from a layer's ordered key set
#[derive(Debug, Clone)]
pub enum KeyRule {
    /// First key matching `pattern` that is not denied
    DescriptivePrefix { pattern: Regex, deny: Vec<String> },
    /// First key, in the layer's key order, that appears in the list
    Allowlist(Vec<String>),
}

impl KeyRule {
    pub fn select<'a>(&self, keys: &[&'a str]) -> Option<&'a str> {
        match self {
            KeyRule::DescriptivePrefix { pattern, deny } => keys
                .iter()
                .copied()
                .find(|k| pattern.is_match(k) && !deny.iter().any(|d| d == k)),
            KeyRule::Allowlist(allowed) => keys
                .iter()
                .copied()
                .find(|k| allowed.iter().any(|a| a == k)),
        }
    }
}

/// Ordered rule list
#[derive(Debug, Clone)]
pub struct FilterKeyRules {
    rules: Vec<KeyRule>,
}

impl FilterKeyRules {
    pub fn new(rules: Vec<KeyRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(config: &GroundingConfig) -> Result<Self> {
        let pattern = Regex::new(&config.descriptive_prefix).map_err(|e| {
            Error::Config(format!(
                "invalid descriptive_prefix '{}': {}",
                config.descriptive_prefix, e
            ))
        })?;

        Ok(Self::new(vec![
            KeyRule::DescriptivePrefix {
                pattern,
                deny: config.denylist.clone(),
            },
            KeyRule::Allowlist(config.allowlist.clone()),
        ]))
    }

    /// Filter key for a layer whose sample row has `keys`, if any rule matches
    pub fn select_filter_key<'a>(&self, keys: &[&'a str]) -> Option<&'a str> {
        self.rules.iter().find_map(|rule| rule.select(keys))
    }
}
