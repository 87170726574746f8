//! # Discovery Index
//!
//! Maps a label `(key, value)` pair to the configurations whose selector
//! matches it. The map is rebuilt aside and swapped in, so readers never see a
//! partially rebuilt index.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::str::FromStr;
use std::sync::{Arc, LazyLock, RwLock};
use thiserror::Error;

/// Identifier of a configuration (the `AgentConfig` name)
pub type ConfigId = String;

// Optional DNS subdomain prefix, then a name segment of at most 63 chars
static LABEL_KEY_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([-A-Za-z0-9_.]{0,61}[A-Za-z0-9])?$")
        .expect("label name regex is valid")
});

static LABEL_KEY_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("label prefix regex is valid")
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("selector '{0}' is not of the form key=value")]
    MissingSeparator(String),
    #[error("selector '{0}' has an empty key")]
    EmptyKey(String),
    #[error("'{0}' is not a valid label key")]
    InvalidKey(String),
    #[error("'{0}' is not a valid label value")]
    InvalidValue(String),
}

/// A single `key=value` label selector
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Selector {
    pub key: String,
    pub value: String,
}

impl Selector {
    /// Whether the labels contain this selector's pair
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        labels.get(&self.key) == Some(&self.value)
    }

    fn pair(&self) -> (String, String) {
        (self.key.clone(), self.value.clone())
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| SelectorError::MissingSeparator(s.to_string()))?;
        let (key, value) = (key.trim(), value.trim());

        if key.is_empty() {
            return Err(SelectorError::EmptyKey(s.to_string()));
        }
        if !is_valid_label_key(key) {
            return Err(SelectorError::InvalidKey(key.to_string()));
        }
        if !is_valid_label_value(value) {
            return Err(SelectorError::InvalidValue(value.to_string()));
        }

        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

fn is_valid_label_key(key: &str) -> bool {
    let (prefix, name) = match key.rsplit_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    let prefix_ok = prefix.is_none_or(|p| p.len() <= 253 && LABEL_KEY_PREFIX.is_match(p));
    prefix_ok && LABEL_KEY_NAME.is_match(name)
}

fn is_valid_label_value(value: &str) -> bool {
    value.is_empty() || LABEL_KEY_NAME.is_match(value)
}

type IndexMap = HashMap<(String, String), BTreeSet<ConfigId>>;

/// Label pair to configuration lookup
#[derive(Debug, Default)]
pub struct DiscoveryIndex {
    entries: RwLock<Arc<IndexMap>>,
}

impl DiscoveryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index with one built from `selectors`
    pub fn rebuild<'a>(&self, selectors: impl IntoIterator<Item = (&'a ConfigId, &'a Selector)>) {
        let mut next = IndexMap::new();
        for (id, selector) in selectors {
            next.entry(selector.pair()).or_default().insert(id.clone());
        }
        let next = Arc::new(next);
        match self.entries.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.rebuild(std::iter::empty());
    }

    fn snapshot(&self) -> Arc<IndexMap> {
        match self.entries.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Configurations whose selector matches any of the labels
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> BTreeSet<ConfigId> {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            return BTreeSet::new();
        }
        labels
            .iter()
            .filter_map(|(k, v)| snapshot.get(&(k.clone(), v.clone())))
            .flatten()
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
