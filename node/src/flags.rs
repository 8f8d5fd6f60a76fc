//! Command-line flags passed to a node container.
//!
//! Flags keep insertion order so the generated argument list is stable and easy
//! to compare against container logs. Keys are normalized on insertion
//! (`rest_port` and `rest-port` name the same flag).

use crate::Error;
use std::fmt;
use tracing::debug;

/// Value of a single flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlagValue {
    /// Rendered as `--key=value`.
    Text(String),
    /// Rendered as one `--key=value` per item.
    List(Vec<String>),
    /// `true` renders as a bare `--key`, `false` omits the flag.
    Switch(bool),
    /// The key itself is the argument (subcommands such as `generateRlnKeystore`).
    Bare,
}

impl fmt::Display for FlagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagValue::Text(value) => write!(f, "{value}"),
            FlagValue::List(values) => write!(f, "{}", values.join(",")),
            FlagValue::Switch(value) => write!(f, "{value}"),
            FlagValue::Bare => Ok(()),
        }
    }
}

impl From<&str> for FlagValue {
    fn from(value: &str) -> Self {
        FlagValue::Text(value.to_string())
    }
}

impl From<String> for FlagValue {
    fn from(value: String) -> Self {
        FlagValue::Text(value)
    }
}

impl From<&String> for FlagValue {
    fn from(value: &String) -> Self {
        FlagValue::Text(value.clone())
    }
}

impl From<u16> for FlagValue {
    fn from(value: u16) -> Self {
        FlagValue::Text(value.to_string())
    }
}

impl From<u64> for FlagValue {
    fn from(value: u64) -> Self {
        FlagValue::Text(value.to_string())
    }
}

impl From<bool> for FlagValue {
    fn from(value: bool) -> Self {
        FlagValue::Switch(value)
    }
}

impl From<Vec<String>> for FlagValue {
    fn from(values: Vec<String>) -> Self {
        FlagValue::List(values)
    }
}

impl From<Vec<&str>> for FlagValue {
    fn from(values: Vec<&str>) -> Self {
        FlagValue::List(values.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FlagValue {
    fn from(values: [&str; N]) -> Self {
        FlagValue::List(values.iter().map(|value| value.to_string()).collect())
    }
}

/// Ordered set of flags.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Flags {
    entries: Vec<(String, FlagValue)>,
}

/// Normalize a flag key: underscores become dashes.
pub fn sanitize(key: &str) -> String {
    key.replace('_', "-")
}

impl Flags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [Flags::set].
    pub fn with(mut self, key: &str, value: impl Into<FlagValue>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or replace a flag. A replaced flag keeps its original position.
    pub fn set(&mut self, key: &str, value: impl Into<FlagValue>) {
        let key = sanitize(key);
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FlagValue> {
        let key = sanitize(key);
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Text value of a flag, or the first item of a list.
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            FlagValue::Text(value) => Some(value),
            FlagValue::List(values) => values.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: &str) -> Option<FlagValue> {
        let key = sanitize(key);
        let index = self.entries.iter().position(|(k, _)| *k == key)?;
        Some(self.entries.remove(index).1)
    }

    /// Move the value of `from` to `to`, if present.
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(value) = self.remove(from) {
            self.set(to, value);
        }
    }

    /// Merge `overrides` into `self`. On conflict the override wins.
    pub fn merge(&mut self, overrides: Flags) {
        for (key, value) in overrides.entries {
            self.set(&key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlagValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the container argument list.
    ///
    /// Bare keys come first (verbatim, in insertion order) so subcommands precede
    /// options.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, value)| *value == FlagValue::Bare)
            .map(|(key, _)| key.clone())
            .collect();
        for (key, value) in &self.entries {
            match value {
                FlagValue::Text(value) => args.push(format!("--{key}={value}")),
                FlagValue::List(values) => {
                    args.extend(values.iter().map(|value| format!("--{key}={value}")))
                }
                FlagValue::Switch(true) => args.push(format!("--{key}")),
                FlagValue::Switch(false) | FlagValue::Bare => {}
            }
        }
        args
    }

    /// Derive `cluster-id` from `pubsub-topic` when the former is not set.
    ///
    /// Static shard topics look like `/waku/2/rs/<cluster>/<shard>`; with a list of
    /// topics the first one decides.
    pub fn resolve_cluster_id(&mut self) -> Result<(), Error> {
        if self.contains("cluster-id") {
            return Ok(());
        }
        let Some(topic) = self.get_text("pubsub-topic") else {
            return Ok(());
        };
        let cluster_id = topic
            .split('/')
            .nth(4)
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| {
                Error::InvalidFlag(format!(
                    "could not resolve cluster-id from pubsub-topic {topic}"
                ))
            })?
            .to_string();
        debug!(cluster_id, "resolved cluster id");
        self.set("cluster-id", cluster_id);
        Ok(())
    }
}

impl<K: AsRef<str>, V: Into<FlagValue>> FromIterator<(K, V)> for Flags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut flags = Flags::new();
        for (key, value) in iter {
            flags.set(key.as_ref(), value);
        }
        flags
    }
}
