use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A value stored in the execution context by `EXTRACT_DATA` or `CALL_LLM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Scalar(String),
    List(Vec<String>),
}

impl fmt::Display for ContextValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextValue::Scalar(s) => f.write_str(s),
            ContextValue::List(items) => f.write_str(&items.join(",")),
        }
    }
}

impl From<Vec<String>> for ContextValue {
    /// One match collapses to a scalar; zero or several stay a list.
    fn from(mut items: Vec<String>) -> Self {
        if items.len() == 1 {
            ContextValue::Scalar(items.remove(0))
        } else {
            ContextValue::List(items)
        }
    }
}

/// Variables accumulated during one mission run.
///
/// Keys are only ever added or overwritten, never removed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionContext {
    vars: BTreeMap<String, ContextValue>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&ContextValue> {
        self.vars.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ContextValue) {
        self.vars.insert(name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// A secret as the caller submits it.
#[derive(Clone, Deserialize)]
pub struct SecretEntry {
    pub key: String,
    pub value: String,
}

/// Caller-supplied secrets, read-only for the duration of a mission.
#[derive(Clone, Default)]
pub struct SecretVault {
    secrets: HashMap<String, String>,
}

impl SecretVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys are stored upper-cased, the same way the vault form normalises them.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.secrets.insert(key.trim().to_uppercase(), value.into());
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl FromIterator<SecretEntry> for SecretVault {
    fn from_iter<I: IntoIterator<Item = SecretEntry>>(iter: I) -> Self {
        let mut vault = SecretVault::new();
        for entry in iter {
            vault.insert(&entry.key, entry.value);
        }
        vault
    }
}

impl fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.secrets.keys().collect();
        keys.sort();
        f.debug_struct("SecretVault")
            .field("keys", &keys)
            .field("values", &"<redacted>")
            .finish()
    }
}

/// A message in the conversation history sent to the decision service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}
