//! Metadata trees.
//!
//! [`Meta`] is a tree of key/value pairs where every nested JSON object is a
//! child node. It is used both for configuration of actions and tasks, and
//! for describing data elements.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MetaError;
use crate::hash::{Fingerprint, Hash32};
use crate::name::Name;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Meta(Map<String, Value>);

impl Meta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Top level entries.
    pub fn items(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the value or subtree stored at `name`.
    pub fn get(&self, name: &Name) -> Option<&Value> {
        let (first, rest) = name.split_first()?;
        let mut current = self.0.get(&first.to_string())?;

        for token in rest.tokens() {
            current = current.as_object()?.get(&token.to_string())?;
        }

        Some(current)
    }

    /// Same as [`Meta::get`], parsing the key first. Unparseable keys are
    /// absent.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.get(&key.parse().ok()?)
    }

    pub fn string(&self, key: &str) -> Option<&str> {
        self.value(key)?.as_str()
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        self.value(key)?.as_i64()
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        self.value(key)?.as_f64()
    }

    pub fn boolean(&self, key: &str) -> Option<bool> {
        self.value(key)?.as_bool()
    }

    /// Returns a copy of the subtree at `name`. The empty name is the whole
    /// tree.
    pub fn node(&self, name: &Name) -> Option<Meta> {
        if name.is_empty() {
            return Some(self.clone());
        }

        match self.get(name)? {
            Value::Object(map) => Some(Meta(map.clone())),
            _ => None,
        }
    }

    /// Sets a value, creating intermediate nodes and replacing any plain
    /// value standing in their way. Setting the empty name is a no-op.
    pub fn set(&mut self, name: &Name, value: impl Into<Value>) {
        let Some((last, init)) = name.tokens().split_last() else {
            return;
        };

        let mut map = &mut self.0;
        for token in init {
            let entry = map
                .entry(token.to_string())
                .or_insert_with(|| Value::Object(Map::new()));

            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }

            map = match entry {
                Value::Object(inner) => inner,
                _ => unreachable!("entry was just replaced with an object"),
            };
        }

        map.insert(last.to_string(), value.into());
    }

    /// Builder style variant of [`Meta::set`].
    pub fn with(mut self, name: &Name, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn remove(&mut self, name: &Name) -> Option<Value> {
        let (last, init) = name.tokens().split_last()?;

        let mut map = &mut self.0;
        for token in init {
            map = map.get_mut(&token.to_string())?.as_object_mut()?;
        }

        map.remove(&last.to_string())
    }

    /// Deep merge of `other` into `self`. Nodes are merged recursively,
    /// everything else from `other` replaces what was there.
    pub fn update(&mut self, other: &Meta) {
        merge(&mut self.0, &other.0);
    }

    /// Lays several trees on top of each other. Later layers take priority.
    pub fn overlay<'a>(layers: impl IntoIterator<Item = &'a Meta>) -> Meta {
        let mut acc = Meta::new();
        for layer in layers {
            acc.update(layer);
        }
        acc
    }

    /// Hash of the tree content, independent of key order.
    pub fn fingerprint(&self) -> Hash32 {
        Fingerprint::default().json(&Value::Object(self.0.clone())).finish()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

fn merge(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(inner)), Value::Object(update)) => merge(inner, update),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

impl TryFrom<Value> for Meta {
    type Error = MetaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Meta(map)),
            Value::Null => Ok(Meta::new()),
            Value::Bool(_) => Err(MetaError::NotANode("a boolean")),
            Value::Number(_) => Err(MetaError::NotANode("a number")),
            Value::String(_) => Err(MetaError::NotANode("a string")),
            Value::Array(_) => Err(MetaError::NotANode("an array")),
        }
    }
}

impl From<Map<String, Value>> for Meta {
    fn from(map: Map<String, Value>) -> Self {
        Meta(map)
    }
}

impl Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(&self.0).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}
