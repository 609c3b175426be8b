//! Run context - the flat string variable set used to resolve step inputs

use serde::de::value::{MapAccessDeserializer, SeqAccessDeserializer};
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Context key holding the task title
pub const TASK_KEY: &str = "task";

/// Context key holding the dry-run flag (`"true"` or `"false"`)
pub const DRY_RUN_KEY: &str = "dry_run";

/// Transient key injected at claim time, never persisted
pub const RUN_ID_KEY: &str = "run_id";

/// Keys that step logic may never overwrite
pub const RESERVED_KEYS: &[&str] = &[TASK_KEY, DRY_RUN_KEY, RUN_ID_KEY];

/// Check whether a key is reserved
pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// A value that can be stored in a [`RunContext`]
///
/// Every context value ends up as text. Implementors define their canonical
/// string form.
pub trait ContextValue {
    fn into_context_string(self) -> String;
}

impl ContextValue for String {
    fn into_context_string(self) -> String {
        self
    }
}

impl ContextValue for &str {
    fn into_context_string(self) -> String {
        self.to_string()
    }
}

impl ContextValue for &String {
    fn into_context_string(self) -> String {
        self.clone()
    }
}

impl ContextValue for bool {
    fn into_context_string(self) -> String {
        self.to_string()
    }
}

macro_rules! numeric_context_value {
    ($($ty:ty),*) => {
        $(
            impl ContextValue for $ty {
                fn into_context_string(self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

numeric_context_value!(i32, i64, u32, u64, usize, f64);

impl ContextValue for &serde_json::Value {
    fn into_context_string(self) -> String {
        use serde_json::Value;
        match self {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Null => String::new(),
            // Structured values keep the flat invariant by becoming JSON text
            Value::Array(_) | Value::Object(_) => self.to_string(),
        }
    }
}

impl ContextValue for serde_json::Value {
    fn into_context_string(self) -> String {
        match self {
            serde_json::Value::String(s) => s,
            other => (&other).into_context_string(),
        }
    }
}

/// Flat, insertion-ordered string to string mapping
///
/// Serializes as a JSON object. Deserialization accepts any value type and
/// coerces it to text, so a stored context is always all-strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunContext {
    entries: Vec<(String, String)>,
}

impl RunContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Insert or replace a value. Replacing keeps the key's original position.
    pub fn insert(&mut self, key: impl Into<String>, value: impl ContextValue) {
        let key = key.into();
        let value = value.into_context_string();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Merge step-produced values, skipping reserved keys
    ///
    /// Returns the keys that were rejected.
    pub fn merge_unreserved<I, K, V>(&mut self, values: I) -> Vec<String>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ContextValue,
    {
        let mut rejected = Vec::new();
        for (key, value) in values {
            let key = key.into();
            if is_reserved(&key) {
                rejected.push(key);
                continue;
            }
            self.insert(key, value);
        }
        rejected
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Serialize to the JSON text stored in the run row
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse the JSON text stored in the run row
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl<K: Into<String>, V: ContextValue> FromIterator<(K, V)> for RunContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut ctx = RunContext::new();
        for (k, v) in iter {
            ctx.insert(k, v);
        }
        ctx
    }
}

impl Serialize for RunContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RunContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ContextVisitor;

        impl<'de> Visitor<'de> for ContextVisitor {
            type Value = RunContext;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a map of context values")
            }

            fn visit_unit<E>(self) -> Result<RunContext, E> {
                Ok(RunContext::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RunContext, A::Error> {
                let mut ctx = RunContext::new();
                while let Some((key, CoercedValue(value))) =
                    access.next_entry::<String, CoercedValue>()?
                {
                    ctx.insert(key, value);
                }
                Ok(ctx)
            }
        }

        deserializer.deserialize_any(ContextVisitor)
    }
}

/// A single context value decoded straight to its text form
///
/// Scalars are handled here instead of going through `serde_json::Value`,
/// which cannot hold non-finite floats.
struct CoercedValue(String);

impl<'de> Deserialize<'de> for CoercedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = CoercedValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a context value")
            }

            fn visit_bool<E>(self, v: bool) -> Result<CoercedValue, E> {
                Ok(CoercedValue(v.to_string()))
            }

            fn visit_i64<E>(self, v: i64) -> Result<CoercedValue, E> {
                Ok(CoercedValue(v.to_string()))
            }

            fn visit_u64<E>(self, v: u64) -> Result<CoercedValue, E> {
                Ok(CoercedValue(v.to_string()))
            }

            fn visit_f64<E>(self, v: f64) -> Result<CoercedValue, E> {
                // Finite floats keep JSON formatting ("1.0"); inf and NaN have none
                let text = serde_json::Number::from_f64(v)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| v.to_string());
                Ok(CoercedValue(text))
            }

            fn visit_str<E>(self, v: &str) -> Result<CoercedValue, E> {
                Ok(CoercedValue(v.to_string()))
            }

            fn visit_string<E>(self, v: String) -> Result<CoercedValue, E> {
                Ok(CoercedValue(v))
            }

            fn visit_unit<E>(self) -> Result<CoercedValue, E> {
                Ok(CoercedValue(String::new()))
            }

            fn visit_none<E>(self) -> Result<CoercedValue, E> {
                Ok(CoercedValue(String::new()))
            }

            fn visit_some<D: Deserializer<'de>>(
                self,
                deserializer: D,
            ) -> Result<CoercedValue, D::Error> {
                CoercedValue::deserialize(deserializer)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, seq: A) -> Result<CoercedValue, A::Error> {
                let value = serde_json::Value::deserialize(SeqAccessDeserializer::new(seq))?;
                Ok(CoercedValue(value.into_context_string()))
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<CoercedValue, A::Error> {
                let value = serde_json::Value::deserialize(MapAccessDeserializer::new(map))?;
                Ok(CoercedValue(value.into_context_string()))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}
