// Environment variable overlay

use serde_json::{Map, Value};
use std::env;

/// Default prefix for Depot variables
pub const DEFAULT_PREFIX: &str = "DEPOT_";

/// Separator between section and key, `DEPOT_DATABASE__POOL_SIZE`
pub const SECTION_SEPARATOR: &str = "__";

/// Reads prefixed environment variables into a nested overlay
///
/// `DEPOT_LISTENER__RETRY__MAX_ATTEMPTS=3` becomes
/// `{"listener": {"retry": {"max_attempts": 3}}}`. Values that parse as
/// booleans or numbers are typed; everything else stays a string.
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Overlay built from the process environment
    pub fn load(&self) -> Value {
        self.from_pairs(env::vars())
    }

    /// Overlay built from explicit `(name, value)` pairs
    pub fn from_pairs<I, K, V>(&self, pairs: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut root = Map::new();
        for (name, value) in pairs {
            let Some(rest) = name.as_ref().strip_prefix(&self.prefix) else {
                continue;
            };
            let path: Vec<String> = rest
                .split(SECTION_SEPARATOR)
                .map(|segment| segment.to_ascii_lowercase())
                .collect();
            if path.iter().any(|segment| segment.is_empty()) {
                continue;
            }
            insert_path(&mut root, &path, typed(value.as_ref()));
        }
        Value::Object(root)
    }

    /// Read one variable, `key` given without the prefix
    pub fn load_var(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", self.prefix, key.to_ascii_uppercase())).ok()
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

fn insert_path(map: &mut Map<String, Value>, path: &[String], value: Value) {
    let Some((head, tail)) = path.split_first() else {
        return;
    };
    if tail.is_empty() {
        map.insert(head.clone(), value);
        return;
    }
    let entry = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(child) = entry {
        insert_path(child, tail, value);
    }
}

fn typed(raw: &str) -> Value {
    let trimmed = raw.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>()
        && float.is_finite()
    {
        return Value::from(float);
    }
    Value::String(raw.to_string())
}
