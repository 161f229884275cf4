//! Sorter parameter sets
//!
//! A [`ParamSet`] maps parameter names to JSON values. An adapter's declared
//! defaults define the legal key set; overrides are applied as one validated
//! batch so a bad key never leaves the set half-updated.

use crate::error::{Result, SorterError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Named parameter values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, Value>);

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Read a flat TOML table, e.g. `detect_threshold = 4`
    ///
    /// TOML has no null, so `null` defaults can only be overridden here with a
    /// concrete value.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SorterError::Parse(format!("parameter file: {}", e)))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply overrides, rejecting the whole batch if any key is not already present
    ///
    /// The error lists every unknown key in the order supplied.
    pub fn update_checked<I, K>(&mut self, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let overrides: Vec<(String, Value)> =
            overrides.into_iter().map(|(k, v)| (k.into(), v)).collect();

        let bad_params: Vec<String> = overrides
            .iter()
            .filter(|(k, _)| !self.0.contains_key(k))
            .map(|(k, _)| k.clone())
            .collect();
        if !bad_params.is_empty() {
            return Err(SorterError::Validation { bad_params });
        }

        self.0.extend(overrides);
        Ok(())
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.0.get(name).ok_or_else(|| SorterError::InvalidParamValue {
            name: name.to_string(),
            expected: "present".to_string(),
        })
    }

    fn invalid(name: &str, expected: &str) -> SorterError {
        SorterError::InvalidParamValue {
            name: name.to_string(),
            expected: expected.to_string(),
        }
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        self.require(name)?
            .as_f64()
            .ok_or_else(|| Self::invalid(name, "a number"))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64> {
        let value = self.require(name)?;
        value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .ok_or_else(|| Self::invalid(name, "an integer"))
    }

    /// Booleans, or 0/1 numbers
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) if n.as_f64() == Some(0.0) => Ok(false),
            Value::Number(n) if n.as_f64() == Some(1.0) => Ok(true),
            _ => Err(Self::invalid(name, "a boolean")),
        }
    }

    /// `null` or a list of integer indices
    pub fn get_index_list(&self, name: &str) -> Result<Option<Vec<usize>>> {
        match self.require(name)? {
            Value::Null => Ok(None),
            Value::Array(items) => items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .map(|i| i as usize)
                        .ok_or_else(|| Self::invalid(name, "null or a list of indices"))
                })
                .collect::<Result<Vec<_>>>()
                .map(Some),
            _ => Err(Self::invalid(name, "null or a list of indices")),
        }
    }
}

impl IntoIterator for ParamSet {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.0 {
            writeln!(f, "{} = {}", name, value)?;
        }
        Ok(())
    }
}

/// Parse a `key=value` override
///
/// The value is read as JSON when possible (`6`, `true`, `null`, `[0, 1]`),
/// otherwise kept as a string.
pub fn parse_override(arg: &str) -> std::result::Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", arg))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", arg));
    }
    let raw = raw.trim();
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}
