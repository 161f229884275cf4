//! Channel and unit property values
//!
//! Recordings attach metadata such as `group` and `location` to channels;
//! sortings attach metadata such as `group` and `quality` to units. Both use
//! [`PropertyValue`].

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Channel property holding the electrode group (shank, tetrode, ...)
pub const GROUP_PROPERTY: &str = "group";

/// Channel property holding the spatial electrode location
pub const LOCATION_PROPERTY: &str = "location";

/// A single property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Integer value (channel groups, cluster ids)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Text value (cluster quality labels)
    Text(String),
    /// Numeric vector (electrode locations)
    Vector(Vec<f64>),
}

impl PropertyValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            PropertyValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(v) => Some(*v as f64),
            PropertyValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            PropertyValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    fn variant_rank(&self) -> u8 {
        match self {
            PropertyValue::Int(_) | PropertyValue::Float(_) => 0,
            PropertyValue::Text(_) => 1,
            PropertyValue::Vector(_) => 2,
        }
    }

    /// Total ordering used to sort distinct property values
    ///
    /// Numbers sort before text, text before vectors. Integers and floats
    /// compare numerically.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PropertyValue::Int(a), PropertyValue::Int(b)) => a.cmp(b),
            (PropertyValue::Text(a), PropertyValue::Text(b)) => a.cmp(b),
            (PropertyValue::Vector(a), PropertyValue::Vector(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.total_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => self.variant_rank().cmp(&other.variant_rank()),
            },
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Float(v) => write!(f, "{}", v),
            PropertyValue::Text(v) => write!(f, "{}", v),
            PropertyValue::Vector(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::Text(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::Text(v)
    }
}

impl From<Vec<f64>> for PropertyValue {
    fn from(v: Vec<f64>) -> Self {
        PropertyValue::Vector(v)
    }
}
