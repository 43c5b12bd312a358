//! # Stored values
//!
//! A key is either absent (not in the table) or holds one `Record`.

use std::collections::HashMap;

use crate::error::Error;
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Scalar(String),
    Hash(HashRecord),
}

impl Record {
    pub fn as_hash(&self) -> Option<&HashRecord> {
        match self {
            Record::Hash(h) => Some(h),
            Record::Scalar(_) => None,
        }
    }
}

/// Field map that keeps insertion order.
///
/// Overwriting a field keeps its original position.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HashRecord {
    fields: Vec<(String, String)>,
}

impl HashRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(f, _)| f == field)
            .map(|(_, v)| v.as_str())
    }

    /// Returns true if the field did not exist before.
    pub fn set(&mut self, field: &str, value: &str) -> bool {
        match self.fields.iter_mut().find(|(f, _)| f == field) {
            Some((_, v)) => {
                *v = value.to_string();
                false
            }
            None => {
                self.fields.push((field.to_string(), value.to_string()));
                true
            }
        }
    }

    pub fn remove(&mut self, field: &str) -> bool {
        let before = self.fields.len();
        self.fields.retain(|(f, _)| f != field);
        self.fields.len() != before
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(f, v)| (f.as_str(), v.as_str()))
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.fields.iter().cloned().collect()
    }
}

/// Parses a stored value as a counter.
///
/// Only the canonical base-10 form of an `i64` is accepted: an optional `-`,
/// no `+`, no leading zeros, no whitespace. This is the one check every
/// counter command goes through.
pub fn parse_integer(value: &str) -> Result<i64> {
    let n: i64 = value.parse().map_err(|_| Error::NotAnInteger)?;
    if n.to_string() != value {
        return Err(Error::NotAnInteger);
    }
    Ok(n)
}
