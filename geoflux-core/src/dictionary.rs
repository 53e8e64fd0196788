//! Per-dimension value dictionary
//!
//! Bijection between string values and dense ids, assigned in first-seen
//! order. Append-only while an index is being built.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Dense string dictionary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct Dictionary {
    values: Vec<String>,
    ids: HashMap<String, u32>,
}

impl Dictionary {
    /// Create an empty dictionary
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `value`, assigning the next id if unseen
    pub fn get_or_insert(&mut self, value: &str) -> u32 {
        if let Some(&id) = self.ids.get(value) {
            return id;
        }
        let id = self.values.len() as u32;
        self.values.push(value.to_string());
        self.ids.insert(value.to_string(), id);
        id
    }

    /// Id of an existing value
    pub fn id_of(&self, value: &str) -> Option<u32> {
        self.ids.get(value).copied()
    }

    /// Value for an id
    pub fn value_of(&self, id: u32) -> Option<&str> {
        self.values.get(id as usize).map(String::as_str)
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(id, value)` in id order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.values
            .iter()
            .enumerate()
            .map(|(id, v)| (id as u32, v.as_str()))
    }
}

impl From<Vec<String>> for Dictionary {
    fn from(values: Vec<String>) -> Self {
        let mut dict = Dictionary::new();
        for value in &values {
            dict.get_or_insert(value);
        }
        dict
    }
}

impl From<Dictionary> for Vec<String> {
    fn from(dict: Dictionary) -> Self {
        dict.values
    }
}
