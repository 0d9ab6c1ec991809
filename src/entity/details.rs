//! Detail Store
//!
//! Free-form multi-valued attributes attached to an entity. Each name maps to
//! a set of string values; names and values keep their insertion order.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of a detail mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailChange {
    /// The mapping changed
    Changed,
    /// The value was already present
    Unchanged,
}

/// Failed detail lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDetail {
    pub name: String,
    pub value: String,
}

/// Per-entity attribute bag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Details(IndexMap<String, IndexSet<String>>);

impl Details {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value to the set for `name`
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) -> DetailChange {
        if self.0.entry(name.into()).or_default().insert(value.into()) {
            DetailChange::Changed
        } else {
            DetailChange::Unchanged
        }
    }

    /// Replace the whole set for `name` with `{value}`
    ///
    /// The name must already carry at least one value.
    pub fn update(&mut self, name: &str, value: impl Into<String>) -> Result<DetailChange, MissingDetail> {
        let value = value.into();
        let Some(values) = self.0.get_mut(name) else {
            return Err(MissingDetail {
                name: name.to_string(),
                value,
            });
        };

        if values.len() == 1 && values.contains(&value) {
            return Ok(DetailChange::Unchanged);
        }
        values.clear();
        values.insert(value);
        Ok(DetailChange::Changed)
    }

    /// Remove exactly `value` from `name`, dropping the key once empty
    pub fn remove(&mut self, name: &str, value: &str) -> Result<DetailChange, MissingDetail> {
        let removed = self
            .0
            .get_mut(name)
            .map(|values| values.shift_remove(value))
            .unwrap_or(false);

        if !removed {
            return Err(MissingDetail {
                name: name.to_string(),
                value: value.to_string(),
            });
        }

        if self.0.get(name).is_some_and(|values| values.is_empty()) {
            self.0.shift_remove(name);
        }
        Ok(DetailChange::Changed)
    }

    /// Values stored under `name`
    pub fn get(&self, name: &str) -> Option<&IndexSet<String>> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str, value: &str) -> bool {
        self.0.get(name).is_some_and(|values| values.contains(value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &IndexSet<String>)> {
        self.0.iter()
    }

    /// Full name to values mapping
    pub fn as_map(&self) -> &IndexMap<String, IndexSet<String>> {
        &self.0
    }
}

impl From<BTreeMap<String, String>> for Details {
    fn from(seed: BTreeMap<String, String>) -> Self {
        let mut details = Details::new();
        for (name, value) in seed {
            details.add(name, value);
        }
        details
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Details {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut details = Details::new();
        for (name, value) in iter {
            details.add(name, value);
        }
        details
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut details = Details::new();
        assert_eq!(details.add("k", "v"), DetailChange::Changed);
        assert_eq!(details.add("k", "v"), DetailChange::Unchanged);
        assert_eq!(details.add("k", "w"), DetailChange::Changed);
        assert_eq!(details.get("k").unwrap().len(), 2);
    }

    #[test]
    fn test_remove_last_value_drops_key() {
        let mut details = Details::new();
        details.add("k", "v");
        assert!(details.contains("k", "v"));

        details.remove("k", "v").unwrap();
        assert!(details.get("k").is_none());
        assert!(details.is_empty());
    }

    #[test]
    fn test_remove_keeps_other_values() {
        let mut details: Details = [("k", "a"), ("k", "b")].into_iter().collect();
        details.remove("k", "a").unwrap();
        assert!(details.contains("k", "b"));
        assert!(!details.contains("k", "a"));
    }

    #[test]
    fn test_remove_missing_value_fails() {
        let mut details = Details::new();
        details.add("k", "v");
        let err = details.remove("k", "other").unwrap_err();
        assert_eq!(err.value, "other");
        assert!(details.remove("nope", "v").is_err());
        assert!(details.contains("k", "v"));
    }

    #[test]
    fn test_update_replaces_whole_set() {
        let mut details: Details = [("k", "a"), ("k", "b")].into_iter().collect();
        assert_eq!(details.update("k", "c").unwrap(), DetailChange::Changed);

        let values = details.get("k").unwrap();
        assert_eq!(values.len(), 1);
        assert!(values.contains("c"));
        assert_eq!(details.update("k", "c").unwrap(), DetailChange::Unchanged);
    }

    #[test]
    fn test_update_missing_name_fails() {
        let mut details = Details::new();
        assert!(details.update("k", "v").is_err());
        assert!(details.is_empty());
    }

    #[test]
    fn test_seed_from_map() {
        let mut seed = BTreeMap::new();
        seed.insert("region".to_string(), "us".to_string());
        let details = Details::from(seed);
        assert!(details.contains("region", "us"));
        assert_eq!(details.len(), 1);
    }
}
