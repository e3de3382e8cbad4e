use serde::Serialize;

use crate::value::Value;

/// Key prefix that turns an equality criterion into an inequality.
pub const NOT_PREFIX: &str = "<NOT>";

/// One `key = value` (or `key <> value`) test.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Criterion {
    pub key: String,
    pub value: Value,
    pub negated: bool,
}

impl Criterion {
    /// Build from a raw key that may carry the [`NOT_PREFIX`].
    pub fn parse(raw_key: &str, value: Value) -> Self {
        match raw_key.strip_prefix(NOT_PREFIX) {
            Some(key) => Self {
                key: key.to_string(),
                value,
                negated: true,
            },
            None => Self {
                key: raw_key.to_string(),
                value,
                negated: false,
            },
        }
    }
}

/// Ordered conjunction of equality criteria keyed by record keys.
///
/// ```
/// use modelstore::Criteria;
///
/// let c = Criteria::new().equals("mediaKey", "abc").not_equals("title", "Untitled");
/// assert_eq!(c.len(), 2);
///
/// let parsed: Criteria = [("<NOT>title", "Untitled")].into_iter().collect();
/// assert!(parsed.iter().next().unwrap().negated);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Criteria {
    criteria: Vec<Criterion>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.criteria.push(Criterion {
            key: key.into(),
            value: value.into(),
            negated: false,
        });
        self
    }

    pub fn not_equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.criteria.push(Criterion {
            key: key.into(),
            value: value.into(),
            negated: true,
        });
        self
    }

    /// Append a criterion whose key may carry the [`NOT_PREFIX`].
    pub fn push(&mut self, raw_key: &str, value: impl Into<Value>) {
        self.criteria.push(Criterion::parse(raw_key, value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = &Criterion> {
        self.criteria.iter()
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Criteria {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut criteria = Criteria::new();
        for (key, value) in iter {
            criteria.push(key.as_ref(), value);
        }
        criteria
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_prefix_is_stripped() {
        let c = Criterion::parse("<NOT>title", Value::from("x"));
        assert_eq!(c.key, "title");
        assert!(c.negated);

        let c = Criterion::parse("title", Value::from("x"));
        assert_eq!(c.key, "title");
        assert!(!c.negated);
    }

    #[test]
    fn prefix_only_applies_at_start() {
        let c = Criterion::parse("title<NOT>", Value::Null);
        assert_eq!(c.key, "title<NOT>");
        assert!(!c.negated);
    }

    #[test]
    fn collected_criteria_keep_order() {
        let c: Criteria = vec![("b", Value::Int(1)), ("<NOT>a", Value::Int(2))]
            .into_iter()
            .collect();
        let keys: Vec<&str> = c.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert!(!c.is_empty());
    }
}
