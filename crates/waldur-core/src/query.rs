//! Convenience builder for HTTP query parameters.
//!
//! Filters are an ordered multimap: a key may repeat (`state=OK&state=Erred`)
//! and insertion order is preserved on the wire.

use std::fmt::{self, Display};

/// Builder for assembling query parameter pairs.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    /// Create a new, empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    /// Build a query from a single pair.
    #[must_use]
    pub fn with(key: impl Into<String>, value: impl Display) -> Self {
        let mut query = Self::new();
        query.push(key, value);
        query
    }

    /// Append a required key/value pair.
    pub fn push(&mut self, key: impl Into<String>, value: impl Display) -> &mut Self {
        self.pairs.push((key.into(), value.to_string()));
        self
    }

    /// Append a key/value pair when the value is present.
    pub fn push_opt<T>(&mut self, key: impl Into<String>, value: Option<T>) -> &mut Self
    where
        T: Display,
    {
        if let Some(value) = value {
            self.push(key, value);
        }
        self
    }

    /// Append using a mapping function when the value is present.
    pub fn push_opt_with<T, F>(&mut self, key: impl Into<String>, value: Option<T>, map: F) -> &mut Self
    where
        F: FnOnce(T) -> String,
    {
        if let Some(value) = value {
            self.pairs.push((key.into(), map(value)));
        }
        self
    }

    /// Append one pair per value under the same key.
    pub fn push_all<I, T>(&mut self, key: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = T>,
        T: Display,
    {
        for value in values {
            self.push(key, value);
        }
        self
    }

    /// Append the pair only when the key is not present yet.
    pub fn set_default(&mut self, key: &str, value: impl Display) -> &mut Self {
        if !self.contains_key(key) {
            self.push(key, value);
        }
        self
    }

    /// Append every pair of `other`.
    pub fn extend(&mut self, other: &Self) -> &mut Self {
        self.pairs.extend(other.pairs.iter().cloned());
        self
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    /// Returns the first value stored under the key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Removes every pair stored under the key, returning the first value.
    pub fn take(&mut self, key: &str) -> Option<String> {
        let first = self.get(key).map(str::to_string);
        self.pairs.retain(|(k, _)| k != key);
        first
    }

    /// Borrow the collected key/value pairs.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    /// Return the collected key/value pairs.
    #[must_use]
    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.pairs
    }

    /// Returns true if no parameters have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.pairs.iter().enumerate() {
            if index > 0 {
                f.write_str("&")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

impl<K, V> FromIterator<(K, V)> for Query
where
    K: Into<String>,
    V: Display,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Self::new();
        for (key, value) in iter {
            query.push(key, value);
        }
        query
    }
}

#[cfg(test)]
mod tests {
    use super::Query;

    #[test]
    fn push_opt_skips_none() {
        let mut params = Query::new();
        params.push_opt("name", Option::<String>::None);
        assert!(params.is_empty());
    }

    #[test]
    fn push_opt_with_applies_mapper() {
        let mut params = Query::new();
        params.push_opt_with("page_size", Some(5u32), |v| format!("{v:02}"));
        assert_eq!(
            params.into_pairs(),
            vec![("page_size".to_string(), "05".to_string())]
        );
    }

    #[test]
    fn repeated_keys_keep_order() {
        let mut params = Query::with("offering_type", "OpenStack.Instance");
        params.push_all("state", ["Creating", "OK"]);
        assert_eq!(
            params.pairs(),
            &[
                ("offering_type".to_string(), "OpenStack.Instance".to_string()),
                ("state".to_string(), "Creating".to_string()),
                ("state".to_string(), "OK".to_string()),
            ]
        );
    }

    #[test]
    fn set_default_keeps_caller_value() {
        let mut params = Query::with("page_size", 10);
        params.set_default("page_size", 200);
        assert_eq!(params.get("page_size"), Some("10"));

        let mut empty = Query::new();
        empty.set_default("page_size", 200);
        assert_eq!(empty.get("page_size"), Some("200"));
    }

    #[test]
    fn display_joins_pairs() {
        let params: Query = [("name_exact", "web"), ("project_uuid", "p1")].into_iter().collect();
        assert_eq!(params.to_string(), "name_exact=web&project_uuid=p1");
        assert_eq!(Query::new().to_string(), "");
    }

    #[test]
    fn take_removes_all_values() {
        let mut params: Query = [("uuid", "a"), ("tenant_uuid", "b"), ("uuid", "c")]
            .into_iter()
            .collect();
        assert_eq!(params.take("uuid").as_deref(), Some("a"));
        assert!(!params.contains_key("uuid"));
        assert_eq!(params.get("tenant_uuid"), Some("b"));
    }
}
