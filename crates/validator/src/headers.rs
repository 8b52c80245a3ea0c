use std::collections::HashMap;

use reqwest::header::HeaderMap;
use serde::Serialize;

/// HTTP response headers keyed by lower-cased name.
///
/// Names are case-insensitive per RFC 9110; repeated headers are combined
/// into one value joined with `", "`, which is the canonical form for the
/// list-valued headers the delivery policies inspect.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderSet(HashMap<String, String>);

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut set = HashMap::with_capacity(headers.len());
        for (name, value) in headers {
            let value = String::from_utf8_lossy(value.as_bytes());
            set.entry(name.as_str().to_string())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert_with(|| value.into_owned());
        }
        Self(set)
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Inserts a header, replacing any previous value under the same name.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<N, V> FromIterator<(N, V)> for HeaderSet
where
    N: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (N, V)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (name, value) in iter {
            set.insert(name.as_ref(), value);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    #[test]
    fn test_names_are_case_insensitive() {
        let headers = HeaderSet::from_iter([("Cache-Control", "max-age=5")]);
        assert_eq!(headers.get("cache-control"), Some("max-age=5"));
        assert_eq!(headers.get("CACHE-CONTROL"), Some("max-age=5"));
        assert!(headers.get("age").is_none());
    }

    #[test]
    fn test_repeated_headers_join() {
        let mut map = HeaderMap::new();
        map.append(
            HeaderName::from_static("access-control-expose-headers"),
            HeaderValue::from_static("Date"),
        );
        map.append(
            HeaderName::from_static("access-control-expose-headers"),
            HeaderValue::from_static("Server"),
        );

        let headers = HeaderSet::from_headers(&map);
        assert_eq!(
            headers.get("access-control-expose-headers"),
            Some("Date, Server")
        );
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_insert_replaces() {
        let mut headers = HeaderSet::new();
        headers.insert("X-Cache", "MISS");
        headers.insert("x-cache", "HIT");
        assert_eq!(headers.get("x-cache"), Some("HIT"));
        assert_eq!(headers.len(), 1);
    }
}
