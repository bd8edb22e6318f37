//! Header multimap shared by the live phases and log records.

use std::collections::BTreeMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Deserializer, Serialize};

/// Header name → ordered values. Names are stored lowercase.
///
/// Deserializes from both `{"name": "v"}` and `{"name": ["v1", "v2"]}`,
/// which is how access-log serializers emit single and repeated headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Headers(BTreeMap<String, Vec<String>>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, OneOrMany>::deserialize(deserializer)?;
        let mut headers = Headers::new();
        for (name, values) in raw {
            match values {
                OneOrMany::One(value) => headers.append(&name, value),
                OneOrMany::Many(values) => {
                    for value in values {
                        headers.append(&name, value);
                    }
                }
            }
        }
        Ok(headers)
    }
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value after any existing values for `name`.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace all values for `name`.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), vec![value.into()]);
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&HeaderMap> for Headers {
    fn from(map: &HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            match value.to_str() {
                Ok(value) => headers.append(name.as_str(), value),
                Err(_) => tracing::debug!(header = %name, "Skipping non-ASCII header value"),
            }
        }
        headers
    }
}

impl Headers {
    /// Convert to a `HeaderMap`, dropping names or values HTTP cannot carry.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, values) in &self.0 {
            let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
                tracing::warn!(header = %name, "Dropping invalid header name");
                continue;
            };
            for value in values {
                match HeaderValue::from_str(value) {
                    Ok(value) => {
                        map.append(header.clone(), value);
                    }
                    Err(_) => tracing::warn!(header = %name, "Dropping invalid header value"),
                }
            }
        }
        map
    }
}
