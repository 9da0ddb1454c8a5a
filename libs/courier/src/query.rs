//! Query string model with pluggable aggregation and encoding.
//!
//! A [`Query`] keeps its parameters in insertion order. Multi-valued
//! parameters are flattened into `key=value` pairs by a [`QueryAggregator`]
//! and then percent-encoded according to the query's [`Encoding`].
//!
//! Parsing picks the aggregator from the input: duplicate keys without any
//! `key[]` notation switch to [`DuplicateAggregator`]; as soon as one `key[]`
//! appears the PHP-style aggregator is kept for the whole query. This means
//! `a=1&a[]=2` serializes as `a%5B%5D=1&a%5B%5D=2`.

use serde::Deserialize;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Percent-encoding applied to keys and values when serializing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// `rawurlencode` style: space becomes `%20`
    #[default]
    Rfc3986,
    /// Form style: space becomes `+`
    Rfc1738,
    /// Keys and values are written verbatim
    None,
}

impl Encoding {
    fn encode<'a>(self, raw: &'a str) -> Cow<'a, str> {
        match self {
            Encoding::Rfc3986 => urlencoding::encode(raw),
            Encoding::Rfc1738 => {
                let encoded = urlencoding::encode(raw);
                if encoded.contains("%20") {
                    Cow::Owned(encoded.replace("%20", "+"))
                } else {
                    encoded
                }
            }
            Encoding::None => Cow::Borrowed(raw),
        }
    }
}

/// Value stored under a query key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    /// Bare key with no `=`
    Null,
    Single(String),
    /// Explicit list; `None` entries serialize as bare keys
    Many(Vec<Option<String>>),
}

impl QueryValue {
    /// First present value, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        match self {
            QueryValue::Null => None,
            QueryValue::Single(v) => Some(v),
            QueryValue::Many(values) => values.iter().flatten().next().map(String::as_str),
        }
    }

    fn push(&mut self, value: Option<String>) {
        let current = std::mem::replace(self, QueryValue::Null);
        *self = match current {
            QueryValue::Null => QueryValue::Many(vec![None, value]),
            QueryValue::Single(v) => QueryValue::Many(vec![Some(v), value]),
            QueryValue::Many(mut values) => {
                values.push(value);
                QueryValue::Many(values)
            }
        };
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Single(value.to_owned())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Single(value)
    }
}

impl From<Option<String>> for QueryValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(QueryValue::Null, QueryValue::Single)
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(values: Vec<String>) -> Self {
        QueryValue::Many(values.into_iter().map(Some).collect())
    }
}

impl From<Vec<&str>> for QueryValue {
    fn from(values: Vec<&str>) -> Self {
        QueryValue::Many(values.into_iter().map(|v| Some(v.to_owned())).collect())
    }
}

/// Flattens parameters into `(key, values)` groups ready for encoding.
pub trait QueryAggregator: fmt::Debug + Send + Sync {
    fn aggregate(&self, params: &[(String, QueryValue)]) -> Vec<(String, Vec<Option<String>>)>;
}

/// `key[]=v1&key[]=v2`, or `key[0]=v1&key[1]=v2` with numeric indices.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhpAggregator {
    numeric_indices: bool,
}

impl PhpAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_numeric_indices() -> Self {
        Self {
            numeric_indices: true,
        }
    }
}

impl QueryAggregator for PhpAggregator {
    fn aggregate(&self, params: &[(String, QueryValue)]) -> Vec<(String, Vec<Option<String>>)> {
        let mut out = Vec::with_capacity(params.len());
        for (key, value) in params {
            match value {
                QueryValue::Many(values) if self.numeric_indices => {
                    for (idx, v) in values.iter().enumerate() {
                        out.push((format!("{key}[{idx}]"), vec![v.clone()]));
                    }
                }
                QueryValue::Many(values) => out.push((format!("{key}[]"), values.clone())),
                other => out.push(scalar(key, other)),
            }
        }
        out
    }
}

/// `key=v1&key=v2`
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateAggregator;

impl QueryAggregator for DuplicateAggregator {
    fn aggregate(&self, params: &[(String, QueryValue)]) -> Vec<(String, Vec<Option<String>>)> {
        params
            .iter()
            .map(|(key, value)| match value {
                QueryValue::Many(values) => (key.clone(), values.clone()),
                other => scalar(key, other),
            })
            .collect()
    }
}

/// `key=v1,v2`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommaAggregator;

impl QueryAggregator for CommaAggregator {
    fn aggregate(&self, params: &[(String, QueryValue)]) -> Vec<(String, Vec<Option<String>>)> {
        params
            .iter()
            .map(|(key, value)| match value {
                QueryValue::Many(values) => {
                    let joined = values
                        .iter()
                        .flatten()
                        .map(String::as_str)
                        .collect::<Vec<_>>()
                        .join(",");
                    (key.clone(), vec![Some(joined)])
                }
                other => scalar(key, other),
            })
            .collect()
    }
}

fn scalar(key: &str, value: &QueryValue) -> (String, Vec<Option<String>>) {
    match value {
        QueryValue::Single(v) => (key.to_owned(), vec![Some(v.clone())]),
        _ => (key.to_owned(), vec![None]),
    }
}

/// Ordered query parameters.
#[derive(Debug, Clone)]
pub struct Query {
    params: Vec<(String, QueryValue)>,
    encoding: Encoding,
    aggregator: Arc<dyn QueryAggregator>,
}

impl Default for Query {
    fn default() -> Self {
        Self {
            params: Vec::new(),
            encoding: Encoding::default(),
            aggregator: Arc::new(PhpAggregator::new()),
        }
    }
}

impl PartialEq for Query {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params
    }
}

impl Query {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw query string (a leading `?` is ignored).
    ///
    /// Keys are percent-decoded as-is; values additionally decode `+` as a space.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let mut query = Self::new();
        if raw.is_empty() {
            return query;
        }

        let mut found_duplicates = false;
        let mut found_php_style = false;

        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (raw_key, raw_value) = match pair.split_once('=') {
                Some((k, v)) => (k, Some(v)),
                None => (pair, None),
            };

            let mut key = decode(raw_key);
            let php_style = key.ends_with("[]");
            if php_style {
                found_php_style = true;
                key.truncate(key.len() - 2);
            }

            match raw_value {
                Some(raw_value) => {
                    let value = decode(&raw_value.replace('+', "%20"));
                    if query.has(&key) {
                        query.add(&key, Some(value));
                        found_duplicates = true;
                    } else if php_style {
                        query.set(&key, QueryValue::Many(vec![Some(value)]));
                    } else {
                        query.set(&key, QueryValue::Single(value));
                    }
                }
                None => query.add(&key, None),
            }
        }

        if found_duplicates && !found_php_style {
            query.aggregator = Arc::new(DuplicateAggregator);
        }

        query
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Store `value` under `key`, replacing any previous value in place.
    pub fn set(&mut self, key: &str, value: impl Into<QueryValue>) {
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.params.push((key.to_owned(), value)),
        }
    }

    /// Append a value; an existing scalar is promoted to a list.
    pub fn add(&mut self, key: &str, value: Option<String>) {
        match self.params.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => existing.push(value),
            None => self.params.push((key.to_owned(), value.into())),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<QueryValue> {
        let idx = self.params.iter().position(|(k, _)| k == key)?;
        Some(self.params.remove(idx).1)
    }

    /// Overlay every parameter of `other`; keys present in both take `other`'s value.
    pub fn merge(&mut self, other: &Query) {
        for (key, value) in &other.params {
            self.set(key, value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    #[must_use]
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn set_encoding(&mut self, encoding: Encoding) {
        self.encoding = encoding;
    }

    pub fn set_aggregator(&mut self, aggregator: Arc<dyn QueryAggregator>) {
        self.aggregator = aggregator;
    }

    #[must_use]
    pub fn aggregator(&self) -> &dyn QueryAggregator {
        self.aggregator.as_ref()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, values) in self.aggregator.aggregate(&self.params) {
            let key = self.encoding.encode(&key);
            for value in values {
                if !first {
                    f.write_str("&")?;
                }
                first = false;
                f.write_str(&key)?;
                if let Some(value) = value {
                    f.write_str("=")?;
                    f.write_str(&self.encoding.encode(&value))?;
                }
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<QueryValue>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut query = Self::new();
        for (key, value) in iter {
            query.set(&key.into(), value);
        }
        query
    }
}

fn decode(raw: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_unique_keys() {
        let raw = "foo=bar&baz=bam%20boo&empty=&bare";
        let query = Query::parse(raw);
        assert_eq!(query.to_string(), raw);
        assert_eq!(Query::parse(&query.to_string()), query);
    }

    #[test]
    fn test_empty_string_parses_to_empty_query() {
        let query = Query::parse("");
        assert!(query.is_empty());
        assert_eq!(query.to_string(), "");
        assert!(Query::parse("?").is_empty());
    }

    #[test]
    fn test_duplicates_switch_to_duplicate_aggregator() {
        let query = Query::parse("a=1&a=2");
        assert_eq!(
            query.get("a"),
            Some(&QueryValue::Many(vec![Some("1".into()), Some("2".into())]))
        );
        assert_eq!(query.to_string(), "a=1&a=2");
    }

    #[test]
    fn test_php_style_arrays_stay_arrays() {
        let query = Query::parse("a[]=1&a[]=2");
        assert_eq!(
            query.get("a"),
            Some(&QueryValue::Many(vec![Some("1".into()), Some("2".into())]))
        );
        assert_eq!(query.to_string(), "a%5B%5D=1&a%5B%5D=2");

        let single = Query::parse("a[]=1");
        assert_eq!(single.get("a"), Some(&QueryValue::Many(vec![Some("1".into())])));
        assert_eq!(single.to_string(), "a%5B%5D=1");
    }

    #[test]
    fn test_mixed_notation_keeps_php_aggregator() {
        let query = Query::parse("a=1&a[]=2");
        assert_eq!(query.to_string(), "a%5B%5D=1&a%5B%5D=2");
    }

    #[test]
    fn test_plus_decodes_in_values_only() {
        let query = Query::parse("a+b=c+d");
        assert_eq!(query.get("a+b").and_then(QueryValue::first), Some("c d"));
    }

    #[test]
    fn test_bare_and_empty_values() {
        let mut query = Query::new();
        query.set("bare", QueryValue::Null);
        query.set("empty", "");
        assert_eq!(query.to_string(), "bare&empty=");
    }

    #[test]
    fn test_rfc1738_encoding() {
        let mut query = Query::new();
        query.set("q", "hello world");
        query.set_encoding(Encoding::Rfc1738);
        assert_eq!(query.to_string(), "q=hello+world");

        query.set_encoding(Encoding::Rfc3986);
        assert_eq!(query.to_string(), "q=hello%20world");

        query.set_encoding(Encoding::None);
        assert_eq!(query.to_string(), "q=hello world");
    }

    #[test]
    fn test_aggregator_strategies() {
        let mut query = Query::new();
        query.set("ids", vec!["1", "2"]);

        assert_eq!(query.to_string(), "ids%5B%5D=1&ids%5B%5D=2");

        query.set_aggregator(Arc::new(PhpAggregator::with_numeric_indices()));
        assert_eq!(query.to_string(), "ids%5B0%5D=1&ids%5B1%5D=2");

        query.set_aggregator(Arc::new(DuplicateAggregator));
        assert_eq!(query.to_string(), "ids=1&ids=2");

        query.set_aggregator(Arc::new(CommaAggregator));
        assert_eq!(query.to_string(), "ids=1%2C2");
        query.set_encoding(Encoding::None);
        assert_eq!(query.to_string(), "ids=1,2");
    }

    #[test]
    fn test_merge_overlays_and_preserves_order() {
        let mut query = Query::parse("a=b&t=0");
        let defaults: Query = [("baz", "bam")].into_iter().collect();
        let call: Query = [("t", "1")].into_iter().collect();

        query.merge(&defaults);
        query.merge(&call);
        assert_eq!(query.to_string(), "a=b&t=1&baz=bam");
    }

    #[test]
    fn test_add_promotes_scalar() {
        let mut query = Query::new();
        query.add("k", Some("1".into()));
        query.add("k", None);
        assert_eq!(query.get("k"), Some(&QueryValue::Many(vec![Some("1".into()), None])));
        assert_eq!(query.remove("k").map(|v| v.first().map(str::to_owned)), Some(Some("1".into())));
        assert!(!query.has("k"));
    }

    #[test]
    fn test_deserialize_values() {
        let value: QueryValue = serde_json::from_str("\"x\"").unwrap();
        assert_eq!(value, QueryValue::Single("x".into()));
        let value: QueryValue = serde_json::from_str("[\"x\", null]").unwrap();
        assert_eq!(value, QueryValue::Many(vec![Some("x".into()), None]));
        let value: QueryValue = serde_json::from_str("null").unwrap();
        assert_eq!(value, QueryValue::Null);
    }
}
