//! Case-insensitive, multi-valued header storage.
//!
//! Names are matched without regard to ASCII case, but the casing used the
//! first time a name is stored is the one reported back by [`HeaderCollection::all`].

use crate::error::HttpError;
use http::header::{HeaderMap, HeaderName, HeaderValue};

/// One or more values for a single header name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderValues(Vec<String>);

impl HeaderValues {
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl From<&str> for HeaderValues {
    fn from(value: &str) -> Self {
        Self(vec![value.to_owned()])
    }
}

impl From<String> for HeaderValues {
    fn from(value: String) -> Self {
        Self(vec![value])
    }
}

impl From<&String> for HeaderValues {
    fn from(value: &String) -> Self {
        Self(vec![value.clone()])
    }
}

impl From<Vec<String>> for HeaderValues {
    fn from(values: Vec<String>) -> Self {
        Self(values)
    }
}

impl From<Vec<&str>> for HeaderValues {
    fn from(values: Vec<&str>) -> Self {
        Self(values.into_iter().map(ToOwned::to_owned).collect())
    }
}

impl From<&[&str]> for HeaderValues {
    fn from(values: &[&str]) -> Self {
        Self(values.iter().map(|v| (*v).to_owned()).collect())
    }
}

impl From<&[String]> for HeaderValues {
    fn from(values: &[String]) -> Self {
        Self(values.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for HeaderValues {
    fn from(values: [&str; N]) -> Self {
        Self(values.iter().map(|v| (*v).to_owned()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct HeaderEntry {
    name: String,
    values: Vec<String>,
}

/// Ordered, case-insensitive header multimap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderCollection {
    entries: Vec<HeaderEntry>,
}

impl HeaderCollection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every value stored under `name`.
    ///
    /// Setting an empty value list removes the header.
    ///
    /// # Errors
    /// Returns an error if the name is not a valid HTTP token or a value
    /// contains control characters.
    pub fn set(&mut self, name: &str, values: impl Into<HeaderValues>) -> Result<(), HttpError> {
        let values = values.into().into_vec();
        validate(name, &values)?;

        if values.is_empty() {
            self.remove(name);
            return Ok(());
        }

        match self.position(name) {
            Some(idx) => self.entries[idx].values = values,
            None => self.entries.push(HeaderEntry {
                name: name.to_owned(),
                values,
            }),
        }
        Ok(())
    }

    /// Append values to whatever is already stored under `name`.
    ///
    /// # Errors
    /// Same validation as [`HeaderCollection::set`].
    pub fn add(&mut self, name: &str, values: impl Into<HeaderValues>) -> Result<(), HttpError> {
        let values = values.into().into_vec();
        validate(name, &values)?;

        if values.is_empty() {
            return Ok(());
        }

        match self.position(name) {
            Some(idx) => self.entries[idx].values.extend(values),
            None => self.entries.push(HeaderEntry {
                name: name.to_owned(),
                values,
            }),
        }
        Ok(())
    }

    /// Values stored under `name`, in insertion order.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.position(name)
            .map(|idx| self.entries[idx].values.as_slice())
    }

    /// First value stored under `name`.
    #[must_use]
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values under `name` joined with `", "`.
    #[must_use]
    pub fn get_joined(&self, name: &str) -> Option<String> {
        self.get(name).map(|values| values.join(", "))
    }

    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove `name`, returning its values if it was present.
    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.position(name)
            .map(|idx| self.entries.remove(idx).values)
    }

    /// Every header with its originally-cased name, in insertion order.
    pub fn all(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.values.as_slice()))
    }

    /// Number of distinct header names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append every header of `other`.
    pub fn add_all(&mut self, other: &HeaderCollection) {
        for entry in &other.entries {
            match self.position(&entry.name) {
                Some(idx) => self.entries[idx]
                    .values
                    .extend(entry.values.iter().cloned()),
                None => self.entries.push(entry.clone()),
            }
        }
    }

    /// Replace headers with the values of `other`, name by name.
    pub fn set_all(&mut self, other: &HeaderCollection) {
        for entry in &other.entries {
            match self.position(&entry.name) {
                Some(idx) => self.entries[idx].values.clone_from(&entry.values),
                None => self.entries.push(entry.clone()),
            }
        }
    }

    /// Convert into an [`http::HeaderMap`] for the wire.
    ///
    /// # Errors
    /// Returns an error if a stored name or value cannot be represented.
    pub fn to_header_map(&self) -> Result<HeaderMap, HttpError> {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for entry in &self.entries {
            let name = HeaderName::from_bytes(entry.name.as_bytes())?;
            for value in &entry.values {
                map.append(name.clone(), HeaderValue::from_str(value)?);
            }
        }
        Ok(map)
    }

    /// Build a collection from a received [`http::HeaderMap`].
    ///
    /// Values that are not valid UTF-8 are converted lossily.
    #[must_use]
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        for (name, value) in map {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            match headers.position(name.as_str()) {
                Some(idx) => headers.entries[idx].values.push(value),
                None => headers.entries.push(HeaderEntry {
                    name: name.as_str().to_owned(),
                    values: vec![value],
                }),
            }
        }
        headers
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(name))
    }
}

fn validate(name: &str, values: &[String]) -> Result<(), HttpError> {
    HeaderName::from_bytes(name.as_bytes())?;
    for value in values {
        HeaderValue::from_str(value)?;
    }
    Ok(())
}
