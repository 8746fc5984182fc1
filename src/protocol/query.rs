//! Query strings and value converters.
//!
//! Parameters keep insertion order. Typed values are turned into strings by a
//! [`QueryConverter`]; converters are stateless and shared through a [`ConverterRegistry`]
//! owned by the client, so each converter type is instantiated once per registry.
//!
//! ```
//! use dockhand::protocol::{ConverterRegistry, JsonQueryConverter, QueryString};
//! use std::collections::HashMap;
//!
//! let registry = ConverterRegistry::new();
//! let mut filters = HashMap::new();
//! filters.insert("label", vec!["app=web"]);
//!
//! let mut query = QueryString::new();
//! query
//!     .append_with::<JsonQueryConverter, _>(&registry, "filters", &filters)
//!     .unwrap();
//! assert_eq!(query.encode(), "filters=%7B%22label%22%3A%5B%22app%3Dweb%22%5D%7D");
//! ```

use crate::error::Result;
use parking_lot::RwLock;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

/// Ordered list of query parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryString {
    params: Vec<(String, String)>,
}

impl QueryString {
    /// Create an empty query string.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one parameter. Repeated keys are kept.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Append `value` converted by the registry's instance of `C`. A converter may produce
    /// several values, each becomes its own `key=value` pair.
    pub fn append_with<C, T>(
        &mut self,
        registry: &ConverterRegistry,
        key: &str,
        value: &T,
    ) -> Result<&mut Self>
    where
        C: QueryConverter<T> + Default + 'static,
        T: ?Sized,
    {
        let converter = registry.get::<C>();
        for converted in converter.convert(value)? {
            self.params.push((key.to_string(), converted));
        }
        Ok(self)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True if no parameter was added.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Iterate over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Form-encode the parameters, without a leading `?`.
    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params.iter())
            .finish()
    }
}

impl fmt::Display for QueryString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryString {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        QueryString {
            params: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Turns a typed value into query parameter values.
pub trait QueryConverter<T: ?Sized>: Send + Sync {
    /// Convert `value`. An empty vector omits the parameter.
    fn convert(&self, value: &T) -> Result<Vec<String>>;
}

/// Serializes the value as compact JSON, e.g. for `filters`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonQueryConverter;

impl<T: Serialize + ?Sized> QueryConverter<T> for JsonQueryConverter {
    fn convert(&self, value: &T) -> Result<Vec<String>> {
        Ok(vec![serde_json::to_string(value)?])
    }
}

/// Renders a duration as seconds; whole seconds have no fractional part.
#[derive(Debug, Default, Clone, Copy)]
pub struct DurationSecondsConverter;

impl QueryConverter<Duration> for DurationSecondsConverter {
    fn convert(&self, value: &Duration) -> Result<Vec<String>> {
        let rendered = if value.subsec_nanos() == 0 {
            value.as_secs().to_string()
        } else {
            value.as_secs_f64().to_string()
        };
        Ok(vec![rendered])
    }
}

/// Uses the value's [`Display`] implementation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisplayQueryConverter;

impl<T: Display + ?Sized> QueryConverter<T> for DisplayQueryConverter {
    fn convert(&self, value: &T) -> Result<Vec<String>> {
        Ok(vec![value.to_string()])
    }
}

/// Concurrency-safe cache of converter instances keyed by converter type.
#[derive(Default)]
pub struct ConverterRegistry {
    converters: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ConverterRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared instance of `C`, creating it on first use.
    pub fn get<C>(&self) -> Arc<C>
    where
        C: Default + Send + Sync + 'static,
    {
        let id = TypeId::of::<C>();
        if let Some(existing) = self.converters.read().get(&id).cloned() {
            if let Ok(converter) = existing.downcast::<C>() {
                return converter;
            }
        }

        let mut converters = self.converters.write();
        let entry = converters
            .entry(id)
            .or_insert_with(|| Arc::new(C::default()) as Arc<dyn Any + Send + Sync>)
            .clone();
        match entry.downcast::<C>() {
            Ok(converter) => converter,
            // entries are keyed by their own TypeId
            Err(_) => Arc::new(C::default()),
        }
    }

    /// Number of converter types instantiated so far.
    pub fn len(&self) -> usize {
        self.converters.read().len()
    }

    /// True if no converter was requested yet.
    pub fn is_empty(&self) -> bool {
        self.converters.read().is_empty()
    }
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("converters", &self.len())
            .finish()
    }
}
