//! Named middleware factories.
//!
//! Callers describe a chain as a list of `{ key, options }` references. A
//! [`Registry`] turns each one into a concrete [`Step`] by looking the key up
//! and handing the options to its factory. Resolution happens before a run
//! starts, so an unknown key or bad options is an [`Error`], never a
//! timeline entry.
//!
//! [`Registry::with_builtins`] ships the stock set from [`builtin`].

pub mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::step::Step;

/// A reference to a registered middleware, as it arrives from a caller.
#[derive(Clone, Debug, Deserialize)]
pub struct StepRef {
    pub key: String,
    #[serde(default)]
    pub options: Value,
}

impl StepRef {
    pub fn new(key: &str) -> Self {
        Self { key: key.to_owned(), options: Value::Null }
    }

    pub fn with_options(key: &str, options: Value) -> Self {
        Self { key: key.to_owned(), options }
    }
}

type Factory = Arc<dyn Fn(&Value) -> Result<Step, Error> + Send + Sync + 'static>;

struct Entry {
    description: String,
    factory: Factory,
}

/// One line of [`Registry::catalog`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub key: String,
    pub description: String,
}

/// Middleware factories keyed by name.
///
/// Build it once at startup; every `register` call returns `self` so
/// registrations chain.
#[derive(Default)]
pub struct Registry {
    entries: BTreeMap<String, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in middleware.
    pub fn with_builtins() -> Self {
        builtin::register_all(Self::new())
    }

    /// Registers `factory` under `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is empty or already registered.
    pub fn register<F>(mut self, key: &str, description: &str, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Step, Error> + Send + Sync + 'static,
    {
        assert!(!key.trim().is_empty(), "middleware key must not be empty");
        let entry = Entry { description: description.to_owned(), factory: Arc::new(factory) };
        if self.entries.insert(key.to_owned(), entry).is_some() {
            panic!("middleware `{key}` registered twice");
        }
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Builds the step for one reference.
    pub fn build(&self, step: &StepRef) -> Result<Step, Error> {
        let entry = self.entries
            .get(&step.key)
            .ok_or_else(|| Error::UnknownMiddleware(step.key.clone()))?;
        (entry.factory)(&step.options)
    }

    /// Builds every step of a chain, failing on the first bad reference.
    pub fn resolve(&self, chain: &[StepRef]) -> Result<Vec<Step>, Error> {
        chain.iter().map(|s| self.build(s)).collect()
    }

    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.entries
            .iter()
            .map(|(key, e)| CatalogEntry { key: key.clone(), description: e.description.clone() })
            .collect()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Deserializes a factory's options, treating `null` as `{}`.
pub fn parse_options<T>(key: &str, options: &Value) -> Result<T, Error>
where
    T: for<'de> Deserialize<'de>,
{
    let options = match options {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(options).map_err(|e| Error::InvalidOptions {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}
