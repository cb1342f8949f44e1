//! Work payload registry.
//!
//! Maps payload kind names to constructors so applications can build
//! pipelines from configuration. Registration order is preserved for
//! deterministic listings.

use crate::work::Work;
use cadence_core::{CoreError, CoreResult};
use indexmap::IndexMap;

type WorkCtor = Box<dyn Fn() -> Box<dyn Work>>;

/// Named constructors for work payloads.
#[derive(Default)]
pub struct WorkRegistry {
    ctors: IndexMap<String, WorkCtor>,
}

impl WorkRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under a kind name.
    ///
    /// # Errors
    ///
    /// Returns an error when the name is already registered.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        ctor: impl Fn() -> Box<dyn Work> + 'static,
    ) -> CoreResult<()> {
        let kind = kind.into();
        if self.ctors.contains_key(&kind) {
            return Err(CoreError::AlreadyExists {
                kind: "Work".to_string(),
                name: kind,
            });
        }
        self.ctors.insert(kind, Box::new(ctor));
        Ok(())
    }

    /// Construct a payload by kind name.
    ///
    /// # Errors
    ///
    /// Returns an error when no constructor is registered under the name.
    pub fn construct(&self, kind: &str) -> CoreResult<Box<dyn Work>> {
        let ctor = self.ctors.get(kind).ok_or_else(|| CoreError::NotFound {
            kind: "Work".to_string(),
            name: kind.to_string(),
        })?;
        Ok(ctor())
    }

    /// Whether a kind name is registered
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.ctors.contains_key(kind)
    }

    /// Registered kind names in registration order
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.ctors.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for WorkRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkRegistry")
            .field("kinds", &self.ctors.keys().collect::<Vec<_>>())
            .finish()
    }
}
