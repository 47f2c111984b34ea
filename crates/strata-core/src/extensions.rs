//! Typed extension storage shared by the server, suite, and request scopes.

use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A type-keyed map of shared values.
///
/// Values are stored behind `Arc` so readers get a cheap handle without
/// holding the lock. Interior mutability lets every holder of a scope insert
/// and remove values through a shared reference.
///
/// # Example
///
/// ```
/// use strata_core::Extensions;
///
/// #[derive(Debug, PartialEq)]
/// struct PoolSize(usize);
///
/// let ext = Extensions::new();
/// ext.insert(PoolSize(8));
/// assert_eq!(*ext.get::<PoolSize>().unwrap(), PoolSize(8));
/// ```
#[derive(Default)]
pub struct Extensions {
    map: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Extensions {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, replacing any previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.insert_shared(Arc::new(value));
    }

    /// Stores an already shared value.
    pub fn insert_shared<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.map.write().insert(TypeId::of::<T>(), value);
    }

    /// Returns the value of type `T`, if present.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let value = self.map.read().get(&TypeId::of::<T>()).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Removes and returns the value of type `T`.
    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let value = self.map.write().remove(&TypeId::of::<T>())?;
        value.downcast::<T>().ok()
    }

    /// Checks whether a value of type `T` is stored.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map.read().contains_key(&TypeId::of::<T>())
    }

    /// Returns the number of stored values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// Drops every stored value.
    pub fn clear(&self) {
        self.map.write().clear();
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.len())
            .finish()
    }
}
