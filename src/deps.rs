use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

/// Services shared with every action, keyed by type.
#[derive(Default, Clone)]
pub struct Dependencies {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    names: HashMap<TypeId, &'static str>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `value` available to actions. Providing the same type again
    /// replaces the earlier value.
    pub fn provide<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.provide_arc(Arc::new(value))
    }

    pub fn provide_arc<T: Any + Send + Sync>(&mut self, value: Arc<T>) -> &mut Self {
        let id = TypeId::of::<T>();
        if self.values.insert(id, value).is_some() {
            debug!("Dependency {} replaced", type_name::<T>());
        }
        self.names.insert(id, type_name::<T>());
        self
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let value = self.values.get(&TypeId::of::<T>())?;
        Arc::clone(value).downcast::<T>().ok()
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names.values()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Greeter {
        name: String,
    }

    #[test]
    fn test_provide_and_get() {
        let mut deps = Dependencies::new();
        deps.provide(Greeter {
            name: "My Service".to_string(),
        })
        .provide(42u32);

        assert_eq!(deps.len(), 2);
        assert_eq!(deps.get::<Greeter>().unwrap().name, "My Service");
        assert_eq!(*deps.get::<u32>().unwrap(), 42);
        assert!(deps.get::<String>().is_none());
        assert!(!deps.contains::<u64>());
    }

    #[test]
    fn test_provide_same_type_replaces() {
        let mut deps = Dependencies::new();
        deps.provide(1u8).provide(2u8);
        assert_eq!(deps.len(), 1);
        assert_eq!(*deps.get::<u8>().unwrap(), 2);
    }

    #[test]
    fn test_shared_arc_is_not_copied() {
        let shared = Arc::new(Greeter {
            name: "shared".to_string(),
        });
        let mut deps = Dependencies::new();
        deps.provide_arc(Arc::clone(&shared));
        assert!(Arc::ptr_eq(&shared, &deps.get::<Greeter>().unwrap()));
    }
}
