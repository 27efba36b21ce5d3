use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::descriptor::{Entry, EntityDescriptor};
use crate::error::PersistenceError;

type Erased = Arc<dyn Any + Send + Sync>;

/// Memoized entity descriptors, one per business type.
///
/// Concurrent first lookups of the same type may both build a descriptor;
/// the first one stored wins and the other is dropped.
#[derive(Default)]
pub struct SchemaRegistry {
    descriptors: RwLock<HashMap<TypeId, Erased>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and caches the descriptor of `T` up front.
    pub fn register<T: Entry>(&self) -> Result<(), PersistenceError> {
        self.describe::<T>().map(|_| ())
    }

    pub fn describe<T: Entry>(&self) -> Result<Arc<EntityDescriptor<T>>, PersistenceError> {
        let key = TypeId::of::<T>();
        {
            let descriptors = self.descriptors.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(found) = descriptors.get(&key) {
                return downcast::<T>(Arc::clone(found));
            }
        }

        let built: Erased = Arc::new(T::descriptor()?);
        debug!(entry_type = std::any::type_name::<T>(), "built entity descriptor");
        let stored = {
            let mut descriptors = self.descriptors.write().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(descriptors.entry(key).or_insert(built))
        };
        downcast::<T>(stored)
    }

    pub fn len(&self) -> usize {
        self.descriptors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn downcast<T: Entry>(erased: Erased) -> Result<Arc<EntityDescriptor<T>>, PersistenceError> {
    erased.downcast::<EntityDescriptor<T>>().map_err(|_| {
        PersistenceError::Configuration(format!(
            "cached descriptor has unexpected type for {}",
            std::any::type_name::<T>()
        ))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::descriptor::AttributeFlags;

    static BUILDS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Counted {
        dn: Option<String>,
        name: Option<String>,
    }

    impl Entry for Counted {
        fn descriptor() -> Result<EntityDescriptor<Self>, PersistenceError> {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            EntityDescriptor::<Self>::builder(["jansCounted"])
                .dn(|c| &c.dn, |c| &mut c.dn)
                .text("name", |c| &c.name, |c| &mut c.name, AttributeFlags::default())
                .build()
        }
    }

    #[derive(Default)]
    struct Broken {
        name: Option<String>,
    }

    impl Entry for Broken {
        fn descriptor() -> Result<EntityDescriptor<Self>, PersistenceError> {
            EntityDescriptor::<Self>::builder(["jansBroken"])
                .text("name", |b| &b.name, |b| &mut b.name, AttributeFlags::default())
                .build()
        }
    }

    #[test]
    fn describe_returns_shared_instance() {
        let registry = SchemaRegistry::new();
        let first = registry.describe::<Counted>().unwrap();
        let second = registry.describe::<Counted>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn concurrent_first_access_agrees_on_one_descriptor() {
        let registry = Arc::new(SchemaRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.describe::<Counted>().map(|d| Arc::as_ptr(&d) as usize))
            })
            .collect();
        let mut pointers = Vec::new();
        for handle in handles {
            pointers.push(handle.join().unwrap().unwrap());
        }
        pointers.dedup();
        assert_eq!(pointers.len(), 1);
        assert!(BUILDS.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn registering_invalid_type_fails() {
        let registry = SchemaRegistry::new();
        assert!(matches!(registry.register::<Broken>(), Err(PersistenceError::Configuration(_))));
        assert!(registry.is_empty());
    }
}
