//! Resolved content type cache.
//!
//! Descriptors are built once from the content type repository and replaced
//! wholesale on change. Lookups by alias or key go through secondary indexes
//! that point at the id; a reader that finds an index entry whose descriptor
//! was just evicted simply resolves the type again.
//!
//! Every clear is stamped with an invalidation epoch. A reader remembers the
//! epoch it started resolving at and only publishes its descriptor, under the
//! id's map entry, if nothing touching that type was cleared meanwhile.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;
use uuid::Uuid;

use crate::application::convert::ConverterRegistry;
use crate::application::repos::{ContentTypeRepository, RepoError};
use crate::domain::content_type::ContentTypeRef;
use crate::domain::error::PublishedError;
use crate::domain::types::ItemKind;
use crate::published::content_type::ContentTypeDescriptor;

const SOURCE: &str = "cache::content_types";

pub struct ContentTypeCache {
    repository: Arc<dyn ContentTypeRepository>,
    registry: ConverterRegistry,
    by_id: DashMap<i32, Arc<ContentTypeDescriptor>>,
    by_alias: DashMap<(ItemKind, String), i32>,
    by_key: DashMap<Uuid, i32>,
    epoch: AtomicU64,
    cleared_all_at: AtomicU64,
    cleared_ids: DashMap<i32, u64>,
    cleared_data_types: DashMap<i32, u64>,
}

impl ContentTypeCache {
    pub fn new(repository: Arc<dyn ContentTypeRepository>, registry: ConverterRegistry) -> Self {
        Self {
            repository,
            registry,
            by_id: DashMap::new(),
            by_alias: DashMap::new(),
            by_key: DashMap::new(),
            epoch: AtomicU64::new(0),
            cleared_all_at: AtomicU64::new(0),
            cleared_ids: DashMap::new(),
            cleared_data_types: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Resolves a descriptor, building it from the repository on first use.
    pub fn get(
        &self,
        kind: ItemKind,
        reference: &ContentTypeRef,
    ) -> Result<Arc<ContentTypeDescriptor>, PublishedError> {
        loop {
            if let Some(cached) = self.cached(kind, reference) {
                return Ok(cached);
            }
            if let Some(descriptor) = self.resolve(kind, reference)? {
                return Ok(descriptor);
            }
            debug!(
                target_module = SOURCE,
                kind = kind.as_str(),
                reference = %reference,
                result = "cleared_while_resolving",
                "Content type changed during resolution, resolving again"
            );
        }
    }

    /// Builds and publishes a descriptor. `None` when the type was cleared
    /// while the repository was being read.
    fn resolve(
        &self,
        kind: ItemKind,
        reference: &ContentTypeRef,
    ) -> Result<Option<Arc<ContentTypeDescriptor>>, PublishedError> {
        let started = self.epoch.load(Ordering::Acquire);
        let definition = self
            .repository
            .resolve(kind, reference)
            .map_err(|err| match err {
                RepoError::NotFound => PublishedError::not_found("content type", reference),
                other => PublishedError::Repository(other),
            })?;
        if definition.kind != kind {
            return Err(PublishedError::not_found("content type", reference));
        }

        let built = Arc::new(ContentTypeDescriptor::build(definition, &self.registry)?);
        let descriptor = match self.by_id.entry(built.id) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(_) if self.cleared_since(&built, started) => return Ok(None),
            Entry::Vacant(vacant) => Arc::clone(vacant.insert(built).value()),
        };
        self.by_alias
            .insert((kind, descriptor.alias.to_lowercase()), descriptor.id);
        self.by_key.insert(descriptor.key, descriptor.id);
        debug!(
            target_module = SOURCE,
            kind = kind.as_str(),
            content_type = %descriptor.alias,
            id = descriptor.id,
            "Resolved content type"
        );
        Ok(Some(descriptor))
    }

    fn cleared_since(&self, descriptor: &ContentTypeDescriptor, started: u64) -> bool {
        self.cleared_all_at.load(Ordering::Acquire) > started
            || self
                .cleared_ids
                .get(&descriptor.id)
                .is_some_and(|at| *at > started)
            || self
                .cleared_data_types
                .iter()
                .any(|entry| *entry.value() > started && descriptor.uses_data_type(*entry.key()))
    }

    fn next_epoch(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn cached(
        &self,
        kind: ItemKind,
        reference: &ContentTypeRef,
    ) -> Option<Arc<ContentTypeDescriptor>> {
        let id = match reference {
            ContentTypeRef::Id(id) => *id,
            ContentTypeRef::Key(key) => *self.by_key.get(key)?,
            ContentTypeRef::Alias(alias) => *self.by_alias.get(&(kind, alias.to_lowercase()))?,
        };
        self.by_id
            .get(&id)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|descriptor| descriptor.kind == kind)
    }

    /// Currently cached descriptors, in no particular order.
    pub fn cached_descriptors(&self) -> Vec<Arc<ContentTypeDescriptor>> {
        self.by_id
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn clear_all(&self) -> usize {
        let at = self.next_epoch();
        self.cleared_all_at.store(at, Ordering::Release);
        let removed = self.by_id.len();
        self.by_id.clear();
        self.by_alias.clear();
        self.by_key.clear();
        debug!(target_module = SOURCE, removed, "Cleared content type cache");
        removed
    }

    pub fn clear_type(&self, id: i32) -> Option<Arc<ContentTypeDescriptor>> {
        let at = self.next_epoch();
        self.cleared_ids.insert(id, at);
        let (_, removed) = self.by_id.remove(&id)?;
        self.by_alias
            .remove_if(&(removed.kind, removed.alias.to_lowercase()), |_, mapped| {
                *mapped == id
            });
        self.by_key.remove_if(&removed.key, |_, mapped| *mapped == id);
        debug!(
            target_module = SOURCE,
            content_type = %removed.alias,
            id,
            "Evicted content type"
        );
        Some(removed)
    }

    pub fn clear_types(&self, ids: &[i32]) -> Vec<Arc<ContentTypeDescriptor>> {
        ids.iter().filter_map(|id| self.clear_type(*id)).collect()
    }

    /// Evicts every cached type with a property using `data_type_id`.
    pub fn clear_by_data_type(&self, data_type_id: i32) -> Vec<Arc<ContentTypeDescriptor>> {
        let at = self.next_epoch();
        self.cleared_data_types.insert(data_type_id, at);
        let ids: Vec<i32> = self
            .by_id
            .iter()
            .filter(|entry| entry.value().uses_data_type(data_type_id))
            .map(|entry| *entry.key())
            .collect();
        self.clear_types(&ids)
    }
}

impl std::fmt::Debug for ContentTypeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentTypeCache")
            .field("cached", &self.by_id.len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::thread;

    use crate::domain::content_type::{ContentTypeDefinition, PropertyTypeDefinition};

    use super::*;

    struct CountingRepository {
        definitions: Vec<ContentTypeDefinition>,
        resolves: AtomicUsize,
    }

    impl ContentTypeRepository for CountingRepository {
        fn resolve(
            &self,
            kind: ItemKind,
            reference: &ContentTypeRef,
        ) -> Result<ContentTypeDefinition, RepoError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            self.definitions
                .iter()
                .find(|definition| definition.kind == kind && reference.matches(definition))
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        fn list(&self, kind: ItemKind) -> Result<Vec<ContentTypeDefinition>, RepoError> {
            Ok(self
                .definitions
                .iter()
                .filter(|definition| definition.kind == kind)
                .cloned()
                .collect())
        }
    }

    fn definition(id: i32, alias: &str, data_type_id: i32) -> ContentTypeDefinition {
        ContentTypeDefinition {
            id,
            key: Uuid::new_v4(),
            alias: alias.to_string(),
            kind: ItemKind::Document,
            properties: vec![PropertyTypeDefinition::new("body", data_type_id, "text")],
        }
    }

    fn cache() -> (ContentTypeCache, Arc<CountingRepository>) {
        let repository = Arc::new(CountingRepository {
            definitions: vec![
                definition(1, "article", 42),
                definition(2, "page", 42),
                definition(3, "home", 7),
            ],
            resolves: AtomicUsize::new(0),
        });
        let cache = ContentTypeCache::new(repository.clone(), ConverterRegistry::with_builtins());
        (cache, repository)
    }

    #[test]
    fn lookups_by_id_alias_and_key_share_one_descriptor() {
        let (cache, repository) = cache();
        let by_alias = cache
            .get(ItemKind::Document, &ContentTypeRef::alias("Article"))
            .expect("by alias");
        let by_id = cache
            .get(ItemKind::Document, &ContentTypeRef::Id(1))
            .expect("by id");
        let by_key = cache
            .get(ItemKind::Document, &ContentTypeRef::Key(by_alias.key))
            .expect("by key");

        assert!(Arc::ptr_eq(&by_alias, &by_id));
        assert!(Arc::ptr_eq(&by_alias, &by_key));
        assert_eq!(repository.resolves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn missing_type_is_not_found() {
        let (cache, _) = cache();
        let err = cache
            .get(ItemKind::Document, &ContentTypeRef::alias("missing"))
            .expect_err("missing");
        assert!(err.is_not_found());
        let err = cache
            .get(ItemKind::Media, &ContentTypeRef::Id(1))
            .expect_err("wrong kind");
        assert!(err.is_not_found());
    }

    #[test]
    fn clear_type_forces_rebuild() {
        let (cache, repository) = cache();
        let first = cache
            .get(ItemKind::Document, &ContentTypeRef::Id(1))
            .expect("first");
        assert!(cache.clear_type(1).is_some());
        assert!(cache.clear_type(1).is_none());
        let second = cache
            .get(ItemKind::Document, &ContentTypeRef::alias("article"))
            .expect("second");
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(repository.resolves.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_by_data_type_evicts_every_user() {
        let (cache, _) = cache();
        for id in [1, 2, 3] {
            cache
                .get(ItemKind::Document, &ContentTypeRef::Id(id))
                .expect("resolve");
        }

        let mut removed: Vec<i32> = cache
            .clear_by_data_type(42)
            .iter()
            .map(|descriptor| descriptor.id)
            .collect();
        removed.sort_unstable();
        assert_eq!(removed, vec![1, 2]);
        assert_eq!(cache.len(), 1);

        assert_eq!(cache.clear_all(), 1);
        assert!(cache.is_empty());
    }

    /// Hands out the alias current at call time, parking the first call
    /// between reading the definition and returning it.
    struct SlowRepository {
        alias: Mutex<String>,
        parked: AtomicBool,
        entered: Barrier,
        release: Barrier,
        resolves: AtomicUsize,
    }

    impl SlowRepository {
        fn new() -> Self {
            Self {
                alias: Mutex::new("article".to_string()),
                parked: AtomicBool::new(false),
                entered: Barrier::new(2),
                release: Barrier::new(2),
                resolves: AtomicUsize::new(0),
            }
        }
    }

    impl ContentTypeRepository for SlowRepository {
        fn resolve(
            &self,
            _kind: ItemKind,
            _reference: &ContentTypeRef,
        ) -> Result<ContentTypeDefinition, RepoError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            let alias = self.alias.lock().expect("alias").clone();
            let resolved = definition(1, &alias, 42);
            if !self.parked.swap(true, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            Ok(resolved)
        }

        fn list(&self, _kind: ItemKind) -> Result<Vec<ContentTypeDefinition>, RepoError> {
            Ok(Vec::new())
        }
    }

    fn clear_during_resolution(clear: impl FnOnce(&ContentTypeCache)) {
        let repository = Arc::new(SlowRepository::new());
        let cache = ContentTypeCache::new(repository.clone(), ConverterRegistry::with_builtins());

        let resolved = thread::scope(|scope| {
            let reader = scope.spawn(|| cache.get(ItemKind::Document, &ContentTypeRef::Id(1)));
            repository.entered.wait();
            *repository.alias.lock().expect("alias") = "renamed".to_string();
            clear(&cache);
            repository.release.wait();
            reader.join().expect("reader thread")
        })
        .expect("resolved");

        assert_eq!(resolved.alias, "renamed");
        let cached = cache
            .get(ItemKind::Document, &ContentTypeRef::Id(1))
            .expect("cached");
        assert!(Arc::ptr_eq(&resolved, &cached));
        assert_eq!(repository.resolves.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_type_during_resolution_is_not_lost() {
        clear_during_resolution(|cache| {
            assert!(cache.clear_type(1).is_none());
        });
    }

    #[test]
    fn clear_by_data_type_during_resolution_is_not_lost() {
        clear_during_resolution(|cache| {
            assert!(cache.clear_by_data_type(42).is_empty());
        });
    }

    #[test]
    fn clear_all_during_resolution_is_not_lost() {
        clear_during_resolution(|cache| {
            assert_eq!(cache.clear_all(), 0);
        });
    }

    #[test]
    fn unrelated_clears_do_not_force_a_second_resolution() {
        let repository = Arc::new(SlowRepository::new());
        let cache = ContentTypeCache::new(repository.clone(), ConverterRegistry::with_builtins());

        thread::scope(|scope| {
            let reader = scope.spawn(|| cache.get(ItemKind::Document, &ContentTypeRef::Id(1)));
            repository.entered.wait();
            cache.clear_type(2);
            cache.clear_by_data_type(7);
            repository.release.wait();
            reader.join().expect("reader thread").expect("resolved");
        });

        assert_eq!(cache.len(), 1);
        assert_eq!(repository.resolves.load(Ordering::SeqCst), 1);
    }
}
