use chrono::Utc;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::model::{Entity, EntityId, VersionToken};
use crate::store::memory::{MemoryStore, Tables};
use crate::store::traits::{ConflictingEntity, EntityViolations, Repository, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    Unchanged,
    Added,
    Modified,
}

#[derive(Debug, Clone)]
struct Entry<E> {
    entity: E,
    state: EntityState,
    /// Token the stored row must carry for a write to be accepted
    original_version: VersionToken,
}

/// Tracked entities of one type
struct EntitySet<E> {
    entries: BTreeMap<EntityId, Entry<E>>,
    added: Vec<E>,
}

impl<E> Default for EntitySet<E> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            added: Vec::new(),
        }
    }
}

/// Type-erased view of an [`EntitySet`] used while saving
trait TrackedSet: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn has_changes(&self) -> bool;

    fn violations(&self) -> Vec<EntityViolations>;

    fn first_conflict(&self, tables: &Tables) -> Option<ConflictingEntity>;

    /// Writes pending changes; returns how many rows were written
    fn commit(&mut self, tables: &mut Tables) -> usize;

    /// Re-reads the relations of every tracked entity from `tables`
    fn hydrate(&mut self, tables: &Tables);
}

impl<E: Entity> TrackedSet for EntitySet<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn has_changes(&self) -> bool {
        !self.added.is_empty()
            || self
                .entries
                .values()
                .any(|entry| entry.state == EntityState::Modified)
    }

    fn violations(&self) -> Vec<EntityViolations> {
        let modified = self
            .entries
            .values()
            .filter(|entry| entry.state == EntityState::Modified)
            .map(|entry| &entry.entity);

        modified
            .chain(self.added.iter())
            .filter_map(|entity| {
                let violations = entity.validate();
                (!violations.is_empty()).then(|| EntityViolations {
                    type_name: E::TYPE_NAME,
                    id: entity.id(),
                    violations,
                })
            })
            .collect()
    }

    fn first_conflict(&self, tables: &Tables) -> Option<ConflictingEntity> {
        self.entries
            .values()
            .filter(|entry| entry.state == EntityState::Modified)
            .find_map(|entry| {
                let id = entry.entity.id();
                match tables.get::<E>(id) {
                    Some(stored) if *stored.version() == entry.original_version => None,
                    _ => Some(ConflictingEntity::new::<E>(id, tables.load::<E>(id))),
                }
            })
    }

    fn commit(&mut self, tables: &mut Tables) -> usize {
        let mut written = 0;

        for entry in self.entries.values_mut() {
            if entry.state != EntityState::Modified {
                continue;
            }
            let version = tables.next_version();
            entry.entity.meta_mut().version = version.clone();
            tables.put(entry.entity.clone());
            entry.state = EntityState::Unchanged;
            entry.original_version = version;
            written += 1;
        }

        for mut entity in self.added.drain(..) {
            if entity.id() == 0 {
                entity.meta_mut().id = tables.next_id();
            }
            let version = tables.next_version();
            entity.meta_mut().version = version.clone();
            tables.put(entity.clone());
            self.entries.insert(
                entity.id(),
                Entry {
                    entity,
                    state: EntityState::Unchanged,
                    original_version: version,
                },
            );
            written += 1;
        }

        written
    }

    fn hydrate(&mut self, tables: &Tables) {
        for entry in self.entries.values_mut() {
            entry.entity.hydrate_relations(tables);
        }
    }
}

/// Request-scoped unit of work over a shared [`MemoryStore`].
///
/// Keeps an identity map per entity type and writes every pending change in
/// one store transaction. Create one per request; never share it.
pub struct UnitOfWork {
    store: Arc<MemoryStore>,
    sets: HashMap<TypeId, Box<dyn TrackedSet>>,
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("tracked_types", &self.sets.len())
            .finish()
    }
}

impl UnitOfWork {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            sets: HashMap::new(),
        }
    }

    fn set<E: Entity>(&self) -> Option<&EntitySet<E>> {
        self.sets
            .get(&TypeId::of::<E>())
            .and_then(|set| set.as_any().downcast_ref::<EntitySet<E>>())
    }

    fn set_mut<E: Entity>(&mut self) -> &mut EntitySet<E> {
        let set = self
            .sets
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(EntitySet::<E>::default()));
        match set.as_any_mut().downcast_mut::<EntitySet<E>>() {
            Some(set) => set,
            None => unreachable!("tracked sets are keyed by the TypeId of their entity"),
        }
    }

    fn track<E: Entity>(&mut self, entity: E, state: EntityState) -> E {
        let original_version = entity.version().clone();
        self.set_mut::<E>().entries.insert(
            entity.id(),
            Entry {
                entity: entity.clone(),
                state,
                original_version,
            },
        );
        entity
    }

    pub fn state_of<E: Entity>(&self, id: EntityId) -> Option<EntityState> {
        let set = self.set::<E>()?;
        set.entries.get(&id).map(|entry| entry.state)
    }

    pub fn has_changes(&self) -> bool {
        self.sets.values().any(|set| set.has_changes())
    }

    /// The tracked instance with `id`, or a newly attached id-only stub.
    /// Never queries the store.
    pub fn resolve_stub<R: Entity>(&mut self, id: EntityId) -> R {
        let stub = R::stub(id);
        if let Some(local) = self.get_from_local(&stub) {
            return local;
        }
        log::debug!("Attaching {} {} as an unchanged stub", R::TYPE_NAME, id);
        self.attach(stub)
    }

    /// Replaces the tracked instance with the stored row, discarding local changes
    pub fn reload<E: Entity>(&mut self, id: EntityId) -> Result<E, StoreError> {
        let stored = self.store.find::<E>(id).ok_or(StoreError::NotFound {
            type_name: E::TYPE_NAME,
            id,
        })?;
        Ok(self.track(stored, EntityState::Unchanged))
    }
}

impl<E: Entity> Repository<E> for UnitOfWork {
    fn get_by_id(&mut self, id: EntityId) -> Option<E> {
        if let Some(entry) = self.set::<E>().and_then(|set| set.entries.get(&id)) {
            return Some(entry.entity.clone());
        }
        let stored = self.store.find::<E>(id)?;
        Some(self.track(stored, EntityState::Unchanged))
    }

    fn get_from_local(&self, entity: &E) -> Option<E> {
        let set = self.set::<E>()?;
        set.entries
            .get(&entity.id())
            .map(|entry| entry.entity.clone())
    }

    fn attach(&mut self, entity: E) -> E {
        if let Some(local) = self.get_from_local(&entity) {
            return local;
        }
        self.track(entity, EntityState::Unchanged)
    }

    fn add(&mut self, mut entity: E) -> E {
        let now = Utc::now();
        entity.meta_mut().created = now;
        entity.meta_mut().modified = now;
        self.set_mut::<E>().added.push(entity.clone());
        entity
    }

    fn update(&mut self, mut entity: E) -> E {
        entity.meta_mut().modified = Utc::now();
        self.track(entity, EntityState::Modified)
    }

    fn create(&self) -> E {
        let mut entity = E::default();
        let now = Utc::now();
        entity.meta_mut().created = now;
        entity.meta_mut().modified = now;
        entity
    }

    fn get_all(&self) -> Vec<E> {
        let mut all = self.store.all::<E>();
        if let Some(set) = self.set::<E>() {
            for entity in all.iter_mut() {
                if let Some(entry) = set.entries.get(&entity.id()) {
                    *entity = entry.entity.clone();
                }
            }
        }
        all
    }

    fn save_changes(&mut self) -> Result<(), StoreError> {
        let violations: Vec<EntityViolations> = self
            .sets
            .values()
            .flat_map(|set| set.violations())
            .collect();
        if !violations.is_empty() {
            log::warn!("Save rejected: {} entit(y/ies) failed validation", violations.len());
            return Err(StoreError::Validation(violations));
        }

        let sets = &mut self.sets;
        let written = self.store.transaction(|tables| {
            let current: &Tables = tables;
            if let Some(conflict) = sets.values().find_map(|set| set.first_conflict(current)) {
                return Err(StoreError::ConcurrentUpdate(conflict));
            }
            let written = sets.values_mut().map(|set| set.commit(tables)).sum::<usize>();
            // Stubs written as relations are now backed by the stored rows
            sets.values_mut().for_each(|set| set.hydrate(tables));
            Ok(written)
        });

        match &written {
            Ok(count) => log::info!("Saved {} row(s)", count),
            Err(error) => log::warn!("Save rejected: {}", error),
        }
        written.map(|_| ())
    }
}
