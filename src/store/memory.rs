use chrono::Utc;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};

use crate::model::{Entity, EntityId, RowSource, VersionToken};

/// Rows of one entity type, ordered by id
struct Table<E> {
    rows: BTreeMap<EntityId, E>,
}

impl<E> Default for Table<E> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }
}

/// All tables plus the id and version counters. Only reachable through a
/// [`MemoryStore`] lock.
pub struct Tables {
    tables: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    next_id: EntityId,
    next_version: u64,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
            next_id: 1,
            next_version: 1,
        }
    }
}

impl Tables {
    fn table<E: Entity>(&self) -> Option<&Table<E>> {
        self.tables
            .get(&TypeId::of::<E>())
            .and_then(|table| table.downcast_ref::<Table<E>>())
    }

    fn table_mut<E: Entity>(&mut self) -> &mut Table<E> {
        let table = self
            .tables
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Table::<E>::default()));
        match table.downcast_mut::<Table<E>>() {
            Some(table) => table,
            None => unreachable!("tables are keyed by the TypeId of their rows"),
        }
    }

    /// The stored row as written, relations still id-only
    pub fn get<E: Entity>(&self, id: EntityId) -> Option<&E> {
        self.table::<E>()?.rows.get(&id)
    }

    /// The stored row with its relations hydrated one level deep
    pub fn load<E: Entity>(&self, id: EntityId) -> Option<E> {
        let mut row = self.get::<E>(id)?.clone();
        row.hydrate_relations(self);
        Some(row)
    }

    pub fn all<E: Entity>(&self) -> Vec<E> {
        let Some(table) = self.table::<E>() else {
            return Vec::new();
        };
        table
            .rows
            .values()
            .map(|row| {
                let mut row = row.clone();
                row.hydrate_relations(self);
                row
            })
            .collect()
    }

    pub fn put<E: Entity>(&mut self, mut entity: E) {
        entity.detach_relations();
        self.table_mut::<E>().rows.insert(entity.id(), entity);
    }

    pub fn remove<E: Entity>(&mut self, id: EntityId) -> Option<E> {
        self.table_mut::<E>().rows.remove(&id)
    }

    pub fn next_id(&mut self) -> EntityId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn next_version(&mut self) -> VersionToken {
        let version = VersionToken::from_counter(self.next_version);
        self.next_version += 1;
        version
    }
}

impl RowSource for Tables {
    fn row<E: Entity>(&self, id: EntityId) -> Option<E> {
        self.get::<E>(id).cloned()
    }
}

/// Shared in-memory row store. Every row carries a version token that is
/// replaced on each write.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `entity` outside any unit of work, assigning an id when it has
    /// none and a fresh version token
    pub fn insert<E: Entity>(&self, mut entity: E) -> E {
        let mut tables = self.tables.write();
        if entity.id() == 0 {
            entity.meta_mut().id = tables.next_id();
        } else {
            tables.next_id = tables.next_id.max(entity.id() + 1);
        }
        let now = Utc::now();
        let meta = entity.meta_mut();
        meta.created = now;
        meta.modified = now;
        meta.version = tables.next_version();
        tables.put(entity.clone());
        entity
    }

    pub fn find<E: Entity>(&self, id: EntityId) -> Option<E> {
        self.tables.read().load::<E>(id)
    }

    pub fn all<E: Entity>(&self) -> Vec<E> {
        self.tables.read().all::<E>()
    }

    pub fn count<E: Entity>(&self) -> usize {
        self.tables
            .read()
            .table::<E>()
            .map_or(0, |table| table.rows.len())
    }

    pub fn delete<E: Entity>(&self, id: EntityId) -> Option<E> {
        self.tables.write().remove::<E>(id)
    }

    /// Runs `work` while holding the write lock; nothing else reads or
    /// writes the store until it returns
    pub fn transaction<T>(&self, work: impl FnOnce(&mut Tables) -> T) -> T {
        let mut tables = self.tables.write();
        work(&mut tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{detach_reference, hydrate_reference, EntityMeta, Member};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Row {
        meta: EntityMeta,
        value: u32,
    }

    impl Entity for Row {
        const TYPE_NAME: &'static str = "Row";

        fn meta(&self) -> &EntityMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.meta
        }

        fn members() -> &'static [Member] {
            &[]
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Pointer {
        meta: EntityMeta,
        target: Option<Box<Row>>,
    }

    impl Entity for Pointer {
        const TYPE_NAME: &'static str = "Pointer";

        fn meta(&self) -> &EntityMeta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut EntityMeta {
            &mut self.meta
        }

        fn members() -> &'static [Member] {
            &[]
        }

        fn detach_relations(&mut self) {
            if let Some(target) = self.target.as_deref_mut() {
                detach_reference(target);
            }
        }

        fn hydrate_relations<S: RowSource>(&mut self, rows: &S) {
            if let Some(target) = self.target.as_deref_mut() {
                hydrate_reference(target, rows);
            }
        }
    }

    #[test]
    fn test_insert_assigns_identity_and_version() {
        let store = MemoryStore::new();
        let first = store.insert(Row::default());
        let second = store.insert(Row::default());

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert!(!first.version().is_empty());
        assert_ne!(first.version(), second.version());
        assert_eq!(store.count::<Row>(), 2);
    }

    #[test]
    fn test_explicit_ids_advance_the_counter() {
        let store = MemoryStore::new();
        let mut row = Row::default();
        row.meta.id = 10;
        store.insert(row);

        assert_eq!(store.insert(Row::default()).id(), 11);
        assert!(store.find::<Row>(10).is_some());
        assert!(store.find::<Row>(3).is_none());
    }

    #[test]
    fn test_transaction_sees_its_own_writes() {
        let store = MemoryStore::new();
        let row = store.insert(Row { value: 1, ..Row::default() });

        let value = store.transaction(|tables| {
            let mut current = tables.get::<Row>(row.id()).cloned().unwrap();
            current.value = 2;
            current.meta.version = tables.next_version();
            tables.put(current);
            tables.get::<Row>(row.id()).map(|row| row.value)
        });

        assert_eq!(value, Some(2));
        assert_ne!(store.find::<Row>(row.id()).unwrap().version(), row.version());
    }

    #[test]
    fn test_references_are_stored_by_id_and_read_hydrated() {
        let store = MemoryStore::new();
        let row = store.insert(Row { value: 1, ..Row::default() });
        let pointer = store.insert(Pointer {
            target: Some(Box::new(row.clone())),
            ..Pointer::default()
        });

        store.transaction(|tables| {
            let mut current = tables.get::<Row>(row.id()).cloned().unwrap();
            current.value = 2;
            current.meta.version = tables.next_version();
            tables.put(current);

            let stored = tables.get::<Pointer>(pointer.id()).unwrap();
            assert_eq!(stored.target.as_ref().map(|t| t.value), Some(0));
        });

        let loaded = store.find::<Pointer>(pointer.id()).unwrap();
        let target = loaded.target.as_deref().unwrap();
        assert_eq!(target.value, 2);
        assert_ne!(target.version(), row.version());
        assert_eq!(store.all::<Pointer>()[0].target.as_ref().map(|t| t.value), Some(2));
    }

    #[test]
    fn test_dangling_reference_stays_id_only() {
        let store = MemoryStore::new();
        let pointer = store.insert(Pointer {
            target: Some(Box::new(Row { meta: EntityMeta::with_id(42), value: 7 })),
            ..Pointer::default()
        });

        let loaded = store.find::<Pointer>(pointer.id()).unwrap();
        let target = loaded.target.as_deref().unwrap();
        assert_eq!(target.id(), 42);
        assert_eq!(target.value, 0);
    }

    #[test]
    fn test_unknown_table_is_empty() {
        let store = MemoryStore::new();
        assert!(store.all::<Row>().is_empty());
        assert_eq!(store.count::<Row>(), 0);
        assert!(store.delete::<Row>(1).is_none());
    }
}
