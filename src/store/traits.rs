use std::any::Any;
use std::fmt;
use thiserror::Error;

use crate::model::{Entity, EntityId, Violation};

/// The stored state of an entity that failed the version check
pub struct ConflictingEntity {
    pub type_name: &'static str,
    pub id: EntityId,
    /// Current stored row, absent when it was deleted in the meantime
    current: Option<Box<dyn Any + Send + Sync>>,
}

impl ConflictingEntity {
    pub fn new<E: Entity>(id: EntityId, current: Option<E>) -> Self {
        Self {
            type_name: E::TYPE_NAME,
            id,
            current: current.map(|entity| Box::new(entity) as Box<dyn Any + Send + Sync>),
        }
    }

    pub fn current<E: Entity>(&self) -> Option<E> {
        self.current
            .as_ref()
            .and_then(|current| current.downcast_ref::<E>())
            .cloned()
    }

    pub fn is<E: Entity>(&self, id: EntityId) -> bool {
        self.type_name == E::TYPE_NAME && self.id == id
    }
}

impl fmt::Debug for ConflictingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConflictingEntity")
            .field("type_name", &self.type_name)
            .field("id", &self.id)
            .field("deleted", &self.current.is_none())
            .finish()
    }
}

/// Constraint violations reported by one tracked entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityViolations {
    pub type_name: &'static str,
    pub id: EntityId,
    pub violations: Vec<Violation>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{type_name} {id} not found")]
    NotFound { type_name: &'static str, id: EntityId },

    #[error("{} {} was changed by another request", .0.type_name, .0.id)]
    ConcurrentUpdate(ConflictingEntity),

    #[error("{} entit(y/ies) failed validation", .0.len())]
    Validation(Vec<EntityViolations>),
}

/// Request-scoped identity-mapped access to entities of type `E`
pub trait Repository<E: Entity> {
    /// Tracked instance if present, otherwise loads and tracks the stored row
    fn get_by_id(&mut self, id: EntityId) -> Option<E>;

    /// Looks only at the tracked set, never at the store
    fn get_from_local(&self, entity: &E) -> Option<E>;

    /// Tracks `entity` as unchanged without loading or persisting its fields
    fn attach(&mut self, entity: E) -> E;

    /// Tracks a new entity, persisted on the next save
    fn add(&mut self, entity: E) -> E;

    /// Marks `entity` modified. Its version token becomes the token the
    /// stored row must still carry when saving.
    fn update(&mut self, entity: E) -> E;

    /// A fresh, untracked entity with its timestamps stamped
    fn create(&self) -> E;

    fn get_all(&self) -> Vec<E>;

    fn save_changes(&mut self) -> Result<(), StoreError>;
}
