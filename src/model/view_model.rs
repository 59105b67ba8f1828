use serde::{Deserialize, Serialize};
use std::fmt;

use crate::model::{EntityId, VersionToken};

/// Presentation-side identity, version token and conflict snapshots.
///
/// The identity is write-once: an absent id means the view model describes an
/// entity that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewModelMeta<V> {
    #[serde(default)]
    id: Option<EntityId>,
    #[serde(default)]
    pub version: Option<VersionToken>,
    /// The current stored values, set only after a concurrent edit was detected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrently_edited: Option<Box<V>>,
    /// The values before the user's edits, set only after a validation failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_values: Option<Box<V>>,
}

impl<V> Default for ViewModelMeta<V> {
    fn default() -> Self {
        Self {
            id: None,
            version: None,
            concurrently_edited: None,
            original_values: None,
        }
    }
}

impl<V> ViewModelMeta<V> {
    pub fn id(&self) -> Option<EntityId> {
        self.id
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    /// Sets the identity unless one is already present
    pub fn identify(&mut self, id: EntityId) {
        match self.id {
            None => self.id = Some(id),
            Some(existing) if existing != id => {
                log::warn!(
                    "Ignoring attempt to re-identify view model {} as {}",
                    existing,
                    id
                );
            }
            Some(_) => {}
        }
    }
}

/// A presentation-facing projection of an entity
pub trait EntityViewModel: Clone + Default + fmt::Debug + Send + Sync + 'static {
    fn meta(&self) -> &ViewModelMeta<Self>;

    fn meta_mut(&mut self) -> &mut ViewModelMeta<Self>;

    fn id(&self) -> Option<EntityId> {
        self.meta().id()
    }

    /// A bare view model carrying only an id
    fn with_id(id: EntityId) -> Self {
        let mut view_model = Self::default();
        view_model.meta_mut().identify(id);
        view_model
    }
}
