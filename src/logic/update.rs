use thiserror::Error;

use crate::mapping::{MappingEngine, Projection};
use crate::model::{
    html_escape, Entity, EntityId, EntityViewModel, FlashMessage, ModelState, VersionToken,
};
use crate::store::{ConflictingEntity, EntityViolations, Repository, StoreError, UnitOfWork};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("{type_name} {id} not found")]
    NotFound { type_name: &'static str, id: EntityId },

    #[error("posted {0} carries no id")]
    MissingId(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Terminal state of an update request
#[derive(Debug, Clone)]
pub enum UpdateOutcome<V> {
    /// Saved; leave the form
    Redirect { flash: FlashMessage },
    /// Show the form again with the refreshed view model and its errors
    Redisplay {
        view_model: V,
        model_state: ModelState,
        flash: Option<FlashMessage>,
    },
}

impl<V> UpdateOutcome<V> {
    pub fn is_redirect(&self) -> bool {
        matches!(self, UpdateOutcome::Redirect { .. })
    }
}

enum Stage<E> {
    Fetch,
    Validate(E),
    Save(E),
    Success(E),
    ConcurrencyConflict(ConflictingEntity),
    ValidationConflict { entity: E, violations: Vec<EntityViolations> },
    Redisplay,
}

/// Drives the edit/save flow for one request
pub struct UpdateOrchestrator<'a> {
    engine: &'a MappingEngine,
}

impl<'a> UpdateOrchestrator<'a> {
    pub fn new(engine: &'a MappingEngine) -> Self {
        Self { engine }
    }

    /// View model for the initial edit form
    pub fn edit<E, V>(&self, uow: &mut UnitOfWork, id: EntityId) -> Result<V, UpdateError>
    where
        E: Entity,
        V: Projection<E>,
    {
        let entity: E = uow.get_by_id(id).ok_or(UpdateError::NotFound {
            type_name: E::TYPE_NAME,
            id,
        })?;
        Ok(self.engine.to_view_model(&entity))
    }

    /// Applies a posted view model. Conflicts end in [`UpdateOutcome::Redisplay`],
    /// never in an error; only a missing entity fails the request.
    pub fn update<E, V>(
        &self,
        uow: &mut UnitOfWork,
        mut view_model: V,
        mut model_state: ModelState,
    ) -> Result<UpdateOutcome<V>, UpdateError>
    where
        E: Entity,
        V: Projection<E>,
    {
        let id = view_model
            .id()
            .ok_or(UpdateError::MissingId(E::TYPE_NAME))?;
        let mut flash = None;
        let mut stage = Stage::<E>::Fetch;

        loop {
            stage = match stage {
                Stage::Fetch => {
                    let entity: E = uow.get_by_id(id).ok_or(UpdateError::NotFound {
                        type_name: E::TYPE_NAME,
                        id,
                    })?;
                    Stage::Validate(entity)
                }

                Stage::Validate(entity) => {
                    if model_state.is_valid() {
                        Stage::Save(entity)
                    } else {
                        log::debug!(
                            "Posted {} {} has {} binding error(s); not saving",
                            E::TYPE_NAME,
                            id,
                            model_state.error_count()
                        );
                        Stage::Redisplay
                    }
                }

                Stage::Save(mut entity) => {
                    let original: V = self.engine.to_view_model(&entity);
                    self.engine.apply_to_entity(&view_model, &mut entity, uow);
                    if view_model.meta().version.is_none() {
                        // Without the token the form was read from, the edit can only be stale
                        log::warn!(
                            "Posted {} {} carries no version token",
                            E::TYPE_NAME,
                            id
                        );
                        entity.meta_mut().version = VersionToken::default();
                    }
                    let entity = uow.update(entity);

                    match Repository::<E>::save_changes(uow) {
                        Ok(()) => Stage::Success(entity),
                        Err(StoreError::ConcurrentUpdate(conflict)) => {
                            Stage::ConcurrencyConflict(conflict)
                        }
                        Err(StoreError::Validation(violations)) => {
                            view_model.meta_mut().original_values = Some(Box::new(original));
                            Stage::ValidationConflict { entity, violations }
                        }
                        Err(error) => return Err(error.into()),
                    }
                }

                Stage::Success(entity) => {
                    log::info!("Updated {} {}", E::TYPE_NAME, id);
                    return Ok(UpdateOutcome::Redirect {
                        flash: FlashMessage::success(format!(
                            "{} \"{}\" Updated",
                            E::TYPE_NAME,
                            entity.label()
                        )),
                    });
                }

                Stage::ConcurrencyConflict(conflict) => {
                    log::warn!(
                        "Edit conflict on {} {} while saving {} {}",
                        conflict.type_name,
                        conflict.id,
                        E::TYPE_NAME,
                        id
                    );
                    let current = match uow.reload::<E>(id) {
                        Ok(current) => current,
                        Err(StoreError::NotFound { .. }) => {
                            return Err(UpdateError::NotFound {
                                type_name: E::TYPE_NAME,
                                id,
                            })
                        }
                        Err(error) => return Err(error.into()),
                    };

                    let fresh: V = self.engine.to_view_model(&current);
                    view_model.meta_mut().version = fresh.meta().version.clone();
                    view_model.meta_mut().concurrently_edited = Some(Box::new(fresh));

                    model_state.add_model_error(format!(
                        "The {} has been edited since you requested it. \
                         Please ensure the correct values are below. \
                         Cancel to leave the new current values.",
                        E::TYPE_NAME
                    ));
                    flash = Some(FlashMessage::error("An edit conflict occurred."));
                    Stage::Redisplay
                }

                Stage::ValidationConflict { entity, violations } => {
                    log::warn!(
                        "Saving {} {} failed validation for {} entit(y/ies)",
                        E::TYPE_NAME,
                        id,
                        violations.len()
                    );
                    record_violations::<E>(&mut model_state, id, &violations);
                    flash = Some(FlashMessage::error(format!(
                        "Failed to save {} \"{}\"",
                        E::TYPE_NAME,
                        entity.label()
                    )));
                    Stage::Redisplay
                }

                Stage::Redisplay => {
                    self.refresh::<E, V>(uow, &mut view_model, id)?;
                    return Ok(UpdateOutcome::Redisplay {
                        view_model,
                        model_state,
                        flash,
                    });
                }
            };
        }
    }

    /// Options cannot be recovered from a post, so the edits are replayed onto
    /// the entity and mapped back
    fn refresh<E, V>(&self, uow: &mut UnitOfWork, view_model: &mut V, id: EntityId) -> Result<(), UpdateError>
    where
        E: Entity,
        V: Projection<E>,
    {
        let mut entity: E = uow.get_by_id(id).ok_or(UpdateError::NotFound {
            type_name: E::TYPE_NAME,
            id,
        })?;
        self.engine.apply_to_entity(view_model, &mut entity, uow);
        self.engine.map_onto_view_model(&entity, view_model);
        Ok(())
    }
}

/// Violations of the edited entity become field errors; violations of other
/// entities in the same save become non-field errors naming that entity
fn record_violations<E: Entity>(model_state: &mut ModelState, id: EntityId, violations: &[EntityViolations]) {
    for reported in violations {
        let own = reported.type_name == E::TYPE_NAME && reported.id == id;
        for violation in &reported.violations {
            let message = html_escape(&violation.message);
            match (&violation.property, own) {
                (Some(property), true) => model_state.add_error(property.as_str(), message),
                (None, true) => model_state.add_model_error(message),
                (Some(property), false) => model_state.add_model_error(format!(
                    "{}&rsquo;s {}: {}.",
                    reported.type_name, property, message
                )),
                (None, false) => {
                    model_state.add_model_error(format!("{}: {}", reported.type_name, message))
                }
            }
        }
    }
}
