use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{Choice, Choices, Entity, EntityViewModel, Member, MemberKind, OptionRow};

/// Produces the candidate related entities for an owning entity
pub type OptionsSelector<E, R> = Arc<dyn Fn(&E) -> Vec<R> + Send + Sync>;

/// Renders a related view model as a pick-list label
pub type LabelSelector<V> = Arc<dyn Fn(&V) -> String + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("{owner} has no member named '{member}'")]
    UnknownMember { owner: &'static str, member: String },

    #[error("{owner}.{member} is neither an entity nor a collection of entities")]
    UnsupportedShape {
        owner: &'static str,
        member: &'static str,
    },

    #[error("{owner}.{member} relates to {expected}, not {found}")]
    TargetMismatch {
        owner: &'static str,
        member: &'static str,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{owner}.{member} is a {declared} relation but was mapped as a {requested} relation")]
    ShapeMismatch {
        owner: &'static str,
        member: &'static str,
        declared: &'static str,
        requested: &'static str,
    },
}

/// Configuration of one relation member
struct RelationConfig {
    member: &'static Member,
    options: Option<Box<dyn Any + Send + Sync>>,
    label: Option<Box<dyn Any + Send + Sync>>,
    can_choose_self: Option<bool>,
}

impl fmt::Debug for RelationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationConfig")
            .field("member", &self.member.name)
            .field("has_options", &self.options.is_some())
            .field("has_label", &self.label.is_some())
            .field("can_choose_self", &self.can_choose_self)
            .finish()
    }
}

/// Relation registry for the owner type `E`: member name to option source,
/// label function and self-selection policy.
///
/// Populated once at startup, then shared read-only.
pub struct RelationsConfig<E> {
    relations: HashMap<&'static str, RelationConfig>,
    _owner: PhantomData<fn() -> E>,
}

impl<E> fmt::Debug for RelationsConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.relations.iter()).finish()
    }
}

impl<E: Entity> Default for RelationsConfig<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> RelationsConfig<E> {
    pub fn new() -> Self {
        Self {
            relations: HashMap::new(),
            _owner: PhantomData,
        }
    }

    /// Starts (or resumes) configuring the relation member `member`.
    ///
    /// Fails when `E` declares no such member or the member is a scalar.
    pub fn relation(&mut self, member: &str) -> Result<RelationBuilder<'_, E>, ConfigurationError> {
        let declared = E::member(member).ok_or_else(|| ConfigurationError::UnknownMember {
            owner: E::TYPE_NAME,
            member: member.to_string(),
        })?;

        if declared.kind == MemberKind::Scalar {
            return Err(ConfigurationError::UnsupportedShape {
                owner: E::TYPE_NAME,
                member: declared.name,
            });
        }

        let config = self
            .relations
            .entry(declared.name)
            .or_insert_with(|| RelationConfig {
                member: declared,
                options: None,
                label: None,
                can_choose_self: None,
            });

        Ok(RelationBuilder {
            config,
            _owner: PhantomData,
        })
    }

    pub fn is_configured(&self, member: &str) -> bool {
        self.relations.contains_key(member)
    }

    pub fn can_choose_self(&self, member: &str) -> Option<bool> {
        self.relations
            .get(member)
            .and_then(|config| config.can_choose_self)
    }

    pub fn options_selector<R: Entity>(&self, member: &str) -> Option<OptionsSelector<E, R>> {
        let erased = self.relations.get(member)?.options.as_ref()?;
        let selector = erased.downcast_ref::<OptionsSelector<E, R>>().cloned();
        if selector.is_none() {
            log::warn!(
                "Options for {}.{} do not produce {}",
                E::TYPE_NAME,
                member,
                R::TYPE_NAME
            );
        }
        selector
    }

    pub fn label_selector<V: EntityViewModel>(&self, member: &str) -> Option<LabelSelector<V>> {
        let erased = self.relations.get(member)?.label.as_ref()?;
        erased.downcast_ref::<LabelSelector<V>>().cloned()
    }

    /// Label for a related view model, falling back to its id
    pub fn label<V: EntityViewModel>(&self, member: &str, view_model: &V) -> String {
        match self.label_selector::<V>(member) {
            Some(label) => label(view_model),
            None => view_model
                .id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
        }
    }

    pub fn choice_rows<V: EntityViewModel>(&self, member: &str, choice: &Choice<V>) -> Vec<OptionRow> {
        choice.option_rows(|option| self.label(member, option))
    }

    pub fn choices_rows<V: EntityViewModel>(
        &self,
        member: &str,
        choices: &Choices<V>,
    ) -> Vec<OptionRow> {
        choices.option_rows(|option| self.label(member, option))
    }
}

/// Fluent configuration of one relation member
pub struct RelationBuilder<'a, E> {
    config: &'a mut RelationConfig,
    _owner: PhantomData<fn() -> E>,
}

impl<'a, E: Entity> RelationBuilder<'a, E> {
    /// Records the option source. The produced entity type must be the
    /// member's declared target.
    pub fn has_options<R, F>(self, selector: F) -> Result<Self, ConfigurationError>
    where
        R: Entity,
        F: Fn(&E) -> Vec<R> + Send + Sync + 'static,
    {
        let member = self.config.member;
        let target = match member.kind {
            MemberKind::Reference(target) | MemberKind::Collection(target) => target,
            MemberKind::Scalar => {
                return Err(ConfigurationError::UnsupportedShape {
                    owner: E::TYPE_NAME,
                    member: member.name,
                })
            }
        };
        if target != R::TYPE_NAME {
            return Err(ConfigurationError::TargetMismatch {
                owner: E::TYPE_NAME,
                member: member.name,
                expected: target,
                found: R::TYPE_NAME,
            });
        }

        let selector: OptionsSelector<E, R> = Arc::new(selector);
        self.config.options = Some(Box::new(selector));
        Ok(self)
    }

    pub fn uses_label<V, F>(self, label: F) -> Self
    where
        V: EntityViewModel,
        F: Fn(&V) -> String + Send + Sync + 'static,
    {
        let label: LabelSelector<V> = Arc::new(label);
        self.config.label = Some(Box::new(label));
        self
    }

    /// Only consulted when the member relates back to the owner's own type
    pub fn can_choose_self(self, allowed: bool) -> Self {
        self.config.can_choose_self = Some(allowed);
        self
    }
}
