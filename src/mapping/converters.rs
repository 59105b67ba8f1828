use itertools::Itertools;
use std::collections::HashSet;
use std::marker::PhantomData;

use crate::mapping::engine::{MapPath, MappingEngine, Projection};
use crate::mapping::relations::OptionsSelector;
use crate::model::{Choice, Choices, Entity, EntityId};
use crate::store::UnitOfWork;

/// Accessors for a single-reference member and its `Choice` projection
pub struct SingleAccessors<E, V, R, RV> {
    pub get: fn(&E) -> Option<&R>,
    pub set: fn(&mut E, Option<R>),
    pub choice: fn(&V) -> &Choice<RV>,
    pub choice_mut: fn(&mut V) -> &mut Choice<RV>,
}

/// Accessors for a collection member and its `Choices` projection
pub struct CollectionAccessors<E, V, R, RV> {
    pub get: fn(&E) -> &[R],
    pub get_mut: fn(&mut E) -> &mut Vec<R>,
    pub choices: fn(&V) -> &Choices<RV>,
    pub choices_mut: fn(&mut V) -> &mut Choices<RV>,
}

/// Where a relation's candidate options come from
pub struct OptionSource<E, R> {
    pub member: &'static str,
    pub selector: Option<OptionsSelector<E, R>>,
    /// Drop the option carrying the owner's own id
    pub exclude_self: bool,
}

impl<E: Entity, R: Entity> OptionSource<E, R> {
    fn resolve(&self, owner: &E) -> Vec<R> {
        let Some(selector) = &self.selector else {
            log::debug!(
                "No options configured for {}.{}",
                E::TYPE_NAME,
                self.member
            );
            return Vec::new();
        };

        let owner_id = owner.id();
        selector(owner)
            .into_iter()
            .filter(|option| !(self.exclude_self && option.id() == owner_id))
            .unique_by(|option| option.id())
            .collect()
    }
}

/// Converts one relation member in both directions
pub trait RelationConverter<E, V>: Send + Sync {
    fn member(&self) -> &'static str;

    /// Entity relation to its `Choice`/`Choices` projection
    fn read(&self, engine: &MappingEngine, owner: &E, view_model: &mut V, path: &MapPath<'_>);

    /// Posted selection(s) back onto the entity relation
    fn write(&self, view_model: &V, owner: &mut E, uow: &mut UnitOfWork);
}

/// The relation shapes a projection can declare
pub enum RelationStrategy<E, V> {
    Single(Box<dyn RelationConverter<E, V>>),
    Collection(Box<dyn RelationConverter<E, V>>),
}

impl<E, V> RelationStrategy<E, V> {
    fn converter(&self) -> &dyn RelationConverter<E, V> {
        match self {
            RelationStrategy::Single(converter) | RelationStrategy::Collection(converter) => {
                converter.as_ref()
            }
        }
    }

    pub fn member(&self) -> &'static str {
        self.converter().member()
    }

    pub fn read(&self, engine: &MappingEngine, owner: &E, view_model: &mut V, path: &MapPath<'_>) {
        self.converter().read(engine, owner, view_model, path);
    }

    pub fn write(&self, view_model: &V, owner: &mut E, uow: &mut UnitOfWork) {
        self.converter().write(view_model, owner, uow);
    }
}

fn map_options<R, RV>(
    engine: &MappingEngine,
    source: &OptionSource<impl Entity, R>,
    owner_options: impl FnOnce() -> Vec<R>,
    path: &MapPath<'_>,
) -> Vec<RV>
where
    R: Entity,
    RV: Projection<R>,
{
    if !engine.should_expand_options(path, R::TYPE_NAME, source.member) {
        log::debug!(
            "Options for nested {}.{} short-circuited after {} expansion(s)",
            R::TYPE_NAME,
            source.member,
            path.count(R::TYPE_NAME, source.member)
        );
        return Vec::new();
    }

    let frame = path.push(R::TYPE_NAME, source.member);
    owner_options()
        .iter()
        .map(|option| engine.convert(option, &frame))
        .collect()
}

pub struct SingleConverter<E, V, R, RV> {
    source: OptionSource<E, R>,
    accessors: SingleAccessors<E, V, R, RV>,
    _types: PhantomData<fn() -> (V, RV)>,
}

impl<E, V, R, RV> SingleConverter<E, V, R, RV> {
    pub fn new(source: OptionSource<E, R>, accessors: SingleAccessors<E, V, R, RV>) -> Self {
        Self {
            source,
            accessors,
            _types: PhantomData,
        }
    }
}

impl<E, V, R, RV> RelationConverter<E, V> for SingleConverter<E, V, R, RV>
where
    E: Entity,
    V: Projection<E>,
    R: Entity,
    RV: Projection<R>,
{
    fn member(&self) -> &'static str {
        self.source.member
    }

    fn read(&self, engine: &MappingEngine, owner: &E, view_model: &mut V, path: &MapPath<'_>) {
        let frame = path.push(R::TYPE_NAME, self.source.member);
        let selection = (self.accessors.get)(owner).map(|related| engine.convert::<R, RV>(related, &frame));
        let options = map_options(engine, &self.source, || self.source.resolve(owner), path);

        *(self.accessors.choice_mut)(view_model) = Choice::new(selection, options);
    }

    fn write(&self, view_model: &V, owner: &mut E, uow: &mut UnitOfWork) {
        let selected = (self.accessors.choice)(view_model).selected_id();
        let current = (self.accessors.get)(owner).map(Entity::id);

        match selected {
            None => (self.accessors.set)(owner, None),
            Some(id) if current == Some(id) => {}
            Some(id) => {
                let related = uow.resolve_stub::<R>(id);
                (self.accessors.set)(owner, Some(related));
            }
        }
    }
}

pub struct CollectionConverter<E, V, R, RV> {
    source: OptionSource<E, R>,
    accessors: CollectionAccessors<E, V, R, RV>,
    _types: PhantomData<fn() -> (V, RV)>,
}

impl<E, V, R, RV> CollectionConverter<E, V, R, RV> {
    pub fn new(source: OptionSource<E, R>, accessors: CollectionAccessors<E, V, R, RV>) -> Self {
        Self {
            source,
            accessors,
            _types: PhantomData,
        }
    }
}

impl<E, V, R, RV> RelationConverter<E, V> for CollectionConverter<E, V, R, RV>
where
    E: Entity,
    V: Projection<E>,
    R: Entity,
    RV: Projection<R>,
{
    fn member(&self) -> &'static str {
        self.source.member
    }

    fn read(&self, engine: &MappingEngine, owner: &E, view_model: &mut V, path: &MapPath<'_>) {
        let frame = path.push(R::TYPE_NAME, self.source.member);
        let selections = (self.accessors.get)(owner)
            .iter()
            .map(|related| engine.convert::<R, RV>(related, &frame))
            .collect();
        let options = map_options(engine, &self.source, || self.source.resolve(owner), path);

        *(self.accessors.choices_mut)(view_model) = Choices::new(selections, options);
    }

    fn write(&self, view_model: &V, owner: &mut E, uow: &mut UnitOfWork) {
        let posted = (self.accessors.choices)(view_model).selected_ids();
        let mut previous = std::mem::take((self.accessors.get_mut)(owner));
        let mut seen: HashSet<EntityId> = HashSet::new();

        let mut replaced = Vec::with_capacity(posted.len());
        for id in posted {
            if !seen.insert(id) {
                continue;
            }
            let related = match previous.iter().position(|existing| existing.id() == id) {
                Some(index) => previous.swap_remove(index),
                None => uow.resolve_stub::<R>(id),
            };
            replaced.push(related);
        }

        *(self.accessors.get_mut)(owner) = replaced;
    }
}
