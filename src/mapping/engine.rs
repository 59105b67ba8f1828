use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

use crate::mapping::converters::{
    CollectionAccessors, CollectionConverter, OptionSource, RelationStrategy, SingleAccessors,
    SingleConverter,
};
use crate::mapping::relations::{ConfigurationError, RelationsConfig};
use crate::model::{Entity, EntityViewModel, MemberKind};
use crate::store::UnitOfWork;

pub const DEFAULT_MAX_OPTION_DEPTH: usize = 1;

/// A view model that projects the entity type `E`.
///
/// Scalars are copied by hand; relation members are declared once through
/// [`RelationMembers`] and turned into converters when the pair is registered.
pub trait Projection<E: Entity>: EntityViewModel {
    fn read_scalars(&mut self, entity: &E);

    fn write_scalars(&self, entity: &mut E);

    fn relations(_members: &mut RelationMembers<'_, E, Self>) {}
}

/// Chain of relation conversions in progress, innermost frame first
#[derive(Debug, Clone, Copy, Default)]
pub struct MapPath<'a> {
    frame: Option<(&'static str, &'static str)>,
    parent: Option<&'a MapPath<'a>>,
}

impl MapPath<'static> {
    pub fn root() -> Self {
        Self::default()
    }
}

impl<'a> MapPath<'a> {
    pub fn push(&self, element: &'static str, member: &'static str) -> MapPath<'_> {
        MapPath {
            frame: Some((element, member)),
            parent: Some(self),
        }
    }

    /// Number of in-progress conversions of the given (element type, member) pair
    pub fn count(&self, element: &str, member: &str) -> usize {
        let here = usize::from(self.frame == Some((element, member)));
        here + self.parent.map_or(0, |parent| parent.count(element, member))
    }
}

struct TypeMap<E, V> {
    relations: Vec<RelationStrategy<E, V>>,
}

/// Immutable table of entity/view-model conversions, built once at startup
pub struct MappingEngine {
    maps: HashMap<(TypeId, TypeId), Box<dyn Any + Send + Sync>>,
    max_option_depth: usize,
}

impl fmt::Debug for MappingEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingEngine")
            .field("registered", &self.maps.len())
            .field("max_option_depth", &self.max_option_depth)
            .finish()
    }
}

pub struct MappingEngineBuilder {
    maps: HashMap<(TypeId, TypeId), Box<dyn Any + Send + Sync>>,
    max_option_depth: usize,
}

impl Default for MappingEngineBuilder {
    fn default() -> Self {
        Self {
            maps: HashMap::new(),
            max_option_depth: DEFAULT_MAX_OPTION_DEPTH,
        }
    }
}

impl MappingEngineBuilder {
    /// How many nested conversions of the same relation may still expand options
    pub fn max_option_depth(mut self, depth: usize) -> Self {
        self.max_option_depth = depth;
        self
    }

    /// Builds the relation converters for the pair `E` / `V`
    pub fn register<E, V>(mut self, config: &RelationsConfig<E>) -> Result<Self, ConfigurationError>
    where
        E: Entity,
        V: Projection<E>,
    {
        let mut members = RelationMembers {
            config,
            strategies: Vec::new(),
            error: None,
            _view_model: PhantomData,
        };
        V::relations(&mut members);
        let relations = members.finish()?;

        for strategy in &relations {
            if !config.is_configured(strategy.member()) {
                log::debug!(
                    "{}.{} has no relation configuration; its options will be empty",
                    E::TYPE_NAME,
                    strategy.member()
                );
            }
        }

        log::debug!(
            "Registered mapping {} <-> {} with {} relation(s)",
            E::TYPE_NAME,
            std::any::type_name::<V>(),
            relations.len()
        );
        self.maps.insert(
            (TypeId::of::<E>(), TypeId::of::<V>()),
            Box::new(TypeMap { relations }),
        );
        Ok(self)
    }

    pub fn build(self) -> MappingEngine {
        MappingEngine {
            maps: self.maps,
            max_option_depth: self.max_option_depth,
        }
    }
}

impl MappingEngine {
    pub fn builder() -> MappingEngineBuilder {
        MappingEngineBuilder::default()
    }

    fn type_map<E: Entity, V: Projection<E>>(&self) -> Option<&TypeMap<E, V>> {
        let map = self
            .maps
            .get(&(TypeId::of::<E>(), TypeId::of::<V>()))?
            .downcast_ref::<TypeMap<E, V>>();
        if map.is_none() {
            log::warn!(
                "Mapping table entry for {} has an unexpected type",
                E::TYPE_NAME
            );
        }
        map
    }

    pub fn to_view_model<E: Entity, V: Projection<E>>(&self, entity: &E) -> V {
        self.convert(entity, &MapPath::root())
    }

    pub fn to_view_models<E: Entity, V: Projection<E>>(&self, entities: &[E]) -> Vec<V> {
        entities
            .iter()
            .map(|entity| self.to_view_model(entity))
            .collect()
    }

    /// Refreshes `view_model` from `entity`, keeping its conflict snapshots
    pub fn map_onto_view_model<E: Entity, V: Projection<E>>(&self, entity: &E, view_model: &mut V) {
        self.fill(entity, view_model, &MapPath::root());
    }

    /// Writes scalars, identity, version and relations of `view_model` onto
    /// `entity`. Created/Modified stay untouched.
    pub fn apply_to_entity<E: Entity, V: Projection<E>>(
        &self,
        view_model: &V,
        entity: &mut E,
        uow: &mut UnitOfWork,
    ) {
        if let Some(id) = view_model.id() {
            entity.meta_mut().id = id;
        }
        if let Some(version) = &view_model.meta().version {
            entity.meta_mut().version = version.clone();
        }
        view_model.write_scalars(entity);

        match self.type_map::<E, V>() {
            Some(map) => {
                for relation in &map.relations {
                    relation.write(view_model, entity, uow);
                }
            }
            None => log::debug!(
                "No mapping registered for {}; relations were not written",
                E::TYPE_NAME
            ),
        }
    }

    pub(crate) fn convert<E: Entity, V: Projection<E>>(&self, entity: &E, path: &MapPath<'_>) -> V {
        let mut view_model = V::default();
        self.fill(entity, &mut view_model, path);
        view_model
    }

    pub(crate) fn should_expand_options(
        &self,
        path: &MapPath<'_>,
        element: &'static str,
        member: &'static str,
    ) -> bool {
        path.count(element, member) < self.max_option_depth
    }

    fn fill<E: Entity, V: Projection<E>>(&self, entity: &E, view_model: &mut V, path: &MapPath<'_>) {
        let meta = view_model.meta_mut();
        if entity.id() != 0 {
            meta.identify(entity.id());
        }
        meta.version = (!entity.version().is_empty()).then(|| entity.version().clone());
        view_model.read_scalars(entity);

        match self.type_map::<E, V>() {
            Some(map) => {
                for relation in &map.relations {
                    relation.read(self, entity, view_model, path);
                }
            }
            None => log::debug!(
                "No mapping registered for {}; relations left empty",
                E::TYPE_NAME
            ),
        }
    }
}

/// Collects the relation members a projection declares, checked against the
/// members its entity declares.
pub struct RelationMembers<'a, E, V> {
    config: &'a RelationsConfig<E>,
    strategies: Vec<RelationStrategy<E, V>>,
    error: Option<ConfigurationError>,
    _view_model: PhantomData<fn() -> V>,
}

impl<'a, E, V> RelationMembers<'a, E, V>
where
    E: Entity,
    V: Projection<E>,
{
    /// Declares a single-reference member projected as `Choice<RV>`
    pub fn choice<R, RV>(&mut self, member: &str, accessors: SingleAccessors<E, V, R, RV>) -> &mut Self
    where
        R: Entity,
        RV: Projection<R>,
    {
        if let Some((name, kind)) = self.declared(member, "single", R::TYPE_NAME) {
            match kind {
                MemberKind::Reference(_) => {
                    let source = self.option_source::<R>(name);
                    self.strategies.push(RelationStrategy::Single(Box::new(SingleConverter::new(
                        source, accessors,
                    ))));
                }
                _ => self.fail(ConfigurationError::ShapeMismatch {
                    owner: E::TYPE_NAME,
                    member: name,
                    declared: "collection",
                    requested: "single",
                }),
            }
        }
        self
    }

    /// Declares a collection member projected as `Choices<RV>`
    pub fn choices<R, RV>(
        &mut self,
        member: &str,
        accessors: CollectionAccessors<E, V, R, RV>,
    ) -> &mut Self
    where
        R: Entity,
        RV: Projection<R>,
    {
        if let Some((name, kind)) = self.declared(member, "collection", R::TYPE_NAME) {
            match kind {
                MemberKind::Collection(_) => {
                    let source = self.option_source::<R>(name);
                    self.strategies
                        .push(RelationStrategy::Collection(Box::new(CollectionConverter::new(
                            source, accessors,
                        ))));
                }
                _ => self.fail(ConfigurationError::ShapeMismatch {
                    owner: E::TYPE_NAME,
                    member: name,
                    declared: "single",
                    requested: "collection",
                }),
            }
        }
        self
    }

    /// The declared member, provided it is a relation to `related`
    fn declared(
        &mut self,
        member: &str,
        requested: &'static str,
        related: &'static str,
    ) -> Option<(&'static str, MemberKind)> {
        if self.error.is_some() {
            return None;
        }
        let Some(declared) = E::member(member) else {
            self.fail(ConfigurationError::UnknownMember {
                owner: E::TYPE_NAME,
                member: member.to_string(),
            });
            return None;
        };
        if declared.kind == MemberKind::Scalar {
            log::error!(
                "{}.{} is a scalar and cannot be mapped as a {} relation",
                E::TYPE_NAME,
                declared.name,
                requested
            );
            self.fail(ConfigurationError::UnsupportedShape {
                owner: E::TYPE_NAME,
                member: declared.name,
            });
            return None;
        }
        let target = match declared.kind {
            MemberKind::Reference(target) | MemberKind::Collection(target) => target,
            MemberKind::Scalar => return None,
        };
        if target != related {
            self.fail(ConfigurationError::TargetMismatch {
                owner: E::TYPE_NAME,
                member: declared.name,
                expected: target,
                found: related,
            });
            return None;
        }
        Some((declared.name, declared.kind))
    }

    fn option_source<R: Entity>(&self, member: &'static str) -> OptionSource<E, R> {
        let exclude_self = TypeId::of::<R>() == TypeId::of::<E>()
            && self.config.can_choose_self(member) == Some(false);
        OptionSource {
            member,
            selector: self.config.options_selector::<R>(member),
            exclude_self,
        }
    }

    fn fail(&mut self, error: ConfigurationError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn finish(self) -> Result<Vec<RelationStrategy<E, V>>, ConfigurationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.strategies),
        }
    }
}
