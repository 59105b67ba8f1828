pub mod converters;
pub mod engine;
pub mod relations;

pub use converters::{CollectionAccessors, RelationConverter, RelationStrategy, SingleAccessors};
pub use engine::{MapPath, MappingEngine, MappingEngineBuilder, Projection, RelationMembers};
pub use relations::{ConfigurationError, LabelSelector, OptionsSelector, RelationBuilder, RelationsConfig};
