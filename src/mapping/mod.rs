//! Mapping metadata: condition mappings and the entity model they hang off.

pub mod condition;
pub mod metadata;

pub use condition::{ConditionPropertyMapping, ConditionTest, MappedMember, ResolvedCondition};
pub use metadata::{EntitySet, EntityType, EntityTypeDef, Metadata, MetadataBuilder, Property};
