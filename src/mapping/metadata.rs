//! Entity sets, entity types and their hierarchy.
//!
//! [`MetadataBuilder`] collects definitions (from code or from the TOML
//! model in [`crate::config`]); [`MetadataBuilder::freeze`] validates them
//! and produces [`Metadata`], which is read-only and can be shared across
//! any number of compilations.

use std::collections::HashMap;

use super::condition::{ConditionPropertyMapping, ResolvedCondition};
use crate::error::{LiftError, LiftResult};

/// A conceptual property and the column that stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: String,
    pub column: String,
}

impl Property {
    /// A property stored in a column of the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
        }
    }

    pub fn mapped(name: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
        }
    }
}

/// A queryable relation: one table holding a whole type hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySet {
    pub name: String,
    /// Storage table, optionally schema-qualified (`dbo.Owners`).
    pub table: String,
    pub root_type: String,
    /// Column telling the subtypes apart, for polymorphic sets.
    pub discriminator: Option<String>,
}

impl EntitySet {
    pub fn new(name: impl Into<String>, table: impl Into<String>, root_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            root_type: root_type.into(),
            discriminator: None,
        }
    }

    pub fn discriminator(mut self, column: impl Into<String>) -> Self {
        self.discriminator = Some(column.into());
        self
    }
}

/// Build-phase entity type definition.
#[derive(Debug, Clone)]
pub struct EntityTypeDef {
    pub name: String,
    pub base: Option<String>,
    pub properties: Vec<Property>,
    pub conditions: Vec<ConditionPropertyMapping>,
}

impl EntityTypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            properties: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    /// Add same-named properties for each column.
    pub fn properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties.extend(names.into_iter().map(Property::new));
        self
    }

    pub fn condition(mut self, condition: ConditionPropertyMapping) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// Collects metadata before it is frozen.
#[derive(Debug, Default)]
pub struct MetadataBuilder {
    sets: Vec<EntitySet>,
    types: Vec<EntityTypeDef>,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_set(mut self, set: EntitySet) -> Self {
        self.sets.push(set);
        self
    }

    pub fn entity_type(mut self, def: EntityTypeDef) -> Self {
        self.types.push(def);
        self
    }

    /// Condition mappings of a type, for late column binding.
    pub fn conditions_mut(&mut self, type_name: &str) -> Option<&mut Vec<ConditionPropertyMapping>> {
        self.types
            .iter_mut()
            .find(|t| t.name == type_name)
            .map(|t| &mut t.conditions)
    }

    /// Validate and freeze.
    pub fn freeze(self) -> LiftResult<Metadata> {
        let mut type_index = HashMap::new();
        for (i, def) in self.types.iter().enumerate() {
            if type_index.insert(def.name.clone(), i).is_some() {
                return Err(LiftError::metadata(format!("duplicate entity type '{}'", def.name)));
            }
        }

        for def in &self.types {
            if let Some(base) = &def.base {
                if !type_index.contains_key(base) {
                    return Err(LiftError::metadata(format!(
                        "entity type '{}' derives from unknown type '{}'",
                        def.name, base
                    )));
                }
            }
        }

        // Every base is known from here on. A chain longer than the number
        // of types must revisit one.
        for def in &self.types {
            let mut steps = 0;
            let mut cursor = def.base.as_deref();
            while let Some(name) = cursor {
                steps += 1;
                if steps > self.types.len() {
                    return Err(LiftError::metadata(format!(
                        "entity type '{}' has a cyclic base chain",
                        def.name
                    )));
                }
                cursor = self.types[type_index[name]].base.as_deref();
            }
        }

        let mut set_index = HashMap::new();
        for (i, set) in self.sets.iter().enumerate() {
            if !type_index.contains_key(&set.root_type) {
                return Err(LiftError::metadata(format!(
                    "entity set '{}' uses unknown root type '{}'",
                    set.name, set.root_type
                )));
            }
            if set_index.insert(set.name.clone(), i).is_some() {
                return Err(LiftError::metadata(format!("duplicate entity set '{}'", set.name)));
            }
        }

        // Property -> column lookups see inherited properties too.
        let property_column = |type_name: &str, property: &str| -> Option<String> {
            let mut cursor = Some(type_name);
            while let Some(name) = cursor {
                let def = &self.types[type_index[name]];
                if let Some(p) = def.properties.iter().find(|p| p.name == property) {
                    return Some(p.column.clone());
                }
                cursor = def.base.as_deref();
            }
            None
        };

        let mut types = Vec::with_capacity(self.types.len());
        for def in &self.types {
            let conditions = def
                .conditions
                .iter()
                .cloned()
                .map(|c| c.freeze(|p| property_column(&def.name, p)))
                .collect::<LiftResult<Vec<_>>>()?;
            types.push(EntityType {
                name: def.name.clone(),
                base: def.base.clone(),
                properties: def.properties.clone(),
                conditions,
            });
        }

        tracing::debug!(sets = self.sets.len(), types = types.len(), "metadata frozen");

        Ok(Metadata {
            sets: self.sets,
            set_index,
            types,
            type_index,
        })
    }
}

/// Frozen entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    pub name: String,
    pub base: Option<String>,
    pub properties: Vec<Property>,
    pub conditions: Vec<ResolvedCondition>,
}

/// Frozen, read-only metadata.
#[derive(Debug, Clone)]
pub struct Metadata {
    sets: Vec<EntitySet>,
    set_index: HashMap<String, usize>,
    types: Vec<EntityType>,
    type_index: HashMap<String, usize>,
}

impl Metadata {
    pub fn relation(&self, name: &str) -> LiftResult<&EntitySet> {
        self.set_index
            .get(name)
            .map(|&i| &self.sets[i])
            .ok_or_else(|| LiftError::UnknownRelation(name.to_string()))
    }

    pub fn relations(&self) -> impl Iterator<Item = &EntitySet> {
        self.sets.iter()
    }

    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.type_index.get(name).map(|&i| &self.types[i])
    }

    /// `name` followed by all its descendants, depth first, siblings in
    /// declaration order.
    pub fn subtree(&self, name: &str) -> Vec<&EntityType> {
        let mut out = Vec::new();
        if let Some(t) = self.entity_type(name) {
            self.collect_subtree(t, &mut out);
        }
        out
    }

    fn collect_subtree<'a>(&'a self, t: &'a EntityType, out: &mut Vec<&'a EntityType>) {
        out.push(t);
        for child in self.types.iter().filter(|c| c.base.as_deref() == Some(t.name.as_str())) {
            self.collect_subtree(child, out);
        }
    }

    /// Whether `name` is `ancestor` or derives from it.
    pub fn is_subtype_of(&self, name: &str, ancestor: &str) -> bool {
        let mut cursor = self.entity_type(name);
        while let Some(t) = cursor {
            if t.name == ancestor {
                return true;
            }
            cursor = t.base.as_deref().and_then(|b| self.entity_type(b));
        }
        false
    }

    /// Columns of a type: inherited columns first, then the type's own.
    pub fn type_columns(&self, name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = self.entity_type(name);
        while let Some(t) = cursor {
            chain.push(t);
            cursor = t.base.as_deref().and_then(|b| self.entity_type(b));
        }
        let mut columns: Vec<String> = Vec::new();
        for t in chain.iter().rev() {
            for p in &t.properties {
                if !columns.contains(&p.column) {
                    columns.push(p.column.clone());
                }
            }
        }
        columns
    }

    /// Every column of a relation's table: the hierarchy's columns in
    /// subtree order, then the discriminator.
    pub fn relation_columns(&self, set: &EntitySet) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for t in self.subtree(&set.root_type) {
            for p in &t.properties {
                if !columns.contains(&p.column) {
                    columns.push(p.column.clone());
                }
            }
        }
        if let Some(d) = &set.discriminator {
            if !columns.contains(d) {
                columns.push(d.clone());
            }
        }
        columns
    }
}
