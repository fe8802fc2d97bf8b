//! Compiler options and the TOML model file.
//!
//! ```toml
//! [compiler]
//! null_semantics = "native"
//!
//! [[entity_set]]
//! name = "Configs"
//! table = "dbo.ArubaConfigs"
//! root_type = "ArubaConfig"
//! discriminator = "Discriminator"
//!
//! [[entity_type]]
//! name = "ArubaConfig"
//! properties = ["Id", "OS", "Lang", "Arch"]
//!
//! [[entity_type.condition]]
//! column = "Discriminator"
//! value = "ArubaConfig"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::ast::Value;
use crate::error::{LiftError, LiftResult};
use crate::mapping::{
    ConditionPropertyMapping, EntitySet, EntityTypeDef, MappedMember, MetadataBuilder, Property,
};

/// How equality predicates treat nulls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullComparisonMode {
    /// Host-language semantics: comparisons get an explicit not-null
    /// conjunct so they never rely on the engine's unknown-as-false rule.
    #[default]
    #[serde(alias = "clr")]
    ClrSemantics,
    /// Leave comparisons to the engine's three-valued logic.
    #[serde(alias = "native")]
    NativeSemantics,
}

/// Which columns a type filter's projection gates behind the
/// discriminator test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionalShaping {
    /// Every column of the target type.
    #[default]
    Uniform,
    /// Only columns the entity set's root type does not define.
    SubtypeOnly,
}

/// Per-compilation options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    pub null_semantics: NullComparisonMode,
    pub shaping: ConditionalShaping,
    /// Upper bound on sort-lift passes over the tree.
    pub max_rewrite_passes: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            null_semantics: NullComparisonMode::default(),
            shaping: ConditionalShaping::default(),
            max_rewrite_passes: 32,
        }
    }
}

impl CompilerOptions {
    pub fn builder() -> CompilerOptionsBuilder {
        CompilerOptionsBuilder::default()
    }
}

/// Builder for CompilerOptions
#[derive(Debug, Default)]
pub struct CompilerOptionsBuilder {
    options: CompilerOptions,
}

impl CompilerOptionsBuilder {
    pub fn null_semantics(mut self, mode: NullComparisonMode) -> Self {
        self.options.null_semantics = mode;
        self
    }

    pub fn shaping(mut self, shaping: ConditionalShaping) -> Self {
        self.options.shaping = shaping;
        self
    }

    pub fn max_rewrite_passes(mut self, passes: usize) -> Self {
        self.options.max_rewrite_passes = passes;
        self
    }

    pub fn build(self) -> CompilerOptions {
        self.options
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    compiler: CompilerOptions,
    #[serde(default)]
    entity_set: Vec<RawEntitySet>,
    #[serde(default)]
    entity_type: Vec<RawEntityType>,
}

#[derive(Debug, Deserialize)]
struct RawEntitySet {
    name: String,
    table: String,
    root_type: String,
    discriminator: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEntityType {
    name: String,
    base: Option<String>,
    #[serde(default)]
    properties: Vec<String>,
    /// Property -> column overrides.
    #[serde(default)]
    columns: BTreeMap<String, String>,
    #[serde(default)]
    condition: Vec<RawCondition>,
}

#[derive(Debug, Deserialize)]
struct RawCondition {
    property: Option<String>,
    column: Option<String>,
    value: Option<toml::Value>,
    is_null: Option<bool>,
}

impl RawCondition {
    fn into_mapping(self, type_name: &str) -> LiftResult<ConditionPropertyMapping> {
        let member = match (self.property, self.column) {
            (Some(p), None) => MappedMember::Property(p),
            (None, Some(c)) => MappedMember::Column(c),
            _ => {
                return Err(LiftError::metadata(format!(
                    "condition on type '{}' must name exactly one of property or column",
                    type_name
                )));
            }
        };
        let value = self.value.map(literal).transpose()?;
        ConditionPropertyMapping::new(member, value, self.is_null)
    }
}

fn literal(value: toml::Value) -> LiftResult<Value> {
    match value {
        toml::Value::String(s) => Ok(Value::String(s)),
        toml::Value::Integer(n) => Ok(Value::Int(n)),
        toml::Value::Boolean(b) => Ok(Value::Bool(b)),
        other => Err(LiftError::Config(format!(
            "unsupported condition value '{}'",
            other
        ))),
    }
}

/// A loaded configuration: compiler options plus the (unfrozen) model.
#[derive(Debug)]
pub struct Config {
    pub compiler: CompilerOptions,
    pub metadata: MetadataBuilder,
}

impl Config {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> LiftResult<Self> {
        let raw: RawConfig = toml::from_str(content)?;

        let mut metadata = MetadataBuilder::new();
        for set in raw.entity_set {
            let mut entity_set = EntitySet::new(set.name, set.table, set.root_type);
            if let Some(d) = set.discriminator {
                entity_set = entity_set.discriminator(d);
            }
            metadata = metadata.entity_set(entity_set);
        }

        for ty in raw.entity_type {
            let mut def = EntityTypeDef::new(&ty.name);
            if let Some(base) = &ty.base {
                def = def.base(base);
            }
            for name in &ty.properties {
                let property = match ty.columns.get(name) {
                    Some(column) => Property::mapped(name, column),
                    None => Property::new(name),
                };
                def = def.property(property);
            }
            for cond in ty.condition {
                def = def.condition(cond.into_mapping(&ty.name)?);
            }
            metadata = metadata.entity_type(def);
        }

        Ok(Self {
            compiler: raw.compiler,
            metadata,
        })
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> LiftResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LiftError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// `liftql.toml` in the working directory, else the per-user file.
    pub fn discover() -> Option<PathBuf> {
        let local = PathBuf::from("liftql.toml");
        if local.exists() {
            return Some(local);
        }
        Self::default_path().filter(|p| p.exists())
    }

    /// `<config dir>/liftql/liftql.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("liftql").join("liftql.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"
[compiler]
null_semantics = "native"
shaping = "subtype_only"

[[entity_set]]
name = "Configs"
table = "dbo.ArubaConfigs"
root_type = "ArubaConfig"
discriminator = "Discriminator"

[[entity_type]]
name = "ArubaConfig"
properties = ["Id", "OS", "Arch"]
columns = { OS = "os_name" }

[[entity_type.condition]]
column = "Discriminator"
value = "ArubaConfig"

[[entity_type]]
name = "ArubaMachineConfig"
base = "ArubaConfig"
properties = ["Host"]

[[entity_type.condition]]
column = "Discriminator"
value = "ArubaMachineConfig"
"#;

    #[test]
    fn test_defaults() {
        let opts = CompilerOptions::default();
        assert_eq!(opts.null_semantics, NullComparisonMode::ClrSemantics);
        assert_eq!(opts.shaping, ConditionalShaping::Uniform);
        assert_eq!(opts.max_rewrite_passes, 32);
    }

    #[test]
    fn test_parse_model() {
        let config = Config::from_toml_str(MODEL).unwrap();
        assert_eq!(config.compiler.null_semantics, NullComparisonMode::NativeSemantics);
        assert_eq!(config.compiler.shaping, ConditionalShaping::SubtypeOnly);
        assert_eq!(config.compiler.max_rewrite_passes, 32);

        let md = config.metadata.freeze().unwrap();
        let set = md.relation("Configs").unwrap();
        assert_eq!(
            md.relation_columns(set),
            vec!["Id", "os_name", "Arch", "Host", "Discriminator"]
        );
        let machine = md.entity_type("ArubaMachineConfig").unwrap();
        assert_eq!(machine.conditions[0].value(), Some(&Value::from("ArubaMachineConfig")));
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.compiler, CompilerOptions::default());
    }

    #[test]
    fn test_condition_needs_one_member() {
        let bad = r#"
[[entity_type]]
name = "T"

[[entity_type.condition]]
property = "Kind"
column = "kind"
value = 1
"#;
        let err = Config::from_toml_str(bad).unwrap_err();
        assert!(err.to_string().contains("exactly one of property or column"));
    }

    #[test]
    fn test_condition_with_value_and_null_test() {
        let bad = r#"
[[entity_type]]
name = "T"

[[entity_type.condition]]
column = "kind"
value = 1
is_null = true
"#;
        assert!(matches!(Config::from_toml_str(bad), Err(LiftError::Metadata(_))));
    }

    #[test]
    fn test_builder() {
        let opts = CompilerOptions::builder()
            .null_semantics(NullComparisonMode::NativeSemantics)
            .max_rewrite_passes(4)
            .build();
        assert_eq!(opts.null_semantics, NullComparisonMode::NativeSemantics);
        assert_eq!(opts.max_rewrite_passes, 4);
    }
}
