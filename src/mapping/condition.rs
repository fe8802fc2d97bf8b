//! Condition property mappings.
//!
//! A condition mapping states a fact about one member of an entity type's
//! storage: "member P equals literal V", or "member P is (not) null". The
//! discriminator resolver combines them into row predicates.
//!
//! Mappings live in two phases. [`ConditionPropertyMapping`] is the build
//! phase object: it may receive its storage column once, late, while the
//! metadata is being loaded. Freezing the metadata turns it into a
//! [`ResolvedCondition`], which has no mutators at all.

use crate::ast::{col, Expr, Value};
use crate::error::{LiftError, LiftResult};

/// Which side of the mapping a condition is stated on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappedMember {
    /// A conceptual (entity) property; resolved to a column on freeze.
    Property(String),
    /// A storage column.
    Column(String),
}

/// The test a condition applies to its member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionTest {
    Equals(Value),
    IsNull,
    IsNotNull,
}

/// Build-phase condition mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionPropertyMapping {
    property: Option<String>,
    column: Option<String>,
    test: ConditionTest,
}

impl ConditionPropertyMapping {
    /// Create a mapping from a member plus exactly one of a value or a
    /// null test. A `Value::Null` value counts as absent.
    pub fn new(member: MappedMember, value: Option<Value>, is_null: Option<bool>) -> LiftResult<Self> {
        let value = value.filter(|v| !v.is_null());
        let test = match (value, is_null) {
            (Some(_), Some(_)) => {
                return Err(LiftError::metadata(format!(
                    "condition on '{}' specifies both a value and a null test",
                    member_name(&member)
                )));
            }
            (None, None) => {
                return Err(LiftError::metadata(format!(
                    "condition on '{}' needs either a value or a null test",
                    member_name(&member)
                )));
            }
            (Some(v), None) => ConditionTest::Equals(v),
            (None, Some(true)) => ConditionTest::IsNull,
            (None, Some(false)) => ConditionTest::IsNotNull,
        };

        let (property, column) = match member {
            MappedMember::Property(p) => (Some(p), None),
            MappedMember::Column(c) => (None, Some(c)),
        };

        Ok(Self {
            property,
            column,
            test,
        })
    }

    /// `column = value`
    pub fn column_equals(column: impl Into<String>, value: impl Into<Value>) -> LiftResult<Self> {
        Self::new(MappedMember::Column(column.into()), Some(value.into()), None)
    }

    /// `property = value`; the column is bound later.
    pub fn property_equals(property: impl Into<String>, value: impl Into<Value>) -> LiftResult<Self> {
        Self::new(MappedMember::Property(property.into()), Some(value.into()), None)
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.test {
            ConditionTest::Equals(v) => Some(v),
            _ => None,
        }
    }

    /// `Some(true)` for IS NULL, `Some(false)` for IS NOT NULL.
    pub fn is_null(&self) -> Option<bool> {
        match self.test {
            ConditionTest::Equals(_) => None,
            ConditionTest::IsNull => Some(true),
            ConditionTest::IsNotNull => Some(false),
        }
    }

    pub fn property(&self) -> Option<&str> {
        self.property.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    /// Bind the storage column. Allowed exactly once, and only when the
    /// mapping was not constructed on a column to begin with.
    pub fn set_column(&mut self, column: impl Into<String>) -> LiftResult<()> {
        let column = column.into();
        if let Some(existing) = &self.column {
            return Err(LiftError::metadata(format!(
                "condition column already bound to '{}', cannot rebind to '{}'",
                existing, column
            )));
        }
        self.column = Some(column);
        Ok(())
    }

    /// Finish the build phase. `resolve` maps a conceptual property to its
    /// column for mappings whose column was never bound explicitly.
    pub(crate) fn freeze(
        self,
        resolve: impl FnOnce(&str) -> Option<String>,
    ) -> LiftResult<ResolvedCondition> {
        let column = match (self.column, &self.property) {
            (Some(c), _) => c,
            (None, Some(p)) => resolve(p).ok_or_else(|| {
                LiftError::metadata(format!("condition property '{}' maps to no column", p))
            })?,
            (None, None) => {
                return Err(LiftError::metadata("condition has neither a property nor a column"));
            }
        };
        Ok(ResolvedCondition {
            column,
            test: self.test,
        })
    }
}

fn member_name(member: &MappedMember) -> &str {
    match member {
        MappedMember::Property(p) | MappedMember::Column(p) => p,
    }
}

/// Frozen condition: a storage column plus its test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCondition {
    column: String,
    test: ConditionTest,
}

impl ResolvedCondition {
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn test(&self) -> &ConditionTest {
        &self.test
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.test {
            ConditionTest::Equals(v) => Some(v),
            _ => None,
        }
    }

    /// The row predicate this condition stands for.
    pub fn predicate(&self) -> Expr {
        match &self.test {
            ConditionTest::Equals(v) => col(&self.column).in_list(vec![v.clone()]),
            ConditionTest::IsNull => col(&self.column).is_null(),
            ConditionTest::IsNotNull => col(&self.column).is_not_null(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_value_and_null_test() {
        let err = ConditionPropertyMapping::new(
            MappedMember::Column("Discriminator".into()),
            Some(Value::from("A")),
            Some(true),
        )
        .unwrap_err();
        assert!(err.to_string().contains("both a value and a null test"));
    }

    #[test]
    fn test_rejects_neither() {
        let err = ConditionPropertyMapping::new(MappedMember::Property("Kind".into()), None, None)
            .unwrap_err();
        assert!(err.to_string().contains("either a value or a null test"));
    }

    #[test]
    fn test_null_value_counts_as_absent() {
        let m = ConditionPropertyMapping::new(
            MappedMember::Column("Kind".into()),
            Some(Value::Null),
            Some(false),
        )
        .unwrap();
        assert_eq!(m.is_null(), Some(false));
        assert_eq!(m.value(), None);
    }

    #[test]
    fn test_column_binds_once() {
        let mut m = ConditionPropertyMapping::property_equals("Kind", "Machine").unwrap();
        assert_eq!(m.column(), None);
        m.set_column("kind_col").unwrap();
        assert_eq!(m.column(), Some("kind_col"));
        assert!(m.set_column("other").is_err());
    }

    #[test]
    fn test_storage_side_cannot_rebind() {
        let mut m = ConditionPropertyMapping::column_equals("Discriminator", "A").unwrap();
        assert!(m.set_column("Other").is_err());
    }

    #[test]
    fn test_freeze_resolves_property() {
        let m = ConditionPropertyMapping::property_equals("Kind", "Machine").unwrap();
        let frozen = m.freeze(|p| Some(format!("{}_col", p))).unwrap();
        assert_eq!(frozen.column(), "Kind_col");
        assert_eq!(frozen.predicate(), col("Kind_col").in_list(vec![Value::from("Machine")]));
    }

    #[test]
    fn test_freeze_fails_without_column() {
        let m = ConditionPropertyMapping::property_equals("Missing", 1).unwrap();
        assert!(m.freeze(|_| None).is_err());
    }
}
