//! Scalar predicates evaluated against records

use std::fmt;

use serde::{Deserialize, Serialize};

use super::record::Record;
use super::schema::{FieldType, RecordSchema};

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    /// `==`
    Eq,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `!=`
    Ne,
}

impl PredicateOp {
    /// Wire code (zero is reserved for "no predicate")
    pub fn as_u8(&self) -> u8 {
        match self {
            PredicateOp::Eq => 1,
            PredicateOp::Lt => 2,
            PredicateOp::Gt => 3,
            PredicateOp::Le => 4,
            PredicateOp::Ge => 5,
            PredicateOp::Ne => 6,
        }
    }

    /// Parses a wire code
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(PredicateOp::Eq),
            2 => Some(PredicateOp::Lt),
            3 => Some(PredicateOp::Gt),
            4 => Some(PredicateOp::Le),
            5 => Some(PredicateOp::Ge),
            6 => Some(PredicateOp::Ne),
            _ => None,
        }
    }

    /// Applies `lhs <op> rhs`
    pub fn apply(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            PredicateOp::Eq => lhs == rhs,
            PredicateOp::Lt => lhs < rhs,
            PredicateOp::Gt => lhs > rhs,
            PredicateOp::Le => lhs <= rhs,
            PredicateOp::Ge => lhs >= rhs,
            PredicateOp::Ne => lhs != rhs,
        }
    }

    /// Whether the operator only tests (in)equality
    pub fn is_equality(&self) -> bool {
        matches!(self, PredicateOp::Eq | PredicateOp::Ne)
    }
}

/// A typed comparison operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// Unsigned value
    U32(u32),
    /// Signed value
    I32(i32),
    /// Category code
    Category(u32),
}

impl FieldValue {
    /// Type the operand claims
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::U32(_) => FieldType::U32,
            FieldValue::I32(_) => FieldType::I32,
            FieldValue::Category(_) => FieldType::Category,
        }
    }

    /// Widened numeric value
    pub fn as_i64(&self) -> i64 {
        match self {
            FieldValue::U32(v) | FieldValue::Category(v) => i64::from(*v),
            FieldValue::I32(v) => i64::from(*v),
        }
    }

    /// Raw 32-bit payload for the wire
    pub fn to_word(&self) -> u32 {
        match self {
            FieldValue::U32(v) | FieldValue::Category(v) => *v,
            FieldValue::I32(v) => *v as u32,
        }
    }

    /// Rebuilds an operand from its wire parts
    pub fn from_word(ty: FieldType, word: u32) -> Self {
        match ty {
            FieldType::U32 => FieldValue::U32(word),
            FieldType::I32 => FieldValue::I32(word as i32),
            FieldType::Category => FieldValue::Category(word),
        }
    }
}

/// Why a predicate cannot be evaluated against a schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMismatch {
    /// Field the predicate names
    pub field: u8,
    /// What went wrong
    pub reason: &'static str,
}

impl fmt::Display for TypeMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field {}: {}", self.field, self.reason)
    }
}

/// `record.fields[field] <op> value`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predicate {
    /// Field index
    pub field: u8,
    /// Operator
    pub op: PredicateOp,
    /// Operand
    pub value: FieldValue,
}

impl Predicate {
    /// Creates a predicate
    pub fn new(field: u8, op: PredicateOp, value: FieldValue) -> Self {
        Self { field, op, value }
    }

    /// Verifies the field exists and the operand type and operator suit it.
    pub fn check(&self, schema: &RecordSchema) -> Result<(), TypeMismatch> {
        let Some(ty) = schema.field_type(self.field) else {
            return Err(TypeMismatch {
                field: self.field,
                reason: "field does not exist",
            });
        };
        if ty != self.value.field_type() {
            return Err(TypeMismatch {
                field: self.field,
                reason: "operand type differs from field type",
            });
        }
        if !ty.is_ordered() && !self.op.is_equality() {
            return Err(TypeMismatch {
                field: self.field,
                reason: "ordering comparison on a category field",
            });
        }
        Ok(())
    }

    /// Evaluates against a record; a missing field never matches.
    pub fn matches(&self, record: &Record) -> bool {
        record
            .field(self.field)
            .is_some_and(|v| self.op.apply(v, self.value.as_i64()))
    }

    /// Whether any value in `[min, max]` could satisfy the predicate
    pub fn admits_range(&self, min: i64, max: i64) -> bool {
        let v = self.value.as_i64();
        match self.op {
            PredicateOp::Eq => min <= v && v <= max,
            PredicateOp::Lt => min < v,
            PredicateOp::Le => min <= v,
            PredicateOp::Gt => max > v,
            PredicateOp::Ge => max >= v,
            PredicateOp::Ne => !(min == max && min == v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> RecordSchema {
        RecordSchema::new(vec![FieldType::U32, FieldType::I32, FieldType::Category], 0, 0)
    }

    #[test]
    fn test_op_codes_round_trip() {
        for op in [
            PredicateOp::Eq,
            PredicateOp::Lt,
            PredicateOp::Gt,
            PredicateOp::Le,
            PredicateOp::Ge,
            PredicateOp::Ne,
        ] {
            assert_eq!(PredicateOp::from_u8(op.as_u8()), Some(op));
        }
        assert_eq!(PredicateOp::from_u8(0), None);
    }

    #[test]
    fn test_matches() {
        let rec = Record::new(0, 0, vec![10, -4, 2], vec![], vec![]);
        assert!(Predicate::new(0, PredicateOp::Ge, FieldValue::U32(10)).matches(&rec));
        assert!(!Predicate::new(0, PredicateOp::Gt, FieldValue::U32(10)).matches(&rec));
        assert!(Predicate::new(1, PredicateOp::Lt, FieldValue::I32(0)).matches(&rec));
        assert!(Predicate::new(2, PredicateOp::Eq, FieldValue::Category(2)).matches(&rec));
    }

    #[test]
    fn test_type_checks() {
        let schema = schema();
        assert!(Predicate::new(0, PredicateOp::Eq, FieldValue::U32(1))
            .check(&schema)
            .is_ok());
        assert!(Predicate::new(0, PredicateOp::Eq, FieldValue::I32(1))
            .check(&schema)
            .is_err());
        assert!(Predicate::new(9, PredicateOp::Eq, FieldValue::U32(1))
            .check(&schema)
            .is_err());
        assert!(Predicate::new(2, PredicateOp::Lt, FieldValue::Category(1))
            .check(&schema)
            .is_err());
    }

    #[test]
    fn test_admits_range() {
        let p = Predicate::new(0, PredicateOp::Gt, FieldValue::U32(50));
        assert!(!p.admits_range(0, 50));
        assert!(p.admits_range(0, 51));
        let ne = Predicate::new(0, PredicateOp::Ne, FieldValue::U32(7));
        assert!(!ne.admits_range(7, 7));
        assert!(ne.admits_range(7, 8));
    }
}
