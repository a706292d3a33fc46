//! The dynamically-typed value model (spec.md §3, §4.A).
//!
//! Values are copied freely; `Integer` and `Boolean` are small enough to live
//! on the stack, and a `ChannelRef` is an opaque handle into the channel
//! registry rather than an owned resource.

use std::fmt;

use crate::error::ConkerError;
use crate::registry::ChannelId;

/// A runtime value. Equality is structural for `Integer`/`Boolean`/`Null`
/// and identity-based for `ChannelRef` (spec.md §3).
#[derive(Debug, Clone, Copy)]
pub enum Value {
    Integer(i64),
    Boolean(bool),
    Null,
    ChannelRef(ChannelId),
}

impl Value {
    /// `Null` is falsy, `Boolean` is itself, `Integer` is nonzero, and a
    /// `ChannelRef` is always truthy (spec.md open question: adopt `null` as
    /// falsy).
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(n) => *n != 0,
            Value::ChannelRef(_) => true,
        }
    }

    /// Used only when resolving a `task T[n]` multiplicity (spec.md §4.D);
    /// not a general-purpose numeric coercion. Admits `0` so the caller can
    /// reject it with its own specific diagnostic rather than this method
    /// folding "zero" and "not an integer" into the same `None`.
    pub fn as_multiplicity(&self) -> Option<usize> {
        match self {
            Value::Integer(n) if *n >= 0 => Some(*n as usize),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "Integer",
            Value::Boolean(_) => "Boolean",
            Value::Null => "Null",
            Value::ChannelRef(_) => "ChannelRef",
        }
    }

    /// Public sibling of `as_integer`, used outside this module wherever an
    /// integer is required by context rather than by an arithmetic operator
    /// (index expressions, loop/if conditions already go through
    /// `is_truthy` instead).
    pub fn expect_integer(&self, context: &'static str) -> Result<i64, ConkerError> {
        self.as_integer(context)
    }

    fn as_integer(&self, op: &'static str) -> Result<i64, ConkerError> {
        match self {
            Value::Integer(n) => Ok(*n),
            other => Err(ConkerError::Type {
                op,
                found: other.type_name(),
            }),
        }
    }

    pub fn plus(&self, rhs: &Value) -> Result<Value, ConkerError> {
        Ok(Value::Integer(
            self.as_integer("+")?
                .checked_add(rhs.as_integer("+")?)
                .ok_or(ConkerError::Arithmetic { reason: "overflow" })?,
        ))
    }

    pub fn minus(&self, rhs: &Value) -> Result<Value, ConkerError> {
        Ok(Value::Integer(
            self.as_integer("-")?
                .checked_sub(rhs.as_integer("-")?)
                .ok_or(ConkerError::Arithmetic { reason: "overflow" })?,
        ))
    }

    pub fn times(&self, rhs: &Value) -> Result<Value, ConkerError> {
        Ok(Value::Integer(
            self.as_integer("*")?
                .checked_mul(rhs.as_integer("*")?)
                .ok_or(ConkerError::Arithmetic { reason: "overflow" })?,
        ))
    }

    /// Truncated division (spec.md open question: truncation, not floor).
    pub fn divide(&self, rhs: &Value) -> Result<Value, ConkerError> {
        let lhs = self.as_integer("/")?;
        let rhs = rhs.as_integer("/")?;
        if rhs == 0 {
            return Err(ConkerError::Arithmetic {
                reason: "division by zero",
            });
        }
        Ok(Value::Integer(lhs.wrapping_div(rhs)))
    }

    pub fn compare_lt(&self, rhs: &Value) -> Result<Value, ConkerError> {
        Ok(Value::Boolean(self.as_integer("<")? < rhs.as_integer("<")?))
    }

    pub fn compare_gt(&self, rhs: &Value) -> Result<Value, ConkerError> {
        Ok(Value::Boolean(self.as_integer(">")? > rhs.as_integer(">")?))
    }

    pub fn compare_le(&self, rhs: &Value) -> Result<Value, ConkerError> {
        Ok(Value::Boolean(
            self.as_integer("<=")? <= rhs.as_integer("<=")?,
        ))
    }

    pub fn compare_ge(&self, rhs: &Value) -> Result<Value, ConkerError> {
        Ok(Value::Boolean(
            self.as_integer(">=")? >= rhs.as_integer(">=")?,
        ))
    }

    /// Structural equality for scalars, identity for `ChannelRef`. Mixed
    /// variants (other than `Null == Null`) are simply unequal, never a
    /// `TypeError` (spec.md §4.A).
    pub fn value_eq(&self, rhs: &Value) -> bool {
        match (self, rhs) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::ChannelRef(a), Value::ChannelRef(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    /// The textual rendering `$out` emits (spec.md §4.F): base-10 integers,
    /// `true`/`false`, `null`, and an opaque tag for channels.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Null => write!(f, "null"),
            Value::ChannelRef(id) => write!(f, "<channel #{}>", id.as_u64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_spec() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Integer(0).is_truthy());
        assert!(Value::Integer(-1).is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Boolean(true).is_truthy());
    }

    #[test]
    fn division_truncates_toward_zero() {
        let a = Value::Integer(-7);
        let b = Value::Integer(2);
        assert!(matches!(a.divide(&b).unwrap(), Value::Integer(-3)));
    }

    #[test]
    fn division_by_zero_is_arithmetic_error() {
        let a = Value::Integer(1);
        let z = Value::Integer(0);
        assert!(matches!(
            a.divide(&z),
            Err(ConkerError::Arithmetic { .. })
        ));
    }

    #[test]
    fn mixed_type_arithmetic_is_type_error() {
        let a = Value::Integer(1);
        let b = Value::Boolean(true);
        assert!(matches!(a.plus(&b), Err(ConkerError::Type { .. })));
    }

    #[test]
    fn equality_across_variants_is_false_except_null() {
        assert!(Value::Null.value_eq(&Value::Null));
        assert!(!Value::Integer(0).value_eq(&Value::Boolean(false)));
        assert!(!Value::Null.value_eq(&Value::Integer(0)));
    }
}
