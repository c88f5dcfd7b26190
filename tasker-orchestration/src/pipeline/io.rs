//! # Step Input/Output
//!
//! Rust has no runtime reflection to inspect "is this return type a
//! tuple", so the rule ("if a step's output is a tuple type, unpack;
//! otherwise treat as a 1-tuple") is expressed as two traits over a
//! positional `Vec<TaggedValue>` "carry": any single
//! [`Schema`] type is a 1-element carry via the blanket impl below, and
//! tuples of `Schema` types (up to the common pipeline fan-in arities)
//! get their own impls that unpack/pack positionally.

use tasker_shared::serialization::{tag, untag, SerializationError};
use tasker_shared::{Schema, TaggedValue};

/// A step's parameter list, expressed as a positional carry. Also used
/// for the pipeline's external input (the task context), which is
/// always a single [`Schema`] type via the blanket impl.
pub trait StepInput: Send + 'static {
    fn schema_ids() -> Vec<&'static str>;
    fn from_carry(carry: Vec<TaggedValue>) -> Result<Self, SerializationError>
    where
        Self: Sized;
}

/// A step's return value, expressed as a positional carry. The final
/// step's `StepOutput` must have exactly one schema id (a pipeline's
/// final step must return a single record type) — enforced by
/// `PipelineBuilder::build`, not by this trait.
pub trait StepOutput: Send + 'static {
    fn schema_ids() -> Vec<&'static str>;
    fn into_carry(self) -> Result<Vec<TaggedValue>, SerializationError>;
}

fn carry_arity_error(expected: usize, found: usize) -> SerializationError {
    SerializationError::Malformed(format!(
        "carry arity mismatch: expected {expected} element(s), found {found}"
    ))
}

impl<T: Schema> StepInput for T {
    fn schema_ids() -> Vec<&'static str> {
        vec![T::SCHEMA_ID]
    }

    fn from_carry(carry: Vec<TaggedValue>) -> Result<Self, SerializationError> {
        if carry.len() != 1 {
            return Err(carry_arity_error(1, carry.len()));
        }
        untag(&carry[0])
    }
}

impl<T: Schema> StepOutput for T {
    fn schema_ids() -> Vec<&'static str> {
        vec![T::SCHEMA_ID]
    }

    fn into_carry(self) -> Result<Vec<TaggedValue>, SerializationError> {
        Ok(vec![tag(&self)?])
    }
}

macro_rules! impl_tuple_step_io {
    ($($idx:tt : $name:ident),+) => {
        impl<$($name: Schema),+> StepInput for ($($name,)+) {
            fn schema_ids() -> Vec<&'static str> {
                vec![$($name::SCHEMA_ID),+]
            }

            fn from_carry(carry: Vec<TaggedValue>) -> Result<Self, SerializationError> {
                let expected = Self::schema_ids().len();
                if carry.len() != expected {
                    return Err(carry_arity_error(expected, carry.len()));
                }
                Ok(($(untag::<$name>(&carry[$idx])?,)+))
            }
        }

        impl<$($name: Schema),+> StepOutput for ($($name,)+) {
            fn schema_ids() -> Vec<&'static str> {
                vec![$($name::SCHEMA_ID),+]
            }

            fn into_carry(self) -> Result<Vec<TaggedValue>, SerializationError> {
                Ok(vec![$(tag(&self.$idx)?),+])
            }
        }
    };
}

impl_tuple_step_io!(0: A, 1: B);
impl_tuple_step_io!(0: A, 1: B, 2: C);
impl_tuple_step_io!(0: A, 1: B, 2: C, 3: D);

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Count {
        n: i64,
    }
    impl Schema for Count {
        const SCHEMA_ID: &'static str = "tests::io::Count::v1";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Label {
        text: String,
    }
    impl Schema for Label {
        const SCHEMA_ID: &'static str = "tests::io::Label::v1";
    }

    #[test]
    fn single_schema_round_trips_as_one_element_carry() {
        let value = Count { n: 3 };
        let carry = value.clone().into_carry().unwrap();
        assert_eq!(carry.len(), 1);
        let back: Count = Count::from_carry(carry).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn pair_round_trips_positionally() {
        let value = (Count { n: 3 }, Label { text: "x".into() });
        let carry = value.clone().into_carry().unwrap();
        assert_eq!(carry.len(), 2);
        let back: (Count, Label) = <(Count, Label)>::from_carry(carry).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let carry = vec![tag(&Count { n: 1 }).unwrap()];
        let result = <(Count, Label)>::from_carry(carry);
        assert!(result.is_err());
    }
}
