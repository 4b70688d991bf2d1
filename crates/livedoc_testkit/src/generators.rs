//! Proptest strategies for protocol values.

use livedoc_protocol::{OtComponent, OtOp, Path, Segment};
use proptest::prelude::*;
use serde_json::Value;

/// A path segment: short keys and small indices.
pub fn segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        "[a-z]{1,8}".prop_map(Segment::from),
        (0usize..8).prop_map(Segment::from),
    ]
}

/// A path of up to `max_len` segments.
pub fn path(max_len: usize) -> impl Strategy<Value = Path> {
    prop::collection::vec(segment(), 0..=max_len).prop_map(Path::from)
}

/// A scalar JSON value.
pub fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| Value::from(n)),
        "[a-z ]{0,12}".prop_map(Value::from),
    ]
}

/// A field-level `Set` component under `["fields", <field>, <locale>]`.
pub fn field_set() -> impl Strategy<Value = OtComponent> {
    ("[a-z]{1,8}", scalar(), proptest::option::of(scalar())).prop_map(|(field, new, old)| {
        OtComponent::Set {
            path: Path::keys(["fields", field.as_str(), "en-US"]),
            old,
            new,
        }
    })
}

/// An op of one to three field-level sets.
pub fn field_op() -> impl Strategy<Value = OtOp> {
    prop::collection::vec(field_set(), 1..=3)
        .prop_map(|components| OtOp::new(components).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_paths_respect_length(p in path(4)) {
            prop_assert!(p.len() <= 4);
        }

        #[test]
        fn generated_ops_are_never_empty(op in field_op()) {
            prop_assert!(!op.components().is_empty());
        }
    }
}
