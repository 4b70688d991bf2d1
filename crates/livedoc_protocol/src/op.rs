//! OT operations and their application to JSON snapshots.

use crate::error::{ApplyError, ApplyResult};
use crate::path::{Path, Segment};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of change in json-OT shape.
///
/// Object components (`Set` / `Remove`) carry the previous value where one
/// existed, mirroring the `oi`/`od` pairing of the wire protocol. List
/// components address the element through the final (index) segment of their
/// path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OtComponent {
    /// Sets the value at `path`, replacing `old` if present.
    Set {
        /// Target path; the final segment selects the key or index to set.
        path: Path,
        /// Previous value, when replacing.
        old: Option<Value>,
        /// New value.
        new: Value,
    },
    /// Removes the object entry at `path`.
    Remove {
        /// Target path; the final segment must be an object key.
        path: Path,
        /// Removed value, when known.
        old: Option<Value>,
    },
    /// Inserts `value` into the array at the path's parent, at the final
    /// index segment.
    ListInsert {
        /// Target path; the final segment is the insertion index.
        path: Path,
        /// Inserted value.
        value: Value,
    },
    /// Removes the array element at the final index segment.
    ListRemove {
        /// Target path; the final segment is the removal index.
        path: Path,
        /// Removed value, when known.
        old: Option<Value>,
    },
    /// Moves the array element at the final index segment to index `to`.
    ListMove {
        /// Target path; the final segment is the source index.
        path: Path,
        /// Destination index.
        to: usize,
    },
}

impl OtComponent {
    /// The path of the component as submitted.
    pub fn path(&self) -> &Path {
        match self {
            OtComponent::Set { path, .. }
            | OtComponent::Remove { path, .. }
            | OtComponent::ListInsert { path, .. }
            | OtComponent::ListRemove { path, .. }
            | OtComponent::ListMove { path, .. } => path,
        }
    }

    /// The path a reader must re-examine after this component applies.
    ///
    /// List components shift sibling indices, so their affected path is the
    /// containing array, not the element.
    pub fn affected_path(&self) -> Path {
        match self {
            OtComponent::Set { path, .. } | OtComponent::Remove { path, .. } => path.clone(),
            OtComponent::ListInsert { path, .. }
            | OtComponent::ListRemove { path, .. }
            | OtComponent::ListMove { path, .. } => path.parent().unwrap_or_else(Path::root),
        }
    }
}

/// A non-empty ordered list of components applied as one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OtOp {
    components: Vec<OtComponent>,
}

impl OtOp {
    /// Creates an operation from components; rejects an empty list.
    pub fn new(components: Vec<OtComponent>) -> ApplyResult<Self> {
        if components.is_empty() {
            return Err(ApplyError::EmptyOp);
        }
        Ok(Self { components })
    }

    /// Creates an operation with a single component.
    pub fn single(component: OtComponent) -> Self {
        Self {
            components: vec![component],
        }
    }

    /// The components in application order.
    pub fn components(&self) -> &[OtComponent] {
        &self.components
    }

    /// Composes two operations; composition is concatenation.
    pub fn compose(mut self, other: OtOp) -> OtOp {
        self.components.extend(other.components);
        self
    }

    /// The longest common prefix of the affected paths of all components.
    pub fn affected_path(&self) -> Path {
        let mut iter = self.components.iter().map(OtComponent::affected_path);
        let first = iter.next().unwrap_or_else(Path::root);
        iter.fold(first, |acc, path| acc.common_prefix(&path))
    }
}

/// Walks to the container holding the final segment of `path`.
fn container_mut<'a>(root: &'a mut Value, path: &Path) -> ApplyResult<&'a mut Value> {
    let segments = path.segments();
    let mut current = root;
    for (depth, segment) in segments[..segments.len() - 1].iter().enumerate() {
        let here = || Path::from(segments[..=depth].to_vec());
        current = match (current, segment) {
            (Value::Object(map), Segment::Key(key)) => map
                .get_mut(key)
                .ok_or_else(|| ApplyError::MissingContainer { path: here() })?,
            (Value::Array(items), Segment::Index(index)) => {
                let len = items.len();
                items
                    .get_mut(*index)
                    .ok_or_else(|| ApplyError::IndexOutOfRange {
                        path: here(),
                        index: *index,
                        len,
                    })?
            }
            _ => return Err(ApplyError::SegmentMismatch { path: here() }),
        };
    }
    Ok(current)
}

/// Applies one component to a snapshot.
///
/// Validation happens before any write: on error the snapshot is unchanged.
pub fn apply_component(snapshot: &mut Value, component: &OtComponent) -> ApplyResult<()> {
    let path = component.path();
    let last = path.last().ok_or(ApplyError::EmptyPath)?.clone();
    let container = container_mut(snapshot, path)?;

    match component {
        OtComponent::Set { new, .. } => match (&last, container) {
            (Segment::Key(key), Value::Object(map)) => {
                map.insert(key.clone(), new.clone());
                Ok(())
            }
            (Segment::Index(index), Value::Array(items)) => {
                let len = items.len();
                let slot = items
                    .get_mut(*index)
                    .ok_or(ApplyError::IndexOutOfRange {
                        path: path.clone(),
                        index: *index,
                        len,
                    })?;
                *slot = new.clone();
                Ok(())
            }
            (Segment::Key(_), _) => Err(ApplyError::TypeMismatch {
                path: path.clone(),
                expected: "object",
            }),
            (Segment::Index(_), _) => Err(ApplyError::TypeMismatch {
                path: path.clone(),
                expected: "array",
            }),
        },
        OtComponent::Remove { .. } => match (&last, container) {
            (Segment::Key(key), Value::Object(map)) => {
                map.remove(key);
                Ok(())
            }
            (Segment::Key(_), _) => Err(ApplyError::TypeMismatch {
                path: path.clone(),
                expected: "object",
            }),
            (Segment::Index(_), _) => Err(ApplyError::SegmentMismatch { path: path.clone() }),
        },
        OtComponent::ListInsert { value, .. } => match (&last, container) {
            (Segment::Index(index), Value::Array(items)) => {
                if *index > items.len() {
                    return Err(ApplyError::IndexOutOfRange {
                        path: path.clone(),
                        index: *index,
                        len: items.len(),
                    });
                }
                items.insert(*index, value.clone());
                Ok(())
            }
            (Segment::Index(_), _) => Err(ApplyError::TypeMismatch {
                path: path.clone(),
                expected: "array",
            }),
            (Segment::Key(_), _) => Err(ApplyError::SegmentMismatch { path: path.clone() }),
        },
        OtComponent::ListRemove { .. } => match (&last, container) {
            (Segment::Index(index), Value::Array(items)) => {
                if *index >= items.len() {
                    return Err(ApplyError::IndexOutOfRange {
                        path: path.clone(),
                        index: *index,
                        len: items.len(),
                    });
                }
                items.remove(*index);
                Ok(())
            }
            (Segment::Index(_), _) => Err(ApplyError::TypeMismatch {
                path: path.clone(),
                expected: "array",
            }),
            (Segment::Key(_), _) => Err(ApplyError::SegmentMismatch { path: path.clone() }),
        },
        OtComponent::ListMove { to, .. } => match (&last, container) {
            (Segment::Index(from), Value::Array(items)) => {
                let len = items.len();
                if *from >= len || *to >= len {
                    let index = if *from >= len { *from } else { *to };
                    return Err(ApplyError::IndexOutOfRange {
                        path: path.clone(),
                        index,
                        len,
                    });
                }
                let value = items.remove(*from);
                items.insert(*to, value);
                Ok(())
            }
            (Segment::Index(_), _) => Err(ApplyError::TypeMismatch {
                path: path.clone(),
                expected: "array",
            }),
            (Segment::Key(_), _) => Err(ApplyError::SegmentMismatch { path: path.clone() }),
        },
    }
}

/// Applies every component of `op` in order.
///
/// Stops at the first failing component; components already applied remain
/// applied, matching the transport's one-component-at-a-time semantics.
pub fn apply_op(snapshot: &mut Value, op: &OtOp) -> ApplyResult<()> {
    for component in op.components() {
        apply_component(snapshot, component)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn title_path() -> Path {
        Path::keys(["fields", "title", "en-US"])
    }

    fn snapshot() -> Value {
        json!({
            "sys": {"id": "E1", "version": 1},
            "fields": {
                "title": {"en-US": "hello"},
                "tags": {"en-US": ["a", "b", "c"]}
            }
        })
    }

    #[test]
    fn set_replaces_value() {
        let mut doc = snapshot();
        let component = OtComponent::Set {
            path: title_path(),
            old: Some(json!("hello")),
            new: json!("world"),
        };
        apply_component(&mut doc, &component).unwrap();
        assert_eq!(doc["fields"]["title"]["en-US"], json!("world"));
    }

    #[test]
    fn set_into_missing_container_fails_without_mutation() {
        let mut doc = snapshot();
        let before = doc.clone();
        let component = OtComponent::Set {
            path: Path::keys(["fields", "missing", "en-US"]),
            old: None,
            new: json!(1),
        };
        let err = apply_component(&mut doc, &component).unwrap_err();
        assert_eq!(
            err,
            ApplyError::MissingContainer {
                path: Path::keys(["fields", "missing"])
            }
        );
        assert_eq!(doc, before);
    }

    #[test]
    fn remove_deletes_key() {
        let mut doc = snapshot();
        let component = OtComponent::Remove {
            path: title_path(),
            old: Some(json!("hello")),
        };
        apply_component(&mut doc, &component).unwrap();
        assert!(doc["fields"]["title"].get("en-US").is_none());
    }

    #[test]
    fn list_insert_remove_move() {
        let mut doc = snapshot();
        let tags = Path::keys(["fields", "tags", "en-US"]);

        apply_component(
            &mut doc,
            &OtComponent::ListInsert {
                path: tags.join(1usize),
                value: json!("x"),
            },
        )
        .unwrap();
        assert_eq!(doc["fields"]["tags"]["en-US"], json!(["a", "x", "b", "c"]));

        apply_component(
            &mut doc,
            &OtComponent::ListRemove {
                path: tags.join(0usize),
                old: Some(json!("a")),
            },
        )
        .unwrap();
        assert_eq!(doc["fields"]["tags"]["en-US"], json!(["x", "b", "c"]));

        apply_component(
            &mut doc,
            &OtComponent::ListMove {
                path: tags.join(2usize),
                to: 0,
            },
        )
        .unwrap();
        assert_eq!(doc["fields"]["tags"]["en-US"], json!(["c", "x", "b"]));
    }

    #[test]
    fn list_insert_out_of_range() {
        let mut doc = snapshot();
        let component = OtComponent::ListInsert {
            path: Path::keys(["fields", "tags", "en-US"]).join(9usize),
            value: json!("x"),
        };
        assert!(matches!(
            apply_component(&mut doc, &component),
            Err(ApplyError::IndexOutOfRange { index: 9, len: 3, .. })
        ));
    }

    #[test]
    fn empty_op_rejected() {
        assert_eq!(OtOp::new(Vec::new()).unwrap_err(), ApplyError::EmptyOp);
    }

    #[test]
    fn affected_path_for_object_components() {
        let op = OtOp::single(OtComponent::Set {
            path: title_path(),
            old: None,
            new: json!(1),
        });
        assert_eq!(op.affected_path(), title_path());
    }

    #[test]
    fn affected_path_for_list_components_is_the_array() {
        let tags = Path::keys(["fields", "tags", "en-US"]);
        let op = OtOp::single(OtComponent::ListInsert {
            path: tags.join(0usize),
            value: json!("x"),
        });
        assert_eq!(op.affected_path(), tags);
    }

    #[test]
    fn affected_path_is_common_prefix_across_components() {
        let op = OtOp::new(vec![
            OtComponent::Set {
                path: title_path(),
                old: None,
                new: json!(1),
            },
            OtComponent::Set {
                path: Path::keys(["fields", "title", "de-DE"]),
                old: None,
                new: json!(2),
            },
        ])
        .unwrap();
        assert_eq!(op.affected_path(), Path::keys(["fields", "title"]));
    }

    #[test]
    fn compose_concatenates() {
        let a = OtOp::single(OtComponent::Set {
            path: title_path(),
            old: None,
            new: json!(1),
        });
        let b = OtOp::single(OtComponent::Remove {
            path: title_path(),
            old: Some(json!(1)),
        });
        let composed = a.compose(b);
        assert_eq!(composed.components().len(), 2);
    }

    #[test]
    fn apply_op_runs_components_in_order() {
        let mut doc = snapshot();
        let op = OtOp::new(vec![
            OtComponent::Set {
                path: title_path(),
                old: Some(json!("hello")),
                new: json!("step1"),
            },
            OtComponent::Set {
                path: title_path(),
                old: Some(json!("step1")),
                new: json!("step2"),
            },
        ])
        .unwrap();
        apply_op(&mut doc, &op).unwrap();
        assert_eq!(doc["fields"]["title"]["en-US"], json!("step2"));
    }
}
