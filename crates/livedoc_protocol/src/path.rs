//! Path addressing into JSON snapshots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One path segment: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    /// Array index.
    Index(usize),
    /// Object key.
    Key(String),
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Segment::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Segment::Key(key)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Segment::Index(index)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(key) => write!(f, "{key}"),
            Segment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// An ordered sequence of segments addressing a location inside a snapshot,
/// e.g. `["fields", "title", "en-US"]`. The empty path addresses the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<Segment>);

impl Path {
    /// The empty path (document root).
    pub fn root() -> Self {
        Path(Vec::new())
    }

    /// Builds a path of object keys.
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Path(keys.into_iter().map(|k| Segment::Key(k.into())).collect())
    }

    /// Returns true if the path has no segments.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the path is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The segments of the path.
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    /// Returns a new path with `segment` appended.
    pub fn join(&self, segment: impl Into<Segment>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Path(segments)
    }

    /// Appends a segment in place.
    pub fn push(&mut self, segment: impl Into<Segment>) {
        self.0.push(segment.into());
    }

    /// The path with the last segment removed, or `None` at the root.
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// The last segment, or `None` at the root.
    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// Returns true if `self` starts with `prefix`.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.len() >= prefix.0.len() && self.0[..prefix.0.len()] == prefix.0[..]
    }

    /// Returns true if either path is a prefix of the other.
    ///
    /// A change at `["fields","title"]` is related to a read at
    /// `["fields","title","en-US"]` and vice versa, but not to
    /// `["fields","body"]`.
    pub fn is_related(&self, other: &Path) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// The longest common prefix of two paths.
    pub fn common_prefix(&self, other: &Path) -> Path {
        let shared = self
            .0
            .iter()
            .zip(other.0.iter())
            .take_while(|(a, b)| a == b)
            .count();
        Path(self.0[..shared].to_vec())
    }
}

impl From<Vec<Segment>> for Path {
    fn from(segments: Vec<Segment>) -> Self {
        Path(segments)
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "(root)");
        }
        let mut first = true;
        for segment in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn p(segments: &[&str]) -> Path {
        Path::keys(segments.iter().copied())
    }

    #[test]
    fn starts_with_and_related() {
        let title = p(&["fields", "title"]);
        let title_en = p(&["fields", "title", "en-US"]);
        let body = p(&["fields", "body"]);

        assert!(title_en.starts_with(&title));
        assert!(!title.starts_with(&title_en));
        assert!(title.is_related(&title_en));
        assert!(title_en.is_related(&title));
        assert!(!title.is_related(&body));
        assert!(title.is_related(&Path::root()));
    }

    #[test]
    fn common_prefix() {
        let a = p(&["fields", "title", "en-US"]);
        let b = p(&["fields", "title", "de-DE"]);
        assert_eq!(a.common_prefix(&b), p(&["fields", "title"]));
        assert_eq!(a.common_prefix(&p(&["sys"])), Path::root());
    }

    #[test]
    fn parent_and_last() {
        let path = p(&["fields", "title"]).join(2usize);
        assert_eq!(path.last(), Some(&Segment::Index(2)));
        assert_eq!(path.parent(), Some(p(&["fields", "title"])));
        assert_eq!(Path::root().parent(), None);
    }

    #[test]
    fn serde_mixed_segments() {
        let path = p(&["fields", "tags"]).join(0usize);
        let json = serde_json::to_value(&path).unwrap();
        assert_eq!(json, serde_json::json!(["fields", "tags", 0]));
        let back: Path = serde_json::from_value(json).unwrap();
        assert_eq!(back, path);
    }

    #[test]
    fn display() {
        assert_eq!(p(&["fields", "title"]).to_string(), "fields.title");
        assert_eq!(Path::root().to_string(), "(root)");
    }

    fn segment_strategy() -> impl Strategy<Value = Segment> {
        prop_oneof![
            "[a-z]{1,6}".prop_map(Segment::Key),
            (0usize..8).prop_map(Segment::Index),
        ]
    }

    fn path_strategy() -> impl Strategy<Value = Path> {
        proptest::collection::vec(segment_strategy(), 0..5).prop_map(Path::from)
    }

    proptest! {
        #[test]
        fn prefix_of_join_is_related(path in path_strategy(), segment in segment_strategy()) {
            let longer = path.join(segment);
            prop_assert!(longer.starts_with(&path));
            prop_assert!(longer.is_related(&path));
            prop_assert_eq!(longer.common_prefix(&path), path);
        }

        #[test]
        fn common_prefix_is_commutative(a in path_strategy(), b in path_strategy()) {
            prop_assert_eq!(a.common_prefix(&b), b.common_prefix(&a));
        }

        #[test]
        fn common_prefix_is_prefix_of_both(a in path_strategy(), b in path_strategy()) {
            let prefix = a.common_prefix(&b);
            prop_assert!(a.starts_with(&prefix));
            prop_assert!(b.starts_with(&prefix));
        }
    }
}
