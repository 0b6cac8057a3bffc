//! # Tag Space
//!
//! The enumeration of `K` output tags. Tags are collected while reading
//! training data and the space is frozen before any model is built, after
//! which `K` never changes for the lifetime of the model.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CrfError, Result};

/// Index of a tag in `[0, K)`.
pub type Tag = usize;

/// Bidirectional tag string / index dictionary with a freeze switch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpace {
    names: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, Tag>,
    frozen: bool,
}

impl TagSpace {
    /// Create an empty, unfrozen tag space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a frozen tag space from an ordered list of names.
    ///
    /// Duplicates keep their first index.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut space = Self::new();
        for name in names {
            // Cannot fail: the space is not frozen yet.
            let _ = space.insert(name);
        }
        space.freeze();
        space
    }

    /// Add a tag, returning its index. Known tags return their existing index.
    pub fn insert<S: Into<String>>(&mut self, name: S) -> Result<Tag> {
        let name = name.into();
        if let Some(&tag) = self.index.get(&name) {
            return Ok(tag);
        }
        if self.frozen {
            return Err(CrfError::FrozenTagSpace(name));
        }
        let tag = self.names.len();
        self.index.insert(name.clone(), tag);
        self.names.push(name);
        Ok(tag)
    }

    /// Freeze the space. `K` is fixed from here on.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Whether `freeze` has been called.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Fail with [`CrfError::NotFrozen`] unless the space is frozen.
    pub fn require_frozen(&self) -> Result<()> {
        if self.frozen {
            Ok(())
        } else {
            Err(CrfError::NotFrozen)
        }
    }

    /// Number of tags `K`.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no tag has been inserted.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a tag name.
    pub fn index_of(&self, name: &str) -> Result<Tag> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| CrfError::UnknownTag(name.to_string()))
    }

    /// Name of a tag index.
    pub fn name(&self, tag: Tag) -> Result<&str> {
        self.check(tag)?;
        Ok(&self.names[tag])
    }

    /// Bounds-check a tag index against `K`.
    pub fn check(&self, tag: Tag) -> Result<()> {
        check_tag(tag, self.len())
    }

    /// All tag names in index order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Map a sequence of tag names to indices.
    pub fn encode<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Tag>> {
        names.iter().map(|n| self.index_of(n.as_ref())).collect()
    }

    /// Map a sequence of indices back to names.
    pub fn decode(&self, tags: &[Tag]) -> Result<Vec<&str>> {
        tags.iter().map(|&t| self.name(t)).collect()
    }

    /// Rebuild the reverse index after deserialization.
    pub fn rebuild_index(&mut self) {
        self.index = self
            .names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
    }

    /// Read a tag space from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut space: TagSpace = serde_json::from_str(json)
            .map_err(|e| CrfError::Checkpoint(format!("tag space: {e}")))?;
        space.rebuild_index();
        Ok(space)
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CrfError::Checkpoint(format!("tag space: {e}")))
    }
}

impl fmt::Display for TagSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagSpace(K={}, [{}])", self.len(), self.names.join(", "))
    }
}

/// Bounds-check `tag` against `num_tags`.
#[inline]
pub fn check_tag(tag: Tag, num_tags: usize) -> Result<()> {
    if tag < num_tags {
        Ok(())
    } else {
        Err(CrfError::TagOutOfRange { tag, num_tags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut space = TagSpace::new();
        assert_eq!(space.insert("B-PER").unwrap(), 0);
        assert_eq!(space.insert("O").unwrap(), 1);
        assert_eq!(space.insert("B-PER").unwrap(), 0);
        assert_eq!(space.len(), 2);
        assert_eq!(space.index_of("O").unwrap(), 1);
        assert_eq!(space.name(0).unwrap(), "B-PER");
    }

    #[test]
    fn test_frozen_rejects_new_tags() {
        let mut space = TagSpace::from_names(["O", "B-LOC"]);
        assert!(space.is_frozen());
        assert_eq!(space.insert("O").unwrap(), 0);
        assert!(matches!(
            space.insert("I-LOC"),
            Err(CrfError::FrozenTagSpace(name)) if name == "I-LOC"
        ));
    }

    #[test]
    fn test_require_frozen() {
        let mut space = TagSpace::new();
        space.insert("NN").unwrap();
        assert!(matches!(space.require_frozen(), Err(CrfError::NotFrozen)));
        space.freeze();
        assert!(space.require_frozen().is_ok());
    }

    #[test]
    fn test_out_of_range() {
        let space = TagSpace::from_names(["A", "B"]);
        assert!(matches!(
            space.name(2),
            Err(CrfError::TagOutOfRange { tag: 2, num_tags: 2 })
        ));
        assert!(matches!(space.index_of("C"), Err(CrfError::UnknownTag(_))));
    }

    #[test]
    fn test_json_roundtrip_rebuilds_index() {
        let space = TagSpace::from_names(["S", "B", "M", "E"]);
        let json = space.to_json().unwrap();
        let restored = TagSpace::from_json(&json).unwrap();
        assert_eq!(restored.index_of("M").unwrap(), 2);
        assert!(restored.is_frozen());
        assert_eq!(restored, space);
    }

    #[test]
    fn test_encode_decode() {
        let space = TagSpace::from_names(["O", "B-ORG", "I-ORG"]);
        let tags = space.encode(&["B-ORG", "I-ORG", "O"]).unwrap();
        assert_eq!(tags, vec![1, 2, 0]);
        assert_eq!(space.decode(&tags).unwrap(), vec!["B-ORG", "I-ORG", "O"]);
    }
}
