//! Hierarchical storage keys.
//!
//! A key is a sequence of non-empty segments rendered with `/` as delimiter.
//! The empty sequence is the root key, which is the ancestor of every other key
//! and never holds a value.

use crate::error::{Result, StashError};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub const DELIMITER: char = '/';

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Key {
    parts: Vec<String>,
}

impl Key {
    pub fn root() -> Self {
        Self::default()
    }

    /// Parses a rendered key. The empty string is the root key; any other
    /// input must not contain empty segments.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Ok(Self::root());
        }
        Self::from_parts(value.split(DELIMITER))
    }

    pub fn from_parts<I, S>(parts: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let parts = parts
            .into_iter()
            .map(Into::into)
            .map(|part| validate_segment(&part).map(|_| part))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { parts })
    }

    /// Appends a relative key, given in rendered form, below this one.
    pub fn child(&self, segment: &str) -> Result<Self> {
        Ok(self.join(&Self::parse(segment)?))
    }

    pub fn join(&self, other: &Key) -> Self {
        let mut parts = self.parts.clone();
        parts.extend(other.parts.iter().cloned());
        Self { parts }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.parts.is_empty() {
            return None;
        }
        Some(Self {
            parts: self.parts[..self.parts.len() - 1].to_vec(),
        })
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    pub fn is_root(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Returns the remainder of this key below `prefix`, segment-wise.
    pub fn strip_prefix(&self, prefix: &Key) -> Option<Self> {
        self.parts
            .strip_prefix(prefix.parts.as_slice())
            .map(|rest| Self {
                parts: rest.to_vec(),
            })
    }

    /// Returns true when the rendered form of this key starts with the
    /// rendered form of `prefix`.
    pub fn starts_with_str(&self, prefix: &Key) -> bool {
        self.to_string().starts_with(&prefix.to_string())
    }

    /// Removes the segment at `index`; out of range indices leave the key as is.
    pub fn exclude_at(&self, index: usize) -> Self {
        if index >= self.parts.len() {
            return self.clone();
        }
        let mut parts = self.parts.clone();
        parts.remove(index);
        Self { parts }
    }

    pub fn exclude_first(&self, part: &str) -> Self {
        match self.parts.iter().position(|p| p == part) {
            Some(index) => self.exclude_at(index),
            None => self.clone(),
        }
    }

    pub fn exclude_last(&self, part: &str) -> Self {
        match self.parts.iter().rposition(|p| p == part) {
            Some(index) => self.exclude_at(index),
            None => self.clone(),
        }
    }

    pub fn exclude_all(&self, part: &str) -> Self {
        Self {
            parts: self.parts.iter().filter(|p| *p != part).cloned().collect(),
        }
    }

    /// Inserts `part` so that it ends up at `index`.
    pub fn insert_at(&self, part: &str, index: usize) -> Result<Self> {
        validate_segment(part)?;
        if index > self.parts.len() {
            return Err(StashError::InvalidKey(format!(
                "cannot insert '{}' at index {} into '{}' of {} parts",
                part,
                index,
                self,
                self.parts.len()
            )));
        }
        let mut parts = self.parts.clone();
        parts.insert(index, part.to_string());
        Ok(Self { parts })
    }

    fn rendered_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.parts.iter().enumerate().flat_map(|(index, part)| {
            let delimiter = (index > 0).then_some(DELIMITER as u8);
            delimiter.into_iter().chain(part.bytes())
        })
    }
}

fn validate_segment(part: &str) -> Result<()> {
    if part.is_empty() {
        return Err(StashError::InvalidKey("empty key segments are not allowed".to_string()));
    }
    if part.contains(DELIMITER) {
        return Err(StashError::InvalidKey(format!("invalid key segment: '{}'", part)));
    }
    Ok(())
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, part) in self.parts.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            f.write_str(part)?;
        }
        Ok(())
    }
}

impl FromStr for Key {
    type Err = StashError;

    fn from_str(value: &str) -> Result<Self> {
        Self::parse(value)
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Keys sort by their rendered form, not segment by segment: "a-b" < "a/b".
impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rendered_bytes().cmp(other.rendered_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(value: &str) -> Key {
        Key::parse(value).unwrap()
    }

    #[test]
    fn test_parse_render_round_trip() {
        for value in ["", "a", "a/b/c", "some.file-1.0.jar", "x/.hidden/y"] {
            assert_eq!(key(value).to_string(), value);
        }
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert!(Key::parse("a//b").is_err());
        assert!(Key::parse("/a").is_err());
        assert!(Key::parse("a/").is_err());
        assert!(Key::from_parts(["a", "b/c"]).is_err());
    }

    #[test]
    fn test_root_and_parent() {
        assert!(Key::root().is_root());
        assert_eq!(Key::root().parent(), None);
        assert_eq!(key("a/b/c").parent(), Some(key("a/b")));
        assert_eq!(key("a").parent(), Some(Key::root()));
    }

    #[test]
    fn test_child_and_join() {
        assert_eq!(key("a").child("b/c").unwrap(), key("a/b/c"));
        assert_eq!(Key::root().child("x").unwrap(), key("x"));
        assert_eq!(key("a/b").join(&key("c")), key("a/b/c"));
        assert_eq!(key("a").child("").unwrap(), key("a"));
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(key("a/b/c").strip_prefix(&key("a")), Some(key("b/c")));
        assert_eq!(key("a/b").strip_prefix(&Key::root()), Some(key("a/b")));
        assert_eq!(key("ab/c").strip_prefix(&key("a")), None);
    }

    #[test]
    fn test_exclude_operations() {
        let original = key("1/2/1/3");
        assert_eq!(original.exclude_at(1), key("1/1/3"));
        assert_eq!(original.exclude_at(10), original);
        assert_eq!(original.exclude_first("1"), key("2/1/3"));
        assert_eq!(original.exclude_last("1"), key("1/2/3"));
        assert_eq!(original.exclude_all("1"), key("2/3"));
        assert_eq!(original.exclude_first("missing"), original);
        assert_eq!(original.exclude_all("missing"), original);
    }

    #[test]
    fn test_insert_at() {
        let original = key("a/c");
        assert_eq!(original.insert_at("b", 1).unwrap(), key("a/b/c"));
        assert_eq!(original.insert_at("d", 2).unwrap(), key("a/c/d"));
        assert_eq!(original.insert_at("z", 0).unwrap(), key("z/a/c"));
        assert!(original.insert_at("x", 3).is_err());
        assert!(original.insert_at("", 0).is_err());
    }

    #[test]
    fn test_ordering_follows_rendered_form() {
        let mut keys = vec![key("a/b"), key("a-b"), key("a"), key("a/a")];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["a", "a-b", "a/a", "a/b"]);
    }

    #[test]
    fn test_starts_with_str() {
        assert!(key("a/bc/d").starts_with_str(&key("a/b")));
        assert!(key("a/b").starts_with_str(&Key::root()));
        assert!(!key("a/c").starts_with_str(&key("a/b")));
    }
}
