//! Store path value object.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::StoreError;

const FORBIDDEN_CHARS: [char; 6] = ['.', '#', '$', '[', ']', '/'];
const MAX_SEGMENT_LEN: usize = 768;

/// Slash separated location of a node in the store tree.
///
/// The root is the empty path and displays as `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The root of the tree.
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse a `a/b/c` style path. Leading and trailing slashes are ignored.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut path = Self::root();
        for segment in trimmed.split('/') {
            validate_segment(raw, segment)?;
            path.segments.push(segment.to_string());
        }
        Ok(path)
    }

    /// Build a path from individual segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        segments
            .into_iter()
            .try_fold(Self::root(), |path, segment| path.child(segment.as_ref()))
    }

    /// Path of a direct child of this node.
    pub fn child(&self, segment: &str) -> Result<Self, StoreError> {
        if !is_valid_segment(segment) {
            let mut display = self.segments.clone();
            display.push(segment.to_string());
            validate_segment(&display.join("/"), segment)?;
        }
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment (the key of the node within its parent).
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// `true` if `self` equals `other` or lies underneath it.
    pub fn starts_with(&self, other: &StorePath) -> bool {
        self.segments.starts_with(&other.segments)
    }

    /// `true` if the two paths are on the same branch (one contains the other).
    pub fn overlaps(&self, other: &StorePath) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }
}

/// Check whether a string can be used as a single path segment.
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= MAX_SEGMENT_LEN
        && !segment
            .chars()
            .any(|c| FORBIDDEN_CHARS.contains(&c) || c.is_control())
}

fn validate_segment(path: &str, segment: &str) -> Result<(), StoreError> {
    if is_valid_segment(segment) {
        Ok(())
    } else {
        Err(StoreError::InvalidPath {
            path: path.to_string(),
            reason: format!("segment '{}' is empty, too long or contains . # $ [ ] /", segment),
        })
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.segments.join("/"))
        }
    }
}

impl TryFrom<String> for StorePath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StorePath> for String {
    fn from(path: StorePath) -> Self {
        path.to_string()
    }
}
