//! Record tree and its byte form
//!
//! Snapshots are first encoded into a tree of tagged nodes with string
//! attributes (see `codec`), then rendered to bytes here. The byte form is a
//! versioned JSON document so the format can evolve.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while encoding or decoding records
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("failed to serialize record: {0}")]
    SerializationFailed(String),

    #[error("failed to deserialize record: {0}")]
    DeserializationFailed(String),

    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u32),

    #[error("expected root <{expected}>, found <{found}>")]
    UnexpectedRoot { expected: String, found: String },

    #[error("<{tag}> is missing attribute {attribute:?}")]
    MissingAttribute { tag: String, attribute: String },

    #[error("<{tag}> has invalid {attribute:?} value {value:?}")]
    InvalidAttribute {
        tag: String,
        attribute: String,
        value: String,
    },
}

/// One node of the record tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordNode {
    pub tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RecordNode>,
}

impl RecordNode {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Adds an attribute (builder pattern)
    pub fn with_attr(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.insert(name.into(), value.to_string());
        self
    }

    /// Adds a child node (builder pattern)
    pub fn with_child(mut self, child: RecordNode) -> Self {
        self.children.push(child);
        self
    }

    /// Leaf node carrying a single `value` attribute
    pub fn value_node(tag: impl Into<String>, value: impl ToString) -> Self {
        Self::new(tag).with_attr("value", value)
    }

    pub fn push(&mut self, child: RecordNode) {
        self.children.push(child);
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Required attribute
    pub fn require_attr(&self, name: &str) -> Result<&str, CodecError> {
        self.attr(name).ok_or_else(|| CodecError::MissingAttribute {
            tag: self.tag.clone(),
            attribute: name.to_string(),
        })
    }

    /// Required attribute parsed with `FromStr`
    pub fn parse_attr<T: FromStr>(&self, name: &str) -> Result<T, CodecError> {
        let raw = self.require_attr(name)?;
        raw.parse().map_err(|_| self.invalid(name, raw))
    }

    /// The `value` attribute, parsed
    pub fn value<T: FromStr>(&self) -> Result<T, CodecError> {
        self.parse_attr("value")
    }

    pub fn invalid(&self, attribute: &str, value: &str) -> CodecError {
        CodecError::InvalidAttribute {
            tag: self.tag.clone(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    /// Fails unless this node has the given tag
    pub fn expect_tag(&self, expected: &str) -> Result<(), CodecError> {
        if self.tag == expected {
            Ok(())
        } else {
            Err(CodecError::UnexpectedRoot {
                expected: expected.to_string(),
                found: self.tag.clone(),
            })
        }
    }
}

/// Versioned envelope around a record tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDocument {
    /// Version of the record format (for future migrations)
    pub version: u32,
    pub root: RecordNode,
}

impl RecordDocument {
    /// Current version of the record format
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(root: RecordNode) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            root,
        }
    }
}

/// Renders a record tree to bytes
pub fn render(root: &RecordNode) -> Result<Vec<u8>, CodecError> {
    let doc = RecordDocument::new(root.clone());
    serde_json::to_vec_pretty(&doc).map_err(|e| CodecError::SerializationFailed(e.to_string()))
}

/// Parses bytes produced by [`render`]
pub fn parse(bytes: &[u8]) -> Result<RecordNode, CodecError> {
    let doc: RecordDocument = serde_json::from_slice(bytes)
        .map_err(|e| CodecError::DeserializationFailed(e.to_string()))?;

    if doc.version != RecordDocument::CURRENT_VERSION {
        return Err(CodecError::UnsupportedVersion(doc.version));
    }

    Ok(doc.root)
}
