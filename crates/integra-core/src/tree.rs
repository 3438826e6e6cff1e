//! Hash Tree model and its JSON wire format.
//!
//! Wire names follow the object list document: objects carry `object_name`,
//! `type`, `path` and `root`; nodes carry `name`, `hash` and `slaves`. A
//! missing `hash` key means the node has no digest by nature (directories),
//! while `"hash": null` means the digest could not be computed.

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::digest::{Fingerprint, HashAlgorithm};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ObjectKind {
    FileTree,
    RegistryTree,
}

impl ObjectKind {
    pub fn tag(self) -> &'static str {
        match self {
            ObjectKind::FileTree => "FILE",
            ObjectKind::RegistryTree => "REG",
        }
    }
}

impl TryFrom<u8> for ObjectKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ObjectKind::FileTree),
            1 => Ok(ObjectKind::RegistryTree),
            other => Err(format!("unknown object type {other}")),
        }
    }
}

impl From<ObjectKind> for u8 {
    fn from(kind: ObjectKind) -> u8 {
        match kind {
            ObjectKind::FileTree => 0,
            ObjectKind::RegistryTree => 1,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeDigest {
    /// The node kind has no digest (directories).
    NotApplicable,
    /// Computing the digest failed when the snapshot was taken.
    Unavailable,
    Known(Fingerprint),
}

/// One node of a Hash Tree. `children` is `Some` exactly for containers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "WireNode")]
pub struct HashNode {
    pub label: Option<String>,
    pub digest: NodeDigest,
    pub children: Option<Vec<HashNode>>,
}

impl HashNode {
    pub fn leaf(label: Option<String>, digest: NodeDigest) -> Self {
        Self {
            label,
            digest,
            children: None,
        }
    }

    pub fn container(label: Option<String>, digest: NodeDigest, children: Vec<HashNode>) -> Self {
        Self {
            label,
            digest,
            children: Some(children),
        }
    }

    pub fn is_container(&self) -> bool {
        self.children.is_some()
    }

    pub fn children(&self) -> &[HashNode] {
        self.children.as_deref().unwrap_or(&[])
    }

    pub fn child(&self, label: &str) -> Option<&HashNode> {
        self.children()
            .iter()
            .find(|c| c.label.as_deref() == Some(label))
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(HashNode::node_count).sum::<usize>()
    }
}

impl Serialize for HashNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("name", &self.label)?;
        match &self.digest {
            NodeDigest::NotApplicable => {}
            NodeDigest::Unavailable => map.serialize_entry("hash", &Option::<String>::None)?,
            NodeDigest::Known(fp) => map.serialize_entry("hash", &fp.to_hex())?,
        }
        if let Some(children) = &self.children {
            map.serialize_entry("slaves", children)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct WireNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    hash: Option<Option<String>>,
    #[serde(default)]
    slaves: Option<Vec<HashNode>>,
}

/// Keeps `"hash": null` apart from a missing `hash` key.
fn present<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Option<String>>, D::Error> {
    Option::<String>::deserialize(d).map(Some)
}

impl TryFrom<WireNode> for HashNode {
    type Error = String;

    fn try_from(wire: WireNode) -> Result<Self, Self::Error> {
        let digest = match wire.hash {
            None => NodeDigest::NotApplicable,
            Some(None) => NodeDigest::Unavailable,
            Some(Some(hex)) => NodeDigest::Known(
                Fingerprint::from_hex(&hex).map_err(|e| format!("invalid hash '{hex}': {e}"))?,
            ),
        };
        if let Some(children) = &wire.slaves {
            if children.iter().any(|c| c.label.is_none()) {
                return Err("unnamed node below the tree root".into());
            }
        }
        Ok(HashNode {
            label: wire.name,
            digest,
            children: wire.slaves,
        })
    }
}

/// One monitored unit: a named file-system or registry subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredObject {
    #[serde(rename = "object_name")]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    #[serde(rename = "path")]
    pub base_path: String,
    #[serde(default, skip_serializing_if = "HashAlgorithm::is_default")]
    pub algorithm: HashAlgorithm,
    pub root: HashNode,
}
