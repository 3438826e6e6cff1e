//! Capability interfaces over the live host.
//!
//! Snapshot and verification walk a [`LiveTree`]; the file-system and
//! registry providers are thin wrappers over OS calls.

pub mod fs;
pub mod memory;
pub mod registry;
#[cfg(windows)]
pub mod windows;

use std::io;
use thiserror::Error;

use crate::digest::Fingerprint;

pub use self::fs::FileSource;
pub use self::memory::MemoryHive;
pub use self::registry::{RegistryHive, RegistryPath, RegistrySource, RegistryValue, RootKey};

/// The registry implementation used by the service on this platform.
#[cfg(windows)]
pub type PlatformHive = self::windows::WindowsHive;
#[cfg(not(windows))]
pub type PlatformHive = MemoryHive;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("not found")]
    NotFound,
    #[error("access denied")]
    AccessDenied,
    #[error("{0}")]
    Other(String),
}

impl From<io::Error> for ResolveError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ResolveError::NotFound,
            io::ErrorKind::PermissionDenied => ResolveError::AccessDenied,
            _ => ResolveError::Other(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub container: bool,
}

/// A live object tree rooted at an Object's base path.
pub trait LiveTree {
    type Node;

    fn open_root(&self) -> Result<Self::Node, ResolveError>;

    /// Opens a direct child. `container` is the shape recorded for the child,
    /// used where names alone are ambiguous (a registry sub-key and a value
    /// may share a name).
    fn open_child(
        &self,
        parent: &Self::Node,
        name: &str,
        container: bool,
    ) -> Result<Self::Node, ResolveError>;

    fn is_container(&self, node: &Self::Node) -> bool;

    fn children(&self, node: &Self::Node) -> io::Result<Vec<ChildEntry>>;

    /// `None` when the node kind carries no digest.
    fn digest(&self, node: &Self::Node) -> Option<io::Result<Fingerprint>>;

    fn root_location(&self) -> String;

    fn child_location(&self, parent: &str, name: &str) -> String;
}
