use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;

use super::{ChildEntry, LiveTree, ResolveError};
use crate::digest::{DigestCompositor, Fingerprint};
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RootKey {
    ClassesRoot,
    CurrentConfig,
    CurrentUser,
    LocalMachine,
    Users,
}

impl RootKey {
    pub fn name(self) -> &'static str {
        match self {
            RootKey::ClassesRoot => "HKEY_CLASSES_ROOT",
            RootKey::CurrentConfig => "HKEY_CURRENT_CONFIG",
            RootKey::CurrentUser => "HKEY_CURRENT_USER",
            RootKey::LocalMachine => "HKEY_LOCAL_MACHINE",
            RootKey::Users => "HKEY_USERS",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        let root = match s.to_ascii_uppercase().as_str() {
            "HKEY_CLASSES_ROOT" | "HKCR" => RootKey::ClassesRoot,
            "HKEY_CURRENT_CONFIG" | "HKCC" => RootKey::CurrentConfig,
            "HKEY_CURRENT_USER" | "HKCU" => RootKey::CurrentUser,
            "HKEY_LOCAL_MACHINE" | "HKLM" => RootKey::LocalMachine,
            "HKEY_USERS" | "HKU" => RootKey::Users,
            _ => return None,
        };
        Some(root)
    }
}

/// A registry path of the form `ROOT\sub\key`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryPath {
    pub root: RootKey,
    pub sub_key: String,
}

impl RegistryPath {
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.sub_key.split('\\').filter(|s| !s.is_empty())
    }
}

impl FromStr for RegistryPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (root, sub_key) = s
            .split_once('\\')
            .ok_or_else(|| Error::InvalidRegistryPath(s.to_string()))?;
        let root = RootKey::parse(root).ok_or_else(|| Error::InvalidRegistryPath(s.to_string()))?;
        Ok(Self {
            root,
            sub_key: sub_key.trim_matches('\\').to_string(),
        })
    }
}

impl fmt::Display for RegistryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\\{}", self.root.name(), self.sub_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryValue {
    pub type_code: u32,
    pub data: Vec<u8>,
}

/// Read access to a registry.
pub trait RegistryHive {
    type Key;

    fn open_key(&self, path: &RegistryPath) -> Result<Self::Key, ResolveError>;

    fn open_sub_key(&self, parent: &Self::Key, name: &str) -> Result<Self::Key, ResolveError>;

    fn sub_key_names(&self, key: &Self::Key) -> io::Result<Vec<String>>;

    fn value_names(&self, key: &Self::Key) -> io::Result<Vec<String>>;

    fn value_exists(&self, key: &Self::Key, name: &str) -> Result<bool, ResolveError>;

    fn read_value(&self, key: &Self::Key, name: &str) -> io::Result<RegistryValue>;
}

impl<H: RegistryHive + ?Sized> RegistryHive for &H {
    type Key = H::Key;

    fn open_key(&self, path: &RegistryPath) -> Result<Self::Key, ResolveError> {
        (**self).open_key(path)
    }

    fn open_sub_key(&self, parent: &Self::Key, name: &str) -> Result<Self::Key, ResolveError> {
        (**self).open_sub_key(parent, name)
    }

    fn sub_key_names(&self, key: &Self::Key) -> io::Result<Vec<String>> {
        (**self).sub_key_names(key)
    }

    fn value_names(&self, key: &Self::Key) -> io::Result<Vec<String>> {
        (**self).value_names(key)
    }

    fn value_exists(&self, key: &Self::Key, name: &str) -> Result<bool, ResolveError> {
        (**self).value_exists(key, name)
    }

    fn read_value(&self, key: &Self::Key, name: &str) -> io::Result<RegistryValue> {
        (**self).read_value(key, name)
    }
}

pub enum RegNode<K> {
    Key(Arc<K>),
    Value { parent: Arc<K>, name: String },
}

/// Registry subtree rooted at a key.
pub struct RegistrySource<'h, H> {
    hive: &'h H,
    path: RegistryPath,
    compositor: DigestCompositor,
}

impl<'h, H: RegistryHive> RegistrySource<'h, H> {
    pub fn new(hive: &'h H, path: RegistryPath, compositor: DigestCompositor) -> Self {
        Self {
            hive,
            path,
            compositor,
        }
    }

    fn key_digest(&self, key: &H::Key) -> io::Result<Fingerprint> {
        let sub_keys = self.hive.sub_key_names(key)?;
        let values = self.hive.value_names(key)?;
        Ok(self.compositor.container_key(&sub_keys, &values))
    }
}

impl<H: RegistryHive> LiveTree for RegistrySource<'_, H> {
    type Node = RegNode<H::Key>;

    fn open_root(&self) -> Result<Self::Node, ResolveError> {
        self.hive.open_key(&self.path).map(|k| RegNode::Key(Arc::new(k)))
    }

    fn open_child(
        &self,
        parent: &Self::Node,
        name: &str,
        container: bool,
    ) -> Result<Self::Node, ResolveError> {
        let key = match parent {
            RegNode::Key(key) => key,
            RegNode::Value { .. } => return Err(ResolveError::Other("values have no children".into())),
        };
        let as_value = || RegNode::Value {
            parent: Arc::clone(key),
            name: name.to_string(),
        };

        if container {
            match self.hive.open_sub_key(key, name) {
                Ok(sub) => Ok(RegNode::Key(Arc::new(sub))),
                Err(ResolveError::NotFound) if self.hive.value_exists(key, name) == Ok(true) => {
                    Ok(as_value())
                }
                Err(e) => Err(e),
            }
        } else {
            match self.hive.value_exists(key, name)? {
                true => Ok(as_value()),
                false => self
                    .hive
                    .open_sub_key(key, name)
                    .map(|sub| RegNode::Key(Arc::new(sub))),
            }
        }
    }

    fn is_container(&self, node: &Self::Node) -> bool {
        matches!(node, RegNode::Key(_))
    }

    fn children(&self, node: &Self::Node) -> io::Result<Vec<ChildEntry>> {
        let RegNode::Key(key) = node else {
            return Ok(Vec::new());
        };
        let sub_keys = self.hive.sub_key_names(key)?.into_iter().map(|name| ChildEntry {
            name,
            container: true,
        });
        let values = self.hive.value_names(key)?.into_iter().map(|name| ChildEntry {
            name,
            container: false,
        });
        Ok(sub_keys.chain(values).collect())
    }

    fn digest(&self, node: &Self::Node) -> Option<io::Result<Fingerprint>> {
        Some(match node {
            RegNode::Key(key) => self.key_digest(key),
            RegNode::Value { parent, name } => self
                .hive
                .read_value(parent, name)
                .map(|v| self.compositor.registry_value(v.type_code, &v.data)),
        })
    }

    fn root_location(&self) -> String {
        self.path.to_string()
    }

    fn child_location(&self, parent: &str, name: &str) -> String {
        format!("{parent}\\{name}")
    }
}
