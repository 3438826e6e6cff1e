//! Builds a Hash Tree from the live host.

use tracing::{debug, warn};

use crate::provider::{LiveTree, ResolveError};
use crate::tree::{HashNode, MonitoredObject, NodeDigest};

/// A freshly captured object plus the places that could not be read.
#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub object: MonitoredObject,
    pub warnings: Vec<String>,
}

/// Walks `tree` from its root. Only a root that cannot be opened is fatal;
/// an unreadable child is left out and an unreadable leaf is recorded with
/// an unavailable digest.
pub fn build_tree<T: LiveTree>(tree: &T) -> Result<(HashNode, Vec<String>), ResolveError> {
    let root = tree.open_root()?;
    let mut warnings = Vec::new();
    let location = tree.root_location();
    let node = build_node(tree, &root, None, &location, &mut warnings);
    debug!(
        location = %location,
        nodes = node.node_count(),
        skipped = warnings.len(),
        "snapshot built"
    );
    Ok((node, warnings))
}

fn build_node<T: LiveTree>(
    tree: &T,
    node: &T::Node,
    label: Option<String>,
    location: &str,
    warnings: &mut Vec<String>,
) -> HashNode {
    let digest = match tree.digest(node) {
        None => NodeDigest::NotApplicable,
        Some(Ok(fp)) => NodeDigest::Known(fp),
        Some(Err(e)) => {
            warn!(location = %location, error = %e, "digest unavailable");
            warnings.push(format!("{location}: {e}"));
            NodeDigest::Unavailable
        }
    };

    if !tree.is_container(node) {
        return HashNode::leaf(label, digest);
    }

    let entries = match tree.children(node) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(location = %location, error = %e, "cannot enumerate children");
            warnings.push(format!("{location}: {e}"));
            Vec::new()
        }
    };

    let mut children = Vec::with_capacity(entries.len());
    for entry in entries {
        let child_location = tree.child_location(location, &entry.name);
        match tree.open_child(node, &entry.name, entry.container) {
            Ok(child) => children.push(build_node(
                tree,
                &child,
                Some(entry.name),
                &child_location,
                warnings,
            )),
            Err(e) => {
                warn!(location = %child_location, error = %e, "skipping unreadable child");
                warnings.push(format!("{child_location}: {e}"));
            }
        }
    }

    HashNode::container(label, digest, children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::DigestCompositor;
    use crate::provider::{FileSource, MemoryHive, RegistrySource};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn file_tree_shape() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello world").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("b.txt"), b"").unwrap();

        let source = FileSource::new(dir.path(), DigestCompositor::default());
        let (root, warnings) = build_tree(&source).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(root.label, None);
        assert_eq!(root.digest, NodeDigest::NotApplicable);

        let a = root.child("a.txt").unwrap();
        assert_eq!(
            a.digest,
            NodeDigest::Known(
                crate::Fingerprint::from_hex("5eb63bbbe01eeed093cb22bb8f5acdc3").unwrap()
            )
        );
        let sub = root.child("sub").unwrap();
        assert!(sub.is_container());
        assert_eq!(sub.children().len(), 1);
    }

    #[test]
    fn registry_children_list_keys_before_values() {
        let hive = MemoryHive::new();
        let base = "HKEY_LOCAL_MACHINE\\SOFTWARE\\Test";
        hive.set_value(base, "A", 1, b"x\0").unwrap();
        hive.create_key(&format!("{base}\\Z")).unwrap();

        let source = RegistrySource::new(&hive, base.parse().unwrap(), DigestCompositor::default());
        let (root, _) = build_tree(&source).unwrap();
        let labels: Vec<_> = root
            .children()
            .iter()
            .map(|c| c.label.clone().unwrap())
            .collect();
        assert_eq!(labels, vec!["Z", "A"]);
        assert!(matches!(root.digest, NodeDigest::Known(_)));
        assert!(root.children()[0].is_container());
        assert!(!root.children()[1].is_container());
    }

    #[test]
    fn denied_sub_key_is_skipped_with_warning() {
        let hive = MemoryHive::new();
        let base = "HKEY_LOCAL_MACHINE\\SOFTWARE\\Test";
        hive.create_key(&format!("{base}\\Open")).unwrap();
        hive.create_key(&format!("{base}\\Locked")).unwrap();
        hive.deny(&format!("{base}\\Locked")).unwrap();

        let source = RegistrySource::new(&hive, base.parse().unwrap(), DigestCompositor::default());
        let (root, warnings) = build_tree(&source).unwrap();
        assert_eq!(root.children().len(), 1);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Locked"));
    }

    #[test]
    fn unreadable_value_is_kept_with_null_hash() {
        let hive = MemoryHive::new();
        let base = "HKEY_LOCAL_MACHINE\\SOFTWARE\\Test";
        hive.set_value(base, "Plain", 1, b"a\0").unwrap();
        hive.set_value(base, "Locked", 1, b"b\0").unwrap();
        hive.deny_value(base, "Locked").unwrap();

        let source = RegistrySource::new(&hive, base.parse().unwrap(), DigestCompositor::default());
        let (root, warnings) = build_tree(&source).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("Locked"));

        let locked = root.child("Locked").unwrap();
        assert_eq!(locked.digest, NodeDigest::Unavailable);
        assert!(matches!(root.child("Plain").unwrap().digest, NodeDigest::Known(_)));

        let json = serde_json::to_value(locked).unwrap();
        assert!(json.as_object().unwrap().contains_key("hash"));
        assert!(json["hash"].is_null());
    }

    #[test]
    fn missing_root_fails() {
        let hive = MemoryHive::new();
        let source = RegistrySource::new(
            &hive,
            "HKEY_LOCAL_MACHINE\\Nope".parse().unwrap(),
            DigestCompositor::default(),
        );
        assert_eq!(build_tree(&source).unwrap_err(), ResolveError::NotFound);
    }
}
