//! Binds the providers to one host: the local file system plus a registry.

use std::path::Path;

use tracing::info;

use crate::digest::{DigestCompositor, HashAlgorithm};
use crate::error::{Error, Result};
use crate::provider::{
    FileSource, PlatformHive, RegistryHive, RegistryPath, RegistrySource, ResolveError,
};
use crate::snapshot::{build_tree, SnapshotOutcome};
use crate::tree::{MonitoredObject, ObjectKind};
use crate::verify::{verify_tree, NodeStatus, ObjectReport};

#[derive(Debug, Clone, Default)]
pub struct Host<H = PlatformHive> {
    hive: H,
    algorithm: HashAlgorithm,
}

impl<H: RegistryHive> Host<H> {
    pub fn new(hive: H) -> Self {
        Self {
            hive,
            algorithm: HashAlgorithm::default(),
        }
    }

    /// Algorithm used for new snapshots. Existing objects keep their own.
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hive(&self) -> &H {
        &self.hive
    }

    pub fn snapshot(&self, name: &str, kind: ObjectKind, base_path: &str) -> Result<SnapshotOutcome> {
        self.snapshot_with(name, kind, base_path, self.algorithm)
    }

    /// Captures a complete object. Only a root that cannot be resolved fails.
    pub fn snapshot_with(
        &self,
        name: &str,
        kind: ObjectKind,
        base_path: &str,
        algorithm: HashAlgorithm,
    ) -> Result<SnapshotOutcome> {
        let compositor = DigestCompositor::new(algorithm);
        let failed = |source: ResolveError| Error::SnapshotFailed {
            name: name.to_string(),
            source,
        };

        let (base_path, (root, warnings)) = match kind {
            ObjectKind::FileTree => {
                let base = dunce::canonicalize(Path::new(base_path)).map_err(|e| failed(e.into()))?;
                let source = FileSource::new(&base, compositor);
                (base.display().to_string(), build_tree(&source).map_err(failed)?)
            }
            ObjectKind::RegistryTree => {
                let path: RegistryPath = base_path.parse()?;
                let source = RegistrySource::new(&self.hive, path.clone(), compositor);
                (path.to_string(), build_tree(&source).map_err(failed)?)
            }
        };

        info!(
            object = %name,
            kind = %kind,
            path = %base_path,
            nodes = root.node_count(),
            warnings = warnings.len(),
            "snapshot taken"
        );

        Ok(SnapshotOutcome {
            object: MonitoredObject {
                name: name.to_string(),
                kind,
                base_path,
                algorithm,
                root,
            },
            warnings,
        })
    }

    pub fn verify(&self, object: &MonitoredObject) -> ObjectReport {
        let compositor = DigestCompositor::new(object.algorithm);
        let outcomes = match object.kind {
            ObjectKind::FileTree => {
                verify_tree(&FileSource::new(&object.base_path, compositor), &object.root)
            }
            ObjectKind::RegistryTree => match object.base_path.parse::<RegistryPath>() {
                Ok(path) => verify_tree(
                    &RegistrySource::new(&self.hive, path, compositor),
                    &object.root,
                ),
                Err(e) => return ObjectReport::aborted(object, NodeStatus::OpenError(e.to_string())),
            },
        };
        ObjectReport {
            object: object.name.clone(),
            kind: object.kind,
            outcomes,
        }
    }
}
