//! Hash-tree snapshot and verification engine for Integra.
//!
//! An Object is a file-system subtree or a registry subtree. Taking a
//! snapshot records one `HashNode` per file/directory or key/value; verifying
//! re-derives the same fingerprints from the live host and reports every
//! discrepancy as a finding.

pub mod digest;
pub mod error;
pub mod host;
pub mod provider;
pub mod registry;
pub mod report;
pub mod snapshot;
pub mod store;
pub mod tree;
pub mod verify;

pub use digest::{DigestCompositor, Fingerprint, HashAlgorithm};
pub use error::{Error, Result};
pub use host::Host;
pub use provider::{MemoryHive, PlatformHive, RegistryHive, ResolveError};
pub use registry::{ObjectRegistry, ObjectSummary};
pub use report::{FanoutSink, MemorySink, ReportSink, Severity, TracingSink};
pub use snapshot::SnapshotOutcome;
pub use store::ObjectStore;
pub use tree::{HashNode, MonitoredObject, NodeDigest, ObjectKind};
pub use verify::{verify_all, NodeOutcome, NodeStatus, ObjectReport};
