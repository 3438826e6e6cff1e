//! Compares stored Hash Trees with the live host.
//!
//! Each resolved node yields exactly one [`NodeOutcome`], in post-order
//! (children before their parent). A node that cannot be resolved yields
//! one `Missing` or `OpenError` outcome and its descendants are skipped;
//! siblings are still verified.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::digest::Fingerprint;
use crate::host::Host;
use crate::provider::{LiveTree, RegistryHive, ResolveError};
use crate::report::{ReportSink, Severity};
use crate::tree::{HashNode, MonitoredObject, NodeDigest, ObjectKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeShape {
    Container,
    Leaf,
}

impl NodeShape {
    fn of(container: bool) -> Self {
        if container {
            NodeShape::Container
        } else {
            NodeShape::Leaf
        }
    }
}

impl fmt::Display for NodeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeShape::Container => "container",
            NodeShape::Leaf => "leaf",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Ok,
    Missing,
    OpenError(String),
    TypeMismatch {
        expected: NodeShape,
        actual: NodeShape,
    },
    DigestMismatch {
        expected: Fingerprint,
        actual: Fingerprint,
    },
    DigestUnavailable(String),
}

impl NodeStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, NodeStatus::Ok)
    }

    pub fn severity(&self) -> Severity {
        match self {
            NodeStatus::Ok => Severity::Info,
            NodeStatus::OpenError(_) | NodeStatus::DigestUnavailable(_) => Severity::Warning,
            NodeStatus::Missing | NodeStatus::TypeMismatch { .. } | NodeStatus::DigestMismatch { .. } => {
                Severity::Error
            }
        }
    }

    fn unresolved(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound => NodeStatus::Missing,
            other => NodeStatus::OpenError(other.to_string()),
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeStatus::Ok => f.write_str("ok"),
            NodeStatus::Missing => f.write_str("missing"),
            NodeStatus::OpenError(reason) => write!(f, "cannot be opened: {reason}"),
            NodeStatus::TypeMismatch { expected, actual } => {
                write!(f, "type mismatch: expected {expected}, found {actual}")
            }
            NodeStatus::DigestMismatch { expected, actual } => {
                write!(f, "digest mismatch: expected {expected}, found {actual}")
            }
            NodeStatus::DigestUnavailable(reason) => write!(f, "digest unavailable: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutcome {
    pub path: String,
    pub status: NodeStatus,
}

/// Outcome of verifying one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReport {
    pub object: String,
    pub kind: ObjectKind,
    pub outcomes: Vec<NodeOutcome>,
}

impl ObjectReport {
    pub fn findings(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.iter().filter(|o| !o.status.is_ok())
    }

    pub fn is_clean(&self) -> bool {
        self.findings().next().is_none()
    }

    /// Report for an object whose root could not be reached at all.
    pub(crate) fn aborted(object: &MonitoredObject, status: NodeStatus) -> Self {
        Self {
            object: object.name.clone(),
            kind: object.kind,
            outcomes: vec![NodeOutcome {
                path: object.base_path.clone(),
                status,
            }],
        }
    }
}

/// Verifies `stored` against `tree` and returns one outcome per resolved node.
pub fn verify_tree<T: LiveTree>(tree: &T, stored: &HashNode) -> Vec<NodeOutcome> {
    let location = tree.root_location();
    let mut outcomes = Vec::new();
    match tree.open_root() {
        Ok(root) => verify_node(tree, &root, stored, location, &mut outcomes),
        Err(e) => outcomes.push(NodeOutcome {
            path: location,
            status: NodeStatus::unresolved(e),
        }),
    }
    outcomes
}

fn verify_node<T: LiveTree>(
    tree: &T,
    live: &T::Node,
    stored: &HashNode,
    location: String,
    outcomes: &mut Vec<NodeOutcome>,
) {
    let expected = NodeShape::of(stored.is_container());
    let actual = NodeShape::of(tree.is_container(live));
    if expected != actual {
        outcomes.push(NodeOutcome {
            path: location,
            status: NodeStatus::TypeMismatch { expected, actual },
        });
        return;
    }

    for child in stored.children() {
        let Some(name) = child.label.as_deref() else {
            continue;
        };
        let child_location = tree.child_location(&location, name);
        match tree.open_child(live, name, child.is_container()) {
            Ok(child_live) => verify_node(tree, &child_live, child, child_location, outcomes),
            Err(e) => outcomes.push(NodeOutcome {
                path: child_location,
                status: NodeStatus::unresolved(e),
            }),
        }
    }

    let status = match &stored.digest {
        NodeDigest::Known(expected) => match tree.digest(live) {
            Some(Ok(actual)) if &actual == expected => NodeStatus::Ok,
            Some(Ok(actual)) => NodeStatus::DigestMismatch {
                expected: expected.clone(),
                actual,
            },
            Some(Err(e)) => NodeStatus::DigestUnavailable(e.to_string()),
            None => NodeStatus::DigestUnavailable("node no longer carries a digest".into()),
        },
        NodeDigest::NotApplicable | NodeDigest::Unavailable => NodeStatus::Ok,
    };
    outcomes.push(NodeOutcome {
        path: location,
        status,
    });
}

/// Verifies every object in order, reporting findings to `sink`. A panic
/// while verifying one object is reported and the pass moves on.
pub fn verify_all<H: RegistryHive>(
    host: &Host<H>,
    objects: &[MonitoredObject],
    sink: &dyn ReportSink,
) -> Vec<ObjectReport> {
    sink.report(
        Severity::Info,
        &format!("verification pass started ({} objects)", objects.len()),
    );

    let mut reports = Vec::with_capacity(objects.len());
    let mut findings = 0usize;
    for object in objects {
        let report = match panic::catch_unwind(AssertUnwindSafe(|| host.verify(object))) {
            Ok(report) => report,
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(object = %object.name, reason = %reason, "verification panicked");
                ObjectReport::aborted(
                    object,
                    NodeStatus::OpenError(format!("verification aborted: {reason}")),
                )
            }
        };
        findings += emit(&report, sink);
        reports.push(report);
    }

    sink.report(
        Severity::Info,
        &format!(
            "verification pass finished: {} objects, {} findings",
            objects.len(),
            findings
        ),
    );
    reports
}

/// Sends the findings of one report to `sink`; returns how many there were.
pub fn emit(report: &ObjectReport, sink: &dyn ReportSink) -> usize {
    let mut count = 0;
    for finding in report.findings() {
        sink.report(
            finding.status.severity(),
            &format!(
                "[{}] {} '{}': {}",
                report.object,
                report.kind,
                finding.path,
                finding.status
            ),
        );
        count += 1;
    }
    debug!(object = %report.object, nodes = report.outcomes.len(), findings = count, "object verified");
    count
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
