//! Integra service: the monitor loop, change notifications, findings journal
//! and configuration around `integra-core`.

pub mod install;
pub mod journal;
pub mod monitor;
pub mod notifier;
pub mod paths;
pub mod settings;
