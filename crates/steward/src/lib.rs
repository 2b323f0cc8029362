//! Steward: a continuous-delivery reconciliation controller.
//!
//! Watches a versioned source of declarative manifests, diffs the declared
//! state against a live platform, and converges the two through ordered,
//! policy-gated sync operations.

pub mod app;
pub mod apply;
pub mod cluster;
pub mod controller;
pub mod diff;
pub mod error;
pub mod health;
pub mod logging;
pub mod plan;
pub mod reconciler;
pub mod resource;
pub mod scheduler;
pub mod source;
pub mod status;
