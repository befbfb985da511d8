//! Pyxis Core
//!
//! Reconciliation engine that drives remote cloud resources toward their
//! locally declared desired state.

pub mod descriptor;
pub mod differ;
pub mod finder;
pub mod poller;
pub mod reconciler;
pub mod remote;
pub mod resource;
pub mod retry;
pub mod status;
