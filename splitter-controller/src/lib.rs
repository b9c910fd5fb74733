//! Level-triggered controller engine: mirror, worker pool, retry policy.
//!
//! Wire a [`Controller`] from a [`RemoteStore`](splitter_core::RemoteStore),
//! a [`MirrorWriter`] and a [`Reconcile`] implementation, then call
//! [`Controller::run`]. Stop it from anywhere with a [`ControllerHandle`].

pub mod config;
mod controller;
mod error;
pub mod mirror;
pub mod pipeline;
mod reconcile;
mod report;

pub use config::ControllerConfig;
pub use controller::{Controller, ControllerHandle, NOTIFY_CAPACITY};
pub use error::{ControllerError, ProcessError};
pub use mirror::{mirror, Mirror, MirrorWriter, Reflector};
pub use pipeline::Outcome;
pub use reconcile::{FnReconciler, Reconcile};
pub use report::{ErrorSink, LogSink};
