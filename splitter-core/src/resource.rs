//! The [`Resource`] trait: what the engine needs to know about an object.

use std::fmt::Debug;

use crate::types::{ObjectKey, ObjectMeta};

/// An object the engine can mirror, queue and reconcile.
///
/// The status type is what the pipeline snapshots before a reconcile and
/// compares afterwards; it must use structural equality.
pub trait Resource: Clone + Debug + Send + Sync + 'static {
    /// Kind name used in logs and error messages.
    const KIND: &'static str;

    type Status: Clone + PartialEq + Debug + Default + Send + Sync + 'static;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;

    fn status(&self) -> &Self::Status;

    fn status_mut(&mut self) -> &mut Self::Status;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }

    fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }
}
