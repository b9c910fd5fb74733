//! One reconcile attempt for one key.
//!
//! 1. Read the object from the mirror; a missing key is a success.
//! 2. Snapshot its status.
//! 3. Run the reconcile step on a private copy, catching panics.
//! 4. Write the status back only when it differs from the snapshot.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use splitter_core::{ObjectKey, RemoteStore, Resource};

use crate::error::ProcessError;
use crate::mirror::Mirror;
use crate::reconcile::Reconcile;

/// How a successful attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The key is no longer mirrored (deleted); nothing was done.
    Missing,
    /// Reconciled; the status was left as it was.
    Unchanged,
    /// Reconciled and the new status was written to the store.
    StatusUpdated,
}

pub async fn process<O, S, R>(
    key: &ObjectKey,
    mirror: &Mirror<O>,
    store: &S,
    reconciler: &R,
) -> Result<Outcome, ProcessError>
where
    O: Resource,
    S: RemoteStore<O> + ?Sized,
    R: Reconcile<O> + ?Sized,
{
    let Some(mut obj) = mirror.get(key).await else {
        tracing::debug!(key = %key, kind = O::KIND, "object no longer mirrored; skipping");
        return Ok(Outcome::Missing);
    };
    let before = obj.status().clone();

    match AssertUnwindSafe(reconciler.reconcile(&mut obj))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(ProcessError::Reconcile(Box::new(err))),
        Err(payload) => return Err(ProcessError::Panicked(panic_message(payload.as_ref()))),
    }

    if *obj.status() == before {
        return Ok(Outcome::Unchanged);
    }

    store
        .update_status(&obj)
        .await
        .map_err(ProcessError::UpdateStatus)?;
    tracing::debug!(key = %key, kind = O::KIND, "status written back");
    Ok(Outcome::StatusUpdated)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
