//! The user-supplied reconcile step.

use std::error::Error as StdError;
use std::marker::PhantomData;

use async_trait::async_trait;
use splitter_core::Resource;

/// Drives one object toward its desired state.
///
/// Receives a private copy of the mirrored object. Side effects on other
/// objects go through whatever store handle the implementor holds; changes
/// to `obj`'s status are written back by the engine when they differ from
/// the mirrored status. Must be idempotent: the engine may call it again for
/// the same key at any time.
#[async_trait]
pub trait Reconcile<O: Resource>: Send + Sync + 'static {
    type Error: StdError + Send + Sync + 'static;

    async fn reconcile(&self, obj: &mut O) -> Result<(), Self::Error>;
}

/// Adapts a synchronous closure into a [`Reconcile`] implementation.
pub struct FnReconciler<O, F> {
    f: F,
    _object: PhantomData<fn(&mut O)>,
}

impl<O, F> FnReconciler<O, F> {
    pub fn new(f: F) -> Self {
        Self {
            f,
            _object: PhantomData,
        }
    }
}

#[async_trait]
impl<O, F, E> Reconcile<O> for FnReconciler<O, F>
where
    O: Resource,
    F: Fn(&mut O) -> Result<(), E> + Send + Sync + 'static,
    E: StdError + Send + Sync + 'static,
{
    type Error = E;

    async fn reconcile(&self, obj: &mut O) -> Result<(), E> {
        (self.f)(obj)
    }
}
