//! Submission handlers

use std::future::Future;

use async_trait::async_trait;

use crate::store::Record;

/// Receives a form's values once they pass validation.
#[async_trait]
pub trait SubmitHandler: Send + Sync {
    async fn submit(&self, values: Record) -> anyhow::Result<()>;
}

/// Handler backed by an async closure.
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` as a [`SubmitHandler`].
pub fn submit_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Record) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> SubmitHandler for FnHandler<F>
where
    F: Fn(Record) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn submit(&self, values: Record) -> anyhow::Result<()> {
        (self.f)(values).await
    }
}

/// Handler that accepts every submission.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

#[async_trait]
impl SubmitHandler for NoopHandler {
    async fn submit(&self, _values: Record) -> anyhow::Result<()> {
        Ok(())
    }
}
