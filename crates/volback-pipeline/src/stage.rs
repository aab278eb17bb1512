use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A stage body: read the upstream bytes, write the transformed bytes.
///
/// Returning `Ok` closes the output cleanly; returning `Err` poisons it.
/// The token is the stage's own child token and may be checked between
/// long computations.
pub type Transform = Arc<
    dyn Fn(CancellationToken, BoxReader, BoxWriter) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

/// One named step of a [`Pipeline`](crate::Pipeline).
#[derive(Clone)]
pub struct Stage {
    name: String,
    transform: Option<Transform>,
}

impl Stage {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CancellationToken, BoxReader, BoxWriter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            transform: Some(Arc::new(
                move |cancel: CancellationToken, reader: BoxReader, writer: BoxWriter| {
                    f(cancel, reader, writer).boxed()
                },
            )),
        }
    }

    /// A stage with a name but nothing to run. Rejected by `Pipeline::new`.
    pub fn unconfigured(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: None,
        }
    }

    /// Copies its input to its output unchanged.
    pub fn passthrough(name: impl Into<String>) -> Self {
        Self::new(name, |_cancel, mut reader, mut writer| async move {
            tokio::io::copy(&mut reader, &mut writer).await?;
            writer.shutdown().await?;
            Ok(())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transform(&self) -> Option<&Transform> {
        self.transform.as_ref()
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("configured", &self.transform.is_some())
            .finish()
    }
}
