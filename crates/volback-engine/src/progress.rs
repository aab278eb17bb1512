use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

/// Progress callback type (bytes_done, message)
pub type ProgressFn = Box<dyn Fn(u64, &str) + Send + Sync>;

/// Counts bytes read through it and reports them to an optional callback.
pub(crate) struct ProgressReader<'a, R> {
    inner: R,
    done: u64,
    label: &'static str,
    progress: Option<&'a ProgressFn>,
}

impl<'a, R> ProgressReader<'a, R> {
    pub(crate) fn new(inner: R, label: &'static str, progress: Option<&'a ProgressFn>) -> Self {
        Self {
            inner,
            done: 0,
            label,
            progress,
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<'_, R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;

        let n = buf.filled().len() - before;
        if n > 0 {
            this.done += n as u64;
            if let Some(cb) = this.progress {
                cb(this.done, this.label);
            }
        }
        Poll::Ready(Ok(()))
    }
}
