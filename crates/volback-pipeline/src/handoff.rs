//! Bounded, backpressured byte conduit between two adjacent stages
//!
//! Each handoff is an mpsc channel with a single slot. A write completes
//! only once the previous chunk has been taken by the reader, and a write
//! against a dropped reader fails with `BrokenPipe`. Both ends observe the
//! stage's cancellation token and fail with `Interrupted` once it fires.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::StreamReader;
use tokio_util::sync::{CancellationToken, PollSender, WaitForCancellationFutureOwned};

/// Chunks in flight per handoff
pub const HANDOFF_CAPACITY: usize = 1;

pub(crate) type Chunk = io::Result<Bytes>;

/// Create a connected writer/reader pair.
///
/// `writer_cancel` and `reader_cancel` are the tokens of the stages on
/// either side; a pipeline passes the producing and consuming stage's
/// tokens respectively.
pub fn handoff(
    writer_cancel: CancellationToken,
    reader_cancel: CancellationToken,
) -> (HandoffWriter, HandoffReader) {
    let (writer, reader, _) = poisonable_handoff(writer_cancel, reader_cancel);
    (writer, reader)
}

/// Like [`handoff`], plus a second sender the owning stage keeps to deliver
/// its terminal error. The reader sees EOF only once both are dropped.
pub(crate) fn poisonable_handoff(
    writer_cancel: CancellationToken,
    reader_cancel: CancellationToken,
) -> (HandoffWriter, HandoffReader, mpsc::Sender<Chunk>) {
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    (
        HandoffWriter::new(tx.clone(), writer_cancel),
        HandoffReader::new(rx, reader_cancel),
        tx,
    )
}

/// Future that resolves once a token is cancelled, polled from `poll_*`
struct Cancellation {
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl Cancellation {
    fn new(token: CancellationToken) -> Self {
        let cancelled = Box::pin(token.clone().cancelled_owned());
        Self { token, cancelled }
    }

    /// `Err(Interrupted)` once cancelled; otherwise registers the waker.
    fn poll_check(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if self.token.is_cancelled() || self.cancelled.as_mut().poll(cx).is_ready() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "pipeline cancelled",
            ));
        }
        Ok(())
    }
}

/// Writing end of a handoff.
pub struct HandoffWriter {
    sender: PollSender<Chunk>,
    cancel: Cancellation,
}

impl HandoffWriter {
    fn new(tx: mpsc::Sender<Chunk>, cancel: CancellationToken) -> Self {
        Self {
            sender: PollSender::new(tx),
            cancel: Cancellation::new(cancel),
        }
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "downstream stage is gone")
}

impl AsyncWrite for HandoffWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.cancel.poll_check(cx)?;
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        ready!(this.sender.poll_reserve(cx)).map_err(|_| broken_pipe())?;
        this.sender
            .send_item(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| broken_pipe())?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Every accepted write is already in the channel.
        self.get_mut().cancel.poll_check(cx)?;
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().sender.close();
        Poll::Ready(Ok(()))
    }
}

/// Reading end of a handoff.
///
/// Yields bytes in write order, then either EOF (upstream finished cleanly)
/// or the error upstream poisoned the handoff with.
pub struct HandoffReader {
    inner: StreamReader<ReceiverStream<Chunk>, Bytes>,
    cancel: Cancellation,
}

impl HandoffReader {
    fn new(rx: mpsc::Receiver<Chunk>, cancel: CancellationToken) -> Self {
        Self {
            inner: StreamReader::new(ReceiverStream::new(rx)),
            cancel: Cancellation::new(cancel),
        }
    }
}

impl AsyncRead for HandoffReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.cancel.poll_check(cx)?;
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}
