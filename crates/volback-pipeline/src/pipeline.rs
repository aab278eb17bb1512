use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{PipelineError, UpstreamFailed};
use crate::handoff::{poisonable_handoff, Chunk, HandoffWriter};
use crate::stage::{BoxReader, Stage, Transform};

/// An ordered, immutable chain of stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Fails on the first stage that has no transform.
    pub fn new(stages: Vec<Stage>) -> Result<Self, PipelineError> {
        if let Some(index) = stages.iter().position(|s| s.transform().is_none()) {
            return Err(PipelineError::Config { index });
        }
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Start every stage and return the reader over the last stage's output.
    ///
    /// Returns immediately; the stages run on their own tasks and make
    /// progress as the caller drains the output. Must be called from within
    /// a tokio runtime. With no stages the output is `source` itself.
    pub fn execute(&self, cancel: CancellationToken, source: BoxReader) -> PipelineOutput {
        let mut upstream = source;
        let mut tasks = Vec::with_capacity(self.stages.len());

        let tokens: Vec<CancellationToken> =
            self.stages.iter().map(|_| cancel.child_token()).collect();

        for (index, stage) in self.stages.iter().enumerate() {
            let Some(transform) = stage.transform().cloned() else {
                // Pipeline::new guarantees every stage is configured.
                continue;
            };
            let stage_cancel = tokens[index].clone();
            // The reader of this handoff belongs to the next stage, or to the caller.
            let reader_cancel = tokens.get(index + 1).cloned().unwrap_or_else(|| cancel.clone());

            let (writer, reader, poison) = poisonable_handoff(stage_cancel.clone(), reader_cancel);

            tasks.push(tokio::spawn(run_stage(
                index,
                stage.name().to_string(),
                transform,
                stage_cancel,
                upstream,
                writer,
                poison,
            )));

            upstream = Box::new(reader);
        }

        PipelineOutput {
            reader: upstream,
            tasks,
        }
    }
}

async fn run_stage(
    index: usize,
    name: String,
    transform: Transform,
    cancel: CancellationToken,
    input: BoxReader,
    writer: HandoffWriter,
    poison: mpsc::Sender<Chunk>,
) {
    debug!(stage = %name, index, "process_start");

    // Run the body on its own task so a panic surfaces as a stage error
    // instead of a silently closed handoff.
    let body = tokio::spawn(transform(cancel.clone(), input, Box::new(writer)));
    let result = match body.await {
        Ok(result) => result,
        Err(join) => Err(anyhow::anyhow!("stage task aborted: {join}")),
    };

    match result {
        Ok(()) => debug!(stage = %name, index, "process_finish"),
        Err(source) => {
            let chain = format!("{source:#}");
            debug!(stage = %name, index, error = %chain, "process_error");

            let err = PipelineError::Processing {
                stage: name.clone(),
                source,
            };
            // Sent after every byte the transform wrote, and before the
            // last sender drops, so the reader sees the data then the error.
            tokio::select! {
                sent = poison.send(Err(UpstreamFailed::into_io(err))) => {
                    if sent.is_err() {
                        debug!(stage = %name, index, "downstream gone before error delivery");
                    }
                }
                _ = cancel.cancelled() => {}
            }
        }
    }
}

/// Reader over the final stage's output.
///
/// Yields the payload, then EOF on success or an I/O error carrying the
/// [`PipelineError`] (see [`PipelineError::from_io`]) on failure.
pub struct PipelineOutput {
    reader: BoxReader,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineOutput {
    /// Separate the output reader from the stage tasks, so the reader can be
    /// handed to a consumer by value and the tasks joined afterwards.
    pub fn into_parts(self) -> (BoxReader, StageTasks) {
        (self.reader, StageTasks(self.tasks))
    }

    /// Drop the reader and wait for every stage task to exit.
    ///
    /// Stages still producing see `BrokenPipe` on their next write, so this
    /// terminates once each transform notices.
    pub async fn shutdown(self) {
        let (reader, tasks) = self.into_parts();
        drop(reader);
        tasks.join().await;
    }
}

/// Join handles of a running pipeline's stage tasks.
pub struct StageTasks(Vec<JoinHandle<()>>);

impl StageTasks {
    /// Wait for every stage task to exit.
    ///
    /// Only returns once the output reader has been drained or dropped.
    pub async fn join(self) {
        for task in self.0 {
            if let Err(e) = task.await {
                warn!(error = %e, "pipeline stage task failed to join");
            }
        }
    }
}

impl AsyncRead for PipelineOutput {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().reader).poll_read(cx, buf)
    }
}
