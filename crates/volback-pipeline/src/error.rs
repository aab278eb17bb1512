use std::error::Error as StdError;
use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage was constructed without a transform
    #[error("stage {index} has no transform")]
    Config { index: usize },

    #[error("stage '{stage}' failed")]
    Processing {
        stage: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PipelineError {
    /// Name of the stage that failed first.
    ///
    /// Walks the source chain and returns the innermost `Processing` stage.
    /// `None` for configuration errors.
    pub fn origin_stage(&self) -> Option<&str> {
        let mut origin = None;
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(PipelineError::Processing { stage, .. }) = err.downcast_ref::<PipelineError>()
            {
                origin = Some(stage.as_str());
            }
            current = err.source();
        }
        origin
    }

    /// The pipeline error carried by an I/O error read from a poisoned
    /// handoff, if any.
    pub fn from_io(err: &io::Error) -> Option<&PipelineError> {
        err.get_ref()?
            .downcast_ref::<UpstreamFailed>()
            .map(|upstream| &upstream.0)
    }

    /// Owned variant of [`PipelineError::from_io`]: the carried pipeline
    /// error, or the original I/O error when it carries none.
    pub fn try_from_io(err: io::Error) -> Result<PipelineError, io::Error> {
        if PipelineError::from_io(&err).is_none() {
            return Err(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<UpstreamFailed>()) {
            Some(Ok(upstream)) => {
                let UpstreamFailed(inner) = *upstream;
                Ok(inner)
            }
            Some(Err(other)) => Err(io::Error::new(kind, other)),
            None => Err(io::Error::from(kind)),
        }
    }
}

/// Payload of the I/O error a poisoned handoff yields to its reader.
///
/// `io::Error::source` skips over its custom payload, so the pipeline error
/// is exposed as this type's source to keep it visible in the chain.
#[derive(Debug, Error)]
#[error("upstream stage failed")]
pub struct UpstreamFailed(#[source] pub PipelineError);

impl UpstreamFailed {
    pub fn into_io(err: PipelineError) -> io::Error {
        io::Error::other(UpstreamFailed(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing(stage: &str, source: anyhow::Error) -> PipelineError {
        PipelineError::Processing {
            stage: stage.into(),
            source,
        }
    }

    #[test]
    fn test_origin_of_single_failure() {
        let err = processing("encrypt", anyhow::anyhow!("boom"));
        assert_eq!(err.origin_stage(), Some("encrypt"));
        assert_eq!(err.to_string(), "stage 'encrypt' failed");
    }

    #[test]
    fn test_origin_through_io_errors() {
        let first = processing("2", anyhow::anyhow!("boom"));
        let second = processing("3", UpstreamFailed::into_io(first).into());
        let third = processing("4", UpstreamFailed::into_io(second).into());

        assert_eq!(third.origin_stage(), Some("2"));

        let chain: Vec<String> = anyhow::Error::from(third)
            .chain()
            .map(|e| e.to_string())
            .collect();
        assert_eq!(chain.first().map(String::as_str), Some("stage '4' failed"));
        assert_eq!(chain.last().map(String::as_str), Some("boom"));
    }

    #[test]
    fn test_origin_through_context() {
        let first = processing("archive", anyhow::anyhow!("permission denied"));
        let io = UpstreamFailed::into_io(first);
        let second = processing(
            "encrypt",
            anyhow::Error::from(io).context("reading plaintext"),
        );
        assert_eq!(second.origin_stage(), Some("archive"));
    }

    #[test]
    fn test_from_io() {
        let io = UpstreamFailed::into_io(processing("x", anyhow::anyhow!("nope")));
        assert_eq!(
            PipelineError::from_io(&io).and_then(|e| e.origin_stage()),
            Some("x")
        );

        let plain = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        assert!(PipelineError::from_io(&plain).is_none());
    }

    #[test]
    fn test_try_from_io() {
        let io = UpstreamFailed::into_io(processing("decrypt", anyhow::anyhow!("short")));
        let err = PipelineError::try_from_io(io).unwrap();
        assert_eq!(err.origin_stage(), Some("decrypt"));

        let plain = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        let back = PipelineError::try_from_io(plain).unwrap_err();
        assert_eq!(back.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(back.to_string(), "gone");
    }

    #[test]
    fn test_config_has_no_origin() {
        let err = PipelineError::Config { index: 3 };
        assert_eq!(err.origin_stage(), None);
        assert_eq!(err.to_string(), "stage 3 has no transform");
    }
}
