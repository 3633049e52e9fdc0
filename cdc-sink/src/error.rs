//! Classified errors of the table sink delivery core.
//!
//! A [`SinkError`] is either a single failure, tagged with the [`ErrorKind`] of the collaborator
//! that caused it, or the set of failures collected from the workers of a pool. Every failure
//! that aborts a task is fatal to its worker, so the kind mostly tells a supervisor which
//! component to look at before restarting the table.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use tokio::task::JoinError;

/// Result type used by every fallible operation of the crate.
pub type SinkResult<T> = Result<T, SinkError>;

/// Component of the delivery path an [`ErrorKind`] is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorComponent {
    SortEngine,
    TableSink,
    Worker,
    Config,
    Other,
}

impl ErrorComponent {
    /// Returns the name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SortEngine => "sort_engine",
            Self::TableSink => "table_sink",
            Self::Worker => "worker",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Categories of failures raised while delivering events to table sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Reading the next event from a sort engine cursor failed.
    SortEngineFetchFailed,
    /// Closing a sort engine cursor failed.
    SortEngineCloseFailed,
    /// The table sink rejected an event while verifying or splitting it.
    ValidationError,
    /// The table sink refused a resolved timestamp lower than its current one.
    TableSinkResolvedTsRegressed,
    /// The table sink failed to emit rows or to advance its resolved timestamp.
    TableSinkError,
    /// A task or worker was used in a way that breaks its contract.
    InvalidState,
    WorkerPanic,
    WorkerCancelled,
    ConfigError,
    IoError,
    Unknown,
}

impl ErrorKind {
    /// Returns the component this kind of failure originates from.
    pub fn component(&self) -> ErrorComponent {
        match self {
            Self::SortEngineFetchFailed | Self::SortEngineCloseFailed => {
                ErrorComponent::SortEngine
            }
            Self::ValidationError | Self::TableSinkResolvedTsRegressed | Self::TableSinkError => {
                ErrorComponent::TableSink
            }
            Self::InvalidState | Self::WorkerPanic | Self::WorkerCancelled => {
                ErrorComponent::Worker
            }
            Self::ConfigError => ErrorComponent::Config,
            Self::IoError | Self::Unknown => ErrorComponent::Other,
        }
    }
}

/// Main error type of the crate.
///
/// Build single failures with [`crate::sink_error!`] or [`crate::bail!`]. Failures of several
/// workers are gathered by converting a `Vec<SinkError>`.
#[derive(Debug, Clone)]
pub struct SinkError {
    inner: Inner,
}

#[derive(Debug, Clone)]
enum Inner {
    Failure(Box<Failure>),
    Workers(Vec<SinkError>),
}

#[derive(Debug, Clone)]
struct Failure {
    kind: ErrorKind,
    description: &'static str,
    detail: Option<String>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

impl SinkError {
    #[track_caller]
    fn failure(kind: ErrorKind, description: &'static str, detail: Option<String>) -> Self {
        let failure = Failure {
            kind,
            description,
            detail,
            source: None,
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        };

        Self {
            inner: Inner::Failure(Box::new(failure)),
        }
    }

    /// Returns the kind of this error, or of the first collected one.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            Inner::Failure(failure) => failure.kind,
            Inner::Workers(errors) => errors.first().map_or(ErrorKind::Unknown, SinkError::kind),
        }
    }

    /// Returns the kinds of every failure carried by this error, in order.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match &self.inner {
            Inner::Failure(failure) => vec![failure.kind],
            Inner::Workers(errors) => errors.iter().flat_map(SinkError::kinds).collect(),
        }
    }

    /// Returns the dynamic detail of this error, or the first one found among collected errors.
    pub fn detail(&self) -> Option<&str> {
        match &self.inner {
            Inner::Failure(failure) => failure.detail.as_deref(),
            Inner::Workers(errors) => errors.iter().find_map(SinkError::detail),
        }
    }

    /// Returns where the failure was raised.
    pub fn location(&self) -> Option<&'static Location<'static>> {
        match &self.inner {
            Inner::Failure(failure) => Some(failure.location),
            Inner::Workers(errors) => errors.first().and_then(SinkError::location),
        }
    }

    /// Returns the backtrace captured with a single failure.
    ///
    /// Frames are only resolved when `RUST_BACKTRACE` or `RUST_LIB_BACKTRACE` enables them.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match &self.inner {
            Inner::Failure(failure) => Some(failure.backtrace.as_ref()),
            Inner::Workers(_) => None,
        }
    }

    /// Attaches the error that caused this failure.
    ///
    /// Ignored on collected worker errors.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let Inner::Failure(failure) = &mut self.inner {
            failure.source = Some(Arc::new(source));
        }

        self
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Failure(failure) => {
                write!(f, "[{:?}] {}", failure.kind, failure.description)?;
                if let Some(detail) = &failure.detail {
                    write!(f, ": {detail}")?;
                }
                write!(
                    f,
                    " (at {}:{})",
                    failure.location.file(),
                    failure.location.line()
                )?;

                // `{:#}` also prints the backtrace when one was captured.
                if f.alternate() && failure.backtrace.status() == BacktraceStatus::Captured {
                    write!(f, "\n{}", failure.backtrace)?;
                }

                Ok(())
            }
            Inner::Workers(errors) => {
                write!(f, "{} table sink workers failed", errors.len())?;
                for error in errors {
                    write!(f, "\n  - {error}")?;
                }

                Ok(())
            }
        }
    }
}

impl error::Error for SinkError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.inner {
            Inner::Failure(failure) => failure
                .source
                .as_deref()
                .map(|source| source as &(dyn error::Error + 'static)),
            Inner::Workers(errors) => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for SinkError {
    #[track_caller]
    fn from((kind, description): (ErrorKind, &'static str)) -> Self {
        Self::failure(kind, description, None)
    }
}

impl From<(ErrorKind, &'static str, String)> for SinkError {
    #[track_caller]
    fn from((kind, description, detail): (ErrorKind, &'static str, String)) -> Self {
        Self::failure(kind, description, Some(detail))
    }
}

/// Gathers the failures of several workers, a single failure is returned as is.
impl From<Vec<SinkError>> for SinkError {
    fn from(mut errors: Vec<SinkError>) -> Self {
        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        Self {
            inner: Inner::Workers(errors),
        }
    }
}

/// Maps a failed worker join to [`ErrorKind::WorkerCancelled`] or [`ErrorKind::WorkerPanic`].
impl From<JoinError> for SinkError {
    #[track_caller]
    fn from(err: JoinError) -> Self {
        let (kind, description) = if err.is_cancelled() {
            (ErrorKind::WorkerCancelled, "Table sink worker was cancelled")
        } else {
            (ErrorKind::WorkerPanic, "Table sink worker panicked")
        };

        Self::failure(kind, description, Some(err.to_string())).with_source(err)
    }
}
