//! Error types and result definitions for isolation operations.
//!
//! [`IsolationError`] carries an [`ErrorKind`] that tells the calling test *where* provisioning
//! broke down (configuration, entropy, provisioning, teardown, timeout), a static description,
//! an optional dynamic detail, the originating error and the callsite. Several errors can be
//! aggregated into one, which is how failures of multiple teardowns are reported together.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

use crate::driver::DriverError;

/// Convenient result type for isolation operations using [`IsolationError`] as the error type.
pub type IsolationResult<T> = Result<T, IsolationError>;

/// Detailed payload stored for single [`IsolationError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for isolation operations.
///
/// Every error produced by this crate is returned to the calling test. Nothing is swallowed to
/// continue in a degraded state: a test is either fully isolated or its setup fails.
#[derive(Debug, Clone)]
pub struct IsolationError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, e.g. several failed teardowns of one test.
    Many {
        errors: Vec<IsolationError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors that can occur while provisioning and tearing down isolation units.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration errors, fatal and never retried.
    ConfigurationError,
    InvalidEndpoint,
    InvalidIdentifier,

    // Identifier generation.
    RandomSourceUnavailable,

    // Server interaction.
    ConnectionFailed,
    ProvisioningError,
    TemplateInUse,
    TeardownError,
    TimeoutError,
    MigrationFailed,
    QueryFailed,

    // Lifecycle misuse.
    InvalidState,

    Unknown,
}

impl IsolationError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Returns `true` if the server rejected a create database/schema/transaction statement.
    ///
    /// Template-in-use conflicts count as provisioning failures. Timeouts do not: a server that
    /// did not answer is reported as [`ErrorKind::TimeoutError`].
    pub fn is_provisioning(&self) -> bool {
        self.kinds()
            .iter()
            .any(|kind| matches!(kind, ErrorKind::ProvisioningError | ErrorKind::TemplateInUse))
    }

    /// Returns `true` if any bounded operation exceeded its deadline.
    pub fn is_timeout(&self) -> bool {
        self.kinds().contains(&ErrorKind::TimeoutError)
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as the source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        IsolationError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for IsolationError {
    fn eq(&self, other: &IsolationError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for IsolationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail:")?;
                    for line in detail.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                if payload.backtrace.status() == BacktraceStatus::Captured {
                    write!(f, "\n  Backtrace:")?;
                    for line in payload.backtrace.to_string().lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for IsolationError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates an [`IsolationError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for IsolationError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> IsolationError {
        IsolationError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates an [`IsolationError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for IsolationError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> IsolationError {
        IsolationError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Creates an [`IsolationError`] from a vector of errors for aggregation.
///
/// A vector holding exactly one error returns that error unwrapped.
impl<E> From<Vec<E>> for IsolationError
where
    E: Into<IsolationError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> IsolationError {
        let location = Location::caller();
        let mut errors: Vec<IsolationError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        IsolationError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`url::ParseError`] to [`IsolationError`] with [`ErrorKind::InvalidEndpoint`].
impl From<url::ParseError> for IsolationError {
    #[track_caller]
    fn from(err: url::ParseError) -> IsolationError {
        let detail = err.to_string();
        IsolationError::from_components(
            ErrorKind::InvalidEndpoint,
            Cow::Borrowed("Endpoint url is malformed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`config::LoadConfigError`] to [`IsolationError`] with
/// [`ErrorKind::ConfigurationError`].
impl From<config::LoadConfigError> for IsolationError {
    #[track_caller]
    fn from(err: config::LoadConfigError) -> IsolationError {
        let detail = err.to_string();
        IsolationError::from_components(
            ErrorKind::ConfigurationError,
            Cow::Borrowed("Testing database configuration could not be loaded"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`config::shared::ValidationError`] to [`IsolationError`] with
/// [`ErrorKind::ConfigurationError`].
impl From<config::shared::ValidationError> for IsolationError {
    #[track_caller]
    fn from(err: config::shared::ValidationError) -> IsolationError {
        let detail = err.to_string();
        IsolationError::from_components(
            ErrorKind::ConfigurationError,
            Cow::Borrowed("Testing database configuration is invalid"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`rand::Error`] to [`IsolationError`] with [`ErrorKind::RandomSourceUnavailable`].
impl From<rand::Error> for IsolationError {
    #[track_caller]
    fn from(err: rand::Error) -> IsolationError {
        let detail = err.to_string();
        IsolationError::from_components(
            ErrorKind::RandomSourceUnavailable,
            Cow::Borrowed("Entropy source could not be read"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`DriverError`] to [`IsolationError`] with [`ErrorKind::QueryFailed`].
///
/// Provisioning and teardown wrap driver errors with their own kinds instead.
impl From<DriverError> for IsolationError {
    #[track_caller]
    fn from(err: DriverError) -> IsolationError {
        let detail = err.to_string();
        IsolationError::from_components(
            ErrorKind::QueryFailed,
            Cow::Borrowed("Database operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`sqlx::Error`] to [`IsolationError`].
///
/// Pool and I/O errors map to [`ErrorKind::ConnectionFailed`], everything else to
/// [`ErrorKind::QueryFailed`].
impl From<sqlx::Error> for IsolationError {
    #[track_caller]
    fn from(err: sqlx::Error) -> IsolationError {
        let kind = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut => ErrorKind::ConnectionFailed,
            sqlx::Error::Configuration(_) => ErrorKind::InvalidEndpoint,
            _ => ErrorKind::QueryFailed,
        };

        let detail = err.to_string();
        IsolationError::from_components(
            kind,
            Cow::Borrowed("Database operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`sqlx::migrate::MigrateError`] to [`IsolationError`] with
/// [`ErrorKind::MigrationFailed`].
impl From<sqlx::migrate::MigrateError> for IsolationError {
    #[track_caller]
    fn from(err: sqlx::migrate::MigrateError) -> IsolationError {
        let detail = err.to_string();
        IsolationError::from_components(
            ErrorKind::MigrationFailed,
            Cow::Borrowed("Applying pending migrations failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
