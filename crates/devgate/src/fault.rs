use std::borrow::Cow;
use std::error::Error as StdError;

use serde_json::error::Category;

use crate::outcome::{Failure, FailureKind};

/// An internal failure raised while serving a request.
///
/// Faults carry full diagnostic detail and are only ever logged. Callers see
/// the [`Failure`] produced by [`classify`].
#[derive(Debug)]
pub enum Fault {
    /// The payload is not well-formed for the expected structured format.
    Syntax(Cow<'static, str>),
    /// The payload is well-formed but one of its values is unusable.
    Semantic(Cow<'static, str>),
    /// The device or the network could not be reached.
    Io(std::io::Error),
    /// An unexpected fault.
    Internal(Cow<'static, str>),
    /// A foreign error nobody anticipated.
    Other(Box<dyn StdError + Send + Sync>),
}

impl Fault {
    /// Creates a [`Fault::Syntax`].
    pub fn syntax(description: impl Into<Cow<'static, str>>) -> Self {
        Self::Syntax(description.into())
    }

    /// Creates a [`Fault::Semantic`].
    pub fn semantic(description: impl Into<Cow<'static, str>>) -> Self {
        Self::Semantic(description.into())
    }

    /// Creates a [`Fault::Internal`].
    pub fn internal(description: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(description.into())
    }

    /// Converts an arbitrary error into a [`Fault`].
    ///
    /// Known error types are recognized by downcasting, everything else
    /// becomes [`Fault::Other`].
    pub fn from_error(error: Box<dyn StdError + Send + Sync>) -> Self {
        let error = match error.downcast::<std::io::Error>() {
            Ok(e) => return Self::Io(*e),
            Err(error) => error,
        };
        match error.downcast::<serde_json::Error>() {
            Ok(e) => Self::from(*e),
            Err(error) => Self::Other(error),
        }
    }

    /// Returns the [`FailureKind`] this fault is reported as.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Syntax(_) | Self::Semantic(_) => FailureKind::MalformedRequest,
            Self::Io(_) => FailureKind::UpstreamUnavailable,
            Self::Internal(_) | Self::Other(_) => FailureKind::Internal,
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax(description) => write!(f, "syntax error: {description}"),
            Self::Semantic(description) => write!(f, "semantic error: {description}"),
            Self::Io(e) => write!(f, "i/o error: {e}"),
            Self::Internal(description) => write!(f, "internal error: {description}"),
            Self::Other(e) => write!(f, "unclassified error: {e}"),
        }
    }
}

impl StdError for Fault {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Fault {
    fn from(e: serde_json::Error) -> Self {
        match e.classify() {
            Category::Syntax | Category::Eof => Self::Syntax(e.to_string().into()),
            Category::Data => Self::Semantic(e.to_string().into()),
            Category::Io => Self::Io(e.into()),
        }
    }
}

impl From<std::io::Error> for Fault {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Maps a [`Fault`] onto the [`Failure`] reported to the caller.
#[must_use]
pub fn classify(fault: &Fault) -> Failure {
    Failure::new(fault.kind())
}
