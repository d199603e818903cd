use std::borrow::Cow;

use bytes::Bytes;

use serde::Serialize;

use crate::message::ProvisionResponse;

// Message used when the transport layer gives up waiting on a response.
const TIMEOUT_MESSAGE: &str = "timeout";

/// All externally visible failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    /// The caller sent a request that cannot be processed.
    MalformedRequest,
    /// The backend could not be reached. Safe to retry.
    UpstreamUnavailable,
    /// An unexpected fault.
    Internal,
}

impl FailureKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::MalformedRequest => "Malformed Request",
            Self::UpstreamUnavailable => "Upstream Unavailable",
            Self::Internal => "Internal",
        }
    }

    /// Returns the stable message template reported to callers.
    #[must_use]
    pub const fn template(self) -> &'static str {
        match self {
            Self::MalformedRequest => "The request could not be processed.",
            Self::UpstreamUnavailable => "The device service is temporarily unavailable.",
            Self::Internal => "An internal error occurred.",
        }
    }

    /// Whether the failure is caused by the caller.
    #[must_use]
    pub const fn is_client_error(self) -> bool {
        matches!(self, Self::MalformedRequest)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// A classified failure.
///
/// The message is always a stable template, never the text of the fault
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    kind: FailureKind,
    message: Cow<'static, str>,
}

impl Failure {
    /// Creates a [`Failure`] carrying the template message of its kind.
    #[must_use]
    pub const fn new(kind: FailureKind) -> Self {
        Self {
            kind,
            message: Cow::Borrowed(kind.template()),
        }
    }

    /// Creates the [`Failure`] produced when no callback fires in time.
    #[must_use]
    pub const fn timeout() -> Self {
        Self {
            kind: FailureKind::UpstreamUnavailable,
            message: Cow::Borrowed(TIMEOUT_MESSAGE),
        }
    }

    /// Returns the [`FailureKind`].
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the external message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A success payload, one shape per request kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Generic acknowledgement.
    Ok,
    /// Provisioning response body.
    Provisioned(ProvisionResponse),
    /// A slice of an OTA package.
    Chunk(Bytes),
    /// Server time in milliseconds since the Unix epoch.
    ServerTime(u64),
}

/// The result delivered through a pending response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The request succeeded.
    Success(Payload),
    /// The request failed.
    Failure(Failure),
}

impl Outcome {
    /// A generic acknowledgement.
    #[must_use]
    pub const fn ok() -> Self {
        Self::Success(Payload::Ok)
    }

    /// A failure of the given kind with its template message.
    #[must_use]
    pub const fn failure(kind: FailureKind) -> Self {
        Self::Failure(Failure::new(kind))
    }

    /// The outcome of a request nobody answered in time.
    #[must_use]
    pub const fn timeout() -> Self {
        Self::Failure(Failure::timeout())
    }

    /// Checks whether the outcome is a success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the [`FailureKind`] of a failed outcome.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure.kind),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success(Payload::Ok) => "Success (ok)".fmt(f),
            Self::Success(Payload::Provisioned(response)) => {
                write!(f, "Success (provisioned, {})", response.status)
            }
            Self::Success(Payload::Chunk(bytes)) => {
                write!(f, "Success (chunk of {} bytes)", bytes.len())
            }
            Self::Success(Payload::ServerTime(time)) => write!(f, "Success (server time {time})"),
            Self::Failure(failure) => write!(f, "Failure ({failure})"),
        }
    }
}
