use serde::Serialize;

use crate::fault::Fault;
use crate::message::OtaKind;

/// The kind of an inbound device request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RequestKind {
    /// Device token validation.
    Auth,
    /// Device provisioning.
    Provision,
    /// OTA package chunk fetch.
    OtaChunk,
    /// Server time query.
    ServerTime,
    /// Telemetry upload.
    Telemetry,
    /// Attributes upload.
    Attributes,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth => "Auth",
            Self::Provision => "Provision",
            Self::OtaChunk => "OtaChunk",
            Self::ServerTime => "ServerTime",
            Self::Telemetry => "Telemetry",
            Self::Attributes => "Attributes",
        }
        .fmt(f)
    }
}

/// Parameters of an OTA chunk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaParams {
    /// Package kind.
    pub kind: OtaKind,
    /// Package title the device expects.
    pub title: Option<String>,
    /// Package version the device expects.
    pub version: Option<String>,
    /// Chunk size in bytes. [`None`] requests the whole artifact.
    pub chunk_size: Option<usize>,
    /// Chunk index.
    pub chunk: usize,
}

impl OtaParams {
    /// Creates [`OtaParams`] for a firmware package.
    pub fn firmware(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(OtaKind::Firmware, title, version)
    }

    /// Creates [`OtaParams`] for a software package.
    pub fn software(title: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(OtaKind::Software, title, version)
    }

    fn new(kind: OtaKind, title: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind,
            title: Some(title.into()),
            version: Some(version.into()),
            chunk_size: None,
            chunk: 0,
        }
    }

    /// Requests the chunk at `chunk` of `chunk_size` bytes.
    #[must_use]
    pub const fn chunk(mut self, chunk_size: usize, chunk: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self.chunk = chunk;
        self
    }
}

// Validated OTA parameters.
#[derive(Debug)]
pub(crate) struct OtaTarget {
    pub(crate) kind: OtaKind,
    pub(crate) title: String,
    pub(crate) version: String,
    pub(crate) chunk_size: usize,
    pub(crate) chunk: usize,
}

impl TryFrom<OtaParams> for OtaTarget {
    type Error = Fault;

    fn try_from(params: OtaParams) -> Result<Self, Self::Error> {
        let title = required(params.title, "title")?;
        let version = required(params.version, "version")?;

        // The whole artifact is a single chunk of unbounded size.
        let chunk_size = match params.chunk_size {
            Some(0) => return Err(Fault::semantic("`size` must be a positive integer")),
            Some(size) => size,
            None => usize::MAX,
        };

        Ok(Self {
            kind: params.kind,
            title,
            version,
            chunk_size,
            chunk: params.chunk,
        })
    }
}

fn required(value: Option<String>, name: &'static str) -> Result<String, Fault> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        Some(_) => Err(Fault::semantic(format!("`{name}` is empty"))),
        None => Err(Fault::semantic(format!("`{name}` is missing"))),
    }
}

pub(crate) fn require_token(token: &str) -> Result<String, Fault> {
    required(Some(token.to_owned()), "device token")
}

/// Kind-specific request data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Validate the device token.
    Auth,
    /// Provision a device from a JSON body.
    Provision(String),
    /// Fetch an OTA package chunk.
    OtaChunk(OtaParams),
    /// Query the server time.
    ServerTime,
    /// Upload telemetry from a JSON body.
    Telemetry(String),
    /// Upload attributes from a JSON body.
    Attributes(String),
}

/// Immutable data of a single inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub(crate) token: String,
    pub(crate) request: Request,
}

impl RequestContext {
    /// Creates a [`RequestContext`].
    pub fn new(token: impl Into<String>, request: Request) -> Self {
        Self {
            token: token.into(),
            request,
        }
    }

    /// Creates an authentication [`RequestContext`].
    pub fn auth(token: impl Into<String>) -> Self {
        Self::new(token, Request::Auth)
    }

    /// Creates a provisioning [`RequestContext`].
    ///
    /// Provisioning devices have no token yet.
    pub fn provision(body: impl Into<String>) -> Self {
        Self::new(String::new(), Request::Provision(body.into()))
    }

    /// Creates an OTA chunk [`RequestContext`].
    pub fn ota_chunk(token: impl Into<String>, params: OtaParams) -> Self {
        Self::new(token, Request::OtaChunk(params))
    }

    /// Creates a server time [`RequestContext`].
    pub fn server_time(token: impl Into<String>) -> Self {
        Self::new(token, Request::ServerTime)
    }

    /// Returns the device token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns the [`RequestKind`].
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self.request {
            Request::Auth => RequestKind::Auth,
            Request::Provision(_) => RequestKind::Provision,
            Request::OtaChunk(_) => RequestKind::OtaChunk,
            Request::ServerTime => RequestKind::ServerTime,
            Request::Telemetry(_) => RequestKind::Telemetry,
            Request::Attributes(_) => RequestKind::Attributes,
        }
    }
}
