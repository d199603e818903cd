use std::sync::{Mutex, PoisonError};

use bytes::Bytes;

use tracing::{debug, error, warn};

use crate::fault::{Fault, classify};
use crate::message::{OtaPackage, Reply, SessionInfo};
use crate::outcome::{FailureKind, Outcome, Payload};
use crate::pending::Responder;
use crate::request::RequestKind;

/// A continuation run with the session of a successful authentication.
pub type SessionHandler = Box<dyn FnOnce(SessionInfo) + Send>;

/// A source of the current time, in milliseconds since the Unix epoch.
pub type Clock = fn() -> u64;

/// Returns the system time in milliseconds since the Unix epoch.
#[must_use]
pub fn system_clock() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

// Logs the fault in full, then resolves with its external failure.
pub(crate) fn fail(kind: RequestKind, responder: &Responder, fault: &Fault) {
    let failure = classify(fault);
    match failure.kind() {
        FailureKind::MalformedRequest => warn!("{kind} request rejected: {fault}"),
        FailureKind::UpstreamUnavailable => warn!("{kind} request failed upstream: {fault}"),
        FailureKind::Internal => error!("{kind} request failed: {fault}"),
    }
    responder.resolve(Outcome::Failure(failure));
}

fn unexpected(kind: RequestKind, responder: &Responder, reply: &Reply) {
    let fault = Fault::internal(format!("unexpected {} reply", reply.name()));
    fail(kind, responder, &fault);
}

fn take<T>(slot: &Mutex<Option<T>>) -> Option<T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Completes an authentication.
pub struct AuthCallback {
    responder: Responder,
    on_session: Mutex<Option<SessionHandler>>,
}

impl AuthCallback {
    /// Creates an [`AuthCallback`].
    pub fn new<F>(responder: Responder, on_session: F) -> Self
    where
        F: FnOnce(SessionInfo) + Send + 'static,
    {
        Self {
            responder,
            on_session: Mutex::new(Some(Box::new(on_session))),
        }
    }

    /// Runs the session continuation, then acknowledges the request.
    ///
    /// The continuation only runs while the request is still unresolved.
    pub fn on_success(&self, reply: Reply) {
        let on_session = take(&self.on_session);

        let Reply::Session(session) = reply else {
            unexpected(RequestKind::Auth, &self.responder, &reply);
            return;
        };

        let Some(on_session) = on_session else {
            debug!("Auth already completed, ignoring repeated success");
            return;
        };

        let Some(claim) = self.responder.claim() else {
            debug!("Auth response already resolved, skipping the session continuation");
            return;
        };

        on_session(session);
        claim.resolve(Outcome::ok());
    }

    /// Resolves the request with the classified fault.
    ///
    /// The session continuation is dropped without running.
    pub fn on_error(&self, fault: Fault) {
        take(&self.on_session);
        fail(RequestKind::Auth, &self.responder, &fault);
    }
}

/// Completes a provisioning.
pub struct ProvisionCallback {
    responder: Responder,
}

impl ProvisionCallback {
    /// Creates a [`ProvisionCallback`].
    #[must_use]
    pub const fn new(responder: Responder) -> Self {
        Self { responder }
    }

    /// Resolves the request with the provisioning response body.
    pub fn on_success(&self, reply: Reply) {
        match reply {
            Reply::Provisioned(response) => {
                self.responder
                    .resolve(Outcome::Success(Payload::Provisioned(response)));
            }
            reply => unexpected(RequestKind::Provision, &self.responder, &reply),
        }
    }

    /// Resolves the request with the classified fault.
    pub fn on_error(&self, fault: Fault) {
        fail(RequestKind::Provision, &self.responder, &fault);
    }
}

/// Returns the bytes of chunk `chunk` of `chunk_size` bytes, clamped to the
/// artifact length.
#[must_use]
pub fn slice_chunk(data: &Bytes, chunk_size: usize, chunk: usize) -> Bytes {
    let start = chunk_size.saturating_mul(chunk).min(data.len());
    let end = start.saturating_add(chunk_size).min(data.len());
    data.slice(start..end)
}

/// Completes an OTA chunk fetch.
pub struct OtaChunkCallback {
    responder: Responder,
    title: String,
    version: String,
    chunk_size: usize,
    chunk: usize,
}

impl OtaChunkCallback {
    /// Creates an [`OtaChunkCallback`].
    pub fn new(
        responder: Responder,
        title: impl Into<String>,
        version: impl Into<String>,
        chunk_size: usize,
        chunk: usize,
    ) -> Self {
        Self {
            responder,
            title: title.into(),
            version: version.into(),
            chunk_size,
            chunk,
        }
    }

    /// Resolves the request with the requested chunk of the package.
    pub fn on_success(&self, reply: Reply) {
        let Reply::Package(package) = reply else {
            unexpected(RequestKind::OtaChunk, &self.responder, &reply);
            return;
        };

        if let Err(fault) = self.check(&package) {
            self.on_error(fault);
            return;
        }

        let chunk = slice_chunk(&package.data, self.chunk_size, self.chunk);
        debug!(
            "Serving {} bytes of {} {} (chunk {})",
            chunk.len(),
            self.title,
            self.version,
            self.chunk
        );
        self.responder
            .resolve(Outcome::Success(Payload::Chunk(chunk)));
    }

    /// Resolves the request with the classified fault.
    pub fn on_error(&self, fault: Fault) {
        fail(RequestKind::OtaChunk, &self.responder, &fault);
    }

    // The device must ask for the package it has been assigned.
    fn check(&self, package: &OtaPackage) -> Result<(), Fault> {
        if package.title != self.title || package.version != self.version {
            return Err(Fault::semantic(format!(
                "requested {} {}, assigned {} {}",
                self.title, self.version, package.title, package.version
            )));
        }
        Ok(())
    }
}

enum Stage {
    AwaitingAuth(Option<SessionHandler>),
    Done,
}

/// Completes a server time query.
///
/// The query is an authentication followed by a timestamp read. The second
/// stage only runs after the authentication succeeded.
pub struct ServerTimeCallback {
    responder: Responder,
    clock: Clock,
    stage: Mutex<Stage>,
}

impl ServerTimeCallback {
    /// Creates a [`ServerTimeCallback`].
    #[must_use]
    pub fn new(responder: Responder, clock: Clock) -> Self {
        Self {
            responder,
            clock,
            stage: Mutex::new(Stage::AwaitingAuth(None)),
        }
    }

    /// Runs `on_session` with the session once the authentication succeeds.
    #[must_use]
    pub fn on_session<F>(mut self, on_session: F) -> Self
    where
        F: FnOnce(SessionInfo) + Send + 'static,
    {
        self.stage = Mutex::new(Stage::AwaitingAuth(Some(Box::new(on_session))));
        self
    }

    /// Advances to the timestamp stage.
    pub fn on_success(&self, reply: Reply) {
        let Reply::Session(session) = reply else {
            self.finish();
            unexpected(RequestKind::ServerTime, &self.responder, &reply);
            return;
        };

        let Some(on_session) = self.finish() else {
            debug!("Server time already completed, ignoring repeated success");
            return;
        };

        let Some(claim) = self.responder.claim() else {
            debug!("Server time response already resolved, skipping the timestamp");
            return;
        };

        if let Some(on_session) = on_session {
            on_session(session);
        }

        let time = (self.clock)();
        claim.resolve(Outcome::Success(Payload::ServerTime(time)));
    }

    /// Resolves the request with the classified fault.
    pub fn on_error(&self, fault: Fault) {
        self.finish();
        fail(RequestKind::ServerTime, &self.responder, &fault);
    }

    // Moves to `Done`, returning the continuation if authentication was
    // still pending.
    fn finish(&self) -> Option<Option<SessionHandler>> {
        let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *stage, Stage::Done) {
            Stage::AwaitingAuth(on_session) => Some(on_session),
            Stage::Done => None,
        }
    }
}

/// The completion callback handed to the backend with each message.
///
/// The backend must invoke exactly one of [`Callback::on_success`] and
/// [`Callback::on_error`], exactly once. Repeated invocations never change
/// the resolved outcome.
pub enum Callback {
    /// See [`AuthCallback`].
    Auth(AuthCallback),
    /// See [`ProvisionCallback`].
    Provision(ProvisionCallback),
    /// See [`OtaChunkCallback`].
    OtaChunk(OtaChunkCallback),
    /// See [`ServerTimeCallback`].
    ServerTime(ServerTimeCallback),
}

impl Callback {
    /// Completes the request with a backend reply.
    pub fn on_success(&self, reply: Reply) {
        match self {
            Self::Auth(callback) => callback.on_success(reply),
            Self::Provision(callback) => callback.on_success(reply),
            Self::OtaChunk(callback) => callback.on_success(reply),
            Self::ServerTime(callback) => callback.on_success(reply),
        }
    }

    /// Completes the request with a backend fault.
    pub fn on_error(&self, fault: Fault) {
        match self {
            Self::Auth(callback) => callback.on_error(fault),
            Self::Provision(callback) => callback.on_error(fault),
            Self::OtaChunk(callback) => callback.on_error(fault),
            Self::ServerTime(callback) => callback.on_error(fault),
        }
    }

    /// Completes the request with the result of a backend operation.
    pub fn complete(&self, result: Result<Reply, Fault>) {
        match result {
            Ok(reply) => self.on_success(reply),
            Err(fault) => self.on_error(fault),
        }
    }

    /// Returns the [`RequestKind`] this callback completes.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::Auth(_) => RequestKind::Auth,
            Self::Provision(_) => RequestKind::Provision,
            Self::OtaChunk(_) => RequestKind::OtaChunk,
            Self::ServerTime(_) => RequestKind::ServerTime,
        }
    }
}

impl std::fmt::Debug for Callback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Callback({})", self.kind())
    }
}

impl From<AuthCallback> for Callback {
    fn from(callback: AuthCallback) -> Self {
        Self::Auth(callback)
    }
}

impl From<ProvisionCallback> for Callback {
    fn from(callback: ProvisionCallback) -> Self {
        Self::Provision(callback)
    }
}

impl From<OtaChunkCallback> for Callback {
    fn from(callback: OtaChunkCallback) -> Self {
        Self::OtaChunk(callback)
    }
}

impl From<ServerTimeCallback> for Callback {
    fn from(callback: ServerTimeCallback) -> Self {
        Self::ServerTime(callback)
    }
}
