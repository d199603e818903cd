use std::sync::Arc;

use serde_json::Value;

use tracing::debug;

use crate::backend::Backend;
use crate::callback::{
    AuthCallback, Callback, Clock, OtaChunkCallback, ProvisionCallback, ServerTimeCallback, fail,
    system_clock,
};
use crate::fault::Fault;
use crate::message::{Message, ProvisionRequest, SessionInfo, Upload};
use crate::pending::{PendingResponse, Responder, channel};
use crate::request::{OtaParams, OtaTarget, Request, RequestContext, RequestKind, require_token};

fn parse_object(body: &str, allow_array: bool) -> Result<Value, Fault> {
    let value: Value = serde_json::from_str(body)?;
    match &value {
        Value::Object(_) => Ok(value),
        Value::Array(items) if allow_array && items.iter().all(Value::is_object) => Ok(value),
        _ => Err(Fault::semantic(if allow_array {
            "expected a JSON object or an array of JSON objects"
        } else {
            "expected a JSON object"
        })),
    }
}

/// Submits device requests to a [`Backend`].
///
/// Every operation returns a [`PendingResponse`] without waiting for the
/// backend. Requests with missing or invalid parameters are resolved with
/// a malformed request failure before anything is submitted.
pub struct Dispatcher<B: Backend> {
    backend: Arc<B>,
    clock: Clock,
}

impl<B: Backend> Clone for Dispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            clock: self.clock,
        }
    }
}

impl<B: Backend> std::fmt::Debug for Dispatcher<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl<B: Backend> Dispatcher<B> {
    /// Creates a [`Dispatcher`] submitting to `backend`.
    #[must_use]
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            clock: system_clock,
        }
    }

    /// Sets the clock used to answer server time queries.
    #[must_use]
    pub const fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Returns the backend.
    #[must_use]
    pub const fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Dispatches a request.
    pub fn dispatch(&self, context: RequestContext) -> PendingResponse {
        let RequestContext { token, request } = context;
        match request {
            Request::Auth => self.authenticate(&token, |_| {}),
            Request::Provision(body) => self.provision(&body),
            Request::OtaChunk(params) => self.ota_chunk(&token, params),
            Request::ServerTime => self.server_time(&token),
            Request::Telemetry(body) => self.post_telemetry(&token, &body),
            Request::Attributes(body) => self.post_attributes(&token, &body),
        }
    }

    /// Validates a device token, running `on_session` on success.
    pub fn authenticate<F>(&self, token: &str, on_session: F) -> PendingResponse
    where
        F: FnOnce(SessionInfo) + Send + 'static,
    {
        self.submit(RequestKind::Auth, |responder| {
            let token = require_token(token)?;
            Ok((
                Message::ValidateToken { token },
                AuthCallback::new(responder, on_session).into(),
            ))
        })
    }

    /// Provisions a device from a JSON request body.
    pub fn provision(&self, body: &str) -> PendingResponse {
        self.submit(RequestKind::Provision, |responder| {
            let request = serde_json::from_str::<ProvisionRequest>(body)?.validate()?;
            Ok((
                Message::Provision(request),
                ProvisionCallback::new(responder).into(),
            ))
        })
    }

    /// Fetches a chunk of the OTA package assigned to a device.
    pub fn ota_chunk(&self, token: &str, params: OtaParams) -> PendingResponse {
        self.submit(RequestKind::OtaChunk, |responder| {
            let token = require_token(token)?;
            let target = OtaTarget::try_from(params)?;
            Ok((
                Message::GetOtaPackage {
                    token,
                    kind: target.kind,
                },
                OtaChunkCallback::new(
                    responder,
                    target.title,
                    target.version,
                    target.chunk_size,
                    target.chunk,
                )
                .into(),
            ))
        })
    }

    /// Returns the server time to an authenticated device.
    pub fn server_time(&self, token: &str) -> PendingResponse {
        self.server_time_with(token, |session| {
            debug!("Serving server time to {}", session.device_name);
        })
    }

    /// Returns the server time to an authenticated device, running
    /// `on_session` once the device is authenticated.
    pub fn server_time_with<F>(&self, token: &str, on_session: F) -> PendingResponse
    where
        F: FnOnce(SessionInfo) + Send + 'static,
    {
        self.submit(RequestKind::ServerTime, |responder| {
            let token = require_token(token)?;
            Ok((
                Message::ValidateToken { token },
                ServerTimeCallback::new(responder, self.clock)
                    .on_session(on_session)
                    .into(),
            ))
        })
    }

    /// Uploads telemetry from a JSON object or an array of JSON objects.
    pub fn post_telemetry(&self, token: &str, body: &str) -> PendingResponse {
        self.upload(RequestKind::Telemetry, token, || {
            parse_object(body, true).map(Upload::Telemetry)
        })
    }

    /// Uploads client attributes from a JSON object.
    pub fn post_attributes(&self, token: &str, body: &str) -> PendingResponse {
        self.upload(RequestKind::Attributes, token, || {
            parse_object(body, false).map(Upload::Attributes)
        })
    }

    // Authenticates the device, then publishes the upload from the session
    // continuation.
    fn upload<F>(&self, kind: RequestKind, token: &str, parse: F) -> PendingResponse
    where
        F: FnOnce() -> Result<Upload, Fault>,
    {
        self.submit(kind, |responder| {
            let token = require_token(token)?;
            let upload = parse()?;
            let backend = Arc::clone(&self.backend);
            Ok((
                Message::ValidateToken { token },
                AuthCallback::new(responder, move |session| backend.publish(&session, upload))
                    .into(),
            ))
        })
    }

    fn submit<F>(&self, kind: RequestKind, prepare: F) -> PendingResponse
    where
        F: FnOnce(Responder) -> Result<(Message, Callback), Fault>,
    {
        let (responder, pending) = channel();

        match prepare(responder.clone()) {
            Ok((message, callback)) => {
                debug!("Submitting {kind} request as {}", message.kind());
                self.backend.process(message.kind(), message, callback);
            }
            Err(fault) => fail(kind, &responder, &fault),
        }

        pending
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;

    use crate::backend::Backend;
    use crate::callback::Callback;
    use crate::message::{Message, OtaKind, OtaPackage, Reply, SessionInfo, Upload};
    use crate::outcome::{FailureKind, Outcome, Payload};
    use crate::request::{OtaParams, RequestContext, RequestKind};

    use super::Dispatcher;

    // Keeps callbacks so tests decide when and how they complete.
    #[derive(Default)]
    struct RecordingBackend {
        submitted: Mutex<Vec<(RequestKind, Message, Callback)>>,
        published: Mutex<Vec<(SessionInfo, Upload)>>,
    }

    impl RecordingBackend {
        fn take(&self) -> Vec<(RequestKind, Message, Callback)> {
            std::mem::take(&mut *self.submitted.lock().unwrap())
        }
    }

    impl Backend for RecordingBackend {
        fn process(&self, kind: RequestKind, message: Message, callback: Callback) {
            self.submitted.lock().unwrap().push((kind, message, callback));
        }

        fn publish(&self, session: &SessionInfo, upload: Upload) {
            self.published
                .lock()
                .unwrap()
                .push((session.clone(), upload));
        }
    }

    fn dispatcher() -> (Arc<RecordingBackend>, Dispatcher<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        let dispatcher = Dispatcher::new(Arc::clone(&backend)).clock(|| 1_700_000_000_000);
        (backend, dispatcher)
    }

    fn session() -> SessionInfo {
        SessionInfo::new("5f0c2a9e", "weather-station", "default")
    }

    #[test]
    fn dispatch_does_not_wait() {
        let (backend, dispatcher) = dispatcher();

        let mut pending = dispatcher.dispatch(RequestContext::auth("validToken"));

        assert!(!pending.is_resolved());
        assert_eq!(pending.try_outcome(), None);
        assert_eq!(backend.take().len(), 1);
    }

    #[test]
    fn server_time_composes_auth() {
        let (backend, dispatcher) = dispatcher();
        let sessions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&sessions);

        let mut pending = dispatcher.server_time_with("validToken", move |session| {
            assert_eq!(session.device_name, "weather-station");
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let mut submitted = backend.take();
        assert_eq!(submitted.len(), 1);
        let (kind, message, callback) = submitted.remove(0);
        assert_eq!(kind, RequestKind::Auth);
        assert_eq!(
            message,
            Message::ValidateToken {
                token: "validToken".into()
            }
        );
        assert_eq!(callback.kind(), RequestKind::ServerTime);
        assert!(!pending.is_resolved());

        callback.on_success(Reply::Session(session()));

        assert_eq!(sessions.load(Ordering::SeqCst), 1);
        assert_eq!(
            pending.try_outcome(),
            Some(Outcome::Success(Payload::ServerTime(1_700_000_000_000)))
        );
    }

    #[test]
    fn missing_token_fails_fast() {
        let (backend, dispatcher) = dispatcher();

        for context in [
            RequestContext::auth(""),
            RequestContext::server_time(" "),
            RequestContext::ota_chunk("", OtaParams::firmware("Title", "version")),
        ] {
            let mut pending = dispatcher.dispatch(context);
            assert_eq!(
                pending.try_outcome().and_then(|o| o.failure_kind()),
                Some(FailureKind::MalformedRequest)
            );
        }

        assert!(backend.take().is_empty());
    }

    #[test]
    fn invalid_ota_params_fail_fast() {
        let (backend, dispatcher) = dispatcher();

        let mut params = OtaParams::firmware("Title", "version").chunk(11, 3);
        params.version = None;

        let mut pending = dispatcher.ota_chunk("validToken", params);
        assert_eq!(
            pending.try_outcome().and_then(|o| o.failure_kind()),
            Some(FailureKind::MalformedRequest)
        );

        let mut pending =
            dispatcher.ota_chunk("validToken", OtaParams::firmware("Title", "version").chunk(0, 0));
        assert_eq!(
            pending.try_outcome().and_then(|o| o.failure_kind()),
            Some(FailureKind::MalformedRequest)
        );

        assert!(backend.take().is_empty());
    }

    #[test]
    fn ota_chunk_round_trip() {
        let (backend, dispatcher) = dispatcher();

        let mut pending = dispatcher.ota_chunk(
            "validToken",
            OtaParams::software("Title", "version").chunk(11, 3),
        );

        let (kind, message, callback) = backend.take().remove(0);
        assert_eq!(kind, RequestKind::OtaChunk);
        assert_eq!(
            message,
            Message::GetOtaPackage {
                token: "validToken".into(),
                kind: OtaKind::Software,
            }
        );

        callback.on_success(Reply::Package(OtaPackage::new(
            "Title",
            "version",
            (0..50u8).collect::<Vec<_>>(),
        )));

        let Some(Outcome::Success(Payload::Chunk(chunk))) = pending.try_outcome() else {
            panic!("expected a chunk");
        };
        assert_eq!(chunk.as_ref(), (33..44u8).collect::<Vec<_>>().as_slice());
    }

    #[test]
    fn provision_body_faults() {
        let (backend, dispatcher) = dispatcher();

        // Structural.
        let mut pending = dispatcher.provision("{\"provisionDeviceKey\": ");
        assert_eq!(
            pending.try_outcome().and_then(|o| o.failure_kind()),
            Some(FailureKind::MalformedRequest)
        );

        // Semantic.
        let mut pending = dispatcher.provision("{\"provisionDeviceKey\": 5}");
        assert_eq!(
            pending.try_outcome().and_then(|o| o.failure_kind()),
            Some(FailureKind::MalformedRequest)
        );

        assert!(backend.take().is_empty());

        let pending = dispatcher.provision(
            &json!({
                "deviceName": "boiler",
                "provisionDeviceKey": "key",
                "provisionDeviceSecret": "secret"
            })
            .to_string(),
        );
        assert!(!pending.is_resolved());
        assert_eq!(backend.take()[0].0, RequestKind::Provision);
    }

    #[test]
    fn telemetry_published_after_auth() {
        let (backend, dispatcher) = dispatcher();

        let mut pending = dispatcher.post_telemetry("validToken", "{\"temperature\": 21.5}");

        let (kind, _, callback) = backend.take().remove(0);
        assert_eq!(kind, RequestKind::Auth);
        assert!(backend.published.lock().unwrap().is_empty());

        callback.on_success(Reply::Session(session()));

        assert_eq!(pending.try_outcome(), Some(Outcome::ok()));
        let published = backend.published.lock().unwrap();
        assert_eq!(
            published.as_slice(),
            &[(
                session(),
                Upload::Telemetry(json!({ "temperature": 21.5 }))
            )]
        );
    }

    #[test]
    fn telemetry_not_published_on_auth_error() {
        let (backend, dispatcher) = dispatcher();

        let mut pending = dispatcher.post_attributes("validToken", "{\"firmware\": \"1.0\"}");
        let (_, _, callback) = backend.take().remove(0);

        callback.on_error(std::io::Error::other("connection reset").into());
        callback.on_success(Reply::Session(session()));

        assert!(backend.published.lock().unwrap().is_empty());
        assert_eq!(
            pending.try_outcome().and_then(|o| o.failure_kind()),
            Some(FailureKind::UpstreamUnavailable)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_not_published_after_timeout() {
        let (backend, dispatcher) = dispatcher();

        let pending = dispatcher.post_telemetry("validToken", "{\"temperature\": 21.5}");
        let (_, _, callback) = backend.take().remove(0);

        assert_eq!(
            pending.wait_timeout(Duration::from_secs(1)).await,
            Outcome::timeout()
        );

        callback.on_success(Reply::Session(session()));
        assert!(backend.published.lock().unwrap().is_empty());
    }

    #[test]
    fn telemetry_not_published_after_discard() {
        let (backend, dispatcher) = dispatcher();

        drop(dispatcher.post_telemetry("validToken", "{\"temperature\": 21.5}"));
        let (_, _, callback) = backend.take().remove(0);

        callback.on_success(Reply::Session(session()));
        assert!(backend.published.lock().unwrap().is_empty());
    }

    #[test]
    fn attributes_not_published_after_internal_failure() {
        let (backend, dispatcher) = dispatcher();

        let mut pending = dispatcher.post_attributes("validToken", "{\"firmware\": \"1.0\"}");
        let (_, _, callback) = backend.take().remove(0);

        callback.on_success(Reply::Package(OtaPackage::new("Title", "version", vec![0])));
        callback.on_success(Reply::Session(session()));

        assert!(backend.published.lock().unwrap().is_empty());
        assert_eq!(
            pending.try_outcome().and_then(|o| o.failure_kind()),
            Some(FailureKind::Internal)
        );
    }

    #[test]
    fn upload_shape_is_checked() {
        let (backend, dispatcher) = dispatcher();

        for mut pending in [
            dispatcher.post_telemetry("validToken", "[1, 2]"),
            dispatcher.post_attributes("validToken", "[{\"a\": 1}]"),
            dispatcher.post_attributes("validToken", "not json"),
        ] {
            assert_eq!(
                pending.try_outcome().and_then(|o| o.failure_kind()),
                Some(FailureKind::MalformedRequest)
            );
        }

        assert!(backend.take().is_empty());

        let pending = dispatcher.post_telemetry("validToken", "[{\"ts\": 1, \"values\": {}}]");
        assert!(!pending.is_resolved());
    }

    #[test]
    fn discarded_response_tolerates_late_callback() {
        let (backend, dispatcher) = dispatcher();

        drop(dispatcher.dispatch(RequestContext::server_time("validToken")));

        let (_, _, callback) = backend.take().remove(0);
        callback.on_success(Reply::Session(session()));
        callback.on_error(std::io::Error::other("late").into());
    }
}
