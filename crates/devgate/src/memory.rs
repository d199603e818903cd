use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use hashbrown::HashMap;

use tokio::runtime::Handle;

use tracing::{debug, info};

use crate::backend::Backend;
use crate::callback::Callback;
use crate::fault::Fault;
use crate::message::{
    Message, OtaKind, OtaPackage, ProvisionRequest, ProvisionResponse, ProvisionStatus, Reply,
    SessionInfo, Upload,
};
use crate::request::RequestKind;

// Device type assigned to provisioned devices.
const PROVISIONED_DEVICE_TYPE: &str = "provisioned";

#[derive(Debug)]
struct ProvisionProfile {
    secret: String,
    device_type: String,
}

/// An uploaded item recorded by [`MemoryBackend`].
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    /// Identifier of the publishing device.
    pub device_id: String,
    /// Uploaded data.
    pub upload: Upload,
}

/// An in-process [`Backend`].
///
/// Holds registered devices, provisioning profiles, and OTA packages in
/// memory. When a tokio runtime is available, callbacks are completed from
/// a spawned task, otherwise before [`Backend::process`] returns.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    devices: Mutex<HashMap<String, SessionInfo>>,
    profiles: Mutex<HashMap<String, ProvisionProfile>>,
    packages: Mutex<HashMap<OtaKind, OtaPackage>>,
    published: Mutex<Vec<Published>>,
    offline: AtomicBool,
    provisioned: AtomicU64,
}

impl MemoryBackend {
    /// Creates an empty [`MemoryBackend`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a device reachable through `token`.
    #[must_use]
    pub fn device(self, token: impl Into<String>, session: SessionInfo) -> Self {
        lock(&self.devices).insert(token.into(), session);
        self
    }

    /// Registers a provisioning profile.
    #[must_use]
    pub fn provisioning(
        self,
        key: impl Into<String>,
        secret: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        lock(&self.profiles).insert(
            key.into(),
            ProvisionProfile {
                secret: secret.into(),
                device_type: device_type.into(),
            },
        );
        self
    }

    /// Assigns an OTA package to every device.
    #[must_use]
    pub fn package(self, kind: OtaKind, package: OtaPackage) -> Self {
        lock(&self.packages).insert(kind, package);
        self
    }

    /// Simulates the loss of the connection to the device registry.
    ///
    /// While offline, every request fails with an I/O fault.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Returns everything published so far.
    #[must_use]
    pub fn published(&self) -> Vec<Published> {
        lock(&self.published).clone()
    }

    fn handle(&self, message: Message) -> Result<Reply, Fault> {
        if self.offline.load(Ordering::Acquire) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "device registry unreachable",
            )
            .into());
        }

        match message {
            Message::ValidateToken { token } => self.session(&token).map(Reply::Session),
            Message::Provision(request) => Ok(Reply::Provisioned(self.provision(request))),
            Message::GetOtaPackage { token, kind } => {
                self.session(&token)?;
                lock(&self.packages)
                    .get(&kind)
                    .cloned()
                    .map(Reply::Package)
                    .ok_or_else(|| Fault::semantic(format!("no {kind} package assigned")))
            }
        }
    }

    fn session(&self, token: &str) -> Result<SessionInfo, Fault> {
        lock(&self.devices)
            .get(token)
            .cloned()
            .ok_or_else(|| Fault::semantic("unknown device token"))
    }

    fn provision(&self, request: ProvisionRequest) -> ProvisionResponse {
        let device_type = match lock(&self.profiles).get(&request.provision_device_key) {
            Some(profile) if profile.secret == request.provision_device_secret => {
                profile.device_type.clone()
            }
            _ => return ProvisionResponse::rejected(ProvisionStatus::NotFound),
        };

        let n = self.provisioned.fetch_add(1, Ordering::Relaxed);
        let device_name = request
            .device_name
            .unwrap_or_else(|| format!("{PROVISIONED_DEVICE_TYPE}-{n}"));
        let token = request
            .token
            .unwrap_or_else(|| format!("{device_name}-{n:08x}"));

        let mut devices = lock(&self.devices);
        if devices.contains_key(&token)
            || devices.values().any(|session| session.device_name == device_name)
        {
            return ProvisionResponse::rejected(ProvisionStatus::Failure);
        }

        info!("Provisioned device {device_name}");
        devices.insert(
            token.clone(),
            SessionInfo::new(format!("{n:016x}"), device_name, device_type),
        );

        ProvisionResponse::success(token)
    }
}

impl Backend for MemoryBackend {
    fn process(&self, kind: RequestKind, message: Message, callback: Callback) {
        debug!("Processing {kind} message for {}", callback.kind());
        let result = self.handle(message);

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { callback.complete(result) });
            }
            Err(_) => callback.complete(result),
        }
    }

    fn publish(&self, session: &SessionInfo, upload: Upload) {
        debug!("Publishing data of {}", session.device_name);
        lock(&self.published).push(Published {
            device_id: session.device_id.clone(),
            upload,
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use serde_json::json;

    use crate::dispatcher::Dispatcher;
    use crate::message::{OtaKind, OtaPackage, ProvisionStatus, SessionInfo, Upload};
    use crate::outcome::{FailureKind, Outcome, Payload};
    use crate::request::OtaParams;

    use super::{MemoryBackend, Published};

    fn backend() -> MemoryBackend {
        MemoryBackend::new()
            .device(
                "validToken",
                SessionInfo::new("0001", "thermostat", "default"),
            )
            .provisioning("key", "secret", "sensor")
            .package(
                OtaKind::Firmware,
                OtaPackage::new("Title", "version", Bytes::from((0..50u8).collect::<Vec<_>>())),
            )
    }

    fn dispatcher() -> Dispatcher<MemoryBackend> {
        Dispatcher::new(Arc::new(backend())).clock(|| 42)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn server_time_from_another_task() {
        let outcome = dispatcher().server_time("validToken").wait().await;
        assert_eq!(outcome, Outcome::Success(Payload::ServerTime(42)));
    }

    #[tokio::test]
    async fn unknown_token_is_malformed() {
        let outcome = dispatcher().server_time("wrongToken").wait().await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MalformedRequest));
    }

    #[tokio::test]
    async fn offline_registry_is_upstream_failure() {
        let dispatcher = dispatcher();
        dispatcher.backend().set_offline(true);

        let outcome = dispatcher
            .dispatch(crate::request::RequestContext::auth("validToken"))
            .wait()
            .await;
        assert_eq!(
            outcome.failure_kind(),
            Some(FailureKind::UpstreamUnavailable)
        );
    }

    #[tokio::test]
    async fn firmware_chunks() {
        let dispatcher = dispatcher();

        let outcome = dispatcher
            .ota_chunk(
                "validToken",
                OtaParams::firmware("Title", "version").chunk(11, 3),
            )
            .wait()
            .await;
        assert_eq!(
            outcome,
            Outcome::Success(Payload::Chunk(Bytes::from((33..44u8).collect::<Vec<_>>())))
        );

        let outcome = dispatcher
            .ota_chunk("validToken", OtaParams::firmware("Title", "version"))
            .wait()
            .await;
        let Outcome::Success(Payload::Chunk(whole)) = outcome else {
            panic!("expected the whole artifact");
        };
        assert_eq!(whole.len(), 50);

        // No software package is assigned.
        let outcome = dispatcher
            .ota_chunk("validToken", OtaParams::software("Title", "version"))
            .wait()
            .await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MalformedRequest));
    }

    #[tokio::test]
    async fn provisioning_registers_device() {
        let dispatcher = dispatcher();

        let body = json!({
            "deviceName": "boiler",
            "provisionDeviceKey": "key",
            "provisionDeviceSecret": "secret",
            "token": "boiler-token"
        })
        .to_string();

        let Outcome::Success(Payload::Provisioned(response)) =
            dispatcher.provision(&body).wait().await
        else {
            panic!("expected a provisioning response");
        };
        assert_eq!(response.status, ProvisionStatus::Success);
        assert_eq!(response.credentials_value.as_deref(), Some("boiler-token"));

        // The new token authenticates.
        assert_eq!(
            dispatcher.authenticate("boiler-token", |_| {}).wait().await,
            Outcome::ok()
        );

        // Same device twice.
        let Outcome::Success(Payload::Provisioned(response)) =
            dispatcher.provision(&body).wait().await
        else {
            panic!("expected a provisioning response");
        };
        assert_eq!(response.status, ProvisionStatus::Failure);
    }

    #[tokio::test]
    async fn provisioning_wrong_secret() {
        let body = json!({
            "provisionDeviceKey": "key",
            "provisionDeviceSecret": "nope"
        })
        .to_string();

        let Outcome::Success(Payload::Provisioned(response)) =
            dispatcher().provision(&body).wait().await
        else {
            panic!("expected a provisioning response");
        };
        assert_eq!(response.status, ProvisionStatus::NotFound);
    }

    #[tokio::test]
    async fn telemetry_is_recorded() {
        let dispatcher = dispatcher();

        let outcome = dispatcher
            .post_telemetry("validToken", "{\"temperature\": 19}")
            .wait()
            .await;
        assert_eq!(outcome, Outcome::ok());

        assert_eq!(
            dispatcher.backend().published(),
            vec![Published {
                device_id: "0001".into(),
                upload: Upload::Telemetry(json!({ "temperature": 19 })),
            }]
        );
    }

    #[test]
    fn completes_without_runtime() {
        let mut pending = dispatcher().server_time("validToken");
        assert_eq!(
            pending.try_outcome(),
            Some(Outcome::Success(Payload::ServerTime(42)))
        );
    }
}
