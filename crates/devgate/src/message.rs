use bytes::Bytes;

use serde::{Deserialize, Serialize};

use crate::fault::Fault;
use crate::request::RequestKind;

/// Session data produced by a successful device authentication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Device identifier.
    pub device_id: String,
    /// Device name.
    pub device_name: String,
    /// Device profile or type.
    pub device_type: String,
}

impl SessionInfo {
    /// Creates a [`SessionInfo`].
    pub fn new(
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        device_type: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            device_name: device_name.into(),
            device_type: device_type.into(),
        }
    }
}

/// Kind of credentials issued to a provisioned device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialsType {
    /// An opaque access token.
    #[default]
    AccessToken,
}

/// A provisioning request sent by a device that has no credentials yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    /// Name the device wants to be registered with.
    #[serde(default)]
    pub device_name: Option<String>,
    /// Provisioning key of the device profile.
    pub provision_device_key: String,
    /// Provisioning secret of the device profile.
    pub provision_device_secret: String,
    /// Requested credentials type.
    #[serde(default)]
    pub credentials_type: Option<CredentialsType>,
    /// Access token chosen by the device, if any.
    #[serde(default)]
    pub token: Option<String>,
}

impl ProvisionRequest {
    pub(crate) fn validate(self) -> Result<Self, Fault> {
        if self.provision_device_key.trim().is_empty() {
            return Err(Fault::semantic("`provisionDeviceKey` is empty"));
        }
        if self.provision_device_secret.trim().is_empty() {
            return Err(Fault::semantic("`provisionDeviceSecret` is empty"));
        }
        if self.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(Fault::semantic("`token` is empty"));
        }
        Ok(self)
    }
}

/// Status of a provisioning attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisionStatus {
    /// The device has been provisioned.
    Success,
    /// No device profile matches the provisioning key and secret.
    NotFound,
    /// The device already exists.
    Failure,
}

impl std::fmt::Display for ProvisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => "SUCCESS",
            Self::NotFound => "NOT_FOUND",
            Self::Failure => "FAILURE",
        }
        .fmt(f)
    }
}

/// The provisioning response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionResponse {
    /// Provisioning status.
    pub status: ProvisionStatus,
    /// Issued credentials type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_type: Option<CredentialsType>,
    /// Issued credentials.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_value: Option<String>,
}

impl ProvisionResponse {
    /// A successful provisioning carrying an access token.
    pub fn success(token: impl Into<String>) -> Self {
        Self {
            status: ProvisionStatus::Success,
            credentials_type: Some(CredentialsType::AccessToken),
            credentials_value: Some(token.into()),
        }
    }

    /// A provisioning attempt that did not produce credentials.
    #[must_use]
    pub const fn rejected(status: ProvisionStatus) -> Self {
        Self {
            status,
            credentials_type: None,
            credentials_value: None,
        }
    }
}

/// Kind of over-the-air package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtaKind {
    /// Firmware image.
    Firmware,
    /// Software bundle.
    Software,
}

impl std::fmt::Display for OtaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Firmware => "firmware",
            Self::Software => "software",
        }
        .fmt(f)
    }
}

/// An over-the-air package as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaPackage {
    /// Package title.
    pub title: String,
    /// Package version.
    pub version: String,
    /// Package artifact.
    pub data: Bytes,
}

impl OtaPackage {
    /// Creates an [`OtaPackage`].
    pub fn new(title: impl Into<String>, version: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            title: title.into(),
            version: version.into(),
            data: data.into(),
        }
    }
}

/// Device data forwarded after authentication.
#[derive(Debug, Clone, PartialEq)]
pub enum Upload {
    /// Time-series values.
    Telemetry(serde_json::Value),
    /// Client-side attributes.
    Attributes(serde_json::Value),
}

/// A message submitted to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Validates a device access token.
    ValidateToken {
        /// Device access token.
        token: String,
    },
    /// Provisions a new device.
    Provision(ProvisionRequest),
    /// Fetches the OTA package currently assigned to a device.
    GetOtaPackage {
        /// Device access token.
        token: String,
        /// Package kind.
        kind: OtaKind,
    },
}

impl Message {
    /// Returns the [`RequestKind`] this message is processed as.
    #[must_use]
    pub const fn kind(&self) -> RequestKind {
        match self {
            Self::ValidateToken { .. } => RequestKind::Auth,
            Self::Provision(_) => RequestKind::Provision,
            Self::GetOtaPackage { .. } => RequestKind::OtaChunk,
        }
    }
}

/// A successful backend reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The token is valid.
    Session(SessionInfo),
    /// The provisioning attempt has been processed.
    Provisioned(ProvisionResponse),
    /// The package assigned to the device.
    Package(OtaPackage),
}

impl Reply {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::Provisioned(_) => "provisioning",
            Self::Package(_) => "package",
        }
    }
}
