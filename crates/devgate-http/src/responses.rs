use axum::{
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use serde::Serialize;

use devgate::outcome::{Failure, FailureKind, Outcome, Payload};

// Content type of OTA chunks.
const OCTET_STREAM: &str = "application/octet-stream";

/// Returns the HTTP status reported for a [`FailureKind`].
#[must_use]
pub const fn failure_status(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::MalformedRequest => StatusCode::BAD_REQUEST,
        FailureKind::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A response describing a failed request.
#[derive(Debug, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// Failure kind.
    pub error: FailureKind,
    /// Stable failure description.
    pub description: String,
}

impl From<Failure> for ErrorResponse {
    fn from(failure: Failure) -> Self {
        Self {
            error: failure.kind(),
            description: failure.message().to_owned(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (failure_status(self.error), Json(self)).into_response()
    }
}

/// Server time body.
#[derive(Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimeResponse {
    /// Milliseconds since the Unix epoch.
    pub server_time: u64,
}

/// The HTTP encoding of a resolved [`Outcome`].
#[derive(Debug)]
pub struct OutcomeResponse(pub Outcome);

impl IntoResponse for OutcomeResponse {
    fn into_response(self) -> Response {
        match self.0 {
            Outcome::Success(Payload::Ok) => StatusCode::OK.into_response(),
            Outcome::Success(Payload::Provisioned(response)) => {
                (StatusCode::OK, Json(response)).into_response()
            }
            Outcome::Success(Payload::Chunk(chunk)) => {
                (StatusCode::OK, [(header::CONTENT_TYPE, OCTET_STREAM)], chunk).into_response()
            }
            Outcome::Success(Payload::ServerTime(server_time)) => {
                (StatusCode::OK, Json(ServerTimeResponse { server_time })).into_response()
            }
            Outcome::Failure(failure) => ErrorResponse::from(failure).into_response(),
        }
    }
}
