//! `devgate-http` exposes `devgate` device requests over HTTP.
//!
//! Each route parses the device token and the request parameters, hands a
//! request to the `devgate` dispatcher, and waits for the pending response
//! up to the configured request timeout. A request unanswered in time fails
//! as upstream unavailable.
//!
//! Resolved outcomes are encoded as follows:
//!
//! - a generic acknowledgement is an empty `200 OK`
//! - a provisioning response is a `200 OK` JSON body
//! - an OTA chunk is a `200 OK` `application/octet-stream` body
//! - the server time is a `200 OK` JSON body `{"serverTime": <ms>}`
//! - a malformed request is a `400 Bad Request`
//! - an unavailable backend is a `503 Service Unavailable`
//! - an internal fault is a `500 Internal Server Error`
//!
//! Failure bodies only carry the failure kind and a stable description.

#![deny(unsafe_code)]
#![deny(missing_docs)]

/// Error management.
pub mod error;
/// HTTP encodings of request outcomes.
pub mod responses;
/// The gateway server.
pub mod server;

mod routes;
