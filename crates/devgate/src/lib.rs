//! `devgate` bridges synchronous device requests to an asynchronous
//! transport backend.
//!
//! A device talks to a gateway through plain request/response calls, while
//! the work behind each call, such as validating its access token,
//! provisioning its credentials, or fetching a firmware package, is carried
//! out by a backend that answers later, possibly from another thread.
//!
//! For each request the [`Dispatcher`] builds a backend [`Message`], pairs it
//! with a [`Callback`] that knows how to turn the backend reply into the
//! request-specific success payload, submits both, and immediately returns a
//! [`PendingResponse`]. The backend completes the callback exactly once,
//! which resolves the pending response.
//!
//! Every failure, whether a malformed payload, an unreachable backend, or an
//! unexpected fault, is classified into one of three [`FailureKind`]s. Fault
//! details are only logged, callers receive a stable message.
//!
//! [`Dispatcher`]: dispatcher::Dispatcher
//! [`Message`]: message::Message
//! [`Callback`]: callback::Callback
//! [`PendingResponse`]: pending::PendingResponse
//! [`FailureKind`]: outcome::FailureKind

#![deny(unsafe_code)]
#![deny(missing_docs)]

/// The backend interface.
pub mod backend;
/// Completion callbacks, one per request kind.
pub mod callback;
/// The request dispatcher.
pub mod dispatcher;
/// Internal faults and their classification.
pub mod fault;
/// An in-memory backend.
pub mod memory;
/// Messages exchanged with the backend.
pub mod message;
/// Request outcomes.
pub mod outcome;
/// Pending responses.
pub mod pending;
/// Inbound requests.
pub mod request;
