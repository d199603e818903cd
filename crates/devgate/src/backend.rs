use std::sync::Arc;

use crate::callback::Callback;
use crate::message::{Message, SessionInfo, Upload};
use crate::request::RequestKind;

/// The asynchronous transport backend.
///
/// An implementation must invoke exactly one of the [`Callback`] methods
/// for every processed message. It may do so before `process` returns or
/// later, from any thread or task.
pub trait Backend: Send + Sync + 'static {
    /// Processes a message, completing the request through `callback`.
    fn process(&self, kind: RequestKind, message: Message, callback: Callback);

    /// Forwards device data on behalf of an authenticated session.
    fn publish(&self, session: &SessionInfo, upload: Upload);
}

impl<B: Backend> Backend for Arc<B> {
    fn process(&self, kind: RequestKind, message: Message, callback: Callback) {
        self.as_ref().process(kind, message, callback);
    }

    fn publish(&self, session: &SessionInfo, upload: Upload) {
        self.as_ref().publish(session, upload);
    }
}
