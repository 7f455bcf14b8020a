//! The live request object returned to callers.

use std::fmt;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::http::ReadyState;
use crate::options::Completion;
use crate::transport::Transport;

/// Owns the transport of one request.
///
/// The completion is delivered both to the callbacks and to this handle, so
/// callers may also `wait` (blocking) or `.completion().await`. A request
/// that never reaches `Done` never resolves; there is no timeout.
pub struct RequestHandle {
    id: Uuid,
    transport: Box<dyn Transport>,
    completion: Option<oneshot::Receiver<Completion>>,
    received: Option<Completion>,
}

impl RequestHandle {
    pub(crate) fn new(id: Uuid, transport: Box<dyn Transport>, completion: oneshot::Receiver<Completion>) -> Self {
        Self {
            id,
            transport,
            completion: Some(completion),
            received: None,
        }
    }

    pub(crate) fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    /// Correlates log lines of this request.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Strategy id of the transport the chain constructed.
    pub fn transport_id(&self) -> &str {
        self.transport.id()
    }

    pub fn ready_state(&self) -> ReadyState {
        self.transport.ready_state()
    }

    pub fn status(&self) -> u16 {
        self.transport.status()
    }

    pub fn response_text(&self) -> String {
        self.transport.response_text()
    }

    /// Abort an in-flight request. Its failure callback runs with status 0.
    pub fn abort(&mut self) {
        self.transport.abort();
    }

    /// Non-blocking check for the completion.
    pub fn try_completion(&mut self) -> Option<Completion> {
        if self.received.is_none() {
            if let Some(rx) = self.completion.as_mut() {
                if let Ok(completion) = rx.try_recv() {
                    self.received = Some(completion);
                    self.completion = None;
                }
            }
        }
        self.received.clone()
    }

    /// Block the current thread until the request completes.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`RequestHandle::completion`] there.
    pub fn wait(mut self) -> Result<Completion, DispatchError> {
        if let Some(completion) = self.received.take() {
            return Ok(completion);
        }
        let rx = self.completion.take().ok_or(DispatchError::InvalidState("completion already taken"))?;
        // The transport stays alive while waiting: it owns the sender.
        let result = rx.blocking_recv();
        drop(self.transport);
        result.map_err(|_| DispatchError::InvalidState("request ended without completing"))
    }

    pub async fn completion(mut self) -> Result<Completion, DispatchError> {
        if let Some(completion) = self.received.take() {
            return Ok(completion);
        }
        let rx = self.completion.take().ok_or(DispatchError::InvalidState("completion already taken"))?;
        let result = rx.await;
        drop(self.transport);
        result.map_err(|_| DispatchError::InvalidState("request ended without completing"))
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle")
            .field("id", &self.id)
            .field("transport", &self.transport.id())
            .field("ready_state", &self.ready_state())
            .finish()
    }
}
