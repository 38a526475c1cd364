//! A local fake transport for testing purpose.

mod preset;

use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::select;
use tokio::sync::Notify;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tripagent_model::{
    ApiMessage, ChatContext, ErrorKind, Role, Transport, TransportError,
    TransportRequest, TransportResponse, TransportStatus,
};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for Error {}

impl TransportError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Holds a scripted reply back until it is opened.
#[derive(Clone, Default)]
pub struct Gate(Arc<Notify>);

impl Gate {
    /// Lets the reply through. Opening before the request arrives is fine.
    #[inline]
    pub fn open(&self) {
        self.0.notify_one();
    }
}

/// A request as it was received by [`TestTransport`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub messages: Vec<ApiMessage>,
    pub context: ChatContext,
    pub cancel: CancellationToken,
}

impl RecordedRequest {
    /// Returns the content of the newest user message.
    pub fn last_user_message(&self) -> Option<&str> {
        last_user_message(&self.messages)
    }
}

struct Step {
    matcher: Option<String>,
    preset: PresetResponse,
    gate: Option<Gate>,
}

#[derive(Default)]
struct Inner {
    script: Mutex<Vec<Step>>,
    requests: Mutex<Vec<RecordedRequest>>,
    delay: Mutex<Option<Duration>>,
}

/// A local fake transport for testing purpose.
///
/// Replies are scripted ahead of time. A request takes the first scripted
/// step whose matcher equals its newest user message, or which has no
/// matcher at all. If no step is left the request fails.
///
/// Cloned transports share the same script and request log.
#[derive(Clone, Default)]
pub struct TestTransport {
    inner: Arc<Inner>,
}

impl TestTransport {
    /// Scripts a reply for the next request.
    pub fn add_reply(&self, preset: PresetResponse) {
        self.push_step(None, preset, None);
    }

    /// Scripts a reply for the request whose newest user message equals
    /// `input`.
    pub fn add_reply_for<S: Into<String>>(
        &self,
        input: S,
        preset: PresetResponse,
    ) {
        self.push_step(Some(input.into()), preset, None);
    }

    /// Scripts a reply that is held back until the returned gate opens.
    pub fn add_gated_reply(&self, preset: PresetResponse) -> Gate {
        let gate = Gate::default();
        self.push_step(None, preset, Some(gate.clone()));
        gate
    }

    /// Scripts a held-back reply for a specific user message.
    pub fn add_gated_reply_for<S: Into<String>>(
        &self,
        input: S,
        preset: PresetResponse,
    ) -> Gate {
        let gate = Gate::default();
        self.push_step(Some(input.into()), preset, Some(gate.clone()));
        gate
    }

    /// Delays every reply by `duration`.
    #[inline]
    pub fn set_delay(&self, duration: Duration) {
        *lock(&self.inner.delay) = Some(duration);
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.inner.requests).clone()
    }

    /// Returns the number of requests received so far.
    pub fn request_count(&self) -> usize {
        lock(&self.inner.requests).len()
    }

    fn push_step(
        &self,
        matcher: Option<String>,
        preset: PresetResponse,
        gate: Option<Gate>,
    ) {
        lock(&self.inner.script).push(Step {
            matcher,
            preset,
            gate,
        });
    }

    fn take_step(&self, messages: &[ApiMessage]) -> Option<Step> {
        let input = last_user_message(messages);
        let mut script = lock(&self.inner.script);
        let idx = script.iter().position(|step| match &step.matcher {
            Some(matcher) => Some(matcher.as_str()) == input,
            None => true,
        })?;
        Some(script.remove(idx))
    }
}

impl Transport for TestTransport {
    type Error = crate::Error;

    fn send(
        &self,
        req: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, Self::Error>> + Send + 'static
    {
        lock(&self.inner.requests).push(RecordedRequest {
            messages: req.messages.clone(),
            context: req.context.clone(),
            cancel: req.cancel.clone(),
        });
        let step = self.take_step(&req.messages);
        let delay = *lock(&self.inner.delay);

        async move {
            let Some(step) = step else {
                return Err(Error {
                    message: "no scripted reply left".to_owned(),
                    kind: ErrorKind::Other,
                });
            };

            for event in &step.preset.events {
                req.report(match event {
                    PresetEvent::Thinking => TransportStatus::Thinking,
                    PresetEvent::Status(msg) => {
                        TransportStatus::Message(msg.clone())
                    }
                    PresetEvent::ToolStarted(kind) => {
                        TransportStatus::ToolStarted(*kind)
                    }
                });
            }

            let wait = async {
                if let Some(delay) = delay {
                    sleep(delay).await;
                }
                if let Some(gate) = &step.gate {
                    gate.0.notified().await;
                }
            };
            select! {
                _ = req.cancel.cancelled() => {
                    return Err(Error {
                        message: "request was cancelled".to_owned(),
                        kind: ErrorKind::Cancelled,
                    });
                }
                _ = wait => {}
            }

            match &step.preset.failure {
                Some(message) => Err(Error {
                    message: message.clone(),
                    kind: ErrorKind::Other,
                }),
                None => Ok(step.preset.to_response()),
            }
        }
    }
}

fn last_user_message(messages: &[ApiMessage]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|msg| msg.role == Role::User)
        .map(|msg| msg.content.as_str())
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
