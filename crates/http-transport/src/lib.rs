//! A transport for the TripAgent chat backend over HTTP.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use mime::Mime;
use reqwest::{Client, Response, StatusCode, header};
use tokio::select;
use tripagent_model::{
    ErrorKind, Transport, TransportError, TransportRequest, TransportResponse,
    TransportStatus,
};

pub use config::{HttpTransportConfig, HttpTransportConfigBuilder};
use io::{Chunks, Sse, SseError};
use proto::{ChatRequest, ChatResult, DONE, StreamEvent};

/// Error type for [`HttpTransport`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    fn from_status(status: StatusCode) -> Self {
        let kind = match status {
            StatusCode::SERVICE_UNAVAILABLE => ErrorKind::ServiceUnavailable,
            StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
            status if status.is_server_error() => ErrorKind::Server,
            _ => ErrorKind::Other,
        };
        let message = if status.is_server_error() {
            format!("server responded with {status}")
        } else {
            format!("backend rejected the request with {status}")
        };
        Self::new(message, kind)
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status);
        }
        let kind = if err.is_connect() || err.is_timeout() || err.is_request()
        {
            ErrorKind::Network
        } else {
            ErrorKind::Other
        };
        let message = if err.is_timeout() {
            format!("request timed out: {err}")
        } else if err.is_connect() {
            format!("connection failed: {err}")
        } else {
            format!("network error: {err}")
        };
        Self::new(message, kind)
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl TransportError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Talks to the chat endpoint of the TripAgent backend.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    config: Arc<HttpTransportConfig>,
}

impl HttpTransport {
    /// Creates a new `HttpTransport` with the given configuration.
    #[inline]
    pub fn new(config: HttpTransportConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }
}

impl Transport for HttpTransport {
    type Error = Error;

    fn send(
        &self,
        req: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse, Self::Error>> + Send + 'static
    {
        let body = ChatRequest {
            messages: &req.messages,
            context: &req.context,
        };
        let mut builder = self
            .client
            .post(self.config.chat_url())
            .timeout(self.config.timeout)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "text/event-stream, application/json")
            .json(&body);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }
        let resp_fut = builder.send();

        async move {
            let cancel = req.cancel.clone();
            let exchange = async {
                let resp = resp_fut
                    .await
                    .and_then(Response::error_for_status)
                    .map_err(Error::from_reqwest)?;
                read_response(resp, &req).await
            };
            select! {
                biased;
                _ = cancel.cancelled() => Err(Error::new(
                    "request was cancelled",
                    ErrorKind::Cancelled,
                )),
                result = exchange => result,
            }
        }
    }
}

async fn read_response(
    resp: Response,
    req: &TransportRequest,
) -> Result<TransportResponse, Error> {
    let mime: Option<Mime> = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    match mime {
        Some(m) if m.subtype() == mime::EVENT_STREAM => {
            let sse = Sse::new(Chunks::from_response(resp));
            read_event_stream(sse, req).await
        }
        Some(m) if m.subtype() == mime::JSON => {
            let result: ChatResult = resp
                .json()
                .await
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
            Ok(result.into_response())
        }
        _ => Err(Error::new(
            format!("unexpected content type: {mime:?}"),
            ErrorKind::Other,
        )),
    }
}

async fn read_event_stream(
    mut sse: Sse,
    req: &TransportRequest,
) -> Result<TransportResponse, Error> {
    req.report(TransportStatus::Thinking);

    let mut result = None;
    loop {
        let data = match sse.next_event().await {
            Ok(Some(data)) => data,
            Ok(None) => break,
            Err(SseError::ChunksError(err)) => {
                return Err(Error::new(err.0, ErrorKind::Network));
            }
            Err(SseError::InvalidPayload) => {
                return Err(Error::new(
                    "invalid event stream payload",
                    ErrorKind::Other,
                ));
            }
        };
        if data == DONE {
            break;
        }

        let event: StreamEvent = match serde_json::from_str(&data) {
            Ok(event) => event,
            Err(err) => {
                warn!("skipping unrecognized event: {err}");
                continue;
            }
        };
        match event {
            StreamEvent::Status { message } => {
                req.report(TransportStatus::Message(message));
            }
            StreamEvent::Tool { tool } => match tool.kind() {
                Some(kind) => req.report(TransportStatus::ToolStarted(kind)),
                None => debug!("backend started unknown tool `{}`", tool.name),
            },
            StreamEvent::Result(chat_result) => result = Some(chat_result),
        }
    }

    result.map(ChatResult::into_response).ok_or_else(|| {
        Error::new("server closed the stream without a result", ErrorKind::Server)
    })
}
