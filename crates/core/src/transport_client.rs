use std::pin::Pin;
use std::sync::Arc;

use tracing::Instrument;
use tripagent_model::{
    Transport, TransportError, TransportRequest, TransportResponse,
};

pub(crate) type SendResult =
    Result<TransportResponse, Box<dyn TransportError>>;
type BoxedSendFuture = Pin<Box<dyn Future<Output = SendResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(TransportRequest) -> BoxedSendFuture + Send + Sync>;

/// A type-erased wrapper around a [`Transport`], so the queues don't need
/// a generic parameter for it.
#[derive(Clone)]
pub(crate) struct TransportClient {
    handler_fn: HandlerFn,
}

impl TransportClient {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        let handler_fn: HandlerFn = Arc::new(move |req| {
            trace!("sending {} messages", req.messages.len());
            let fut = transport.send(req);
            Box::pin(
                async move {
                    let result = fut.await;
                    match &result {
                        Ok(resp) => trace!(
                            "got a response with {} tool calls",
                            resp.tools_used.len()
                        ),
                        Err(err) => {
                            debug!(kind = ?err.kind(), "transport failed: {err}")
                        }
                    }
                    result.map_err(|err| {
                        Box::new(err) as Box<dyn TransportError>
                    })
                }
                .instrument(trace_span!("transport req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and waits for the complete response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. Dropping the future drops the
    /// underlying transport future.
    #[inline]
    pub async fn send(&self, req: TransportRequest) -> SendResult {
        (self.handler_fn)(req).await
    }
}
