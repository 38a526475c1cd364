use std::sync::Weak;

use tokio::select;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::Actor;
use crate::mailbox::{Envelope, Mailbox};

pub async fn run_actor<S: Send + 'static>(
    mailbox: Weak<Mailbox<S>>,
    mut state: S,
    mut msg_rx: mpsc::UnboundedReceiver<Envelope<S>>,
    mut kill_rx: watch::Receiver<bool>,
) {
    debug!("started");
    loop {
        let envelope = select! {
            biased;

            _ = kill_rx.changed() => {
                break;
            }
            envelope = msg_rx.recv() => {
                let Some(envelope) = envelope else {
                    break;
                };
                envelope
            }
        };
        trace!("received message: {envelope:?}");

        let Some(mailbox) = mailbox.upgrade() else {
            warn!("last mailbox has been dropped, discard the message");
            break;
        };
        let handle = Actor::from_mailbox(mailbox);

        match envelope {
            Envelope::Sync(msg) => {
                let proc_span = trace_span!("proc msg");
                proc_span.in_scope(|| {
                    msg.handle_box(&mut state, &handle);
                    trace!("finished");
                });
            }
            Envelope::Async(msg) => {
                // Kill requests only take effect between messages.
                msg.handle(&mut state, &handle)
                    .instrument(trace_span!("proc async msg"))
                    .await;
                trace!("finished");
            }
        }
    }
    // Queued requests see `ActorDeadError` once their replies are dropped.
    msg_rx.close();
    debug!("will terminate");
}
