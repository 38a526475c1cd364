use std::fmt::{self, Debug};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot, watch};

use crate::{Actor, ActorDeadError};

/// A boxed future returned by [`AsyncMessage::handle`].
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Helper trait for handling boxed messages.
pub trait BoxMessage<S>: Send + Debug + 'static {
    fn handle_box(self: Box<Self>, state: &mut S, handle: &Actor<S>);
}

/// A message that is handled synchronously with mutable access to the
/// actor's state.
pub trait Message<S>: BoxMessage<S> {
    /// Handles the message.
    fn handle(self, state: &mut S, handle: &Actor<S>);
}

impl<S, M: Message<S>> BoxMessage<S> for M {
    #[inline]
    fn handle_box(self: Box<Self>, state: &mut S, handle: &Actor<S>) {
        (*self).handle(state, handle)
    }
}

/// A message whose handling needs to await.
///
/// The actor keeps the state borrowed until the returned future resolves,
/// so no other message is handled in the meantime.
pub trait AsyncMessage<S>: Send + Debug + 'static {
    /// Handles the message.
    fn handle<'a>(
        self: Box<Self>,
        state: &'a mut S,
        handle: &'a Actor<S>,
    ) -> HandlerFuture<'a>;
}

pub(crate) enum Envelope<S> {
    Sync(Box<dyn BoxMessage<S>>),
    Async(Box<dyn AsyncMessage<S>>),
}

impl<S> Debug for Envelope<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Sync(msg) => msg.fmt(f),
            Envelope::Async(msg) => msg.fmt(f),
        }
    }
}

/// The sending half of a request made with [`Actor::ask`].
pub struct Reply<T>(oneshot::Sender<T>);

impl<T> Reply<T> {
    /// Creates a reply slot together with the future resolving to the
    /// value sent through it.
    #[inline]
    pub fn channel() -> (Self, Answer<T>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), Answer(rx))
    }

    /// Answers the request. The value is discarded if the asker has gone
    /// away.
    #[inline]
    pub fn send(self, value: T) {
        self.0.send(value).ok();
    }
}

impl<T> Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("closed", &self.0.is_closed())
            .finish()
    }
}

/// Resolves to the value sent through the paired [`Reply`], or to
/// [`ActorDeadError`] if the reply is dropped unanswered.
#[derive(Debug)]
pub struct Answer<T>(oneshot::Receiver<T>);

impl<T> Future for Answer<T> {
    type Output = Result<T, ActorDeadError>;

    #[inline]
    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map_err(|_| ActorDeadError)
    }
}

pub struct MailboxParts<S> {
    pub mailbox: Mailbox<S>,
    pub msg_rx: mpsc::UnboundedReceiver<Envelope<S>>,
    pub kill_rx: watch::Receiver<bool>,
}

pub struct Mailbox<S> {
    msg_tx: mpsc::UnboundedSender<Envelope<S>>,
    kill_tx: watch::Sender<bool>,
}

impl<S: Send + 'static> Mailbox<S> {
    #[inline]
    pub fn new() -> MailboxParts<S> {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (kill_tx, kill_rx) = watch::channel(false);
        MailboxParts {
            mailbox: Mailbox { msg_tx, kill_tx },
            msg_rx,
            kill_rx,
        }
    }

    #[inline]
    pub fn send(&self, envelope: Envelope<S>) -> Result<(), ActorDeadError> {
        self.msg_tx.send(envelope).map_err(|_| ActorDeadError)
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.msg_tx.is_closed()
    }

    #[inline]
    pub fn try_kill(&self) {
        self.kill_tx.send(true).ok();
    }
}
