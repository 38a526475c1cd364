use std::sync::Arc;

use tracing::Instrument;

use crate::mailbox::{Envelope, Mailbox, MailboxParts};
use crate::scheduler::run_actor;
use crate::{ActorDeadError, AsyncMessage, Message, Reply};

/// Handle to an actor.
///
/// The actor stops when every handle is dropped, or when it is killed.
pub struct Actor<S> {
    mailbox: Arc<Mailbox<S>>,
}

impl<S: Send + 'static> Actor<S> {
    /// Spawns a new actor on the current tokio runtime with the specified
    /// state and an optional label used in its tracing span.
    pub fn spawn(state: S, label: Option<&str>) -> Self {
        let MailboxParts {
            mailbox,
            msg_rx,
            kill_rx,
        } = Mailbox::new();
        let mailbox = Arc::new(mailbox);
        tokio::spawn(
            run_actor(Arc::downgrade(&mailbox), state, msg_rx, kill_rx)
                .instrument(trace_span!("actor", label = label)),
        );
        Self { mailbox }
    }

    #[inline]
    pub(crate) fn from_mailbox(mailbox: Arc<Mailbox<S>>) -> Self {
        Self { mailbox }
    }

    /// Sends a message to the actor.
    #[inline]
    pub fn send<M: Message<S>>(&self, msg: M) -> Result<(), ActorDeadError> {
        self.mailbox.send(Envelope::Sync(Box::new(msg)))
    }

    /// Sends a message whose handler awaits before the next message is
    /// taken from the mailbox.
    #[inline]
    pub fn send_async<M: AsyncMessage<S>>(
        &self,
        msg: M,
    ) -> Result<(), ActorDeadError> {
        self.mailbox.send(Envelope::Async(Box::new(msg)))
    }

    /// Sends a message built around a [`Reply`] and waits for the answer.
    ///
    /// Fails if the actor is dead, or stops before the message is
    /// answered.
    pub async fn ask<T, M, F>(&self, make_msg: F) -> Result<T, ActorDeadError>
    where
        M: Message<S>,
        F: FnOnce(Reply<T>) -> M,
    {
        let (reply, answer) = Reply::channel();
        self.send(make_msg(reply))?;
        answer.await
    }

    /// Returns `true` if the actor is still accepting messages.
    #[inline]
    pub fn is_alive(&self) -> bool {
        !self.mailbox.is_closed()
    }

    /// Attempts to kill the actor.
    ///
    /// The actor is not guaranteed to be killed immediately, but it
    /// will stop handling further messages and quit soon.
    #[inline]
    pub fn try_kill(&self) {
        self.mailbox.try_kill();
    }
}

impl<S> Clone for Actor<S> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}
