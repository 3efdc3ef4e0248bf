use crate::append_cause;
use crate::error::{Actor, Error};
use crate::message::Message;
use tracing::debug;

/// What a user iterator reports from one `next` call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NextStatus {
    /// Messages were appended to the batch.
    Ok,
    /// Nothing available right now; the downstream must retry later.
    Again,
    /// No further messages will ever be produced.
    End,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekStatus {
    Ok,
    Again,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IteratorState {
    NotStarted,
    Active,
    Ended,
    Finalized,
}

/// One `next` call's output buffer, bounded by the caller's capacity.
#[derive(Debug)]
pub struct MessageBatch {
    messages: Vec<Message>,
    capacity: usize,
}

impl MessageBatch {
    pub(crate) fn new(capacity: usize) -> Self {
        MessageBatch {
            messages: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, message: Message) -> Result<(), Error> {
        if self.messages.len() >= self.capacity {
            return Err(Error::BatchFull);
        }
        self.messages.push(message);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.messages.len()
    }

    fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// The upstream-author side of the message iterator protocol.
///
/// Implementations fill the batch and report a status; the engine-side
/// [`MessageIterator`] wrapper enforces the batching contracts.
pub trait MessageIteratorImpl: Send {
    fn next(&mut self, batch: &mut MessageBatch) -> Result<NextStatus, Error>;

    fn can_seek_beginning(&mut self) -> Result<bool, Error> {
        Ok(false)
    }

    fn seek_beginning(&mut self) -> Result<SeekStatus, Error> {
        Err(Error::UnsupportedFeature("seek to beginning"))
    }

    fn can_seek_ns_from_origin(&mut self, _ns_from_origin: i64) -> Result<bool, Error> {
        Ok(false)
    }

    fn seek_ns_from_origin(&mut self, _ns_from_origin: i64) -> Result<SeekStatus, Error> {
        Err(Error::UnsupportedFeature("seek by time"))
    }

    fn finalize(&mut self) {}
}

/// What the engine-side iterator yields per `next` call.
#[derive(Debug)]
pub enum IteratorNext {
    /// At least one message; never empty.
    Messages(Vec<Message>),
    Again,
    End,
}

enum PendingTerminal {
    End,
    Error(Error),
}

/// An engine-owned iterator attached to one upstream output port.
///
/// Wraps the upstream's [`MessageIteratorImpl`] and enforces the protocol:
/// `Ok` batches are never empty, a batch that was cut short by end-of-stream
/// or an error is still delivered as `Ok` with the terminal status replayed
/// on the following call, and the `NotStarted → Active → Ended/Finalized`
/// lifecycle is tracked here.
pub struct MessageIterator {
    user: Box<dyn MessageIteratorImpl>,
    state: IteratorState,
    pending: Option<PendingTerminal>,
    component_name: String,
    port_name: String,
}

impl MessageIterator {
    pub(crate) fn new(
        user: Box<dyn MessageIteratorImpl>,
        component_name: String,
        port_name: String,
    ) -> Self {
        MessageIterator {
            user,
            state: IteratorState::NotStarted,
            pending: None,
            component_name,
            port_name,
        }
    }

    pub fn state(&self) -> IteratorState {
        self.state
    }

    /// The name of the upstream component this iterator pulls from.
    pub fn upstream_component_name(&self) -> &str {
        &self.component_name
    }

    /// The name of the upstream output port this iterator is attached to.
    pub fn upstream_port_name(&self) -> &str {
        &self.port_name
    }

    fn actor(&self) -> Actor {
        Actor::MessageIterator {
            component: self.component_name.clone(),
            port: self.port_name.clone(),
        }
    }

    /// Pulls the next batch, with at most `capacity` messages.
    pub fn next(&mut self, capacity: usize) -> Result<IteratorNext, Error> {
        if capacity == 0 {
            return Err(Error::invalid_params("batch capacity must be at least 1"));
        }
        match self.state {
            IteratorState::Finalized => {
                return Err(Error::msg("message iterator is finalized"));
            }
            IteratorState::Ended => return Ok(IteratorNext::End),
            IteratorState::NotStarted | IteratorState::Active => {}
        }
        if let Some(pending) = self.pending.take() {
            self.state = IteratorState::Ended;
            return match pending {
                PendingTerminal::End => Ok(IteratorNext::End),
                PendingTerminal::Error(e) => {
                    append_cause!(self.actor(), "delivering deferred iterator failure");
                    Err(e)
                }
            };
        }
        self.state = IteratorState::Active;

        let mut batch = MessageBatch::new(capacity);
        let status = self.user.next(&mut batch);
        let messages = batch.into_messages();
        match status {
            Ok(NextStatus::Ok) => {
                if messages.is_empty() {
                    append_cause!(self.actor(), "iterator returned Ok with an empty batch");
                    self.state = IteratorState::Ended;
                    Err(Error::msg("message iterator protocol violation"))
                } else {
                    Ok(IteratorNext::Messages(messages))
                }
            }
            Ok(NextStatus::Again) => {
                if messages.is_empty() {
                    Ok(IteratorNext::Again)
                } else {
                    // Flush what we have; the upstream will be polled again.
                    Ok(IteratorNext::Messages(messages))
                }
            }
            Ok(NextStatus::End) => {
                if messages.is_empty() {
                    self.state = IteratorState::Ended;
                    Ok(IteratorNext::End)
                } else {
                    self.pending = Some(PendingTerminal::End);
                    Ok(IteratorNext::Messages(messages))
                }
            }
            Err(e) => {
                if messages.is_empty() {
                    append_cause!(self.actor(), "iterator next failed");
                    self.state = IteratorState::Ended;
                    Err(e)
                } else {
                    debug!(
                        component = %self.component_name,
                        port = %self.port_name,
                        "Flushing {} buffered messages before surfacing a failure",
                        messages.len()
                    );
                    self.pending = Some(PendingTerminal::Error(e));
                    Ok(IteratorNext::Messages(messages))
                }
            }
        }
    }

    pub fn can_seek_beginning(&mut self) -> Result<bool, Error> {
        self.user.can_seek_beginning()
    }

    /// On success the iterator is active again from the start.
    pub fn seek_beginning(&mut self) -> Result<SeekStatus, Error> {
        if self.state == IteratorState::Finalized {
            return Err(Error::msg("message iterator is finalized"));
        }
        let status = self.user.seek_beginning()?;
        if status == SeekStatus::Ok {
            self.state = IteratorState::Active;
            self.pending = None;
        }
        Ok(status)
    }

    pub fn can_seek_ns_from_origin(&mut self, ns_from_origin: i64) -> Result<bool, Error> {
        self.user.can_seek_ns_from_origin(ns_from_origin)
    }

    pub fn seek_ns_from_origin(&mut self, ns_from_origin: i64) -> Result<SeekStatus, Error> {
        if self.state == IteratorState::Finalized {
            return Err(Error::msg("message iterator is finalized"));
        }
        let status = self.user.seek_ns_from_origin(ns_from_origin)?;
        if status == SeekStatus::Ok {
            self.state = IteratorState::Active;
            self.pending = None;
        }
        Ok(status)
    }

    /// Explicit finalization, allowed from any state.
    pub fn finalize(&mut self) {
        if self.state != IteratorState::Finalized {
            self.user.finalize();
            self.state = IteratorState::Finalized;
        }
    }
}

impl Drop for MessageIterator {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for MessageIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageIterator")
            .field("component", &self.component_name)
            .field("port", &self.port_name)
            .field("state", &self.state)
            .finish()
    }
}
