//! Inbound message queue feeding the sandbox.

use std::fmt;

use futures_channel::mpsc;
use futures_util::future::{self, Either};
use futures_util::stream::{FuturesUnordered, StreamExt};

use crate::host::{Host, LocalFuture};
use crate::lifecycle::Sandbox;
use crate::protocol::InboundMessage;

#[derive(Debug)]
pub enum ChannelError {
    /// The receiving side was dropped.
    Closed,
    Decode(String),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::Closed => write!(f, "channel closed"),
            ChannelError::Decode(message) => write!(f, "undecodable message: {message}"),
        }
    }
}

impl std::error::Error for ChannelError {}

/// Creates the sending and receiving halves of the sandbox's message queue.
pub fn message_channel() -> (MessageSender, MessageChannel) {
    let (sender, receiver) = mpsc::unbounded();
    (MessageSender { inner: sender }, MessageChannel { receiver })
}

#[derive(Clone)]
pub struct MessageSender {
    inner: mpsc::UnboundedSender<InboundMessage>,
}

impl MessageSender {
    pub fn send(&self, message: InboundMessage) -> Result<(), ChannelError> {
        self.inner
            .unbounded_send(message)
            .map_err(|_error| ChannelError::Closed)
    }

    pub fn send_json(&self, json: &str) -> Result<(), ChannelError> {
        let message = InboundMessage::from_json(json)
            .map_err(|error| ChannelError::Decode(error.to_string()))?;
        self.send(message)
    }

    /// Ends the stream; `MessageChannel::run` returns once pending loads settle.
    pub fn close(&self) {
        self.inner.close_channel();
    }
}

pub struct MessageChannel {
    receiver: mpsc::UnboundedReceiver<InboundMessage>,
}

enum Event {
    Message(Option<InboundMessage>),
    LoadSettled,
}

impl MessageChannel {
    /// Delivers messages in order until every sender is gone.
    ///
    /// Loads run concurrently with message handling so that a `params`
    /// arriving mid-load is seen by the sandbox in its `Loading` phase.
    pub async fn run<H: Host>(mut self, sandbox: &Sandbox<H>) {
        let mut loads: FuturesUnordered<LocalFuture<'_, ()>> = FuturesUnordered::new();
        loop {
            let event = if loads.is_empty() {
                Event::Message(self.receiver.next().await)
            } else {
                match future::select(self.receiver.next(), loads.next()).await {
                    Either::Left((message, _)) => Event::Message(message),
                    Either::Right(_) => Event::LoadSettled,
                }
            };
            match event {
                Event::Message(Some(message)) => {
                    if let Some(load) = dispatch(sandbox, message) {
                        loads.push(load);
                    }
                }
                Event::Message(None) => break,
                Event::LoadSettled => {}
            }
        }
        while loads.next().await.is_some() {}
        log::debug!("message channel closed");
    }
}

/// Hands one message to the sandbox; returns the continuation of a load.
pub fn dispatch<H: Host>(
    sandbox: &Sandbox<H>,
    message: InboundMessage,
) -> Option<LocalFuture<'_, ()>> {
    log::debug!("received '{}' message", message.kind());
    match message {
        InboundMessage::Init(init) => Some(sandbox.begin_init(init)),
        InboundMessage::Params { params } => {
            sandbox.params(params);
            None
        }
        InboundMessage::Unknown => {
            log::warn!("ignoring message of unknown type");
            None
        }
    }
}
