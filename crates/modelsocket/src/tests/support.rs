use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    error::ModelSocketError,
    protocol::{Event, Request},
    transport::Transport,
};

/// In-memory [`Transport`] for driving the client from tests: records every
/// sent request, surfaces them through [`MockTransport::wait_for_request`],
/// and replays pushed events to the receive loop.
pub(crate) struct MockTransport {
    requests: Mutex<Vec<Request>>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>,
    sent_tx: mpsc::UnboundedSender<Request>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Request>>,
    closed: AtomicBool,
    fail_next_send: AtomicBool,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Self {
            requests: Mutex::new(Vec::new()),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: tokio::sync::Mutex::new(events_rx),
            sent_tx,
            sent_rx: tokio::sync::Mutex::new(sent_rx),
            closed: AtomicBool::new(false),
            fail_next_send: AtomicBool::new(false),
        }
    }

    /// Queues an event for the client's receive loop.
    pub(crate) fn push_event(&self, event: Event) {
        if let Some(sender) = self.events_tx.lock().expect("events lock").as_ref() {
            let _ = sender.send(event);
        }
    }

    /// Waits up to a second for the next request the client sends.
    pub(crate) async fn wait_for_request(&self) -> Request {
        let mut sent = self.sent_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(1), sent.recv())
            .await
            .expect("timeout waiting for request")
            .expect("request channel open")
    }

    pub(crate) fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    /// Makes the next send fail with a transport write error.
    pub(crate) fn fail_next_send(&self) {
        self.fail_next_send.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &Request) -> Result<(), ModelSocketError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ModelSocketError::Closed);
        }
        if self.fail_next_send.swap(false, Ordering::SeqCst) {
            return Err(ModelSocketError::transport("write", None, "injected failure"));
        }

        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let _ = self.sent_tx.send(request.clone());
        Ok(())
    }

    async fn receive(&self) -> Result<Event, ModelSocketError> {
        let mut events = self.events_rx.lock().await;
        match events.recv().await {
            Some(event) => Ok(event),
            None => Err(ModelSocketError::Closed),
        }
    }

    async fn close(&self) -> Result<(), ModelSocketError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.events_tx.lock().expect("events lock").take();
        }
        Ok(())
    }
}
