//! Connection handling: dialing, the receive loop, and event routing.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    error::ModelSocketError,
    options::{AppendOptions, ClientConfig, OpenOptions},
    protocol::{Event, Request, SeqOpenData},
    seq::{Seq, SeqInner},
    transport::{DialOptions, Transport, WsTransport},
};

/// A connection to a ModelSocket server multiplexing many sequences.
///
/// Handles are cheap to clone and safe to share across tasks. All events
/// arrive on one receive loop and are routed to sequences by id.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    scope: CancellationToken,
    shared: RwLock<ClientShared>,
}

#[derive(Default)]
struct ClientShared {
    seqs: HashMap<String, Arc<SeqInner>>,
    pending: HashMap<String, oneshot::Sender<Event>>,
    closed: bool,
    close_err: Option<ModelSocketError>,
}

/// Removes a pending-open waiter when the issuing `open` exits, whether it
/// completed, failed to send, or was dropped mid-wait.
struct PendingGuard<'a> {
    client: &'a ClientInner,
    cid: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.client
            .shared
            .write()
            .expect("client lock")
            .pending
            .remove(self.cid);
    }
}

impl Client {
    /// Connects to a ModelSocket server over WebSocket.
    pub async fn connect(
        url: &str,
        api_key: Option<&str>,
        config: ClientConfig,
    ) -> Result<Self, ModelSocketError> {
        let transport = WsTransport::connect(url, api_key, DialOptions::default()).await?;
        Ok(Self::with_transport(Arc::new(transport), config))
    }

    /// Creates a client over a custom transport and starts its receive
    /// loop. Useful for tests and alternative carriers.
    pub fn with_transport(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let inner = Arc::new(ClientInner {
            transport,
            config,
            scope: CancellationToken::new(),
            shared: RwLock::new(ClientShared::default()),
        });

        let loop_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            loop_inner.receive_loop().await;
        });

        Self { inner }
    }

    /// Opens a new sequence with the given model.
    ///
    /// When the options carry a toolbox with non-empty tool instructions,
    /// the instructions are appended to the new sequence as a system message
    /// before this returns.
    pub async fn open(
        &self,
        model: &str,
        options: OpenOptions,
    ) -> Result<Seq, ModelSocketError> {
        let cid = Uuid::new_v4().to_string();
        let (sender, receiver) = oneshot::channel();
        {
            let mut shared = self.inner.shared.write().expect("client lock");
            if shared.closed {
                return Err(ModelSocketError::Closed);
            }
            shared.pending.insert(cid.clone(), sender);
        }
        let _guard = PendingGuard {
            client: self.inner.as_ref(),
            cid: &cid,
        };

        let instructions = options
            .toolbox
            .as_ref()
            .map(|toolbox| toolbox.tool_instructions())
            .filter(|instructions| !instructions.is_empty());
        let data = SeqOpenData {
            model: model.to_string(),
            tools_enabled: options.toolbox.is_some(),
            tool_prompt: options.tool_prompt.clone().or_else(|| instructions.clone()),
            skip_prelude: options.skip_prelude,
        };

        let request = Request::seq_open(cid.clone(), data);
        if let Err(error) = self.inner.send(&request).await {
            return Err(match error {
                ModelSocketError::Closed => ModelSocketError::Closed,
                other => ModelSocketError::send_failed("seq_open", other),
            });
        }

        let event = tokio::select! {
            _ = self.inner.scope.cancelled() => return Err(ModelSocketError::Closed),
            received = receiver => received.map_err(|_| ModelSocketError::Closed)?,
        };

        match event {
            Event::SeqOpened { seq_id, .. } => {
                let seq = SeqInner::new(
                    Arc::downgrade(&self.inner),
                    seq_id,
                    options.toolbox.clone(),
                );
                self.inner.register_seq(Arc::clone(&seq));
                let seq = Seq { inner: seq };

                if let Some(instructions) = instructions {
                    seq.append(&instructions, AppendOptions::system()).await?;
                }

                Ok(seq)
            }
            Event::Error {
                message,
                seq_id,
                cid,
            } => Err(ModelSocketError::Protocol {
                message,
                seq_id,
                cid,
            }),
            _ => Err(ModelSocketError::UnexpectedEvent),
        }
    }

    /// Closes the connection and every sequence on it. Idempotent.
    pub async fn close(&self) -> Result<(), ModelSocketError> {
        {
            let mut shared = self.inner.shared.write().expect("client lock");
            if shared.closed {
                return Ok(());
            }
            shared.closed = true;
        }

        self.inner.scope.cancel();

        let seqs: Vec<Arc<SeqInner>> = {
            let shared = self.inner.shared.read().expect("client lock");
            shared.seqs.values().cloned().collect()
        };
        for seq in seqs {
            seq.handle_close(None);
        }

        self.inner.transport.close().await
    }

    /// True once the connection has been closed or its receive loop failed.
    pub fn is_closed(&self) -> bool {
        self.inner.shared.read().expect("client lock").closed
    }

    /// The error that terminated the receive loop, when one did.
    pub fn close_error(&self) -> Option<String> {
        self.inner
            .shared
            .read()
            .expect("client lock")
            .close_err
            .as_ref()
            .map(ToString::to_string)
    }
}

impl ClientInner {
    pub(crate) fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub(crate) fn chunk_capacity(&self) -> usize {
        self.config.chunk_buffer
    }

    pub(crate) async fn send(&self, request: &Request) -> Result<(), ModelSocketError> {
        if self.shared.read().expect("client lock").closed {
            return Err(ModelSocketError::Closed);
        }

        if let Some(hook) = &self.config.on_send {
            hook(request);
        }
        tracing::debug!(
            request = request.request.as_str(),
            cid = request.cid.as_str(),
            seq_id = request.seq_id.as_deref().unwrap_or(""),
            "sending request"
        );

        self.transport.send(request).await
    }

    pub(crate) fn register_seq(&self, seq: Arc<SeqInner>) {
        self.shared
            .write()
            .expect("client lock")
            .seqs
            .insert(seq.id().to_string(), seq);
    }

    pub(crate) fn remove_seq(&self, seq_id: &str) {
        self.shared.write().expect("client lock").seqs.remove(seq_id);
    }

    fn remove_pending(&self, cid: &str) -> Option<oneshot::Sender<Event>> {
        self.shared.write().expect("client lock").pending.remove(cid)
    }

    async fn receive_loop(self: Arc<Self>) {
        loop {
            let received = tokio::select! {
                _ = self.scope.cancelled() => break,
                received = self.transport.receive() => received,
            };

            let event = match received {
                Ok(event) => event,
                Err(error) => {
                    tracing::debug!(error = %error, "receive loop terminated");
                    {
                        let mut shared = self.shared.write().expect("client lock");
                        shared.close_err = Some(error);
                        shared.closed = true;
                    }
                    self.scope.cancel();
                    break;
                }
            };

            if let Some(hook) = &self.config.on_receive {
                hook(&event);
            }
            tracing::debug!(
                event = event.kind(),
                seq_id = event.seq_id().unwrap_or(""),
                cid = event.cid().unwrap_or(""),
                "received event"
            );

            self.route_event(event).await;
        }
    }

    /// Routes one inbound event. `seq_opened` and errors correlated to a
    /// pending open are keyed by cid because no sequence exists yet; every
    /// other event is keyed by sequence id.
    async fn route_event(&self, event: Event) {
        match &event {
            Event::SeqOpened { cid, .. } => {
                if let Some(waiter) = self.remove_pending(cid) {
                    let _ = waiter.send(event);
                }
                return;
            }
            Event::Error { cid: Some(cid), .. } if !cid.is_empty() => {
                if let Some(waiter) = self.remove_pending(cid) {
                    let _ = waiter.send(event);
                    return;
                }
            }
            _ => {}
        }

        let Some(seq_id) = event.seq_id().map(str::to_string) else {
            return;
        };
        let seq = {
            let shared = self.shared.read().expect("client lock");
            shared.seqs.get(&seq_id).cloned()
        };
        if let Some(seq) = seq {
            seq.handle_event(event).await;
        }
    }
}
