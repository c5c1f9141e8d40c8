//! Per-conversation sequence lifecycle and command correlation.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::{
    client::ClientInner,
    error::ModelSocketError,
    options::{AppendOptions, GenOptions},
    protocol::{Event, Request, SeqAppendData, SeqGenData, SeqState, ToolResult},
    stream::{GenChunk, GenShared, GenStream, ToolCall},
    tools::Toolbox,
};

/// An active conversation sequence on the server.
///
/// Handles are cheap to clone and safe to share across tasks, but only one
/// generation can be in flight per sequence at a time.
#[derive(Clone)]
pub struct Seq {
    pub(crate) inner: Arc<SeqInner>,
}

impl std::fmt::Debug for Seq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Seq").field("id", &self.inner.id).finish()
    }
}

pub(crate) struct SeqInner {
    client: Weak<ClientInner>,
    id: String,
    toolbox: Option<Arc<Toolbox>>,
    state: Mutex<SeqShared>,
    commands: Mutex<HashMap<String, oneshot::Sender<Event>>>,
}

struct SeqShared {
    state: SeqState,
    closed: bool,
    close_err: Option<String>,
    gen_stream: Option<Arc<GenShared>>,
}

/// Removes a registered command waiter when the issuing operation exits,
/// whether it completed, failed to send, or was dropped mid-wait.
struct CommandGuard<'a> {
    seq: &'a SeqInner,
    cid: &'a str,
}

impl Drop for CommandGuard<'_> {
    fn drop(&mut self) {
        self.seq
            .commands
            .lock()
            .expect("commands lock")
            .remove(self.cid);
    }
}

impl SeqInner {
    pub(crate) fn new(
        client: Weak<ClientInner>,
        id: String,
        toolbox: Option<Arc<Toolbox>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            id,
            toolbox,
            state: Mutex::new(SeqShared {
                state: SeqState::Ready,
                closed: false,
                close_err: None,
                gen_stream: None,
            }),
            commands: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    fn client(&self) -> Result<Arc<ClientInner>, ModelSocketError> {
        self.client.upgrade().ok_or(ModelSocketError::Closed)
    }

    fn ensure_open(&self) -> Result<(), ModelSocketError> {
        if self.state.lock().expect("state lock").closed {
            return Err(ModelSocketError::SeqClosed);
        }
        Ok(())
    }

    fn register_command(&self, cid: &str) -> oneshot::Receiver<Event> {
        let (sender, receiver) = oneshot::channel();
        self.commands
            .lock()
            .expect("commands lock")
            .insert(cid.to_string(), sender);
        receiver
    }

    /// Routes one inbound event for this sequence. Dispatch is field-driven:
    /// a single event may update state, feed the active stream, complete a
    /// command waiter, and trigger close propagation.
    pub(crate) async fn handle_event(&self, event: Event) {
        if let Event::SeqState { state, .. } = &event {
            self.state.lock().expect("state lock").state = *state;
        }

        if let Event::SeqText {
            text,
            hidden,
            tokens,
            ..
        } = &event
        {
            let stream = self.active_stream();
            if let Some(stream) = stream {
                stream
                    .push(GenChunk {
                        text: text.clone(),
                        hidden: *hidden,
                        tokens: tokens.clone(),
                        tool_calls: Vec::new(),
                    })
                    .await;
            }
        }

        if let Event::SeqToolCall { tool_calls, .. } = &event {
            let stream = self.active_stream();
            if let Some(stream) = stream {
                stream
                    .push(GenChunk {
                        tool_calls: tool_calls
                            .iter()
                            .map(|call| ToolCall {
                                name: call.name.clone(),
                                args: call.args.clone(),
                            })
                            .collect(),
                        ..GenChunk::default()
                    })
                    .await;
            }
        }

        if let Event::SeqGenFinish {
            cid,
            input_tokens,
            output_tokens,
            ..
        } = &event
        {
            // After a tool_return, the follow-up finish carries the original
            // gen cid; a finish with any other cid must not detach the
            // stream.
            let stream = {
                let mut state = self.state.lock().expect("state lock");
                let cid_matches = state
                    .gen_stream
                    .as_ref()
                    .is_some_and(|stream| stream.cid() == cid.as_str());
                if cid_matches {
                    state.gen_stream.take()
                } else {
                    None
                }
            };
            if let Some(stream) = stream {
                stream.finish(*input_tokens, *output_tokens);
            }
        }

        if let Some(cid) = event.cid() {
            let waiter = self.commands.lock().expect("commands lock").remove(cid);
            if let Some(waiter) = waiter {
                let _ = waiter.send(event.clone());
            }
        }

        if let Event::SeqClosed { error, .. } = &event {
            self.handle_close(error.clone());
        }
    }

    /// Close propagation, from a server `seq_closed` event or synthesized by
    /// connection teardown. Idempotent.
    pub(crate) fn handle_close(&self, error: Option<String>) {
        let stream = {
            let mut state = self.state.lock().expect("state lock");
            if state.closed {
                return;
            }
            state.closed = true;
            state.state = SeqState::Closed;
            if let Some(message) = error.filter(|message| !message.is_empty()) {
                state.close_err = Some(message);
            }
            state.gen_stream.take()
        };

        if let Some(stream) = stream {
            stream.abort();
        }

        if let Some(client) = self.client.upgrade() {
            client.remove_seq(&self.id);
        }
    }

    fn active_stream(&self) -> Option<Arc<GenShared>> {
        self.state.lock().expect("state lock").gen_stream.clone()
    }

    async fn await_command(
        &self,
        client: &Arc<ClientInner>,
        receiver: oneshot::Receiver<Event>,
    ) -> Result<Event, ModelSocketError> {
        tokio::select! {
            _ = client.scope().cancelled() => Err(ModelSocketError::Closed),
            received = receiver => received.map_err(|_| ModelSocketError::Closed),
        }
    }
}

impl Seq {
    /// Server-assigned sequence id.
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    /// Current lifecycle state as last reported by the server.
    pub fn state(&self) -> SeqState {
        self.inner.state.lock().expect("state lock").state
    }

    /// The toolbox this sequence was opened with, if any.
    pub fn toolbox(&self) -> Option<Arc<Toolbox>> {
        self.inner.toolbox.clone()
    }

    /// Server-reported reason the sequence closed, when it failed.
    pub fn close_error(&self) -> Option<ModelSocketError> {
        self.inner
            .state
            .lock()
            .expect("state lock")
            .close_err
            .as_ref()
            .map(|message| ModelSocketError::Seq {
                seq_id: self.inner.id.clone(),
                message: message.clone(),
            })
    }

    /// Appends text to the conversation and waits for the server to accept
    /// it.
    pub async fn append(
        &self,
        text: &str,
        options: AppendOptions,
    ) -> Result<(), ModelSocketError> {
        self.inner.ensure_open()?;
        let client = self.inner.client()?;

        let cid = Uuid::new_v4().to_string();
        let receiver = self.inner.register_command(&cid);
        let _guard = CommandGuard {
            seq: self.inner.as_ref(),
            cid: &cid,
        };

        let request = Request::append(
            cid.clone(),
            self.inner.id.clone(),
            SeqAppendData {
                text: text.to_string(),
                role: options.role,
                echo: options.echo,
                hidden: options.hidden,
            },
        );
        client.send(&request).await?;

        match self.inner.await_command(&client, receiver).await? {
            Event::Error {
                message,
                seq_id,
                cid,
            } => Err(ModelSocketError::Protocol {
                message,
                seq_id,
                cid,
            }),
            _ => Ok(()),
        }
    }

    /// Starts a generation and returns its stream. Chunks arrive
    /// asynchronously; the stream should be read to its terminal outcome.
    ///
    /// Only one generation can be active per sequence; starting a second one
    /// before the first stream terminates fails with
    /// [`ModelSocketError::InvalidState`].
    pub async fn generate(&self, options: GenOptions) -> Result<GenStream, ModelSocketError> {
        let client = self.inner.client()?;

        let cid = Uuid::new_v4().to_string();
        let (stream, shared) = GenStream::new(cid.clone(), client.chunk_capacity());
        {
            let mut state = self.inner.state.lock().expect("state lock");
            if state.closed {
                return Err(ModelSocketError::SeqClosed);
            }
            if state.gen_stream.is_some() {
                return Err(ModelSocketError::InvalidState);
            }
            state.gen_stream = Some(shared);
        }

        let request = Request::gen(cid, self.inner.id.clone(), options.into_data());
        if let Err(error) = client.send(&request).await {
            self.inner.state.lock().expect("state lock").gen_stream = None;
            return Err(error);
        }

        Ok(stream)
    }

    /// Forks the conversation history into a new sibling sequence sharing
    /// this sequence's toolbox.
    pub async fn fork(&self) -> Result<Seq, ModelSocketError> {
        self.inner.ensure_open()?;
        let client = self.inner.client()?;

        let cid = Uuid::new_v4().to_string();
        let receiver = self.inner.register_command(&cid);
        let _guard = CommandGuard {
            seq: self.inner.as_ref(),
            cid: &cid,
        };

        let request = Request::fork(cid.clone(), self.inner.id.clone());
        client.send(&request).await?;

        match self.inner.await_command(&client, receiver).await? {
            Event::Error {
                message,
                seq_id,
                cid,
            } => Err(ModelSocketError::Protocol {
                message,
                seq_id,
                cid,
            }),
            Event::SeqForkFinish { child_seq_id, .. } => {
                let child = SeqInner::new(
                    Weak::clone(&self.inner.client),
                    child_seq_id,
                    self.inner.toolbox.clone(),
                );
                client.register_seq(Arc::clone(&child));
                Ok(Seq { inner: child })
            }
            _ => Err(ModelSocketError::UnexpectedEvent),
        }
    }

    /// Closes the sequence. Returns ok when it is already closed.
    pub async fn close(&self) -> Result<(), ModelSocketError> {
        if self.inner.state.lock().expect("state lock").closed {
            return Ok(());
        }
        let client = self.inner.client()?;

        let cid = Uuid::new_v4().to_string();
        let receiver = self.inner.register_command(&cid);
        let _guard = CommandGuard {
            seq: self.inner.as_ref(),
            cid: &cid,
        };

        let request = Request::close(cid.clone(), self.inner.id.clone());
        client.send(&request).await?;

        match self.inner.await_command(&client, receiver).await? {
            Event::Error {
                message,
                seq_id,
                cid,
            } => Err(ModelSocketError::Protocol {
                message,
                seq_id,
                cid,
            }),
            _ => Ok(()),
        }
    }

    /// Sends tool results back to the model. Fire-and-forget: there is no
    /// correlated completion event; the follow-up output arrives on the
    /// current generation stream under the original `gen` command id.
    pub async fn tool_return(&self, results: Vec<ToolResult>) -> Result<(), ModelSocketError> {
        self.inner.ensure_open()?;
        let client = self.inner.client()?;

        let cid = Uuid::new_v4().to_string();
        let request = Request::tool_return(
            cid,
            self.inner.id.clone(),
            results,
            SeqGenData::default(),
        );
        client.send(&request).await
    }
}
