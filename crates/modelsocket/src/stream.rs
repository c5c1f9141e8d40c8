//! Backpressured streaming of generation output.
//!
//! A [`GenStream`] is the single-consumer side of one `gen` (or resumed
//! `tool_return`) command. The owning sequence pushes chunks into a bounded
//! buffer as events arrive; a full buffer blocks the connection's receive
//! loop until the consumer drains a slot or the stream terminates, so a slow
//! consumer backpressures the server instead of growing client memory.

use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ModelSocketError;

/// One chunk of generated output.
///
/// Text chunks carry `text` (and token ids when `return_tokens` was
/// requested); tool-call chunks carry `tool_calls` and nothing else.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenChunk {
    pub text: String,
    pub hidden: bool,
    pub tokens: Vec<u32>,
    pub tool_calls: Vec<ToolCall>,
}

/// A tool invocation requested by the model mid-generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub name: String,
    /// Raw JSON argument blob, interpreted by the tool.
    pub args: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Termination {
    Finished {
        input_tokens: u64,
        output_tokens: u64,
    },
    Aborted,
}

struct GenSharedState {
    sender: Option<mpsc::Sender<GenChunk>>,
    terminal: Option<Termination>,
}

/// Producer half of a generation stream, owned by the sequence router.
pub(crate) struct GenShared {
    cid: String,
    done: CancellationToken,
    state: Mutex<GenSharedState>,
}

impl GenShared {
    pub(crate) fn cid(&self) -> &str {
        &self.cid
    }

    /// Delivers one chunk to the consumer, blocking while the buffer is
    /// full. Returns without delivering once the stream has terminated or
    /// the consumer is gone.
    pub(crate) async fn push(&self, chunk: GenChunk) {
        let sender = {
            let state = self.state.lock().expect("stream lock");
            if state.terminal.is_some() {
                return;
            }
            state.sender.clone()
        };
        let Some(sender) = sender else {
            return;
        };
        tokio::select! {
            _ = self.done.cancelled() => {}
            _ = sender.send(chunk) => {}
        }
    }

    /// Terminal transition after `seq_gen_finish`.
    pub(crate) fn finish(&self, input_tokens: u64, output_tokens: u64) {
        self.terminate(Termination::Finished {
            input_tokens,
            output_tokens,
        });
    }

    /// Terminal transition after the owning sequence closed.
    pub(crate) fn abort(&self) {
        self.terminate(Termination::Aborted);
    }

    fn terminate(&self, terminal: Termination) {
        {
            let mut state = self.state.lock().expect("stream lock");
            if state.terminal.is_some() {
                return;
            }
            state.terminal = Some(terminal);
            state.sender = None;
        }
        self.done.cancel();
    }

    fn termination(&self) -> Option<Termination> {
        self.state.lock().expect("stream lock").terminal
    }
}

/// Streaming access to the output of one generation.
///
/// The stream must be read to its terminal outcome (or the sequence or
/// connection closed) for the generation to be considered settled; dropping
/// it early discards any chunks the server still emits for it.
pub struct GenStream {
    shared: Arc<GenShared>,
    chunks: mpsc::Receiver<GenChunk>,
}

impl std::fmt::Debug for GenStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenStream")
            .field("cid", &self.shared.cid())
            .finish()
    }
}

impl GenStream {
    pub(crate) fn new(cid: String, capacity: usize) -> (Self, Arc<GenShared>) {
        let (sender, chunks) = mpsc::channel(capacity.max(1));
        let shared = Arc::new(GenShared {
            cid,
            done: CancellationToken::new(),
            state: Mutex::new(GenSharedState {
                sender: Some(sender),
                terminal: None,
            }),
        });
        (
            Self {
                shared: Arc::clone(&shared),
                chunks,
            },
            shared,
        )
    }

    /// Returns the next chunk, `Ok(None)` once generation finished, or the
    /// terminal error once the sequence closed mid-generation. Buffered
    /// chunks drain before either terminal outcome. Cancel-safe: dropping
    /// the future consumes no chunk.
    pub async fn next(&mut self) -> Result<Option<GenChunk>, ModelSocketError> {
        match self.chunks.recv().await {
            Some(chunk) => Ok(Some(chunk)),
            None => match self.shared.termination() {
                Some(Termination::Aborted) => Err(ModelSocketError::SeqClosed),
                _ => Ok(None),
            },
        }
    }

    /// Consumes the stream into a [`futures_util::Stream`] of chunks.
    pub fn chunks(self) -> ChunkStream {
        ChunkStream {
            stream: self,
            done: false,
        }
    }

    /// Collects the remaining visible text, skipping hidden chunks.
    pub async fn text(&mut self) -> Result<String, ModelSocketError> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await? {
            if !chunk.hidden {
                text.push_str(&chunk.text);
            }
        }
        Ok(text)
    }

    /// Collects the remaining visible text and every token id. Tokens from
    /// hidden chunks are retained even though their text is skipped.
    pub async fn text_and_tokens(&mut self) -> Result<(String, Vec<u32>), ModelSocketError> {
        let mut text = String::new();
        let mut tokens = Vec::new();
        while let Some(chunk) = self.next().await? {
            if !chunk.hidden {
                text.push_str(&chunk.text);
            }
            tokens.extend_from_slice(&chunk.tokens);
        }
        Ok((text, tokens))
    }

    /// Prompt token count reported at finish. Zero until the stream has
    /// terminated.
    pub fn input_tokens(&self) -> u64 {
        match self.shared.termination() {
            Some(Termination::Finished { input_tokens, .. }) => input_tokens,
            _ => 0,
        }
    }

    /// Generated token count reported at finish. Zero until the stream has
    /// terminated.
    pub fn output_tokens(&self) -> u64 {
        match self.shared.termination() {
            Some(Termination::Finished { output_tokens, .. }) => output_tokens,
            _ => 0,
        }
    }
}

/// Finite, non-restartable stream view over a [`GenStream`].
pub struct ChunkStream {
    stream: GenStream,
    done: bool,
}

impl Stream for ChunkStream {
    type Item = Result<GenChunk, ModelSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.stream.chunks.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(None) => {
                self.done = true;
                match self.stream.shared.termination() {
                    Some(Termination::Aborted) => {
                        Poll::Ready(Some(Err(ModelSocketError::SeqClosed)))
                    }
                    _ => Poll::Ready(None),
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
