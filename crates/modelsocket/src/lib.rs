//! Rust client for the ModelSocket protocol.
//!
//! ModelSocket is a WebSocket-based protocol for driving Large Language
//! Model inference. One connection multiplexes many independent
//! conversation sequences; each sequence streams generated tokens, may emit
//! tool calls, can be forked into a sibling conversation, and closes
//! independently.
//!
//! # Thread safety
//!
//! [`Client`] and [`Seq`] handles are cheap to clone and safe to share
//! across tasks. Only one [`Seq::generate`] call can be active per sequence
//! at a time, and a [`GenStream`] is consumed by the single task that owns
//! it.
//!
//! # Basic usage
//!
//! ```no_run
//! use modelsocket::{AppendOptions, Client, ClientConfig, GenOptions, OpenOptions};
//!
//! # async fn run() -> Result<(), modelsocket::ModelSocketError> {
//! let client = Client::connect(
//!     "wss://models.example.com/ws",
//!     Some("api-key"),
//!     ClientConfig::default(),
//! )
//! .await?;
//!
//! let seq = client.open("meta/llama3.1-8b-instruct", OpenOptions::default()).await?;
//! seq.append("Hello!", AppendOptions::user()).await?;
//!
//! let mut stream = seq.generate(GenOptions::assistant()).await?;
//! while let Some(chunk) = stream.next().await? {
//!     print!("{}", chunk.text);
//! }
//!
//! seq.close().await?;
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Backpressure
//!
//! Generation chunks flow through a bounded buffer; when a consumer stops
//! reading, inbound events for that stream block the connection's receive
//! loop and accumulate in the transport instead of client memory. Read each
//! stream to its terminal outcome, or close the sequence or connection, and
//! drop abandoned streams promptly.
//!
//! # Observability
//!
//! [`ClientConfig::with_on_send`] and [`ClientConfig::with_on_receive`]
//! install synchronous hooks on the send path and the receive loop. The
//! hooks must not block. Wire-level logging is emitted via [`tracing`] at
//! debug level.

mod client;
mod error;
mod options;
mod protocol;
mod seq;
mod stream;
mod tools;
mod transport;

pub use client::Client;
pub use error::ModelSocketError;
pub use options::{
    AppendOptions, ClientConfig, GenOptions, OpenOptions, ReceiveHook, SendHook,
    DEFAULT_CHUNK_BUFFER,
};
pub use protocol::{
    CommandData, Event, Request, RequestData, Role, SeqAppendData, SeqGenData, SeqOpenData,
    SeqState, SeqToolCall, ToolResult,
};
pub use seq::Seq;
pub use stream::{ChunkStream, GenChunk, GenStream, ToolCall};
pub use tools::{FuncTool, Tool, ToolDefinition, ToolParameters, ToolProperty, Toolbox};
pub use transport::{DialOptions, Transport, WsTransport, DEFAULT_READ_LIMIT, SUBPROTOCOL};

#[cfg(test)]
mod tests;
