//! Configuration and per-operation option builders.

use std::sync::Arc;

use crate::{
    protocol::{Event, Request, Role, SeqGenData},
    tools::Toolbox,
};

/// Default bound on a generation stream's chunk buffer.
pub const DEFAULT_CHUNK_BUFFER: usize = 100;

/// Observability hook invoked synchronously before each outbound request.
/// Must not block; offload expensive work to a queue you own.
pub type SendHook = Arc<dyn Fn(&Request) + Send + Sync>;

/// Observability hook invoked synchronously for each inbound event, on the
/// receive loop. Must not block.
pub type ReceiveHook = Arc<dyn Fn(&Event) + Send + Sync>;

/// Client-wide configuration.
#[derive(Clone)]
pub struct ClientConfig {
    pub on_send: Option<SendHook>,
    pub on_receive: Option<ReceiveHook>,
    /// Chunk buffer capacity for generation streams.
    pub chunk_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            on_send: None,
            on_receive: None,
            chunk_buffer: DEFAULT_CHUNK_BUFFER,
        }
    }
}

impl ClientConfig {
    pub fn with_on_send(mut self, hook: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.on_send = Some(Arc::new(hook));
        self
    }

    pub fn with_on_receive(mut self, hook: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.on_receive = Some(Arc::new(hook));
        self
    }

    pub fn with_chunk_buffer(mut self, capacity: usize) -> Self {
        self.chunk_buffer = capacity;
        self
    }
}

/// Options for opening a sequence.
#[derive(Clone, Default)]
pub struct OpenOptions {
    /// Skip the server's default prelude system prompt.
    pub skip_prelude: bool,
    /// Overrides the `tool_prompt` sent on the wire. Falls back to the
    /// toolbox's tool instructions when unset.
    pub tool_prompt: Option<String>,
    pub toolbox: Option<Arc<Toolbox>>,
}

impl OpenOptions {
    pub fn with_skip_prelude(mut self) -> Self {
        self.skip_prelude = true;
        self
    }

    pub fn with_tool_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.tool_prompt = Some(prompt.into());
        self
    }

    pub fn with_toolbox(mut self, toolbox: Arc<Toolbox>) -> Self {
        self.toolbox = Some(toolbox);
        self
    }
}

/// Options for appending text to a sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOptions {
    pub role: Option<Role>,
    /// Ask the server to re-emit the appended text as an event.
    pub echo: bool,
    pub hidden: bool,
}

impl AppendOptions {
    pub fn user() -> Self {
        Self::default().with_role(Role::User)
    }

    pub fn assistant() -> Self {
        Self::default().with_role(Role::Assistant)
    }

    pub fn system() -> Self {
        Self::default().with_role(Role::System)
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub fn with_hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Sampling options for a generation. Unset fields take server defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenOptions {
    pub role: Option<Role>,
    pub max_tokens: Option<u32>,
    /// Passthrough limit interpreted by the server.
    pub max_length: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub repeat_penalty: Option<f64>,
    pub seed: Option<i64>,
    pub stop_strings: Vec<String>,
    pub regex_mask: Option<String>,
    pub hidden: bool,
    pub prefill_text: Option<String>,
    pub return_tokens: Option<bool>,
}

impl GenOptions {
    pub fn user() -> Self {
        Self::default().with_role(Role::User)
    }

    pub fn assistant() -> Self {
        Self::default().with_role(Role::Assistant)
    }

    pub fn system() -> Self {
        Self::default().with_role(Role::System)
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f64) -> Self {
        self.top_p = Some(top_p);
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_repeat_penalty(mut self, repeat_penalty: f64) -> Self {
        self.repeat_penalty = Some(repeat_penalty);
        self
    }

    pub fn with_seed(mut self, seed: i64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_stop_strings(
        mut self,
        stop_strings: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.stop_strings = stop_strings.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_regex_mask(mut self, pattern: impl Into<String>) -> Self {
        self.regex_mask = Some(pattern.into());
        self
    }

    pub fn with_hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_prefill_text(mut self, text: impl Into<String>) -> Self {
        self.prefill_text = Some(text.into());
        self
    }

    pub fn with_return_tokens(mut self, return_tokens: bool) -> Self {
        self.return_tokens = Some(return_tokens);
        self
    }

    pub(crate) fn into_data(self) -> SeqGenData {
        SeqGenData {
            role: self.role,
            max_tokens: self.max_tokens,
            max_length: self.max_length,
            temperature: self.temperature,
            top_p: self.top_p,
            top_k: self.top_k,
            repeat_penalty: self.repeat_penalty,
            seed: self.seed,
            stop_strings: self.stop_strings,
            regex_mask: self.regex_mask,
            hidden: self.hidden,
            prefill_text: self.prefill_text,
            return_tokens: self.return_tokens,
        }
    }
}
