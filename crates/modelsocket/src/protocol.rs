//! Wire protocol types for ModelSocket.
//!
//! Frames are UTF-8 JSON objects carried over WebSocket text messages using
//! the `modelsocket.v0` subprotocol. Outbound frames use the [`Request`]
//! envelope; inbound frames parse into the [`Event`] enum keyed on the
//! `event` field. Unknown event kinds parse into [`Event::Unknown`] and are
//! dropped during routing rather than failing the connection.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a sequence as reported by `seq_state` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeqState {
    Ready,
    Appending,
    Generating,
    ToolCall,
    Forking,
    Closed,
}

impl SeqState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeqState::Ready => "ready",
            SeqState::Appending => "appending",
            SeqState::Generating => "generating",
            SeqState::ToolCall => "tool_call",
            SeqState::Forking => "forking",
            SeqState::Closed => "closed",
        }
    }
}

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Outbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    pub request: String,
    pub cid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq_id: Option<String>,
    pub data: RequestData,
}

/// Payload of a request, shaped by the request kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestData {
    Open(SeqOpenData),
    Command(CommandData),
}

/// Data for a `seq_open` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SeqOpenData {
    pub model: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub tools_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_prelude: bool,
}

/// Data for an `append` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SeqAppendData {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub echo: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
}

/// Sampling parameters for a `gen` command. Absent fields take server
/// defaults; a missing field is not the same as a zero value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SeqGenData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_strings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex_mask: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefill_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_tokens: Option<bool>,
}

/// Result of one tool invocation, sent back via `tool_return`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolResult {
    pub name: String,
    pub result: String,
}

/// Payload of a `seq_command` request, tagged by the `command` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandData {
    Append(SeqAppendData),
    Gen(SeqGenData),
    Close {},
    Fork {},
    ToolReturn {
        results: Vec<ToolResult>,
        gen_opts: SeqGenData,
    },
}

impl Request {
    pub fn seq_open(cid: impl Into<String>, data: SeqOpenData) -> Self {
        Self {
            request: "seq_open".to_string(),
            cid: cid.into(),
            seq_id: None,
            data: RequestData::Open(data),
        }
    }

    pub fn append(cid: impl Into<String>, seq_id: impl Into<String>, data: SeqAppendData) -> Self {
        Self::command(cid, seq_id, CommandData::Append(data))
    }

    pub fn gen(cid: impl Into<String>, seq_id: impl Into<String>, data: SeqGenData) -> Self {
        Self::command(cid, seq_id, CommandData::Gen(data))
    }

    pub fn close(cid: impl Into<String>, seq_id: impl Into<String>) -> Self {
        Self::command(cid, seq_id, CommandData::Close {})
    }

    pub fn fork(cid: impl Into<String>, seq_id: impl Into<String>) -> Self {
        Self::command(cid, seq_id, CommandData::Fork {})
    }

    pub fn tool_return(
        cid: impl Into<String>,
        seq_id: impl Into<String>,
        results: Vec<ToolResult>,
        gen_opts: SeqGenData,
    ) -> Self {
        Self::command(cid, seq_id, CommandData::ToolReturn { results, gen_opts })
    }

    fn command(cid: impl Into<String>, seq_id: impl Into<String>, data: CommandData) -> Self {
        Self {
            request: "seq_command".to_string(),
            cid: cid.into(),
            seq_id: Some(seq_id.into()),
            data: RequestData::Command(data),
        }
    }
}

/// A tool invocation as it appears on the wire in `seq_tool_call` events.
/// `args` is an opaque JSON string interpreted by the tool itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeqToolCall {
    pub name: String,
    pub args: String,
}

/// Inbound event envelope, tagged by the `event` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    SeqOpened {
        cid: String,
        seq_id: String,
    },
    SeqText {
        seq_id: String,
        #[serde(default)]
        cid: String,
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "is_false")]
        hidden: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tokens: Vec<u32>,
    },
    SeqToolCall {
        seq_id: String,
        #[serde(default)]
        cid: String,
        #[serde(default)]
        tool_calls: Vec<SeqToolCall>,
    },
    SeqAppendFinish {
        seq_id: String,
        cid: String,
    },
    SeqGenFinish {
        seq_id: String,
        cid: String,
        #[serde(default)]
        input_tokens: u64,
        #[serde(default)]
        output_tokens: u64,
        #[serde(default)]
        duration_ms: u64,
    },
    SeqForkFinish {
        seq_id: String,
        cid: String,
        child_seq_id: String,
    },
    SeqState {
        seq_id: String,
        state: SeqState,
    },
    SeqClosed {
        seq_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seq_id: Option<String>,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

impl Event {
    /// Wire name of the event kind, for logging and hooks.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::SeqOpened { .. } => "seq_opened",
            Event::SeqText { .. } => "seq_text",
            Event::SeqToolCall { .. } => "seq_tool_call",
            Event::SeqAppendFinish { .. } => "seq_append_finish",
            Event::SeqGenFinish { .. } => "seq_gen_finish",
            Event::SeqForkFinish { .. } => "seq_fork_finish",
            Event::SeqState { .. } => "seq_state",
            Event::SeqClosed { .. } => "seq_closed",
            Event::Error { .. } => "error",
            Event::Unknown => "unknown",
        }
    }

    /// The sequence the event targets, when it names one.
    pub fn seq_id(&self) -> Option<&str> {
        let seq_id = match self {
            Event::SeqOpened { seq_id, .. }
            | Event::SeqText { seq_id, .. }
            | Event::SeqToolCall { seq_id, .. }
            | Event::SeqAppendFinish { seq_id, .. }
            | Event::SeqGenFinish { seq_id, .. }
            | Event::SeqForkFinish { seq_id, .. }
            | Event::SeqState { seq_id, .. }
            | Event::SeqClosed { seq_id, .. } => Some(seq_id.as_str()),
            Event::Error { seq_id, .. } => seq_id.as_deref(),
            Event::Unknown => None,
        };
        seq_id.filter(|seq_id| !seq_id.is_empty())
    }

    /// The command id the event correlates to, when it carries one.
    pub fn cid(&self) -> Option<&str> {
        let cid = match self {
            Event::SeqOpened { cid, .. }
            | Event::SeqText { cid, .. }
            | Event::SeqToolCall { cid, .. }
            | Event::SeqAppendFinish { cid, .. }
            | Event::SeqGenFinish { cid, .. }
            | Event::SeqForkFinish { cid, .. } => Some(cid.as_str()),
            Event::SeqClosed { cid, .. } | Event::Error { cid, .. } => cid.as_deref(),
            Event::SeqState { .. } | Event::Unknown => None,
        };
        cid.filter(|cid| !cid.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        CommandData, Event, Request, RequestData, Role, SeqAppendData, SeqGenData, SeqOpenData,
        SeqState, ToolResult,
    };

    #[test]
    fn seq_open_request_serializes_expected_shape() {
        let request = Request::seq_open(
            "cid-1",
            SeqOpenData {
                model: "meta/llama3.1-8b".to_string(),
                tools_enabled: true,
                tool_prompt: None,
                skip_prelude: true,
            },
        );

        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(
            value,
            json!({
                "request": "seq_open",
                "cid": "cid-1",
                "data": {
                    "model": "meta/llama3.1-8b",
                    "tools_enabled": true,
                    "skip_prelude": true,
                }
            })
        );
    }

    #[test]
    fn append_request_carries_command_tag_and_role() {
        let request = Request::append(
            "cid-2",
            "seq-1",
            SeqAppendData {
                text: "Hello!".to_string(),
                role: Some(Role::User),
                echo: false,
                hidden: false,
            },
        );

        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(
            value,
            json!({
                "request": "seq_command",
                "cid": "cid-2",
                "seq_id": "seq-1",
                "data": {
                    "command": "append",
                    "text": "Hello!",
                    "role": "user",
                }
            })
        );
    }

    #[test]
    fn gen_request_omits_absent_sampling_fields() {
        let request = Request::gen(
            "cid-3",
            "seq-1",
            SeqGenData {
                role: Some(Role::Assistant),
                max_tokens: Some(128),
                temperature: Some(0.7),
                ..SeqGenData::default()
            },
        );

        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(
            value["data"],
            json!({
                "command": "gen",
                "role": "assistant",
                "max_tokens": 128,
                "temperature": 0.7,
            })
        );
    }

    #[test]
    fn close_and_fork_requests_carry_only_the_command() {
        let close = serde_json::to_value(Request::close("cid-4", "seq-1")).expect("serialize");
        assert_eq!(close["data"], json!({ "command": "close" }));

        let fork = serde_json::to_value(Request::fork("cid-5", "seq-1")).expect("serialize");
        assert_eq!(fork["data"], json!({ "command": "fork" }));
    }

    #[test]
    fn tool_return_request_carries_results_and_gen_opts() {
        let request = Request::tool_return(
            "cid-6",
            "seq-1",
            vec![ToolResult {
                name: "get_weather".to_string(),
                result: "72F".to_string(),
            }],
            SeqGenData::default(),
        );

        let value = serde_json::to_value(&request).expect("serialize request");
        assert_eq!(
            value["data"],
            json!({
                "command": "tool_return",
                "results": [{ "name": "get_weather", "result": "72F" }],
                "gen_opts": {},
            })
        );
    }

    #[test]
    fn requests_round_trip_through_json() {
        let requests = vec![
            Request::seq_open(
                "cid-1",
                SeqOpenData {
                    model: "m".to_string(),
                    ..SeqOpenData::default()
                },
            ),
            Request::append(
                "cid-2",
                "seq-1",
                SeqAppendData {
                    text: "hi".to_string(),
                    role: Some(Role::System),
                    echo: true,
                    hidden: false,
                },
            ),
            Request::gen(
                "cid-3",
                "seq-1",
                SeqGenData {
                    top_k: Some(40),
                    seed: Some(-7),
                    stop_strings: vec!["\n".to_string()],
                    return_tokens: Some(true),
                    ..SeqGenData::default()
                },
            ),
            Request::close("cid-4", "seq-1"),
            Request::fork("cid-5", "seq-1"),
            Request::tool_return(
                "cid-6",
                "seq-1",
                vec![ToolResult {
                    name: "t".to_string(),
                    result: "r".to_string(),
                }],
                SeqGenData::default(),
            ),
        ];

        for request in requests {
            let encoded = serde_json::to_string(&request).expect("encode");
            let decoded: Request = serde_json::from_str(&encoded).expect("decode");
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn open_data_is_not_mistaken_for_command_data() {
        let encoded = r#"{"request":"seq_open","cid":"c","data":{"model":"m"}}"#;
        let decoded: Request = serde_json::from_str(encoded).expect("decode");
        assert!(matches!(decoded.data, RequestData::Open(_)));

        let encoded = r#"{"request":"seq_command","cid":"c","seq_id":"s","data":{"command":"close"}}"#;
        let decoded: Request = serde_json::from_str(encoded).expect("decode");
        assert!(matches!(
            decoded.data,
            RequestData::Command(CommandData::Close {})
        ));
    }

    #[test]
    fn parses_seq_text_event_with_optional_fields() {
        let event: Event = serde_json::from_str(
            r#"{"event":"seq_text","seq_id":"seq-1","text":"Hello ","tokens":[1,2]}"#,
        )
        .expect("parse event");

        assert_eq!(
            event,
            Event::SeqText {
                seq_id: "seq-1".to_string(),
                cid: String::new(),
                text: "Hello ".to_string(),
                hidden: false,
                tokens: vec![1, 2],
            }
        );
        assert_eq!(event.seq_id(), Some("seq-1"));
        assert_eq!(event.cid(), None);
    }

    #[test]
    fn parses_seq_gen_finish_with_token_counts() {
        let event: Event = serde_json::from_str(
            r#"{"event":"seq_gen_finish","seq_id":"s","cid":"c","input_tokens":10,"output_tokens":5,"duration_ms":120}"#,
        )
        .expect("parse event");

        assert_eq!(
            event,
            Event::SeqGenFinish {
                seq_id: "s".to_string(),
                cid: "c".to_string(),
                input_tokens: 10,
                output_tokens: 5,
                duration_ms: 120,
            }
        );
    }

    #[test]
    fn parses_seq_state_values() {
        for (raw, state) in [
            ("ready", SeqState::Ready),
            ("appending", SeqState::Appending),
            ("generating", SeqState::Generating),
            ("tool_call", SeqState::ToolCall),
            ("forking", SeqState::Forking),
            ("closed", SeqState::Closed),
        ] {
            let event: Event = serde_json::from_str(&format!(
                r#"{{"event":"seq_state","seq_id":"s","state":"{raw}"}}"#
            ))
            .expect("parse event");
            assert_eq!(
                event,
                Event::SeqState {
                    seq_id: "s".to_string(),
                    state,
                }
            );
            assert_eq!(state.as_str(), raw);
        }
    }

    #[test]
    fn unknown_event_kinds_parse_into_the_fallback() {
        let event: Event =
            serde_json::from_str(r#"{"event":"seq_telemetry","seq_id":"s","latency_ms":3}"#)
                .expect("parse event");
        assert_eq!(event, Event::Unknown);
        assert_eq!(event.seq_id(), None);
    }

    #[test]
    fn unknown_optional_fields_are_ignored() {
        let event: Event = serde_json::from_str(
            r#"{"event":"seq_opened","cid":"c","seq_id":"s","server_region":"us-east"}"#,
        )
        .expect("parse event");
        assert_eq!(
            event,
            Event::SeqOpened {
                cid: "c".to_string(),
                seq_id: "s".to_string(),
            }
        );
    }

    #[test]
    fn events_round_trip_through_json() {
        let events = vec![
            Event::SeqOpened {
                cid: "c".to_string(),
                seq_id: "s".to_string(),
            },
            Event::SeqText {
                seq_id: "s".to_string(),
                cid: "c".to_string(),
                text: "hi".to_string(),
                hidden: true,
                tokens: vec![7],
            },
            Event::SeqToolCall {
                seq_id: "s".to_string(),
                cid: "c".to_string(),
                tool_calls: vec![super::SeqToolCall {
                    name: "get_weather".to_string(),
                    args: r#"{"city":"NYC"}"#.to_string(),
                }],
            },
            Event::SeqAppendFinish {
                seq_id: "s".to_string(),
                cid: "c".to_string(),
            },
            Event::SeqForkFinish {
                seq_id: "s".to_string(),
                cid: "c".to_string(),
                child_seq_id: "s2".to_string(),
            },
            Event::SeqClosed {
                seq_id: "s".to_string(),
                cid: None,
                error: Some("overloaded".to_string()),
            },
            Event::Error {
                cid: Some("c".to_string()),
                seq_id: None,
                message: "model not found".to_string(),
            },
        ];

        for event in events {
            let encoded = serde_json::to_string(&event).expect("encode");
            let decoded: Event = serde_json::from_str(&encoded).expect("decode");
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn empty_cid_is_treated_as_absent() {
        let event = Event::SeqText {
            seq_id: "s".to_string(),
            cid: String::new(),
            text: String::new(),
            hidden: false,
            tokens: Vec::new(),
        };
        assert_eq!(event.cid(), None);

        let event = Event::Error {
            cid: Some(String::new()),
            seq_id: Some("s".to_string()),
            message: "m".to_string(),
        };
        assert_eq!(event.cid(), None);
        assert_eq!(event.seq_id(), Some("s"));
    }
}
