//! Run event decoding.
//!
//! The runtime streams raw Assistants events (`thread.run.*`,
//! `thread.run.step.*`, `thread.message.*`). The orchestrator consumes the
//! higher-level [`RunEvent`]s derived from them: text blocks with running
//! snapshots, tool calls with created/delta/done boundaries, and run status
//! changes.
//!
//! Derivation is done by [`EventAccumulator`], which tracks the open text
//! block and the open tool call the same way the official SDKs do. In
//! particular, every run status event closes the tool call that was open,
//! which is how a function call reaches `ToolCallDone` while the run sits in
//! `requires_action`.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde::Deserialize;

use super::{
    Annotation, CodeInterpreterCall, CodeInterpreterOutput, FileRef, FunctionCall, Run,
    TextContent, ToolCall, ToolCallKind,
};

/// Event stream of a single run (or run continuation).
pub type RunEventStream = Pin<Box<dyn Stream<Item = anyhow::Result<RunEvent>> + Send>>;

/// Events consumed by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// The run changed status (carries the full run object).
    RunStatus(Run),
    /// A new text block started.
    TextCreated,
    /// Text appended to the open block.
    TextDelta { delta: String, snapshot: String },
    /// The open text block is complete.
    TextDone(TextContent),
    /// The agent produced an image file.
    ImageFileDone(FileRef),
    ToolCallCreated(ToolCall),
    ToolCallDelta {
        delta: ToolCallDelta,
        snapshot: ToolCall,
    },
    ToolCallDone(ToolCall),
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────────────────

/// Incremental update to one tool call inside a run step.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<ToolCallKind>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
    #[serde(default)]
    pub code_interpreter: Option<CodeInterpreterDelta>,
    #[serde(default)]
    pub file_search: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CodeInterpreterDelta {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub outputs: Vec<CodeInterpreterOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStepDelta {
    pub delta: RunStepDeltaBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunStepDeltaBody {
    #[serde(default)]
    pub step_details: Option<StepDetailsDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepDetailsDelta {
    #[serde(default)]
    pub tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunStep {
    #[serde(default)]
    pub step_details: Option<StepDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepDetails {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMessage {
    #[serde(default)]
    pub content: Vec<MessageContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: TextContent },
    ImageFile { image_file: FileRef },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageDelta {
    pub delta: MessageDeltaBody,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default)]
    pub content: Vec<MessageContentDelta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageContentDelta {
    pub index: usize,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<TextDelta>,
    #[serde(default)]
    pub image_file: Option<FileRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TextDelta {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// One decoded SSE frame.
#[derive(Debug, Clone)]
pub enum WireEvent {
    Run(Run),
    StepDelta(RunStepDelta),
    StepCompleted(RunStep),
    MessageCreated,
    MessageDelta(MessageDelta),
    MessageCompleted(ThreadMessage),
    Error(String),
    Done,
    Other,
}

/// Decode one frame by its event name.
pub fn decode_wire_event(event: &str, data: &str) -> anyhow::Result<WireEvent> {
    if event == "done" || data == "[DONE]" {
        return Ok(WireEvent::Done);
    }

    let wire = match event {
        "error" => WireEvent::Error(error_message(data)),
        "thread.run.step.delta" => WireEvent::StepDelta(serde_json::from_str(data)?),
        "thread.run.step.completed" => WireEvent::StepCompleted(serde_json::from_str(data)?),
        e if e.starts_with("thread.run.step.") => WireEvent::Other,
        e if e.starts_with("thread.run.") => WireEvent::Run(serde_json::from_str(data)?),
        "thread.message.created" => WireEvent::MessageCreated,
        "thread.message.delta" => WireEvent::MessageDelta(serde_json::from_str(data)?),
        "thread.message.completed" => WireEvent::MessageCompleted(serde_json::from_str(data)?),
        _ => WireEvent::Other,
    };
    Ok(wire)
}

fn error_message(data: &str) -> String {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| data.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Accumulation
// ─────────────────────────────────────────────────────────────────────────────

/// Derives [`RunEvent`]s from wire events.
#[derive(Debug, Default)]
pub struct EventAccumulator {
    tool_call: Option<(usize, ToolCall)>,
    text: Option<(usize, TextContent)>,
}

impl EventAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one wire event; returns the run events it produces, in order.
    pub fn push(&mut self, event: WireEvent) -> Vec<RunEvent> {
        let mut out = Vec::new();
        match event {
            WireEvent::Run(run) => {
                out.push(RunEvent::RunStatus(run));
                if let Some((_, call)) = self.tool_call.take() {
                    out.push(RunEvent::ToolCallDone(call));
                }
            }
            WireEvent::StepDelta(step) => {
                let deltas = step
                    .delta
                    .step_details
                    .map(|d| d.tool_calls)
                    .unwrap_or_default();
                for delta in deltas {
                    self.merge_tool_call(delta, &mut out);
                }
            }
            WireEvent::StepCompleted(step) => {
                let Some(details) = step.step_details else {
                    return out;
                };
                if details.kind != "tool_calls" {
                    return out;
                }
                if let Some((_, snapshot)) = self.tool_call.take() {
                    let done = details
                        .tool_calls
                        .into_iter()
                        .find(|c| c.id == snapshot.id)
                        .unwrap_or(snapshot);
                    out.push(RunEvent::ToolCallDone(done));
                }
            }
            WireEvent::MessageCreated => self.text = None,
            WireEvent::MessageDelta(message) => {
                for part in message.delta.content {
                    self.merge_content(part, &mut out);
                }
            }
            WireEvent::MessageCompleted(message) => {
                if let Some((index, snapshot)) = self.text.take() {
                    let done = match message.content.into_iter().nth(index) {
                        Some(MessageContent::Text { text }) => text,
                        _ => snapshot,
                    };
                    out.push(RunEvent::TextDone(done));
                }
            }
            WireEvent::Error(_) | WireEvent::Done | WireEvent::Other => {}
        }
        out
    }

    fn merge_tool_call(&mut self, delta: ToolCallDelta, out: &mut Vec<RunEvent>) {
        let continues = matches!(&self.tool_call, Some((index, _)) if *index == delta.index);

        if continues {
            if let Some((_, snapshot)) = self.tool_call.as_mut() {
                apply_tool_call_delta(snapshot, &delta);
                out.push(RunEvent::ToolCallDelta {
                    delta,
                    snapshot: snapshot.clone(),
                });
            }
            return;
        }

        if let Some((_, previous)) = self.tool_call.take() {
            out.push(RunEvent::ToolCallDone(previous));
        }

        let mut snapshot = ToolCall {
            kind: delta.kind.unwrap_or_default(),
            ..ToolCall::default()
        };
        apply_tool_call_delta(&mut snapshot, &delta);
        out.push(RunEvent::ToolCallCreated(snapshot.clone()));
        out.push(RunEvent::ToolCallDelta {
            snapshot: snapshot.clone(),
            delta: delta.clone(),
        });
        self.tool_call = Some((delta.index, snapshot));
    }

    fn merge_content(&mut self, part: MessageContentDelta, out: &mut Vec<RunEvent>) {
        let continues = matches!(&self.text, Some((index, _)) if *index == part.index);
        if !continues {
            if let Some((_, previous)) = self.text.take() {
                out.push(RunEvent::TextDone(previous));
            }
        }

        match part.kind.as_str() {
            "text" => {
                if !continues {
                    out.push(RunEvent::TextCreated);
                }
                let snapshot = &mut self
                    .text
                    .get_or_insert_with(|| (part.index, TextContent::default()))
                    .1;
                if let Some(text) = part.text {
                    snapshot.annotations.extend(text.annotations);
                    let delta = text.value.unwrap_or_default();
                    if !delta.is_empty() {
                        snapshot.value.push_str(&delta);
                        out.push(RunEvent::TextDelta {
                            delta,
                            snapshot: snapshot.value.clone(),
                        });
                    }
                }
            }
            "image_file" => {
                if let Some(file) = part.image_file {
                    out.push(RunEvent::ImageFileDone(file));
                }
            }
            _ => {}
        }
    }
}

fn apply_tool_call_delta(snapshot: &mut ToolCall, delta: &ToolCallDelta) {
    if let Some(id) = delta.id.as_deref().filter(|id| !id.is_empty()) {
        snapshot.id = id.to_string();
    }
    if let Some(kind) = delta.kind {
        snapshot.kind = kind;
    }
    if let Some(f) = &delta.function {
        let function = snapshot.function.get_or_insert_with(FunctionCall::default);
        if let Some(name) = &f.name {
            function.name.push_str(name);
        }
        if let Some(arguments) = &f.arguments {
            function.arguments.push_str(arguments);
        }
        if f.output.is_some() {
            function.output.clone_from(&f.output);
        }
    }
    if let Some(ci) = &delta.code_interpreter {
        let call = snapshot
            .code_interpreter
            .get_or_insert_with(CodeInterpreterCall::default);
        if let Some(input) = &ci.input {
            call.input.push_str(input);
        }
        call.outputs.extend(ci.outputs.iter().cloned());
    }
    if delta.file_search.is_some() {
        snapshot.file_search.clone_from(&delta.file_search);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SSE decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Decode an SSE byte stream into run events.
///
/// An `error` frame ends the stream with an error; `done` ends it cleanly.
pub fn decode_sse<S, B, E>(byte_stream: S) -> RunEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    let out = async_stream::try_stream! {
        let mut buf = Vec::<u8>::new();
        let mut accumulator = EventAccumulator::new();

        futures::pin_mut!(byte_stream);
        'frames: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk?;
            buf.extend(chunk.as_ref().iter().filter(|b| **b != b'\r'));

            while let Some(pos) = find_double_newline(&buf) {
                let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                let text = String::from_utf8_lossy(&frame);
                let Some((event, data)) = parse_frame(&text) else {
                    continue;
                };

                match decode_wire_event(&event, &data)? {
                    WireEvent::Done => break 'frames,
                    WireEvent::Error(message) => {
                        Err::<(), _>(anyhow::anyhow!("agent runtime reported an error: {message}"))?;
                    }
                    wire => {
                        for run_event in accumulator.push(wire) {
                            yield run_event;
                        }
                    }
                }
            }
        }
    };

    Box::pin(out)
}

/// Split a frame into its event name and (joined) data lines.
fn parse_frame(text: &str) -> Option<(String, String)> {
    let mut event = String::new();
    let mut data: Vec<&str> = Vec::new();

    for line in text.lines() {
        if let Some(name) = line.strip_prefix("event:") {
            event = name.trim().to_string();
        } else if let Some(value) = line.strip_prefix("data:") {
            data.push(value.strip_prefix(' ').unwrap_or(value));
        }
    }

    if data.is_empty() {
        return None;
    }
    Some((event, data.join("\n")))
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::RunStatus;

    fn frame(event: &str, data: &serde_json::Value) -> String {
        format!("event: {event}\ndata: {data}\n\n")
    }

    fn run(status: &str, calls: &serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "id": "run_1", "thread_id": "thread_1", "status": status,
            "required_action": if calls.is_null() { serde_json::Value::Null } else {
                serde_json::json!({"type": "submit_tool_outputs", "submit_tool_outputs": {"tool_calls": calls}})
            }
        })
    }

    async fn collect(body: String) -> Vec<RunEvent> {
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = body
            .into_bytes()
            .chunks(7)
            .map(|c| Ok(c.to_vec()))
            .collect();
        decode_sse(futures::stream::iter(chunks))
            .map(|e| e.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_text_deltas_carry_snapshots() {
        let delta = |v: &str| serde_json::json!({"id": "msg_1", "delta": {"content": [
            {"index": 0, "type": "text", "text": {"value": v}}
        ]}});
        let body = [
            frame("thread.message.created", &serde_json::json!({"id": "msg_1"})),
            frame("thread.message.delta", &delta("Hello")),
            frame("thread.message.delta", &delta(" there")),
            frame("thread.message.completed", &serde_json::json!({"id": "msg_1", "content": [
                {"type": "text", "text": {"value": "Hello there", "annotations": []}}
            ]})),
            "event: done\ndata: [DONE]\n\n".to_string(),
        ]
        .concat();

        let events = collect(body).await;
        assert_eq!(events[0], RunEvent::TextCreated);
        assert_eq!(
            events[2],
            RunEvent::TextDelta {
                delta: " there".into(),
                snapshot: "Hello there".into()
            }
        );
        assert!(matches!(&events[3], RunEvent::TextDone(t) if t.value == "Hello there"));
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_run_status_closes_open_function_call() {
        let step = serde_json::json!({"id": "step_1", "delta": {"step_details": {
            "type": "tool_calls",
            "tool_calls": [{"index": 0, "id": "call_a", "type": "function",
                            "function": {"name": "ask_database", "arguments": ""}}]
        }}});
        let args = serde_json::json!({"id": "step_1", "delta": {"step_details": {
            "type": "tool_calls",
            "tool_calls": [{"index": 0, "function": {"arguments": "{\"query\":\"SELECT 1\"}"}}]
        }}});
        let calls = serde_json::json!([{"id": "call_a", "type": "function",
            "function": {"name": "ask_database", "arguments": "{\"query\":\"SELECT 1\"}"}}]);
        let body = [
            frame("thread.run.step.delta", &step),
            frame("thread.run.step.delta", &args),
            frame("thread.run.requires_action", &run("requires_action", &calls)),
        ]
        .concat();

        let events = collect(body).await;
        assert!(matches!(&events[0], RunEvent::ToolCallCreated(c) if c.id == "call_a"));
        assert!(matches!(&events[3], RunEvent::RunStatus(r) if r.status == RunStatus::RequiresAction));
        let RunEvent::ToolCallDone(done) = &events[4] else {
            panic!("expected tool call done, got {:?}", events[4]);
        };
        let function = done.function.as_ref().unwrap();
        assert_eq!(function.name, "ask_database");
        assert_eq!(function.arguments, "{\"query\":\"SELECT 1\"}");
    }

    #[tokio::test]
    async fn test_new_tool_index_closes_previous_call() {
        let step = serde_json::json!({"id": "step_1", "delta": {"step_details": {
            "type": "tool_calls",
            "tool_calls": [
                {"index": 0, "id": "call_a", "type": "code_interpreter", "code_interpreter": {"input": "print(1)"}},
                {"index": 1, "id": "call_b", "type": "code_interpreter", "code_interpreter": {"input": "print(2)"}}
            ]
        }}});
        let events = collect(frame("thread.run.step.delta", &step)).await;

        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                RunEvent::ToolCallCreated(_) => "created",
                RunEvent::ToolCallDelta { .. } => "delta",
                RunEvent::ToolCallDone(_) => "done",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["created", "delta", "done", "created", "delta"]);
    }

    #[tokio::test]
    async fn test_image_part_is_reported() {
        let delta = serde_json::json!({"id": "msg_1", "delta": {"content": [
            {"index": 0, "type": "image_file", "image_file": {"file_id": "file-img"}}
        ]}});
        let events = collect(frame("thread.message.delta", &delta)).await;
        assert_eq!(
            events,
            vec![RunEvent::ImageFileDone(FileRef {
                file_id: "file-img".into()
            })]
        );
    }

    #[tokio::test]
    async fn test_error_frame_fails_stream() {
        let body = frame(
            "error",
            &serde_json::json!({"error": {"message": "rate limited"}}),
        );
        let chunks = vec![Ok::<_, std::io::Error>(body.into_bytes())];
        let results: Vec<_> = decode_sse(futures::stream::iter(chunks)).collect().await;
        assert_eq!(results.len(), 1);
        let err = results[0].as_ref().unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_parse_frame_joins_data_lines() {
        let (event, data) = parse_frame("event: x\ndata: a\ndata: b\n\n").unwrap();
        assert_eq!(event, "x");
        assert_eq!(data, "a\nb");
        assert!(parse_frame(": keep-alive\n\n").is_none());
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        let wire = decode_wire_event("thread.created", "{}").unwrap();
        assert!(matches!(wire, WireEvent::Other));
        let wire = decode_wire_event("thread.run.step.created", "{}").unwrap();
        assert!(matches!(wire, WireEvent::Other));
    }
}
