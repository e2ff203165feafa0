use tracing::{debug, warn};

use crate::agent::AgentEvent;
use crate::error::StreamParseError;
use crate::relay::StreamRecord;
use crate::sse::{FrameBuffer, SseFrame};
use crate::timeline::{DisplayRecord, RecordId, Timeline};

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    /// The server sent an `error` record.
    Failed(String),
    /// The stream ended with neither `done` nor `error`.
    Truncated,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoldState {
    pub timeline: Timeline,
    open_assistant: Option<RecordId>,
    open_tool_call: Option<RecordId>,
}

impl FoldState {
    pub fn with_timeline(timeline: Timeline) -> Self {
        Self { timeline, ..Default::default() }
    }

    fn close_all(&mut self) {
        self.open_assistant = None;
        self.open_tool_call = None;
    }
}

#[derive(Debug)]
pub enum Step {
    Continue(FoldState),
    Finished(FoldState, Outcome),
}

pub fn step(mut state: FoldState, record: StreamRecord) -> Step {
    match record {
        StreamRecord::Token { token, .. } => {
            apply_event(&mut state, token);
            Step::Continue(state)
        }
        StreamRecord::Done => {
            state.close_all();
            Step::Finished(state, Outcome::Completed)
        }
        StreamRecord::Error { error } => {
            state.close_all();
            Step::Finished(state, Outcome::Failed(error))
        }
    }
}

fn apply_event(state: &mut FoldState, event: AgentEvent) {
    match event {
        AgentEvent::ToolResult { tool_name, content, status } => {
            state.close_all();
            state.timeline.push(DisplayRecord::ToolResult { tool_name, content, status });
        }
        AgentEvent::ToolCallStart { tool_name, arguments } => {
            if let Some(id) = state.open_assistant.take() {
                state.timeline.remove(id);
            }
            let id = state.timeline.push(DisplayRecord::ToolCall { tool_name, arguments });
            state.open_tool_call = Some(id);
        }
        AgentEvent::ToolCallArgumentDelta { fragment } => match state.open_tool_call {
            Some(id) => {
                state.timeline.append(id, &fragment);
            }
            None => debug!("argument fragment with no open tool call dropped"),
        },
        AgentEvent::TextDelta { content } => {
            let timeline = &mut state.timeline;
            let id = *state
                .open_assistant
                .get_or_insert_with(|| timeline.push(DisplayRecord::Assistant { content: String::new() }));
            state.timeline.append(id, &content.extract_text());
        }
        // terminal events travel as top-level records
        AgentEvent::Done | AgentEvent::Error { .. } => {}
    }
}

/// Decodes one complete fragment. `Ok(None)` for fragments without data,
/// such as keep-alive comments.
pub fn decode_fragment(raw: &[u8]) -> Result<Option<StreamRecord>, StreamParseError> {
    let text = std::str::from_utf8(raw)?;
    match SseFrame::parse(text).data {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

#[derive(Debug, Default)]
pub struct Reconstructor {
    frames: FrameBuffer,
    state: FoldState,
    outcome: Option<Outcome>,
}

impl Reconstructor {
    pub fn new(timeline: Timeline) -> Self {
        Self { state: FoldState::with_timeline(timeline), ..Default::default() }
    }

    /// Feeds one network chunk. Returns the number of records applied.
    pub fn feed(&mut self, chunk: &[u8]) -> usize {
        if self.outcome.is_some() {
            return 0;
        }
        let mut applied = 0;
        for raw in self.frames.push(chunk) {
            match decode_fragment(&raw) {
                Ok(Some(record)) => {
                    self.apply(record);
                    applied += 1;
                    if self.outcome.is_some() {
                        break;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, fragment = %String::from_utf8_lossy(&raw), "skipping stream record"),
            }
        }
        applied
    }

    fn apply(&mut self, record: StreamRecord) {
        let state = std::mem::take(&mut self.state);
        self.state = match step(state, record) {
            Step::Continue(state) => state,
            Step::Finished(state, outcome) => {
                self.outcome = Some(outcome);
                state
            }
        };
    }

    pub fn timeline(&self) -> &Timeline {
        &self.state.timeline
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// Ends the stream. Without a terminal record the run is `Truncated`.
    pub fn finish(self) -> (Timeline, Outcome) {
        if self.outcome.is_none() && !self.frames.remainder().is_empty() {
            debug!(bytes = self.frames.remainder().len(), "unterminated trailing fragment discarded");
        }
        (self.state.timeline, self.outcome.unwrap_or(Outcome::Truncated))
    }
}
