use axum::response::sse::Event;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::agent::{AgentEvent, AgentRun};

pub const INTERNAL_ERROR: &str = "Internal server error";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    Token {
        token: AgentEvent,
        #[serde(default)]
        metadata: RunMetadata,
    },
    Done,
    Error {
        error: String,
    },
}

impl StreamRecord {
    fn kind(&self) -> &'static str {
        match self {
            StreamRecord::Token { .. } => "token",
            StreamRecord::Done => "done",
            StreamRecord::Error { .. } => "error",
        }
    }
}

// Dropping the stream (client disconnect) cancels the run.
pub fn relay_records(run: AgentRun) -> impl Stream<Item = StreamRecord> + Send {
    let AgentRun { run_id, events, cancel, finished } = run;
    let guard = cancel.drop_guard();

    futures::stream::unfold(Some((events, finished, guard, 0u64)), move |state| async move {
        let (mut events, finished, guard, seq) = state?;
        let record = match events.recv().await {
            Some(AgentEvent::Done) => StreamRecord::Done,
            Some(AgentEvent::Error { message }) => {
                error!(%run_id, error = %message, "agent run failed while streaming");
                StreamRecord::Error { error: INTERNAL_ERROR.into() }
            }
            Some(token) => {
                let record = StreamRecord::Token { token, metadata: RunMetadata { run_id, seq } };
                return Some((record, Some((events, finished, guard, seq + 1))));
            }
            None => {
                match finished.await {
                    Err(e) if e.is_panic() => error!(%run_id, "agent run panicked"),
                    _ => warn!(%run_id, "agent run ended without a final event"),
                }
                StreamRecord::Error { error: INTERNAL_ERROR.into() }
            }
        };
        debug!(%run_id, records = seq + 1, kind = record.kind(), "run stream closing");
        Some((record, None))
    })
    .inspect(|record| {
        metrics::counter!("stream_records_total", "type" => record.kind()).increment(1);
    })
}

pub fn sse_events(run: AgentRun) -> impl Stream<Item = Result<Event, axum::Error>> + Send {
    relay_records(run).map(|record| Event::default().json_data(&record))
}
