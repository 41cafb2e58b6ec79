use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tether_core::{AgentMessage, Role, ToolResult};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle notifications emitted by the [`Orchestrator`](crate::Orchestrator).
///
/// Observers (UIs, loggers, transports) receive these in order through
/// [`Orchestrator::subscribe`](crate::Orchestrator::subscribe).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A run has started.
    AgentStart,

    /// A run has finished, successfully or not.
    AgentEnd {
        /// The full transcript at the end of the run.
        messages: Vec<AgentMessage>,
    },

    /// A new conversational turn is starting.
    TurnStart,

    /// A turn has finished.
    TurnEnd {
        /// The assistant message produced in this turn, if any.
        message: Option<AgentMessage>,
        /// Tool-result messages appended in this turn.
        tool_results: Vec<AgentMessage>,
        /// Backend finish reason, or the error that ended the run.
        stop_reason: Option<String>,
    },

    /// A message is about to be appended.
    MessageStart {
        /// Author of the upcoming message.
        role: Role,
    },

    /// A message has been appended to the transcript.
    MessageEnd {
        /// The appended message.
        message: AgentMessage,
    },

    /// A tool call is about to run.
    ToolExecutionStart {
        /// Id of the tool call.
        tool_call_id: String,
        /// Name of the tool.
        tool_name: String,
        /// Arguments supplied by the backend.
        arguments: serde_json::Value,
    },

    /// A running tool reported partial output.
    ToolExecutionUpdate {
        /// Id of the tool call.
        tool_call_id: String,
        /// Name of the tool.
        tool_name: String,
        /// Output reported so far.
        partial_result: ToolResult,
    },

    /// A tool call has finished.
    ToolExecutionEnd {
        /// Id of the tool call.
        tool_call_id: String,
        /// Name of the tool.
        tool_name: String,
        /// Final output, or the error text when `is_error` is set.
        result: ToolResult,
        /// Whether the tool failed or could not be found.
        is_error: bool,
    },
}

/// Discriminant of an [`AgentEvent`], handy for filtering and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum EventKind {
    AgentStart,
    AgentEnd,
    TurnStart,
    TurnEnd,
    MessageStart,
    MessageEnd,
    ToolExecutionStart,
    ToolExecutionUpdate,
    ToolExecutionEnd,
}

impl AgentEvent {
    /// The event's kind.
    pub fn kind(&self) -> EventKind {
        match self {
            AgentEvent::AgentStart => EventKind::AgentStart,
            AgentEvent::AgentEnd { .. } => EventKind::AgentEnd,
            AgentEvent::TurnStart => EventKind::TurnStart,
            AgentEvent::TurnEnd { .. } => EventKind::TurnEnd,
            AgentEvent::MessageStart { .. } => EventKind::MessageStart,
            AgentEvent::MessageEnd { .. } => EventKind::MessageEnd,
            AgentEvent::ToolExecutionStart { .. } => EventKind::ToolExecutionStart,
            AgentEvent::ToolExecutionUpdate { .. } => EventKind::ToolExecutionUpdate,
            AgentEvent::ToolExecutionEnd { .. } => EventKind::ToolExecutionEnd,
        }
    }
}

struct BusShared {
    tx: Mutex<Option<mpsc::Sender<AgentEvent>>>,
    rx: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    closed: CancellationToken,
}

/// Bounded single-subscriber event queue.
///
/// Events are only queued once the receiver has been taken; before that
/// they are dropped so an unobserved run never blocks. With a subscriber,
/// a full queue makes the emitter wait.
#[derive(Clone)]
pub(crate) struct EventBus {
    shared: Arc<BusShared>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            shared: Arc::new(BusShared {
                tx: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Takes the receiving side. Only the first caller gets it.
    pub(crate) fn subscribe(&self) -> Option<ReceiverStream<AgentEvent>> {
        self.shared.rx.lock().take().map(ReceiverStream::new)
    }

    pub(crate) async fn emit(&self, event: AgentEvent) {
        let tx = {
            let unsubscribed = self.shared.rx.lock().is_some();
            let tx = self.shared.tx.lock().clone();
            match tx {
                Some(tx) if !unsubscribed => tx,
                _ => return,
            }
        };

        tokio::select! {
            _ = self.shared.closed.cancelled() => {}
            sent = tx.send(event) => {
                if sent.is_err() {
                    debug!("Event subscriber dropped, discarding event");
                }
            }
        }
    }

    /// Ends the stream and wakes any emitter blocked on a full queue.
    pub(crate) fn close(&self) {
        self.shared.tx.lock().take();
        self.shared.closed.cancel();
    }
}
