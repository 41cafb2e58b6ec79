use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tether_core::{AgentMessage, Tool, ToolDefinition};

/// External source of injected messages, polled by the orchestrator.
///
/// Must return promptly; it is called between backend calls and after
/// every tool call.
pub type MessageSource = Arc<dyn Fn() -> Vec<AgentMessage> + Send + Sync>;

/// Thread-safe FIFO of messages waiting to be injected into a run.
///
/// Cloning yields another handle to the same queue, so a handle can be
/// moved into another task and pushed to while a run is in progress.
#[derive(Debug, Clone, Default)]
pub struct MessageQueue {
    inner: Arc<Mutex<VecDeque<AgentMessage>>>,
}

impl MessageQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn push(&self, message: AgentMessage) {
        self.inner.lock().push_back(message);
    }

    /// Remove and return every queued message, oldest first.
    pub fn drain(&self) -> Vec<AgentMessage> {
        self.inner.lock().drain(..).collect()
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// A new, independent queue holding the same messages.
    fn detached(&self) -> Self {
        Self {
            inner: Arc::new(Mutex::new(self.inner.lock().clone())),
        }
    }
}

/// Everything one run operates on.
///
/// `messages` only ever grows during a run. Use [`Clone`] to seed a run
/// from a long-lived session without mutating it: the clone shares tool
/// instances but gets its own copy of the message queues.
pub struct AgentState {
    /// Conversation transcript.
    pub messages: Vec<AgentMessage>,
    /// Tools the backend may call.
    pub tools: Vec<Arc<dyn Tool>>,
    /// Names of skills whose full content should be in the system prompt.
    pub loaded_skills: Vec<String>,
    pub(crate) is_streaming: bool,
    pub(crate) pending_tool_calls: HashSet<String>,
    steering: MessageQueue,
    follow_up: MessageQueue,
}

impl AgentState {
    /// Empty state with no tools.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            tools: Vec::new(),
            loaded_skills: Vec::new(),
            is_streaming: false,
            pending_tool_calls: HashSet::new(),
            steering: MessageQueue::new(),
            follow_up: MessageQueue::new(),
        }
    }

    /// Seed the transcript.
    pub fn with_messages(mut self, messages: Vec<AgentMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Register a tool.
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Register a tool in place.
    pub fn add_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Look up a registered tool by name.
    pub fn find_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    /// Definitions advertised to the backend.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Whether a backend call is in flight.
    pub fn is_streaming(&self) -> bool {
        self.is_streaming
    }

    /// Ids of tool calls currently executing.
    pub fn pending_tool_calls(&self) -> &HashSet<String> {
        &self.pending_tool_calls
    }

    /// Handle to the steering queue.
    pub fn steering_queue(&self) -> MessageQueue {
        self.steering.clone()
    }

    /// Handle to the follow-up queue.
    pub fn follow_up_queue(&self) -> MessageQueue {
        self.follow_up.clone()
    }

    /// Queue a message that interrupts the current turn.
    pub fn steer(&self, message: AgentMessage) {
        self.steering.push(message);
    }

    /// Queue a message to be handled once the current turn settles.
    pub fn follow_up(&self, message: AgentMessage) {
        self.follow_up.push(message);
    }

    pub(crate) fn drain_steering(&self) -> Vec<AgentMessage> {
        self.steering.drain()
    }

    pub(crate) fn drain_follow_up(&self) -> Vec<AgentMessage> {
        self.follow_up.drain()
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for AgentState {
    fn clone(&self) -> Self {
        Self {
            messages: self.messages.clone(),
            tools: self.tools.clone(),
            loaded_skills: self.loaded_skills.clone(),
            is_streaming: self.is_streaming,
            pending_tool_calls: self.pending_tool_calls.clone(),
            steering: self.steering.detached(),
            follow_up: self.follow_up.detached(),
        }
    }
}

impl std::fmt::Debug for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentState")
            .field("messages", &self.messages.len())
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>(),
            )
            .field("loaded_skills", &self.loaded_skills)
            .field("is_streaming", &self.is_streaming)
            .field("pending_tool_calls", &self.pending_tool_calls)
            .field("steering", &self.steering.len())
            .field("follow_up", &self.follow_up.len())
            .finish()
    }
}
