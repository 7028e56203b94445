//! StreamGateway - per-client event streams over a task's lifetime.
//!
//! A session goes `open -> streaming -> closed`:
//! - open: subscribe first, then snapshot, so nothing falls in between
//! - streaming: task updates newer than the snapshot and task-correlated bus
//!   messages, each with a fresh event id
//! - closed: on a terminal (or unknown) task, found by a periodic check, or
//!   when the client goes away
//!
//! Disposal runs exactly once whichever exit path gets there first.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::config::GatewayConfig;
use crate::app::message_bus::MessageBus;
use crate::app::subscription::Subscription;
use crate::app::task_manager::TaskManager;
use crate::domain::{
    AgentMessage, Artifact, MessageId, TaskChange, TaskError, TaskId, TaskSnapshot, TaskState, TaskUpdate,
};

#[derive(Debug, Error)]
pub enum OpenError {
    #[error("invalid task id: {0:?}")]
    InvalidTaskId(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Event body; serialized without a tag, the kind travels as the SSE
/// event name.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamEventKind {
    TaskStatusUpdate {
        task_id: TaskId,
        state: TaskState,
        message: Option<String>,
        #[serde(rename = "agentName", skip_serializing_if = "Option::is_none")]
        agent_name: Option<String>,
    },
    TaskArtifactUpdate {
        task_id: TaskId,
        artifact: Artifact,
    },
    AgentMessage {
        task_id: TaskId,
        message_id: MessageId,
        from: String,
        to: String,
        #[serde(rename = "type")]
        message_type: String,
        timestamp: DateTime<Utc>,
        payload: serde_json::Value,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    pub id: Uuid,
    pub kind: StreamEventKind,
}

impl StreamEvent {
    fn new(kind: StreamEventKind) -> Self {
        Self { id: Uuid::new_v4(), kind }
    }

    fn status(task_id: &TaskId, state: TaskState, message: Option<&crate::domain::StatusMessage>) -> Self {
        Self::new(StreamEventKind::TaskStatusUpdate {
            task_id: task_id.clone(),
            state,
            message: message.map(|m| m.text.clone()),
            agent_name: message.and_then(|m| m.agent_name.clone()),
        })
    }

    fn artifact(task_id: &TaskId, artifact: Artifact) -> Self {
        Self::new(StreamEventKind::TaskArtifactUpdate {
            task_id: task_id.clone(),
            artifact,
        })
    }

    fn from_update(update: TaskUpdate) -> Self {
        match update.change {
            TaskChange::Status { state, message } => Self::status(&update.task_id, state, message.as_ref()),
            TaskChange::Artifact { artifact } => Self::artifact(&update.task_id, artifact),
        }
    }

    fn from_message(message: AgentMessage) -> Self {
        Self::new(StreamEventKind::AgentMessage {
            task_id: message.task_id,
            message_id: message.id,
            from: message.sender,
            to: message.recipient,
            message_type: message.message_type,
            timestamp: message.timestamp,
            payload: message.payload,
        })
    }

    pub fn event_name(&self) -> &'static str {
        match self.kind {
            StreamEventKind::TaskStatusUpdate { .. } => "task_status_update",
            StreamEventKind::TaskArtifactUpdate { .. } => "task_artifact_update",
            StreamEventKind::AgentMessage { .. } => "agent_message",
        }
    }

    /// JSON `data:` payload.
    pub fn data(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.kind)
    }

    /// State carried by a status event.
    pub fn state(&self) -> Option<TaskState> {
        match self.kind {
            StreamEventKind::TaskStatusUpdate { state, .. } => Some(state),
            _ => None,
        }
    }
}

enum Inbound {
    Update(TaskUpdate),
    Message(AgentMessage),
}

/// Single disposal routine shared by the session and its supervisor.
struct Cleanup {
    task_id: TaskId,
    disposed: AtomicBool,
    subscriptions: Mutex<Vec<Subscription>>,
    open_sessions: Arc<AtomicUsize>,
}

impl Cleanup {
    /// Returns `true` only for the call that actually disposed.
    fn run(&self) -> bool {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(|p| p.into_inner()));
        drop(subscriptions);
        self.open_sessions.fetch_sub(1, Ordering::AcqRel);
        debug!(task_id = %self.task_id, "stream disposed");
        true
    }
}

#[derive(Clone)]
pub struct StreamGateway {
    tasks: Arc<TaskManager>,
    bus: Arc<MessageBus>,
    config: GatewayConfig,
    open_sessions: Arc<AtomicUsize>,
}

impl StreamGateway {
    pub fn new(tasks: Arc<TaskManager>, bus: Arc<MessageBus>, config: GatewayConfig) -> Self {
        Self {
            tasks,
            bus,
            config,
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::Acquire)
    }

    pub async fn open(&self, task_id: &TaskId) -> Result<StreamSession, OpenError> {
        if !task_id.is_valid() {
            return Err(OpenError::InvalidTaskId(task_id.as_str().to_string()));
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let updates_tx = raw_tx.clone();
        let updates = self.tasks.subscribe_to_task_updates(task_id, move |update| {
            let _ = updates_tx.send(Inbound::Update(update.clone()));
        });
        let messages = self.bus.subscribe_to_task_messages(task_id, move |message| {
            let _ = raw_tx.send(Inbound::Message(message.clone()));
        });
        self.open_sessions.fetch_add(1, Ordering::AcqRel);
        let cleanup = Arc::new(Cleanup {
            task_id: task_id.clone(),
            disposed: AtomicBool::new(false),
            subscriptions: Mutex::new(vec![updates, messages]),
            open_sessions: Arc::clone(&self.open_sessions),
        });

        let snapshot = match self.tasks.get_task_status(task_id).await {
            Ok(snapshot) if snapshot.is_unknown() => {
                cleanup.run();
                return Err(OpenError::NotFound(task_id.clone()));
            }
            Ok(snapshot) => snapshot,
            Err(e) => {
                cleanup.run();
                return Err(e.into());
            }
        };

        let mut initial = VecDeque::with_capacity(snapshot.artifacts.len() + 1);
        initial.push_back(StreamEvent::status(task_id, snapshot.state, snapshot.message.as_ref()));
        initial.extend(
            snapshot
                .artifacts
                .iter()
                .cloned()
                .map(|artifact| StreamEvent::artifact(task_id, artifact)),
        );

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor {
            task_id: task_id.clone(),
            tasks: Arc::clone(&self.tasks),
            seen_version: snapshot.version,
            raw_rx,
            out_tx,
        };
        tokio::spawn(supervisor.run(
            self.config.status_poll_interval,
            snapshot.state.ends_stream(),
            Arc::clone(&cleanup),
        ));
        info!(task_id = %task_id, state = %snapshot.state, version = snapshot.version, "stream opened");

        Ok(StreamSession {
            snapshot,
            initial,
            events: out_rx,
            cleanup,
        })
    }
}

impl std::fmt::Debug for StreamGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGateway")
            .field("config", &self.config)
            .field("open_sessions", &self.open_sessions())
            .finish()
    }
}

struct Supervisor {
    task_id: TaskId,
    tasks: Arc<TaskManager>,
    seen_version: u64,
    raw_rx: mpsc::UnboundedReceiver<Inbound>,
    out_tx: mpsc::UnboundedSender<StreamEvent>,
}

impl Supervisor {
    async fn run(mut self, poll_interval: std::time::Duration, already_ended: bool, cleanup: Arc<Cleanup>) {
        let mut poll = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ended = already_ended;
        while !ended {
            tokio::select! {
                biased;
                inbound = self.raw_rx.recv() => match inbound {
                    Some(inbound) => ended = self.forward(inbound),
                    None => break,
                },
                _ = self.out_tx.closed() => {
                    debug!(task_id = %self.task_id, "client went away");
                    break;
                }
                _ = poll.tick() => ended = self.check().await,
            }
        }
        if ended {
            self.drain();
        }
        cleanup.run();
    }

    /// Returns whether the stream should end.
    fn forward(&mut self, inbound: Inbound) -> bool {
        match inbound {
            Inbound::Update(update) => {
                if update.version <= self.seen_version {
                    return false;
                }
                self.seen_version = update.version;
                let ends = matches!(&update.change, TaskChange::Status { state, .. } if state.ends_stream());
                let _ = self.out_tx.send(StreamEvent::from_update(update));
                ends
            }
            Inbound::Message(message) => {
                let _ = self.out_tx.send(StreamEvent::from_message(message));
                false
            }
        }
    }

    async fn check(&mut self) -> bool {
        match self.tasks.get_task_status(&self.task_id).await {
            Ok(snapshot) if snapshot.state.ends_stream() => {
                self.drain();
                // The store can be ahead of the fan-out; emit the final state
                // from the snapshot when its update has not arrived.
                if snapshot.version > self.seen_version {
                    self.seen_version = snapshot.version;
                    let _ = self
                        .out_tx
                        .send(StreamEvent::status(&self.task_id, snapshot.state, snapshot.message.as_ref()));
                }
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "stream status check failed");
                false
            }
        }
    }

    fn drain(&mut self) {
        while let Ok(inbound) = self.raw_rx.try_recv() {
            self.forward(inbound);
        }
    }
}

/// One client's stream. Dropping it disposes the subscriptions.
pub struct StreamSession {
    snapshot: TaskSnapshot,
    initial: VecDeque<StreamEvent>,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cleanup: Arc<Cleanup>,
}

impl StreamSession {
    /// Snapshot taken when the stream opened.
    pub fn snapshot(&self) -> &TaskSnapshot {
        &self.snapshot
    }

    /// Next event, `None` once the stream is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if let Some(event) = self.initial.pop_front() {
            return Some(event);
        }
        self.events.recv().await
    }

    /// Close from the client side. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        self.events.close();
        self.cleanup.run()
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("task_id", &self.snapshot.task_id)
            .field("pending_initial", &self.initial.len())
            .finish_non_exhaustive()
    }
}
