//! TaskProcessor - polling loop that feeds messages to agents.
//!
//! # Flow
//! 1. Messages published on the bus to a registered agent land in the inbox
//! 2. Each poll tick promotes due delayed messages, then turns pending build
//!    jobs and submitted tasks into messages
//! 3. Every message is routed to its agent, one at a time
//! 4. An agent's reply is published back onto the bus (or parked until its
//!    `deliver_at`)
//!
//! The loop runs on its own tokio task; `ProcessorHandle` stops it.

use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::agents::payload::{BuildComponent, Payload, TaskSubmitted};
use crate::agents::{AgentContext, AgentRegistry, BUILDER, COORDINATOR, PROCESSOR};
use crate::app::config::ProcessorConfig;
use crate::app::status::Heartbeat;
use crate::app::subscription::Subscription;
use crate::domain::{AgentError, AgentMessage, BuildJobStatus, TaskId, TaskState};

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("no agent registered under '{0}'")]
    UnknownAgent(String),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error("agent task aborted: {0}")]
    Join(String),
}

/// Message parked until its `deliver_at`.
///
/// `published` messages already went over the bus (taps saw them) and are
/// routed directly when due; the others are published then.
#[derive(Debug)]
struct ScheduledMessage {
    deliver_at: DateTime<Utc>,
    seq: u64,
    message: AgentMessage,
    published: bool,
}

impl PartialEq for ScheduledMessage {
    fn eq(&self, other: &Self) -> bool {
        self.deliver_at == other.deliver_at && self.seq == other.seq
    }
}

impl Eq for ScheduledMessage {}

impl PartialOrd for ScheduledMessage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledMessage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so the BinaryHeap pops the earliest (then oldest) first.
        other
            .deliver_at
            .cmp(&self.deliver_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct TaskProcessor {
    ctx: Arc<AgentContext>,
    registry: Arc<AgentRegistry>,
    scheduled: BinaryHeap<ScheduledMessage>,
    next_seq: u64,
    heartbeat: watch::Sender<Heartbeat>,
}

impl TaskProcessor {
    pub fn new(ctx: Arc<AgentContext>, registry: Arc<AgentRegistry>) -> Self {
        let (heartbeat, _) = watch::channel(Heartbeat::default());
        Self {
            ctx,
            registry,
            scheduled: BinaryHeap::new(),
            next_seq: 0,
            heartbeat,
        }
    }

    /// Subscribe the inbox to every registered agent and start the loop.
    pub fn spawn(self, config: ProcessorConfig) -> ProcessorHandle {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let subscriptions = self
            .registry
            .names()
            .into_iter()
            .map(|name| {
                let tx = inbox_tx.clone();
                self.ctx.bus.subscribe_to_agent_messages(&name, move |message| {
                    // closed only after shutdown, when nothing is routed anymore
                    let _ = tx.send(message.clone());
                })
            })
            .collect();
        drop(inbox_tx);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let heartbeat = self.heartbeat.subscribe();
        info!(agents = ?self.registry.names(), ?config, "task processor starting");
        let join = tokio::spawn(self.run(config, inbox_rx, shutdown_rx));

        ProcessorHandle {
            shutdown_tx,
            join: tokio::sync::Mutex::new(Some(join)),
            subscriptions: Mutex::new(subscriptions),
            heartbeat,
        }
    }

    async fn run(
        mut self,
        config: ProcessorConfig,
        mut inbox: mpsc::UnboundedReceiver<AgentMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        if !config.start_immediately && !config.startup_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(config.startup_delay) => {}
                _ = shutdown_rx.changed() => {}
            }
        }

        let mut poll = tokio::time::interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(message) = inbox.recv() => self.accept(message).await,
                _ = poll.tick() => self.tick().await,
                _ = heartbeat.tick() => self.beat(),
            }
        }
        info!(beats = self.heartbeat.borrow().beats, "task processor stopped");
    }

    /// Inbox entry: route now, or park until due.
    async fn accept(&mut self, message: AgentMessage) {
        if message.is_due(Utc::now()) {
            self.handle(message).await;
        } else {
            self.schedule(message, true);
        }
    }

    /// One poll cycle.
    pub async fn tick(&mut self) {
        self.promote_due().await;

        if self.registry.get(BUILDER).is_some() {
            match self.ctx.build_jobs.list_by_status(BuildJobStatus::Pending).await {
                Ok(jobs) => {
                    for job in jobs {
                        let task_id = job.task_id.clone().unwrap_or_else(|| TaskId::new(job.project_id.as_str()));
                        let request = BuildComponent { job_id: job.id };
                        match request.message(PROCESSOR, BUILDER, task_id) {
                            Ok(message) => self.poll_message(message).await,
                            Err(e) => warn!(job_id = %job.id, error = %e, "failed to encode build request"),
                        }
                    }
                }
                Err(e) => warn!(error = %e, "listing pending build jobs failed"),
            }
        }

        if self.registry.get(COORDINATOR).is_some() {
            match self.ctx.tasks.list_tasks_in_state(TaskState::Submitted).await {
                Ok(tasks) => {
                    for task in tasks {
                        let submitted = TaskSubmitted {};
                        match submitted.message(PROCESSOR, COORDINATOR, task.task_id.clone()) {
                            Ok(message) => self.poll_message(message).await,
                            Err(e) => warn!(task_id = %task.task_id, error = %e, "failed to encode submission"),
                        }
                    }
                }
                Err(e) => warn!(error = %e, "listing submitted tasks failed"),
            }
        }
    }

    /// Messages the poll produces go straight to their agent; taps still see
    /// them.
    async fn poll_message(&mut self, message: AgentMessage) {
        self.ctx.bus.observe(&message);
        self.handle(message).await;
    }

    async fn promote_due(&mut self) {
        let now = Utc::now();
        while self.scheduled.peek().is_some_and(|s| s.deliver_at <= now) {
            let Some(entry) = self.scheduled.pop() else { break };
            debug!(message_id = %entry.message.id, recipient = %entry.message.recipient, "delayed message due");
            if entry.published {
                self.handle(entry.message).await;
            } else {
                self.ctx.bus.publish(&entry.message);
            }
        }
    }

    fn schedule(&mut self, message: AgentMessage, published: bool) {
        let deliver_at = message.deliver_at.unwrap_or_else(Utc::now);
        debug!(message_id = %message.id, recipient = %message.recipient, %deliver_at, "message delayed");
        self.scheduled.push(ScheduledMessage {
            deliver_at,
            seq: self.next_seq,
            message,
            published,
        });
        self.next_seq += 1;
    }

    async fn handle(&mut self, message: AgentMessage) {
        let (id, kind, recipient, task_id) = (
            message.id,
            message.message_type.clone(),
            message.recipient.clone(),
            message.task_id.clone(),
        );
        match self.route_message_to_agent(message).await {
            Ok(Some(reply)) => self.dispatch(reply),
            Ok(None) => {}
            Err(e) => warn!(
                message_id = %id,
                message_type = %kind,
                recipient = %recipient,
                task_id = %task_id,
                error = %e,
                "message processing failed"
            ),
        }
    }

    fn dispatch(&mut self, reply: AgentMessage) {
        if reply.is_due(Utc::now()) {
            self.ctx.bus.publish(&reply);
        } else {
            self.schedule(reply, false);
        }
    }

    /// Hand one message to its recipient and wait for the result.
    ///
    /// The agent runs on its own task so a panic surfaces as an error
    /// instead of taking the loop down.
    pub async fn route_message_to_agent(&self, message: AgentMessage) -> Result<Option<AgentMessage>, ProcessorError> {
        let agent = self
            .registry
            .get(&message.recipient)
            .ok_or_else(|| ProcessorError::UnknownAgent(message.recipient.clone()))?;
        debug!(
            message_id = %message.id,
            message_type = %message.message_type,
            recipient = %message.recipient,
            "routing message"
        );
        let reply = tokio::spawn(async move { agent.process_message(message).await })
            .await
            .map_err(|e| ProcessorError::Join(e.to_string()))??;
        Ok(reply)
    }

    fn beat(&self) {
        self.heartbeat.send_modify(|hb| hb.beat(Utc::now()));
    }
}

impl std::fmt::Debug for TaskProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskProcessor")
            .field("registry", &self.registry)
            .field("scheduled", &self.scheduled.len())
            .finish_non_exhaustive()
    }
}

/// Running processor. Dropping the handle also stops the loop, but only
/// `shutdown` waits for it.
pub struct ProcessorHandle {
    shutdown_tx: watch::Sender<bool>,
    join: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<Vec<Subscription>>,
    heartbeat: watch::Receiver<Heartbeat>,
}

impl ProcessorHandle {
    /// Stop polling, wait for the in-flight message, then drop the bus
    /// subscriptions. Safe to call more than once and from several tasks.
    pub async fn shutdown(&self) -> Result<(), ProcessorError> {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);

        let mut join = self.join.lock().await;
        let result = match join.take() {
            Some(handle) => {
                let started = Instant::now();
                let result = handle.await.map_err(|e| ProcessorError::Join(e.to_string()));
                debug!(elapsed = ?started.elapsed(), "task processor joined");
                result
            }
            None => Ok(()),
        };

        let subscriptions = std::mem::take(&mut *self.subscriptions.lock().unwrap_or_else(|p| p.into_inner()));
        drop(subscriptions);
        result
    }

    pub fn heartbeat(&self) -> watch::Receiver<Heartbeat> {
        self.heartbeat.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl std::fmt::Debug for ProcessorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorHandle")
            .field("shutdown_requested", &self.is_shutdown_requested())
            .field("heartbeat", &*self.heartbeat.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::agents::{Agent, STORAGE};
    use crate::app::{AppBuilder, ProcessorConfig};
    use crate::domain::ArtifactKind;

    struct Panicky;

    #[async_trait]
    impl Agent for Panicky {
        fn name(&self) -> &str {
            "Panicky"
        }

        async fn process_message(&self, _message: AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
            panic!("agent bug");
        }
    }

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Agent for Counter {
        fn name(&self) -> &str {
            "Counter"
        }

        async fn process_message(&self, _message: AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    async fn wait_for_state(app: &crate::app::App, task_id: &TaskId, state: TaskState) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if app.tasks().get_task_status(task_id).await.unwrap().state == state {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task reached expected state");
    }

    #[test]
    fn scheduled_messages_pop_earliest_first() {
        let now = Utc::now();
        let msg = |secs: i64, seq| ScheduledMessage {
            deliver_at: now + chrono::Duration::seconds(secs),
            seq,
            message: AgentMessage::new("x", "a", "b", TaskId::new("T1"), serde_json::Value::Null),
            published: false,
        };
        let mut heap = BinaryHeap::new();
        heap.push(msg(5, 0));
        heap.push(msg(1, 1));
        heap.push(msg(1, 2));
        heap.push(msg(3, 3));
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|s| s.seq)).collect();
        assert_eq!(order, vec![1, 2, 3, 0]);
    }

    #[tokio::test]
    async fn unknown_recipient_is_a_routing_error() {
        let app = AppBuilder::new().build().unwrap();
        let processor = TaskProcessor::new(app.context(), app.registry());
        let msg = AgentMessage::new("x", PROCESSOR, "Nobody", TaskId::new("T1"), serde_json::json!({}));
        let err = processor.route_message_to_agent(msg).await.unwrap_err();
        assert!(matches!(err, ProcessorError::UnknownAgent(name) if name == "Nobody"));
    }

    #[tokio::test]
    async fn agent_panic_is_reported_not_propagated() {
        let app = AppBuilder::new()
            .without_default_agents()
            .agent(|_| Arc::new(Panicky))
            .build()
            .unwrap();
        let processor = TaskProcessor::new(app.context(), app.registry());
        let msg = AgentMessage::new("x", PROCESSOR, "Panicky", TaskId::new("T1"), serde_json::json!({}));
        let err = processor.route_message_to_agent(msg).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Join(_)));
    }

    #[tokio::test]
    async fn submitted_task_runs_to_completion() {
        let app = AppBuilder::new().build().unwrap();
        let handle = app.init(ProcessorConfig::immediate());

        let snap = app.submit_task(None, "A bouncing ball for 3 seconds").await.unwrap();
        wait_for_state(&app, &snap.task_id, TaskState::Completed).await;

        let done = app.tasks().get_task_status(&snap.task_id).await.unwrap();
        let kinds: Vec<ArtifactKind> = done.artifacts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds.first(), Some(&ArtifactKind::ScenePlan));
        assert_eq!(kinds.last(), Some(&ArtifactKind::CompiledComponent));
        assert_eq!(done.message.unwrap().agent_name.as_deref(), Some(STORAGE));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn bus_messages_reach_the_inbox() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let app = AppBuilder::new()
            .without_default_agents()
            .agent(move |_| Arc::new(Counter(c)))
            .build()
            .unwrap();
        let handle = app.init(ProcessorConfig::immediate());

        let msg = AgentMessage::new("ping", "Api", "Counter", TaskId::new("T1"), serde_json::json!({}));
        assert!(app.bus().publish(&msg).is_routed());

        tokio::time::timeout(Duration::from_secs(2), async {
            while count.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("message routed");
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn heartbeat_ticks_while_idle() {
        let app = AppBuilder::new().build().unwrap();
        let handle = app.init(ProcessorConfig::immediate());
        let mut hb = handle.heartbeat();

        tokio::time::timeout(Duration::from_secs(2), async {
            while hb.borrow_and_update().beats < 2 {
                hb.changed().await.unwrap();
            }
        })
        .await
        .expect("heartbeat advanced");
        assert!(hb.borrow().at.is_some());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_releases_subscriptions() {
        let app = AppBuilder::new().build().unwrap();
        let handle = app.init(ProcessorConfig::immediate());
        assert_eq!(app.bus().subscriber_count(BUILDER), 1);

        let (a, b) = tokio::join!(handle.shutdown(), handle.shutdown());
        a.unwrap();
        b.unwrap();
        handle.shutdown().await.unwrap();

        assert!(handle.is_shutdown_requested());
        assert_eq!(app.bus().subscriber_count(BUILDER), 0);
    }

    #[tokio::test]
    async fn startup_delay_is_cut_short_by_shutdown() {
        let app = AppBuilder::new().build().unwrap();
        let config = ProcessorConfig {
            start_immediately: false,
            startup_delay: Duration::from_secs(3600),
            ..ProcessorConfig::immediate()
        };
        let handle = app.init(config);
        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("shutdown did not wait for the startup delay")
            .unwrap();
    }
}
