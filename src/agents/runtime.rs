use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agents::capability::Capability;
use crate::agents::retry::retry_operation;
use crate::error::{AgentError, Result};
use crate::lifecycle::{AgentStateMachine, LifecycleEvent};
use crate::types::{
    AgentId, AgentMessage, AgentMetrics, AgentSnapshot, AgentStatus, Message, MessageId,
    StageResult,
};

struct AgentState {
    status: AgentStatus,
    metrics: AgentMetrics,
    in_flight: usize,
}

#[derive(Default)]
struct Inbox {
    queue: VecDeque<AgentMessage>,
    closed: bool,
}

/// A live agent: one capability plus the status, metrics, inbox and
/// background tasks the orchestrator tracks for it.
pub struct Agent {
    id: AgentId,
    capability: Box<dyn Capability>,
    state: Mutex<AgentState>,
    inbox: Mutex<Inbox>,
    inbox_ready: Notify,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Agent {
    pub fn new(capability: Box<dyn Capability>) -> Self {
        let agent = Self {
            id: AgentId::new_v4(),
            capability,
            state: Mutex::new(AgentState {
                status: AgentStatus::Idle,
                metrics: AgentMetrics::default(),
                in_flight: 0,
            }),
            inbox: Mutex::new(Inbox::default()),
            inbox_ready: Notify::new(),
            outbound: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        };
        info!(agent = agent.name(), agent_id = %agent.id, "Agent initialized");
        agent
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.capability.name()
    }

    pub fn agent_type(&self) -> &str {
        self.capability.agent_type()
    }

    pub fn status(&self) -> AgentStatus {
        lock(&self.state).status
    }

    pub fn is_offline(&self) -> bool {
        self.status() == AgentStatus::Offline
    }

    /// Runs the capability's startup hook and marks the agent ready. An agent
    /// that has been shut down cannot be started again.
    pub async fn startup(&self) -> Result<()> {
        if self.is_offline() {
            return Err(AgentError::Offline(self.name().to_string()));
        }
        self.capability.startup().await?;

        let mut state = lock(&self.state);
        if state.status == AgentStatus::Offline {
            return Err(AgentError::Offline(self.name().to_string()));
        }
        state.status = AgentStateMachine::transition(state.status, LifecycleEvent::Startup)?;
        info!(agent = self.name(), "Agent started");
        Ok(())
    }

    /// Cancels every background task, closes the inbox and goes offline.
    /// Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if state.status == AgentStatus::Offline {
                return Ok(());
            }
            state.status = AgentStateMachine::transition(state.status, LifecycleEvent::Shutdown)?;
        }

        lock(&self.inbox).closed = true;
        self.inbox_ready.notify_waiters();
        lock(&self.outbound).take();

        let tasks: Vec<_> = lock(&self.tasks).drain(..).collect();
        let mut cancelled = 0;
        for task in tasks {
            if !task.is_finished() {
                task.abort();
                cancelled += 1;
            }
        }

        info!(agent = self.name(), cancelled_tasks = cancelled, "Agent shutdown");
        self.capability.shutdown().await
    }

    pub fn validate_input(&self, data: &Value) -> bool {
        self.capability.validate_input(data)
    }

    /// Runs the capability on `data`.
    ///
    /// Fails with `Offline` after shutdown and with `Validation` when the input
    /// does not pass `validate_input`. The agent is `Busy` while any call is in
    /// flight and settles on `Idle` or `Error` when the last one returns.
    pub async fn process(&self, data: &Value) -> Result<StageResult> {
        let mut guard = self.begin_processing()?;
        let started = Instant::now();

        let result = match self.capability.check_input(data) {
            Ok(()) => self.capability.analyze(data).await,
            Err(problem) => Err(AgentError::Validation(format!("{}: {}", self.name(), problem))),
        };

        let elapsed = started.elapsed();
        self.record_processing(elapsed, result.is_ok());
        if let Some((memory_mb, cpu_pct)) = self.capability.resource_usage() {
            self.record_resource_usage(memory_mb, cpu_pct);
        }

        match result {
            Ok(mut stage) => {
                stage.duration_ms = elapsed.as_millis() as u64;
                guard.succeeded = true;
                debug!(agent = self.name(), duration_ms = stage.duration_ms, "Processing complete");
                Ok(stage)
            }
            Err(err) => {
                error!(agent = self.name(), error = %err, "Processing failed");
                Err(err)
            }
        }
    }

    fn begin_processing(&self) -> Result<InFlight<'_>> {
        let mut state = lock(&self.state);
        if state.status == AgentStatus::Offline {
            return Err(AgentError::Offline(self.name().to_string()));
        }
        state.status =
            AgentStateMachine::transition(state.status, LifecycleEvent::ProcessingStarted)?;
        state.in_flight += 1;
        Ok(InFlight {
            agent: self,
            succeeded: false,
        })
    }

    fn finish_processing(&self, succeeded: bool) {
        let mut state = lock(&self.state);
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight > 0 || state.status != AgentStatus::Busy {
            return;
        }

        let event = if succeeded {
            LifecycleEvent::ProcessingSucceeded
        } else {
            LifecycleEvent::ProcessingFailed
        };
        match AgentStateMachine::transition(state.status, event) {
            Ok(next) => state.status = next,
            Err(err) => debug!(agent = self.name(), error = %err, "Ignoring status change"),
        }
    }

    fn record_processing(&self, elapsed: Duration, succeeded: bool) {
        let mut state = lock(&self.state);
        state.metrics.last_processing_ms = elapsed.as_millis() as u64;
        state.metrics.processed_count += 1;
        if !succeeded {
            state.metrics.error_count += 1;
        }
    }

    fn record_resource_usage(&self, memory_usage_mb: f64, cpu_usage_pct: f64) {
        let mut state = lock(&self.state);
        state.metrics.memory_usage_mb = memory_usage_mb;
        state.metrics.cpu_usage_pct = cpu_usage_pct;
    }

    /// Connects the agent to the orchestrator queue so `send_message` can route.
    pub(crate) fn attach(&self, outbound: mpsc::UnboundedSender<Message>) {
        *lock(&self.outbound) = Some(outbound);
    }

    /// Sends `payload` to another agent through the orchestrator.
    pub async fn send_message(&self, target_agent: &str, payload: Value) -> Result<MessageId> {
        if lock(&self.inbox).closed {
            return Err(AgentError::ChannelClosed(format!("{} is shut down", self.name())));
        }

        let outbound = lock(&self.outbound).clone().ok_or_else(|| {
            AgentError::ChannelClosed(format!("{} is not attached to an orchestrator", self.name()))
        })?;

        let message = AgentMessage::new(self.name(), target_agent, payload);
        let message_id = message.id;
        outbound
            .send(Message::AgentCommunication(message))
            .map_err(|_| AgentError::ChannelClosed("orchestrator queue closed".to_string()))?;

        info!(agent = self.name(), target = target_agent, %message_id, "Sending message");
        Ok(message_id)
    }

    /// Enqueues a message on this agent's inbox.
    pub fn receive_message(&self, message: AgentMessage) -> Result<()> {
        let mut inbox = lock(&self.inbox);
        if inbox.closed {
            return Err(AgentError::ChannelClosed(format!("{} is shut down", self.name())));
        }
        info!(agent = self.name(), from = %message.from_agent, "Received message");
        inbox.queue.push_back(message);
        drop(inbox);
        self.inbox_ready.notify_one();
        Ok(())
    }

    /// Waits for the next inbox message. Fails once the inbox is closed and
    /// drained.
    pub async fn next_message(&self) -> Result<AgentMessage> {
        loop {
            let notified = self.inbox_ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.try_next_message()? {
                return Ok(message);
            }

            notified.await;
        }
    }

    /// Pops a queued message without waiting.
    pub fn try_next_message(&self) -> Result<Option<AgentMessage>> {
        let mut inbox = lock(&self.inbox);
        match inbox.queue.pop_front() {
            Some(message) => Ok(Some(message)),
            None if inbox.closed => Err(AgentError::ChannelClosed(format!(
                "{} inbox closed",
                self.name()
            ))),
            None => Ok(None),
        }
    }

    /// Runs `future` as a background task owned by this agent. `shutdown`
    /// aborts it if it is still running.
    pub fn spawn_task<F>(&self, future: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_offline() {
            return Err(AgentError::Offline(self.name().to_string()));
        }
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(tokio::spawn(future));
        Ok(())
    }

    /// Exponential-backoff retry for calls made on this agent's behalf.
    pub async fn retry_operation<T, F, Fut>(
        &self,
        op: F,
        max_retries: u32,
        base_delay: Duration,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let result = retry_operation(op, max_retries, base_delay).await;
        if let Err(err) = &result {
            warn!(agent = self.name(), error = %err, "Retried operation gave up");
        }
        result
    }

    /// Consistent read of identity, status, metrics and queue depth. Never
    /// waits on in-flight work.
    pub fn snapshot(&self) -> AgentSnapshot {
        let (status, metrics) = {
            let state = lock(&self.state);
            (state.status, state.metrics.clone())
        };
        let queue_size = lock(&self.inbox).queue.len();
        let active_tasks = lock(&self.tasks)
            .iter()
            .filter(|task| !task.is_finished())
            .count();

        AgentSnapshot {
            agent_id: self.id,
            agent_name: self.name().to_string(),
            agent_type: self.agent_type().to_string(),
            status,
            metrics,
            queue_size,
            active_tasks,
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

/// Settles the agent status when a `process` call ends, including when its
/// future is dropped before completion.
struct InFlight<'a> {
    agent: &'a Agent,
    succeeded: bool,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.agent.finish_processing(self.succeeded);
    }
}
