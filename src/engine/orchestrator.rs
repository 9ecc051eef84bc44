use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::agents::{Agent, AgentFactory};
use crate::config::OrchestratorConfig;
use crate::engine::pipeline::PipelineExecutor;
use crate::engine::workflows::WorkflowTable;
use crate::error::{AgentError, Result};
use crate::storage::{ActivityLogger, PersistenceSink};
use crate::types::{
    AgentMessage, AgentStatusReport, Message, MessageId, PropertyData, UserId, WorkflowId,
    WorkflowSnapshot,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared by the orchestrator, its dispatch loop and every pipeline
/// executor.
pub struct OrchestratorContext {
    registry: OnceLock<HashMap<String, Arc<Agent>>>,
    workflows: WorkflowTable,
    activity: Arc<dyn ActivityLogger>,
    persistence: Arc<dyn PersistenceSink>,
    config: OrchestratorConfig,
    shutdown: watch::Sender<bool>,
    executors: Mutex<Vec<JoinHandle<()>>>,
}

impl OrchestratorContext {
    pub fn agent(&self, name: &str) -> Option<Arc<Agent>> {
        self.registry.get().and_then(|agents| agents.get(name)).cloned()
    }

    pub fn workflows(&self) -> &WorkflowTable {
        &self.workflows
    }

    pub fn activity(&self) -> &Arc<dyn ActivityLogger> {
        &self.activity
    }

    pub fn persistence(&self) -> &Arc<dyn PersistenceSink> {
        &self.persistence
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn agent_status(&self, name: Option<&str>) -> AgentStatusReport {
        let Some(agents) = self.registry.get() else {
            return match name {
                Some(name) => AgentStatusReport::NotFound {
                    agent_name: name.to_string(),
                },
                None => AgentStatusReport::All {
                    agents: BTreeMap::new(),
                },
            };
        };

        match name {
            Some(name) => match agents.get(name) {
                Some(agent) => AgentStatusReport::Single(agent.snapshot()),
                None => AgentStatusReport::NotFound {
                    agent_name: name.to_string(),
                },
            },
            None => AgentStatusReport::All {
                agents: agents
                    .iter()
                    .map(|(name, agent)| (name.clone(), agent.snapshot()))
                    .collect(),
            },
        }
    }

    fn dispatch(self: &Arc<Self>, message: Message) {
        debug!(kind = message.kind(), "Dispatching message");
        match message {
            Message::AnalysisRequest {
                workflow_id,
                property_data,
                user_id,
                submitted_at,
            } => {
                self.workflows.insert_running(workflow_id, user_id);
                info!(
                    %workflow_id,
                    user_id,
                    queued_ms = (Utc::now() - submitted_at).num_milliseconds(),
                    "Accepted analysis request"
                );

                let executor =
                    PipelineExecutor::new(self.clone(), workflow_id, user_id, property_data);
                let handle = tokio::spawn(executor.run());

                let mut executors = lock(&self.executors);
                executors.retain(|task| !task.is_finished());
                executors.push(handle);
            }
            Message::AgentCommunication(message) => match self.agent(&message.to_agent) {
                Some(agent) => {
                    let target = message.to_agent.clone();
                    if let Err(err) = agent.receive_message(message) {
                        warn!(target = %target, error = %err, "Dropping agent message");
                    }
                }
                None => warn!(
                    target = %message.to_agent,
                    from = %message.from_agent,
                    "Dropping message for unknown agent"
                ),
            },
            Message::StatusRequest { agent_name, reply } => {
                let report = self.agent_status(Some(&agent_name));
                if report.is_not_found() {
                    warn!(agent = %agent_name, "Status requested for unknown agent");
                } else {
                    info!(agent = %agent_name, "Status requested");
                }
                if let Some(reply) = reply {
                    if reply.send(report).is_err() {
                        debug!(agent = %agent_name, "Status requester went away");
                    }
                }
            }
        }
    }

    /// Closes the queue and empties it. Queued analysis requests are entered
    /// in the workflow table as failed so their ids stay queryable.
    fn drain_queue(&self, receiver: &mut mpsc::UnboundedReceiver<Message>) -> usize {
        receiver.close();
        let mut drained = 0;
        while let Ok(message) = receiver.try_recv() {
            drained += 1;
            match message {
                Message::AnalysisRequest {
                    workflow_id,
                    user_id,
                    ..
                } => {
                    self.workflows.insert_running(workflow_id, user_id);
                    if let Err(err) = self.workflows.fail(&workflow_id, &AgentError::Shutdown) {
                        warn!(%workflow_id, error = %err, "Could not fail queued workflow");
                    }
                    warn!(%workflow_id, user_id, "Failing queued analysis request at shutdown");
                }
                other => warn!(kind = other.kind(), "Dropping queued message at shutdown"),
            }
        }
        drained
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

/// Owns the agent registry and workflow table, runs the dispatch loop and
/// spawns one pipeline executor per accepted analysis request.
pub struct Orchestrator {
    context: Arc<OrchestratorContext>,
    factory: Box<dyn AgentFactory>,
    sender: mpsc::UnboundedSender<Message>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    phase: tokio::sync::Mutex<Phase>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        factory: impl AgentFactory + 'static,
        activity: Arc<dyn ActivityLogger>,
        persistence: Arc<dyn PersistenceSink>,
        config: OrchestratorConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        Self {
            context: Arc::new(OrchestratorContext {
                registry: OnceLock::new(),
                workflows: WorkflowTable::new(),
                activity,
                persistence,
                config,
                shutdown,
                executors: Mutex::new(Vec::new()),
            }),
            factory: Box::new(factory),
            sender,
            receiver: Mutex::new(Some(receiver)),
            phase: tokio::sync::Mutex::new(Phase::Created),
            dispatch: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<OrchestratorContext> {
        &self.context
    }

    /// Builds and starts every agent, then starts the dispatch loop. If any
    /// agent fails to start, every built agent is shut down, the registry stays
    /// empty and the error is returned.
    pub async fn startup(&self) -> Result<()> {
        let mut phase = self.phase.lock().await;
        match *phase {
            Phase::Running => return Ok(()),
            Phase::Stopped => return Err(AgentError::Shutdown),
            Phase::Created => {}
        }

        let agents = self.factory.build()?;
        for agent in &agents {
            if let Err(err) = agent.startup().await {
                error!(agent = agent.name(), error = %err, "Agent failed to start");
                for built in &agents {
                    if let Err(err) = built.shutdown().await {
                        warn!(agent = built.name(), error = %err, "Agent shutdown failed");
                    }
                }
                return Err(err);
            }
        }

        let mut registry = HashMap::with_capacity(agents.len());
        for agent in agents {
            agent.attach(self.sender.clone());
            registry.insert(agent.name().to_string(), Arc::new(agent));
        }
        let names: Vec<String> = registry.keys().cloned().collect();
        if self.context.registry.set(registry).is_err() {
            return Err(AgentError::InvalidStateTransition {
                from: "running".to_string(),
                to: "running".to_string(),
            });
        }

        let receiver = lock(&self.receiver)
            .take()
            .ok_or_else(|| AgentError::ChannelClosed("orchestrator queue already consumed".to_string()))?;
        let handle = tokio::spawn(dispatch_loop(
            self.context.clone(),
            receiver,
            self.context.shutdown_signal(),
        ));
        *lock(&self.dispatch) = Some(handle);
        *phase = Phase::Running;

        info!(agents = ?names, "Orchestrator started");
        Ok(())
    }

    /// Stops the dispatch loop and every agent, fails queued requests, gives
    /// running executors the configured grace period, aborts the rest and fails
    /// whatever workflow is still running. Idempotent.
    pub async fn shutdown(&self) -> Result<()> {
        let mut phase = self.phase.lock().await;
        if *phase == Phase::Stopped {
            return Ok(());
        }
        *phase = Phase::Stopped;
        self.context.shutdown.send_replace(true);

        let dispatch = lock(&self.dispatch).take();
        if let Some(handle) = dispatch {
            if let Err(err) = handle.await {
                warn!(error = %err, "Dispatch loop ended abnormally");
            }
        }
        let unstarted = lock(&self.receiver).take();
        if let Some(mut receiver) = unstarted {
            let drained = self.context.drain_queue(&mut receiver);
            debug!(drained, "Drained queue of an orchestrator that never started");
        }

        if let Some(agents) = self.context.registry.get() {
            for agent in agents.values() {
                if let Err(err) = agent.shutdown().await {
                    warn!(agent = agent.name(), error = %err, "Agent shutdown failed");
                }
            }
        }

        let mut executors: Vec<_> = lock(&self.context.executors).drain(..).collect();
        let grace = self.context.config.shutdown_grace();
        let drained = tokio::time::timeout(
            grace,
            futures::future::join_all(executors.iter_mut()),
        )
        .await
        .is_ok();
        if !drained {
            let mut aborted = 0;
            for executor in executors.iter().filter(|e| !e.is_finished()) {
                executor.abort();
                aborted += 1;
            }
            warn!(aborted, grace_ms = grace.as_millis() as u64, "Aborted pipeline executors");
        }

        let failed = self.context.workflows.fail_running(&AgentError::Shutdown);
        info!(failed_workflows = failed, "Orchestrator stopped");
        Ok(())
    }

    /// Queues an analysis request and returns its workflow id at once. The
    /// workflow becomes visible to `get_workflow_status` when the dispatch
    /// loop accepts the request.
    pub fn submit_analysis_request(&self, property_data: PropertyData, user_id: UserId) -> Result<WorkflowId> {
        if self.context.is_shutting_down() {
            return Err(AgentError::Shutdown);
        }

        let workflow_id = WorkflowId::new_v4();
        self.enqueue(Message::AnalysisRequest {
            workflow_id,
            property_data,
            user_id,
            submitted_at: Utc::now(),
        })?;

        info!(%workflow_id, user_id, "Analysis request queued");
        Ok(workflow_id)
    }

    pub fn get_workflow_status(&self, workflow_id: &WorkflowId) -> Option<WorkflowSnapshot> {
        self.context.workflows.get(workflow_id)
    }

    pub fn list_workflows(&self) -> Vec<WorkflowSnapshot> {
        self.context.workflows.list()
    }

    /// One agent's snapshot, every agent's snapshot when `name` is `None`, or
    /// `NotFound` for an unknown name.
    pub fn get_agent_status(&self, name: Option<&str>) -> AgentStatusReport {
        self.context.agent_status(name)
    }

    /// Routes `payload` to `to` through the dispatch loop.
    pub fn send_agent_message(&self, from: &str, to: &str, payload: Value) -> Result<MessageId> {
        let message = AgentMessage::new(from, to, payload);
        let id = message.id;
        self.enqueue(Message::AgentCommunication(message))?;
        Ok(id)
    }

    /// Asks the dispatch loop for an agent's snapshot and waits for the reply.
    pub async fn request_agent_status(&self, name: &str) -> Result<AgentStatusReport> {
        let (reply, response) = oneshot::channel();
        self.enqueue(Message::StatusRequest {
            agent_name: name.to_string(),
            reply: Some(reply),
        })?;
        response
            .await
            .map_err(|_| AgentError::ChannelClosed("status request dropped".to_string()))
    }

    fn enqueue(&self, message: Message) -> Result<()> {
        if self.context.is_shutting_down() {
            return Err(AgentError::Shutdown);
        }
        self.sender
            .send(message)
            .map_err(|_| AgentError::ChannelClosed("orchestrator queue closed".to_string()))
    }
}

async fn dispatch_loop(
    context: Arc<OrchestratorContext>,
    mut receiver: mpsc::UnboundedReceiver<Message>,
    mut shutdown: watch::Receiver<bool>,
) {
    let poll_interval = context.config.poll_interval();
    debug!(poll_ms = poll_interval.as_millis() as u64, "Dispatch loop started");

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            polled = tokio::time::timeout(poll_interval, receiver.recv()) => match polled {
                Ok(Some(message)) => context.dispatch(message),
                Ok(None) => break,
                Err(_) => continue,
            },
        }
    }

    let drained = context.drain_queue(&mut receiver);
    debug!(drained, "Dispatch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Capability;
    use crate::storage::InMemoryStore;
    use crate::types::{StageResult, WorkflowStatus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Fixed(&'static str, f64);

    #[async_trait]
    impl Capability for Fixed {
        fn name(&self) -> &str {
            self.0
        }

        fn check_input(&self, _data: &Value) -> std::result::Result<(), String> {
            Ok(())
        }

        async fn analyze(&self, _data: &Value) -> Result<StageResult> {
            Ok(StageResult::new(
                self.0,
                self.1,
                json!({"estimated_price": 100_000.0, "location_score": self.1}),
            ))
        }
    }

    fn orchestrator() -> Orchestrator {
        let store = InMemoryStore::new();
        let factory = || -> Result<Vec<Agent>> {
            Ok(vec![
                Agent::new(Box::new(Fixed("price_estimator", 6.0))),
                Agent::new(Box::new(Fixed("location_analyzer", 6.0))),
                Agent::new(Box::new(Fixed("deal_evaluator", 6.0))),
            ])
        };
        let config = OrchestratorConfig {
            poll_interval_ms: 10,
            ..OrchestratorConfig::default()
        };
        Orchestrator::new(factory, Arc::new(store.clone()), Arc::new(store), config)
    }

    #[tokio::test]
    async fn test_status_request_replies_through_loop() {
        let orchestrator = orchestrator();
        orchestrator.startup().await.unwrap();
        orchestrator.startup().await.unwrap();

        let report = orchestrator.request_agent_status("deal_evaluator").await.unwrap();
        assert!(matches!(report, AgentStatusReport::Single(s) if s.agent_name == "deal_evaluator"));

        let missing = orchestrator.request_agent_status("appraiser").await.unwrap();
        assert!(missing.is_not_found());

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let orchestrator = orchestrator();
        orchestrator.startup().await.unwrap();
        orchestrator.shutdown().await.unwrap();
        orchestrator.shutdown().await.unwrap();

        let result = orchestrator.submit_analysis_request(json!({}), 1);
        assert!(matches!(result, Err(AgentError::Shutdown)));
        assert!(matches!(orchestrator.startup().await, Err(AgentError::Shutdown)));
    }

    #[tokio::test]
    async fn test_request_queued_before_startup_runs_after() {
        let orchestrator = orchestrator();
        let id = orchestrator.submit_analysis_request(json!({"city": "Austin"}), 4).unwrap();
        assert!(orchestrator.get_workflow_status(&id).is_none());

        orchestrator.startup().await.unwrap();
        let snapshot = loop {
            match orchestrator.get_workflow_status(&id) {
                Some(w) if w.status.is_terminal() => break w,
                _ => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        };
        assert_eq!(snapshot.status, WorkflowStatus::Completed);
        assert_eq!(snapshot.user_id, 4);
        assert!((snapshot.combined_score.unwrap() - 6.0).abs() < 1e-9);

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_startup_is_all_or_nothing() {
        let store = InMemoryStore::new();
        let factory = || -> Result<Vec<Agent>> {
            Err(AgentError::Validation("no agents configured".into()))
        };
        let orchestrator = Orchestrator::new(
            factory,
            Arc::new(store.clone()),
            Arc::new(store),
            OrchestratorConfig::default(),
        );

        assert!(orchestrator.startup().await.is_err());
        match orchestrator.get_agent_status(None) {
            AgentStatusReport::All { agents } => assert!(agents.is_empty()),
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_before_startup_fails_queued_requests() {
        let orchestrator = orchestrator();
        let id = orchestrator.submit_analysis_request(json!({"city": "Austin"}), 2).unwrap();

        orchestrator.shutdown().await.unwrap();

        let snapshot = orchestrator.get_workflow_status(&id).unwrap();
        assert_eq!(snapshot.status, WorkflowStatus::Failed);
        assert_eq!(snapshot.user_id, 2);
        assert_eq!(snapshot.error.as_deref(), Some("orchestrator is shutting down"));
        assert!(snapshot.end_time.is_some());
    }

    /// Records whether its shutdown hook ran; optionally refuses to start.
    struct Hooked {
        name: &'static str,
        refuse_startup: bool,
        stopped: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Capability for Hooked {
        fn name(&self) -> &str {
            self.name
        }

        fn check_input(&self, _data: &Value) -> std::result::Result<(), String> {
            Ok(())
        }

        async fn analyze(&self, _data: &Value) -> Result<StageResult> {
            Ok(StageResult::new(self.name, 5.0, json!({})))
        }

        async fn startup(&self) -> Result<()> {
            if self.refuse_startup {
                return Err(AgentError::TransientUpstream("model endpoint refused".into()));
            }
            Ok(())
        }

        async fn shutdown(&self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_second_agent_startup_failure_rolls_back_first() {
        let store = InMemoryStore::new();
        let first_stopped = Arc::new(AtomicBool::new(false));
        let second_stopped = Arc::new(AtomicBool::new(false));
        let flags = (first_stopped.clone(), second_stopped.clone());
        let factory = move || -> Result<Vec<Agent>> {
            Ok(vec![
                Agent::new(Box::new(Hooked {
                    name: "price_estimator",
                    refuse_startup: false,
                    stopped: flags.0.clone(),
                })),
                Agent::new(Box::new(Hooked {
                    name: "location_analyzer",
                    refuse_startup: true,
                    stopped: flags.1.clone(),
                })),
            ])
        };
        let orchestrator = Orchestrator::new(
            factory,
            Arc::new(store.clone()),
            Arc::new(store),
            OrchestratorConfig::default(),
        );

        let result = orchestrator.startup().await;
        assert!(matches!(result, Err(AgentError::TransientUpstream(_))));
        assert!(first_stopped.load(Ordering::SeqCst));
        assert!(second_stopped.load(Ordering::SeqCst));
        match orchestrator.get_agent_status(None) {
            AgentStatusReport::All { agents } => assert!(agents.is_empty()),
            other => panic!("unexpected report: {:?}", other),
        }
        assert!(orchestrator.submit_analysis_request(json!({}), 1).is_ok());
    }
}
