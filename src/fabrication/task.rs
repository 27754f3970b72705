use std::fmt;

use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    FeedbackEndpoint, MessageStore, RetryPolicy, ScriptContext, ScriptError, ScriptGenerator,
    ScriptSender, TaskAcks, TaskState,
};

/// What a running task talks to.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub sender: ScriptSender,
    pub store: MessageStore,
    /// `None` when no listener is running, scripts that report back can't be generated then.
    pub endpoint: Option<FeedbackEndpoint>,
}

/// One script job: send it, wait for the controller to report it received,
/// wait for it to report done.
///
/// The state machine is driven by [`Task::step`], which never blocks on the
/// acknowledgements, and [`Task::run`], which steps until a terminal state.
/// A task that returned from `run` because of cancellation stays `Cancelled`;
/// calling `run` again on a terminal task returns its outcome immediately.
pub struct Task {
    key: u64,
    generator: Box<dyn ScriptGenerator>,
    script: Option<String>,
    acks: Option<TaskAcks>,
    policy: RetryPolicy,
    custom_policy: bool,
    attempts_remaining: u32,
    deadline: Option<Instant>,
    received_at: Option<u64>,
    state: watch::Sender<TaskState>,
    log: Vec<String>,
    last_error: Option<String>,
}

impl Task {
    pub fn new<G: ScriptGenerator + 'static>(generator: G) -> Self {
        Self::from_boxed(Box::new(generator))
    }

    pub fn from_boxed(generator: Box<dyn ScriptGenerator>) -> Self {
        let policy = RetryPolicy::default();
        let (state, _) = watch::channel(TaskState::Pending);
        Self {
            key: 0,
            generator,
            script: None,
            acks: None,
            policy,
            custom_policy: false,
            attempts_remaining: policy.attempts,
            deadline: None,
            received_at: None,
            state,
            log: Vec::new(),
            last_error: None,
        }
    }

    pub fn with_key(mut self, key: u64) -> Self {
        self.key = key;
        self
    }

    /// Overrides the `Task_<key>_received` / `Task_<key>_complete` defaults.
    pub fn with_acks(mut self, acks: TaskAcks) -> Self {
        self.acks = Some(acks);
        self
    }

    /// Pins the policy, so a sequencer default won't replace it.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.set_policy(policy);
        self.custom_policy = true;
        self
    }

    pub(crate) fn set_key(&mut self, key: u64) {
        self.key = key;
    }

    pub(crate) fn apply_default_policy(&mut self, policy: RetryPolicy) {
        if !self.custom_policy {
            self.set_policy(policy);
        }
    }

    fn set_policy(&mut self, policy: RetryPolicy) {
        self.policy = policy;
        if self.state() == TaskState::Pending && self.deadline.is_none() {
            self.attempts_remaining = policy.attempts;
        }
    }

    /// Puts the task back to `Pending` with a full set of attempts. The script
    /// is generated again on the next send, the listener may have moved.
    pub fn reset(&mut self) {
        self.script = None;
        self.deadline = None;
        self.received_at = None;
        self.last_error = None;
        self.attempts_remaining = self.policy.attempts;
        self.record("Reset to pending.");
        self.set_state(TaskState::Pending);
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn acks(&self) -> TaskAcks {
        self.acks
            .clone()
            .unwrap_or_else(|| TaskAcks::for_key(self.key))
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Receiver that follows every state change of this task.
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.state.subscribe()
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    /// The generated script, once the task has been sent.
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    pub fn log_messages(&self) -> &[String] {
        &self.log
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Steps until the task is terminal. `true` only for `Completed`.
    pub async fn run(&mut self, context: &TaskContext, stop: &CancellationToken) -> bool {
        loop {
            if let Some(completed) = self.step(context, stop).await {
                return completed;
            }
            tokio::select! {
                _ = stop.cancelled() => {}
                _ = sleep(self.policy.poll_interval) => {}
            }
        }
    }

    /// Advances the state machine by at most one transition.
    /// Returns `Some(completed)` once the task is terminal.
    pub async fn step(&mut self, context: &TaskContext, stop: &CancellationToken) -> Option<bool> {
        match self.state() {
            TaskState::Completed => Some(true),
            TaskState::Failed | TaskState::Cancelled => Some(false),
            TaskState::Pending => self.step_pending(context, stop).await,
            TaskState::Sent => self.step_sent(context, stop),
            TaskState::Acknowledged => self.step_acknowledged(context, stop).await,
        }
    }

    async fn step_pending(
        &mut self,
        context: &TaskContext,
        stop: &CancellationToken,
    ) -> Option<bool> {
        if stop.is_cancelled() {
            self.record("Cancelled before the script was sent.");
            self.set_state(TaskState::Cancelled);
            return Some(false);
        }
        if self.attempts_remaining == 0 {
            self.fail("No attempts left.".to_string());
            return Some(false);
        }
        let script = match self.ensure_script(context) {
            Ok(script) => script,
            Err(e) => {
                self.fail(format!("Script generation failed: {}", e));
                return Some(false);
            }
        };

        self.attempts_remaining -= 1;
        match context.sender.send(&script).await {
            Ok(()) => {
                self.record(&format!(
                    "URScript sent, {} attempt(s) left.",
                    self.attempts_remaining
                ));
                self.deadline = Some(Instant::now() + self.policy.ack_timeout);
                self.set_state(TaskState::Sent);
                None
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                if self.attempts_remaining == 0 {
                    self.fail(format!("UR could not be reached: {}", e));
                    Some(false)
                } else {
                    self.record_warning(&format!(
                        "Sending failed with: {}, {} attempt(s) left.",
                        e, self.attempts_remaining
                    ));
                    None
                }
            }
        }
    }

    fn step_sent(&mut self, context: &TaskContext, stop: &CancellationToken) -> Option<bool> {
        if stop.is_cancelled() {
            self.record("Cancelled while waiting for the controller to pick the script up.");
            self.set_state(TaskState::Cancelled);
            return Some(false);
        }
        let acks = self.acks();
        if let Some(position) = context.store.find(&acks.received, 0) {
            self.received_at = Some(position);
            self.deadline = None;
            self.record(&format!("UR received task ({}).", acks.received));
            self.set_state(TaskState::Acknowledged);
            return self.check_completed(context, &acks);
        }

        let expired = self.deadline.map_or(true, |d| Instant::now() >= d);
        if expired {
            self.deadline = None;
            if self.attempts_remaining > 0 {
                self.record_warning(&format!(
                    "No acknowledgement within {:?}, resending.",
                    self.policy.ack_timeout
                ));
                self.set_state(TaskState::Pending);
            } else {
                self.fail("No attempts left, UR did not acknowledge the task.".to_string());
                return Some(false);
            }
        }
        None
    }

    async fn step_acknowledged(
        &mut self,
        context: &TaskContext,
        stop: &CancellationToken,
    ) -> Option<bool> {
        if stop.is_cancelled() {
            // The script is executing, so the arm has to be halted.
            if let Err(e) = context.sender.send_stop().await {
                log::error!(target: "fabrication_task",
                    "Task {}: stop command could not be delivered: {}", self.key, e);
                self.last_error = Some(e.to_string());
            }
            self.record("Cancelled during execution, stop command sent.");
            self.set_state(TaskState::Cancelled);
            return Some(false);
        }
        let acks = self.acks();
        self.check_completed(context, &acks)
    }

    fn check_completed(&mut self, context: &TaskContext, acks: &TaskAcks) -> Option<bool> {
        let done = match &acks.completed {
            None => true,
            Some(token) => {
                let after = self.received_at.map_or(0, |r| r + 1);
                context.store.find(token, after).is_some()
            }
        };
        if done {
            self.record("UR completed task.");
            self.set_state(TaskState::Completed);
            Some(true)
        } else {
            None
        }
    }

    /// Sends the script once without waiting for any acknowledgement.
    /// Used for the sequencer's terminal stop task.
    pub async fn perform(&mut self, context: &TaskContext) -> bool {
        let result = match self.ensure_script(context) {
            Ok(script) => context.sender.send(&script).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match result {
            Ok(()) => {
                self.record("Script sent without waiting for feedback.");
                self.set_state(TaskState::Completed);
                true
            }
            Err(e) => {
                self.fail(format!("Sending failed with: {}", e));
                false
            }
        }
    }

    fn ensure_script(&mut self, context: &TaskContext) -> Result<String, ScriptError> {
        if let Some(script) = &self.script {
            return Ok(script.clone());
        }
        let acks = self.acks();
        let script_context = ScriptContext::new(
            self.key,
            context.endpoint.as_ref(),
            &acks.received.payload,
            acks.completed.as_ref().map(|c| &c.payload),
        );
        let script = self.generator.generate(&script_context)?;
        self.script = Some(script.clone());
        Ok(script)
    }

    fn set_state(&mut self, state: TaskState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::info!(target: "fabrication_task",
                "Task {}: {} -> {}.", self.key, previous, state);
        }
    }

    fn fail(&mut self, reason: String) {
        log::error!(target: "fabrication_task", "Task {}: {}", self.key, reason);
        self.log.push(reason.clone());
        self.last_error = Some(reason);
        self.set_state(TaskState::Failed);
    }

    fn record(&mut self, message: &str) {
        log::info!(target: "fabrication_task", "Task {}: {}", self.key, message);
        self.log.push(message.to_string());
    }

    fn record_warning(&mut self, message: &str) {
        log::warn!(target: "fabrication_task", "Task {}: {}", self.key, message);
        self.log.push(message.to_string());
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("attempts_remaining", &self.attempts_remaining)
            .field("acks", &self.acks())
            .finish()
    }
}
