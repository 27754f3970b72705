use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    stop_script, FabricationConfig, FabricationError, FeedbackListener, MessageStore, RawScript,
    ScriptSender, SequencerState, Task, TaskContext, TaskState,
};

/// Snapshot of a run, as returned by [`FabricationSequencer::status`] and
/// [`FabricationSequencer::wait`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub state: SequencerState,
    pub current_task: Option<u64>,
    pub tasks: Vec<(u64, TaskState)>,
}

impl RunReport {
    pub fn task_state(&self, key: u64) -> Option<TaskState> {
        self.tasks
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, state)| *state)
    }

    pub fn completed(&self) -> bool {
        self.state == SequencerState::Finished
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Progress {
    state: SequencerState,
    current_task: Option<u64>,
}

/// Runs keyed tasks one at a time in ascending key order, with one feedback
/// listener shared by all of them.
///
/// ```rust,ignore
/// let mut fabrication = FabricationSequencer::new(config)?;
/// fabrication.add_task(Task::new(FeedbackScript::from_text("movej(...)")), None)?;
/// fabrication.start().await?;
/// let report = fabrication.wait().await?;
/// ```
pub struct FabricationSequencer {
    config: FabricationConfig,
    listener: FeedbackListener,
    sender: ScriptSender,
    tasks: BTreeMap<u64, Task>,
    task_states: BTreeMap<u64, watch::Receiver<TaskState>>,
    stop_task: Task,
    progress: Arc<watch::Sender<Progress>>,
    cancel: CancellationToken,
    run: Option<JoinHandle<BTreeMap<u64, Task>>>,
}

impl FabricationSequencer {
    pub fn new(config: FabricationConfig) -> Result<Self, FabricationError> {
        config.validate()?;
        let (progress, _) = watch::channel(Progress::default());
        let stop_task = Task::new(RawScript(stop_script(config.controller.stop_deceleration)));
        Ok(Self {
            listener: FeedbackListener::new(config.listener.clone()),
            sender: ScriptSender::new(config.controller.clone()),
            config,
            tasks: BTreeMap::new(),
            task_states: BTreeMap::new(),
            stop_task,
            progress: Arc::new(progress),
            cancel: CancellationToken::new(),
            run: None,
        })
    }

    pub fn config(&self) -> &FabricationConfig {
        &self.config
    }

    /// Messages the controller sent back during the current run. The store is
    /// cleared when the run is torn down by `wait` or `stop`.
    pub fn store(&self) -> MessageStore {
        self.listener.store()
    }

    pub fn listener(&self) -> &FeedbackListener {
        &self.listener
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Adds `task` under `key`, or under the next free index when `key` is
    /// `None`. A task already stored under that key is replaced.
    pub fn add_task(&mut self, mut task: Task, key: Option<u64>) -> Result<u64, FabricationError> {
        if self.is_running() {
            return Err(FabricationError::AlreadyRunning);
        }
        let key = key.unwrap_or_else(|| {
            self.tasks
                .keys()
                .next_back()
                .map_or(0, |last| last + 1)
        });
        task.set_key(key);
        task.apply_default_policy(self.config.retry);
        self.task_states.insert(key, task.subscribe());
        if self.tasks.insert(key, task).is_some() {
            log::warn!(target: "fabrication", "Replaced task {}.", key);
        }
        Ok(key)
    }

    /// Replaces the default `stopl` program sent when the run is stopped.
    pub fn set_stop_task(&mut self, task: Task) {
        self.stop_task = task;
    }

    pub fn clear_tasks(&mut self) -> Result<(), FabricationError> {
        if self.is_running() {
            return Err(FabricationError::AlreadyRunning);
        }
        self.tasks.clear();
        self.task_states.clear();
        Ok(())
    }

    pub fn task(&self, key: u64) -> Option<&Task> {
        self.tasks.get(&key)
    }

    pub fn task_state(&self, key: u64) -> Option<TaskState> {
        self.task_states.get(&key).map(|rx| *rx.borrow())
    }

    pub fn tasks_available(&self) -> bool {
        self.next_task().is_some()
    }

    /// Lowest key still pending.
    pub fn next_task(&self) -> Option<u64> {
        self.task_states
            .iter()
            .find(|(_, rx)| *rx.borrow() == TaskState::Pending)
            .map(|(key, _)| *key)
    }

    pub fn current_task(&self) -> Option<u64> {
        self.progress.borrow().current_task
    }

    pub fn state(&self) -> SequencerState {
        self.progress.borrow().state
    }

    pub fn status(&self) -> RunReport {
        let progress = *self.progress.borrow();
        RunReport {
            state: progress.state,
            current_task: progress.current_task,
            tasks: self
                .task_states
                .iter()
                .map(|(key, rx)| (*key, *rx.borrow()))
                .collect(),
        }
    }

    /// Starts the listener and runs the pending tasks in the background.
    ///
    /// Tasks cancelled by an earlier `stop` are reset and run again. Returns
    /// `false` without starting anything when no task is pending, or when a
    /// failed task blocks the queue (replace it with `add_task` first).
    pub async fn start(&mut self) -> Result<bool, FabricationError> {
        if self.is_running() {
            return Err(FabricationError::AlreadyRunning);
        }
        for task in self.tasks.values_mut() {
            if task.state() == TaskState::Cancelled {
                task.reset();
            }
        }
        if let Some(key) = self.blocking_task() {
            log::error!(target: "fabrication",
                "Task {} failed, replace it before starting again.", key);
            self.progress.send_replace(Progress {
                state: SequencerState::Halted { key },
                current_task: None,
            });
            return Ok(false);
        }
        if !self.tasks_available() {
            log::info!(target: "fabrication", "No tasks available, nothing to start.");
            return Ok(false);
        }

        self.listener.clear();
        let addr = self.listener.start().await?;
        log::info!(target: "fabrication",
            "Fabrication started with {} task(s), feedback on {}.", self.tasks.len(), addr);

        self.cancel = CancellationToken::new();
        let context = self.context();
        let tasks = mem::take(&mut self.tasks);
        self.progress.send_replace(Progress {
            state: SequencerState::Running,
            current_task: None,
        });
        self.run = Some(tokio::spawn(run_tasks(
            tasks,
            context,
            self.cancel.clone(),
            self.progress.clone(),
        )));
        Ok(true)
    }

    /// Waits for the run to end on its own, then shuts the listener down.
    pub async fn wait(&mut self) -> Result<RunReport, FabricationError> {
        if !self.join_run().await {
            return Err(FabricationError::NotRunning);
        }
        self.close().await;
        Ok(self.status())
    }

    /// Cancels the run, sends the stop task, then shuts the listener down.
    /// Safe to call when nothing is running.
    pub async fn stop(&mut self) -> RunReport {
        log::info!(target: "fabrication", "Stopping fabrication.");
        self.cancel.cancel();
        self.join_run().await;

        let context = self.context();
        if !self.stop_task.perform(&context).await {
            log::warn!(target: "fabrication", "Stop task could not be performed.");
        }

        self.close().await;
        // Halted and Finished runs keep their outcome.
        if self.state() == SequencerState::Running {
            self.progress.send_replace(Progress {
                state: SequencerState::Stopped,
                current_task: None,
            });
        }
        self.status()
    }

    /// Lowest key that is neither completed nor pending.
    fn blocking_task(&self) -> Option<u64> {
        self.tasks
            .iter()
            .find(|(_, task)| task.state() != TaskState::Completed)
            .filter(|(_, task)| task.state() != TaskState::Pending)
            .map(|(key, _)| *key)
    }

    fn context(&self) -> TaskContext {
        TaskContext {
            sender: self.sender.clone(),
            store: self.listener.store(),
            endpoint: self.listener.endpoint(),
        }
    }

    /// Puts the tasks back once the run loop has returned them.
    async fn join_run(&mut self) -> bool {
        let Some(handle) = self.run.take() else {
            return false;
        };
        match handle.await {
            Ok(tasks) => self.tasks = tasks,
            Err(e) => {
                log::error!(target: "fabrication", "Fabrication run loop panicked: {}", e);
                self.progress.send_replace(Progress {
                    state: SequencerState::Stopped,
                    current_task: None,
                });
            }
        }
        true
    }

    async fn close(&mut self) {
        self.listener.clear();
        self.listener.shutdown().await;
    }
}

impl Drop for FabricationSequencer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_tasks(
    mut tasks: BTreeMap<u64, Task>,
    context: TaskContext,
    stop: CancellationToken,
    progress: Arc<watch::Sender<Progress>>,
) -> BTreeMap<u64, Task> {
    loop {
        if stop.is_cancelled() {
            break;
        }
        // Lowest key not completed yet. A failed or cancelled one blocks the queue.
        let Some((&key, task)) = tasks
            .iter_mut()
            .find(|(_, task)| task.state() != TaskState::Completed)
        else {
            log::info!(target: "fabrication", "All tasks completed.");
            progress.send_modify(|p| p.state = SequencerState::Finished);
            break;
        };
        if task.state() != TaskState::Pending {
            log::error!(target: "fabrication",
                "Task {} is {}, replace it before continuing.", key, task.state());
            progress.send_modify(|p| p.state = SequencerState::Halted { key });
            break;
        }

        progress.send_modify(|p| p.current_task = Some(key));
        log::info!(target: "fabrication", "Running task {}.", key);
        if task.run(&context, &stop).await {
            log::info!(target: "fabrication", "Task {} completed.", key);
            continue;
        }
        if task.state() == TaskState::Cancelled {
            log::warn!(target: "fabrication", "Task {} cancelled.", key);
            break;
        }
        log::error!(target: "fabrication",
            "Task {} ended {}, halting the fabrication.", key, task.state());
        progress.send_modify(|p| p.state = SequencerState::Halted { key });
        break;
    }
    progress.send_modify(|p| p.current_task = None);
    tasks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ListenerConfig;

    fn config() -> FabricationConfig {
        FabricationConfig {
            listener: ListenerConfig::new("127.0.0.1", 0),
            ..Default::default()
        }
    }

    #[test]
    fn keys_default_to_the_next_index() {
        let mut fabrication = FabricationSequencer::new(config()).unwrap();
        assert_eq!(fabrication.add_task(Task::new(RawScript("a".into())), None).unwrap(), 0);
        assert_eq!(fabrication.add_task(Task::new(RawScript("b".into())), Some(5)).unwrap(), 5);
        assert_eq!(fabrication.add_task(Task::new(RawScript("c".into())), None).unwrap(), 6);
        assert_eq!(fabrication.task(5).unwrap().key(), 5);
        assert_eq!(
            fabrication.task(6).unwrap().acks().received.payload.as_text(),
            Some("Task_6_received")
        );
        assert_eq!(fabrication.next_task(), Some(0));
    }

    #[test]
    fn sequencer_default_policy_does_not_override_pinned_ones() {
        let mut config = config();
        config.retry.attempts = 5;
        let mut fabrication = FabricationSequencer::new(config).unwrap();
        let pinned = crate::RetryPolicy::new(1, std::time::Duration::from_secs(1));
        fabrication.add_task(Task::new(RawScript("a".into())), None).unwrap();
        fabrication
            .add_task(Task::new(RawScript("b".into())).with_policy(pinned), None)
            .unwrap();
        assert_eq!(fabrication.task(0).unwrap().attempts_remaining(), 5);
        assert_eq!(fabrication.task(1).unwrap().attempts_remaining(), 1);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = config();
        config.retry.attempts = 0;
        assert!(matches!(
            FabricationSequencer::new(config),
            Err(FabricationError::Config(_))
        ));
    }

    #[tokio::test]
    async fn start_without_tasks_is_a_no_op() {
        let mut fabrication = FabricationSequencer::new(config()).unwrap();
        assert!(!fabrication.start().await.unwrap());
        assert!(!fabrication.listener().is_running());
        assert_eq!(fabrication.state(), SequencerState::Idle);
        assert!(matches!(
            fabrication.wait().await,
            Err(FabricationError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn clearing_tasks_empties_the_status() {
        let mut fabrication = FabricationSequencer::new(config()).unwrap();
        fabrication.add_task(Task::new(RawScript("a".into())), None).unwrap();
        assert_eq!(fabrication.status().tasks, vec![(0, TaskState::Pending)]);
        fabrication.clear_tasks().unwrap();
        assert!(!fabrication.tasks_available());
        assert!(fabrication.status().tasks.is_empty());
    }
}
