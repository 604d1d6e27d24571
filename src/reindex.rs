//! Background re-projection of every entity of a type into its index.
//!
//! A reindex runs on tokio's blocking pool. The submitting call gets a
//! [`ReindexTask`] back immediately and can poll its status, wait for it or
//! cancel it. Failures end the task, never the process: they are logged and
//! recorded as [`TaskStatus::Failed`].

use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use rayon::prelude::*;
use tokio::{runtime::Handle, sync::watch};
use tracing::{error, info};

use crate::{
    error::{Error, Result},
    projector::Document,
    schema::Entity,
    tantivy_index::SearchIndex,
};

/// Finished tasks kept around for [`ReindexCoordinator::tasks`].
const MAX_FINISHED_TASKS: usize = 32;

pub type TaskId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Enqueued,
    Running { indexed: usize, total: usize },
    Succeeded { indexed: usize, skipped: usize },
    Failed(String),
    Cancelled,
}

impl TaskStatus {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded { .. }
                | TaskStatus::Failed(_)
                | TaskStatus::Cancelled
        )
    }
}

/// Snapshot of a task for status listings.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: TaskId,
    pub entity: String,
    pub status: TaskStatus,
}

/// Handle to a submitted reindex.
#[derive(Debug, Clone)]
pub struct ReindexTask {
    id: TaskId,
    entity: String,
    status: watch::Receiver<TaskStatus>,
    cancel: Arc<AtomicBool>,
}

impl ReindexTask {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    /// Ask the task to stop. It stops before its next batch.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Wait until the task finishes and return its final status.
    pub async fn wait(&mut self) -> TaskStatus {
        let finished = self
            .status
            .wait_for(TaskStatus::is_finished)
            .await
            .map(|status| status.clone());
        match finished {
            Ok(status) => status,
            Err(_) => match self.status() {
                status if status.is_finished() => status,
                _ => TaskStatus::Failed(
                    "reindex task stopped without reporting".into(),
                ),
            },
        }
    }

    fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            entity: self.entity.clone(),
            status: self.status(),
        }
    }
}

#[derive(Debug)]
pub struct ReindexCoordinator {
    next_id: AtomicU64,
    tasks: Mutex<Vec<ReindexTask>>,
    batch_size: usize,
}

impl ReindexCoordinator {
    pub fn new(batch_size: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            tasks: Mutex::new(Vec::new()),
            batch_size: batch_size.max(1),
        }
    }

    /// Reindex every entity of `index`'s type from its repository.
    ///
    /// Must be called from within a tokio runtime. Any unfinished task for
    /// the same type is cancelled first.
    pub fn submit(&self, index: Arc<SearchIndex>) -> Result<ReindexTask> {
        self.submit_on(&current_runtime()?, index)
    }

    pub(crate) fn submit_on(
        &self,
        runtime: &Handle,
        index: Arc<SearchIndex>,
    ) -> Result<ReindexTask> {
        self.cancel(index.name())?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = watch::channel(TaskStatus::Enqueued);
        let task = ReindexTask {
            id,
            entity: index.name().to_string(),
            status: rx,
            cancel: Arc::new(AtomicBool::new(false)),
        };
        self.track(task.clone())?;

        let cancel = task.cancel.clone();
        let batch_size = self.batch_size;
        runtime.spawn_blocking(move || {
            let status = run(id, &index, batch_size, &cancel, &tx);
            tx.send_replace(status);
        });

        Ok(task)
    }

    /// Cancel unfinished tasks of `entity`.
    pub fn cancel(&self, entity: &str) -> Result<()> {
        for task in self.lock_tasks()?.iter() {
            if task.entity == entity && !task.status().is_finished() {
                task.cancel();
            }
        }
        Ok(())
    }

    /// Status of running tasks and the most recently finished ones.
    pub fn tasks(&self) -> Result<Vec<TaskInfo>> {
        Ok(self.lock_tasks()?.iter().map(ReindexTask::info).collect())
    }

    fn track(&self, task: ReindexTask) -> Result<()> {
        let mut tasks = self.lock_tasks()?;
        let finished = tasks
            .iter()
            .filter(|t| t.status().is_finished())
            .count();
        if finished >= MAX_FINISHED_TASKS
            && let Some(oldest) =
                tasks.iter().position(|t| t.status().is_finished())
        {
            tasks.remove(oldest);
        }
        tasks.push(task);
        Ok(())
    }

    fn lock_tasks(&self) -> Result<MutexGuard<'_, Vec<ReindexTask>>> {
        self.tasks.lock().map_err(|_| Error::Poisoned("reindex tasks"))
    }
}

/// The runtime reindex tasks are spawned on.
pub(crate) fn current_runtime() -> Result<Handle> {
    Handle::try_current().map_err(|e| {
        Error::Reindex(format!("no tokio runtime to run on: {e}"))
    })
}

fn run(
    id: TaskId,
    index: &SearchIndex,
    batch_size: usize,
    cancel: &AtomicBool,
    status: &watch::Sender<TaskStatus>,
) -> TaskStatus {
    let entity = index.name();
    info!(entity, task = id, "reindex started");

    match reindex(index, batch_size, cancel, status) {
        Ok(Some((indexed, skipped))) => {
            info!(entity, task = id, indexed, skipped, "reindex finished");
            TaskStatus::Succeeded { indexed, skipped }
        }
        Ok(None) => {
            info!(entity, task = id, "reindex cancelled");
            TaskStatus::Cancelled
        }
        Err(e) if cancel.load(Ordering::Relaxed) => {
            info!(entity, task = id, error = %e, "reindex cancelled");
            TaskStatus::Cancelled
        }
        Err(e) => {
            error!(entity, task = id, error = %e, "reindex failed");
            TaskStatus::Failed(e.to_string())
        }
    }
}

/// Returns `(indexed, skipped)`, or `None` when cancelled.
fn reindex(
    index: &SearchIndex,
    batch_size: usize,
    cancel: &AtomicBool,
    status: &watch::Sender<TaskStatus>,
) -> Result<Option<(usize, usize)>> {
    // Recording starts before the snapshot is taken.
    let _barrier = index.begin_rebuild()?;

    let entities = index.repository().find_all(index.name()).map_err(|e| {
        Error::Reindex(format!("failed to list {} entities: {e}", index.name()))
    })?;
    let total = entities.len();
    status.send_replace(TaskStatus::Running { indexed: 0, total });

    let mut indexed = 0;
    for chunk in entities.chunks(batch_size) {
        if cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let batch = chunk
            .par_iter()
            .map(|entity| prepare(index, entity.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let batch: Vec<_> = batch.into_iter().flatten().collect();

        indexed += index.write_rebuilt(batch)?;
        status.send_replace(TaskStatus::Running { indexed, total });
    }

    Ok(Some((indexed, total - indexed)))
}

fn prepare(
    index: &SearchIndex,
    entity: &dyn Entity,
) -> Result<Option<(String, Document)>> {
    Ok(index
        .prepare(entity)?
        .map(|document| (index.key(&entity.item_id()), document)))
}
