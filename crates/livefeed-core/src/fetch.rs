//! Parallel fan-out of independent origin queries under one deadline.
//!
//! Every task is submitted to the worker pool before any result is awaited.
//! The orchestrator then collects results against an absolute deadline:
//! completed tasks contribute their value, everything else contributes the
//! task's default. Tasks still running at the deadline are left to finish in
//! the background; their results are discarded.

use std::future::Future;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use tokio::time::Instant;

use crate::pool::WorkerPool;

/// Error type accepted from task producers.
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// One unit of work for [`FetchOrchestrator::run`].
pub struct FetchTask<T> {
    name: &'static str,
    producer: BoxFuture<'static, Result<T, TaskError>>,
    on_timeout: T,
    on_failure: T,
    deadline: Option<Duration>,
}

impl<T: Clone> FetchTask<T> {
    /// A task that falls back to `default` on both timeout and failure.
    pub fn new<F, E>(name: &'static str, default: T, producer: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<TaskError>,
    {
        Self {
            name,
            producer: producer.map(|r| r.map_err(Into::into)).boxed(),
            on_timeout: default.clone(),
            on_failure: default,
            deadline: None,
        }
    }
}

impl<T> FetchTask<T> {
    /// Use a different default when the producer fails.
    pub fn on_failure(mut self, value: T) -> Self {
        self.on_failure = value;
        self
    }

    /// Give this task a tighter deadline than the shared one.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> std::fmt::Debug for FetchTask<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchTask")
            .field("name", &self.name)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timeout",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskOutcome<T> {
    pub value: T,
    pub status: TaskStatus,
    /// Time from submission until the result (or default) was settled.
    pub elapsed: Duration,
}

impl<T> TaskOutcome<T> {
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Results of one fan-out, in submission order.
#[derive(Debug)]
pub struct FetchReport<T> {
    outcomes: IndexMap<&'static str, TaskOutcome<T>>,
    elapsed: Duration,
}

impl<T> FetchReport<T> {
    pub fn get(&self, name: &str) -> Option<&TaskOutcome<T>> {
        self.outcomes.get(name)
    }

    /// Remove and return a task's value.
    pub fn take(&mut self, name: &str) -> Option<T> {
        self.outcomes.shift_remove(name).map(|o| o.value)
    }

    pub fn outcomes(&self) -> impl Iterator<Item = (&'static str, &TaskOutcome<T>)> {
        self.outcomes.iter().map(|(name, outcome)| (*name, outcome))
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn all_completed(&self) -> bool {
        self.outcomes.values().all(TaskOutcome::is_completed)
    }

    pub fn none_completed(&self) -> bool {
        !self.outcomes.values().any(TaskOutcome::is_completed)
    }

    /// Names of tasks that were still running at their deadline.
    pub fn timed_out(&self) -> Vec<&'static str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| o.status == TaskStatus::TimedOut)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Wall time of the whole fan-out.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }
}

/// Runs [`FetchTask`]s on a worker pool.
#[derive(Debug, Clone)]
pub struct FetchOrchestrator {
    pool: WorkerPool,
}

impl FetchOrchestrator {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run `tasks` concurrently and collect their results by `deadline`.
    ///
    /// Never fails: every task yields either its value or one of its defaults.
    pub async fn run<T>(&self, tasks: Vec<FetchTask<T>>, deadline: Duration) -> FetchReport<T>
    where
        T: Send + 'static,
    {
        let started = Instant::now();
        let shared_deadline = started + deadline;

        let submitted: Vec<_> = tasks
            .into_iter()
            .map(|task| {
                let task_deadline = task
                    .deadline
                    .map(|d| (started + d).min(shared_deadline))
                    .unwrap_or(shared_deadline);
                let producer = task.producer;
                let handle = self.pool.spawn(async move {
                    let result = producer.await;
                    (result, started.elapsed())
                });
                (task.name, task.on_timeout, task.on_failure, task_deadline, handle)
            })
            .collect();

        let mut outcomes = IndexMap::with_capacity(submitted.len());
        for (name, on_timeout, on_failure, task_deadline, handle) in submitted {
            let handle = match handle {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(task = name, error = %e, "fetch task not submitted");
                    outcomes.insert(name, failed(on_failure, started));
                    continue;
                }
            };

            // A finished task is collected even if its deadline already passed.
            let outcome = match tokio::time::timeout_at(task_deadline, handle).await {
                Ok(Ok((Ok(value), elapsed))) => TaskOutcome {
                    value,
                    status: TaskStatus::Completed,
                    elapsed,
                },
                Ok(Ok((Err(e), _))) => {
                    tracing::warn!(task = name, error = %e, "fetch task failed, using default");
                    failed(on_failure, started)
                }
                Ok(Err(e)) => {
                    tracing::error!(task = name, error = %e, "fetch task panicked, using default");
                    failed(on_failure, started)
                }
                Err(_) => {
                    // Dropping the handle detaches the task; it keeps running.
                    tracing::warn!(
                        task = name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "fetch task deadline exceeded, using default"
                    );
                    TaskOutcome {
                        value: on_timeout,
                        status: TaskStatus::TimedOut,
                        elapsed: started.elapsed(),
                    }
                }
            };
            outcomes.insert(name, outcome);
        }

        let report = FetchReport {
            outcomes,
            elapsed: started.elapsed(),
        };
        tracing::debug!(
            tasks = report.len(),
            all_completed = report.all_completed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "fan-out finished"
        );
        report
    }
}

fn failed<T>(value: T, started: Instant) -> TaskOutcome<T> {
    TaskOutcome {
        value,
        status: TaskStatus::Failed,
        elapsed: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn orchestrator() -> FetchOrchestrator {
        FetchOrchestrator::new(WorkerPool::new("io", 4))
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_results_with_defaults() {
        let started = Instant::now();
        let tasks = vec![
            FetchTask::new("a", "default-a", async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok::<_, io::Error>("value-a")
            }),
            FetchTask::new("b", "default-b", std::future::pending::<Result<&str, io::Error>>()),
            FetchTask::new("c", "default-c", async {
                Err::<&str, _>(io::Error::other("boom"))
            }),
        ];

        let report = orchestrator().run(tasks, Duration::from_millis(100)).await;

        assert_eq!(report.get("a").unwrap().value, "value-a");
        assert_eq!(report.get("a").unwrap().status, TaskStatus::Completed);
        assert_eq!(report.get("b").unwrap().value, "default-b");
        assert_eq!(report.get("b").unwrap().status, TaskStatus::TimedOut);
        assert_eq!(report.get("c").unwrap().value, "default-c");
        assert_eq!(report.get("c").unwrap().status, TaskStatus::Failed);
        assert!(started.elapsed() <= Duration::from_millis(101));
        assert_eq!(report.timed_out(), vec!["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_complete_before_deadline() {
        let tasks = vec![
            FetchTask::new("x", 0, async { Ok::<_, io::Error>(1) }),
            FetchTask::new("y", 0, async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, io::Error>(2)
            }),
        ];

        let mut report = orchestrator().run(tasks, Duration::from_secs(1)).await;

        assert!(report.all_completed());
        assert!(report.elapsed() < Duration::from_millis(100));
        assert_eq!(report.take("x"), Some(1));
        assert_eq!(report.take("y"), Some(2));
        assert!(report.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_failure_and_timeout_defaults() {
        let tasks = vec![
            FetchTask::new(
                "slow",
                "timeout".to_string(),
                std::future::pending::<Result<String, io::Error>>(),
            )
            .on_failure("unavailable".to_string()),
            FetchTask::new("broken", "timeout".to_string(), async {
                Err::<String, _>(io::Error::other("db down"))
            })
            .on_failure("unavailable".to_string()),
        ];

        let report = orchestrator().run(tasks, Duration::from_millis(20)).await;

        assert_eq!(report.get("slow").unwrap().value, "timeout");
        assert_eq!(report.get("broken").unwrap().value, "unavailable");
        assert!(report.none_completed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_deadline_is_capped_by_shared_deadline() {
        let tasks = vec![
            FetchTask::new("tight", 0u8, async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, io::Error>(1)
            })
            .with_deadline(Duration::from_millis(10)),
            FetchTask::new("loose", 0u8, async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, io::Error>(2)
            })
            .with_deadline(Duration::from_secs(60)),
        ];

        let report = orchestrator().run(tasks, Duration::from_millis(50)).await;

        assert_eq!(report.get("tight").unwrap().status, TaskStatus::TimedOut);
        assert_eq!(report.get("loose").unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_closed_pool_yields_failure_defaults() {
        let pool = WorkerPool::new("io", 1);
        pool.shutdown(Duration::from_millis(10)).await;
        let orchestrator = FetchOrchestrator::new(pool);

        let tasks = vec![FetchTask::new("q", -1, async { Ok::<_, io::Error>(7) })];
        let report = orchestrator.run(tasks, Duration::from_millis(10)).await;

        assert_eq!(report.get("q").unwrap().value, -1);
        assert_eq!(report.get("q").unwrap().status, TaskStatus::Failed);
    }
}
