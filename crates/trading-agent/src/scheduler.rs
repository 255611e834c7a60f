use std::future::Future;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Whether a guarded job actually ran
#[derive(Debug, Clone, PartialEq)]
pub enum JobRun<T> {
    Completed(T),
    /// Another run of the same job was still in flight
    Skipped,
}

impl<T> JobRun<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, JobRun::Skipped)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            JobRun::Completed(value) => Some(value),
            JobRun::Skipped => None,
        }
    }
}

/// At most one in-flight run per job; overlapping calls are dropped, not queued
pub struct SingleFlight {
    name: &'static str,
    lock: Mutex<()>,
}

impl SingleFlight {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lock: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    pub async fn run<F, Fut, T>(&self, job: F) -> JobRun<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let Ok(_guard) = self.lock.try_lock() else {
            debug!(job = self.name, "previous run still in flight, skipping");
            return JobRun::Skipped;
        };
        JobRun::Completed(job().await)
    }
}

/// Fixed-interval jobs with a shared shutdown signal
pub struct Scheduler {
    tasks: Vec<(String, JoinHandle<()>)>,
    shutdown_sender: broadcast::Sender<()>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_sender, _) = broadcast::channel(16);
        Self {
            tasks: Vec::new(),
            shutdown_sender,
        }
    }

    /// Run `task_fn` every `every`, first tick immediately. Ticks missed while
    /// a run is still going are skipped.
    pub fn add_periodic_task<F, Fut>(&mut self, name: &str, every: Duration, task_fn: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut timer = interval(every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let task_name = name.to_string();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        task_fn().await;
                    }
                    _ = shutdown_receiver.recv() => {
                        info!("Periodic task {} is shutting down", task_name);
                        break;
                    }
                }
            }
        });
        info!("Scheduled {} every {:?}", name, every);
        self.tasks.push((name.to_string(), handle));
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every task and wait for in-flight runs to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_sender.send(());
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                tracing::warn!("Task {} ended abnormally: {}", name, e);
            }
        }
    }
}
