//! Idempotent cleanup callbacks run on termination

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Something that must be undone before the process exits
#[async_trait]
pub trait CleanupTask: Send + Sync {
    fn name(&self) -> &str;

    /// Must be safe to call more than once
    async fn cleanup(&self);
}

/// Ordered set of cleanup tasks, run newest first
#[derive(Default)]
pub struct CleanupRegistry {
    tasks: Mutex<Vec<Arc<dyn CleanupTask>>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, task: Arc<dyn CleanupTask>) {
        tracing::debug!(task = %task.name(), "Registered cleanup task");
        self.tasks.lock().await.push(task);
    }

    /// Run and drain every registered task; later calls are no-ops
    pub async fn run_all(&self) {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks.into_iter().rev() {
            tracing::debug!(task = %task.name(), "Running cleanup task");
            task.cleanup().await;
        }
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}
