use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::error;

use crate::tasks::Task;

/// Matched tasks, in discovery order.
///
/// With an output file configured, every match is appended to it the moment
/// it is recorded so partial results survive an interrupted run.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    items: Mutex<Vec<Task>>,
    output_file: Option<PathBuf>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_file(path: Option<PathBuf>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            output_file: path,
        }
    }

    /// Records a match. `line` is what gets appended to the output file.
    pub async fn add(&self, task: Task, line: &str) {
        // The lock is held across the append so concurrent matches never
        // interleave within the file.
        let mut items = self.items.lock().await;
        items.push(task);
        if let Some(path) = &self.output_file {
            if let Err(e) = append_line(path, line).await {
                error!("Could not append to result file '{}': {}", path.display(), e);
            }
        }
    }

    pub async fn snapshot(&self) -> Vec<Task> {
        self.items.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Keeps only the earliest match.
    pub async fn truncate_to_first(&self) {
        self.items.lock().await.truncate(1);
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    file.flush().await
}
