use std::time::{Duration, Instant};

/// 批次進度追蹤，取代互動式進度條，全部經由 tracing 輸出
#[derive(Debug)]
pub struct BatchProgress {
    stage: String,
    total: usize,
    done: usize,
    start_time: Instant,
}

impl BatchProgress {
    pub fn new(stage: &str, total: usize) -> Self {
        Self {
            stage: stage.to_string(),
            total,
            done: 0,
            start_time: Instant::now(),
        }
    }

    pub fn total_batches(&self, batch_size: usize) -> usize {
        if batch_size == 0 {
            return 0;
        }
        self.total.div_ceil(batch_size)
    }

    pub fn batch_started(&self, batch_num: usize, batch_count: usize, records: usize) {
        tracing::info!(
            "📦 {} [Batch {}/{}] Processing {} records...",
            self.stage,
            batch_num,
            batch_count,
            records
        );
    }

    pub fn advance(&mut self, records: usize) {
        self.done = (self.done + records).min(self.total);
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn log_checkpoint(&self, path: &str) {
        tracing::info!(
            "💾 {} [Checkpoint] Saved {}/{} records to {} (elapsed {:?})",
            self.stage,
            self.done,
            self.total,
            path,
            self.elapsed()
        );
    }
}
