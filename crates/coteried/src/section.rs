//! Demo critical section: hold the mutex for a random while.

use std::time::Duration;

use coterie_mutex::CriticalSection;
use coterie_types::ProcessId;
use rand::Rng;
use tracing::info;

/// Sleeps a uniformly random duration between `min` and `max`.
pub struct SleepSection {
    min: Duration,
    max: Duration,
}

impl SleepSection {
    pub fn new((min, max): (Duration, Duration)) -> Self {
        Self { min, max }
    }

    fn pick(&self) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let ms = rand::rng().random_range(self.min.as_millis() as u64..=self.max.as_millis() as u64);
        Duration::from_millis(ms)
    }
}

#[async_trait::async_trait]
impl CriticalSection for SleepSection {
    async fn run(&self, process: ProcessId, epoch: u64) {
        let hold = self.pick();
        info!(%process, epoch, hold_ms = hold.as_millis() as u64, "entering CS");
        tokio::time::sleep(hold).await;
        info!(%process, epoch, "done with CS");
    }
}
