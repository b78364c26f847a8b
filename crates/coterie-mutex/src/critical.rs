//! The guarded work a process runs once it holds every vote.

use std::future::Future;

use coterie_types::ProcessId;

/// Body of the critical section.
///
/// The controller runs it on its own task and multicasts RELEASE once the
/// returned future completes. The protocol assumes it terminates.
#[async_trait::async_trait]
pub trait CriticalSection: Send + Sync {
    /// Run the critical section of `process` for request `epoch`.
    async fn run(&self, process: ProcessId, epoch: u64);
}

/// A critical section that returns immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCriticalSection;

#[async_trait::async_trait]
impl CriticalSection for NoopCriticalSection {
    async fn run(&self, _process: ProcessId, _epoch: u64) {}
}

/// Adapts an async closure into a [`CriticalSection`].
pub struct FnSection<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> CriticalSection for FnSection<F>
where
    F: Fn(ProcessId, u64) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn run(&self, process: ProcessId, epoch: u64) {
        (self.0)(process, epoch).await
    }
}
