use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub mod app;
pub mod tunlify;

#[async_trait]
pub trait Task: Send + Sync + 'static {
    fn name(&self) -> String;

    /// Launch the task, wait until the task is ready and return a handle to the task.
    async fn launch(&self, token: CancellationToken) -> Result<JoinHandle<Result<()>>>;

    fn boxed(self) -> Box<dyn Task>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}
