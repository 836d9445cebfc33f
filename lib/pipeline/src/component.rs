use async_trait::async_trait;
use tokio::sync::mpsc::Sender;

use crate::peekable_receiver::PeekableReceiver;

/// One named, spawnable stage of a pipeline.
///
/// A component consumes `Input` from an upstream channel and produces
/// `Output` onto a downstream one, running until its input channel closes
/// or it decides there's nothing left to do. `run` returning `Ok(())` for a
/// component that's expected to run forever (e.g. the live input processor)
/// is logged as an unexpected exit by the caller driving the `JoinSet`, not
/// treated as success.
#[async_trait]
pub trait PipelineComponent: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Name used in logs and metrics.
    const NAME: &'static str;
    /// Bounded capacity of this component's output channel.
    const OUTPUT_BUFFER_SIZE: usize;

    async fn run(
        self,
        input: PeekableReceiver<Self::Input>,
        output: Sender<Self::Output>,
    ) -> anyhow::Result<()>;
}
