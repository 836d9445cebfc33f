//! Minimal async component/channel harness that the causal-replay core's
//! input processor and force-feeder run inside of. Each `PipelineComponent`
//! is a named, spawnable stage; `Pipeline` wires stages together with
//! bounded `tokio::sync::mpsc` channels, mirroring how the rest of this
//! stack composes its long-running tasks into one `JoinSet`.

mod builder;
mod component;
mod peekable_receiver;

pub use builder::Pipeline;
pub use component::PipelineComponent;
pub use peekable_receiver::PeekableReceiver;
