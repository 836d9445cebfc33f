//! Wires [`LiveInputProcessor`] and [`ForceFeederInputProcessor`] into the
//! `causalstream-pipeline` component harness, so a node can spawn either
//! one into the same `JoinSet` as the rest of its long-running tasks.
//!
//! Neither processor has a meaningful channel output of its own — records
//! are dispatched straight to the operator under the task lock — so both
//! run with `Input = Output = ()`, matching `PipelineComponent`'s
//! documented "runs forever" shape.

use async_trait::async_trait;
use causalstream_pipeline::{PeekableReceiver, PipelineComponent};
use tokio::sync::mpsc::Sender;

use crate::contracts::{BarrierHandler, Operator, RecordDeserializer, Valve};
use crate::force_feeder::ForceFeederInputProcessor;
use crate::input_processor::{InputLoop, LiveInputProcessor};

#[async_trait]
impl<B, D, O, V> PipelineComponent for LiveInputProcessor<B, D, O, V>
where
    B: BarrierHandler + 'static,
    D: RecordDeserializer + 'static,
    O: Operator<Record = D::Record> + 'static,
    V: Valve + 'static,
{
    type Input = ();
    type Output = ();

    const NAME: &'static str = "live_input_processor";
    const OUTPUT_BUFFER_SIZE: usize = 1;

    async fn run(mut self, _input: PeekableReceiver<()>, _output: Sender<()>) -> anyhow::Result<()> {
        while self.process_input().await? {}
        self.cleanup();
        Ok(())
    }
}

#[async_trait]
impl<B, D, O, V> PipelineComponent for ForceFeederInputProcessor<B, D, O, V>
where
    B: BarrierHandler + 'static,
    D: RecordDeserializer + 'static,
    O: Operator<Record = D::Record> + 'static,
    V: Valve + 'static,
{
    type Input = ();
    type Output = ();

    const NAME: &'static str = "force_feeder_input_processor";
    const OUTPUT_BUFFER_SIZE: usize = 1;

    async fn run(mut self, _input: PeekableReceiver<()>, _output: Sender<()>) -> anyhow::Result<()> {
        while self.process_input().await? {}
        Ok(())
    }
}
