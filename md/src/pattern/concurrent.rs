//! Concurrent topologies: parallel, wave, aggregator

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::debug;

use super::NodeStatus;
use super::runner::{PatternEngine, RunCtx, predecessors_message};

impl PatternEngine {
    /// Agents run concurrently under the wip limit; outputs are collected
    /// in declared participant order, never completion order. Wave patterns
    /// share this driver: the wip limit is the wave width.
    pub(super) async fn drive_parallel(&self, ctx: &RunCtx<'_>) -> eyre::Result<Option<String>> {
        let limit = self.wip_limit(ctx.definition);
        let semaphore = Semaphore::new(limit);

        let futures = (0..ctx.participants.len()).map(|index| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closes");
                debug!(index, "Parallel node starting");
                self.run_node(ctx, index, ctx.task).await
            }
        });

        join_all(futures).await;
        Ok(None)
    }

    /// N parallel producers collapsed by the designated synthesizer, which
    /// is the last declared participant
    pub(super) async fn drive_aggregator(&self, ctx: &RunCtx<'_>) -> eyre::Result<Option<String>> {
        let count = ctx.participants.len();
        if count < 2 {
            return self.drive_solo(ctx).await;
        }
        let producer_count = count - 1;
        let limit = self.wip_limit(ctx.definition);
        let semaphore = Semaphore::new(limit);

        let futures = (0..producer_count).map(|index| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closes");
                self.run_node(ctx, index, ctx.task).await
            }
        });
        let produced = join_all(futures).await;

        // Declared-order inputs for the synthesizer
        let outputs: Vec<(String, String)> = produced
            .iter()
            .filter(|n| n.status == NodeStatus::Completed)
            .filter_map(|n| n.output.as_ref().map(|o| (n.agent_id.clone(), o.clone())))
            .collect();

        let synth_task = format!(
            "Synthesize the parallel contributions below into one coherent result.\n\n{}",
            predecessors_message(ctx.task, &outputs)
        );
        let synth = self.run_node(ctx, producer_count, &synth_task).await;
        Ok(synth.output)
    }
}
