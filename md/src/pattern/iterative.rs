//! Iterative topologies: loop, debate, adversarial-pair

use tracing::{debug, info};

use super::NodeStatus;
use super::runner::{PatternEngine, RunCtx, predecessors_message};

impl PatternEngine {
    /// The agent set runs repeatedly until max_iterations or convergence
    ///
    /// Recognized convergence rules: "no_veto" (an iteration with no vetoed
    /// node converges) and "all_completed". Absent a rule, the loop runs its
    /// full iteration budget.
    pub(super) async fn drive_loop(&self, ctx: &RunCtx<'_>) -> eyre::Result<Option<String>> {
        let max_iterations = ctx.definition.max_iterations.max(1);
        let mut carried: Vec<(String, String)> = Vec::new();

        for iteration in 1..=max_iterations {
            debug!(iteration, max_iterations, "Loop iteration starting");
            let mut iteration_outputs: Vec<(String, String)> = Vec::new();
            let mut any_veto = false;
            let mut all_completed = true;

            for index in 0..ctx.participants.len() {
                let task = if carried.is_empty() && iteration_outputs.is_empty() {
                    ctx.task.to_string()
                } else {
                    let mut context = carried.clone();
                    context.extend(iteration_outputs.clone());
                    format!(
                        "Iteration {} of {}.\n{}",
                        iteration,
                        max_iterations,
                        predecessors_message(ctx.task, &context)
                    )
                };
                let node = self.run_node(ctx, index, &task).await;
                match node.status {
                    NodeStatus::Vetoed => {
                        any_veto = true;
                        all_completed = false;
                    }
                    NodeStatus::Completed => {
                        if let Some(output) = &node.output {
                            iteration_outputs.push((node.agent_id.clone(), output.clone()));
                        }
                    }
                    _ => all_completed = false,
                }
            }

            carried = iteration_outputs;

            let converged = match ctx.definition.convergence.as_deref() {
                Some("no_veto") => !any_veto,
                Some("all_completed") => all_completed,
                _ => false,
            };
            if converged {
                info!(iteration, "Loop converged");
                break;
            }
        }

        Ok(None)
    }

    /// Two agents alternate bounded turns; a neutral third evaluator emits
    /// the verdict and the final output
    pub(super) async fn drive_debate(&self, ctx: &RunCtx<'_>) -> eyre::Result<Option<String>> {
        if ctx.participants.len() < 2 {
            return self.drive_solo(ctx).await;
        }
        let rounds = ctx.definition.max_iterations.max(1);
        let has_evaluator = ctx.participants.len() >= 3;
        let mut transcript: Vec<(String, String)> = Vec::new();

        for round in 1..=rounds {
            for index in 0..2 {
                let side = if index == 0 { "proponent" } else { "opponent" };
                let task = format!(
                    "Debate round {} of {}. You argue as the {}.\n{}",
                    round,
                    rounds,
                    side,
                    predecessors_message(ctx.task, &transcript)
                );
                let node = self.run_node(ctx, index, &task).await;
                if node.status == NodeStatus::Vetoed {
                    info!(agent = %node.agent_id, "Debate halted by veto");
                    return Ok(None);
                }
                if let Some(output) = &node.output {
                    transcript.push((node.agent_id.clone(), output.clone()));
                }
            }
        }

        if !has_evaluator {
            return Ok(None);
        }

        let verdict_task = format!(
            "You are the neutral evaluator of the debate below. Weigh both sides and \
             state the verdict with your reasoning. Answer VETO: <reason> only if both \
             positions are unusable.\n{}",
            predecessors_message(ctx.task, &transcript)
        );
        let evaluator = self.run_node(ctx, 2, &verdict_task).await;
        Ok(evaluator.output)
    }
}
