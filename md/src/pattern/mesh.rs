//! Mesh topologies: network, router, hierarchical

use std::sync::LazyLock;

use futures::future::join_all;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::NodeStatus;
use super::runner::{PatternEngine, RunCtx, predecessors_message};

static VOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bVOTE:\s*(\d+)").unwrap());
static ROUTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bROUTE:\s*([\w-]+)").unwrap());
static SUBTASK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?im)^\s*TASK:\s*(.+)$").unwrap());

impl PatternEngine {
    /// Full-mesh negotiation: everyone proposes, everyone votes, simple
    /// majority of cast votes picks the winning proposal
    pub(super) async fn drive_network(&self, ctx: &RunCtx<'_>) -> eyre::Result<Option<String>> {
        let count = ctx.participants.len();
        if count < 2 {
            return self.drive_solo(ctx).await;
        }
        let semaphore = Semaphore::new(self.wip_limit(ctx.definition));

        // Round 1: proposals
        let proposal_task = format!(
            "Propose your approach to the task below. Be concrete; peers will vote on the proposals.\n\n{}",
            ctx.task
        );
        let futures = (0..count).map(|index| {
            let semaphore = &semaphore;
            let task = proposal_task.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closes");
                self.run_node(ctx, index, &task).await
            }
        });
        let proposal_nodes = join_all(futures).await;

        let proposals: Vec<(usize, String, String)> = proposal_nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.status == NodeStatus::Completed)
            .filter_map(|(i, n)| n.output.as_ref().map(|o| (i, n.agent_id.clone(), o.clone())))
            .collect();
        if proposals.is_empty() {
            return Ok(None);
        }

        // Round 2: votes. Each participant ranks the numbered proposals;
        // self-votes count like any other.
        let mut ballot = String::from("Vote for the strongest proposal. Answer with VOTE: <number>.\n\n");
        for (ordinal, (_, agent_id, text)) in proposals.iter().enumerate() {
            ballot.push_str(&format!("Proposal {} (from {}):\n{}\n\n", ordinal, agent_id, text));
        }

        let mut tally = vec![0usize; proposals.len()];
        for index in 0..count {
            let node = self.run_node(ctx, index, &ballot).await;
            if let Some(output) = &node.output
                && let Some(capture) = VOTE.captures(output)
                && let Ok(choice) = capture[1].parse::<usize>()
                && choice < proposals.len()
            {
                tally[choice] += 1;
            }
        }

        let votes_cast: usize = tally.iter().sum();
        let (winner, winner_votes) = tally
            .iter()
            .enumerate()
            .max_by_key(|(_, v)| **v)
            .map(|(i, v)| (i, *v))
            .unwrap_or((0, 0));

        // Simple majority of cast votes terminates the negotiation; a hung
        // vote still yields the plurality winner but is annotated in logs.
        if votes_cast == 0 || winner_votes * 2 <= votes_cast {
            warn!(winner_votes, votes_cast, "Network vote without a majority, taking plurality");
        } else {
            info!(winner = %proposals[winner].1, winner_votes, votes_cast, "Network vote decided");
        }

        Ok(Some(proposals[winner].2.clone()))
    }

    /// A dispatcher picks exactly one downstream path; the rest are never
    /// instantiated
    pub(super) async fn drive_router(&self, ctx: &RunCtx<'_>) -> eyre::Result<Option<String>> {
        let count = ctx.participants.len();
        if count < 2 {
            return self.drive_solo(ctx).await;
        }

        let downstream: Vec<String> = ctx.participants[1..].iter().map(|p| p.agent.id.clone()).collect();
        let dispatch_task = format!(
            "Route the task below to exactly one of these agents: {}.\n\
             Answer with ROUTE: <agent-id> and a one-line justification.\n\n{}",
            downstream.join(", "),
            ctx.task
        );
        let dispatcher = self.run_node(ctx, 0, &dispatch_task).await;

        let routed_id = dispatcher
            .output
            .as_deref()
            .and_then(|o| ROUTE.captures(o))
            .map(|c| c[1].to_string());

        let target = routed_id
            .as_deref()
            .and_then(|id| ctx.participants.iter().position(|p| p.agent.id == id))
            .filter(|i| *i != 0)
            .unwrap_or_else(|| {
                debug!("Dispatcher named no known downstream agent, defaulting to the first");
                1
            });

        let node = self.run_node(ctx, target, ctx.task).await;
        Ok(node.output)
    }

    /// A lead decomposes the work, sub-turns execute, and only the lead
    /// emits the phase's final output
    pub(super) async fn drive_hierarchical(&self, ctx: &RunCtx<'_>) -> eyre::Result<Option<String>> {
        let count = ctx.participants.len();
        if count < 2 {
            return self.drive_solo(ctx).await;
        }
        let workers = count - 1;

        let decompose_task = format!(
            "You lead a team of {} agents. Decompose the task below into at most {} \
             independent subtasks, one per line, each starting with TASK: .\n\n{}",
            workers, workers, ctx.task
        );
        let lead = self.run_node(ctx, 0, &decompose_task).await;
        if lead.status != NodeStatus::Completed {
            return Ok(None);
        }

        let subtasks: Vec<String> = lead
            .output
            .as_deref()
            .map(|o| SUBTASK.captures_iter(o).map(|c| c[1].trim().to_string()).collect())
            .unwrap_or_default();
        let subtasks = if subtasks.is_empty() {
            vec![ctx.task.to_string()]
        } else {
            subtasks
        };

        // Round-robin assignment, bounded by the wip limit
        let semaphore = Semaphore::new(self.wip_limit(ctx.definition));
        let assignments: Vec<(usize, String)> = subtasks
            .into_iter()
            .take(workers)
            .enumerate()
            .map(|(i, task)| (1 + (i % workers), task))
            .collect();

        let futures = assignments.iter().map(|(index, task)| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closes");
                self.run_node(ctx, *index, task).await
            }
        });
        let sub_nodes = join_all(futures).await;

        let outputs: Vec<(String, String)> = sub_nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Completed)
            .filter_map(|n| n.output.as_ref().map(|o| (n.agent_id.clone(), o.clone())))
            .collect();

        let synthesis_task = format!(
            "Your team finished its subtasks. Produce the final deliverable for the \
             original task from their results.\n\n{}",
            predecessors_message(ctx.task, &outputs)
        );
        let final_turn = self.run_node(ctx, 0, &synthesis_task).await;
        Ok(final_turn.output)
    }
}

#[cfg(test)]
mod tests {
    use super::super::chain::engine_fixture;
    use crate::domain::{AgentDefinition, PatternDefinition, PatternType, Role};
    use crate::llm::MockLlmClient;
    use crate::pattern::{NodeStatus, ResolvedParticipant};
    use tokio_util::sync::CancellationToken;

    fn participants(ids: &[&str]) -> Vec<ResolvedParticipant> {
        ids.iter()
            .map(|id| ResolvedParticipant::new(AgentDefinition::new(*id, *id, Role::Developer)))
            .collect()
    }

    fn definition(pattern_type: PatternType, count: usize) -> PatternDefinition {
        let slots = (0..count).map(|i| PatternDefinition::agent(format!("agent-{}", i))).collect();
        PatternDefinition::new("test-pattern", pattern_type, slots)
    }

    #[tokio::test]
    async fn test_router_runs_only_the_chosen_path() {
        let fx = engine_fixture(vec![
            MockLlmClient::text_response("ROUTE: dev-backend - this is a storage-layer problem at heart"),
            MockLlmClient::text_response("the backend path implemented the storage fix end to end"),
        ]);

        let result = fx
            .engine
            .run(
                &definition(PatternType::Router, 3),
                participants(&["router", "dev-frontend", "dev-backend"]),
                "Fix the save failure",
                &fx.phase(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.nodes[0].status, NodeStatus::Completed);
        // The frontend path was never instantiated
        assert_eq!(result.nodes[1].status, NodeStatus::Pending);
        assert_eq!(result.nodes[2].status, NodeStatus::Completed);
        fx.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_network_majority_vote_picks_winner() {
        // Three proposals, then three votes: two for proposal 1
        let fx = engine_fixture(vec![
            MockLlmClient::text_response("proposal from a: rewrite the sync engine with a journal"),
            MockLlmClient::text_response("proposal from b: patch the sync engine conflict handling"),
            MockLlmClient::text_response("proposal from c: defer and collect more failure data first"),
            MockLlmClient::text_response("VOTE: 1 - the patch is proportionate to the evidence"),
            MockLlmClient::text_response("VOTE: 1 - lowest risk of the three options"),
            MockLlmClient::text_response("VOTE: 2 - we genuinely lack data"),
        ]);

        let mut def = definition(PatternType::Network, 3);
        def.wip_limit = 1;
        let result = fx
            .engine
            .run(
                &def,
                participants(&["dev-a", "dev-b", "dev-c"]),
                "Decide the sync engine plan",
                &fx.phase(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.final_output.unwrap().contains("patch the sync engine"));
        fx.state.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_hierarchical_lead_emits_final_output() {
        let fx = engine_fixture(vec![
            MockLlmClient::text_response("TASK: extract the validation module\nTASK: add tests for the edge cases"),
            MockLlmClient::text_response("worker finished extracting the validation module cleanly"),
            MockLlmClient::text_response("worker finished the edge case tests, all green"),
            MockLlmClient::text_response("lead synthesis: validation extracted and covered by tests"),
        ]);

        let mut def = definition(PatternType::Hierarchical, 3);
        def.wip_limit = 1;
        let result = fx
            .engine
            .run(
                &def,
                participants(&["lead", "dev-a", "dev-b"]),
                "Restructure the validation code",
                &fx.phase(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(result.final_output.unwrap().starts_with("lead synthesis:"));
        fx.state.shutdown().await.unwrap();
    }
}
