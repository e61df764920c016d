//! Thompson-sampled team and model selection

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use rand::seq::IndexedRandom;
use rand_distr::{Beta, Distribution};
use tracing::{debug, info};

use missionstore::{ModelKey, TeamKey};

use crate::config::DarwinConfig;
use crate::domain::{AgentDefinition, Role};
use crate::events::{CoreEvent, EventStream};
use crate::llm::ModelBinding;
use crate::state::{StateError, StateManager};

/// Gate outcome fed back into fitness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    Pass,
    Fail,
    /// Touches no counters; the score regresses through the prior instead
    DoneWithIssues,
}

/// A resolved team slot
#[derive(Debug, Clone)]
pub struct TeamChoice {
    pub agent_id: String,
    pub key: TeamKey,
    pub sampled_score: f64,
    pub warmup: bool,
    /// Runner-up for A/B shadow consideration
    pub runner_up: Option<(String, f64)>,
}

/// A resolved model slot
#[derive(Debug, Clone)]
pub struct ModelChoice {
    pub binding: ModelBinding,
    pub key: ModelKey,
    pub sampled_score: f64,
    pub warmup: bool,
}

/// Back off along the technology hierarchy: exact, family wildcard, generic
pub fn technology_backoff(technology: &str) -> Vec<String> {
    let mut chain = vec![technology.to_string()];
    if let Some((family, _)) = technology.split_once('_') {
        chain.push(format!("{}_*", family));
    }
    if technology != "generic" {
        chain.push("generic".to_string());
    }
    chain
}

/// The selector
pub struct DarwinSelector {
    state: StateManager,
    events: Arc<EventStream>,
    config: DarwinConfig,
    /// First time each cold key was offered, for the fairness floor
    first_seen: Mutex<HashMap<String, Instant>>,
}

impl DarwinSelector {
    pub fn new(state: StateManager, events: Arc<EventStream>, config: DarwinConfig) -> Self {
        Self {
            state,
            events,
            config,
            first_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a role-typed participant to a concrete agent
    pub async fn select_agent(
        &self,
        mission_id: &str,
        role: Role,
        candidates: &[AgentDefinition],
        pattern_id: &str,
        technology: &str,
        phase_type: &str,
    ) -> Result<TeamChoice, StateError> {
        assert!(!candidates.is_empty(), "selection over an empty candidate set");

        // (agent_id, key, runs, wins, losses) per candidate, with backoff
        let mut rows = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let (key, fitness) = self
                .team_row_with_backoff(&candidate.id, pattern_id, technology, phase_type)
                .await?;
            rows.push((candidate.id.clone(), key, fitness));
        }

        // Fairness floor: a key that has sat at zero runs long enough gets
        // one forced exploratory pick.
        if let Some((agent_id, key)) = self.starved_candidate(&rows) {
            info!(mission_id, %agent_id, "Fairness floor forcing exploratory pick");
            let choice = TeamChoice {
                agent_id: agent_id.clone(),
                key,
                sampled_score: 0.5,
                warmup: true,
                runner_up: None,
            };
            self.emit_team_event(mission_id, role, &choice).await;
            return Ok(choice);
        }

        // Warmup counts total selections under this context key; the first
        // warmup_runs picks stay exploratory, the next honors the posterior.
        let total_runs: i64 = rows.iter().map(|(_, _, f)| f.map(|f| f.0).unwrap_or(0)).sum();
        let warmup = total_runs < self.config.warmup_runs;

        let choice = if warmup {
            // Uniform over the least-run cohort, so every candidate explores
            let fewest = rows.iter().map(|(_, _, f)| f.map(|f| f.0).unwrap_or(0)).min().unwrap_or(0);
            let cohort: Vec<&(String, TeamKey, Option<(i64, i64, i64)>)> =
                rows.iter().filter(|(_, _, f)| f.map(|f| f.0).unwrap_or(0) == fewest).collect();
            let picked = cohort.choose(&mut rand::rng()).expect("cohort is non-empty");
            TeamChoice {
                agent_id: picked.0.clone(),
                key: picked.1.clone(),
                sampled_score: 0.5,
                warmup: true,
                runner_up: None,
            }
        } else {
            let mut sampled: Vec<(usize, f64)> = rows
                .iter()
                .enumerate()
                .map(|(i, (_, _, fitness))| {
                    let (wins, losses) = fitness.map(|(_, w, l)| (w, l)).unwrap_or((0, 0));
                    (i, sample_beta(wins, losses))
                })
                .collect();
            sampled.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            let (best_idx, best_score) = sampled[0];
            let runner_up = sampled.get(1).map(|(i, s)| (rows[*i].0.clone(), *s));
            TeamChoice {
                agent_id: rows[best_idx].0.clone(),
                key: rows[best_idx].1.clone(),
                sampled_score: best_score,
                warmup: false,
                runner_up,
            }
        };

        self.emit_team_event(mission_id, role, &choice).await;
        Ok(choice)
    }

    /// Pick a model for an agent from its category candidates
    pub async fn select_model(
        &self,
        mission_id: &str,
        agent: &AgentDefinition,
        candidates: &[ModelBinding],
        pattern_id: &str,
        technology: &str,
        phase_type: &str,
    ) -> Result<Option<ModelChoice>, StateError> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut rows = Vec::with_capacity(candidates.len());
        for binding in candidates {
            let key = ModelKey {
                agent_id: agent.id.clone(),
                pattern_id: pattern_id.to_string(),
                technology: technology.to_string(),
                phase_type: phase_type.to_string(),
                llm_model: binding.model.clone(),
                llm_provider: binding.provider.clone(),
            };
            let fitness = self.state.get_model_fitness(key.clone()).await?;
            rows.push((binding.clone(), key, fitness.map(|f| (f.runs, f.wins, f.losses))));
        }

        let total_runs: i64 = rows.iter().map(|(_, _, f)| f.map(|f| f.0).unwrap_or(0)).sum();
        let warmup = total_runs < self.config.warmup_runs;

        let choice = if warmup {
            let fewest = rows.iter().map(|(_, _, f)| f.map(|f| f.0).unwrap_or(0)).min().unwrap_or(0);
            let cohort: Vec<&(ModelBinding, ModelKey, Option<(i64, i64, i64)>)> =
                rows.iter().filter(|(_, _, f)| f.map(|f| f.0).unwrap_or(0) == fewest).collect();
            let picked = cohort.choose(&mut rand::rng()).expect("cohort is non-empty");
            ModelChoice {
                binding: picked.0.clone(),
                key: picked.1.clone(),
                sampled_score: 0.5,
                warmup: true,
            }
        } else {
            let best = rows
                .iter()
                .map(|(binding, key, fitness)| {
                    let (wins, losses) = fitness.map(|(_, w, l)| (w, l)).unwrap_or((0, 0));
                    (binding, key, sample_beta(wins, losses))
                })
                .max_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal))
                .expect("candidates are non-empty");
            ModelChoice {
                binding: best.0.clone(),
                key: best.1.clone(),
                sampled_score: best.2,
                warmup: false,
            }
        };

        self.events
            .emit(CoreEvent::DarwinSelectedModel {
                mission_id: mission_id.to_string(),
                agent_id: agent.id.clone(),
                provider: choice.binding.provider.clone(),
                model: choice.binding.model.clone(),
            })
            .await;
        Ok(Some(choice))
    }

    /// Feed a gate outcome back into the fitness rows
    ///
    /// Warmup picks update too; `done_with_issues` touches nothing.
    pub async fn record_outcome(
        &self,
        team_keys: &[TeamKey],
        model_keys: &[ModelKey],
        outcome: PhaseOutcome,
    ) -> Result<(), StateError> {
        let win = match outcome {
            PhaseOutcome::Pass => true,
            PhaseOutcome::Fail => false,
            PhaseOutcome::DoneWithIssues => {
                debug!("Phase closed with issues; fitness untouched");
                return Ok(());
            }
        };

        for key in team_keys {
            let row = self.state.update_team_fitness(key.clone(), win).await?;
            debug!(agent = %key.agent_id, wins = row.wins, losses = row.losses, score = row.score, "Team fitness updated");
        }
        for key in model_keys {
            self.state.update_model_fitness(key.clone(), win).await?;
        }
        Ok(())
    }

    /// Whether the selection warrants a shadow run: top candidates within
    /// delta, or the random exploration coin
    pub fn wants_shadow(&self, choice: &TeamChoice) -> bool {
        if choice.warmup {
            return false;
        }
        if let Some((_, runner_score)) = &choice.runner_up
            && (choice.sampled_score - runner_score).abs() * 100.0 < self.config.ab_delta
        {
            return true;
        }
        rand::rng().random_bool(self.config.ab_random_p.clamp(0.0, 1.0))
    }

    async fn team_row_with_backoff(
        &self,
        agent_id: &str,
        pattern_id: &str,
        technology: &str,
        phase_type: &str,
    ) -> Result<(TeamKey, Option<(i64, i64, i64)>), StateError> {
        let chain = technology_backoff(technology);
        let exact = TeamKey {
            agent_id: agent_id.to_string(),
            pattern_id: pattern_id.to_string(),
            technology: technology.to_string(),
            phase_type: phase_type.to_string(),
        };
        for tech in &chain {
            let key = TeamKey {
                technology: tech.clone(),
                ..exact.clone()
            };
            if let Some(row) = self.state.get_team_fitness(key.clone()).await? {
                return Ok((key, Some((row.runs, row.wins, row.losses))));
            }
        }
        // Cold key: updates go against the exact technology
        Ok((exact, None))
    }

    fn starved_candidate(&self, rows: &[(String, TeamKey, Option<(i64, i64, i64)>)]) -> Option<(String, TeamKey)> {
        let floor = Duration::from_secs(self.config.fairness_floor_min.max(0) as u64 * 60);
        let mut first_seen = self.first_seen.lock().unwrap();
        let any_warm = rows.iter().any(|(_, _, f)| f.map(|f| f.0).unwrap_or(0) >= self.config.warmup_runs);
        for (agent_id, key, fitness) in rows {
            let runs = fitness.map(|f| f.0).unwrap_or(0);
            if runs > 0 {
                continue;
            }
            let tag = format!("{}|{}|{}|{}", key.agent_id, key.pattern_id, key.technology, key.phase_type);
            let seen = *first_seen.entry(tag).or_insert_with(Instant::now);
            if any_warm && seen.elapsed() >= floor {
                return Some((agent_id.clone(), key.clone()));
            }
        }
        None
    }

    async fn emit_team_event(&self, mission_id: &str, role: Role, choice: &TeamChoice) {
        self.events
            .emit(CoreEvent::DarwinSelectedTeam {
                mission_id: mission_id.to_string(),
                role: role.as_str().to_string(),
                agent_id: choice.agent_id.clone(),
                sampled_score: choice.sampled_score,
            })
            .await;
    }
}

/// One Thompson sample from Beta(wins+1, losses+1)
fn sample_beta(wins: i64, losses: i64) -> f64 {
    let beta = Beta::new(wins as f64 + 1.0, losses as f64 + 1.0).expect("valid beta parameters");
    beta.sample(&mut rand::rng())
}
