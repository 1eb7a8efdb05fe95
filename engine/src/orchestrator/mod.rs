//! Iterative command orchestration
//!
//! The [`Orchestrator`] answers a question by looping between a [`Planner`]
//! and an [`Executor`]:
//!
//! 1. The planner proposes an initial batch of commands
//! 2. Queued commands are drained one at a time through the [`SafetyFilter`]
//!    and the executor; each output feeds the [`ExtractorRegistry`]
//! 3. With the queue empty, the planner judges whether working memory
//!    answers the question
//! 4. If not, the planner proposes the next batch
//! 5. The loop ends on completion, on an exhausted planner, on the iteration
//!    or time budget, or on cancellation; all but cancellation go on to
//!    synthesize an answer
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sleuth_engine::command_executor::ShellExecutor;
//! use sleuth_engine::config::OrchestratorConfig;
//! use sleuth_engine::llm::ollama::OllamaProvider;
//! use sleuth_engine::orchestrator::{LlmPlanner, Orchestrator, SystemContext};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = OllamaProvider::new("http://localhost:11434", "llama3.1:8b", Duration::from_secs(120))?;
//! let planner = LlmPlanner::new(Arc::new(provider), Duration::from_secs(120));
//! let orchestrator = Orchestrator::new(
//!     Arc::new(planner),
//!     Arc::new(ShellExecutor::new()),
//!     OrchestratorConfig::default(),
//! )?;
//!
//! let result = orchestrator
//!     .orchestrate("how many IPs are blocked by fail2ban", SystemContext::detect(), CancellationToken::new())
//!     .await;
//! println!("{:?}", result.direct_answer);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use sdk::types::{CommandResult, OrchestrationResult, Outcome};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command_executor::Executor;
use crate::config::OrchestratorConfig;

pub mod context;
pub mod extractor;
pub mod memory;
pub mod parse;
pub mod planner;
pub mod planning;
pub mod safety;
pub mod synthesizer;

pub use context::{ExecutionContext, SystemContext};
pub use extractor::{Extractor, ExtractorRegistry};
pub use memory::WorkingMemory;
pub use planner::{LlmPlanner, Planner};
pub use planning::CoverageOverride;
pub use safety::SafetyFilter;

use planning::{is_task_complete, plan_initial_commands, plan_next_commands};
use synthesizer::synthesize_direct_answer;

/// Why the loop stopped without a completion verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    IterationBudget,
    TimeBudget,
    PlannerExhausted,
    Cancelled,
}

/// Orchestration loop states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopState {
    Planned,
    Executing,
    Evaluating,
    Replanning,
    Complete,
    Aborted(AbortReason),
    Error(String),
}

impl LoopState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Aborted(_) | Self::Error(_))
    }

    /// Map a terminal state to the caller-facing outcome
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::Complete => Some(Outcome::Completed),
            Self::Aborted(AbortReason::IterationBudget | AbortReason::TimeBudget) => {
                Some(Outcome::BudgetExhausted)
            }
            Self::Aborted(AbortReason::PlannerExhausted) => Some(Outcome::PlannerExhausted),
            Self::Aborted(AbortReason::Cancelled) => Some(Outcome::Cancelled),
            Self::Error(_) => Some(Outcome::PlanningFailed),
            _ => None,
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planned => write!(f, "planned"),
            Self::Executing => write!(f, "executing"),
            Self::Evaluating => write!(f, "evaluating"),
            Self::Replanning => write!(f, "replanning"),
            Self::Complete => write!(f, "complete"),
            Self::Aborted(reason) => write!(f, "aborted ({:?})", reason),
            Self::Error(e) => write!(f, "error ({})", e),
        }
    }
}

/// Drives planner, safety filter, executor and extractors for one question
pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    executor: Arc<dyn Executor>,
    config: OrchestratorConfig,
    safety: SafetyFilter,
    extractors: ExtractorRegistry,
}

impl Orchestrator {
    /// Build an orchestrator with the default extractors
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidPattern`] if a configured dangerous
    /// pattern does not compile.
    pub fn new(
        planner: Arc<dyn Planner>,
        executor: Arc<dyn Executor>,
        config: OrchestratorConfig,
    ) -> Result<Self, EngineError> {
        let safety = SafetyFilter::new()?.extend(&config.dangerous_patterns)?;
        Ok(Self {
            planner,
            executor,
            config,
            safety,
            extractors: ExtractorRegistry::with_defaults(),
        })
    }

    /// Replace the safety filter
    pub fn with_safety_filter(mut self, safety: SafetyFilter) -> Self {
        self.safety = safety;
        self
    }

    /// Replace the extractor registry
    pub fn with_extractors(mut self, extractors: ExtractorRegistry) -> Self {
        self.extractors = extractors;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Answer `question` by running diagnostic commands
    ///
    /// Always returns a structured result; failures are reported through
    /// `success`, `outcome` and `error`.
    pub async fn orchestrate(
        &self,
        question: &str,
        system: SystemContext,
        cancel: CancellationToken,
    ) -> OrchestrationResult {
        let mut ctx = ExecutionContext::new(question, system, cancel)
            .with_question_limit(self.config.max_question_length);

        info!("Starting orchestration {}: {}", ctx.run_id, ctx.prompt_question);

        let state = self.run_loop(&mut ctx).await;
        self.finish(ctx, state).await
    }

    async fn run_loop(&self, ctx: &mut ExecutionContext) -> LoopState {
        let commands = match plan_initial_commands(self.planner.as_ref(), ctx).await {
            Ok(commands) => commands,
            Err(e) if e.is_cancelled() => return LoopState::Aborted(AbortReason::Cancelled),
            Err(e) => {
                error!("Run {}: {}", ctx.run_id, e);
                return LoopState::Error(e.to_string());
            }
        };
        ctx.enqueue_new(commands);

        let policy = CoverageOverride::new(self.config.coverage_override);
        let mut state = LoopState::Planned;

        loop {
            if let Some(stop) = self.check_budgets(ctx) {
                return stop;
            }

            if let Some(command) = ctx.current_plan.pop_front() {
                transition(ctx, &mut state, LoopState::Executing);
                if self.run_command(ctx, command).await.is_err() {
                    return LoopState::Aborted(AbortReason::Cancelled);
                }
                continue;
            }

            transition(ctx, &mut state, LoopState::Evaluating);
            let verdict = match is_task_complete(self.planner.as_ref(), ctx, policy).await {
                Ok(verdict) => verdict,
                Err(_) => return LoopState::Aborted(AbortReason::Cancelled),
            };
            debug!(
                "Run {} completeness: {} ({:?}): {}",
                ctx.run_id, verdict.is_complete, verdict.source, verdict.reasoning
            );
            if verdict.is_complete {
                ctx.is_complete = true;
                return LoopState::Complete;
            }

            transition(ctx, &mut state, LoopState::Replanning);
            let reason = verdict.reasoning;
            let next = match plan_next_commands(self.planner.as_ref(), ctx, &reason).await {
                Ok(next) => next,
                Err(_) => return LoopState::Aborted(AbortReason::Cancelled),
            };
            let proposed = next.commands.len();
            let queued = ctx.enqueue_new(next.commands);
            if queued == 0 {
                info!(
                    "Run {}: planner has no new commands ({} proposed, all repeats)",
                    ctx.run_id, proposed
                );
                return LoopState::Aborted(AbortReason::PlannerExhausted);
            }
            debug!("Run {}: queued {} new command(s)", ctx.run_id, queued);
        }
    }

    /// Loop-top checks: cancellation, wall clock, iteration count
    fn check_budgets(&self, ctx: &ExecutionContext) -> Option<LoopState> {
        if ctx.is_cancelled() {
            return Some(LoopState::Aborted(AbortReason::Cancelled));
        }
        if ctx.elapsed() >= self.config.max_execution_time() {
            warn!(
                "Run {}: time budget of {}ms exhausted",
                ctx.run_id, self.config.max_execution_time_ms
            );
            return Some(LoopState::Aborted(AbortReason::TimeBudget));
        }
        if ctx.iteration >= self.config.max_iterations {
            warn!(
                "Run {}: iteration budget of {} exhausted",
                ctx.run_id, self.config.max_iterations
            );
            return Some(LoopState::Aborted(AbortReason::IterationBudget));
        }
        None
    }

    /// Gate, execute and extract a single command
    ///
    /// Only fails when the run is cancelled while the command is in flight.
    async fn run_command(
        &self,
        ctx: &mut ExecutionContext,
        command: String,
    ) -> Result<(), EngineError> {
        if self.safety.is_dangerous(&command) {
            ctx.results.push(CommandResult::blocked(&command));
            ctx.metadata.blocked_commands.push(command);
            ctx.iteration += 1;
            return Ok(());
        }

        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        debug!("Run {} executing [{}]: {}", ctx.run_id, ctx.iteration + 1, command);
        let cancel = ctx.cancel.clone();
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = self.executor.run(&command) => result,
        };

        match result {
            Ok(output) => {
                ctx.results.push(CommandResult::executed(&command, &output));
                let applied = self.extractors.extract(
                    &mut ctx.working_memory,
                    &command,
                    &output.output,
                    self.config.raw_output_limit,
                );
                if !applied.is_empty() {
                    debug!("Run {} extracted facts via {}", ctx.run_id, applied.join(", "));
                }
            }
            Err(e) => {
                warn!("Run {}: command '{}' failed: {}", ctx.run_id, command, e);
                ctx.results.push(CommandResult::failed(&command, e.to_string()));
            }
        }

        ctx.executed_commands.push(command);
        ctx.iteration += 1;
        Ok(())
    }

    async fn finish(&self, mut ctx: ExecutionContext, state: LoopState) -> OrchestrationResult {
        let mut outcome = state.outcome().unwrap_or(Outcome::PlannerExhausted);
        let mut error = match &state {
            LoopState::Error(e) => Some(e.clone()),
            LoopState::Aborted(AbortReason::Cancelled) => Some(EngineError::Cancelled.to_string()),
            _ => None,
        };

        if outcome.is_success() {
            match synthesize_direct_answer(self.planner.as_ref(), &mut ctx).await {
                Ok(answer) => ctx.direct_answer = Some(answer),
                Err(e) => {
                    outcome = Outcome::Cancelled;
                    error = Some(e.to_string());
                }
            }
        }

        let duration_ms = ctx.elapsed().as_millis() as u64;
        info!(
            "Orchestration {} finished: {} after {} iteration(s), {} planner call(s), {}ms",
            ctx.run_id, state, ctx.iteration, ctx.metadata.ai_calls, duration_ms
        );

        OrchestrationResult {
            success: outcome.is_success(),
            outcome,
            question: ctx.original_question,
            direct_answer: ctx.direct_answer,
            executed_commands: ctx.executed_commands,
            results: ctx.results,
            iterations: ctx.iteration,
            duration_ms,
            ai_calls: ctx.metadata.ai_calls,
            blocked_commands: ctx.metadata.blocked_commands,
            error,
        }
    }
}

fn transition(ctx: &ExecutionContext, state: &mut LoopState, next: LoopState) {
    if *state != next {
        debug!("Run {} state {} -> {}", ctx.run_id, state, next);
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(LoopState::Complete.is_terminal());
        assert!(LoopState::Aborted(AbortReason::TimeBudget).is_terminal());
        assert!(LoopState::Error("x".into()).is_terminal());
        assert!(!LoopState::Executing.is_terminal());
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(LoopState::Complete.outcome(), Some(Outcome::Completed));
        assert_eq!(
            LoopState::Aborted(AbortReason::IterationBudget).outcome(),
            Some(Outcome::BudgetExhausted)
        );
        assert_eq!(
            LoopState::Aborted(AbortReason::PlannerExhausted).outcome(),
            Some(Outcome::PlannerExhausted)
        );
        assert_eq!(
            LoopState::Aborted(AbortReason::Cancelled).outcome(),
            Some(Outcome::Cancelled)
        );
        assert_eq!(LoopState::Error("bad".into()).outcome(), Some(Outcome::PlanningFailed));
        assert_eq!(LoopState::Replanning.outcome(), None);
    }
}
