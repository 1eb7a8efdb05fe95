//! Planner conversations: initial plan, completeness, next steps
//!
//! Each function builds one prompt, makes one planner call, and parses the
//! reply defensively. Only [`plan_initial_commands`] can fail the run; the
//! others always produce a usable value unless the run was cancelled.

use sdk::errors::EngineError;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::context::ExecutionContext;
use super::memory::{Discovered, WorkingMemory};
use super::parse::{looks_like_shell_command, parse_object};
use super::planner::Planner;

/// Ask the planner once, counting the call and honouring cancellation
pub(crate) async fn consult(
    planner: &dyn Planner,
    ctx: &mut ExecutionContext,
    prompt: &str,
) -> Result<String, EngineError> {
    if ctx.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    ctx.metadata.ai_calls += 1;

    let cancel = ctx.cancel.clone();
    tokio::select! {
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        reply = planner.ask(prompt, &ctx.system_context, &cancel) => reply,
    }
}

#[derive(Debug, Deserialize)]
struct CommandList {
    commands: Vec<String>,
}

fn clean_commands(commands: Vec<String>) -> Vec<String> {
    commands
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

pub fn initial_prompt(ctx: &ExecutionContext) -> String {
    format!(
        "Question: {question}\n\
         System: {system}\n\n\
         Propose the shell commands needed to answer the question.\n\
         Reply with JSON only: {{\"commands\": [\"command 1\", \"command 2\"]}}",
        question = ctx.prompt_question,
        system = ctx.system_context.describe(),
    )
}

/// Obtain the first batch of commands
///
/// # Errors
///
/// Returns [`EngineError::PlanningFailed`] when no `{"commands": [...]}`
/// object can be parsed from the reply, [`EngineError::Cancelled`] on cancellation, and the planner's
/// own error when the call fails.
pub async fn plan_initial_commands(
    planner: &dyn Planner,
    ctx: &mut ExecutionContext,
) -> Result<Vec<String>, EngineError> {
    let prompt = initial_prompt(ctx);
    let reply = consult(planner, ctx, &prompt).await?;

    let Some(list) = parse_object::<CommandList>(&reply, "commands") else {
        warn!("Initial plan unusable: {}", reply.chars().take(200).collect::<String>());
        return Err(EngineError::PlanningFailed(
            "planner reply did not contain a command list".to_string(),
        ));
    };

    // An empty list is valid; the loop goes straight to the completeness check
    let commands = clean_commands(list.commands);
    info!("Initial plan: {} command(s)", commands.len());
    Ok(commands)
}

/// Where a completeness verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictSource {
    /// The planner's own parsed verdict
    Planner,
    /// The planner answered with a shell command instead of a verdict
    ShellCommandReply,
    /// Decided by [`CoverageOverride`]
    CoverageOverride,
    /// Unparseable reply with nothing to override it
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completeness {
    pub is_complete: bool,
    pub reasoning: String,
    pub source: VerdictSource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompletenessReply {
    is_complete: bool,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Treat the task as complete once every discovered item has data
///
/// Always consulted when the planner's verdict cannot be parsed. When
/// `overrides_verdict` is set it also overturns an explicit "incomplete"
/// verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoverageOverride {
    pub overrides_verdict: bool,
}

impl CoverageOverride {
    pub fn new(overrides_verdict: bool) -> Self {
        Self { overrides_verdict }
    }

    /// Whether working memory covers every discovered list item
    pub fn is_satisfied(&self, memory: &WorkingMemory) -> bool {
        memory.iteration_hint().is_covered()
    }

    fn verdict(&self, memory: &WorkingMemory, reason: &str) -> Completeness {
        if self.is_satisfied(memory) {
            Completeness {
                is_complete: true,
                reasoning: format!(
                    "every discovered item has extracted data ({} item(s))",
                    memory.discovered.lists.len()
                ),
                source: VerdictSource::CoverageOverride,
            }
        } else {
            Completeness {
                is_complete: false,
                reasoning: reason.to_string(),
                source: VerdictSource::Fallback,
            }
        }
    }
}

impl Default for CoverageOverride {
    fn default() -> Self {
        Self::new(true)
    }
}

pub fn completeness_prompt(ctx: &ExecutionContext) -> String {
    format!(
        "Question: {question}\n\n\
         Working memory:\n{memory}\n\n\
         Is the working memory enough to answer the question completely?\n\
         Reply with JSON only: {{\"isComplete\": true|false, \"reasoning\": \"why\"}}",
        question = ctx.prompt_question,
        memory = ctx.working_memory.to_prompt_json(),
    )
}

/// Ask whether the collected data answers the question
///
/// # Errors
///
/// Only [`EngineError::Cancelled`]; every other failure degrades to a verdict.
pub async fn is_task_complete(
    planner: &dyn Planner,
    ctx: &mut ExecutionContext,
    policy: CoverageOverride,
) -> Result<Completeness, EngineError> {
    let prompt = completeness_prompt(ctx);
    let reply = match consult(planner, ctx, &prompt).await {
        Ok(reply) => reply,
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            warn!("Completeness check failed: {}", e);
            return Ok(policy.verdict(&ctx.working_memory, "completeness check failed"));
        }
    };

    if let Some(parsed) = parse_object::<CompletenessReply>(&reply, "isComplete") {
        let reasoning = parsed.reasoning.unwrap_or_default();
        if parsed.is_complete {
            return Ok(Completeness {
                is_complete: true,
                reasoning,
                source: VerdictSource::Planner,
            });
        }
        if policy.overrides_verdict && policy.is_satisfied(&ctx.working_memory) {
            info!("Planner said incomplete but every discovered item has data; overriding");
            return Ok(policy.verdict(&ctx.working_memory, &reasoning));
        }
        return Ok(Completeness {
            is_complete: false,
            reasoning,
            source: VerdictSource::Planner,
        });
    }

    if looks_like_shell_command(&reply) {
        debug!("Completeness reply was a shell command: {}", reply.trim());
        return Ok(Completeness {
            is_complete: false,
            reasoning: "more data is needed".to_string(),
            source: VerdictSource::ShellCommandReply,
        });
    }

    debug!("Completeness reply unparseable, applying coverage override");
    Ok(policy.verdict(&ctx.working_memory, "more data is needed"))
}

/// Planner-supplied working memory update
#[derive(Debug, Default, Deserialize)]
pub struct MemoryUpdate {
    #[serde(default)]
    pub discovered: Option<Discovered>,
    #[serde(default)]
    pub hypothesis: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NextReply {
    commands: Vec<String>,
    #[serde(default)]
    update_memory: Option<MemoryUpdate>,
}

/// Result of a next-step planning call, after memory updates are applied
#[derive(Debug, Default)]
pub struct NextPlan {
    pub commands: Vec<String>,
    pub update_memory: Option<MemoryUpdate>,
}

/// Directive telling the planner which list items still need a command
pub fn iteration_directive(memory: &WorkingMemory) -> Option<String> {
    if memory.discovered.lists.is_empty() {
        return None;
    }
    let hint = memory.iteration_hint();

    let mut directive = format!(
        "MANDATORY: issue exactly one command per item still missing data: [{}].",
        hint.pending.join(", ")
    );
    if !hint.covered.is_empty() {
        directive.push_str(&format!(
            " These items already have data, do not query them again: [{}].",
            hint.covered.join(", ")
        ));
    }
    if let Some(template) = &memory.discovered.follow_up {
        directive.push_str(&format!(" Per-item command pattern: {}", template));
    }
    Some(directive)
}

pub fn next_step_prompt(ctx: &ExecutionContext, reason: &str) -> String {
    let mut prompt = format!(
        "Question: {question}\n\n\
         Working memory:\n{memory}\n\n\
         The task is not complete yet: {reason}\n",
        question = ctx.prompt_question,
        memory = ctx.working_memory.to_prompt_json(),
        reason = reason,
    );
    if let Some(directive) = iteration_directive(&ctx.working_memory) {
        prompt.push_str(&directive);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nReply with JSON only: {\"commands\": [\"...\"], \
         \"updateMemory\": {\"discovered\": {\"lists\": [], \"entities\": {}, \"needsIteration\": []}, \
         \"hypothesis\": \"...\"}}",
    );
    prompt
}

/// Ask for the next batch of commands
///
/// Merges any `updateMemory` into working memory. When the planner proposes
/// commands, follow-up commands for pending items it left out are appended.
/// An explicit empty list is returned as is and ends the loop. An unusable
/// reply yields the follow-up commands alone, which may be empty.
///
/// # Errors
///
/// Only [`EngineError::Cancelled`].
pub async fn plan_next_commands(
    planner: &dyn Planner,
    ctx: &mut ExecutionContext,
    reason: &str,
) -> Result<NextPlan, EngineError> {
    let prompt = next_step_prompt(ctx, reason);
    let reply = match consult(planner, ctx, &prompt).await {
        Ok(reply) => Some(reply),
        Err(e) if e.is_cancelled() => return Err(e),
        Err(e) => {
            warn!("Next-step planning failed: {}", e);
            None
        }
    };

    let parsed = reply.as_deref().and_then(|r| parse_object::<NextReply>(r, "commands"));
    let Some(parsed) = parsed else {
        let commands = ctx.working_memory.follow_up_commands();
        debug!(
            "Next-step reply unusable, falling back to {} follow-up command(s)",
            commands.len()
        );
        return Ok(NextPlan {
            commands,
            update_memory: None,
        });
    };

    if let Some(update) = &parsed.update_memory {
        if let Some(discovered) = &update.discovered {
            ctx.working_memory.merge_discovered(discovered.clone());
        }
        if let Some(hypothesis) = &update.hypothesis {
            ctx.working_memory.set_hypothesis(hypothesis.clone());
        }
    }

    let mut commands = clean_commands(parsed.commands);
    if commands.is_empty() {
        debug!("Planner proposed no further commands");
        return Ok(NextPlan {
            commands,
            update_memory: parsed.update_memory,
        });
    }
    for follow_up in ctx.working_memory.follow_up_commands() {
        if !commands.contains(&follow_up) {
            commands.push(follow_up);
        }
    }

    Ok(NextPlan {
        commands,
        update_memory: parsed.update_memory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::context::SystemContext;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Replies with a fixed script, one entry per call
    struct Script(Mutex<Vec<Result<String, EngineError>>>);

    impl Script {
        fn new(replies: Vec<Result<&str, EngineError>>) -> Self {
            let mut replies: Vec<_> = replies.into_iter().map(|r| r.map(str::to_string)).collect();
            replies.reverse();
            Self(Mutex::new(replies))
        }
    }

    #[async_trait]
    impl Planner for Script {
        async fn ask(
            &self,
            _prompt: &str,
            _system: &SystemContext,
            _cancel: &CancellationToken,
        ) -> Result<String, EngineError> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(EngineError::LLMProvider("script exhausted".into())))
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            "how many IPs are blocked by fail2ban",
            SystemContext::new("linux"),
            CancellationToken::new(),
        )
    }

    fn with_jails(ctx: &mut ExecutionContext, covered: &[&str]) {
        let memory = &mut ctx.working_memory;
        memory.discovered.lists = vec!["sshd".into(), "apache".into()];
        memory.discovered.follow_up = Some("fail2ban-client status {item}".into());
        let jails: serde_json::Map<_, _> = covered
            .iter()
            .map(|j| (j.to_string(), json!({"currently_banned": 1})))
            .collect();
        memory.data_extracted.facts.insert("jails".into(), jails.into());
    }

    #[tokio::test]
    async fn test_initial_plan_parsed() {
        let planner = Script::new(vec![Ok("```json\n{\"commands\": [\"fail2ban-client status\"]}\n```")]);
        let mut ctx = ctx();

        let commands = plan_initial_commands(&planner, &mut ctx).await.unwrap();
        assert_eq!(commands, vec!["fail2ban-client status"]);
        assert_eq!(ctx.metadata.ai_calls, 1);
    }

    #[tokio::test]
    async fn test_initial_plan_prose_is_fatal() {
        let planner = Script::new(vec![Ok("You should look at fail2ban.")]);
        let err = plan_initial_commands(&planner, &mut ctx()).await.unwrap_err();
        assert!(matches!(err, EngineError::PlanningFailed(_)));
    }

    #[tokio::test]
    async fn test_initial_plan_empty_list_is_not_fatal() {
        let planner = Script::new(vec![Ok("{\"commands\": [\"  \"]}")]);
        let commands = plan_initial_commands(&planner, &mut ctx()).await.unwrap();
        assert!(commands.is_empty());
    }

    #[tokio::test]
    async fn test_prose_verdict_is_incomplete() {
        let planner = Script::new(vec![Ok("I believe we need more information about the jails.")]);
        let verdict = is_task_complete(&planner, &mut ctx(), CoverageOverride::default())
            .await
            .unwrap();

        assert!(!verdict.is_complete);
        assert!(!verdict.reasoning.is_empty());
        assert_eq!(verdict.source, VerdictSource::Fallback);
    }

    #[tokio::test]
    async fn test_shell_command_verdict_is_incomplete() {
        let mut ctx = ctx();
        with_jails(&mut ctx, &["sshd", "apache"]);
        let planner = Script::new(vec![Ok("fail2ban-client status sshd")]);

        let verdict = is_task_complete(&planner, &mut ctx, CoverageOverride::default())
            .await
            .unwrap();
        assert!(!verdict.is_complete);
        assert_eq!(verdict.source, VerdictSource::ShellCommandReply);
    }

    #[tokio::test]
    async fn test_unparseable_verdict_with_full_coverage_completes() {
        let mut ctx = ctx();
        with_jails(&mut ctx, &["sshd", "apache"]);
        let planner = Script::new(vec![Ok("hmm, hard to say")]);

        let verdict = is_task_complete(&planner, &mut ctx, CoverageOverride::new(false))
            .await
            .unwrap();
        assert!(verdict.is_complete);
        assert_eq!(verdict.source, VerdictSource::CoverageOverride);
    }

    #[tokio::test]
    async fn test_explicit_incomplete_overridden_only_when_enabled() {
        let reply = r#"{"isComplete": false, "reasoning": "want more"}"#;

        let mut ctx_on = ctx();
        with_jails(&mut ctx_on, &["sshd", "apache"]);
        let verdict = is_task_complete(&Script::new(vec![Ok(reply)]), &mut ctx_on, CoverageOverride::new(true))
            .await
            .unwrap();
        assert!(verdict.is_complete);

        let mut ctx_off = ctx();
        with_jails(&mut ctx_off, &["sshd", "apache"]);
        let verdict = is_task_complete(&Script::new(vec![Ok(reply)]), &mut ctx_off, CoverageOverride::new(false))
            .await
            .unwrap();
        assert!(!verdict.is_complete);
        assert_eq!(verdict.reasoning, "want more");
    }

    #[tokio::test]
    async fn test_completeness_transport_error_degrades() {
        let planner = Script::new(vec![Err(EngineError::LLMTimeout)]);
        let verdict = is_task_complete(&planner, &mut ctx(), CoverageOverride::default())
            .await
            .unwrap();
        assert!(!verdict.is_complete);
    }

    #[test]
    fn test_directive_names_pending_and_covered() {
        let mut ctx = ctx();
        with_jails(&mut ctx, &["sshd"]);

        let directive = iteration_directive(&ctx.working_memory).unwrap();
        assert!(directive.contains("[apache]"));
        assert!(directive.contains("do not query them again: [sshd]"));
        assert!(iteration_directive(&WorkingMemory::new()).is_none());
    }

    #[tokio::test]
    async fn test_next_plan_merges_memory_and_adds_follow_ups() {
        let mut ctx = ctx();
        with_jails(&mut ctx, &[]);
        let planner = Script::new(vec![Ok(r#"{
            "commands": ["fail2ban-client status sshd"],
            "updateMemory": {
                "discovered": {"lists": ["recidive"], "entities": {"total_jails": 3}},
                "hypothesis": "three jails"
            }
        }"#)]);

        let plan = plan_next_commands(&planner, &mut ctx, "need per-jail data").await.unwrap();

        assert_eq!(
            plan.commands,
            vec![
                "fail2ban-client status sshd",
                "fail2ban-client status apache",
                "fail2ban-client status recidive",
            ]
        );
        assert_eq!(ctx.working_memory.discovered.lists, vec!["sshd", "apache", "recidive"]);
        assert_eq!(ctx.working_memory.discovered.entities["total_jails"], json!(3));
        assert_eq!(ctx.working_memory.hypothesis, "three jails");
    }

    #[tokio::test]
    async fn test_next_plan_parse_failure_falls_back_to_follow_ups() {
        let mut ctx = ctx();
        with_jails(&mut ctx, &["sshd"]);
        let planner = Script::new(vec![Ok("Let me think about this.")]);

        let plan = plan_next_commands(&planner, &mut ctx, "missing apache").await.unwrap();
        assert_eq!(plan.commands, vec!["fail2ban-client status apache"]);
        assert!(plan.update_memory.is_none());
    }

    #[tokio::test]
    async fn test_explicit_empty_next_plan_gets_no_follow_ups() {
        let mut ctx = ctx();
        with_jails(&mut ctx, &["sshd"]);
        let planner = Script::new(vec![Ok(r#"{"commands": []}"#)]);

        let plan = plan_next_commands(&planner, &mut ctx, "missing apache").await.unwrap();
        assert!(plan.commands.is_empty());
    }

    #[tokio::test]
    async fn test_next_plan_without_lists_may_be_empty() {
        let planner = Script::new(vec![Ok("nothing else to try")]);
        let plan = plan_next_commands(&planner, &mut ctx(), "unclear").await.unwrap();
        assert!(plan.commands.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let planner = Script::new(vec![Ok("{\"commands\": [\"uptime\"]}")]);
        let mut ctx = ctx();
        ctx.cancel.cancel();

        let err = plan_initial_commands(&planner, &mut ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(ctx.metadata.ai_calls, 0);
    }
}
