//! Planner contract
//!
//! The orchestrator talks to its language model through [`Planner`]: one
//! prompt in, one free-text reply out. [`LlmPlanner`] adapts any
//! [`LLMProvider`] to that contract and owns the system prompt, the per-call
//! timeout, and cancellation.

use async_trait::async_trait;
use sdk::errors::EngineError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::context::SystemContext;
use crate::llm::{LLMProvider, Message};

/// Source of plans, verdicts and answers
#[async_trait]
pub trait Planner: Send + Sync {
    /// Send one prompt and return the raw reply
    ///
    /// Must return [`EngineError::Cancelled`] promptly once `cancel` fires.
    async fn ask(
        &self,
        prompt: &str,
        system: &SystemContext,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError>;
}

/// Planner backed by an LLM provider
pub struct LlmPlanner {
    provider: Arc<dyn LLMProvider>,
    timeout: Duration,
    verbose: bool,
}

impl LlmPlanner {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            verbose: false,
        }
    }

    /// Log prompts and replies at info level
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn system_prompt(system: &SystemContext) -> String {
        let mut prompt = String::from(
            "You are a Linux diagnostics assistant. You answer questions about the \
             machine you are running on by proposing read-only shell commands and \
             reasoning over their output.\n\n\
             Rules:\n\
             - Reply with exactly the JSON object the user message asks for\n\
             - No markdown fences, no explanation outside the JSON\n\
             - Propose one command per array entry; pipelines are allowed\n\
             - Never propose commands that modify or destroy data\n",
        );
        prompt.push_str(&format!("\nOperating system: {}\n", system.describe()));
        if let Some(hostname) = &system.hostname {
            prompt.push_str(&format!("Hostname: {}\n", hostname));
        }
        prompt
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn ask(
        &self,
        prompt: &str,
        system: &SystemContext,
        cancel: &CancellationToken,
    ) -> Result<String, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        if self.verbose {
            tracing::info!("Planner prompt ({}):\n{}", self.provider.name(), prompt);
        } else {
            tracing::debug!("Planner prompt: {} chars", prompt.len());
        }

        let messages = [Message::system(Self::system_prompt(system)), Message::user(prompt)];
        let start = Instant::now();

        let reply = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.provider.generate(&messages)) => {
                match result {
                    Ok(reply) => reply?,
                    Err(_) => {
                        tracing::warn!("Planner call timed out after {}s", self.timeout.as_secs());
                        return Err(EngineError::LLMTimeout);
                    }
                }
            }
        };

        if self.verbose {
            tracing::info!(
                "Planner reply in {:.1}s:\n{}",
                start.elapsed().as_secs_f64(),
                reply
            );
        } else {
            tracing::debug!(
                "Planner reply in {:.1}s: {} chars",
                start.elapsed().as_secs_f64(),
                reply.len()
            );
        }

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LLMError, Result as LlmResult};

    struct Echo;

    #[async_trait]
    impl LLMProvider for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn is_local(&self) -> bool {
            true
        }
        async fn generate(&self, messages: &[Message]) -> LlmResult<String> {
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    struct Stalled;

    #[async_trait]
    impl LLMProvider for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }
        fn is_local(&self) -> bool {
            true
        }
        async fn generate(&self, _messages: &[Message]) -> LlmResult<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(LLMError::Timeout)
        }
    }

    fn linux() -> SystemContext {
        SystemContext::new("linux").with_distro("Debian 12")
    }

    #[tokio::test]
    async fn test_reply_passed_through() {
        let planner = LlmPlanner::new(Arc::new(Echo), Duration::from_secs(5));
        let reply = planner
            .ask("{\"commands\": []}", &linux(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(reply, "{\"commands\": []}");
    }

    #[tokio::test]
    async fn test_timeout() {
        let planner = LlmPlanner::new(Arc::new(Stalled), Duration::from_millis(50));
        let err = planner
            .ask("hi", &linux(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::LLMTimeout));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_call() {
        let planner = LlmPlanner::new(Arc::new(Stalled), Duration::from_secs(60));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = planner.ask("hi", &linux(), &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_system_prompt_mentions_os() {
        let prompt = LlmPlanner::system_prompt(&linux());
        assert!(prompt.contains("linux (Debian 12)"));
    }
}
