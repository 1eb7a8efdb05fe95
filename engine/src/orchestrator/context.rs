//! Per-run execution state

use sdk::types::CommandResult;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::memory::WorkingMemory;

/// Facts about the host that are passed to every planner call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemContext {
    pub os: String,
    pub distro: Option<String>,
    pub hostname: Option<String>,
}

impl SystemContext {
    pub fn new(os: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            distro: None,
            hostname: None,
        }
    }

    pub fn with_distro(mut self, distro: impl Into<String>) -> Self {
        self.distro = Some(distro.into());
        self
    }

    /// Detect the local host
    ///
    /// The distro comes from `PRETTY_NAME` in `/etc/os-release` and the
    /// hostname from `/etc/hostname`; both are optional.
    pub fn detect() -> Self {
        let distro = std::fs::read_to_string("/etc/os-release")
            .ok()
            .and_then(|contents| parse_pretty_name(&contents));

        let hostname = std::fs::read_to_string("/etc/hostname")
            .ok()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty());

        Self {
            os: std::env::consts::OS.to_string(),
            distro,
            hostname,
        }
    }

    /// One-line description used in prompts
    pub fn describe(&self) -> String {
        match &self.distro {
            Some(distro) => format!("{} ({})", self.os, distro),
            None => self.os.clone(),
        }
    }
}

fn parse_pretty_name(os_release: &str) -> Option<String> {
    os_release.lines().find_map(|line| {
        line.strip_prefix("PRETTY_NAME=")
            .map(|v| v.trim().trim_matches('"').to_string())
            .filter(|v| !v.is_empty())
    })
}

/// Bookkeeping reported back to the caller
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetadata {
    pub ai_calls: usize,
    pub blocked_commands: Vec<String>,
}

/// State of one `orchestrate` call
///
/// Created fresh per call and owned by the loop. Every step takes it by
/// `&mut`; nothing here outlives the call.
#[derive(Debug)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub original_question: String,
    /// Flattened and length-capped question used in prompts
    pub prompt_question: String,
    pub system_context: SystemContext,
    pub executed_commands: Vec<String>,
    pub results: Vec<CommandResult>,
    pub current_plan: VecDeque<String>,
    pub iteration: usize,
    pub is_complete: bool,
    pub direct_answer: Option<String>,
    pub metadata: ExecutionMetadata,
    pub working_memory: WorkingMemory,
    pub cancel: CancellationToken,
    pub started: Instant,
}

impl ExecutionContext {
    pub fn new(
        question: impl Into<String>,
        system_context: SystemContext,
        cancel: CancellationToken,
    ) -> Self {
        let original_question = question.into();
        Self {
            run_id: Uuid::new_v4(),
            prompt_question: sanitize_question(&original_question, usize::MAX),
            original_question,
            system_context,
            executed_commands: Vec::new(),
            results: Vec::new(),
            current_plan: VecDeque::new(),
            iteration: 0,
            is_complete: false,
            direct_answer: None,
            metadata: ExecutionMetadata::default(),
            working_memory: WorkingMemory::new(),
            cancel,
            started: Instant::now(),
        }
    }

    /// Cap the prompt question at `max_chars` characters
    pub fn with_question_limit(mut self, max_chars: usize) -> Self {
        self.prompt_question = sanitize_question(&self.original_question, max_chars);
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the command already ran, was blocked, or is waiting in the plan
    pub fn is_known_command(&self, command: &str) -> bool {
        self.executed_commands.iter().any(|c| c == command)
            || self.metadata.blocked_commands.iter().any(|c| c == command)
            || self.current_plan.iter().any(|c| c == command)
    }

    /// Queue commands that are new to this run, returning how many were queued
    pub fn enqueue_new(&mut self, commands: impl IntoIterator<Item = String>) -> usize {
        let mut queued = 0;
        for command in commands {
            let command = command.trim().to_string();
            if command.is_empty() || self.is_known_command(&command) {
                continue;
            }
            self.current_plan.push_back(command);
            queued += 1;
        }
        queued
    }
}

/// Flatten newlines and cap the question at `max_chars` characters
pub fn sanitize_question(question: &str, max_chars: usize) -> String {
    let flattened: String = question
        .trim()
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();

    match flattened.char_indices().nth(max_chars) {
        Some((idx, _)) => flattened[..idx].to_string(),
        None => flattened,
    }
}
