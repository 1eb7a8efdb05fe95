//! Safety filter for planner-proposed commands
//!
//! Every command the planner proposes is matched against a denylist of
//! regular expressions before it can reach the executor. A match is never
//! fatal: the orchestrator records the command as skipped and moves on.
//!
//! The built-in patterns cover:
//! - deletion of the root filesystem (`rm -rf /`, `rm -rf "/"`, `rm -rf //`, `--no-preserve-root`)
//! - raw writes to block devices (`dd of=/dev/sda`, `> /dev/nvme0n1`)
//! - filesystem formatting (`mkfs.*`, `wipefs`)
//! - fork bombs (`:(){ :|:& };:`)
//!
//! # Example
//!
//! ```
//! use sleuth_engine::orchestrator::safety::SafetyFilter;
//!
//! let filter = SafetyFilter::new().unwrap();
//! assert!(filter.is_dangerous("rm -rf /"));
//! assert!(!filter.is_dangerous("fail2ban-client status"));
//! ```

use regex::Regex;
use sdk::errors::EngineError;

/// Built-in dangerous command patterns
pub const DEFAULT_DANGEROUS_PATTERNS: &[&str] = &[
    // rm of the root with any flags, quoted or spelled //, /. or /*
    r#"\brm\s+(-\S+\s+)*['"]?(/+\.?)+\*?['"]?(\s|;|&|\||$)"#,
    r"\brm\b.*--no-preserve-root",
    // raw block device writes
    r"\bdd\b.*\bof=/dev/(sd|hd|vd|xvd|nvme|mmcblk|md|dm-)",
    r">\s*/dev/(sd|hd|vd|xvd|nvme|mmcblk|md|dm-)",
    // formatting
    r"\bmkfs(\.\w+)?\b",
    r"\bwipefs\b",
    // fork bomb
    r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
];

/// Denylist matcher for shell commands
#[derive(Debug, Clone)]
pub struct SafetyFilter {
    patterns: Vec<Regex>,
}

impl SafetyFilter {
    /// Create a filter with the built-in patterns
    ///
    /// # Errors
    ///
    /// Returns an error if a built-in pattern fails to compile (should never
    /// happen with the hardcoded patterns).
    pub fn new() -> Result<Self, EngineError> {
        Self::with_patterns(DEFAULT_DANGEROUS_PATTERNS)
    }

    /// Create a filter with exactly `patterns`, replacing the built-in set
    pub fn with_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, EngineError> {
        Ok(Self {
            patterns: compile(patterns)?,
        })
    }

    /// Append extra patterns to the filter
    pub fn extend<S: AsRef<str>>(mut self, patterns: &[S]) -> Result<Self, EngineError> {
        self.patterns.extend(compile(patterns)?);
        Ok(self)
    }

    /// Whether the command matches any dangerous pattern
    pub fn is_dangerous(&self, command: &str) -> bool {
        match self.matching_pattern(command) {
            Some(pattern) => {
                tracing::warn!("Command blocked by pattern '{}': {}", pattern, command);
                true
            }
            None => false,
        }
    }

    /// The first pattern the command matches, if any
    pub fn matching_pattern(&self, command: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|re| re.is_match(command))
            .map(Regex::as_str)
    }

    /// All active patterns, in match order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }
}

fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Regex>, EngineError> {
    patterns
        .iter()
        .map(|p| {
            let p = p.as_ref();
            Regex::new(p).map_err(|e| EngineError::InvalidPattern {
                pattern: p.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}
