//! Defensive parsing of planner replies
//!
//! Models are asked for JSON but reply with whatever they like:
//! 1. Raw JSON: `{"commands": [...]}`
//! 2. Fenced JSON, with or without surrounding prose
//! 3. JSON embedded in prose
//! 4. No JSON at all (plain prose, or a bare shell command)
//!
//! Every helper here returns `Option` so each call site can pick its own
//! fallback.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Strip a surrounding markdown code fence if present.
///
/// Returns the fence body when the text contains a fenced block, otherwise
/// the trimmed input unchanged.
pub fn strip_fence(content: &str) -> &str {
    let trimmed = content.trim();
    extract_fenced_body(trimmed).map(str::trim).unwrap_or(trimmed)
}

/// Parse a planner reply into `T`, requiring the JSON object to carry `key`.
///
/// Tries, in order: the fence-stripped reply as a whole, then every balanced
/// `{...}` object found in the reply that mentions `"key"`.
pub fn parse_object<T: DeserializeOwned>(content: &str, key: &str) -> Option<T> {
    let body = strip_fence(content);

    if let Some(value) = parse_with_key(body, key) {
        return serde_json::from_value(value).ok();
    }

    let needle = format!("\"{}\"", key);
    for (pos, _) in content.match_indices('{') {
        let Some(candidate) = extract_balanced_json(&content[pos..]) else {
            continue;
        };
        if !candidate.contains(&needle) {
            continue;
        }
        if let Some(value) = parse_with_key(candidate, key) {
            if let Ok(parsed) = serde_json::from_value(value) {
                return Some(parsed);
            }
        }
    }

    None
}

fn parse_with_key(s: &str, key: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(s).ok()?;
    value.get(key)?;
    Some(value)
}

/// Whether a reply looks like a bare shell command rather than JSON or prose.
///
/// Models sometimes answer a yes/no JSON question with the next command they
/// want to run. A single line without braces or sentence punctuation, whose
/// first word is shaped like a program name and which carries some shell
/// syntax (a flag, a pipe, a path, `sudo`, or a hyphenated tool name), is
/// treated as such.
pub fn looks_like_shell_command(content: &str) -> bool {
    let body = strip_fence(content);
    if body.is_empty() || body.contains('{') || body.lines().count() != 1 {
        return false;
    }
    if body.ends_with(['.', '!', '?', ':']) {
        return false;
    }

    let mut words = body.split_whitespace();
    let Some(mut program) = words.next() else {
        return false;
    };
    let has_sudo = program == "sudo";
    if has_sudo {
        match words.next() {
            Some(next) => program = next,
            None => return false,
        }
    }

    let program_shaped = program
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '/')
        && program
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_.-/".contains(c));

    let has_shell_syntax = has_sudo
        || body.contains('|')
        || body.contains(" -")
        || body.contains('/')
        || program.contains(['-', '_', '.']);

    program_shaped && has_shell_syntax
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
fn extract_fenced_body(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Plan {
        commands: Vec<String>,
    }

    #[test]
    fn test_raw_json() {
        let plan: Plan = parse_object(r#"{"commands": ["uptime"]}"#, "commands").unwrap();
        assert_eq!(plan.commands, vec!["uptime"]);
    }

    #[test]
    fn test_fenced_json_with_trailing_prose() {
        let reply = "```json\n{\"commands\": [\"df -h\"]}\n```\nThis checks disk usage.";
        let plan: Plan = parse_object(reply, "commands").unwrap();
        assert_eq!(plan.commands, vec!["df -h"]);
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let reply = r#"Sure! Here you go: {"commands": ["free -m"]} Let me know."#;
        let plan: Plan = parse_object(reply, "commands").unwrap();
        assert_eq!(plan.commands, vec!["free -m"]);
    }

    #[test]
    fn test_skips_objects_without_key() {
        let reply = r#"{"note": "x"} then {"commands": ["id"]}"#;
        let plan: Plan = parse_object(reply, "commands").unwrap();
        assert_eq!(plan.commands, vec!["id"]);
    }

    #[test]
    fn test_braces_inside_strings() {
        let reply = r#"{"commands": ["awk '{print $1}' /etc/passwd"]}"#;
        let plan: Plan = parse_object(reply, "commands").unwrap();
        assert_eq!(plan.commands, vec!["awk '{print $1}' /etc/passwd"]);
    }

    #[test]
    fn test_prose_yields_none() {
        assert!(parse_object::<Plan>("I think you should check the logs.", "commands").is_none());
    }

    #[test]
    fn test_wrong_shape_yields_none() {
        assert!(parse_object::<Plan>(r#"{"commands": "uptime"}"#, "commands").is_none());
    }

    #[test]
    fn test_shell_command_detection() {
        assert!(looks_like_shell_command("fail2ban-client status sshd"));
        assert!(looks_like_shell_command("```\nsudo iptables -L -n\n```"));
        assert!(looks_like_shell_command("journalctl -u nginx | tail -n 50"));

        assert!(!looks_like_shell_command("The task is not complete yet."));
        assert!(!looks_like_shell_command(r#"{"isComplete": true}"#));
        assert!(!looks_like_shell_command("no data yet\nneed more"));
        assert!(!looks_like_shell_command("need more data"));
        assert!(!looks_like_shell_command(""));
    }
}
