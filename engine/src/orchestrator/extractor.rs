//! Data extraction from command output
//!
//! After every executed command the registry caches the (truncated) raw
//! output in working memory and runs each [`Extractor`] whose predicate
//! matches the command. Extractors are pure: they turn `(command, output)`
//! into a [`MemoryPatch`], and the patch is merged additively.
//!
//! Built-in families:
//!
//! | Name | Command | Produces |
//! |---|---|---|
//! | `fail2ban-jails` | `fail2ban-client status` | jail list, `total_jails`, follow-up template |
//! | `fail2ban-jail` | `fail2ban-client status <jail>` | `jails.<jail>`, `total_banned_ips` |
//! | `systemd-failed` | `systemctl --failed` | `systemd.failed_units`, `failed_units` |
//! | `docker-ps` | `docker ps` | `docker.containers`, `running_containers` |
//! | `listening-ports` | `ss -l…`, `netstat -l…` | `network.listening_ports` |
//! | `line-count` | `… \| wc -l` | `counts.<command>` |

use serde_json::json;
use tracing::debug;

use super::memory::{MemoryPatch, WorkingMemory};

/// Turns one command's output into facts
pub trait Extractor: Send + Sync {
    /// Stable name used in logs
    fn name(&self) -> &str;

    /// Whether this extractor understands the command
    fn matches(&self, command: &str) -> bool;

    /// Build a patch from the command's output; empty when nothing parsed
    fn extract(&self, command: &str, output: &str) -> MemoryPatch;
}

/// Ordered set of extractors
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// Registry without any extractors (raw output is still cached)
    pub fn empty() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    /// Registry with the built-in families
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(Fail2banJails));
        registry.register(Box::new(Fail2banJail));
        registry.register(Box::new(SystemdFailed));
        registry.register(Box::new(DockerPs));
        registry.register(Box::new(ListeningPorts));
        registry.register(Box::new(LineCount));
        registry
    }

    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }

    /// Record `output` for `command` and apply every matching extractor
    ///
    /// Returns the names of the extractors that contributed facts.
    pub fn extract(
        &self,
        memory: &mut WorkingMemory,
        command: &str,
        output: &str,
        raw_limit: usize,
    ) -> Vec<String> {
        memory.record_raw(command, output, raw_limit);

        let mut applied = Vec::new();
        for extractor in self.extractors.iter().filter(|e| e.matches(command)) {
            let patch = extractor.extract(command, output);
            if patch.is_empty() {
                debug!("Extractor '{}' matched but found nothing", extractor.name());
                continue;
            }
            debug!("Extractor '{}' produced facts for: {}", extractor.name(), command);
            memory.apply_patch(patch);
            applied.push(extractor.name().to_string());
        }
        applied
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extractors", &self.names())
            .finish()
    }
}

/// Words of the first pipeline stage with a leading `sudo` and any
/// redirections (`2>/dev/null`, `2>&1`, `> out.txt`) removed
fn head_words(command: &str) -> Vec<&str> {
    let first_stage = command.split('|').next().unwrap_or_default();
    let mut words = Vec::new();
    let mut tokens = first_stage.split_whitespace();
    while let Some(token) = tokens.next() {
        match redirect_target(token) {
            // Bare operator: the target is the next token
            Some("") => {
                tokens.next();
            }
            Some(_) => {}
            None => words.push(token),
        }
    }
    if words.first() == Some(&"sudo") {
        words.remove(0);
    }
    words
}

/// For a redirection token, whatever follows the operator
fn redirect_target(token: &str) -> Option<&str> {
    let rest = token.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = rest.strip_prefix('&').unwrap_or(rest);
    if !rest.starts_with(['<', '>']) {
        return None;
    }
    Some(rest.trim_start_matches(['<', '>']))
}

/// Value of a `label: value` line in tree-shaped output (`|- Label:\tvalue`)
fn labelled_value<'a>(output: &'a str, label: &str) -> Option<&'a str> {
    output.lines().find_map(|line| {
        let line = line.trim_start_matches(|c: char| "|`- \t".contains(c));
        let (name, value) = line.split_once(':')?;
        (name.trim().eq_ignore_ascii_case(label)).then(|| value.trim())
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `fail2ban-client status` without a jail argument
struct Fail2banJails;

impl Extractor for Fail2banJails {
    fn name(&self) -> &str {
        "fail2ban-jails"
    }

    fn matches(&self, command: &str) -> bool {
        head_words(command) == ["fail2ban-client", "status"]
    }

    fn extract(&self, _command: &str, output: &str) -> MemoryPatch {
        let Some(list) = labelled_value(output, "Jail list") else {
            return MemoryPatch::default();
        };
        let jails = split_list(list);
        if jails.is_empty() {
            return MemoryPatch::default().with_entity("total_jails", 0);
        }

        MemoryPatch::default()
            .with_entity("total_jails", jails.len())
            .with_list(jails)
            .with_obligation("run fail2ban-client status <jail> for every jail")
            .with_follow_up("fail2ban-client status {item}")
    }
}

/// `fail2ban-client status <jail>`
struct Fail2banJail;

impl Extractor for Fail2banJail {
    fn name(&self) -> &str {
        "fail2ban-jail"
    }

    fn matches(&self, command: &str) -> bool {
        let words = head_words(command);
        words.len() == 3 && words[0] == "fail2ban-client" && words[1] == "status"
    }

    fn extract(&self, command: &str, output: &str) -> MemoryPatch {
        let jail = labelled_value(output, "Status for the jail")
            .map(str::to_string)
            .or_else(|| head_words(command).get(2).map(|s| s.to_string()));
        let Some(jail) = jail else {
            return MemoryPatch::default();
        };

        let number = |label: &str| labelled_value(output, label).and_then(|v| v.parse::<u64>().ok());
        let Some(currently_banned) = number("Currently banned") else {
            return MemoryPatch::default();
        };
        let total_banned = number("Total banned").unwrap_or(currently_banned);
        let banned_ips = labelled_value(output, "Banned IP list")
            .map(split_list)
            .unwrap_or_default();

        MemoryPatch::default()
            .with_data(
                "jails",
                &jail,
                json!({
                    "currently_banned": currently_banned,
                    "total_banned": total_banned,
                    "banned_ips": banned_ips,
                }),
            )
            .with_counter("total_banned_ips", currently_banned)
    }
}

/// `systemctl --failed` and `systemctl list-units --failed`
struct SystemdFailed;

const UNIT_SUFFIXES: &[&str] = &[
    ".service", ".socket", ".mount", ".timer", ".target", ".path", ".scope", ".slice",
    ".device", ".swap", ".automount",
];

impl Extractor for SystemdFailed {
    fn name(&self) -> &str {
        "systemd-failed"
    }

    fn matches(&self, command: &str) -> bool {
        let words = head_words(command);
        words.first() == Some(&"systemctl")
            && words.iter().any(|w| *w == "--failed" || *w == "--state=failed")
    }

    fn extract(&self, _command: &str, output: &str) -> MemoryPatch {
        let units: Vec<String> = output
            .lines()
            .filter_map(|line| {
                let line = line.trim_start_matches(|c: char| c == '●' || c == '*' || c.is_whitespace());
                let unit = line.split_whitespace().next()?;
                UNIT_SUFFIXES
                    .iter()
                    .any(|suffix| unit.ends_with(suffix))
                    .then(|| unit.to_string())
            })
            .collect();

        // "0 loaded units listed." is a real answer, not a parse failure
        let listed = output.contains("units listed") || output.contains("unit listed");
        if units.is_empty() && !listed {
            return MemoryPatch::default();
        }

        MemoryPatch::default()
            .with_entity("failed_units", units.len())
            .with_data("systemd", "failed_units", json!(units))
    }
}

/// `docker ps` in its default table format
struct DockerPs;

impl Extractor for DockerPs {
    fn name(&self) -> &str {
        "docker-ps"
    }

    fn matches(&self, command: &str) -> bool {
        let words = head_words(command);
        words.len() >= 2
            && words[0] == "docker"
            && words[1] == "ps"
            && !words.iter().any(|w| w.starts_with("--format") || *w == "-q" || *w == "--quiet")
    }

    fn extract(&self, _command: &str, output: &str) -> MemoryPatch {
        let mut lines = output.lines().filter(|l| !l.trim().is_empty());
        match lines.next() {
            Some(header) if header.starts_with("CONTAINER ID") => {}
            _ => return MemoryPatch::default(),
        }

        let containers: Vec<String> = lines
            .filter_map(|line| line.split_whitespace().last())
            .map(str::to_string)
            .collect();

        MemoryPatch::default()
            .with_entity("running_containers", containers.len())
            .with_data("docker", "containers", json!(containers))
    }
}

/// `ss -l…` and `netstat -l…`
struct ListeningPorts;

impl Extractor for ListeningPorts {
    fn name(&self) -> &str {
        "listening-ports"
    }

    fn matches(&self, command: &str) -> bool {
        let words = head_words(command);
        let Some(program) = words.first() else {
            return false;
        };
        if *program != "ss" && *program != "netstat" {
            return false;
        }
        words[1..].iter().any(|w| {
            *w == "--listening"
                || (w.starts_with('-') && !w.starts_with("--") && w.contains('l'))
        })
    }

    fn extract(&self, _command: &str, output: &str) -> MemoryPatch {
        let mut ports: Vec<u16> = output
            .lines()
            .filter_map(|line| {
                line.split_whitespace().find_map(|field| {
                    let (_, port) = field.rsplit_once(':')?;
                    port.parse::<u16>().ok()
                })
            })
            .collect();
        ports.sort_unstable();
        ports.dedup();

        if ports.is_empty() {
            return MemoryPatch::default();
        }
        MemoryPatch::default().with_data("network", "listening_ports", json!(ports))
    }
}

/// Any pipeline whose last stage is `wc -l`
struct LineCount;

impl Extractor for LineCount {
    fn name(&self) -> &str {
        "line-count"
    }

    fn matches(&self, command: &str) -> bool {
        let mut stages = command.rsplit('|');
        let last = stages.next().unwrap_or_default();
        stages.next().is_some() && last.split_whitespace().eq(["wc", "-l"])
    }

    fn extract(&self, command: &str, output: &str) -> MemoryPatch {
        match output.split_whitespace().next().and_then(|n| n.parse::<u64>().ok()) {
            Some(count) => MemoryPatch::default().with_data("counts", command.trim(), count),
            None => MemoryPatch::default(),
        }
    }
}
