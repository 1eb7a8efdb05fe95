//! Working Memory for the orchestration loop
//!
//! Accumulates the structured facts discovered while commands run. Working
//! memory is what the planner sees when judging completeness and what the
//! synthesizer answers from, so it must only ever grow:
//!
//! - `discovered.lists` is an ordered union; items are never removed
//! - extraction patches insert facts that are not yet known and never
//!   replace ones that are
//! - `data_extracted.raw` keeps a truncated copy of every command's output

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Key under which raw outputs are serialized inside `data_extracted`
pub const RAW_KEY: &str = "raw";

/// Facts discovered about the system under inspection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovered {
    /// Entities that each need a follow-up command (e.g. fail2ban jail names)
    #[serde(default)]
    pub lists: Vec<String>,

    /// Named counts and values (e.g. `total_jails`)
    #[serde(default)]
    pub entities: Map<String, Value>,

    /// Human-readable iteration obligations
    #[serde(default)]
    pub needs_iteration: Vec<String>,

    /// Per-item command template, `{item}` is replaced by a list entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
}

/// Structured data pulled out of command output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataExtracted {
    /// Truncated raw output per command
    #[serde(default)]
    pub raw: BTreeMap<String, String>,

    /// Namespaced facts (e.g. `jails.sshd`)
    #[serde(flatten)]
    pub facts: Map<String, Value>,
}

/// The accumulator of everything learned during one orchestration run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingMemory {
    pub discovered: Discovered,

    /// Latest planner rationale
    #[serde(default)]
    pub hypothesis: String,

    pub data_extracted: DataExtracted,
}

/// Additive update produced by a data extractor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryPatch {
    pub lists: Vec<String>,
    pub entities: Map<String, Value>,
    /// Added to existing numeric entities instead of inserted once
    pub counters: Map<String, Value>,
    pub needs_iteration: Vec<String>,
    pub follow_up: Option<String>,
    /// `(namespace, key, value)` facts for `data_extracted`
    pub data: Vec<(String, String, Value)>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
            && self.entities.is_empty()
            && self.counters.is_empty()
            && self.needs_iteration.is_empty()
            && self.follow_up.is_none()
            && self.data.is_empty()
    }

    pub fn with_list(mut self, items: impl IntoIterator<Item = String>) -> Self {
        self.lists.extend(items);
        self
    }

    pub fn with_entity(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.entities.insert(name.to_string(), value.into());
        self
    }

    pub fn with_counter(mut self, name: &str, amount: u64) -> Self {
        self.counters.insert(name.to_string(), Value::from(amount));
        self
    }

    pub fn with_obligation(mut self, text: impl Into<String>) -> Self {
        self.needs_iteration.push(text.into());
        self
    }

    pub fn with_follow_up(mut self, template: impl Into<String>) -> Self {
        self.follow_up = Some(template.into());
        self
    }

    pub fn with_data(mut self, namespace: &str, key: &str, value: impl Into<Value>) -> Self {
        self.data
            .push((namespace.to_string(), key.to_string(), value.into()));
        self
    }
}

/// Which discovered list items still lack extracted data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationHint {
    pub pending: Vec<String>,
    pub covered: Vec<String>,
}

impl IterationHint {
    /// Whether every discovered item already has data
    pub fn is_covered(&self) -> bool {
        self.pending.is_empty() && !self.covered.is_empty()
    }
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache a command's output, truncated to `limit` characters
    pub fn record_raw(&mut self, command: &str, output: &str, limit: usize) {
        self.data_extracted
            .raw
            .insert(command.to_string(), truncate_chars(output, limit));
    }

    /// Apply an extraction patch without overwriting known facts
    pub fn apply_patch(&mut self, patch: MemoryPatch) {
        union_into(&mut self.discovered.lists, patch.lists);
        union_into(&mut self.discovered.needs_iteration, patch.needs_iteration);

        for (name, value) in patch.entities {
            self.discovered.entities.entry(name).or_insert(value);
        }

        if self.discovered.follow_up.is_none() {
            self.discovered.follow_up = patch.follow_up;
        }

        let has_data = !patch.data.is_empty();
        let mut inserted = false;
        for (namespace, key, value) in patch.data {
            let slot = self
                .data_extracted
                .facts
                .entry(namespace)
                .or_insert_with(|| Value::Object(Map::new()));

            // A non-object namespace is left alone
            if let Value::Object(map) = slot {
                if !map.contains_key(&key) {
                    map.insert(key, value);
                    inserted = true;
                }
            }
        }

        // Counters only move when the patch brought new data, so the same
        // fact reported twice is not counted twice
        if has_data && !inserted {
            return;
        }
        for (name, amount) in patch.counters {
            let add = amount.as_u64().unwrap_or(0);
            let current = self
                .discovered
                .entities
                .get(&name)
                .and_then(Value::as_u64)
                .unwrap_or(0);
            self.discovered
                .entities
                .insert(name, Value::from(current + add));
        }
    }

    /// Merge a planner-supplied `updateMemory.discovered` block
    ///
    /// Lists and obligations are unioned; planner entity values replace
    /// earlier ones.
    pub fn merge_discovered(&mut self, update: Discovered) {
        union_into(&mut self.discovered.lists, update.lists);
        union_into(&mut self.discovered.needs_iteration, update.needs_iteration);

        for (name, value) in update.entities {
            self.discovered.entities.insert(name, value);
        }

        if self.discovered.follow_up.is_none() {
            self.discovered.follow_up = update.follow_up;
        }
    }

    /// Replace the current hypothesis
    pub fn set_hypothesis(&mut self, hypothesis: impl Into<String>) {
        self.hypothesis = hypothesis.into();
    }

    /// Whether `item` has a per-entity record in `data_extracted`
    ///
    /// Only an object stored under `item` one level down in a namespace
    /// counts (e.g. `jails.sshd = {...}`). Aggregate facts such as
    /// `systemd.failed_units = [...]` and raw outputs do not.
    pub fn has_data_for(&self, item: &str) -> bool {
        self.data_extracted
            .facts
            .values()
            .any(|namespace| namespace.get(item).is_some_and(Value::is_object))
    }

    /// Split discovered list items into those with and without data
    pub fn iteration_hint(&self) -> IterationHint {
        let (covered, pending) = self
            .discovered
            .lists
            .iter()
            .cloned()
            .partition(|item| self.has_data_for(item));

        IterationHint { pending, covered }
    }

    /// Follow-up commands for pending items, from the stored template
    pub fn follow_up_commands(&self) -> Vec<String> {
        let Some(template) = &self.discovered.follow_up else {
            return Vec::new();
        };

        self.iteration_hint()
            .pending
            .iter()
            .map(|item| template.replace("{item}", item))
            .collect()
    }

    /// Pretty JSON rendering used inside prompts
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Pretty JSON rendering of `data_extracted` only
    pub fn data_to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(&self.data_extracted).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Append items not already present, keeping first-seen order
fn union_into(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !target.contains(&item) {
            target.push(item);
        }
    }
}

/// Truncate to at most `limit` characters on a char boundary
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
