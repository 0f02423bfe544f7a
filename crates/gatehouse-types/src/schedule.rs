// Schedule Entry Types
// Persisted description of a recurring trigger bound to a task template.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const SCHEDULE_ID_PREFIX: &str = "sched_";

/// Generate a fresh schedule entry id.
pub fn new_schedule_id() -> String {
    format!("{}{}", SCHEDULE_ID_PREFIX, Uuid::new_v4().simple())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleSource {
    /// Created at runtime through the store API; fully mutable.
    #[default]
    Dynamic,
    /// Owned by a loaded skill definition; read-only through the store API.
    Skill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Cron,
    Interval,
    Event,
}

/// Event-pattern trigger: fires on any bus event with a matching type name.
/// The optional filter is a JSON object; every key must be present in the
/// event payload with an exactly equal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPattern {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
}

impl EventPattern {
    pub fn matches_payload(&self, payload: &Value) -> bool {
        let Some(filter) = self.filter.as_ref().and_then(|f| f.as_object()) else {
            return true;
        };
        filter
            .iter()
            .all(|(key, expected)| payload.get(key) == Some(expected))
    }
}

/// What a firing materializes into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TaskTemplate {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: String,
    #[serde(default)]
    pub source: ScheduleSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_spec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_sec: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_event: Option<EventPattern>,
    /// Minimum seconds between two firings. 0 means unspecified; the
    /// scheduler clamps it to a one-second floor at evaluation time.
    #[serde(default)]
    pub cooldown_sec: u64,
    /// 0 means unlimited.
    #[serde(default)]
    pub max_runs: u32,
    #[serde(default)]
    pub run_count: u32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Set on skill-sourced entries; the firing resolves to this skill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_name: Option<String>,
    #[serde(default)]
    pub task_template: TaskTemplate,
}

impl ScheduleEntry {
    /// The trigger kind, when exactly one of the three trigger fields is set.
    /// Returns `None` for zero or conflicting triggers.
    pub fn trigger_kind(&self) -> Option<TriggerKind> {
        let mut kinds = Vec::with_capacity(1);
        if self.cron_spec.is_some() {
            kinds.push(TriggerKind::Cron);
        }
        if self.interval_sec.is_some() {
            kinds.push(TriggerKind::Interval);
        }
        if self.on_event.is_some() {
            kinds.push(TriggerKind::Event);
        }
        match kinds.as_slice() {
            [kind] => Some(*kind),
            _ => None,
        }
    }
}

/// One firing of a schedule entry, materialized from its task template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub task_id: String,
    pub entry_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_name: Option<String>,
}

impl ScheduledTask {
    pub fn from_entry(entry: &ScheduleEntry) -> Self {
        Self {
            task_id: format!("task_{}", Uuid::new_v4().simple()),
            entry_id: entry.id.clone(),
            title: entry.task_template.title.clone(),
            description: entry.task_template.description.clone(),
            tools: entry.task_template.tools.clone(),
            work_dir: entry.task_template.work_dir.clone(),
            env: entry.task_template.env.clone(),
            skill_name: entry.skill_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base_entry() -> ScheduleEntry {
        ScheduleEntry {
            id: new_schedule_id(),
            source: ScheduleSource::Dynamic,
            session_id: None,
            title: "nightly".to_string(),
            description: String::new(),
            cron_spec: None,
            interval_sec: None,
            on_event: None,
            cooldown_sec: 0,
            max_runs: 0,
            run_count: 0,
            enabled: true,
            created_at: Utc::now(),
            last_run_at: None,
            skill_name: None,
            task_template: TaskTemplate {
                title: "Nightly task".to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn trigger_kind_requires_exactly_one() {
        let mut entry = base_entry();
        assert_eq!(entry.trigger_kind(), None);

        entry.interval_sec = Some(300);
        assert_eq!(entry.trigger_kind(), Some(TriggerKind::Interval));

        entry.cron_spec = Some("*/5 * * * *".to_string());
        assert_eq!(entry.trigger_kind(), None);
    }

    #[test]
    fn event_pattern_filter_matches_exact_fields() {
        let pattern = EventPattern {
            event: "tool.call".to_string(),
            filter: Some(json!({"tool": "shell", "status": "failed"})),
        };
        assert!(pattern.matches_payload(&json!({
            "tool": "shell", "status": "failed", "args": {"command": "make"}
        })));
        assert!(!pattern.matches_payload(&json!({"tool": "shell", "status": "started"})));
        assert!(!pattern.matches_payload(&json!({"status": "failed"})));
    }

    #[test]
    fn event_pattern_without_filter_matches_everything() {
        let pattern = EventPattern {
            event: "user.message".to_string(),
            filter: None,
        };
        assert!(pattern.matches_payload(&json!({"anything": 1})));
    }

    #[test]
    fn schedule_ids_carry_prefix() {
        assert!(new_schedule_id().starts_with(SCHEDULE_ID_PREFIX));
    }

    #[test]
    fn entry_round_trips_with_rfc3339_timestamps() {
        let mut entry = base_entry();
        entry.cron_spec = Some("0 12 * * *".to_string());
        entry.cooldown_sec = 90;
        let raw = serde_json::to_string(&entry).unwrap();
        let back: ScheduleEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn task_materialization_copies_template() {
        let mut entry = base_entry();
        entry.skill_name = Some("digest".to_string());
        entry.task_template.env = HashMap::from([("MODE".to_string(), "fast".to_string())]);
        let task = ScheduledTask::from_entry(&entry);
        assert_eq!(task.entry_id, entry.id);
        assert_eq!(task.title, "Nightly task");
        assert_eq!(task.skill_name.as_deref(), Some("digest"));
        assert_eq!(task.env.get("MODE").map(String::as_str), Some("fast"));
        assert!(task.task_id.starts_with("task_"));
    }
}
