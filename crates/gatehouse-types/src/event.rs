// Gatehouse Event Model
// Closed set of event types with strict JSON payload shapes. Events are the
// wire contract between the engine subsystems and any external subscriber.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schedule::TriggerKind;

static EVENT_SEQ: AtomicU64 = AtomicU64::new(1);

/// Monotonically unique per process.
fn next_event_id() -> String {
    format!("evt_{}", EVENT_SEQ.fetch_add(1, Ordering::Relaxed))
}

// ============================================================================
// Event Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "user.message")]
    UserMessage,
    #[serde(rename = "assistant.delta")]
    AssistantDelta,
    #[serde(rename = "tool.call")]
    ToolCall,
    #[serde(rename = "prompt.request")]
    PromptRequest,
    #[serde(rename = "prompt.response")]
    PromptResponse,
    #[serde(rename = "skill.started")]
    SkillStarted,
    #[serde(rename = "skill.completed")]
    SkillCompleted,
    #[serde(rename = "skill.step.started")]
    SkillStepStarted,
    #[serde(rename = "skill.step.completed")]
    SkillStepCompleted,
    #[serde(rename = "task.started")]
    TaskStarted,
    #[serde(rename = "task.completed")]
    TaskCompleted,
    #[serde(rename = "schedule.created")]
    ScheduleCreated,
    #[serde(rename = "schedule.removed")]
    ScheduleRemoved,
    #[serde(rename = "schedule.trigger")]
    ScheduleTrigger,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserMessage => "user.message",
            EventType::AssistantDelta => "assistant.delta",
            EventType::ToolCall => "tool.call",
            EventType::PromptRequest => "prompt.request",
            EventType::PromptResponse => "prompt.response",
            EventType::SkillStarted => "skill.started",
            EventType::SkillCompleted => "skill.completed",
            EventType::SkillStepStarted => "skill.step.started",
            EventType::SkillStepCompleted => "skill.step.completed",
            EventType::TaskStarted => "task.started",
            EventType::TaskCompleted => "task.completed",
            EventType::ScheduleCreated => "schedule.created",
            EventType::ScheduleRemoved => "schedule.removed",
            EventType::ScheduleTrigger => "schedule.trigger",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserMessagePayload {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantDeltaPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallPayload {
    pub tool: String,
    /// "started" | "completed" | "failed"
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptRequestPayload {
    /// Currently only "confirm".
    pub prompt_type: String,
    pub label: String,
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptResponsePayload {
    pub token: String,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillStartedPayload {
    pub skill_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillCompletedPayload {
    pub skill_name: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ns: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillStepStartedPayload {
    pub skill_name: String,
    pub step_id: String,
    pub step_title: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkillStepCompletedPayload {
    pub skill_name: String,
    pub step_id: String,
    pub step_title: String,
    pub output: String,
    /// Empty string when the step succeeded.
    pub error: String,
    pub duration_ns: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStartedPayload {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskCompletedPayload {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ns: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleCreatedPayload {
    pub entry_id: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleRemovedPayload {
    pub entry_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleTriggerPayload {
    pub entry_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_name: Option<String>,
    pub trigger: TriggerKind,
    pub task_id: String,
}

/// Typed payload for every event in the closed set. The variant determines
/// the event's `type` discriminator and the strict shape of its JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    UserMessage(UserMessagePayload),
    AssistantDelta(AssistantDeltaPayload),
    ToolCall(ToolCallPayload),
    PromptRequest(PromptRequestPayload),
    PromptResponse(PromptResponsePayload),
    SkillStarted(SkillStartedPayload),
    SkillCompleted(SkillCompletedPayload),
    SkillStepStarted(SkillStepStartedPayload),
    SkillStepCompleted(SkillStepCompletedPayload),
    TaskStarted(TaskStartedPayload),
    TaskCompleted(TaskCompletedPayload),
    ScheduleCreated(ScheduleCreatedPayload),
    ScheduleRemoved(ScheduleRemovedPayload),
    ScheduleTrigger(ScheduleTriggerPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::UserMessage(_) => EventType::UserMessage,
            EventPayload::AssistantDelta(_) => EventType::AssistantDelta,
            EventPayload::ToolCall(_) => EventType::ToolCall,
            EventPayload::PromptRequest(_) => EventType::PromptRequest,
            EventPayload::PromptResponse(_) => EventType::PromptResponse,
            EventPayload::SkillStarted(_) => EventType::SkillStarted,
            EventPayload::SkillCompleted(_) => EventType::SkillCompleted,
            EventPayload::SkillStepStarted(_) => EventType::SkillStepStarted,
            EventPayload::SkillStepCompleted(_) => EventType::SkillStepCompleted,
            EventPayload::TaskStarted(_) => EventType::TaskStarted,
            EventPayload::TaskCompleted(_) => EventType::TaskCompleted,
            EventPayload::ScheduleCreated(_) => EventType::ScheduleCreated,
            EventPayload::ScheduleRemoved(_) => EventType::ScheduleRemoved,
            EventPayload::ScheduleTrigger(_) => EventType::ScheduleTrigger,
        }
    }

    fn to_value(&self) -> Value {
        let result = match self {
            EventPayload::UserMessage(p) => serde_json::to_value(p),
            EventPayload::AssistantDelta(p) => serde_json::to_value(p),
            EventPayload::ToolCall(p) => serde_json::to_value(p),
            EventPayload::PromptRequest(p) => serde_json::to_value(p),
            EventPayload::PromptResponse(p) => serde_json::to_value(p),
            EventPayload::SkillStarted(p) => serde_json::to_value(p),
            EventPayload::SkillCompleted(p) => serde_json::to_value(p),
            EventPayload::SkillStepStarted(p) => serde_json::to_value(p),
            EventPayload::SkillStepCompleted(p) => serde_json::to_value(p),
            EventPayload::TaskStarted(p) => serde_json::to_value(p),
            EventPayload::TaskCompleted(p) => serde_json::to_value(p),
            EventPayload::ScheduleCreated(p) => serde_json::to_value(p),
            EventPayload::ScheduleRemoved(p) => serde_json::to_value(p),
            EventPayload::ScheduleTrigger(p) => serde_json::to_value(p),
        };
        // Payload structs serialize infallibly (no non-string map keys).
        result.unwrap_or(Value::Null)
    }
}

// ============================================================================
// Event
// ============================================================================

/// A single immutable event. Constructed through [`Event::new`], which stamps
/// id, timestamp, and the type discriminator from the typed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub payload: Value,
}

impl Event {
    pub fn new(payload: EventPayload, source: &str, session_id: Option<&str>) -> Self {
        Self {
            id: next_event_id(),
            session_id: session_id.map(ToString::to_string),
            event_type: payload.event_type(),
            timestamp: Utc::now(),
            source: source.to_string(),
            payload: payload.to_value(),
        }
    }

    /// Deserialize the payload according to the declared event type.
    pub fn decode(&self) -> Result<EventPayload, serde_json::Error> {
        let v = self.payload.clone();
        Ok(match self.event_type {
            EventType::UserMessage => EventPayload::UserMessage(serde_json::from_value(v)?),
            EventType::AssistantDelta => EventPayload::AssistantDelta(serde_json::from_value(v)?),
            EventType::ToolCall => EventPayload::ToolCall(serde_json::from_value(v)?),
            EventType::PromptRequest => EventPayload::PromptRequest(serde_json::from_value(v)?),
            EventType::PromptResponse => EventPayload::PromptResponse(serde_json::from_value(v)?),
            EventType::SkillStarted => EventPayload::SkillStarted(serde_json::from_value(v)?),
            EventType::SkillCompleted => EventPayload::SkillCompleted(serde_json::from_value(v)?),
            EventType::SkillStepStarted => {
                EventPayload::SkillStepStarted(serde_json::from_value(v)?)
            }
            EventType::SkillStepCompleted => {
                EventPayload::SkillStepCompleted(serde_json::from_value(v)?)
            }
            EventType::TaskStarted => EventPayload::TaskStarted(serde_json::from_value(v)?),
            EventType::TaskCompleted => EventPayload::TaskCompleted(serde_json::from_value(v)?),
            EventType::ScheduleCreated => EventPayload::ScheduleCreated(serde_json::from_value(v)?),
            EventType::ScheduleRemoved => EventPayload::ScheduleRemoved(serde_json::from_value(v)?),
            EventType::ScheduleTrigger => EventPayload::ScheduleTrigger(serde_json::from_value(v)?),
        })
    }

    /// Deserialize the payload into an explicit shape, bypassing the closed
    /// enum. Useful for partial extraction in subscribers.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_per_process() {
        let a = Event::new(
            EventPayload::UserMessage(UserMessagePayload {
                content: "hi".to_string(),
            }),
            "test",
            None,
        );
        let b = Event::new(
            EventPayload::UserMessage(UserMessagePayload {
                content: "again".to_string(),
            }),
            "test",
            None,
        );
        assert_ne!(a.id, b.id);
        let seq = |e: &Event| {
            e.id.strip_prefix("evt_")
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap()
        };
        assert!(seq(&a) < seq(&b));
    }

    #[test]
    fn typed_construction_stamps_discriminator() {
        let event = Event::new(
            EventPayload::ScheduleTrigger(ScheduleTriggerPayload {
                entry_id: "sched_1".to_string(),
                skill_name: Some("daily-digest".to_string()),
                trigger: TriggerKind::Cron,
                task_id: "task_1".to_string(),
            }),
            "scheduler",
            None,
        );
        assert_eq!(event.event_type, EventType::ScheduleTrigger);
        assert_eq!(event.source, "scheduler");
        assert_eq!(
            event.payload.get("trigger").and_then(|v| v.as_str()),
            Some("cron")
        );
    }

    #[test]
    fn decode_round_trips_payload() {
        let payload = EventPayload::SkillStepCompleted(SkillStepCompletedPayload {
            skill_name: "build".to_string(),
            step_id: "compile".to_string(),
            step_title: "Compile".to_string(),
            output: "ok".to_string(),
            error: String::new(),
            duration_ns: 1_500_000,
        });
        let event = Event::new(payload.clone(), "runner", Some("ses_1"));
        assert_eq!(event.decode().unwrap(), payload);
        assert_eq!(event.session_id.as_deref(), Some("ses_1"));
    }

    #[test]
    fn wire_names_are_dotted() {
        let json = serde_json::to_string(&EventType::SkillStepStarted).unwrap();
        assert_eq!(json, "\"skill.step.started\"");
        let back: EventType = serde_json::from_str("\"prompt.response\"").unwrap();
        assert_eq!(back, EventType::PromptResponse);
    }
}
