// Skill Schema
// Declarative unit of agent behavior: simple (one instruction) or workflow
// (a DAG of steps). Loaded from .jsonc files by the skill registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schedule::EventPattern;

pub const DEFAULT_ACCEPTANCE_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillType {
    Simple,
    Workflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SkillVar {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

fn default_delegation() -> bool {
    true
}

/// How a skill can be invoked beyond a direct call. `delegation` exposes it
/// as a callable tool; at most one of the schedule triggers may be set, which
/// makes the registry own a skill-sourced schedule entry for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillTriggers {
    #[serde(default = "default_delegation")]
    pub delegation: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_sec: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_event: Option<EventPattern>,
}

impl Default for SkillTriggers {
    fn default() -> Self {
        Self {
            delegation: true,
            cron: None,
            interval_sec: None,
            on_event: None,
        }
    }
}

impl SkillTriggers {
    pub fn schedule_trigger_count(&self) -> usize {
        [
            self.cron.is_some(),
            self.interval_sec.is_some(),
            self.on_event.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// Acceptance criteria for a step. Decodes from either a plain criterion
/// string or the object form, normalizing into the object form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Acceptance {
    pub criteria: Vec<String>,
    pub max_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl Default for Acceptance {
    fn default() -> Self {
        Self {
            criteria: Vec::new(),
            max_attempts: DEFAULT_ACCEPTANCE_ATTEMPTS,
            model: None,
        }
    }
}

impl Acceptance {
    pub fn has_criteria(&self) -> bool {
        !self.criteria.is_empty()
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_ACCEPTANCE_ATTEMPTS
}

impl<'de> Deserialize<'de> for Acceptance {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Object {
                #[serde(default)]
                criteria: Vec<String>,
                #[serde(default = "default_max_attempts")]
                max_attempts: u32,
                #[serde(default)]
                model: Option<String>,
            },
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    Acceptance::default()
                } else {
                    Acceptance {
                        criteria: vec![trimmed.to_string()],
                        ..Acceptance::default()
                    }
                }
            }
            Raw::Object {
                criteria,
                max_attempts,
                model,
            } => Acceptance {
                criteria,
                max_attempts,
                model,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillStep {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub instruction: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub acceptance: Acceptance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub skill_type: Option<SkillType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub triggers: SkillTriggers,
    #[serde(default)]
    pub vars: BTreeMap<String, SkillVar>,
    #[serde(default)]
    pub steps: Vec<SkillStep>,
}

impl Skill {
    /// The effective type: the declared one, otherwise inferred as workflow
    /// iff steps are present.
    pub fn kind(&self) -> SkillType {
        self.skill_type.unwrap_or(if self.steps.is_empty() {
            SkillType::Simple
        } else {
            SkillType::Workflow
        })
    }
}
