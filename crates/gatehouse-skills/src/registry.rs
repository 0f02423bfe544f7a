// Skill Registry
// Loads .jsonc skill files from configured directories, validates them, and
// indexes by name. Failed files are logged and skipped so one bad skill
// never takes down the rest of the catalog.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use tracing::{info, warn};

use gatehouse_core::{GatehouseError, Result};
use gatehouse_types::{
    ScheduleEntry, ScheduleSource, Skill, SkillType, TaskTemplate, SCHEDULE_ID_PREFIX,
};

use crate::dag::Dag;

#[derive(Clone, Default)]
pub struct SkillRegistry {
    skills: Arc<RwLock<BTreeMap<String, Skill>>>,
}

impl SkillRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.jsonc` file under `dir`. A missing directory is not an
    /// error. Returns how many skills were loaded.
    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            return Ok(0);
        }
        let mut loaded = 0usize;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonc") {
                continue;
            }
            match load_skill_file(&path) {
                Ok(skill) => match self.register(skill) {
                    Ok(name) => {
                        info!(skill = %name, path = %path.display(), "loaded skill");
                        loaded += 1;
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "skipping skill file");
                    }
                },
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping skill file");
                }
            }
        }
        Ok(loaded)
    }

    /// Validate and index a skill. Duplicate names are rejected.
    pub fn register(&self, skill: Skill) -> Result<String> {
        validate_skill(&skill)?;
        let name = skill.name.clone();
        let mut skills = self.skills.write().unwrap_or_else(|e| e.into_inner());
        if skills.contains_key(&name) {
            return Err(GatehouseError::Validation(format!(
                "duplicate skill name: {name}"
            )));
        }
        skills.insert(name.clone(), skill);
        Ok(name)
    }

    pub fn get(&self, name: &str) -> Option<Skill> {
        self.skills
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// All skills, sorted by name.
    pub fn all(&self) -> Vec<Skill> {
        self.skills
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Schedule entries owned by loaded skills with a schedule trigger.
    /// Entry ids are derived from the skill name so repeated loads are
    /// idempotent from the scheduler's point of view.
    pub fn skill_schedule_entries(&self) -> Vec<ScheduleEntry> {
        self.all()
            .into_iter()
            .filter_map(|skill| schedule_entry_for(&skill))
            .collect()
    }
}

pub fn skill_entry_id(skill_name: &str) -> String {
    format!("{SCHEDULE_ID_PREFIX}skill_{skill_name}")
}

fn schedule_entry_for(skill: &Skill) -> Option<ScheduleEntry> {
    if skill.triggers.schedule_trigger_count() != 1 {
        return None;
    }
    Some(ScheduleEntry {
        id: skill_entry_id(&skill.name),
        source: ScheduleSource::Skill,
        session_id: None,
        title: format!("skill: {}", skill.name),
        description: skill.description.clone(),
        cron_spec: skill.triggers.cron.clone(),
        interval_sec: skill.triggers.interval_sec,
        on_event: skill.triggers.on_event.clone(),
        cooldown_sec: 0,
        max_runs: 0,
        run_count: 0,
        enabled: true,
        created_at: Utc::now(),
        last_run_at: None,
        skill_name: Some(skill.name.clone()),
        task_template: TaskTemplate {
            title: skill.name.clone(),
            description: skill.description.clone(),
            tools: skill.tools.clone(),
            work_dir: None,
            env: Default::default(),
        },
    })
}

fn load_skill_file(path: &Path) -> Result<Skill> {
    let raw = fs::read_to_string(path)?;
    json5::from_str(&raw).map_err(|e| GatehouseError::Parse(format!("{}: {e}", path.display())))
}

pub fn validate_skill(skill: &Skill) -> Result<()> {
    if skill.name.trim().is_empty() {
        return Err(GatehouseError::Validation(
            "skill name must not be empty".to_string(),
        ));
    }
    if skill.description.trim().is_empty() {
        return Err(GatehouseError::Validation(format!(
            "skill {} has an empty description",
            skill.name
        )));
    }
    if skill.triggers.schedule_trigger_count() > 1 {
        return Err(GatehouseError::Validation(format!(
            "skill {} declares more than one schedule trigger",
            skill.name
        )));
    }

    match skill.kind() {
        SkillType::Simple => {
            if skill
                .instruction
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
            {
                return Err(GatehouseError::Validation(format!(
                    "simple skill {} has no instruction",
                    skill.name
                )));
            }
            if !skill.steps.is_empty() {
                return Err(GatehouseError::Validation(format!(
                    "simple skill {} must not declare steps",
                    skill.name
                )));
            }
        }
        SkillType::Workflow => {
            if skill.steps.is_empty() {
                return Err(GatehouseError::Validation(format!(
                    "workflow skill {} has no steps",
                    skill.name
                )));
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    for step in &skill.steps {
        if step.id.trim().is_empty() {
            return Err(GatehouseError::Validation(format!(
                "skill {} has a step with an empty id",
                skill.name
            )));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(GatehouseError::Validation(format!(
                "skill {} has duplicate step id {}",
                skill.name, step.id
            )));
        }
        if step.instruction.trim().is_empty() {
            return Err(GatehouseError::Validation(format!(
                "step {} of skill {} has an empty instruction",
                step.id, skill.name
            )));
        }
        if step.needs.iter().any(|n| n == &step.id) {
            return Err(GatehouseError::Validation(format!(
                "step {} of skill {} depends on itself",
                step.id, skill.name
            )));
        }
    }

    // Unknown needs and cycles surface through DAG construction.
    Dag::new(&skill.steps)?;
    Ok(())
}
