// Skill Tool Adapter
// Presents a skill as a callable tool: simple skills expose a single
// `request` parameter, workflow skills expose one parameter per declared
// var plus an optional `request` passed through as an additional var.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use gatehouse_core::TaskContext;
use gatehouse_tools::Tool;
use gatehouse_types::{Skill, SkillType, ToolResult, ToolSchema};

use crate::runner::WorkflowRunner;

pub struct SkillTool {
    skill: Skill,
    runner: WorkflowRunner,
}

impl SkillTool {
    pub fn new(skill: Skill, runner: WorkflowRunner) -> Self {
        Self { skill, runner }
    }
}

#[async_trait]
impl Tool for SkillTool {
    fn schema(&self) -> ToolSchema {
        let mut properties = Map::new();
        let mut required = Vec::new();
        match self.skill.kind() {
            SkillType::Simple => {
                properties.insert(
                    "request".to_string(),
                    json!({"type": "string", "description": "What to ask the skill"}),
                );
                required.push(Value::String("request".to_string()));
            }
            SkillType::Workflow => {
                for (name, var) in &self.skill.vars {
                    properties.insert(
                        name.clone(),
                        json!({"type": "string", "description": var.description}),
                    );
                    if var.required {
                        required.push(Value::String(name.clone()));
                    }
                }
                properties.insert(
                    "request".to_string(),
                    json!({"type": "string", "description": "Optional extra context"}),
                );
            }
        }
        ToolSchema {
            name: self.skill.name.clone(),
            description: self.skill.description.clone(),
            input_schema: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        }
    }

    async fn execute(&self, args: Value, ctx: &TaskContext) -> anyhow::Result<ToolResult> {
        let Some(object) = args.as_object() else {
            anyhow::bail!("skill {} expects a JSON object argument", self.skill.name);
        };
        let mut inputs = HashMap::new();
        for (key, value) in object {
            let text = value
                .as_str()
                .map(ToString::to_string)
                .unwrap_or_else(|| value.to_string());
            inputs.insert(key.clone(), text);
        }
        if self.skill.kind() == SkillType::Simple && !inputs.contains_key("request") {
            anyhow::bail!("skill {} requires a `request` argument", self.skill.name);
        }
        let output = self.runner.run_skill(&self.skill, inputs, ctx).await?;
        Ok(ToolResult::text(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentRequest, StepAgent};
    use gatehouse_core::{EventBus, ToolPermissions};
    use gatehouse_tools::ToolRegistry;
    use gatehouse_types::{SkillStep, SkillVar};
    use std::sync::Arc;

    struct EchoAgent;

    #[async_trait]
    impl StepAgent for EchoAgent {
        async fn run(&self, request: AgentRequest, _ctx: &TaskContext) -> anyhow::Result<String> {
            Ok(request.instruction)
        }
    }

    fn runner(bus: &EventBus) -> WorkflowRunner {
        WorkflowRunner::new(
            Arc::new(EchoAgent),
            ToolRegistry::empty(bus.clone(), ToolPermissions::new()),
            bus.clone(),
        )
    }

    fn simple_skill() -> Skill {
        Skill {
            name: "summarize".to_string(),
            description: "Summarize a request".to_string(),
            skill_type: None,
            version: None,
            model: None,
            instruction: Some("Summarize.".to_string()),
            tools: Vec::new(),
            triggers: Default::default(),
            vars: Default::default(),
            steps: Vec::new(),
        }
    }

    fn workflow_skill() -> Skill {
        let mut skill = simple_skill();
        skill.name = "report".to_string();
        skill.instruction = None;
        skill.vars.insert(
            "topic".to_string(),
            SkillVar {
                description: "Report topic".to_string(),
                required: true,
                default: None,
            },
        );
        skill.steps = vec![SkillStep {
            id: "write".to_string(),
            title: "Write".to_string(),
            instruction: "Write the report.".to_string(),
            tools: Vec::new(),
            model: None,
            needs: Vec::new(),
            acceptance: Default::default(),
        }];
        skill
    }

    #[test]
    fn simple_schema_has_single_required_request() {
        let bus = EventBus::new();
        let tool = SkillTool::new(simple_skill(), runner(&bus));
        let schema = tool.schema();
        assert_eq!(schema.name, "summarize");
        assert_eq!(schema.input_schema["required"][0], "request");
        assert!(schema.input_schema["properties"]["request"].is_object());
    }

    #[test]
    fn workflow_schema_exposes_vars_and_optional_request() {
        let bus = EventBus::new();
        let tool = SkillTool::new(workflow_skill(), runner(&bus));
        let schema = tool.schema();
        let props = schema.input_schema["properties"].as_object().unwrap();
        assert!(props.contains_key("topic"));
        assert!(props.contains_key("request"));
        let required: Vec<&str> = schema.input_schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(required, vec!["topic"]);
    }

    #[tokio::test]
    async fn invocation_runs_skill_and_returns_output() {
        let bus = EventBus::new();
        let tool = SkillTool::new(simple_skill(), runner(&bus));
        let ctx = TaskContext::interactive("ses_1");
        let result = tool
            .execute(json!({"request": "three bullet points"}), &ctx)
            .await
            .unwrap();
        assert!(result.output.contains("**request**: three bullet points"));
    }

    #[tokio::test]
    async fn workflow_invocation_passes_request_as_var() {
        let bus = EventBus::new();
        let tool = SkillTool::new(workflow_skill(), runner(&bus));
        let ctx = TaskContext::interactive("ses_1");
        let result = tool
            .execute(json!({"topic": "uptime", "request": "keep it short"}), &ctx)
            .await
            .unwrap();
        assert!(result.output.contains("**topic**: uptime"));
        assert!(result.output.contains("**request**: keep it short"));
    }

    #[tokio::test]
    async fn simple_invocation_without_request_fails() {
        let bus = EventBus::new();
        let tool = SkillTool::new(simple_skill(), runner(&bus));
        let ctx = TaskContext::interactive("ses_1");
        assert!(tool.execute(json!({}), &ctx).await.is_err());
        assert!(tool.execute(json!("nope"), &ctx).await.is_err());
    }
}
