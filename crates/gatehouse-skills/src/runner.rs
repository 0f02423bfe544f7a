// Workflow Runner
// Materializes a skill's DAG and runs it to completion: every ready step
// launches concurrently, prior results are injected into dependent steps,
// and the first step error cancels the rest of the round (fail-fast).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::warn;

use gatehouse_core::{EventBus, GatehouseError, Result, TaskContext};
use gatehouse_tools::{Tool, ToolRegistry};
use gatehouse_types::{
    Event, EventPayload, Skill, SkillCompletedPayload, SkillStartedPayload,
    SkillStepCompletedPayload, SkillStepStartedPayload, SkillType,
};

use crate::agent::{AgentRequest, StepAgent};
use crate::compose::{compose_simple_instruction, compose_step_instruction};
use crate::dag::Dag;

const EVENT_SOURCE: &str = "runner";

#[derive(Clone)]
pub struct WorkflowRunner {
    agent: Arc<dyn StepAgent>,
    tools: ToolRegistry,
    bus: EventBus,
}

impl WorkflowRunner {
    pub fn new(agent: Arc<dyn StepAgent>, tools: ToolRegistry, bus: EventBus) -> Self {
        Self { agent, tools, bus }
    }

    /// Run a skill to completion, wrapping the run in skill lifecycle
    /// events. The returned string is the skill output: the agent reply for
    /// simple skills, the final step's result for workflows.
    pub async fn run_skill(
        &self,
        skill: &Skill,
        inputs: HashMap<String, String>,
        ctx: &TaskContext,
    ) -> Result<String> {
        let started = Instant::now();
        self.bus.publish(Event::new(
            EventPayload::SkillStarted(SkillStartedPayload {
                skill_name: skill.name.clone(),
            }),
            EVENT_SOURCE,
            ctx.session_id(),
        ));

        let result = match skill.kind() {
            SkillType::Simple => self.run_simple(skill, inputs, ctx).await,
            SkillType::Workflow => self.run_workflow(skill, inputs, ctx).await,
        };

        self.bus.publish(Event::new(
            EventPayload::SkillCompleted(SkillCompletedPayload {
                skill_name: skill.name.clone(),
                output: result.as_deref().unwrap_or("").to_string(),
                error: result.as_ref().err().map(ToString::to_string),
                duration_ns: started.elapsed().as_nanos() as u64,
            }),
            EVENT_SOURCE,
            ctx.session_id(),
        ));
        result
    }

    async fn run_simple(
        &self,
        skill: &Skill,
        inputs: HashMap<String, String>,
        ctx: &TaskContext,
    ) -> Result<String> {
        let vars = resolve_vars(skill, inputs)?;
        let instruction =
            compose_simple_instruction(skill.instruction.as_deref().unwrap_or(""), &vars);
        let tools = self.resolve_tools(&skill.tools).await;
        self.agent
            .run(
                AgentRequest {
                    instruction,
                    model: skill.model.clone(),
                    tools,
                },
                ctx,
            )
            .await
            .map_err(|e| GatehouseError::StepFailed(e.to_string()))
    }

    async fn run_workflow(
        &self,
        skill: &Skill,
        inputs: HashMap<String, String>,
        ctx: &TaskContext,
    ) -> Result<String> {
        let vars = resolve_vars(skill, inputs)?;
        let dag = Dag::new(&skill.steps)?;
        let steps: HashMap<String, gatehouse_types::SkillStep> = skill
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.clone()))
            .collect();
        // The output step is fixed up front from the initial topological
        // order, so the answer is deterministic for a given skill.
        let final_step = dag.final_step().map(ToString::to_string);

        let completed: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));
        let results: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));

        loop {
            if ctx.is_cancelled() {
                return Err(GatehouseError::Cancelled("workflow cancelled".to_string()));
            }
            let ready = {
                let done = completed.lock().unwrap_or_else(|e| e.into_inner());
                dag.ready_set(&done)
            };
            if ready.is_empty() {
                break;
            }

            let round_ctx = ctx.child();
            let (err_tx, mut err_rx) = mpsc::channel::<GatehouseError>(ready.len());
            let mut join_set = JoinSet::new();

            for step_id in ready {
                let Some(step) = steps.get(&step_id).cloned() else {
                    continue;
                };
                let model = step.model.clone().or_else(|| skill.model.clone());
                let tools = self.resolve_tools(&step.tools).await;
                let snapshot = results
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                let vars = vars.clone();
                let agent = self.agent.clone();
                let bus = self.bus.clone();
                let completed = completed.clone();
                let results = results.clone();
                let err_tx = err_tx.clone();
                let step_ctx = round_ctx.clone();
                let skill_name = skill.name.clone();
                let session = ctx.session_id().map(ToString::to_string);

                bus.publish(Event::new(
                    EventPayload::SkillStepStarted(SkillStepStartedPayload {
                        skill_name: skill_name.clone(),
                        step_id: step.id.clone(),
                        step_title: step.title.clone(),
                        model: model.clone().unwrap_or_default(),
                    }),
                    EVENT_SOURCE,
                    session.as_deref(),
                ));

                join_set.spawn(async move {
                    let step_started = Instant::now();
                    let instruction = compose_step_instruction(&step, &vars, &snapshot);
                    let outcome = tokio::select! {
                        biased;
                        _ = step_ctx.cancel_token().cancelled() => {
                            Err(anyhow::anyhow!("step {} cancelled", step.id))
                        }
                        result = agent.run(
                            AgentRequest { instruction, model, tools },
                            &step_ctx,
                        ) => result,
                    };
                    let duration_ns = step_started.elapsed().as_nanos() as u64;

                    match outcome {
                        Ok(output) => {
                            completed
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .insert(step.id.clone());
                            results
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .insert(step.id.clone(), output.clone());
                            bus.publish(Event::new(
                                EventPayload::SkillStepCompleted(SkillStepCompletedPayload {
                                    skill_name,
                                    step_id: step.id.clone(),
                                    step_title: step.title.clone(),
                                    output,
                                    error: String::new(),
                                    duration_ns,
                                }),
                                EVENT_SOURCE,
                                session.as_deref(),
                            ));
                        }
                        Err(err) => {
                            bus.publish(Event::new(
                                EventPayload::SkillStepCompleted(SkillStepCompletedPayload {
                                    skill_name,
                                    step_id: step.id.clone(),
                                    step_title: step.title.clone(),
                                    output: String::new(),
                                    error: err.to_string(),
                                    duration_ns,
                                }),
                                EVENT_SOURCE,
                                session.as_deref(),
                            ));
                            let _ = err_tx.try_send(GatehouseError::StepFailed(format!(
                                "step {}: {err}",
                                step.id
                            )));
                            // Fail fast: stop the rest of the round.
                            step_ctx.cancel();
                        }
                    }
                });
            }
            drop(err_tx);

            // Drain the whole round before the next frontier computation.
            while join_set.join_next().await.is_some() {}

            if let Ok(err) = err_rx.try_recv() {
                return Err(err);
            }
        }

        let results = results.lock().unwrap_or_else(|e| e.into_inner());
        Ok(final_step
            .and_then(|id| results.get(&id).cloned())
            .unwrap_or_default())
    }

    /// Tools are looked up by name at step start; absent tools are warned
    /// about, never fatal.
    async fn resolve_tools(&self, names: &[String]) -> Vec<Arc<dyn Tool>> {
        let mut tools = Vec::with_capacity(names.len());
        for name in names {
            match self.tools.tool(name).await {
                Some(tool) => tools.push(tool),
                None => warn!(tool = %name, "tool not found in registry; continuing without it"),
            }
        }
        tools
    }
}

/// Check required vars and apply defaults for absent optional ones. Extra
/// inputs (such as a delegated `request`) pass through untouched.
pub fn resolve_vars(
    skill: &Skill,
    inputs: HashMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut vars = BTreeMap::new();
    for (name, decl) in &skill.vars {
        match inputs.get(name) {
            Some(value) => {
                vars.insert(name.clone(), value.clone());
            }
            None if decl.required => {
                return Err(GatehouseError::Validation(format!(
                    "missing required var {} for skill {}",
                    name, skill.name
                )));
            }
            None => {
                if let Some(default) = &decl.default {
                    vars.insert(name.clone(), default.clone());
                }
            }
        }
    }
    for (name, value) in inputs {
        vars.entry(name).or_insert(value);
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gatehouse_core::ToolPermissions;
    use gatehouse_types::{EventType, SkillStep, SkillVar};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Agent double: records every instruction and echoes the step id it
    /// finds in the instruction, failing for ids listed in `fail`.
    struct ScriptedAgent {
        seen: Mutex<Vec<String>>,
        fail: Vec<String>,
        started: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedAgent {
        fn new(fail: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                fail: fail.iter().map(ToString::to_string).collect(),
                started: AtomicUsize::new(0),
                delay: Duration::from_millis(5),
            })
        }
    }

    #[async_trait]
    impl StepAgent for ScriptedAgent {
        async fn run(&self, request: AgentRequest, _ctx: &TaskContext) -> anyhow::Result<String> {
            self.started.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.instruction.clone());
            tokio::time::sleep(self.delay).await;
            let step_id = request
                .instruction
                .lines()
                .next()
                .and_then(|l| l.strip_prefix("do "))
                .unwrap_or("?")
                .to_string();
            if self.fail.contains(&step_id) {
                anyhow::bail!("{step_id} exploded");
            }
            Ok(format!("output of {step_id}"))
        }
    }

    fn step(id: &str, needs: &[&str]) -> SkillStep {
        SkillStep {
            id: id.to_string(),
            title: id.to_uppercase(),
            instruction: format!("do {id}"),
            tools: Vec::new(),
            model: None,
            needs: needs.iter().map(ToString::to_string).collect(),
            acceptance: Default::default(),
        }
    }

    fn workflow(name: &str, steps: Vec<SkillStep>) -> Skill {
        Skill {
            name: name.to_string(),
            description: "test workflow".to_string(),
            skill_type: None,
            version: None,
            model: None,
            instruction: None,
            tools: Vec::new(),
            triggers: Default::default(),
            vars: Default::default(),
            steps,
        }
    }

    fn runner(agent: Arc<dyn StepAgent>, bus: &EventBus) -> WorkflowRunner {
        let tools = ToolRegistry::empty(bus.clone(), ToolPermissions::new());
        WorkflowRunner::new(agent, tools, bus.clone())
    }

    #[tokio::test]
    async fn linear_workflow_injects_prior_results() {
        let bus = EventBus::new();
        let agent = ScriptedAgent::new(&[]);
        let runner = runner(agent.clone(), &bus);
        let skill = workflow("pipeline", vec![step("a", &[]), step("b", &["a"])]);
        let ctx = TaskContext::interactive("ses_1");

        let output = runner.run_skill(&skill, HashMap::new(), &ctx).await.unwrap();
        assert_eq!(output, "output of b");

        let seen = agent.seen.lock().unwrap().clone();
        let b_instruction = seen.iter().find(|i| i.starts_with("do b")).unwrap();
        assert!(b_instruction.contains("## Previous Step Results"));
        assert!(b_instruction.contains("### Step: a\n\noutput of a"));
    }

    #[tokio::test]
    async fn diamond_output_is_final_topological_step() {
        let bus = EventBus::new();
        let agent = ScriptedAgent::new(&[]);
        let runner = runner(agent, &bus);
        let skill = workflow(
            "diamond",
            vec![
                step("a", &[]),
                step("b", &["a"]),
                step("c", &["a"]),
                step("d", &["b", "c"]),
            ],
        );
        let ctx = TaskContext::interactive("ses_1");
        let output = runner.run_skill(&skill, HashMap::new(), &ctx).await.unwrap();
        assert_eq!(output, "output of d");
    }

    #[tokio::test]
    async fn fail_fast_skips_dependents_and_reports_first_error() {
        let bus = EventBus::new();
        let mut events = bus.subscribe(64, &[EventType::SkillStepCompleted]);
        let agent = ScriptedAgent::new(&["b"]);
        let runner = runner(agent.clone(), &bus);
        let skill = workflow(
            "doomed",
            vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])],
        );
        let ctx = TaskContext::interactive("ses_1");

        let err = runner
            .run_skill(&skill, HashMap::new(), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("step b"));
        assert!(err.to_string().contains("exploded"));
        // c depends on the failed step and never starts.
        assert_eq!(agent.started.load(Ordering::SeqCst), 2);

        let mut b_error = None;
        while let Some(event) = events.try_recv() {
            if event.payload["step_id"] == "b" {
                b_error = Some(event.payload["error"].as_str().unwrap_or("").to_string());
            }
        }
        assert!(b_error.unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn required_var_missing_is_a_validation_error() {
        let bus = EventBus::new();
        let agent = ScriptedAgent::new(&[]);
        let runner = runner(agent, &bus);
        let mut skill = workflow("vars", vec![step("a", &[])]);
        skill.vars.insert(
            "target".to_string(),
            SkillVar {
                description: "what to build".to_string(),
                required: true,
                default: None,
            },
        );
        let ctx = TaskContext::interactive("ses_1");
        let err = runner
            .run_skill(&skill, HashMap::new(), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing required var target"));
    }

    #[tokio::test]
    async fn optional_var_defaults_are_applied() {
        let bus = EventBus::new();
        let agent = ScriptedAgent::new(&[]);
        let runner = runner(agent.clone(), &bus);
        let mut skill = workflow("defaults", vec![step("a", &[])]);
        skill.vars.insert(
            "mode".to_string(),
            SkillVar {
                description: String::new(),
                required: false,
                default: Some("fast".to_string()),
            },
        );
        let ctx = TaskContext::interactive("ses_1");
        runner.run_skill(&skill, HashMap::new(), &ctx).await.unwrap();

        let seen = agent.seen.lock().unwrap().clone();
        assert!(seen[0].contains("**mode**: fast"));
    }

    #[tokio::test]
    async fn simple_skill_runs_one_agent_call() {
        let bus = EventBus::new();
        let agent = ScriptedAgent::new(&[]);
        let runner = runner(agent.clone(), &bus);
        let skill = Skill {
            name: "echo".to_string(),
            description: "simple".to_string(),
            skill_type: None,
            version: None,
            model: None,
            instruction: Some("do echo".to_string()),
            tools: Vec::new(),
            triggers: Default::default(),
            vars: Default::default(),
            steps: Vec::new(),
        };
        let ctx = TaskContext::interactive("ses_1");
        let output = runner
            .run_skill(
                &skill,
                HashMap::from([("request".to_string(), "hello".to_string())]),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(output, "output of echo");
        let seen = agent.seen.lock().unwrap().clone();
        assert!(seen[0].contains("**request**: hello"));
    }

    #[tokio::test]
    async fn lifecycle_events_wrap_the_run() {
        let bus = EventBus::new();
        let mut events = bus.subscribe(
            64,
            &[EventType::SkillStarted, EventType::SkillCompleted],
        );
        let agent = ScriptedAgent::new(&[]);
        let runner = runner(agent, &bus);
        let skill = workflow("observable", vec![step("a", &[])]);
        let ctx = TaskContext::interactive("ses_1");
        runner.run_skill(&skill, HashMap::new(), &ctx).await.unwrap();

        let started = events.recv().await.unwrap();
        assert_eq!(started.event_type, EventType::SkillStarted);
        assert_eq!(started.session_id.as_deref(), Some("ses_1"));
        let completed = events.recv().await.unwrap();
        assert_eq!(completed.event_type, EventType::SkillCompleted);
        assert_eq!(completed.payload["output"], "output of a");
        assert!(completed.payload["error"].is_null());
    }

    #[tokio::test]
    async fn cancelled_context_aborts_the_workflow() {
        let bus = EventBus::new();
        let agent = ScriptedAgent::new(&[]);
        let runner = runner(agent, &bus);
        let skill = workflow("cancelled", vec![step("a", &[])]);
        let ctx = TaskContext::interactive("ses_1");
        ctx.cancel();
        let err = runner
            .run_skill(&skill, HashMap::new(), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
