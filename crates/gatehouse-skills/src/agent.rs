// Ephemeral step agents. The runner only sees the `StepAgent` trait; the
// production implementation runs one provider completion per step, with
// LLM I/O opaque to the engine and cancellable through the task scope.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use gatehouse_core::TaskContext;
use gatehouse_providers::ProviderRegistry;
use gatehouse_tools::Tool;

pub struct AgentRequest {
    pub instruction: String,
    pub model: Option<String>,
    pub tools: Vec<Arc<dyn Tool>>,
}

#[async_trait]
pub trait StepAgent: Send + Sync {
    async fn run(&self, request: AgentRequest, ctx: &TaskContext) -> anyhow::Result<String>;
}

pub struct ProviderAgent {
    providers: ProviderRegistry,
}

impl ProviderAgent {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl StepAgent for ProviderAgent {
    async fn run(&self, request: AgentRequest, ctx: &TaskContext) -> anyhow::Result<String> {
        if !request.tools.is_empty() {
            debug!(tools = request.tools.len(), "running agent with resolved tools");
        }
        self.providers
            .complete(
                None,
                &request.instruction,
                request.model.as_deref(),
                ctx.cancel_token().child_token(),
            )
            .await
    }
}
