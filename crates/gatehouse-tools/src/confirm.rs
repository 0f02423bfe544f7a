// Dangerous-Tool Confirmation
// Interposes a confirm round-trip over the event bus before the inner tool
// runs. Approvals are memoized per session; autonomous contexts are refused
// outright because nobody is present to answer the prompt.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use gatehouse_core::{EventBus, TaskContext, ToolPermissions};
use gatehouse_types::{
    Event, EventPayload, EventType, PromptRequestPayload, ToolCallPayload, ToolResult, ToolSchema,
};

use crate::Tool;

pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(60);

const EVENT_SOURCE: &str = "tools";

pub struct ConfirmedTool {
    inner: Arc<dyn Tool>,
    bus: EventBus,
    permissions: ToolPermissions,
    timeout: Duration,
}

impl ConfirmedTool {
    pub fn new(inner: Arc<dyn Tool>, bus: EventBus, permissions: ToolPermissions) -> Self {
        Self {
            inner,
            bus,
            permissions,
            timeout: CONFIRM_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn await_confirmation(
        &self,
        name: &str,
        args: &Value,
        ctx: &TaskContext,
    ) -> anyhow::Result<()> {
        let token = Uuid::new_v4().to_string();
        // Subscribe before publishing so the response cannot slip past us.
        let mut sub = self.bus.subscribe(16, &[EventType::PromptResponse]);

        self.bus.publish(Event::new(
            EventPayload::ToolCall(ToolCallPayload {
                tool: name.to_string(),
                status: "started".to_string(),
                args: Some(args.clone()),
            }),
            EVENT_SOURCE,
            ctx.session_id(),
        ));
        self.bus.publish(Event::new(
            EventPayload::PromptRequest(PromptRequestPayload {
                prompt_type: "confirm".to_string(),
                label: format!("Allow tool `{name}`?"),
                token: token.clone(),
            }),
            EVENT_SOURCE,
            ctx.session_id(),
        ));

        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            tokio::select! {
                _ = ctx.cancel_token().cancelled() => {
                    anyhow::bail!("confirmation of tool {name} cancelled");
                }
                _ = tokio::time::sleep_until(deadline) => {
                    anyhow::bail!("timed out waiting for confirmation of tool {name}");
                }
                maybe = sub.recv() => {
                    let Some(event) = maybe else {
                        anyhow::bail!("event bus closed while awaiting confirmation of tool {name}");
                    };
                    let Ok(EventPayload::PromptResponse(response)) = event.decode() else {
                        continue;
                    };
                    if response.token != token {
                        // A response for some other pending prompt; keep draining.
                        debug!(tool = name, "ignoring prompt response for foreign token");
                        continue;
                    }
                    if response.cancelled {
                        anyhow::bail!("denied by user");
                    }
                    if let Some(session) = ctx.session_id() {
                        self.permissions.allow_for_session(session, name);
                    }
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl Tool for ConfirmedTool {
    fn schema(&self) -> ToolSchema {
        self.inner.schema()
    }

    async fn execute(&self, args: Value, ctx: &TaskContext) -> anyhow::Result<ToolResult> {
        let name = self.inner.schema().name;
        if self.permissions.is_allowed(ctx.session_id(), &name) {
            return self.inner.execute(args, ctx).await;
        }
        if ctx.is_autonomous() {
            anyhow::bail!(
                "tool {name} requires approval but is not in allowed list (autonomous mode)"
            );
        }
        self.await_confirmation(&name, &args, ctx).await?;
        self.inner.execute(args, ctx).await
    }
}
