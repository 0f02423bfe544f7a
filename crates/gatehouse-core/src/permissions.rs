// Tool Permissions
// Process-wide allowlists for dangerous tools: a global set plus a
// per-session set. Mutated only by the confirmation wrapper when a user
// approves a tool.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct PermissionState {
    global: HashSet<String>,
    per_session: HashMap<String, HashSet<String>>,
}

#[derive(Clone, Default)]
pub struct ToolPermissions {
    state: Arc<Mutex<PermissionState>>,
}

impl ToolPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-approve a tool for every session.
    pub fn allow_global(&self, tool: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.global.insert(tool.to_string());
    }

    /// Memoize an approval for one session.
    pub fn allow_for_session(&self, session_id: &str, tool: &str) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .per_session
            .entry(session_id.to_string())
            .or_default()
            .insert(tool.to_string());
    }

    pub fn is_allowed(&self, session_id: Option<&str>, tool: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.global.contains(tool) {
            return true;
        }
        session_id
            .and_then(|id| state.per_session.get(id))
            .is_some_and(|tools| tools.contains(tool))
    }
}
