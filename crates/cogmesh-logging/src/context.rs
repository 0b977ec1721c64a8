//! Agent context injection for multi-agent logging
//!
//! Several agents often run in one process (tests, simulations). The
//! thread-local context set by [`AgentContextGuard`] tags spans created in
//! its scope; [`agent_span`] does the same for async tasks, which may hop
//! threads.

use std::cell::RefCell;

use tracing::Span;
use uuid::Uuid;

use cogmesh_core::AgentId;

/// Agent context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentContextData {
    pub agent_id: AgentId,
    /// Unique id of this process run
    pub instance_id: Uuid,
}

thread_local! {
    static AGENT_CONTEXT: RefCell<Option<AgentContextData>> = const { RefCell::new(None) };
}

/// RAII guard for agent context
///
/// Creating the guard sets the agent for the current thread; dropping it
/// restores whatever was set before.
///
/// # Example
///
/// ```ignore
/// use cogmesh_core::AgentId;
/// use cogmesh_logging::AgentContextGuard;
///
/// let _guard = AgentContextGuard::new(AgentId::new(3));
/// tracing::info!("Starting round");
/// ```
pub struct AgentContextGuard {
    previous: Option<AgentContextData>,
}

impl AgentContextGuard {
    pub fn new(agent_id: AgentId) -> Self {
        Self::with_instance_id(agent_id, Uuid::new_v4())
    }

    /// Keep a fixed instance id, e.g. one reused across restarts
    pub fn with_instance_id(agent_id: AgentId, instance_id: Uuid) -> Self {
        let data = AgentContextData {
            agent_id,
            instance_id,
        };
        let previous = AGENT_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// Get the current agent context (if any)
    pub fn current() -> Option<AgentContextData> {
        AGENT_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_agent_id() -> Option<AgentId> {
        Self::current().map(|ctx| ctx.agent_id)
    }
}

impl Drop for AgentContextGuard {
    fn drop(&mut self) {
        AGENT_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}

/// Span carrying the agent id, for instrumenting spawned tasks
///
/// ```ignore
/// tokio::spawn(async move { /* ... */ }.instrument(agent_span(agent_id)));
/// ```
pub fn agent_span(agent_id: AgentId) -> Span {
    tracing::info_span!("agent", agent_id = %agent_id)
}

/// Run a block with the agent context set
///
/// ```ignore
/// with_agent_context!(AgentId::new(3), {
///     tracing::info!("Processing message");
/// });
/// ```
#[macro_export]
macro_rules! with_agent_context {
    ($agent_id:expr, $body:block) => {{
        let _guard = $crate::context::AgentContextGuard::new($agent_id);
        $body
    }};
}
