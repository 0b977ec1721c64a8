//! Hook registry
//!
//! The host command layer gets a say at fixed points around request
//! handling. Hooks of one kind run in registration order; the first one
//! that returns [`HookAction::Abort`] stops the rest.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use cogmesh_core::AgentId;

/// Points at which hooks are invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HookKind {
    PreParse,
    PostParse,
    PreExec,
    PostExec,
    Error,
}

/// Handle returned by [`HookRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HookId(u64);

/// Whether processing should go on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    Continue,
    Abort,
}

/// What a hook gets to look at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    pub kind: HookKind,
    /// Agent that sent the request
    pub agent: AgentId,
    pub input: String,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl HookContext {
    pub fn new(kind: HookKind, agent: AgentId, input: impl Into<String>) -> Self {
        Self {
            kind,
            agent,
            input: input.into(),
            output: None,
            error: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

type Hook = Arc<dyn Fn(&HookContext) -> HookAction + Send + Sync>;

/// Hooks by kind
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<BTreeMap<HookKind, Vec<(HookId, Hook)>>>,
    next_id: AtomicU64,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, kind: HookKind, hook: F) -> HookId
    where
        F: Fn(&HookContext) -> HookAction + Send + Sync + 'static,
    {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks
            .write()
            .entry(kind)
            .or_default()
            .push((id, Arc::new(hook)));
        debug!(?kind, hook = id.0, "Hook registered");
        id
    }

    /// Returns `false` if no such hook was registered
    pub fn unregister(&self, kind: HookKind, id: HookId) -> bool {
        let mut hooks = self.hooks.write();
        let Some(list) = hooks.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(hook_id, _)| *hook_id != id);
        before != list.len()
    }

    /// Run every hook for `context.kind`
    ///
    /// Hooks run without the registry lock held, so they may register or
    /// unregister hooks themselves.
    pub fn invoke(&self, context: &HookContext) -> HookAction {
        let hooks: Vec<Hook> = match self.hooks.read().get(&context.kind) {
            Some(list) => list.iter().map(|(_, hook)| Arc::clone(hook)).collect(),
            None => return HookAction::Continue,
        };

        for hook in hooks {
            if hook(context) == HookAction::Abort {
                debug!(kind = ?context.kind, agent = %context.agent, "Hook aborted");
                return HookAction::Abort;
            }
        }
        HookAction::Continue
    }

    pub fn len(&self, kind: HookKind) -> usize {
        self.hooks.read().get(&kind).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().values().all(Vec::is_empty)
    }

    pub fn clear(&self) {
        self.hooks.write().clear();
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks.read();
        let counts: BTreeMap<HookKind, usize> =
            hooks.iter().map(|(kind, list)| (*kind, list.len())).collect();
        f.debug_struct("HookRegistry").field("hooks", &counts).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn context(kind: HookKind) -> HookContext {
        HookContext::new(kind, AgentId::new(2), "(+ 1 2)")
    }

    #[test]
    fn test_no_hooks_continue() {
        let hooks = HookRegistry::new();
        assert_eq!(hooks.invoke(&context(HookKind::PreExec)), HookAction::Continue);
        assert!(hooks.is_empty());
    }

    #[test]
    fn test_hooks_run_in_order_until_abort() {
        let hooks = HookRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for (n, action) in [(1, HookAction::Continue), (2, HookAction::Abort), (3, HookAction::Continue)] {
            let seen = Arc::clone(&seen);
            hooks.register(HookKind::PreExec, move |_| {
                seen.lock().unwrap().push(n);
                action
            });
        }

        assert_eq!(hooks.invoke(&context(HookKind::PreExec)), HookAction::Abort);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        // Other kinds are unaffected
        assert_eq!(hooks.invoke(&context(HookKind::PostExec)), HookAction::Continue);
    }

    #[test]
    fn test_unregister() {
        let hooks = HookRegistry::new();
        let id = hooks.register(HookKind::Error, |_| HookAction::Abort);
        assert_eq!(hooks.len(HookKind::Error), 1);

        assert!(!hooks.unregister(HookKind::PreExec, id));
        assert!(hooks.unregister(HookKind::Error, id));
        assert!(!hooks.unregister(HookKind::Error, id));
        assert_eq!(hooks.invoke(&context(HookKind::Error)), HookAction::Continue);
    }

    #[test]
    fn test_hook_sees_context() {
        let hooks = HookRegistry::new();
        hooks.register(HookKind::PostExec, |ctx| {
            if ctx.output.as_deref() == Some("3") {
                HookAction::Continue
            } else {
                HookAction::Abort
            }
        });

        let ok = context(HookKind::PostExec).with_output("3");
        assert_eq!(hooks.invoke(&ok), HookAction::Continue);
        let bad = context(HookKind::PostExec).with_output("4");
        assert_eq!(hooks.invoke(&bad), HookAction::Abort);
    }
}
