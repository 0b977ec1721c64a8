//! Custom tracing layers for cogmesh

use tracing::{Subscriber, span};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

use crate::context::{AgentContextData, AgentContextGuard};

/// Layer that attaches the active agent context to new spans
///
/// Spans created while an [`AgentContextGuard`] is alive carry an
/// [`AgentContextExtension`], so later events can be traced back to the
/// agent even after the guard is gone.
#[derive(Debug, Default)]
pub struct AgentContextLayer;

impl AgentContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct AgentContextExtension {
    pub data: AgentContextData,
}

impl<S> Layer<S> for AgentContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(data) = AgentContextGuard::current() else {
            return;
        };
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(AgentContextExtension { data });
        }
    }
}
