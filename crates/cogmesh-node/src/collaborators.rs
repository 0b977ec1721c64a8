//! External collaborators
//!
//! The evaluator, pattern engine, and tensor kernels live outside cogmesh.
//! They attach under a name in the [`CollaboratorRegistry`]. Every call
//! checks the runtime feature flag first, then looks the collaborator up:
//!
//! - feature disabled: [`CollaboratorError::Unsupported`]
//! - nothing registered: [`CollaboratorError::Missing`]

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use cogmesh_core::{CollaboratorError, TruthValue};
use cogmesh_sync::PrimeShape;

use crate::config::FeatureFlags;

/// Evaluates expressions of the host language
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expression: &str) -> Result<String, CollaboratorError>;
}

/// Encoded text produced by the pattern engine
#[derive(Debug, Clone, PartialEq)]
pub struct Inference {
    pub text: String,
    pub truth: Option<TruthValue>,
}

impl Inference {
    pub fn new(text: impl Into<String>, truth: Option<TruthValue>) -> Self {
        Self {
            text: text.into(),
            truth,
        }
    }
}

/// Pattern encoding, inference, and transformation
pub trait PatternEngine: Send + Sync {
    fn encode(&self, text: &str) -> Result<Inference, CollaboratorError>;
    fn infer(&self, premises: &str) -> Result<Inference, CollaboratorError>;
    fn transform(&self, text: &str) -> Result<Inference, CollaboratorError>;
}

/// Opaque handle to a kernel-owned tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorHandle(pub u64);

/// Numeric kernels over kernel-owned tensors
pub trait TensorKernel: Send + Sync {
    fn allocate(&self, shape: &PrimeShape) -> Result<TensorHandle, CollaboratorError>;
    fn compute(&self, op: &str, inputs: &[TensorHandle]) -> Result<TensorHandle, CollaboratorError>;
    fn free(&self, handle: TensorHandle);
}

/// Kinds of collaborator, each gated by one feature flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollaboratorKind {
    Evaluator,
    PatternEngine,
    TensorKernel,
}

impl CollaboratorKind {
    /// Name of the feature flag that enables this kind
    pub fn feature(self) -> &'static str {
        match self {
            CollaboratorKind::Evaluator => "scheme",
            CollaboratorKind::PatternEngine => "grammar",
            CollaboratorKind::TensorKernel => "tensor",
        }
    }

    fn enabled(self, features: &FeatureFlags) -> bool {
        match self {
            CollaboratorKind::Evaluator => features.scheme,
            CollaboratorKind::PatternEngine => features.grammar,
            CollaboratorKind::TensorKernel => features.tensor,
        }
    }
}

/// A registered collaborator
#[derive(Clone)]
pub enum Collaborator {
    Evaluator(Arc<dyn Evaluator>),
    PatternEngine(Arc<dyn PatternEngine>),
    TensorKernel(Arc<dyn TensorKernel>),
}

impl Collaborator {
    pub fn kind(&self) -> CollaboratorKind {
        match self {
            Collaborator::Evaluator(_) => CollaboratorKind::Evaluator,
            Collaborator::PatternEngine(_) => CollaboratorKind::PatternEngine,
            Collaborator::TensorKernel(_) => CollaboratorKind::TensorKernel,
        }
    }
}

impl std::fmt::Debug for Collaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Collaborator::{:?}", self.kind())
    }
}

/// Collaborators by name
///
/// Calls without a name use the first collaborator of the right kind in
/// name order.
#[derive(Debug)]
pub struct CollaboratorRegistry {
    features: FeatureFlags,
    entries: RwLock<BTreeMap<String, Collaborator>>,
}

impl CollaboratorRegistry {
    pub fn new(features: FeatureFlags) -> Self {
        Self {
            features,
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn features(&self) -> &FeatureFlags {
        &self.features
    }

    /// Register under `name`, returning whatever was registered there before
    pub fn register(&self, name: impl Into<String>, collaborator: Collaborator) -> Option<Collaborator> {
        let name = name.into();
        debug!(name = %name, kind = ?collaborator.kind(), "Collaborator registered");
        self.entries.write().insert(name, collaborator)
    }

    pub fn unregister(&self, name: &str) -> Option<Collaborator> {
        self.entries.write().remove(name)
    }

    pub fn find(&self, name: &str) -> Option<Collaborator> {
        self.entries.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    fn check(&self, kind: CollaboratorKind) -> Result<(), CollaboratorError> {
        if kind.enabled(&self.features) {
            Ok(())
        } else {
            Err(CollaboratorError::Unsupported(kind.feature()))
        }
    }

    fn first_of(&self, kind: CollaboratorKind) -> Result<Collaborator, CollaboratorError> {
        self.check(kind)?;
        self.entries
            .read()
            .values()
            .find(|c| c.kind() == kind)
            .cloned()
            .ok_or_else(|| CollaboratorError::Missing(format!("{kind:?}")))
    }

    pub fn evaluator(&self) -> Result<Arc<dyn Evaluator>, CollaboratorError> {
        match self.first_of(CollaboratorKind::Evaluator)? {
            Collaborator::Evaluator(evaluator) => Ok(evaluator),
            _ => Err(CollaboratorError::Missing("Evaluator".into())),
        }
    }

    pub fn pattern_engine(&self) -> Result<Arc<dyn PatternEngine>, CollaboratorError> {
        match self.first_of(CollaboratorKind::PatternEngine)? {
            Collaborator::PatternEngine(engine) => Ok(engine),
            _ => Err(CollaboratorError::Missing("PatternEngine".into())),
        }
    }

    pub fn tensor_kernel(&self) -> Result<Arc<dyn TensorKernel>, CollaboratorError> {
        match self.first_of(CollaboratorKind::TensorKernel)? {
            Collaborator::TensorKernel(kernel) => Ok(kernel),
            _ => Err(CollaboratorError::Missing("TensorKernel".into())),
        }
    }

    /// Named evaluator lookup
    pub fn evaluator_named(&self, name: &str) -> Result<Arc<dyn Evaluator>, CollaboratorError> {
        self.check(CollaboratorKind::Evaluator)?;
        match self.find(name) {
            Some(Collaborator::Evaluator(evaluator)) => Ok(evaluator),
            _ => Err(CollaboratorError::Missing(name.to_string())),
        }
    }

    pub fn evaluate(&self, expression: &str) -> Result<String, CollaboratorError> {
        self.evaluator()?.evaluate(expression)
    }

    pub fn encode(&self, text: &str) -> Result<Inference, CollaboratorError> {
        self.pattern_engine()?.encode(text)
    }

    pub fn infer(&self, premises: &str) -> Result<Inference, CollaboratorError> {
        self.pattern_engine()?.infer(premises)
    }

    pub fn transform(&self, text: &str) -> Result<Inference, CollaboratorError> {
        self.pattern_engine()?.transform(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl Evaluator for Echo {
        fn evaluate(&self, expression: &str) -> Result<String, CollaboratorError> {
            Ok(format!("=> {expression}"))
        }
    }

    struct Deducer;

    impl PatternEngine for Deducer {
        fn encode(&self, text: &str) -> Result<Inference, CollaboratorError> {
            Ok(Inference::new(format!("(Concept \"{text}\")"), None))
        }

        fn infer(&self, premises: &str) -> Result<Inference, CollaboratorError> {
            Ok(Inference::new(
                format!("therefore {premises}"),
                Some(TruthValue::new(0.9, 0.8)),
            ))
        }

        fn transform(&self, _text: &str) -> Result<Inference, CollaboratorError> {
            Err(CollaboratorError::Failed("no rule".into()))
        }
    }

    #[test]
    fn test_missing_collaborator() {
        let registry = CollaboratorRegistry::new(FeatureFlags::default());
        assert!(matches!(
            registry.evaluate("(+ 1 2)"),
            Err(CollaboratorError::Missing(_))
        ));
    }

    #[test]
    fn test_disabled_feature_is_unsupported() {
        let features = FeatureFlags {
            scheme: false,
            ..FeatureFlags::default()
        };
        let registry = CollaboratorRegistry::new(features);
        registry.register("echo", Collaborator::Evaluator(Arc::new(Echo)));

        assert_eq!(
            registry.evaluate("(+ 1 2)"),
            Err(CollaboratorError::Unsupported("scheme"))
        );
        assert!(registry.find("echo").is_some());
    }

    #[test]
    fn test_typed_calls() {
        let registry = CollaboratorRegistry::new(FeatureFlags::default());
        registry.register("echo", Collaborator::Evaluator(Arc::new(Echo)));
        registry.register("pln", Collaborator::PatternEngine(Arc::new(Deducer)));

        assert_eq!(registry.evaluate("x").unwrap(), "=> x");
        let inference = registry.infer("a -> b").unwrap();
        assert_eq!(inference.text, "therefore a -> b");
        assert_eq!(inference.truth, Some(TruthValue::new(0.9, 0.8)));
        assert!(registry.encode("cat").unwrap().truth.is_none());
        assert!(matches!(registry.transform("x"), Err(CollaboratorError::Failed(_))));

        // Wrong kind under the name
        assert!(registry.evaluator_named("pln").is_err());
        assert!(registry.evaluator_named("echo").is_ok());
        assert!(matches!(registry.tensor_kernel(), Err(CollaboratorError::Missing(_))));
    }

    #[test]
    fn test_register_replaces_and_unregister() {
        let registry = CollaboratorRegistry::new(FeatureFlags::default());
        assert!(registry.register("a", Collaborator::Evaluator(Arc::new(Echo))).is_none());
        assert!(registry.register("a", Collaborator::Evaluator(Arc::new(Echo))).is_some());
        assert_eq!(registry.names(), vec!["a".to_string()]);

        assert!(registry.unregister("a").is_some());
        assert!(registry.find("a").is_none());
    }
}
