//! Pluggable processing modules
//!
//! Modules attach under a unique name and go through `init`, any number of
//! `process` calls, then `cleanup`. The registry belongs to the process
//! context; there is no global module list.

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use cogmesh_core::CollaboratorError;

use crate::error::{NodeError, NodeResult};

/// A processing unit hosted by the node
pub trait CognitiveModule: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Called once before the module becomes visible
    fn init(&mut self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    fn process(&self, input: &str) -> Result<String, CollaboratorError>;

    /// Called once after the module is removed
    fn cleanup(&mut self) {}
}

/// Name and version of a registered module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub version: String,
}

fn info_of(module: &dyn CognitiveModule) -> ModuleInfo {
    ModuleInfo {
        name: module.name().to_string(),
        version: module.version().to_string(),
    }
}

/// Registered modules in registration order
#[derive(Default)]
pub struct ModuleRegistry {
    modules: RwLock<Vec<Box<dyn CognitiveModule>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize and register a module
    ///
    /// A failed `init` leaves nothing registered.
    pub fn register(&self, mut module: Box<dyn CognitiveModule>) -> NodeResult<ModuleInfo> {
        let info = info_of(module.as_ref());
        if info.name.is_empty() {
            return Err(NodeError::Config("module name must not be empty".into()));
        }
        if self.contains(&info.name) {
            return Err(NodeError::DuplicateModule(info.name));
        }

        module.init().map_err(|source| NodeError::ModuleInit {
            name: info.name.clone(),
            source,
        })?;

        let mut modules = self.modules.write();
        // Registered concurrently while we were initializing
        if modules.iter().any(|m| m.name() == info.name) {
            drop(modules);
            module.cleanup();
            return Err(NodeError::DuplicateModule(info.name));
        }
        modules.push(module);
        info!(module = %info.name, version = %info.version, "Module registered");
        Ok(info)
    }

    /// Remove a module and run its cleanup
    pub fn unregister(&self, name: &str) -> NodeResult<ModuleInfo> {
        let mut module = {
            let mut modules = self.modules.write();
            let index = modules
                .iter()
                .position(|m| m.name() == name)
                .ok_or_else(|| NodeError::ModuleNotFound(name.to_string()))?;
            modules.remove(index)
        };
        module.cleanup();
        debug!(module = name, "Module unregistered");
        Ok(info_of(module.as_ref()))
    }

    pub fn find(&self, name: &str) -> Option<ModuleInfo> {
        self.modules
            .read()
            .iter()
            .find(|m| m.name() == name)
            .map(|m| info_of(m.as_ref()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.read().iter().any(|m| m.name() == name)
    }

    pub fn list(&self) -> Vec<ModuleInfo> {
        self.modules
            .read()
            .iter()
            .map(|m| info_of(m.as_ref()))
            .collect()
    }

    /// Hand `input` to the named module
    pub fn process(&self, name: &str, input: &str) -> NodeResult<String> {
        let modules = self.modules.read();
        let module = modules
            .iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| NodeError::ModuleNotFound(name.to_string()))?;
        module.process(input).map_err(|source| NodeError::ModuleFailed {
            name: name.to_string(),
            source,
        })
    }

    /// Unregister everything, newest first
    pub fn cleanup_all(&self) -> Vec<ModuleInfo> {
        let drained: Vec<Box<dyn CognitiveModule>> = self.modules.write().drain(..).collect();
        drained
            .into_iter()
            .rev()
            .map(|mut module| {
                module.cleanup();
                info_of(module.as_ref())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.list())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Test module that records its lifecycle calls
    struct Recorder {
        name: &'static str,
        fail_init: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn boxed(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn CognitiveModule> {
            Box::new(Self {
                name,
                fail_init: false,
                log: Arc::clone(log),
            })
        }
    }

    impl CognitiveModule for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn version(&self) -> &str {
            "1.2.0"
        }

        fn init(&mut self) -> Result<(), CollaboratorError> {
            if self.fail_init {
                return Err(CollaboratorError::Failed("init refused".into()));
            }
            self.log.lock().unwrap().push(format!("init {}", self.name));
            Ok(())
        }

        fn process(&self, input: &str) -> Result<String, CollaboratorError> {
            Ok(input.to_uppercase())
        }

        fn cleanup(&mut self) {
            self.log.lock().unwrap().push(format!("cleanup {}", self.name));
        }
    }

    #[test]
    fn test_register_find_process() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ModuleRegistry::new();
        let info = registry.register(Recorder::boxed("upper", &log)).unwrap();
        assert_eq!(info.version, "1.2.0");

        assert_eq!(registry.find("upper"), Some(info));
        assert_eq!(registry.process("upper", "abc").unwrap(), "ABC");
        assert!(matches!(
            registry.process("lower", "abc"),
            Err(NodeError::ModuleNotFound(_))
        ));
        assert_eq!(*log.lock().unwrap(), vec!["init upper"]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ModuleRegistry::new();
        registry.register(Recorder::boxed("upper", &log)).unwrap();
        assert!(matches!(
            registry.register(Recorder::boxed("upper", &log)),
            Err(NodeError::DuplicateModule(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_init_leaves_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ModuleRegistry::new();
        let module = Box::new(Recorder {
            name: "broken",
            fail_init: true,
            log: Arc::clone(&log),
        });
        assert!(matches!(
            registry.register(module),
            Err(NodeError::ModuleInit { .. })
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_runs_cleanup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ModuleRegistry::new();
        registry.register(Recorder::boxed("upper", &log)).unwrap();

        registry.unregister("upper").unwrap();
        assert!(registry.find("upper").is_none());
        assert!(matches!(
            registry.unregister("upper"),
            Err(NodeError::ModuleNotFound(_))
        ));
        assert_eq!(*log.lock().unwrap(), vec!["init upper", "cleanup upper"]);
    }

    #[test]
    fn test_list_and_cleanup_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = ModuleRegistry::new();
        for name in ["a", "b", "c"] {
            registry.register(Recorder::boxed(name, &log)).unwrap();
        }
        let names: Vec<String> = registry.list().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let removed: Vec<String> = registry.cleanup_all().into_iter().map(|m| m.name).collect();
        assert_eq!(removed, vec!["c", "b", "a"]);
        assert!(registry.is_empty());
        assert_eq!(
            log.lock().unwrap()[3..].to_vec(),
            vec!["cleanup c", "cleanup b", "cleanup a"]
        );
    }
}
