//! Named kernel generators.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::codegen::{CodegenError, CodegenResult, KernelGenerator, ReferenceGenerator};

/// Lookup table from generator name to implementation.
///
/// Constructed explicitly and passed to [`CompiledNetwork::compile`](super::CompiledNetwork::compile).
#[derive(Clone, Default)]
pub struct GeneratorRegistry {
    generators: HashMap<String, Arc<dyn KernelGenerator>>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the reference generator.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ReferenceGenerator::new()));
        registry
    }

    /// Returns the generator previously registered under the same name.
    pub fn register(&mut self, generator: Arc<dyn KernelGenerator>) -> Option<Arc<dyn KernelGenerator>> {
        self.generators
            .insert(generator.name().to_string(), generator)
    }

    pub fn get(&self, name: &str) -> CodegenResult<Arc<dyn KernelGenerator>> {
        self.generators
            .get(name)
            .cloned()
            .ok_or_else(|| CodegenError::GeneratorNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.generators.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.generators.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for GeneratorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorRegistry")
            .field("generators", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{CompileArgs, CompiledKernel};
    use crate::layout::ElementType;

    struct NullGenerator;

    impl KernelGenerator for NullGenerator {
        fn name(&self) -> &str {
            "null"
        }

        fn supports(&self, _element_type: ElementType) -> bool {
            false
        }

        fn generate(&self, _args: &CompileArgs) -> CodegenResult<Option<CompiledKernel>> {
            Ok(None)
        }
    }

    #[test]
    fn test_defaults_hold_reference() {
        let registry = GeneratorRegistry::with_defaults();
        assert!(registry.contains("reference"));
        assert_eq!(registry.get("reference").unwrap().name(), "reference");
    }

    #[test]
    fn test_missing_generator() {
        let registry = GeneratorRegistry::new();
        assert_eq!(
            registry.get("jit").err(),
            Some(CodegenError::GeneratorNotFound("jit".to_string()))
        );
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = GeneratorRegistry::with_defaults();
        assert!(registry.register(Arc::new(NullGenerator)).is_none());
        assert!(registry.register(Arc::new(NullGenerator)).is_some());
        assert_eq!(registry.names(), vec!["null".to_string(), "reference".to_string()]);
    }
}
