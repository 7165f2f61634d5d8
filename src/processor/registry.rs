//! Dispatch table from task kind to processor.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{
    ChartProcessor, EditingProcessor, GenericProcessor, NumericalProcessor, ProcessContext,
    TaskProcessor,
};
use crate::error::{ConfigError, ProcessError};
use crate::task::{TaskKind, TaskRecord};

/// Maps each task kind to the processor that handles it.
///
/// Adding a kind means adding a `TaskKind` variant and registering a processor.
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<TaskKind, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in processors for every kind.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn TaskProcessor>; 4] = [
            Arc::new(ChartProcessor),
            Arc::new(NumericalProcessor),
            Arc::new(EditingProcessor),
            Arc::new(GenericProcessor),
        ];
        for processor in builtins {
            registry.processors.insert(processor.kind(), processor);
        }
        registry
    }

    /// Registers `processor` for `kind`. A second registration is an error.
    pub fn register(
        &mut self,
        kind: TaskKind,
        processor: Arc<dyn TaskProcessor>,
    ) -> Result<(), ConfigError> {
        if self.processors.contains_key(&kind) {
            return Err(ConfigError::DuplicateProcessor(kind.to_string()));
        }
        self.processors.insert(kind, processor);
        Ok(())
    }

    pub fn get(&self, kind: TaskKind) -> Option<&Arc<dyn TaskProcessor>> {
        self.processors.get(&kind)
    }

    pub fn contains(&self, kind: TaskKind) -> bool {
        self.processors.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Routes `record` to its processor.
    ///
    /// A kind with no processor aborts the run rather than skipping the task.
    pub async fn dispatch(
        &self,
        record: &TaskRecord,
        ctx: &ProcessContext,
    ) -> Result<Value, ProcessError> {
        let processor = self.get(record.kind).ok_or_else(|| {
            ProcessError::FatalConfiguration(format!(
                "no processor registered for task kind '{}'",
                record.kind
            ))
        })?;
        processor.process(record, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_covers_all_kinds() {
        let registry = ProcessorRegistry::standard();
        assert_eq!(registry.len(), TaskKind::ALL.len());
        for kind in TaskKind::ALL {
            assert!(registry.contains(kind));
            assert_eq!(registry.get(kind).map(|p| p.kind()), Some(kind));
        }
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ProcessorRegistry::new();
        assert!(registry.is_empty());
        registry
            .register(TaskKind::Chart, Arc::new(ChartProcessor))
            .unwrap();
        let err = registry
            .register(TaskKind::Chart, Arc::new(ChartProcessor))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProcessor(ref k) if k == "chart"));
    }
}
