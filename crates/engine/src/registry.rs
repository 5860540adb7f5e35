//! The handler registry.

use std::sync::Arc;

use dashmap::DashMap;
use opsflow_core::BlockType;
use opsflow_workflow::{BlockCatalog, BlockDescriptor, control_descriptor};

use crate::handler::BlockHandler;

/// Registry mapping block type strings to their handlers.
///
/// Adding a block to the system is a registration here, not a subclass
/// anywhere. Read-mostly: runs share one registry without further locking.
///
/// The registry doubles as the compiler's [`BlockCatalog`], answering for
/// the built-in `control.*` blocks as well even though those never dispatch
/// through a handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<BlockType, Arc<dyn BlockHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a block type, replacing any previous one.
    pub fn register(&self, block_type: BlockType, handler: Arc<dyn BlockHandler>) {
        self.handlers.insert(block_type, handler);
    }

    /// Look up the handler for a block type.
    #[must_use]
    pub fn lookup(&self, block_type: &BlockType) -> Option<Arc<dyn BlockHandler>> {
        self.handlers
            .get(block_type)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a handler is registered for the type.
    #[must_use]
    pub fn contains(&self, block_type: &BlockType) -> bool {
        self.handlers.contains_key(block_type)
    }

    /// Registered block types, unordered.
    #[must_use]
    pub fn block_types(&self) -> Vec<BlockType> {
        self.handlers.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl BlockCatalog for HandlerRegistry {
    fn descriptor(&self, block_type: &BlockType) -> Option<BlockDescriptor> {
        if block_type.is_control() {
            return control_descriptor(block_type);
        }
        self.lookup(block_type).map(|handler| BlockDescriptor {
            inputs: handler.input_handles(),
            outputs: handler.output_handles(),
            dynamic_output_prefix: None,
        })
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.len())
            .finish()
    }
}
