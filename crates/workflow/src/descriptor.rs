//! Block I/O descriptors and the catalog seam.
//!
//! The compiler validates every edge against the source block's declared
//! outputs and the target block's declared inputs. Descriptors for external
//! blocks come from the handler registry through the [`BlockCatalog`] trait;
//! the `control.*` blocks are interpreted by the scheduler and their shapes
//! are fixed here.

use opsflow_core::{BlockType, Handle};

/// A declared input or output handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleSpec {
    /// Handle name.
    pub name: Handle,
    /// Whether the compiler warns when this input is left unconnected.
    /// Meaningless on outputs.
    pub required: bool,
}

impl HandleSpec {
    /// A required handle.
    #[must_use]
    pub fn required(name: impl Into<Handle>) -> Self {
        Self {
            name: name.into(),
            required: true,
        }
    }

    /// An optional handle.
    #[must_use]
    pub fn optional(name: impl Into<Handle>) -> Self {
        Self {
            name: name.into(),
            required: false,
        }
    }
}

/// The declared I/O surface of a block type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Declared input handles.
    pub inputs: Vec<HandleSpec>,
    /// Declared output handles.
    pub outputs: Vec<HandleSpec>,
    /// Accept any output handle starting with this prefix, in addition to
    /// the declared ones. `control.parallel` declares `branch_` here so
    /// `branch_1..branch_k` validate without enumerating k.
    pub dynamic_output_prefix: Option<String>,
}

impl BlockDescriptor {
    /// Create an empty descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input handle.
    #[must_use]
    pub fn input(mut self, name: impl Into<Handle>, required: bool) -> Self {
        self.inputs.push(HandleSpec {
            name: name.into(),
            required,
        });
        self
    }

    /// Add an output handle.
    #[must_use]
    pub fn output(mut self, name: impl Into<Handle>) -> Self {
        self.outputs.push(HandleSpec::optional(name));
        self
    }

    /// Accept dynamic outputs with the given prefix.
    #[must_use]
    pub fn dynamic_outputs(mut self, prefix: impl Into<String>) -> Self {
        self.dynamic_output_prefix = Some(prefix.into());
        self
    }

    /// Returns `true` if `handle` is a declared input.
    #[must_use]
    pub fn has_input(&self, handle: &str) -> bool {
        self.inputs.iter().any(|h| h.name == handle)
    }

    /// Returns `true` if `handle` is a declared (or dynamic) output.
    #[must_use]
    pub fn has_output(&self, handle: &str) -> bool {
        if self.outputs.iter().any(|h| h.name == handle) {
            return true;
        }
        self.dynamic_output_prefix
            .as_deref()
            .is_some_and(|prefix| handle.strip_prefix(prefix).is_some_and(|rest| !rest.is_empty()))
    }
}

/// Source of block descriptors for the compiler.
///
/// Implemented by the engine's handler registry. `None` means the block type
/// is unknown, which is a fatal compile error.
pub trait BlockCatalog {
    /// The descriptor for a block type, if registered.
    fn descriptor(&self, block_type: &BlockType) -> Option<BlockDescriptor>;
}

/// The fixed descriptor of a `control.*` block, or `None` for an unknown
/// control block name.
#[must_use]
pub fn control_descriptor(block_type: &BlockType) -> Option<BlockDescriptor> {
    if !block_type.is_control() {
        return None;
    }
    let descriptor = match block_type.name() {
        "start" => BlockDescriptor::new().output("out"),
        "end" => BlockDescriptor::new().input("in", true),
        "delay" | "variable_set" | "variable_get" => {
            BlockDescriptor::new().input("in", true).output("out")
        }
        "condition" => BlockDescriptor::new()
            .input("in", true)
            .output("true")
            .output("false"),
        "loop" => BlockDescriptor::new()
            .input("in", true)
            .output("iteration")
            .output("complete"),
        "parallel" => BlockDescriptor::new()
            .input("in", true)
            .output("out")
            .dynamic_outputs("branch_"),
        _ => return None,
    };
    Some(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn bt(s: &str) -> BlockType {
        BlockType::new(s).unwrap()
    }

    #[rstest]
    #[case("control.start", 0, 1)]
    #[case("control.end", 1, 0)]
    #[case("control.delay", 1, 1)]
    #[case("control.condition", 1, 2)]
    #[case("control.loop", 1, 2)]
    #[case("control.variable_set", 1, 1)]
    #[case("control.variable_get", 1, 1)]
    fn control_shapes(#[case] name: &str, #[case] inputs: usize, #[case] outputs: usize) {
        let d = control_descriptor(&bt(name)).unwrap();
        assert_eq!(d.inputs.len(), inputs);
        assert_eq!(d.outputs.len(), outputs);
    }

    #[test]
    fn parallel_accepts_dynamic_branches() {
        let d = control_descriptor(&bt("control.parallel")).unwrap();
        assert!(d.has_output("out"));
        assert!(d.has_output("branch_1"));
        assert!(d.has_output("branch_12"));
        assert!(!d.has_output("branch_"));
        assert!(!d.has_output("side"));
    }

    #[test]
    fn condition_outputs() {
        let d = control_descriptor(&bt("control.condition")).unwrap();
        assert!(d.has_output("true"));
        assert!(d.has_output("false"));
        assert!(!d.has_output("maybe"));
        assert!(d.has_input("in"));
    }

    #[test]
    fn unknown_control_name_is_none() {
        assert!(control_descriptor(&bt("control.teleport")).is_none());
        assert!(control_descriptor(&bt("traffic.ping")).is_none());
    }

    #[test]
    fn builder() {
        let d = BlockDescriptor::new()
            .input("in", true)
            .output("out")
            .output("err");
        assert!(d.has_input("in"));
        assert!(!d.has_input("out"));
        assert!(d.has_output("err"));
    }
}
