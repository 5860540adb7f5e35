//! Unique identifiers for Opsflow entities.
//!
//! Generated identifiers use [`domain-key`](https://crates.io/crates/domain-key)
//! `Uuid<D>` wrappers, parameterized by a unique domain marker so the compiler
//! rejects mixing an [`ExecutionId`] where a [`WorkflowId`] is expected.
//!
//! Both types are `Copy` (16 bytes) and support `v4()`, `nil()`,
//! `parse(&str)`, full serde (UUID string form), `Display`, `FromStr`, `Eq`,
//! `Ord`, and `Hash`.
//!
//! Node identifiers are a different beast: they are chosen by the workflow
//! author and live in [`crate::node`].

use domain_key::define_uuid;

// Re-export for downstream parse error handling
pub use domain_key::UuidParseError;

define_uuid!(pub ExecutionIdDomain => ExecutionId);
define_uuid!(pub WorkflowIdDomain => WorkflowId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_id_v4_creates_non_nil_uuid() {
        let id = ExecutionId::v4();
        assert!(!id.is_nil());
    }

    #[test]
    fn workflow_id_v4_creates_non_nil_uuid() {
        let id = WorkflowId::v4();
        assert!(!id.is_nil());
    }

    #[test]
    fn id_nil_creates_zero_valued_uuid() {
        let id = ExecutionId::nil();
        assert!(id.is_nil());
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn id_parse_valid_uuid_string_succeeds() {
        let id = WorkflowId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert!(!id.is_nil());
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn id_parse_invalid_string_returns_error() {
        assert!(WorkflowId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn id_copy_semantics_both_copies_usable() {
        let id1 = ExecutionId::v4();
        let id2 = id1;
        assert_eq!(id1, id2);
    }

    #[test]
    fn id_serde_json_roundtrip() {
        let id = ExecutionId::v4();
        let json = serde_json::to_string(&id).unwrap();
        let back: ExecutionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn different_id_types_are_incompatible() {
        // Type-level check: ExecutionId and WorkflowId are distinct types;
        // passing one where the other is expected is a compile error.
        fn accepts_execution(_id: ExecutionId) {}
        fn accepts_workflow(_id: WorkflowId) {}

        accepts_execution(ExecutionId::v4());
        accepts_workflow(WorkflowId::v4());
        // accepts_execution(WorkflowId::v4()); // Would not compile
    }

    #[test]
    fn id_hash_is_consistent() {
        use std::collections::HashSet;
        let id = ExecutionId::v4();
        let mut set = HashSet::new();
        set.insert(id);
        assert!(set.contains(&id));
    }
}
