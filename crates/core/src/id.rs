//! Identifier types for Conduit entities.
//!
//! All identifiers are newtype wrappers around UUIDs, providing type safety
//! and preventing mixing different ID types. IDs are `Copy` (16 bytes),
//! serialize as UUID strings, and support `v4()` random generation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            #[must_use]
            pub fn v4() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Zero-valued identifier.
            #[must_use]
            pub const fn nil() -> Self {
                Self(Uuid::nil())
            }

            /// Whether this is the zero-valued identifier.
            #[must_use]
            pub const fn is_nil(&self) -> bool {
                self.0.is_nil()
            }

            /// The underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::v4()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id! {
    /// Unique identifier for one pipeline execution context.
    ContextId
}

define_id! {
    /// Unique identifier for a pipeline instance.
    PipelineId
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn context_id_v4_creates_non_nil_uuid() {
        let id = ContextId::v4();
        assert!(!id.is_nil());
    }

    #[test]
    fn pipeline_id_v4_creates_non_nil_uuid() {
        let id = PipelineId::v4();
        assert!(!id.is_nil());
    }

    #[test]
    fn id_nil_creates_zero_valued_uuid() {
        let id = PipelineId::nil();
        assert!(id.is_nil());
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn id_parse_valid_uuid_string_succeeds() {
        let id: PipelineId = "550e8400-e29b-41d4-a716-446655440000".parse().unwrap();
        assert_eq!(id.to_string(), "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn id_parse_invalid_string_returns_error() {
        let result = "not-a-uuid".parse::<ContextId>();
        assert!(result.is_err());
    }

    #[test]
    fn id_copy_semantics_both_copies_usable() {
        let id1 = ContextId::v4();
        let id2 = id1;
        assert_eq!(id1, id2);
    }

    #[test]
    fn id_serializes_as_uuid_string() {
        let id = PipelineId::nil();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }

    #[test]
    fn ids_roundtrip_through_uuid() {
        let raw = Uuid::new_v4();
        let typed = ContextId::from_uuid(raw);
        assert_eq!(*typed.as_uuid(), raw);
    }
}
