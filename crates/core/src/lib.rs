//! # Conduit Core
//!
//! Core types shared by every Conduit crate: strongly-typed identifiers and
//! the well-known context property keys that interoperating pipelines rely
//! on.

pub mod id;
pub mod keys;

pub use id::{ContextId, PipelineId};
