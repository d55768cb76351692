//! Pipeline metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use conduit_core::PipelineId;

/// The pipeline templates Conduit ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineType {
    /// No template.
    Custom,
    /// One-at-a-time execution.
    Sequential,
    /// Concurrent execution.
    Parallel,
    /// Reacting to events.
    EventDriven,
    /// Fixed-size batches.
    Batch,
    /// Continuous element flow.
    Stream,
    /// Predicate-routed branches.
    Conditional,
    /// Long-running transaction with compensation.
    Saga,
    /// Input validation front.
    Validation,
    /// Data transformation with caching.
    Transformation,
}

/// Descriptive record attached to a pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMetadata {
    /// Unique pipeline identifier.
    pub id: PipelineId,
    /// Pipeline name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Template the pipeline was built from.
    pub pipeline_type: PipelineType,
    /// Version string.
    pub version: String,
    /// Author, when recorded.
    pub author: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub modified_at: DateTime<Utc>,
    /// Free-form tags.
    pub tags: Vec<String>,
    /// Template- and caller-defined properties.
    pub properties: HashMap<String, serde_json::Value>,
    /// Input type name, for diagnostics.
    pub input_type: String,
    /// Output type name, for diagnostics.
    pub output_type: String,
    /// Whether the pipeline accepts work.
    pub is_enabled: bool,
    /// Whether the pipeline is slated for removal.
    pub is_deprecated: bool,
}

impl PipelineMetadata {
    /// Create metadata for a named pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>, pipeline_type: PipelineType) -> Self {
        let now = Utc::now();
        Self {
            id: PipelineId::v4(),
            name: name.into(),
            description: String::new(),
            pipeline_type,
            version: "0.1.0".to_owned(),
            author: None,
            created_at: now,
            modified_at: now,
            tags: Vec::new(),
            properties: HashMap::new(),
            input_type: String::new(),
            output_type: String::new(),
            is_enabled: true,
            is_deprecated: false,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self.touch();
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self.touch();
        self
    }

    /// Set a metadata property.
    #[must_use]
    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self.touch();
        self
    }

    /// Record the input and output type names.
    pub fn record_types<In: 'static, Out: 'static>(&mut self) {
        self.input_type = std::any::type_name::<In>().to_owned();
        self.output_type = std::any::type_name::<Out>().to_owned();
        self.touch();
    }

    fn touch(&mut self) {
        self.modified_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metadata_has_identity_and_timestamps() {
        let meta = PipelineMetadata::new("orders", PipelineType::Sequential);
        assert!(!meta.id.is_nil());
        assert_eq!(meta.name, "orders");
        assert!(meta.is_enabled);
        assert!(!meta.is_deprecated);
        assert_eq!(meta.created_at, meta.modified_at);
    }

    #[test]
    fn record_types_captures_type_names() {
        let mut meta = PipelineMetadata::new("orders", PipelineType::Custom);
        meta.record_types::<String, i64>();
        assert!(meta.input_type.contains("String"));
        assert_eq!(meta.output_type, "i64");
    }

    #[test]
    fn metadata_roundtrips_through_serde() {
        let meta = PipelineMetadata::new("orders", PipelineType::Batch)
            .with_description("batch order intake")
            .with_tag("orders")
            .with_property("batch_size", 50);
        let json = serde_json::to_string(&meta).unwrap();
        let back: PipelineMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "orders");
        assert_eq!(back.properties["batch_size"], 50);
    }
}
