//! The immutable record handed from the acquisition runner to every sink.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Free-form scalar carried in [`SampleMetadata::fields`] and CSV `extra_` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Context describing where a sample came from, independent of its values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub station_id: String,
    pub sensor_name: String,
    pub unit: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// One calibrated reading, ready for any [`crate::SampleSink`].
///
/// Immutable after construction: sinks observe it, they never mutate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub channel: usize,
    pub timestamp_ns: i64,
    pub calibrated_values: BTreeMap<String, f64>,
    pub metadata: SampleMetadata,
}

impl Sample {
    pub fn new(
        channel: usize,
        timestamp_ns: i64,
        calibrated_values: BTreeMap<String, f64>,
        metadata: SampleMetadata,
    ) -> Self {
        Self {
            channel,
            timestamp_ns,
            calibrated_values,
            metadata,
        }
    }
}
