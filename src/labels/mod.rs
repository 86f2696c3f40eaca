//! Label assembly.
//!
//! # Data Flow
//! ```text
//! ObservationRecord
//!     → LabelBuilder::build (fields.rs provides the default mapping)
//!     → Label { ordered (name, value) pairs }
//!     → text ("Name: value" lines) or JSON
//! ```
//!
//! Rendering to documents (RTF, PDF, QR codes) happens outside this crate;
//! labels are plain data.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::providers::ObservationRecord;

pub mod fields;

pub use fields::FieldLabelBuilder;

/// One printable label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    /// Normalized observation reference ("12345", "MO678").
    pub observation: String,
    pub fields: Vec<LabelField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelField {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(observation: impl Into<String>) -> Self {
        Self {
            observation: observation.into(),
            fields: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push(LabelField {
            name: name.into(),
            value: value.into(),
        });
    }

    /// First value recorded under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in &self.fields {
            writeln!(f, "{}: {}", field.name, field.value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("observation record has no {0}")]
    MissingField(&'static str),
}

/// Turns a fetched record into a label.
pub trait LabelBuilder: Send + Sync {
    fn build(&self, record: &ObservationRecord) -> Result<Label, LabelError>;
}

/// Render labels as text, separated by blank lines.
pub fn render_text(labels: &[Label]) -> String {
    labels
        .iter()
        .map(Label::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_json(labels: &[Label]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(labels)
}
