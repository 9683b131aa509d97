//! Project data model shared by the store, the backend bridge and the orchestrator.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{InvalidConfig, ParseEnumError};

/// Identity of a stored dataset file, generated by the store.
pub type FileId = i64;

// ── Workflow stage ──

/// Workflow stages in their fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ingestion,
    Config,
    Training,
    Annotation,
    Results,
}

impl Stage {
    pub const ORDER: [Stage; 5] = [
        Stage::Ingestion,
        Stage::Config,
        Stage::Training,
        Stage::Annotation,
        Stage::Results,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingestion => "ingestion",
            Self::Config => "config",
            Self::Training => "training",
            Self::Annotation => "annotation",
            Self::Results => "results",
        }
    }

    /// Zero-based position in [`Stage::ORDER`].
    pub fn position(self) -> usize {
        self as usize
    }

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<Stage> {
        Self::ORDER.get(self.position() + 1).copied()
    }

    /// Stages the user has already navigated past.
    pub fn completed(self) -> &'static [Stage] {
        &Self::ORDER[..self.position()]
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ORDER
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("stage", s))
    }
}

// ── File role ──

/// Slot a stored file fills in the next training call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Annotated,
    Unannotated,
    Evaluation,
}

impl FileRole {
    pub const ALL: [FileRole; 3] = [
        FileRole::Annotated,
        FileRole::Unannotated,
        FileRole::Evaluation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Annotated => "annotated",
            Self::Unannotated => "unannotated",
            Self::Evaluation => "evaluation",
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("file role", s))
    }
}

// ── Validation status ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Valid,
    Invalid,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValidationStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "valid" => Ok(Self::Valid),
            "invalid" => Ok(Self::Invalid),
            other => Err(ParseEnumError::new("validation status", other)),
        }
    }
}

// ── Model configuration ──

/// How the backend picks samples from the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStrategy {
    #[default]
    Uncertainty,
    Margin,
    Random,
}

impl QueryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uncertainty => "uncertainty",
            Self::Margin => "margin",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for QueryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryStrategy {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uncertainty" => Ok(Self::Uncertainty),
            "margin" => Ok(Self::Margin),
            "random" => Ok(Self::Random),
            other => Err(ParseEnumError::new("query strategy", other)),
        }
    }
}

/// Active-learning parameters for the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Samples requested per cycle.
    pub increment_size: u32,
    /// Total planned cycles.
    pub total_iterations: u32,
    pub strategy: QueryStrategy,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            increment_size: 50,
            total_iterations: 10,
            strategy: QueryStrategy::Uncertainty,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<(), InvalidConfig> {
        if self.increment_size == 0 {
            return Err(InvalidConfig("increment size must be positive"));
        }
        if self.total_iterations == 0 {
            return Err(InvalidConfig("total iterations must be positive"));
        }
        Ok(())
    }
}

// ── Project ──

/// The singleton project record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub stage: Stage,
    pub config: ModelConfig,
    /// Starts at 1, incremented by each new cycle.
    pub current_iteration: u32,
    /// Samples ever selected for annotation, across all successful cycles.
    pub cumulative_selected: u64,
}

impl Default for Project {
    fn default() -> Self {
        Self {
            stage: Stage::Ingestion,
            config: ModelConfig::default(),
            current_iteration: 1,
            cumulative_selected: 0,
        }
    }
}

// ── Stored files ──

/// An uploaded dataset file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub id: FileId,
    pub name: String,
    /// Content length in bytes.
    pub size: u64,
    pub content: String,
    pub role: Option<FileRole>,
    pub validation: ValidationStatus,
}

// ── Annotation ──

/// A sample queued for human boundary review.
///
/// A boundary at index `i` is a cut between character `i` and `i + 1`;
/// an empty set means the word is a single morpheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationWord {
    pub id: String,
    pub word: String,
    pub confidence: f64,
    pub boundaries: BTreeSet<usize>,
}

impl AnnotationWord {
    pub fn new(id: impl Into<String>, word: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: id.into(),
            word: word.into(),
            confidence,
            boundaries: BTreeSet::new(),
        }
    }

    /// Number of characters in the surface word.
    pub fn char_len(&self) -> usize {
        self.word.chars().count()
    }

    /// Replace the boundary set, dropping indices that cannot split the word.
    pub fn set_boundaries(&mut self, boundaries: impl IntoIterator<Item = usize>) {
        let limit = self.char_len().saturating_sub(1);
        self.boundaries = boundaries.into_iter().filter(|&i| i < limit).collect();
    }

    /// Number of morphemes implied by the boundary set.
    pub fn morpheme_count(&self) -> usize {
        self.boundaries.len() + 1
    }
}

/// A persisted annotation row: the word plus its confirmation flag.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRecord {
    pub cycle: u32,
    pub word: AnnotationWord,
    pub confirmed: bool,
}

// ── Cycle history ──

/// An immutable record of a submitted cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSnapshot {
    pub cycle: u32,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Samples annotated cumulatively up to and including this cycle.
    pub annotated_count: u64,
    pub increment_text: String,
    pub residual_text: String,
    pub evaluation_text: String,
    /// ISO 8601 timestamp string.
    pub completed_at: String,
}
