//! Wire protocol spoken with the training backend.
//!
//! Every message is a JSON object carrying a correlation `id` and a `type`
//! discriminant; field names are camelCase:
//!
//! ```json
//! {"id":3,"type":"runInference","poolTargetText":"c a t","contextWidth":4}
//! {"id":3,"type":"inferenceDone","predictionsText":"c a t","totalWords":1}
//! ```
//!
//! A response always carries the id of the request it answers.

use std::fmt;

use morphloop_core::{AnnotationWord, QueryStrategy};
use serde::{Deserialize, Serialize};

/// Training-iteration cap sent with every cycle.
pub const MAX_ITERATIONS: u32 = 100;

/// Feature context width sent with every cycle and inference batch.
pub const CONTEXT_WIDTH: u32 = 4;

/// A message plus its correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    #[serde(flatten)]
    pub body: T,
}

// ── Requests ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Request {
    Init,
    RunCycle(CycleRequest),
    RunInference(InferenceRequest),
    SyncPersistence,
    WipePersistence,
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::RunCycle(_) => "runCycle",
            Self::RunInference(_) => "runInference",
            Self::SyncPersistence => "syncPersistence",
            Self::WipePersistence => "wipePersistence",
        }
    }
}

/// Inputs for one train/predict/select round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRequest {
    pub annotated_text: String,
    pub evaluation_text: String,
    pub pool_target_text: String,
    pub pool_source_text: String,
    pub increment_size: u32,
    pub max_iterations: u32,
    pub context_width: u32,
    pub cumulative_selected: u64,
    #[serde(default)]
    pub query_strategy: QueryStrategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    pub pool_target_text: String,
    pub context_width: u32,
}

// ── Responses ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Response {
    Progress {
        step: String,
    },
    Ready {
        model_exists: bool,
    },
    Error {
        message: String,
    },
    StepStarted {
        step: Step,
    },
    StepDone {
        step: Step,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    CycleDone(CycleOutcome),
    CycleError {
        message: String,
    },
    InferenceDone(InferenceOutcome),
    InferenceError {
        message: String,
    },
    Synced,
    Wiped,
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Ready { .. } => "ready",
            Self::Error { .. } => "error",
            Self::StepStarted { .. } => "stepStarted",
            Self::StepDone { .. } => "stepDone",
            Self::CycleDone(_) => "cycleDone",
            Self::CycleError { .. } => "cycleError",
            Self::InferenceDone(_) => "inferenceDone",
            Self::InferenceError { .. } => "inferenceError",
            Self::Synced => "synced",
            Self::Wiped => "wiped",
        }
    }

    /// Progress and step messages precede the reply that ends a request.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Progress { .. } | Self::StepStarted { .. } | Self::StepDone { .. }
        )
    }
}

/// Result of a successful cycle. Metrics are already normalized to `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleOutcome {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub selected: Vec<AnnotationWord>,
    pub residual_count: u64,
    pub increment_text: String,
    pub residual_text: String,
    pub evaluation_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceOutcome {
    pub predictions_text: String,
    pub total_words: u64,
}

// ── Steps ──

/// Named phases a cycle reports while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Init,
    Train,
    Predict,
    Select,
}

impl Step {
    pub const ALL: [Step; 4] = [Step::Init, Step::Train, Step::Predict, Step::Select];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Train => "train",
            Self::Predict => "predict",
            Self::Select => "select",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    Started,
    Done,
}

/// A step transition forwarded to subscribers while a cycle runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepEvent {
    pub step: Step,
    pub phase: StepPhase,
    pub detail: Option<String>,
}
