pub mod annotation;
pub mod error;
pub mod gold;
pub mod model;
pub mod schema;
pub mod target;

pub use annotation::AnnotationState;
pub use error::{FormatError, InvalidConfig, ParseEnumError};
pub use gold::{ErrorClass, GoldReference, ScoreReport, WordScore, score_predictions};
pub use model::{
    AnnotationRecord, AnnotationWord, CycleSnapshot, FileId, FileRole, ModelConfig, Project,
    QueryStrategy, Stage, StoredFile, ValidationStatus,
};
pub use schema::cycles;
pub use target::{
    count_samples, decode_target_line, derive_source_view, encode_annotation_line,
    merge_annotations, validate_target_format,
};
