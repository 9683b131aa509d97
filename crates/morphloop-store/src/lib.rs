//! Storage layer: the project store consulted by the cycle orchestrator.
//!
//! Four record kinds: the singleton project, uploaded files, committed cycle
//! snapshots (keyed by cycle number) and annotation rows (keyed by cycle
//! number and word id). [`MemoryStore`] is always available; [`DuckStore`]
//! persists to DuckDB behind the `duckdb` feature.

mod error;
mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::DuckStore;

use morphloop_core::{
    AnnotationRecord, CycleSnapshot, FileId, FileRole, Project, StoredFile, ValidationStatus,
};

/// Key/value project store.
///
/// Methods take `&self`; implementations own their interior locking.
pub trait ProjectStore: Send {
    // ── Project ──

    fn load_project(&self) -> Result<Option<Project>, StoreError>;

    fn save_project(&self, project: &Project) -> Result<(), StoreError>;

    // ── Files ──

    /// Store a new file with no role and `pending` validation.
    fn insert_file(&self, name: &str, content: &str) -> Result<StoredFile, StoreError>;

    fn file(&self, id: FileId) -> Result<Option<StoredFile>, StoreError>;

    /// All files ordered by id.
    fn files(&self) -> Result<Vec<StoredFile>, StoreError>;

    /// Replace a file's content wholesale; size follows the content.
    fn update_file_content(&self, id: FileId, content: &str) -> Result<(), StoreError>;

    /// Give `id` the role, clearing it from whichever file held it before.
    fn assign_role(&self, id: FileId, role: FileRole) -> Result<(), StoreError>;

    fn set_validation(&self, id: FileId, status: ValidationStatus) -> Result<(), StoreError>;

    /// The file currently holding `role`, if any.
    fn file_with_role(&self, role: FileRole) -> Result<Option<StoredFile>, StoreError> {
        Ok(self.files()?.into_iter().find(|f| f.role == Some(role)))
    }

    // ── Cycles ──

    /// Insert or overwrite the snapshot for its cycle number.
    fn upsert_cycle(&self, snapshot: &CycleSnapshot) -> Result<(), StoreError>;

    fn cycle(&self, cycle: u32) -> Result<Option<CycleSnapshot>, StoreError>;

    /// All snapshots ordered by cycle number.
    fn cycles(&self) -> Result<Vec<CycleSnapshot>, StoreError>;

    fn latest_cycle(&self) -> Result<Option<CycleSnapshot>, StoreError> {
        Ok(self.cycles()?.pop())
    }

    // ── Annotations ──

    /// Replace every annotation row of `cycle`, keeping the given order.
    fn put_annotations(&self, cycle: u32, records: &[AnnotationRecord]) -> Result<(), StoreError>;

    /// Insert or overwrite one annotation row.
    fn update_annotation(&self, record: &AnnotationRecord) -> Result<(), StoreError>;

    /// Annotation rows of `cycle` in their stored order.
    fn annotations(&self, cycle: u32) -> Result<Vec<AnnotationRecord>, StoreError>;

    // ── Reset ──

    /// Remove every record.
    fn clear(&self) -> Result<(), StoreError>;
}
