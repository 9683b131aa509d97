//! Process-local project store.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use morphloop_core::{
    AnnotationRecord, CycleSnapshot, FileId, FileRole, Project, StoredFile, ValidationStatus,
};

use crate::{ProjectStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    project: Option<Project>,
    files: BTreeMap<FileId, StoredFile>,
    next_file_id: FileId,
    cycles: BTreeMap<u32, CycleSnapshot>,
    annotations: BTreeMap<u32, Vec<AnnotationRecord>>,
}

/// In-memory store. Contents live as long as the value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Other("memory store lock poisoned".into()))
    }
}

impl ProjectStore for MemoryStore {
    fn load_project(&self) -> Result<Option<Project>, StoreError> {
        Ok(self.lock()?.project.clone())
    }

    fn save_project(&self, project: &Project) -> Result<(), StoreError> {
        self.lock()?.project = Some(project.clone());
        Ok(())
    }

    fn insert_file(&self, name: &str, content: &str) -> Result<StoredFile, StoreError> {
        let mut tables = self.lock()?;
        tables.next_file_id += 1;
        let file = StoredFile {
            id: tables.next_file_id,
            name: name.to_string(),
            size: content.len() as u64,
            content: content.to_string(),
            role: None,
            validation: ValidationStatus::Pending,
        };
        tables.files.insert(file.id, file.clone());
        Ok(file)
    }

    fn file(&self, id: FileId) -> Result<Option<StoredFile>, StoreError> {
        Ok(self.lock()?.files.get(&id).cloned())
    }

    fn files(&self) -> Result<Vec<StoredFile>, StoreError> {
        Ok(self.lock()?.files.values().cloned().collect())
    }

    fn update_file_content(&self, id: FileId, content: &str) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let file = tables
            .files
            .get_mut(&id)
            .ok_or(StoreError::FileNotFound(id))?;
        file.content = content.to_string();
        file.size = content.len() as u64;
        Ok(())
    }

    fn assign_role(&self, id: FileId, role: FileRole) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if !tables.files.contains_key(&id) {
            return Err(StoreError::FileNotFound(id));
        }
        for file in tables.files.values_mut() {
            if file.id == id {
                file.role = Some(role);
            } else if file.role == Some(role) {
                file.role = None;
            }
        }
        Ok(())
    }

    fn set_validation(&self, id: FileId, status: ValidationStatus) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let file = tables
            .files
            .get_mut(&id)
            .ok_or(StoreError::FileNotFound(id))?;
        file.validation = status;
        Ok(())
    }

    fn upsert_cycle(&self, snapshot: &CycleSnapshot) -> Result<(), StoreError> {
        self.lock()?.cycles.insert(snapshot.cycle, snapshot.clone());
        Ok(())
    }

    fn cycle(&self, cycle: u32) -> Result<Option<CycleSnapshot>, StoreError> {
        Ok(self.lock()?.cycles.get(&cycle).cloned())
    }

    fn cycles(&self) -> Result<Vec<CycleSnapshot>, StoreError> {
        Ok(self.lock()?.cycles.values().cloned().collect())
    }

    fn put_annotations(&self, cycle: u32, records: &[AnnotationRecord]) -> Result<(), StoreError> {
        self.lock()?.annotations.insert(cycle, records.to_vec());
        Ok(())
    }

    fn update_annotation(&self, record: &AnnotationRecord) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let rows = tables.annotations.entry(record.cycle).or_default();
        match rows.iter_mut().find(|r| r.word.id == record.word.id) {
            Some(row) => *row = record.clone(),
            None => rows.push(record.clone()),
        }
        Ok(())
    }

    fn annotations(&self, cycle: u32) -> Result<Vec<AnnotationRecord>, StoreError> {
        Ok(self
            .lock()?
            .annotations
            .get(&cycle)
            .cloned()
            .unwrap_or_default())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let next_file_id = tables.next_file_id;
        *tables = Tables {
            next_file_id,
            ..Tables::default()
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use morphloop_core::{AnnotationWord, Stage};

    use super::*;

    fn snapshot(cycle: u32, f1: f64) -> CycleSnapshot {
        CycleSnapshot {
            cycle,
            precision: f1,
            recall: f1,
            f1,
            annotated_count: 3,
            increment_text: "c a t\n".into(),
            residual_text: "d o g\n".into(),
            evaluation_text: String::new(),
            completed_at: "2026-02-21T10:00:00Z".into(),
        }
    }

    #[test]
    fn project_absent_until_saved() {
        let store = MemoryStore::new();
        assert!(store.load_project().unwrap().is_none());
        let project = Project {
            stage: Stage::Config,
            ..Project::default()
        };
        store.save_project(&project).unwrap();
        assert_eq!(store.load_project().unwrap(), Some(project));
    }

    #[test]
    fn files_get_distinct_ids_and_pending_status() {
        let store = MemoryStore::new();
        let a = store.insert_file("train.tgt", "r u n").unwrap();
        let b = store.insert_file("pool.tgt", "c a t\nd o g").unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.size, 5);
        assert_eq!(a.validation, ValidationStatus::Pending);
        assert_eq!(store.files().unwrap().len(), 2);
    }

    #[test]
    fn last_role_assignment_wins() {
        let store = MemoryStore::new();
        let a = store.insert_file("a.tgt", "r u n").unwrap();
        let b = store.insert_file("b.tgt", "c a t").unwrap();
        store.assign_role(a.id, FileRole::Annotated).unwrap();
        store.assign_role(b.id, FileRole::Annotated).unwrap();

        let holder = store.file_with_role(FileRole::Annotated).unwrap().unwrap();
        assert_eq!(holder.id, b.id);
        assert_eq!(store.file(a.id).unwrap().unwrap().role, None);
        assert_eq!(store.files().unwrap().len(), 2);
    }

    #[test]
    fn unknown_file_errors() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.assign_role(42, FileRole::Evaluation),
            Err(StoreError::FileNotFound(42))
        ));
        assert!(matches!(
            store.update_file_content(42, "x"),
            Err(StoreError::FileNotFound(42))
        ));
    }

    #[test]
    fn content_update_tracks_size() {
        let store = MemoryStore::new();
        let file = store.insert_file("a.tgt", "r u n").unwrap();
        store.update_file_content(file.id, "r u n\nc a t").unwrap();
        let file = store.file(file.id).unwrap().unwrap();
        assert_eq!(file.size, 11);
    }

    #[test]
    fn cycle_upsert_overwrites() {
        let store = MemoryStore::new();
        store.upsert_cycle(&snapshot(1, 0.4)).unwrap();
        store.upsert_cycle(&snapshot(2, 0.5)).unwrap();
        store.upsert_cycle(&snapshot(1, 0.6)).unwrap();
        let cycles = store.cycles().unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].f1, 0.6);
        assert_eq!(store.latest_cycle().unwrap().unwrap().cycle, 2);
    }

    #[test]
    fn annotations_keep_order_and_update_in_place() {
        let store = MemoryStore::new();
        let records: Vec<_> = ["w0", "w1"]
            .iter()
            .map(|id| AnnotationRecord {
                cycle: 1,
                word: AnnotationWord::new(*id, "cats", 0.3),
                confirmed: false,
            })
            .collect();
        store.put_annotations(1, &records).unwrap();

        let mut updated = records[1].clone();
        updated.confirmed = true;
        store.update_annotation(&updated).unwrap();

        let rows = store.annotations(1).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].word.id, "w1");
        assert!(rows[1].confirmed);
        assert!(store.annotations(2).unwrap().is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let store = MemoryStore::new();
        store.save_project(&Project::default()).unwrap();
        let first = store.insert_file("a.tgt", "r u n").unwrap();
        store.upsert_cycle(&snapshot(1, 0.4)).unwrap();
        store.clear().unwrap();

        assert!(store.load_project().unwrap().is_none());
        assert!(store.files().unwrap().is_empty());
        assert!(store.cycles().unwrap().is_empty());
        let second = store.insert_file("b.tgt", "c a t").unwrap();
        assert_ne!(first.id, second.id);
    }
}
