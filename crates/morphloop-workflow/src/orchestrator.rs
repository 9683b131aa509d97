//! The cycle orchestrator: workflow stages, cycle execution, submission and
//! restore.
//!
//! Stages run `ingestion → config → training → annotation → results`, with
//! `results → training` starting the next cycle. Entering `training` runs a
//! cycle against the backend; a successful cycle queues its selected words
//! for review and moves to `annotation`. Submitting merges the confirmed
//! words into the annotated file, replaces the pool with the cycle's residual
//! and moves to `results`.
//!
//! The store is read before every backend request and written before every
//! stage change, so state can be rebuilt from it after a restart. The one
//! exception is the pending result of a cycle under review: it lives in
//! memory until submission.

use morphloop_bridge::{
    Bridge, CONTEXT_WIDTH, CycleOutcome, CycleRequest, InferenceOutcome, InferenceRequest,
    MAX_ITERATIONS,
};
use morphloop_core::{
    AnnotationRecord, AnnotationState, CycleSnapshot, FileId, FileRole, GoldReference,
    ModelConfig, Project, Stage, StoredFile, ValidationStatus, count_samples, derive_source_view,
    merge_annotations, validate_target_format,
};
use morphloop_store::ProjectStore;
use tracing::{debug, info, warn};

use crate::WorkflowError;
use crate::steps::StepList;

/// Metrics and snapshots of a finished cycle awaiting submission.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingResult {
    pub cycle: u32,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub selected_count: u64,
    pub residual_count: u64,
    pub increment_text: String,
    pub residual_text: String,
    pub evaluation_text: String,
    /// Annotated-file content before the first merge attempt of this cycle.
    merge_base: Option<String>,
}

impl PendingResult {
    fn from_outcome(cycle: u32, outcome: &CycleOutcome) -> Self {
        Self {
            cycle,
            precision: outcome.precision,
            recall: outcome.recall,
            f1: outcome.f1,
            selected_count: outcome.selected.len() as u64,
            residual_count: outcome.residual_count,
            increment_text: outcome.increment_text.clone(),
            residual_text: outcome.residual_text.clone(),
            evaluation_text: outcome.evaluation_text.clone(),
            merge_base: None,
        }
    }
}

/// Samples to request from a pool of `pool_size`: capped so a residual always
/// remains, except that a pool of one or fewer is taken whole.
pub fn effective_increment(requested: u32, pool_size: usize) -> u32 {
    let pool = u32::try_from(pool_size).unwrap_or(u32::MAX);
    if pool > 1 {
        requested.min(pool - 1)
    } else {
        pool
    }
}

pub struct Orchestrator<S> {
    store: S,
    bridge: Bridge,
    project: Project,
    annotations: AnnotationState,
    pending: Option<PendingResult>,
    steps: StepList,
    displayed: Option<CycleSnapshot>,
}

impl<S: ProjectStore> Orchestrator<S> {
    /// Rebuild the orchestrator from the store, creating a default project
    /// when none exists yet.
    pub fn restore(store: S, bridge: Bridge) -> Result<Self, WorkflowError> {
        let project = match store.load_project()? {
            Some(project) => project,
            None => {
                let project = Project::default();
                store.save_project(&project)?;
                info!("created new project");
                project
            }
        };

        let mut annotations = AnnotationState::new();
        let mut displayed = None;
        match project.stage {
            Stage::Annotation => {
                let rows = store.annotations(project.current_iteration)?;
                annotations.restore(rows.into_iter().map(|r| (r.word, r.confirmed)));
            }
            Stage::Results => displayed = store.latest_cycle()?,
            _ => {}
        }

        info!(
            stage = %project.stage,
            cycle = project.current_iteration,
            cumulative = project.cumulative_selected,
            queued = annotations.len(),
            "restored project"
        );
        Ok(Self {
            store,
            bridge,
            project,
            annotations,
            pending: None,
            steps: StepList::new(),
            displayed,
        })
    }

    // ── Accessors ──

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn stage(&self) -> Stage {
        self.project.stage
    }

    pub fn current_iteration(&self) -> u32 {
        self.project.current_iteration
    }

    pub fn completed_stages(&self) -> &'static [Stage] {
        self.project.stage.completed()
    }

    /// Planned cycles not yet started, counting the current one.
    pub fn cycles_remaining(&self) -> u32 {
        (self.project.config.total_iterations + 1).saturating_sub(self.project.current_iteration)
    }

    pub fn annotations(&self) -> &AnnotationState {
        &self.annotations
    }

    pub fn steps(&self) -> &StepList {
        &self.steps
    }

    pub fn pending_result(&self) -> Option<&PendingResult> {
        self.pending.as_ref()
    }

    /// The committed snapshot shown in the `results` stage.
    pub fn displayed_result(&self) -> Option<&CycleSnapshot> {
        self.displayed.as_ref()
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ── Ingestion ──

    /// Store an uploaded file with no role and `pending` validation.
    pub fn upload_file(&mut self, name: &str, content: &str) -> Result<StoredFile, WorkflowError> {
        let file = self.store.insert_file(name, content)?;
        info!(file_id = file.id, name, samples = count_samples(content), "uploaded file");
        Ok(file)
    }

    pub fn files(&self) -> Result<Vec<StoredFile>, WorkflowError> {
        Ok(self.store.files()?)
    }

    /// Validate a file and give it `role`. A malformed file is marked invalid
    /// and keeps whatever role it had.
    pub fn assign_role(&mut self, file_id: FileId, role: FileRole) -> Result<(), WorkflowError> {
        let file = self
            .store
            .file(file_id)?
            .ok_or(WorkflowError::UnknownFile(file_id))?;

        if let Err(source) = validate_target_format(&file.content) {
            self.store.set_validation(file_id, ValidationStatus::Invalid)?;
            warn!(file_id, role = %role, error = %source, "rejected role assignment");
            return Err(WorkflowError::Validation { file_id, source });
        }

        self.store.set_validation(file_id, ValidationStatus::Valid)?;
        self.store.assign_role(file_id, role)?;
        info!(file_id, role = %role, "assigned role");
        Ok(())
    }

    // ── Configuration ──

    pub fn set_config(&mut self, config: ModelConfig) -> Result<(), WorkflowError> {
        if self.bridge.is_busy() {
            return Err(WorkflowError::Busy);
        }
        config
            .validate()
            .map_err(|e| WorkflowError::Config(e.to_string()))?;
        self.project.config = config;
        self.store.save_project(&self.project)?;
        info!(
            increment = config.increment_size,
            iterations = config.total_iterations,
            strategy = %config.strategy,
            "updated model config"
        );
        Ok(())
    }

    // ── Navigation ──

    /// Move forward to `target`. Entering `training` runs a cycle; from
    /// `results` it starts the next one.
    pub async fn advance_to(&mut self, target: Stage) -> Result<(), WorkflowError> {
        let from = self.project.stage;
        match (from, target) {
            (Stage::Ingestion, Stage::Config) => {
                self.set_stage(Stage::Config)?;
                Ok(())
            }
            (Stage::Ingestion | Stage::Config, Stage::Training) => {
                self.require_training_roles()?;
                self.set_stage(Stage::Training)?;
                self.execute_cycle().await
            }
            (Stage::Results, Stage::Training) => self.new_cycle().await,
            _ => Err(WorkflowError::InvalidTransition { from, to: target }),
        }
    }

    fn set_stage(&mut self, stage: Stage) -> Result<(), WorkflowError> {
        let from = self.project.stage;
        self.project.stage = stage;
        self.store.save_project(&self.project)?;
        debug!(from = %from, to = %stage, "stage changed");
        Ok(())
    }

    fn require_training_roles(&self) -> Result<(), WorkflowError> {
        for role in [FileRole::Annotated, FileRole::Unannotated] {
            if self.store.file_with_role(role)?.is_none() {
                return Err(WorkflowError::Config(format!(
                    "no file has the {role} role"
                )));
            }
        }
        Ok(())
    }

    fn role_content(&self, role: FileRole) -> Result<StoredFile, WorkflowError> {
        self.store
            .file_with_role(role)?
            .ok_or_else(|| WorkflowError::Config(format!("no file has the {role} role")))
    }

    // ── Cycle ──

    /// Start the next cycle from `results`.
    pub async fn new_cycle(&mut self) -> Result<(), WorkflowError> {
        if self.project.stage != Stage::Results {
            return Err(WorkflowError::InvalidTransition {
                from: self.project.stage,
                to: Stage::Training,
            });
        }
        self.require_training_roles()?;

        self.project.current_iteration += 1;
        self.clear_cycle_state();
        self.set_stage(Stage::Training)?;
        info!(cycle = self.project.current_iteration, "starting new cycle");
        self.execute_cycle().await
    }

    /// Re-run the current cycle from `training` (after a failure) or from
    /// `annotation` (to discard the queued words, or when the pending result
    /// was lost on restart).
    pub async fn retry_cycle(&mut self) -> Result<(), WorkflowError> {
        let from = self.project.stage;
        if !matches!(from, Stage::Training | Stage::Annotation) {
            return Err(WorkflowError::InvalidTransition {
                from,
                to: Stage::Training,
            });
        }
        self.clear_cycle_state();
        if from != Stage::Training {
            self.set_stage(Stage::Training)?;
        }
        info!(cycle = self.project.current_iteration, "retrying cycle");
        self.execute_cycle().await
    }

    fn clear_cycle_state(&mut self) {
        self.annotations.reset();
        self.pending = None;
        self.steps.reset();
        self.displayed = None;
    }

    async fn execute_cycle(&mut self) -> Result<(), WorkflowError> {
        let cycle = self.project.current_iteration;
        let config = self.project.config;
        if cycle > config.total_iterations {
            warn!(
                cycle,
                planned = config.total_iterations,
                "running past the planned number of cycles"
            );
        }

        let annotated = self.role_content(FileRole::Annotated)?;
        let pool = self.role_content(FileRole::Unannotated)?;
        let evaluation = self
            .store
            .file_with_role(FileRole::Evaluation)?
            .map(|f| f.content)
            .unwrap_or_default();

        // A re-run of this cycle replaces the selections it already counted.
        let counted = self.store.annotations(cycle)?.len() as u64;
        let base = self.project.cumulative_selected.saturating_sub(counted);

        let pool_size = count_samples(&pool.content);
        let increment = effective_increment(config.increment_size, pool_size);
        let request = CycleRequest {
            annotated_text: annotated.content,
            evaluation_text: evaluation,
            pool_source_text: derive_source_view(&pool.content),
            pool_target_text: pool.content,
            increment_size: increment,
            max_iterations: MAX_ITERATIONS,
            context_width: CONTEXT_WIDTH,
            cumulative_selected: base,
            query_strategy: config.strategy,
        };

        self.steps.reset();
        info!(cycle, pool = pool_size, increment, "running cycle");
        let mut outcome = match self.run_backend_cycle(request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.steps.fail(&e.to_string());
                warn!(cycle, error = %e, "cycle failed");
                return Err(e);
            }
        };

        for word in &mut outcome.selected {
            let suggested = std::mem::take(&mut word.boundaries);
            word.set_boundaries(suggested);
        }
        let records: Vec<AnnotationRecord> = outcome
            .selected
            .iter()
            .map(|word| AnnotationRecord {
                cycle,
                word: word.clone(),
                confirmed: false,
            })
            .collect();
        self.store.put_annotations(cycle, &records)?;

        let pending = PendingResult::from_outcome(cycle, &outcome);
        self.project.cumulative_selected = base + pending.selected_count;
        self.annotations.replace_word_list(outcome.selected);
        self.set_stage(Stage::Annotation)?;

        info!(
            cycle,
            selected = pending.selected_count,
            residual = pending.residual_count,
            f1 = pending.f1,
            "cycle finished"
        );
        self.pending = Some(pending);
        self.sync_backend().await;
        Ok(())
    }

    /// Initialize the backend if needed, then run the cycle while folding
    /// step events into the visible step list.
    async fn run_backend_cycle(
        &mut self,
        request: CycleRequest,
    ) -> Result<CycleOutcome, WorkflowError> {
        let bridge = self.bridge.clone();
        let mut events = bridge.subscribe();
        bridge.init().await?;

        let call = bridge.run_cycle(request);
        tokio::pin!(call);
        let result = loop {
            tokio::select! {
                result = &mut call => break result,
                Ok(event) = events.recv() => self.steps.apply(&event),
            }
        };
        while let Ok(event) = events.try_recv() {
            self.steps.apply(&event);
        }
        Ok(result?)
    }

    async fn sync_backend(&self) {
        if let Err(e) = self.bridge.sync().await {
            warn!(error = %e, "backend persistence sync failed");
        }
    }

    // ── Annotation ──

    /// Replace a queued word's boundaries. Unknown ids are ignored.
    pub fn update_boundaries(
        &mut self,
        word_id: &str,
        boundaries: impl IntoIterator<Item = usize>,
    ) -> Result<bool, WorkflowError> {
        if !self.annotations.update_boundaries(word_id, boundaries) {
            return Ok(false);
        }
        self.persist_word(word_id)?;
        Ok(true)
    }

    pub fn confirm(&mut self, word_id: &str) -> Result<bool, WorkflowError> {
        if !self.annotations.confirm(word_id) {
            return Ok(false);
        }
        self.persist_word(word_id)?;
        Ok(true)
    }

    pub fn unconfirm(&mut self, word_id: &str) -> Result<bool, WorkflowError> {
        if !self.annotations.unconfirm(word_id) {
            return Ok(false);
        }
        self.persist_word(word_id)?;
        Ok(true)
    }

    pub fn confirm_all(&mut self) -> Result<(), WorkflowError> {
        self.annotations.confirm_all();
        self.persist_queue()
    }

    /// Fill boundaries of queued words found in `gold` and confirm them.
    /// Returns the ids that were filled.
    pub fn autofill_from_gold(
        &mut self,
        gold: &GoldReference,
    ) -> Result<Vec<String>, WorkflowError> {
        let filled = self.annotations.autofill_from_gold(gold);
        if !filled.is_empty() {
            self.persist_queue()?;
        }
        info!(filled = filled.len(), queued = self.annotations.len(), "gold auto-fill");
        Ok(filled)
    }

    fn persist_word(&self, word_id: &str) -> Result<(), WorkflowError> {
        if let Some(word) = self.annotations.word(word_id) {
            self.store.update_annotation(&AnnotationRecord {
                cycle: self.project.current_iteration,
                word: word.clone(),
                confirmed: self.annotations.is_confirmed(word_id),
            })?;
        }
        Ok(())
    }

    fn persist_queue(&self) -> Result<(), WorkflowError> {
        let records: Vec<AnnotationRecord> = self
            .annotations
            .words()
            .iter()
            .map(|word| AnnotationRecord {
                cycle: self.project.current_iteration,
                word: word.clone(),
                confirmed: self.annotations.is_confirmed(&word.id),
            })
            .collect();
        self.store
            .put_annotations(self.project.current_iteration, &records)?;
        Ok(())
    }

    // ── Submission ──

    /// Commit the reviewed cycle: snapshot, merge-back, residual replacement,
    /// then `results`. Each write happens before the next; a failure partway
    /// leaves the earlier writes in place and the stage at `annotation`.
    pub fn submit(&mut self) -> Result<(), WorkflowError> {
        if self.project.stage != Stage::Annotation {
            return Err(WorkflowError::InvalidTransition {
                from: self.project.stage,
                to: Stage::Results,
            });
        }
        if !self.annotations.all_confirmed() {
            return Err(WorkflowError::NotReady {
                confirmed: self.annotations.confirmed_count(),
                total: self.annotations.len(),
            });
        }
        if self.pending.is_none() {
            return Err(WorkflowError::NoPendingResult);
        }
        let annotated = self.role_content(FileRole::Annotated)?;
        let pool = self.role_content(FileRole::Unannotated)?;

        // A re-submit after a partial failure merges from the same base.
        if let Some(pending) = self.pending.as_mut() {
            pending.merge_base.get_or_insert(annotated.content);
        }
        let pending = self.pending.clone().ok_or(WorkflowError::NoPendingResult)?;
        let base = pending.merge_base.unwrap_or_default();

        let snapshot = CycleSnapshot {
            cycle: pending.cycle,
            precision: pending.precision,
            recall: pending.recall,
            f1: pending.f1,
            annotated_count: self.project.cumulative_selected,
            increment_text: pending.increment_text,
            residual_text: pending.residual_text,
            evaluation_text: pending.evaluation_text,
            completed_at: chrono::Utc::now().to_rfc3339(),
        };
        self.store.upsert_cycle(&snapshot)?;

        let merged = merge_annotations(&base, self.annotations.confirmed_words());
        self.store.update_file_content(annotated.id, &merged)?;
        self.store
            .update_file_content(pool.id, &snapshot.residual_text)?;

        self.set_stage(Stage::Results)?;
        info!(
            cycle = snapshot.cycle,
            merged = self.annotations.confirmed_count(),
            annotated = count_samples(&merged),
            pool = count_samples(&snapshot.residual_text),
            "submitted cycle"
        );
        self.pending = None;
        self.displayed = Some(snapshot);
        Ok(())
    }

    /// Leave `annotation` without committing anything; the next cycle reuses
    /// the same training set and pool.
    pub fn skip(&mut self) -> Result<(), WorkflowError> {
        if self.project.stage != Stage::Annotation {
            return Err(WorkflowError::InvalidTransition {
                from: self.project.stage,
                to: Stage::Results,
            });
        }
        self.pending = None;
        self.displayed = None;
        self.set_stage(Stage::Results)?;
        info!(cycle = self.project.current_iteration, "skipped annotation");
        Ok(())
    }

    // ── Inference ──

    /// Apply the trained model to the current unannotated pool.
    pub async fn run_inference(&mut self) -> Result<InferenceOutcome, WorkflowError> {
        let pool = self.role_content(FileRole::Unannotated)?;
        self.bridge.init().await?;
        let outcome = self
            .bridge
            .run_inference(InferenceRequest {
                pool_target_text: pool.content,
                context_width: CONTEXT_WIDTH,
            })
            .await?;
        info!(words = outcome.total_words, "inference finished");
        Ok(outcome)
    }

    // ── Reset ──

    /// Clear the store, wipe backend artifacts and start over at `ingestion`.
    pub async fn reset(&mut self) -> Result<(), WorkflowError> {
        if self.bridge.is_busy() {
            return Err(WorkflowError::Busy);
        }
        self.store.clear()?;
        self.project = Project::default();
        self.store.save_project(&self.project)?;
        self.clear_cycle_state();

        if let Err(e) = self.bridge.wipe().await {
            warn!(error = %e, "backend wipe failed");
        }
        info!("project reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    use morphloop_bridge::testing::ScriptedBackend;
    use morphloop_bridge::Step;
    use morphloop_core::{AnnotationWord, QueryStrategy, StoredFile};
    use morphloop_store::{MemoryStore, StoreError};

    use super::*;
    use crate::steps::StepStatus;

    const POOL: &str = "c a t s\nd o g s\nw a l k e d\nj u m p i n g\nr e d o\n\
                        u n d o\np l a y e r\nk i n d l y\nh o p e f u l\nb o x e s";

    fn setup(backend: &ScriptedBackend) -> Orchestrator<MemoryStore> {
        let bridge = Bridge::spawn(backend.clone());
        Orchestrator::restore(MemoryStore::new(), bridge).unwrap()
    }

    fn load_files(orch: &mut Orchestrator<MemoryStore>) -> (FileId, FileId) {
        let annotated = orch.upload_file("train.tgt", "r u n").unwrap();
        let pool = orch.upload_file("pool.tgt", POOL).unwrap();
        orch.assign_role(annotated.id, FileRole::Annotated).unwrap();
        orch.assign_role(pool.id, FileRole::Unannotated).unwrap();
        orch.set_config(ModelConfig {
            increment_size: 3,
            total_iterations: 5,
            strategy: QueryStrategy::Uncertainty,
        })
        .unwrap();
        (annotated.id, pool.id)
    }

    fn file(orch: &Orchestrator<impl ProjectStore>, id: FileId) -> StoredFile {
        orch.store().file(id).unwrap().unwrap()
    }

    fn confirm_with_one_boundary(orch: &mut Orchestrator<impl ProjectStore>) {
        let ids: Vec<String> = orch.annotations().words().iter().map(|w| w.id.clone()).collect();
        for id in ids {
            assert!(orch.update_boundaries(&id, [1]).unwrap());
            assert!(orch.confirm(&id).unwrap());
        }
    }

    #[tokio::test]
    async fn end_to_end_cycle() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        let (annotated, pool) = load_files(&mut orch);

        orch.advance_to(Stage::Config).await.unwrap();
        orch.advance_to(Stage::Training).await.unwrap();
        assert_eq!(orch.stage(), Stage::Annotation);
        assert_eq!(orch.annotations().len(), 3);
        assert_eq!(orch.pending_result().unwrap().residual_count, 7);
        assert!(orch.steps().all_done());

        let sent = backend.last_cycle().unwrap();
        assert_eq!(sent.increment_size, 3);
        assert_eq!(sent.cumulative_selected, 0);
        assert_eq!(sent.pool_source_text, derive_source_view(POOL));

        confirm_with_one_boundary(&mut orch);
        orch.submit().unwrap();
        assert_eq!(orch.stage(), Stage::Results);

        let annotated = file(&orch, annotated);
        assert_eq!(annotated.content.lines().count(), 4);
        assert_eq!(annotated.content, "r u n\nc a ! t s\nd o ! g s\nw a ! l k e d");
        let pool = file(&orch, pool);
        assert_eq!(count_samples(&pool.content), 7);
        assert_eq!(pool.content, sent_residual(POOL, 3));

        let snapshot = orch.displayed_result().unwrap();
        assert_eq!(snapshot.cycle, 1);
        assert_eq!(snapshot.annotated_count, 3);
        assert_eq!(orch.store().cycles().unwrap().len(), 1);
        assert_eq!(backend.requests_of("syncPersistence"), 1);
    }

    fn sent_residual(pool: &str, taken: usize) -> String {
        pool.lines().skip(taken).collect::<Vec<_>>().join("\n")
    }

    #[tokio::test]
    async fn training_requires_annotated_and_unannotated_roles() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        let pool = orch.upload_file("pool.tgt", POOL).unwrap();
        orch.assign_role(pool.id, FileRole::Unannotated).unwrap();

        let err = orch.advance_to(Stage::Training).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Config(_)));
        assert_eq!(orch.stage(), Stage::Ingestion);
        assert_eq!(backend.requests_of("runCycle"), 0);
    }

    #[tokio::test]
    async fn invalid_file_is_marked_and_not_assigned() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        let bad = orch.upload_file("bad.tgt", "ca t").unwrap();

        let err = orch.assign_role(bad.id, FileRole::Annotated).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation { file_id, .. } if file_id == bad.id));
        let stored = file(&orch, bad.id);
        assert_eq!(stored.validation, ValidationStatus::Invalid);
        assert_eq!(stored.role, None);

        assert!(matches!(
            orch.assign_role(99, FileRole::Annotated),
            Err(WorkflowError::UnknownFile(99))
        ));
    }

    #[tokio::test]
    async fn config_rejects_zero_values() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        let err = orch
            .set_config(ModelConfig {
                increment_size: 0,
                ..ModelConfig::default()
            })
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Config(_)));
        assert_eq!(orch.project().config, ModelConfig::default());
    }

    #[tokio::test]
    async fn backwards_transitions_are_rejected() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        orch.advance_to(Stage::Config).await.unwrap();
        assert!(matches!(
            orch.advance_to(Stage::Ingestion).await,
            Err(WorkflowError::InvalidTransition { .. })
        ));
        assert!(matches!(
            orch.advance_to(Stage::Results).await,
            Err(WorkflowError::InvalidTransition { .. })
        ));
        assert_eq!(orch.completed_stages(), &[Stage::Ingestion]);
    }

    #[tokio::test]
    async fn counters_follow_successful_cycles() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        load_files(&mut orch);

        orch.advance_to(Stage::Training).await.unwrap();
        let mut expected = 0;
        for n in 1..=3u32 {
            expected += orch.annotations().len() as u64;
            assert_eq!(orch.current_iteration(), n);
            assert_eq!(orch.project().cumulative_selected, expected);
            confirm_with_one_boundary(&mut orch);
            orch.submit().unwrap();
            if n < 3 {
                orch.advance_to(Stage::Training).await.unwrap();
                assert_eq!(backend.last_cycle().unwrap().cumulative_selected, expected);
            }
        }
        assert_eq!(orch.current_iteration(), 3);
        assert_eq!(orch.project().cumulative_selected, 9);
        assert_eq!(orch.cycles_remaining(), 3);
        assert_eq!(orch.store().cycles().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn submit_requires_every_word_confirmed() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        load_files(&mut orch);
        orch.advance_to(Stage::Training).await.unwrap();

        let first = orch.annotations().words()[0].id.clone();
        orch.confirm(&first).unwrap();
        assert!(matches!(
            orch.submit(),
            Err(WorkflowError::NotReady {
                confirmed: 1,
                total: 3
            })
        ));
        assert!(!orch.update_boundaries("nope", [1]).unwrap());
        orch.confirm_all().unwrap();
        orch.submit().unwrap();
    }

    #[tokio::test]
    async fn skip_commits_nothing() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        let (annotated, pool) = load_files(&mut orch);
        orch.advance_to(Stage::Training).await.unwrap();

        orch.skip().unwrap();
        assert_eq!(orch.stage(), Stage::Results);
        assert!(orch.store().cycles().unwrap().is_empty());
        assert_eq!(file(&orch, annotated).content, "r u n");
        assert_eq!(file(&orch, pool).content, POOL);

        orch.advance_to(Stage::Training).await.unwrap();
        assert_eq!(orch.current_iteration(), 2);
        assert_eq!(backend.last_cycle().unwrap().pool_target_text, POOL);
    }

    #[tokio::test]
    async fn cycle_error_leaves_training_and_store_untouched() {
        let backend = ScriptedBackend::new();
        backend.fail_next_cycle("out of memory");
        let mut orch = setup(&backend);
        load_files(&mut orch);

        let err = orch.advance_to(Stage::Training).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Cycle(ref m) if m == "out of memory"));
        assert_eq!(orch.stage(), Stage::Training);
        assert_eq!(orch.project().cumulative_selected, 0);
        assert!(orch.store().annotations(1).unwrap().is_empty());
        assert_eq!(orch.steps().status(Step::Train), StepStatus::Error);
        assert_eq!(orch.steps().status(Step::Init), StepStatus::Done);

        orch.retry_cycle().await.unwrap();
        assert_eq!(orch.stage(), Stage::Annotation);
        assert_eq!(orch.current_iteration(), 1);
    }

    #[tokio::test]
    async fn retry_does_not_double_count() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        load_files(&mut orch);
        orch.advance_to(Stage::Training).await.unwrap();
        assert_eq!(orch.project().cumulative_selected, 3);

        orch.retry_cycle().await.unwrap();
        assert_eq!(orch.project().cumulative_selected, 3);
        assert_eq!(backend.last_cycle().unwrap().cumulative_selected, 0);
    }

    #[tokio::test]
    async fn restore_reloads_annotation_queue() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        load_files(&mut orch);
        orch.advance_to(Stage::Training).await.unwrap();
        let first = orch.annotations().words()[0].id.clone();
        orch.update_boundaries(&first, [0]).unwrap();
        orch.confirm(&first).unwrap();

        let Orchestrator { store, bridge, .. } = orch;
        let mut orch = Orchestrator::restore(store, bridge).unwrap();
        assert_eq!(orch.stage(), Stage::Annotation);
        assert_eq!(orch.annotations().len(), 3);
        assert!(orch.annotations().is_confirmed(&first));
        assert_eq!(
            orch.annotations().word(&first).unwrap().boundaries,
            BTreeSet::from([0])
        );
        assert!(orch.pending_result().is_none());

        orch.confirm_all().unwrap();
        assert!(matches!(orch.submit(), Err(WorkflowError::NoPendingResult)));
        orch.retry_cycle().await.unwrap();
        orch.confirm_all().unwrap();
        orch.submit().unwrap();
        assert_eq!(orch.project().cumulative_selected, 3);
    }

    #[tokio::test]
    async fn restore_in_results_shows_latest_snapshot() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        load_files(&mut orch);
        orch.advance_to(Stage::Training).await.unwrap();
        orch.confirm_all().unwrap();
        orch.submit().unwrap();

        let Orchestrator { store, bridge, .. } = orch;
        let orch = Orchestrator::restore(store, bridge).unwrap();
        assert_eq!(orch.stage(), Stage::Results);
        assert_eq!(orch.displayed_result().unwrap().cycle, 1);
        assert_eq!(
            orch.completed_stages(),
            &[Stage::Ingestion, Stage::Config, Stage::Training, Stage::Annotation]
        );
    }

    #[tokio::test]
    async fn reset_clears_everything_and_wipes_backend() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        load_files(&mut orch);
        orch.advance_to(Stage::Training).await.unwrap();

        orch.reset().await.unwrap();
        assert_eq!(orch.stage(), Stage::Ingestion);
        assert_eq!(orch.project(), &Project::default());
        assert!(orch.files().unwrap().is_empty());
        assert!(orch.annotations().is_empty());
        assert_eq!(backend.requests_of("wipePersistence"), 1);
        assert!(!orch.bridge().model_exists());
    }

    #[tokio::test]
    async fn gold_autofill_confirms_known_words() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        load_files(&mut orch);
        orch.advance_to(Stage::Training).await.unwrap();

        let gold = GoldReference::parse("cat!s\ndog!s");
        let filled = orch.autofill_from_gold(&gold).unwrap();
        assert_eq!(filled.len(), 2);
        assert_eq!(orch.annotations().confirmed_count(), 2);
        let rows = orch.store().annotations(1).unwrap();
        assert_eq!(rows.iter().filter(|r| r.confirmed).count(), 2);
    }

    #[tokio::test]
    async fn inference_needs_a_trained_model() {
        let backend = ScriptedBackend::new();
        let mut orch = setup(&backend);
        load_files(&mut orch);
        assert!(matches!(
            orch.run_inference().await,
            Err(WorkflowError::Inference(_))
        ));

        orch.advance_to(Stage::Training).await.unwrap();
        let outcome = orch.run_inference().await.unwrap();
        assert_eq!(outcome.total_words, 10);
    }

    #[tokio::test]
    async fn sync_failure_does_not_fail_the_cycle() {
        let backend = ScriptedBackend::new();
        backend.fail_sync("quota exceeded");
        let mut orch = setup(&backend);
        load_files(&mut orch);
        orch.advance_to(Stage::Training).await.unwrap();
        assert_eq!(orch.stage(), Stage::Annotation);
    }

    #[test]
    fn increment_is_capped_below_pool_size() {
        assert_eq!(effective_increment(50, 10), 9);
        assert_eq!(effective_increment(3, 10), 3);
        assert_eq!(effective_increment(5, 1), 1);
        assert_eq!(effective_increment(5, 0), 0);
    }

    // ── Persistence failures ──

    /// Memory store whose file-content updates can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        /// Content updates still allowed before one fails.
        fail_after: Mutex<Option<usize>>,
    }

    impl FlakyStore {
        fn fail_content_update_after(&self, successes: usize) {
            *self.fail_after.lock().unwrap() = Some(successes);
        }
    }

    impl ProjectStore for FlakyStore {
        fn load_project(&self) -> Result<Option<Project>, StoreError> {
            self.inner.load_project()
        }
        fn save_project(&self, project: &Project) -> Result<(), StoreError> {
            self.inner.save_project(project)
        }
        fn insert_file(&self, name: &str, content: &str) -> Result<StoredFile, StoreError> {
            self.inner.insert_file(name, content)
        }
        fn file(&self, id: FileId) -> Result<Option<StoredFile>, StoreError> {
            self.inner.file(id)
        }
        fn files(&self) -> Result<Vec<StoredFile>, StoreError> {
            self.inner.files()
        }
        fn update_file_content(&self, id: FileId, content: &str) -> Result<(), StoreError> {
            {
                let mut fail_after = self.fail_after.lock().unwrap();
                match *fail_after {
                    Some(0) => {
                        *fail_after = None;
                        return Err(StoreError::Other("disk full".into()));
                    }
                    Some(n) => *fail_after = Some(n - 1),
                    None => {}
                }
            }
            self.inner.update_file_content(id, content)
        }
        fn assign_role(&self, id: FileId, role: FileRole) -> Result<(), StoreError> {
            self.inner.assign_role(id, role)
        }
        fn set_validation(&self, id: FileId, status: ValidationStatus) -> Result<(), StoreError> {
            self.inner.set_validation(id, status)
        }
        fn upsert_cycle(&self, snapshot: &CycleSnapshot) -> Result<(), StoreError> {
            self.inner.upsert_cycle(snapshot)
        }
        fn cycle(&self, cycle: u32) -> Result<Option<CycleSnapshot>, StoreError> {
            self.inner.cycle(cycle)
        }
        fn cycles(&self) -> Result<Vec<CycleSnapshot>, StoreError> {
            self.inner.cycles()
        }
        fn put_annotations(
            &self,
            cycle: u32,
            records: &[AnnotationRecord],
        ) -> Result<(), StoreError> {
            self.inner.put_annotations(cycle, records)
        }
        fn update_annotation(&self, record: &AnnotationRecord) -> Result<(), StoreError> {
            self.inner.update_annotation(record)
        }
        fn annotations(&self, cycle: u32) -> Result<Vec<AnnotationRecord>, StoreError> {
            self.inner.annotations(cycle)
        }
        fn clear(&self) -> Result<(), StoreError> {
            self.inner.clear()
        }
    }

    #[tokio::test]
    async fn merge_back_failure_is_surfaced_and_resubmit_is_safe() {
        let backend = ScriptedBackend::new();
        let bridge = Bridge::spawn(backend.clone());
        let mut orch = Orchestrator::restore(FlakyStore::default(), bridge).unwrap();
        let annotated = orch.upload_file("train.tgt", "r u n").unwrap();
        let pool = orch.upload_file("pool.tgt", POOL).unwrap();
        orch.assign_role(annotated.id, FileRole::Annotated).unwrap();
        orch.assign_role(pool.id, FileRole::Unannotated).unwrap();
        orch.advance_to(Stage::Training).await.unwrap();
        orch.confirm_all().unwrap();

        orch.store().fail_content_update_after(0);
        assert!(matches!(orch.submit(), Err(WorkflowError::Persistence(_))));
        assert_eq!(orch.stage(), Stage::Annotation);
        assert_eq!(orch.store().cycles().unwrap().len(), 1);
        assert_eq!(file(&orch, annotated.id).content, "r u n");

        orch.submit().unwrap();
        assert_eq!(orch.store().cycles().unwrap().len(), 1);
        assert_eq!(file(&orch, annotated.id).content.lines().count(), 10);
    }

    #[tokio::test]
    async fn resubmit_after_pool_write_failure_merges_once() {
        let backend = ScriptedBackend::new();
        let bridge = Bridge::spawn(backend.clone());
        let mut orch = Orchestrator::restore(FlakyStore::default(), bridge).unwrap();
        let annotated = orch.upload_file("train.tgt", "r u n").unwrap();
        let pool = orch.upload_file("pool.tgt", POOL).unwrap();
        orch.assign_role(annotated.id, FileRole::Annotated).unwrap();
        orch.assign_role(pool.id, FileRole::Unannotated).unwrap();
        orch.set_config(ModelConfig {
            increment_size: 3,
            total_iterations: 5,
            strategy: QueryStrategy::Uncertainty,
        })
        .unwrap();
        orch.advance_to(Stage::Training).await.unwrap();
        orch.confirm_all().unwrap();

        // The annotated file is written, the pool write fails.
        orch.store().fail_content_update_after(1);
        assert!(matches!(orch.submit(), Err(WorkflowError::Persistence(_))));
        assert_eq!(orch.stage(), Stage::Annotation);
        assert_eq!(count_samples(&file(&orch, annotated.id).content), 4);
        assert_eq!(count_samples(&file(&orch, pool.id).content), 10);

        orch.submit().unwrap();
        assert_eq!(orch.stage(), Stage::Results);
        assert_eq!(
            file(&orch, annotated.id).content,
            "r u n\nc a t s\nd o g s\nw a l k e d"
        );
        assert_eq!(count_samples(&file(&orch, pool.id).content), 7);
    }

    #[tokio::test]
    async fn backend_boundaries_past_the_word_are_dropped() {
        let backend = ScriptedBackend::new();
        backend.suggest_boundaries(&[1, 3, 40]);
        let mut orch = setup(&backend);
        let (annotated, _) = load_files(&mut orch);
        orch.advance_to(Stage::Training).await.unwrap();

        let cats = orch.annotations().word("w0").unwrap();
        assert_eq!(cats.word, "cats");
        assert_eq!(cats.boundaries, BTreeSet::from([1]));
        let stored = orch.store().annotations(1).unwrap();
        assert_eq!(stored[0].word.boundaries, BTreeSet::from([1]));

        orch.confirm_all().unwrap();
        orch.submit().unwrap();
        let content = file(&orch, annotated).content;
        assert_eq!(content.lines().nth(1), Some("c a ! t s"));
    }

    #[test]
    fn pending_result_counts_selection() {
        let outcome = CycleOutcome {
            precision: 0.5,
            recall: 0.4,
            f1: 0.44,
            selected: vec![AnnotationWord::new("w0", "cats", 0.2)],
            residual_count: 4,
            increment_text: "c a t s".into(),
            residual_text: String::new(),
            evaluation_text: String::new(),
        };
        let pending = PendingResult::from_outcome(2, &outcome);
        assert_eq!(pending.cycle, 2);
        assert_eq!(pending.selected_count, 1);
    }
}
