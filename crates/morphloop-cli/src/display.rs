//! Terminal rendering of files, review queues, step progress and reports.

use arrow::record_batch::RecordBatch;
use morphloop_core::target::render_compact;
use morphloop_core::{AnnotationState, CycleSnapshot, ScoreReport, StoredFile};
use morphloop_workflow::{PendingResult, StepList, StepStatus};

const MAX_SCORE_ROWS: usize = 40;

pub fn print_files(files: &[StoredFile]) {
    if files.is_empty() {
        println!("no files uploaded");
        return;
    }
    println!("{:>4}  {:<28} {:>9}  {:<12} {}", "id", "name", "bytes", "role", "status");
    for f in files {
        let role = f.role.map_or("-", |r| r.as_str());
        println!(
            "{:>4}  {:<28} {:>9}  {:<12} {}",
            f.id, f.name, f.size, role, f.validation
        );
    }
}

/// Queued words with their current segmentation, e.g. `[x] w3  walk!ed`.
pub fn print_words(state: &AnnotationState) {
    if state.is_empty() {
        println!("no words queued");
        return;
    }
    for word in state.words() {
        let mark = if state.is_confirmed(&word.id) { "x" } else { " " };
        println!(
            "  [{mark}] {:<6} {:<24} conf {:.3}",
            word.id,
            render_compact(&word.word, &word.boundaries),
            word.confidence
        );
    }
    println!("  {}/{} confirmed", state.confirmed_count(), state.len());
}

pub fn print_steps(steps: &StepList) {
    for s in steps.steps() {
        let icon = match s.status {
            StepStatus::Pending => " ",
            StepStatus::Active => ">",
            StepStatus::Done => "+",
            StepStatus::Error => "!",
        };
        match &s.detail {
            Some(detail) => println!("  {icon} {:<8} {:<8} {detail}", s.step, s.status),
            None => println!("  {icon} {:<8} {}", s.step, s.status),
        }
    }
}

pub fn print_pending(result: &PendingResult) {
    println!(
        "cycle {}: P {:.4}  R {:.4}  F1 {:.4}  selected {}  residual {}",
        result.cycle,
        result.precision,
        result.recall,
        result.f1,
        result.selected_count,
        result.residual_count
    );
}

pub fn print_snapshot(snapshot: &CycleSnapshot) {
    println!(
        "cycle {} committed {}: P {:.4}  R {:.4}  F1 {:.4}  annotated {}",
        snapshot.cycle,
        snapshot.completed_at,
        snapshot.precision,
        snapshot.recall,
        snapshot.f1,
        snapshot.annotated_count
    );
}

pub fn print_history(batch: &RecordBatch) -> anyhow::Result<()> {
    if batch.num_rows() == 0 {
        println!("no cycles committed");
        return Ok(());
    }
    arrow::util::pretty::print_batches(std::slice::from_ref(batch))?;
    Ok(())
}

pub fn print_score_report(report: &ScoreReport, errors_only: bool) {
    let rows: Vec<_> = report
        .words
        .iter()
        .filter(|w| !errors_only || w.class.is_error())
        .collect();
    for w in rows.iter().take(MAX_SCORE_ROWS) {
        println!(
            "  {:<20} {:<24} {:<24} {}",
            w.word,
            w.gold.as_deref().unwrap_or("-"),
            w.predicted,
            w.class.as_str()
        );
    }
    if rows.len() > MAX_SCORE_ROWS {
        println!("  ... {} more", rows.len() - MAX_SCORE_ROWS);
    }

    println!();
    println!(
        "words {}  scored {}  correct {}  no gold {}  gold not predicted {}",
        report.words.len(),
        report.scored(),
        report.correct(),
        report.no_gold(),
        report.gold_not_predicted
    );
    println!("word accuracy    {:.4}", report.word_accuracy());
    println!(
        "boundary P/R/F1  {:.4} / {:.4} / {:.4}",
        report.precision(),
        report.recall(),
        report.f1()
    );
    for (class, count) in report.error_breakdown() {
        println!("  {:<18} {count}", class.as_str());
    }
}
