//! Interactive cycle session: run cycles, review the queued words and submit.

use std::path::Path;

use anyhow::Context;
use morphloop_bridge::{StepEvent, StepPhase};
use morphloop_core::{GoldReference, Stage};
use morphloop_store::ProjectStore;
use morphloop_workflow::{Orchestrator, WorkflowError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use crate::display;

const HELP: &str = "\
commands:
  next | train        run the next cycle (or the first one)
  retry               re-run the current cycle
  w                   list queued words
  b <id> <i,j,..>     set boundaries of a word (`-` clears)
  c <id> / u <id>     confirm / unconfirm a word
  ca                  confirm every word
  gold <path>         fill and confirm words found in a gold file
  submit              commit the reviewed cycle
  skip                leave the cycle without committing
  infer [out]         segment the current pool with the trained model
  steps | status      show cycle steps / project state
  quit";

enum Flow {
    Continue,
    Quit,
}

pub async fn run<S: ProjectStore>(orch: &mut Orchestrator<S>) -> anyhow::Result<()> {
    let progress = tokio::spawn(echo_steps(orch.bridge().subscribe()));

    print_state(orch);
    println!("type `help` for commands");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{}> ", orch.stage());
        std::io::Write::flush(&mut std::io::stdout())?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match handle(orch, line.trim()).await {
            Ok(Flow::Quit) => break,
            Ok(Flow::Continue) => {}
            Err(e) => println!("error: {e:#}"),
        }
    }

    progress.abort();
    Ok(())
}

async fn handle<S: ProjectStore>(orch: &mut Orchestrator<S>, line: &str) -> anyhow::Result<Flow> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return Ok(Flow::Continue);
    };
    let arg = parts.next();

    match command {
        "help" | "?" => println!("{HELP}"),
        "quit" | "q" | "exit" => return Ok(Flow::Quit),
        "status" => print_state(orch),
        "steps" => display::print_steps(orch.steps()),
        "w" | "words" => display::print_words(orch.annotations()),
        "next" | "train" => {
            let result = match orch.stage() {
                Stage::Results => orch.new_cycle().await,
                Stage::Training => orch.retry_cycle().await,
                _ => orch.advance_to(Stage::Training).await,
            };
            after_cycle(orch, result)?;
        }
        "retry" => {
            let result = orch.retry_cycle().await;
            after_cycle(orch, result)?;
        }
        "b" => {
            let id = arg.context("usage: b <id> <i,j,..>")?;
            let boundaries = parse_boundaries(parts.next().unwrap_or("-"))?;
            if !orch.update_boundaries(id, boundaries)? {
                println!("no queued word {id}");
            }
            print_word(orch, id);
        }
        "c" => {
            let id = arg.context("usage: c <id>")?;
            if !orch.confirm(id)? {
                println!("no queued word {id}");
            }
        }
        "u" => {
            let id = arg.context("usage: u <id>")?;
            if !orch.unconfirm(id)? {
                println!("{id} was not confirmed");
            }
        }
        "ca" => {
            orch.confirm_all()?;
            display::print_words(orch.annotations());
        }
        "gold" => {
            let path = arg.context("usage: gold <path>")?;
            let text = read_text(Path::new(path)).await?;
            let gold = GoldReference::parse(&text);
            let filled = orch.autofill_from_gold(&gold)?;
            println!(
                "filled {} of {} words from {} gold entries",
                filled.len(),
                orch.annotations().len(),
                gold.len()
            );
        }
        "submit" => match orch.submit() {
            Ok(()) => {
                if let Some(snapshot) = orch.displayed_result() {
                    display::print_snapshot(snapshot);
                }
                println!("{} cycle(s) remaining; `next` to continue", orch.cycles_remaining());
            }
            Err(WorkflowError::NoPendingResult) => {
                println!("the result of this cycle was lost on restart; `retry` to re-run it");
            }
            Err(e) => return Err(e.into()),
        },
        "skip" => {
            orch.skip()?;
            println!("skipped; nothing committed");
        }
        "infer" => {
            let outcome = orch.run_inference().await?;
            match arg {
                Some(out) => {
                    tokio::fs::write(out, &outcome.predictions_text)
                        .await
                        .with_context(|| format!("writing {out}"))?;
                    println!("{} words segmented, written to {out}", outcome.total_words);
                }
                None => {
                    println!("{}", outcome.predictions_text);
                    println!("{} words segmented", outcome.total_words);
                }
            }
        }
        other => println!("unknown command `{other}`; type `help`"),
    }
    Ok(Flow::Continue)
}

fn after_cycle<S: ProjectStore>(
    orch: &Orchestrator<S>,
    result: Result<(), WorkflowError>,
) -> anyhow::Result<()> {
    match result {
        Ok(()) => {
            if let Some(pending) = orch.pending_result() {
                display::print_pending(pending);
            }
            display::print_words(orch.annotations());
            Ok(())
        }
        Err(e @ (WorkflowError::Cycle(_) | WorkflowError::Backend(_))) => {
            display::print_steps(orch.steps());
            println!("cycle failed: {e}; `retry` to run it again");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn print_state<S: ProjectStore>(orch: &Orchestrator<S>) {
    let project = orch.project();
    println!(
        "stage {}  cycle {}  remaining {}  selected so far {}",
        project.stage,
        project.current_iteration,
        orch.cycles_remaining(),
        project.cumulative_selected
    );
    match project.stage {
        Stage::Training => println!("no cycle result; `retry` to run the cycle"),
        Stage::Annotation => {
            match orch.pending_result() {
                Some(pending) => display::print_pending(pending),
                None => println!("metrics of this cycle were not kept across restart"),
            }
            display::print_words(orch.annotations());
        }
        Stage::Results => {
            if let Some(snapshot) = orch.displayed_result() {
                display::print_snapshot(snapshot);
            }
        }
        _ => {}
    }
}

fn print_word<S: ProjectStore>(orch: &Orchestrator<S>, id: &str) {
    if let Some(word) = orch.annotations().word(id) {
        println!(
            "  {id}: {} ({} morphemes)",
            morphloop_core::target::render_compact(&word.word, &word.boundaries),
            word.morpheme_count()
        );
    }
}

/// Parse `1,4` into boundary indices; `-` means none.
fn parse_boundaries(text: &str) -> anyhow::Result<Vec<usize>> {
    if text == "-" {
        return Ok(Vec::new());
    }
    text.split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim()
                .parse::<usize>()
                .with_context(|| format!("bad boundary index {s:?}"))
        })
        .collect()
}

pub async fn read_text(path: &Path) -> anyhow::Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))
}

async fn echo_steps(mut events: broadcast::Receiver<StepEvent>) {
    loop {
        match events.recv().await {
            Ok(StepEvent {
                step,
                phase: StepPhase::Started,
                ..
            }) => println!("  > {step}"),
            Ok(StepEvent {
                step,
                phase: StepPhase::Done,
                detail,
            }) => match detail {
                Some(detail) => println!("  + {step}: {detail}"),
                None => println!("  + {step}"),
            },
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
