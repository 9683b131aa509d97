//! A scripted in-process backend for exercising the bridge and its callers
//! without a worker process.
//!
//! Cycles select the first `incrementSize` sample lines of the pool and
//! return the remainder as the residual, so callers can check the data they
//! sent against what comes back.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use morphloop_core::AnnotationWord;
use morphloop_core::target::{decode_target_line, sample_lines};
use tokio::sync::Semaphore;

use crate::BridgeError;
use crate::protocol::{
    CycleOutcome, CycleRequest, Envelope, InferenceOutcome, InferenceRequest, Request, Response,
    Step,
};
use crate::transport::Transport;

#[derive(Default)]
struct Script {
    requests: Vec<Request>,
    outbox: VecDeque<Envelope<Response>>,
    model_exists: bool,
    init_failures: VecDeque<String>,
    cycle_failures: VecDeque<String>,
    sync_failure: Option<String>,
    suggested: Vec<usize>,
    hold: Option<Arc<Semaphore>>,
}

/// Cloneable handle: one clone goes to the bridge, the test keeps another.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a trained model from the start.
    pub fn with_model(self) -> Self {
        self.lock().model_exists = true;
        self
    }

    pub fn fail_next_init(&self, message: &str) {
        self.lock().init_failures.push_back(message.to_string());
    }

    pub fn fail_next_cycle(&self, message: &str) {
        self.lock().cycle_failures.push_back(message.to_string());
    }

    pub fn fail_sync(&self, message: &str) {
        self.lock().sync_failure = Some(message.to_string());
    }

    /// Attach these boundary indices, unchecked, to every selected word.
    pub fn suggest_boundaries(&self, boundaries: &[usize]) {
        self.lock().suggested = boundaries.to_vec();
    }

    /// Hold every cycle reply until a permit is added to the returned gate.
    pub fn hold_cycles(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.lock().hold = Some(gate.clone());
        gate
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.lock().requests.clone()
    }

    /// Number of received requests of the given wire kind.
    pub fn requests_of(&self, kind: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.kind() == kind)
            .count()
    }

    /// The most recent cycle request.
    pub fn last_cycle(&self) -> Option<CycleRequest> {
        self.lock().requests.iter().rev().find_map(|r| match r {
            Request::RunCycle(req) => Some(req.clone()),
            _ => None,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for ScriptedBackend {
    async fn send(&mut self, envelope: &Envelope<Request>) -> Result<(), BridgeError> {
        let mut script = self.lock();
        script.requests.push(envelope.body.clone());
        let replies = respond(&mut script, &envelope.body);
        script.outbox.extend(
            replies
                .into_iter()
                .map(|body| Envelope { id: envelope.id, body }),
        );
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Envelope<Response>>, BridgeError> {
        let (next, hold) = {
            let mut script = self.lock();
            (script.outbox.pop_front(), script.hold.clone())
        };
        if let (Some(envelope), Some(gate)) = (&next, hold)
            && matches!(
                envelope.body,
                Response::CycleDone(_) | Response::CycleError { .. }
            )
        {
            gate.acquire()
                .await
                .map_err(|_| BridgeError::Closed)?
                .forget();
        }
        Ok(next)
    }
}

fn respond(script: &mut Script, request: &Request) -> Vec<Response> {
    match request {
        Request::Init => match script.init_failures.pop_front() {
            Some(message) => vec![Response::Error { message }],
            None => vec![
                Response::Progress {
                    step: "loading model".into(),
                },
                Response::Ready {
                    model_exists: script.model_exists,
                },
            ],
        },
        Request::RunCycle(req) => {
            let mut replies = step_events();
            match script.cycle_failures.pop_front() {
                Some(message) => {
                    replies.truncate(3);
                    replies.push(Response::CycleError { message });
                }
                None => {
                    script.model_exists = true;
                    let outcome = select_from_pool(req, &script.suggested);
                    replies.push(Response::CycleDone(outcome));
                }
            }
            replies
        }
        Request::RunInference(req) => {
            if script.model_exists {
                vec![Response::InferenceDone(predict(req))]
            } else {
                vec![Response::InferenceError {
                    message: "no trained model".into(),
                }]
            }
        }
        Request::SyncPersistence => match &script.sync_failure {
            Some(message) => vec![Response::Error {
                message: message.clone(),
            }],
            None => vec![Response::Synced],
        },
        Request::WipePersistence => {
            script.model_exists = false;
            vec![Response::Wiped]
        }
    }
}

fn step_events() -> Vec<Response> {
    Step::ALL
        .into_iter()
        .flat_map(|step| {
            [
                Response::StepStarted { step },
                Response::StepDone {
                    step,
                    detail: Some(format!("{step} finished")),
                },
            ]
        })
        .collect()
}

fn select_from_pool(req: &CycleRequest, suggested: &[usize]) -> CycleOutcome {
    let lines: Vec<&str> = sample_lines(&req.pool_target_text).collect();
    let take = (req.increment_size as usize).min(lines.len());
    let (picked, rest) = lines.split_at(take);

    let selected = picked
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let (word, _) = decode_target_line(line);
            let mut word = AnnotationWord::new(format!("w{i}"), word, 0.1 + 0.05 * i as f64);
            word.boundaries = suggested.iter().copied().collect();
            word
        })
        .collect();

    let annotated = sample_lines(&req.annotated_text).count() as f64;
    let precision = (annotated / (annotated + 10.0)).min(1.0);
    CycleOutcome {
        precision,
        recall: precision,
        f1: precision,
        selected,
        residual_count: rest.len() as u64,
        increment_text: picked.join("\n"),
        residual_text: rest.join("\n"),
        evaluation_text: format!("# annotated samples: {annotated}\n"),
    }
}

fn predict(req: &InferenceRequest) -> InferenceOutcome {
    let words: Vec<String> = sample_lines(&req.pool_target_text)
        .map(|line| decode_target_line(line).0)
        .collect();
    InferenceOutcome {
        predictions_text: words.join("\n"),
        total_words: words.len() as u64,
    }
}
