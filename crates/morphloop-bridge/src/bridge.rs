//! The backend actor and its cloneable handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::BridgeError;
use crate::protocol::{
    CycleOutcome, CycleRequest, Envelope, InferenceOutcome, InferenceRequest, Request, Response,
    StepEvent, StepPhase,
};
use crate::transport::Transport;

const STEP_CHANNEL_CAPACITY: usize = 64;

type InitFuture = Shared<BoxFuture<'static, Result<(), BridgeError>>>;

struct Call {
    request: Request,
    reply: oneshot::Sender<Result<Response, BridgeError>>,
}

/// Handle to the task that owns the backend connection.
///
/// Requests cross to the actor over a channel and are answered in order.
/// Only one cycle or inference request may be outstanding: a second one
/// fails with [`BridgeError::Busy`] before anything is sent.
#[derive(Clone)]
pub struct Bridge {
    calls: mpsc::Sender<Call>,
    steps: broadcast::Sender<StepEvent>,
    in_flight: Arc<AtomicBool>,
    model_exists: Arc<AtomicBool>,
    init: Arc<Mutex<Option<InitFuture>>>,
}

impl Bridge {
    /// Spawn the actor on the current tokio runtime.
    pub fn spawn<T>(transport: T) -> Self
    where
        T: Transport + 'static,
    {
        let (calls, rx) = mpsc::channel(8);
        let (steps, _) = broadcast::channel(STEP_CHANNEL_CAPACITY);
        tokio::spawn(run_actor(transport, rx, steps.clone()));
        Self {
            calls,
            steps,
            in_flight: Arc::new(AtomicBool::new(false)),
            model_exists: Arc::new(AtomicBool::new(false)),
            init: Arc::new(Mutex::new(None)),
        }
    }

    /// Receive step transitions of every cycle run after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StepEvent> {
        self.steps.subscribe()
    }

    /// Whether a cycle or inference request is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Whether the backend holds a trained model, as last reported.
    pub fn model_exists(&self) -> bool {
        self.model_exists.load(Ordering::Acquire)
    }

    /// Initialize the backend. Returns whether a trained model already exists.
    ///
    /// Concurrent callers share one in-flight initialization. A successful
    /// result is cached; a failed one is forgotten so the next call retries.
    /// Once cached, the model flag follows later cycles and wipes instead.
    pub async fn init(&self) -> Result<bool, BridgeError> {
        let shared = {
            let mut slot = self.init.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(shared) => shared.clone(),
                None => {
                    let shared = initialize(self.calls.clone(), self.model_exists.clone())
                        .boxed()
                        .shared();
                    *slot = Some(shared.clone());
                    shared
                }
            }
        };

        match shared.clone().await {
            Ok(()) => Ok(self.model_exists()),
            Err(e) => {
                let mut slot = self.init.lock().unwrap_or_else(|e| e.into_inner());
                if slot.as_ref().is_some_and(|s| s.ptr_eq(&shared)) {
                    *slot = None;
                }
                Err(e)
            }
        }
    }

    pub async fn run_cycle(&self, request: CycleRequest) -> Result<CycleOutcome, BridgeError> {
        let _guard = self.claim()?;
        match self.call(Request::RunCycle(request)).await? {
            Response::CycleDone(outcome) => {
                self.model_exists.store(true, Ordering::Release);
                Ok(outcome)
            }
            Response::CycleError { message } => Err(BridgeError::Cycle(message)),
            other => Err(unexpected("runCycle", &other)),
        }
    }

    pub async fn run_inference(
        &self,
        request: InferenceRequest,
    ) -> Result<InferenceOutcome, BridgeError> {
        let _guard = self.claim()?;
        match self.call(Request::RunInference(request)).await? {
            Response::InferenceDone(outcome) => Ok(outcome),
            Response::InferenceError { message } => Err(BridgeError::Inference(message)),
            other => Err(unexpected("runInference", &other)),
        }
    }

    /// Ask the backend to flush its persisted artifacts.
    pub async fn sync(&self) -> Result<(), BridgeError> {
        match self.call(Request::SyncPersistence).await? {
            Response::Synced => Ok(()),
            Response::Error { message } => Err(BridgeError::Persistence(message)),
            other => Err(unexpected("syncPersistence", &other)),
        }
    }

    /// Discard every model and artifact the backend holds. Safe to repeat.
    pub async fn wipe(&self) -> Result<(), BridgeError> {
        match self.call(Request::WipePersistence).await? {
            Response::Wiped => {
                self.model_exists.store(false, Ordering::Release);
                Ok(())
            }
            Response::Error { message } => Err(BridgeError::Persistence(message)),
            other => Err(unexpected("wipePersistence", &other)),
        }
    }

    fn claim(&self) -> Result<FlightGuard, BridgeError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| BridgeError::Busy)?;
        Ok(FlightGuard(self.in_flight.clone()))
    }

    async fn call(&self, request: Request) -> Result<Response, BridgeError> {
        call(&self.calls, request).await
    }
}

/// Clears the in-flight flag when the request finishes or is dropped.
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn call(calls: &mpsc::Sender<Call>, request: Request) -> Result<Response, BridgeError> {
    let (reply, rx) = oneshot::channel();
    calls
        .send(Call { request, reply })
        .await
        .map_err(|_| BridgeError::Closed)?;
    rx.await.map_err(|_| BridgeError::Closed)?
}

/// Runs once per successful initialization; the reported model flag is
/// stored before any caller sees the result.
async fn initialize(
    calls: mpsc::Sender<Call>,
    flag: Arc<AtomicBool>,
) -> Result<(), BridgeError> {
    match call(&calls, Request::Init).await? {
        Response::Ready { model_exists } => {
            info!(model_exists, "backend ready");
            flag.store(model_exists, Ordering::Release);
            Ok(())
        }
        Response::Error { message } => Err(BridgeError::Init(message)),
        other => Err(unexpected("init", &other)),
    }
}

fn unexpected(request: &str, response: &Response) -> BridgeError {
    BridgeError::Protocol(format!(
        "unexpected {} reply to {request}",
        response.kind()
    ))
}

// ── Actor ──

async fn run_actor<T: Transport>(
    mut transport: T,
    mut calls: mpsc::Receiver<Call>,
    steps: broadcast::Sender<StepEvent>,
) {
    let mut next_id: u64 = 0;
    while let Some(Call { request, reply }) = calls.recv().await {
        next_id += 1;
        let id = next_id;
        let kind = request.kind();
        debug!(id, kind, "dispatching backend request");
        let result = exchange(&mut transport, id, request, &steps).await;
        if let Err(e) = &result {
            warn!(id, kind, error = %e, "backend request failed");
        }
        if reply.send(result).is_err() {
            debug!(id, kind, "caller went away before the reply");
        }
    }
    debug!("backend actor stopped");
}

/// Send one request and relay events until its terminal reply arrives.
async fn exchange<T: Transport>(
    transport: &mut T,
    id: u64,
    request: Request,
    steps: &broadcast::Sender<StepEvent>,
) -> Result<Response, BridgeError> {
    transport.send(&Envelope { id, body: request }).await?;
    loop {
        let Some(Envelope { id: reply_to, body }) = transport.recv().await? else {
            return Err(BridgeError::Closed);
        };
        if reply_to != id {
            warn!(expected = id, got = reply_to, kind = body.kind(), "dropping uncorrelated reply");
            continue;
        }
        match body {
            Response::Progress { step } => info!(step, "backend init progress"),
            Response::StepStarted { step } => {
                let _ = steps.send(StepEvent {
                    step,
                    phase: StepPhase::Started,
                    detail: None,
                });
            }
            Response::StepDone { step, detail } => {
                let _ = steps.send(StepEvent {
                    step,
                    phase: StepPhase::Done,
                    detail,
                });
            }
            terminal => return Ok(terminal),
        }
    }
}
