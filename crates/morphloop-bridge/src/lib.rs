//! Bridge to the external training backend.
//!
//! A single task owns the backend connection ([`Transport`]) and serves
//! requests one at a time; [`Bridge`] is the cloneable handle callers use.
//! Step progress of a running cycle is broadcast as [`StepEvent`]s.

mod bridge;
mod error;
pub mod protocol;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::Bridge;
pub use error::BridgeError;
pub use protocol::{
    CONTEXT_WIDTH, CycleOutcome, CycleRequest, InferenceOutcome, InferenceRequest,
    MAX_ITERATIONS, Step, StepEvent, StepPhase,
};
pub use transport::{LineTransport, ProcessTransport, Transport};
