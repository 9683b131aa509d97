//! Visible progress of the running cycle.

use std::fmt;

use morphloop_bridge::{Step, StepEvent, StepPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Active,
    Done,
    Error,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Done => "done",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepState {
    pub step: Step,
    pub status: StepStatus,
    pub detail: Option<String>,
}

/// The four cycle steps in order, each with its latest status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepList {
    steps: Vec<StepState>,
}

impl Default for StepList {
    fn default() -> Self {
        Self::new()
    }
}

impl StepList {
    pub fn new() -> Self {
        Self {
            steps: Step::ALL
                .into_iter()
                .map(|step| StepState {
                    step,
                    status: StepStatus::Pending,
                    detail: None,
                })
                .collect(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn steps(&self) -> &[StepState] {
        &self.steps
    }

    pub fn status(&self, step: Step) -> StepStatus {
        self.get(step).map_or(StepStatus::Pending, |s| s.status)
    }

    pub fn apply(&mut self, event: &StepEvent) {
        if let Some(state) = self.steps.iter_mut().find(|s| s.step == event.step) {
            state.status = match event.phase {
                StepPhase::Started => StepStatus::Active,
                StepPhase::Done => StepStatus::Done,
            };
            if event.detail.is_some() {
                state.detail = event.detail.clone();
            }
        }
    }

    /// Mark the active step errored. With no active step, the first step that
    /// has not finished takes the error.
    pub fn fail(&mut self, message: &str) {
        let target = self
            .steps
            .iter()
            .position(|s| s.status == StepStatus::Active)
            .or_else(|| self.steps.iter().position(|s| s.status != StepStatus::Done));
        if let Some(idx) = target {
            self.steps[idx].status = StepStatus::Error;
            self.steps[idx].detail = Some(message.to_string());
        }
    }

    pub fn all_done(&self) -> bool {
        self.steps.iter().all(|s| s.status == StepStatus::Done)
    }

    fn get(&self, step: Step) -> Option<&StepState> {
        self.steps.iter().find(|s| s.step == step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(step: Step, phase: StepPhase) -> StepEvent {
        StepEvent {
            step,
            phase,
            detail: None,
        }
    }

    #[test]
    fn events_move_steps_forward() {
        let mut list = StepList::new();
        list.apply(&event(Step::Init, StepPhase::Started));
        assert_eq!(list.status(Step::Init), StepStatus::Active);
        list.apply(&StepEvent {
            step: Step::Init,
            phase: StepPhase::Done,
            detail: Some("loaded".into()),
        });
        assert_eq!(list.status(Step::Init), StepStatus::Done);
        assert_eq!(list.steps()[0].detail.as_deref(), Some("loaded"));
        assert_eq!(list.status(Step::Train), StepStatus::Pending);
    }

    #[test]
    fn failure_lands_on_active_step() {
        let mut list = StepList::new();
        list.apply(&event(Step::Init, StepPhase::Started));
        list.apply(&event(Step::Init, StepPhase::Done));
        list.apply(&event(Step::Train, StepPhase::Started));
        list.fail("diverged");
        assert_eq!(list.status(Step::Train), StepStatus::Error);
        assert_eq!(list.steps()[1].detail.as_deref(), Some("diverged"));
        assert_eq!(list.status(Step::Predict), StepStatus::Pending);
    }

    #[test]
    fn failure_without_active_step_marks_first_unfinished() {
        let mut list = StepList::new();
        list.fail("worker crashed");
        assert_eq!(list.status(Step::Init), StepStatus::Error);
    }

    #[test]
    fn all_done_after_every_step() {
        let mut list = StepList::new();
        for step in Step::ALL {
            list.apply(&event(step, StepPhase::Started));
            list.apply(&event(step, StepPhase::Done));
        }
        assert!(list.all_done());
        list.reset();
        assert!(!list.all_done());
    }
}
