use std::fmt;
use thiserror::Error;
use tokio::sync::watch;

use crate::detection::DetectionResult;

/// Pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Runtime,
    ModelLoad,
    AssetFetch,
    Decode,
    Preprocess,
    Inference,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Runtime => "runtime initialization",
            Stage::ModelLoad => "model load",
            Stage::AssetFetch => "asset fetch",
            Stage::Decode => "image decode",
            Stage::Preprocess => "preprocessing",
            Stage::Inference => "inference",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineState {
    Idle,
    ModelLoading,
    Detecting,
    Done { result: DetectionResult },
    Failed { stage: Stage, cause: String },
}

/// Payload-free tag of a [`PipelineState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Idle,
    ModelLoading,
    Detecting,
    Done,
    Failed,
}

impl PipelineState {
    pub fn kind(&self) -> StateKind {
        match self {
            PipelineState::Idle => StateKind::Idle,
            PipelineState::ModelLoading => StateKind::ModelLoading,
            PipelineState::Detecting => StateKind::Detecting,
            PipelineState::Done { .. } => StateKind::Done,
            PipelineState::Failed { .. } => StateKind::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind(), StateKind::Done | StateKind::Failed)
    }

    /// Text shown to the user for this state.
    pub fn status_text(&self) -> String {
        match self {
            PipelineState::Idle => String::new(),
            PipelineState::ModelLoading => "Loading model...".to_string(),
            PipelineState::Detecting => "Detecting objects...".to_string(),
            PipelineState::Done { result } if result.is_empty() => {
                "No objects detected".to_string()
            }
            PipelineState::Done { result } => result.summarize(),
            PipelineState::Failed { stage, cause } => {
                format!("Detection failed during {}: {}", stage, cause)
            }
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("Illegal state transition from {from:?} to {to:?}")]
    IllegalTransition { from: StateKind, to: StateKind },
}

/// One-directional `Idle -> ModelLoading -> Detecting -> Done` machine.
///
/// `Failed` is reachable from every non-terminal state. Observers subscribe
/// through a watch channel and always see the latest state.
#[derive(Debug)]
pub struct StateMachine {
    sender: watch::Sender<PipelineState>,
    history: Vec<StateKind>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(PipelineState::Idle);
        Self {
            sender,
            history: vec![StateKind::Idle],
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> PipelineState {
        self.sender.borrow().clone()
    }

    pub fn kind(&self) -> StateKind {
        self.sender.borrow().kind()
    }

    pub fn history(&self) -> &[StateKind] {
        &self.history
    }

    pub fn transition(&mut self, next: PipelineState) -> Result<(), StateError> {
        let from = self.kind();
        let to = next.kind();
        let allowed = matches!(
            (from, to),
            (StateKind::Idle, StateKind::ModelLoading)
                | (StateKind::ModelLoading, StateKind::Detecting)
                | (StateKind::Detecting, StateKind::Done)
                | (StateKind::Idle, StateKind::Failed)
                | (StateKind::ModelLoading, StateKind::Failed)
                | (StateKind::Detecting, StateKind::Failed)
        );
        if !allowed {
            return Err(StateError::IllegalTransition { from, to });
        }

        tracing::debug!("State transition {:?} -> {:?}", from, to);
        self.history.push(to);
        self.sender.send_replace(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, Detection};

    fn cat_result() -> DetectionResult {
        DetectionResult::new(vec![Detection {
            class_id: 17,
            label: "cat".to_string(),
            confidence: 0.8,
            bbox: BoundingBox::new(10.0, 10.0, 50.0, 60.0),
        }])
    }

    #[test]
    fn test_forward_transitions() {
        let mut machine = StateMachine::new();
        machine.transition(PipelineState::ModelLoading).unwrap();
        machine.transition(PipelineState::Detecting).unwrap();
        machine
            .transition(PipelineState::Done {
                result: cat_result(),
            })
            .unwrap();

        assert_eq!(
            machine.history(),
            &[
                StateKind::Idle,
                StateKind::ModelLoading,
                StateKind::Detecting,
                StateKind::Done
            ]
        );
        assert!(machine.current().is_terminal());
    }

    #[test]
    fn test_rejects_skips_and_regressions() {
        let mut machine = StateMachine::new();
        assert_eq!(
            machine.transition(PipelineState::Detecting),
            Err(StateError::IllegalTransition {
                from: StateKind::Idle,
                to: StateKind::Detecting
            })
        );

        machine.transition(PipelineState::ModelLoading).unwrap();
        machine.transition(PipelineState::Detecting).unwrap();
        assert!(machine.transition(PipelineState::ModelLoading).is_err());
        assert!(machine.transition(PipelineState::Idle).is_err());
        assert_eq!(machine.kind(), StateKind::Detecting);
    }

    #[test]
    fn test_terminal_states_stay_put() {
        let mut machine = StateMachine::new();
        machine.transition(PipelineState::ModelLoading).unwrap();
        machine
            .transition(PipelineState::Failed {
                stage: Stage::ModelLoad,
                cause: "network unreachable".to_string(),
            })
            .unwrap();

        assert!(machine.transition(PipelineState::Detecting).is_err());
        assert!(machine
            .transition(PipelineState::Failed {
                stage: Stage::Inference,
                cause: "again".to_string(),
            })
            .is_err());
        assert_eq!(
            machine.history(),
            &[StateKind::Idle, StateKind::ModelLoading, StateKind::Failed]
        );
    }

    #[test]
    fn test_status_text_distinguishes_empty_from_pending() {
        assert_eq!(PipelineState::Idle.status_text(), "");
        assert_eq!(PipelineState::ModelLoading.status_text(), "Loading model...");
        assert_eq!(
            PipelineState::Done {
                result: DetectionResult::default()
            }
            .status_text(),
            "No objects detected"
        );
        assert_eq!(
            PipelineState::Done {
                result: cat_result()
            }
            .status_text(),
            "cat"
        );
        assert_eq!(
            PipelineState::Failed {
                stage: Stage::AssetFetch,
                cause: "missing".to_string()
            }
            .status_text(),
            "Detection failed during asset fetch: missing"
        );
    }

    #[tokio::test]
    async fn test_subscribers_see_latest_state() {
        let mut machine = StateMachine::new();
        let mut rx = machine.subscribe();
        machine.transition(PipelineState::ModelLoading).unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().kind(), StateKind::ModelLoading);
    }
}
