//! Run status state machine
//!
//! Non-terminal runs may move between the in-flight statuses in any order
//! (machines report `running` and `uploading` as they see fit) or finish.
//! Nothing moves back to `not-started`, and terminal runs are frozen.

use runfleet_common::StateError;

use crate::domain::entities::RunStatus;

/// Run state machine
pub struct RunStateMachine;

impl RunStateMachine {
    /// Validate a status write.
    ///
    /// Writing the current non-terminal status again is allowed so that
    /// repeated progress reports are harmless.
    pub fn transition(current: RunStatus, next: RunStatus) -> Result<RunStatus, StateError> {
        if current.is_terminal() {
            return Err(StateError::TerminalState(current.to_string()));
        }

        if next == RunStatus::NotStarted && current != RunStatus::NotStarted {
            return Err(StateError::InvalidTransition {
                from: current.to_string(),
                event: next.to_string(),
            });
        }

        Ok(next)
    }
}
