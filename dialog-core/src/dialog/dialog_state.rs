//! Dialog lifecycle states (Section 4.3.1).
//!
//! ```text
//! Init -> Trying -> Early -> Confirmed -> Terminating -> Terminated
//! ```
//! A UAC dialog passes through `Trying` while its INVITE transaction is
//! outstanding; a UAS dialog is created already `Trying` and moves directly
//! to `Early`/`Confirmed` once it has sent a tag-bearing response.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialogState {
    Init,
    Trying,
    Early,
    Confirmed,
    Terminating,
    Terminated,
}

impl DialogState {
    /// Whether `next` is a legal transition from `self`, per the table in
    /// Section 4.3.1. `Terminated` is a sink: re-entering it is idempotent,
    /// leaving it is not.
    pub fn can_transition_to(&self, next: DialogState) -> bool {
        use DialogState::*;
        match (*self, next) {
            (Terminated, Terminated) => true,
            (Terminated, _) => false,
            (Init, Trying) => true,
            (Trying, Early | Confirmed | Terminated) => true,
            (Early, Confirmed | Terminated) => true,
            (Confirmed, Terminating) => true,
            (Terminating, Terminated) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DialogState::Terminated)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, DialogState::Early | DialogState::Confirmed)
    }
}

impl std::fmt::Display for DialogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DialogState::Init => "Init",
            DialogState::Trying => "Trying",
            DialogState::Early => "Early",
            DialogState::Confirmed => "Confirmed",
            DialogState::Terminating => "Terminating",
            DialogState::Terminated => "Terminated",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_can_confirm_but_not_go_back_to_init() {
        assert!(DialogState::Early.can_transition_to(DialogState::Confirmed));
        assert!(!DialogState::Confirmed.can_transition_to(DialogState::Early));
        assert!(!DialogState::Confirmed.can_transition_to(DialogState::Init));
    }

    #[test]
    fn terminated_is_a_sink() {
        assert!(DialogState::Terminated.can_transition_to(DialogState::Terminated));
        assert!(!DialogState::Terminated.can_transition_to(DialogState::Confirmed));
    }

    #[test]
    fn trying_can_fail_directly_to_terminated() {
        assert!(DialogState::Trying.can_transition_to(DialogState::Terminated));
        assert!(DialogState::Early.can_transition_to(DialogState::Terminated));
    }

    #[test]
    fn confirmed_must_pass_through_terminating() {
        assert!(DialogState::Confirmed.can_transition_to(DialogState::Terminating));
        assert!(!DialogState::Confirmed.can_transition_to(DialogState::Terminated));
        assert!(DialogState::Terminating.can_transition_to(DialogState::Terminated));
    }
}
