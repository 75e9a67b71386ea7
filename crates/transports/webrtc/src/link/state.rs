//! Link lifecycle state

use serde::Serialize;
use std::fmt;

/// Lifecycle of a relay link
///
/// `New -> Negotiating -> Connected -> Closed`; any state may move to
/// `Closed`, and `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    /// Endpoints created, nothing negotiated
    New,
    /// Offer/answer exchange in progress
    Negotiating,
    /// All four descriptions applied
    Connected,
    /// Endpoints released
    Closed,
}

impl LinkState {
    /// Whether the link reached its terminal state
    pub fn is_closed(&self) -> bool {
        matches!(self, LinkState::Closed)
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: LinkState) -> bool {
        matches!(
            (self, next),
            (LinkState::New, LinkState::Negotiating)
                | (LinkState::Negotiating, LinkState::Connected)
                | (LinkState::New, LinkState::Closed)
                | (LinkState::Negotiating, LinkState::Closed)
                | (LinkState::Connected, LinkState::Closed)
        )
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::New => "new",
            LinkState::Negotiating => "negotiating",
            LinkState::Connected => "connected",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        assert!(LinkState::New.can_transition_to(LinkState::Negotiating));
        assert!(LinkState::Negotiating.can_transition_to(LinkState::Connected));
        assert!(LinkState::Connected.can_transition_to(LinkState::Closed));
        assert!(!LinkState::New.can_transition_to(LinkState::Connected));
        assert!(!LinkState::Closed.can_transition_to(LinkState::New));
        assert!(!LinkState::Closed.can_transition_to(LinkState::Closed));
        // a link closed mid-negotiation never reports connected
        assert!(!LinkState::Closed.can_transition_to(LinkState::Connected));
        assert!(!LinkState::Connected.can_transition_to(LinkState::Negotiating));
    }

    #[test]
    fn test_display() {
        assert_eq!(LinkState::Negotiating.to_string(), "negotiating");
        assert!(LinkState::Closed.is_closed());
    }
}
