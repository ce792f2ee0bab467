//! Negotiation phases.
//!
//! | Phase                   | Entered when                          | Next                     |
//! |-------------------------|---------------------------------------|--------------------------|
//! | `Idle`                  | session created                       | RemoteDescriptionSet     |
//! | `RemoteDescriptionSet`  | offer applied                         | AnswerCreated            |
//! | `AnswerCreated`         | answer generated                      | LocalDescriptionSet      |
//! | `LocalDescriptionSet`   | answer applied locally                | IceGathering             |
//! | `IceGathering`          | waiting for candidates / the channel  | ChannelOpen              |
//! | `ChannelOpen`           | data channel open (terminal)          |                          |
//! | `Failed`                | any negotiation error (terminal)      |                          |

/// Where a session is in the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationPhase {
    /// No offer accepted yet
    Idle,
    /// Remote offer applied
    RemoteDescriptionSet,
    /// Local answer created
    AnswerCreated,
    /// Local answer applied
    LocalDescriptionSet,
    /// Gathering candidates and waiting for the channel
    IceGathering,
    /// Data channel open
    ChannelOpen,
    /// Negotiation failed
    Failed,
}

impl NegotiationPhase {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ChannelOpen | Self::Failed)
    }

    /// Whether `next` is a legal successor.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle, Self::RemoteDescriptionSet)
            | (Self::RemoteDescriptionSet, Self::AnswerCreated)
            | (Self::AnswerCreated, Self::LocalDescriptionSet)
            | (Self::LocalDescriptionSet, Self::IceGathering)
            | (Self::IceGathering, Self::ChannelOpen) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::RemoteDescriptionSet => "remote-description-set",
            Self::AnswerCreated => "answer-created",
            Self::LocalDescriptionSet => "local-description-set",
            Self::IceGathering => "ice-gathering",
            Self::ChannelOpen => "channel-open",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::NegotiationPhase::*;
    use super::*;

    #[test]
    fn test_happy_path() {
        let path = [
            Idle,
            RemoteDescriptionSet,
            AnswerCreated,
            LocalDescriptionSet,
            IceGathering,
            ChannelOpen,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_no_skipping_or_reopening() {
        assert!(!Idle.can_transition_to(ChannelOpen));
        assert!(!ChannelOpen.can_transition_to(ChannelOpen));
        assert!(!IceGathering.can_transition_to(Idle));
    }

    #[test]
    fn test_failure_from_any_live_phase() {
        for phase in [Idle, RemoteDescriptionSet, AnswerCreated, LocalDescriptionSet, IceGathering] {
            assert!(phase.can_transition_to(Failed));
        }
        assert!(!ChannelOpen.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(Failed.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(IceGathering.to_string(), "ice-gathering");
    }
}
