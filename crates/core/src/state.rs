// crates/core/src/state.rs
use serde::{Deserialize, Serialize};

/// Cloud reachability as seen by the monitor. Transitions move along the
/// Online <-> Degraded <-> Offline adjacency only; `step_toward` clamps any
/// requested jump to a single step so flapping links cannot skip Degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Online,
    Degraded,
    Offline,
}

impl ConnectivityState {
    pub fn step_toward(self, target: ConnectivityState) -> ConnectivityState {
        use ConnectivityState::*;
        match (self, target) {
            (Online, Offline) => Degraded,
            (Offline, Online) => Degraded,
            (current, desired) if current == desired => current,
            (_, desired) => desired,
        }
    }
}

impl std::fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectivityState::Online => "online",
            ConnectivityState::Degraded => "degraded",
            ConnectivityState::Offline => "offline",
        };
        f.write_str(name)
    }
}

/// Conversational turn state; singleton per session, written only by the
/// turn coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConversationState::Idle => "idle",
            ConversationState::Listening => "listening",
            ConversationState::Thinking => "thinking",
            ConversationState::Speaking => "speaking",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectivityState::*;

    #[test]
    fn online_never_jumps_straight_to_offline() {
        assert_eq!(Online.step_toward(Offline), Degraded);
        assert_eq!(Degraded.step_toward(Offline), Offline);
    }

    #[test]
    fn recovery_also_passes_through_degraded() {
        assert_eq!(Offline.step_toward(Online), Degraded);
        assert_eq!(Degraded.step_toward(Online), Online);
    }

    #[test]
    fn same_state_is_stable() {
        assert_eq!(Online.step_toward(Online), Online);
        assert_eq!(Offline.step_toward(Offline), Offline);
    }
}
