//! Connectivity state shared by the monitor and the sync engine.

use serde::{Deserialize, Serialize};

/// Last known reachability of the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    /// No signal observed yet.
    #[default]
    Unknown,
    /// Online and able to reach the API.
    Online,
    /// Offline (network unreachable or platform signal unavailable).
    Offline,
}

impl ConnectivityState {
    pub fn from_online(online: bool) -> Self {
        if online { Self::Online } else { Self::Offline }
    }

    pub fn is_online(self) -> bool {
        self == Self::Online
    }

    /// Whether moving from `self` to `next` should trigger a queue drain.
    pub fn reconnects_to(self, next: ConnectivityState) -> bool {
        next == Self::Online && self != Self::Online
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transitions_into_online_reconnect() {
        use ConnectivityState::*;
        assert!(Offline.reconnects_to(Online));
        assert!(Unknown.reconnects_to(Online));
        assert!(!Online.reconnects_to(Online));
        assert!(!Online.reconnects_to(Offline));
        assert!(!Unknown.reconnects_to(Offline));
    }
}
