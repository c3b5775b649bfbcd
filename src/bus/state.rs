//! Endpoint lifecycle states.

use std::fmt;

/// Socket lifecycle of a publish or subscribe endpoint.
///
/// `Closed -> Open -> Connected -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointState {
    #[default]
    Closed,
    Open,
    Connected,
}

impl EndpointState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::Connected => "connected",
        }
    }
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receive sub-lifecycle of a connected subscribe endpoint.
///
/// `Idle -> Armed -> Stopping -> Idle`. While armed exactly one receive is
/// outstanding; delivery happens inside the armed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveState {
    #[default]
    Idle,
    Armed,
    Stopping,
}

impl ReceiveState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ReceiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
