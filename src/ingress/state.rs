/// Where the upstream subscription stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
}

/// Things that move the upstream subscription between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressEvent {
    Connect,
    ConnectionAccepted,
    SubscriptionGranted,
    SubscriptionRejected,
    ConnectionLost,
    Shutdown,
}

impl IngressState {
    /// The state reached from `self` when `event` happens.
    ///
    /// A rejected subscription leaves the adapter `Connected` (it retries);
    /// only a connection-level failure sends it back to `Connecting`.
    pub fn on(self, event: IngressEvent) -> IngressState {
        use IngressEvent::*;
        use IngressState::*;

        match (self, event) {
            (_, Shutdown) => Disconnected,
            (Disconnected, Connect) => Connecting,
            (Disconnected, _) => Disconnected,
            (_, ConnectionLost) => Connecting,
            (_, ConnectionAccepted) => Connected,
            (Connected | Subscribed, SubscriptionGranted) => Subscribed,
            (Connected, SubscriptionRejected) => Connected,
            (state, _) => state,
        }
    }

    /// Whether payloads are expected to flow in this state.
    pub fn is_subscribed(self) -> bool {
        self == IngressState::Subscribed
    }
}

impl std::fmt::Display for IngressState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IngressState::Disconnected => "disconnected",
            IngressState::Connecting => "connecting",
            IngressState::Connected => "connected",
            IngressState::Subscribed => "subscribed",
        };
        f.write_str(name)
    }
}
