//! Session state machine.
//!
//! ```text
//!   Disconnected ──init──▶ Connecting ──connect──▶ Connected ──token──▶ Ready
//!        ▲  │                                        │   │                │
//!        │  └─reconnecting─▶ Reconnecting ─connect───┘   └──auth error──▶ AuthFailed
//!        │                                                                │
//!        └──────────────────────── disconnect (from any state) ◀──────────┘
//! ```
//!
//! The handshake flags (`requested`, `accepted`) live inside the connected
//! states, so a disconnect clears them by construction. `is_ready` and
//! `auth_error` are projections of the state itself.

use serde::Serialize;

/// Handshake progress within one connect cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// The peer sent `whisk.auth.request` and got a reply.
    pub requested: bool,
    /// The peer sent `whisk.auth.accept`.
    pub accepted: bool,
}

/// Where a session is in its connect/auth lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    /// No live connection.
    #[default]
    Disconnected,
    /// The transport is retrying after a drop.
    Reconnecting,
    /// `init` opened the transport; waiting for `connect`.
    Connecting,
    /// Base and protocol tiers are active; no confirmed token yet.
    Connected(Handshake),
    /// A token is confirmed and the application tier is active.
    Ready(Handshake),
    /// The peer reported an authentication error this cycle.
    AuthFailed(Handshake),
}

/// Inputs to [`SessionState::next`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Input {
    /// `init` opened a connection.
    Init,
    /// Transport `connect`.
    TransportConnected,
    /// Transport `reconnecting`.
    TransportReconnecting,
    /// Transport `disconnect`, or a local tear-down.
    TransportDisconnected,
    /// A token bound to the current identity is held.
    TokenConfirmed,
    /// Peer `whisk.auth.request`.
    AuthRequested,
    /// Peer `whisk.auth.accept`.
    AuthAccepted,
    /// Peer `whisk.auth.error`.
    AuthError,
}

impl SessionState {
    /// The single transition function. Returns `None` when `input` has no
    /// effect in this state.
    pub fn next(self, input: Input) -> Option<Self> {
        use SessionState as S;

        let next = match (self, input) {
            (S::Disconnected, Input::Init) => S::Connecting,
            (_, Input::TransportConnected) => S::Connected(Handshake::default()),
            (S::Disconnected, Input::TransportReconnecting) => S::Reconnecting,
            (S::Disconnected, Input::TransportDisconnected) => return None,
            (_, Input::TransportDisconnected) => S::Disconnected,
            (S::Connected(h), Input::TokenConfirmed) => S::Ready(h),
            (S::Connected(h) | S::Ready(h), Input::AuthError) => S::AuthFailed(h),
            (state, Input::AuthRequested) => state.with_handshake(|h| h.requested = true)?,
            (state, Input::AuthAccepted) => state.with_handshake(|h| h.accepted = true)?,
            _ => return None,
        };
        (next != self).then_some(next)
    }

    fn with_handshake(self, f: impl FnOnce(&mut Handshake)) -> Option<Self> {
        let mut h = self.handshake()?;
        f(&mut h);
        Some(match self {
            Self::Connected(_) => Self::Connected(h),
            Self::Ready(_) => Self::Ready(h),
            Self::AuthFailed(_) => Self::AuthFailed(h),
            other => other,
        })
    }

    /// Handshake progress, when connected.
    pub fn handshake(self) -> Option<Handshake> {
        match self {
            Self::Connected(h) | Self::Ready(h) | Self::AuthFailed(h) => Some(h),
            _ => None,
        }
    }

    /// A token is confirmed and application routes are active.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// The transport is open.
    pub fn is_connected(self) -> bool {
        self.handshake().is_some()
    }

    /// The peer asked for the token this cycle.
    pub fn auth_requested(self) -> bool {
        self.handshake().is_some_and(|h| h.requested)
    }

    /// The peer accepted the token this cycle.
    pub fn auth_accepted(self) -> bool {
        self.handshake().is_some_and(|h| h.accepted)
    }

    /// The peer reported an auth error this cycle.
    pub fn auth_error(self) -> bool {
        matches!(self, Self::AuthFailed(_))
    }

    /// Short name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Connecting => "connecting",
            Self::Connected(_) => "connected",
            Self::Ready(_) => "ready",
            Self::AuthFailed(_) => "auth_failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
