//! Reserved lifecycle event names.
//!
//! These names are part of the wire compatibility surface and must not
//! change.

use std::fmt;
use std::str::FromStr;

/// Socket opened (first connect and every successful reconnect).
pub const CONNECT: &str = "connect";
/// An open socket closed.
pub const DISCONNECT: &str = "disconnect";
/// The adapter is about to retry.
pub const RECONNECTING: &str = "reconnecting";
/// A retry succeeded (delivered after `connect`).
pub const RECONNECT: &str = "reconnect";
/// The adapter stopped for good.
pub const CLOSE: &str = "close";

/// Transport lifecycle events delivered by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// `connect`
    Connect,
    /// `disconnect`
    Disconnect,
    /// `reconnecting`
    Reconnecting,
    /// `reconnect`
    Reconnect,
    /// `close`
    Close,
}

impl LifecycleEvent {
    /// All lifecycle events.
    pub const ALL: [Self; 5] = [
        Self::Connect,
        Self::Disconnect,
        Self::Reconnecting,
        Self::Reconnect,
        Self::Close,
    ];

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => CONNECT,
            Self::Disconnect => DISCONNECT,
            Self::Reconnecting => RECONNECTING,
            Self::Reconnect => RECONNECT,
            Self::Close => CLOSE,
        }
    }

    /// Whether `name` is reserved for lifecycle events.
    pub fn is_reserved(name: &str) -> bool {
        name.parse::<Self>().is_ok()
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleEvent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|e| e.as_str() == s).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_are_stable() {
        assert_eq!(LifecycleEvent::Connect.as_str(), "connect");
        assert_eq!(LifecycleEvent::Disconnect.as_str(), "disconnect");
        assert_eq!(LifecycleEvent::Reconnecting.as_str(), "reconnecting");
        assert_eq!(LifecycleEvent::Reconnect.as_str(), "reconnect");
        assert_eq!(LifecycleEvent::Close.as_str(), "close");
    }

    #[test]
    fn parse_round_trips_all() {
        for e in LifecycleEvent::ALL {
            assert_eq!(e.as_str().parse::<LifecycleEvent>(), Ok(e));
        }
    }

    #[test]
    fn reserved_names() {
        assert!(LifecycleEvent::is_reserved("disconnect"));
        assert!(!LifecycleEvent::is_reserved("whisk.auth.request"));
        assert!(!LifecycleEvent::is_reserved("Connect"));
    }
}
