//! Handshake Controller: token resolution for each connect cycle.
//!
//! A token held from `init` is reused as-is. Otherwise a renewal request
//! runs as a spawned task and its result comes back through the session's
//! event queue, tagged with the generation and connect epoch it was started
//! for. The session drops results whose tag no longer matches.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug};
use whisk_auth::{AuthError, Identity, TokenGrant, TokenService, WsToken};
use whisk_core::SessionId;

use crate::session::Envelope;

/// Token progress within one connect cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TokenState {
    /// No token held.
    #[default]
    NoToken,
    /// Renewal in flight.
    Pending,
    /// Token held and bound to the current identity.
    Confirmed(WsToken),
    /// Renewal failed; no token this cycle.
    Error,
}

impl TokenState {
    /// The held token, if confirmed.
    pub fn token(&self) -> Option<&WsToken> {
        match self {
            Self::Confirmed(token) => Some(token),
            _ => None,
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NoToken => "no_token",
            Self::Pending => "pending",
            Self::Confirmed(_) => "confirmed",
            Self::Error => "error",
        }
    }
}

/// Identifies which session generation and connect epoch a renewal
/// belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RenewalTag {
    pub(crate) generation: SessionId,
    pub(crate) epoch: u64,
}

impl RenewalTag {
    pub(crate) fn matches(&self, generation: Option<&SessionId>, epoch: u64) -> bool {
        generation == Some(&self.generation) && epoch == self.epoch
    }
}

/// What to do with a finished renewal.
#[derive(Debug)]
pub(crate) enum GrantDecision {
    /// Bound to the current identity.
    Accept(WsToken),
    /// Issued for somebody else (or nobody); drop it.
    IdentityMismatch {
        issued: Option<Identity>,
        expected: Option<Identity>,
    },
    /// The token service failed.
    Failed(AuthError),
}

pub(crate) fn evaluate(
    result: Result<TokenGrant, AuthError>,
    expected: Option<Identity>,
) -> GrantDecision {
    match result {
        Ok(grant) if grant.is_bound_to(expected.as_ref()) => GrantDecision::Accept(grant.token),
        Ok(grant) => GrantDecision::IdentityMismatch {
            issued: grant.identity,
            expected,
        },
        Err(error) => GrantDecision::Failed(error),
    }
}

/// Start a renewal on the current Tokio runtime.
///
/// Returns the token that cancels it, or `None` when no runtime is
/// available.
pub(crate) fn spawn_renewal(
    service: Arc<dyn TokenService>,
    tx: mpsc::UnboundedSender<Envelope>,
    tag: RenewalTag,
) -> Option<CancellationToken> {
    let runtime = tokio::runtime::Handle::try_current().ok()?;
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let span =
        tracing::debug_span!("token_renewal", generation = %tag.generation, epoch = tag.epoch);

    let _ = runtime.spawn(
        async move {
            tokio::select! {
                () = token.cancelled() => debug!("token renewal cancelled"),
                result = service.renew() => {
                    let _ = tx.send(Envelope::Renewed { tag, result });
                }
            }
        }
        .instrument(span),
    );
    Some(cancel)
}
