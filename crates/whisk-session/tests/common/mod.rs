//! Shared fixtures for session integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use whisk_auth::{AuthError, Identity, SharedIdentity, TokenGrant, TokenService, WsToken};
use whisk_session::{Session, SessionConfig, SessionDeps, TokenState};
use whisk_transport::{MemoryConnection, MemoryTransport, Transport};

pub const WAIT: Duration = Duration::from_secs(5);

/// Token service that answers from a script, optionally holding every
/// answer until the test releases it.
#[derive(Default)]
pub struct ScriptedTokens {
    script: Mutex<VecDeque<Result<TokenGrant, AuthError>>>,
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers wait for [`ScriptedTokens::release`].
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::default()
        }
    }

    pub fn grant(&self, token: &str, identity: &str) {
        self.script.lock().push_back(Ok(TokenGrant {
            token: WsToken::from(token),
            identity: Some(Identity::from(identity)),
        }));
    }

    pub fn fail(&self, error: AuthError) {
        self.script.lock().push_back(Err(error));
    }

    pub fn release(&self, answers: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(answers);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenService for ScriptedTokens {
    async fn renew(&self) -> Result<TokenGrant, AuthError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or(Err(AuthError::MissingToken))
    }
}

/// A session wired to an in-memory transport.
pub struct Harness {
    pub session: Session,
    pub transport: Arc<MemoryTransport>,
    pub tokens: Arc<ScriptedTokens>,
    pub identity: SharedIdentity,
    ready: Arc<AtomicUsize>,
}

impl Harness {
    pub fn new(identity: Option<&str>) -> Self {
        Self::with_tokens(identity, ScriptedTokens::new())
    }

    pub fn with_tokens(identity: Option<&str>, tokens: ScriptedTokens) -> Self {
        let transport = Arc::new(MemoryTransport::new());
        let tokens = Arc::new(tokens);
        let shared = SharedIdentity::new();
        shared.set(identity.map(Identity::from));
        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let dyn_tokens: Arc<dyn TokenService> = tokens.clone();
        let session = Session::new(SessionDeps::new(
            dyn_transport,
            dyn_tokens,
            Arc::new(shared.clone()),
        ));
        Self {
            session,
            transport,
            tokens,
            identity: shared,
            ready: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// `init` with a ready counter; returns the new connection.
    pub fn init(&mut self, config: SessionConfig) -> Arc<MemoryConnection> {
        let ready = Arc::clone(&self.ready);
        let _ = self
            .session
            .init(config, move || {
                let _ = ready.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        self.transport.last_connection().unwrap()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.load(Ordering::SeqCst)
    }

    /// Wait for one queued event (e.g. a renewal result) and process it.
    pub async fn next(&mut self) {
        let processed = tokio::time::timeout(WAIT, self.session.process_next())
            .await
            .expect("session event within timeout");
        assert!(processed);
    }

    /// Open the connection and process the connect cycle, including the
    /// token renewal when one is started.
    pub async fn connect(&mut self, conn: &MemoryConnection) {
        let _ = conn.open();
        let _ = self.session.process_pending();
        if *self.session.token_state() == TokenState::Pending {
            self.next().await;
        }
    }
}

/// Handler/callback recorder: `"<tag>"` entries in call order.
#[derive(Clone, Default)]
pub struct Calls(Arc<Mutex<Vec<String>>>);

impl Calls {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }
}
