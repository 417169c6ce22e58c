//! A full connect cycle over a real websocket, with the token issued by an
//! HTTP renewal endpoint.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use whisk_auth::{StaticIdentity, WsToken};
use whisk_session::defaults::{AUTH_ACCEPT, AUTH_REQUEST};
use whisk_session::{RouteGroup, Session, SessionConfig, SessionDeps, SessionState};
use whisk_settings::ClientSettings;
use whisk_transport::frame::Frame;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);
const RENEW_PATH: &str = "/rapt-whisk-router/api/renew_ws_session";

async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> Option<Frame> {
    while let Some(msg) = ws.next().await {
        match msg.ok()? {
            Message::Text(text) => return Frame::parse(text.as_str()).ok(),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

fn settings_for(http: &MockServer, ws: &TcpListener) -> ClientSettings {
    let mut settings = ClientSettings::default();
    settings.transport.host = "127.0.0.1".into();
    settings.transport.port = ws.local_addr().unwrap().port();
    settings.transport.reconnection.enabled = false;
    settings.token_service.base_url = http.uri();
    settings
}

async fn wait_for(session: &mut Session, done: impl Fn(SessionState) -> bool) {
    tokio::time::timeout(WAIT, async {
        while !done(session.state()) {
            assert!(session.process_next().await);
        }
    })
    .await
    .expect("session reached the expected state");
}

#[tokio::test]
async fn renewed_token_is_sent_when_the_server_asks() {
    let http = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RENEW_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ws_token": "T1", "user_id": 42})),
        )
        .expect(1)
        .mount(&http)
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let settings = settings_for(&http, &listener);
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Ask only once the renewal landed, so the reply carries T1.
        let _ = go_rx.await;

        let request = Frame::event(AUTH_REQUEST, json!({}), Some(1));
        ws.send(Message::text(request.to_text().unwrap())).await.unwrap();
        if let Some(reply) = next_frame(&mut ws).await {
            let _ = seen_tx.send(reply);
        }
        let accept = Frame::event(AUTH_ACCEPT, json!(null), None);
        ws.send(Message::text(accept.to_text().unwrap())).await.unwrap();

        // Hold the socket until the client closes it.
        next_frame(&mut ws).await
    });

    let identity = Arc::new(StaticIdentity::new(42_u64));
    let deps = SessionDeps::from_settings(&settings, identity).unwrap();
    let mut session = Session::new(deps);
    let _ = session
        .init(SessionConfig::from_settings(&settings), || {})
        .unwrap();

    wait_for(&mut session, SessionState::is_ready).await;
    assert_eq!(session.token().map(WsToken::as_str), Some("T1"));

    go_tx.send(()).unwrap();
    let reply = tokio::time::timeout(WAIT, async {
        tokio::select! {
            () = session.run() => None,
            reply = seen_rx.recv() => reply,
        }
    })
    .await
    .unwrap();
    assert_eq!(
        reply,
        Some(Frame::AckReply {
            ack: 1,
            data: json!({"ws_token": "T1"}),
        })
    );

    wait_for(&mut session, SessionState::auth_accepted).await;
    assert!(session.state().auth_requested());

    session.tear_down();
    let closed = tokio::time::timeout(WAIT, server).await.unwrap().unwrap();
    assert!(closed.is_none());
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn auth_request_sent_on_open_is_answered() {
    let http = MockServer::start().await;
    for _ in 0..5 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let settings = settings_for(&http, &listener);
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let request = Frame::event(AUTH_REQUEST, json!({}), Some(1));
            ws.send(Message::text(request.to_text().unwrap())).await.unwrap();
            next_frame(&mut ws).await
        });

        let identity = Arc::new(StaticIdentity::new("U1"));
        let deps = SessionDeps::from_settings(&settings, identity).unwrap();
        let mut session = Session::new(deps);
        let config = SessionConfig::from_settings(&settings).with_token(WsToken::from("T0"));
        let _ = session.init(config, || {}).unwrap();

        let reply = tokio::time::timeout(WAIT, async {
            tokio::select! {
                () = session.run() => None,
                reply = server => reply.unwrap(),
            }
        })
        .await
        .unwrap();
        assert_eq!(
            reply,
            Some(Frame::AckReply {
                ack: 1,
                data: json!({"ws_token": "T0"}),
            })
        );
        assert!(session.state().auth_requested());
        session.tear_down();
    }
}

#[tokio::test]
async fn server_drop_resets_the_session() {
    let http = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RENEW_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"ws_token": "T1", "user_id": "U1"})),
        )
        .mount(&http)
        .await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let settings = settings_for(&http, &listener);
    let (go_tx, go_rx) = oneshot::channel::<()>();

    let _server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = go_rx.await;
        let _ = ws.close(None).await;
    });

    let identity = Arc::new(StaticIdentity::new("U1"));
    let deps = SessionDeps::from_settings(&settings, identity).unwrap();
    let mut session = Session::new(deps);
    let _ = session
        .init(SessionConfig::from_settings(&settings), || {})
        .unwrap();
    wait_for(&mut session, SessionState::is_ready).await;

    go_tx.send(()).unwrap();
    wait_for(&mut session, |state| state == SessionState::Disconnected).await;

    assert!(session.token().is_none());
    assert!(session.is_running());
    assert!(!session.is_active(RouteGroup::Application));
}
