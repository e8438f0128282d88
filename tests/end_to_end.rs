//! Server and clients over real sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;

use pong_netplay::app::AppState;
use pong_netplay::client::ClientEvent;
use pong_netplay::http::build_router;
use pong_netplay::{ClientError, Config, MatchState, MatchStatus, SyncClient, Vector3};

async fn spawn_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let config = Config {
        server_addr: addr,
        ..Config::default()
    };
    let router = build_router(AppState::new(config));
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server runs");
    });
    addr
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn two_clients_play_through_the_server() {
    let addr = spawn_server().await;

    let host = SyncClient::new(format!("ws://{}", addr));
    let guest = SyncClient::new("ws://unused.invalid");

    let started = Arc::new(Mutex::new(false));
    let flag = started.clone();
    host.on_match_started(move || *flag.lock() = true);

    let guest_state: Arc<Mutex<Option<MatchState>>> = Arc::new(Mutex::new(None));
    let sink = guest_state.clone();
    guest.on_state_change(move |state| *sink.lock() = Some(state.clone()));

    let created = assert_ok!(host.create_room().await);
    assert_eq!(created.player_number, 1);
    assert!(created.is_host);

    let joined = assert_ok!(guest.join_by_address("127.0.0.1", addr.port()).await);
    assert_eq!(joined.room_id, created.room_id);
    assert_eq!(joined.player_number, 2);
    assert!(!joined.is_host);

    eventually(|| *started.lock()).await;

    // guest pushes are dropped before they leave the client
    guest.send_ball_state(Vector3::new(-3.0, 0.0, 0.0), Vector3::new(6.0, 0.0, 0.0));
    host.send_ball_state(Vector3::new(1.5, 0.0, -2.0), Vector3::new(-6.0, 0.0, 1.0));

    eventually(|| {
        guest_state.lock().as_ref().map_or(false, |s| {
            s.status == MatchStatus::Playing && s.ball.position == Vector3::new(1.5, 0.0, -2.0)
        })
    })
    .await;

    let mut guest_events = guest.subscribe();
    host.send_score_update(5, 3);
    let ended = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match guest_events.recv().await {
                Ok(ClientEvent::StateChanged(state)) if state.status == MatchStatus::Ended => {
                    return state
                }
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("match ends");
    assert_eq!(ended.player1_score, 5);
    assert_eq!(ended.player2_score, 3);

    host.dispose();
    guest.dispose();
}

#[tokio::test]
async fn third_client_is_turned_away() {
    let addr = spawn_server().await;
    let url = format!("ws://{}", addr);

    let a = SyncClient::new(url.clone());
    let b = SyncClient::new(url.clone());
    let c = SyncClient::new(url);

    let room_id = assert_ok!(a.create_room().await).room_id;
    assert_ok!(b.join_room(room_id).await);

    let err = assert_err!(c.join_room(room_id).await);
    assert_eq!(
        err,
        ClientError::Rejected {
            code: "room_full".to_string(),
            message: "Room is full".to_string(),
        }
    );
    assert!(!c.is_connected());
}

#[tokio::test]
async fn host_disconnect_hands_authority_to_guest() {
    let addr = spawn_server().await;
    let url = format!("ws://{}", addr);

    let host = SyncClient::new(url.clone());
    let guest = SyncClient::new(url);
    let room_id = assert_ok!(host.create_room().await).room_id;
    assert_ok!(guest.join_room(room_id).await);

    drop(host);

    eventually(|| guest.is_host()).await;
    assert!(guest.is_connected());
}

#[tokio::test]
async fn dropped_guest_rejoins_its_seat() {
    let addr = spawn_server().await;
    let url = format!("ws://{}", addr);

    let host = SyncClient::new(url.clone());
    let guest = SyncClient::new(url);

    let latest: Arc<Mutex<Option<MatchState>>> = Arc::new(Mutex::new(None));
    let sink = latest.clone();
    host.on_state_change(move |state| *sink.lock() = Some(state.clone()));

    let room_id = assert_ok!(host.create_room().await).room_id;
    let joined = assert_ok!(guest.join_room(room_id).await);
    host.send_score_update(2, 1);

    guest.leave_room();
    eventually(|| {
        latest
            .lock()
            .as_ref()
            .map_or(false, |s| s.status == MatchStatus::Paused && s.player_count() == 1)
    })
    .await;

    let resumed = assert_ok!(guest.rejoin().await);
    assert_eq!(resumed.room_id, room_id);
    assert_eq!(resumed.participant_id, joined.participant_id);
    assert_eq!(resumed.player_number, 2);

    eventually(|| {
        latest.lock().as_ref().map_or(false, |s| {
            s.status == MatchStatus::Playing
                && s.player_count() == 2
                && (s.player1_score, s.player2_score) == (2, 1)
        })
    })
    .await;
}

#[tokio::test]
async fn http_rooms_api() {
    let app = build_router(AppState::new(Config::default()));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let health: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(health["status"], "ok");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/rooms")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let created: serde_json::Value = serde_json::from_slice(&body).expect("json");
    let room_id = created["room_id"].as_str().expect("room id").to_string();
    assert!(created["ws_url"]
        .as_str()
        .expect("ws url")
        .ends_with(&format!("/ws?room={}", room_id)));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/rooms/{}", room_id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let state: MatchState = serde_json::from_slice(&body).expect("match state");
    assert_eq!(state.status, MatchStatus::Waiting);
    assert!(state.players.is_empty());

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/rooms/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
