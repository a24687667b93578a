// End-to-end tests over a real WebSocket server: handshake, welcome,
// room flow, admission ceiling and header authentication

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use warp::Filter;

use keyclash::auth::token::{Claims, TokenIssuer};
use keyclash::config::ServerConfig;
use keyclash::constants::WS_PATH;
use keyclash::core::server::{ServerManager, SharedServerManager};
use keyclash::handlers::auth::extract_token_comprehensive;
use keyclash::handlers::handle_ws_client;
use keyclash::snippet::StaticSnippets;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "end-to-end-test-signing-key-0123456789";

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        token_secret: None,
        development_mode: true,
        max_connections_per_ip: 10,
        progress_limit: 60,
        progress_window_ms: 1_000,
        room_action_limit: 100,
        room_action_window_ms: 10_000,
        room_create_limit: 10,
        room_create_window_ms: 60_000,
        countdown_ms: 100,
        min_players: 2,
        match_group_size: 2,
        race_timeout_secs: 300,
    }
}

/// Bind the real route stack on an ephemeral port
async fn spawn_server(server: SharedServerManager) -> SocketAddr {
    let ws_server = server.clone();
    let ws_route = warp::path(WS_PATH)
        .and(warp::ws())
        .and(warp::addr::remote())
        .and(warp::header::headers_cloned())
        .map(
            move |ws: warp::ws::Ws,
                  addr: Option<SocketAddr>,
                  headers: warp::hyper::HeaderMap| {
                let server = ws_server.clone();
                let token = extract_token_comprehensive(&headers);
                ws.on_upgrade(move |socket| handle_ws_client(socket, addr, token, server))
            },
        );
    let health_route = warp::path("health").map(|| "OK");

    let (addr, serve) =
        warp::serve(ws_route.or(health_route)).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(serve);
    addr
}

async fn connect_client(addr: SocketAddr) -> WsClient {
    let (stream, _) = connect_async(format!("ws://{}/{}", addr, WS_PATH))
        .await
        .expect("WebSocket handshake failed");
    stream
}

/// Next text frame as JSON, skipping pings
async fn next_json(client: &mut WsClient) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed early")
            .expect("websocket error");
        if msg.is_text() {
            return serde_json::from_str(msg.to_text().unwrap()).unwrap();
        }
    }
}

async fn send_json(client: &mut WsClient, value: Value) {
    client
        .send(Message::Text(value.to_string()))
        .await
        .expect("send failed");
}

#[tokio::test]
async fn test_connection_receives_guest_welcome() {
    let server: SharedServerManager = Arc::new(ServerManager::new(test_config()));
    let addr = spawn_server(server.clone()).await;

    let mut client = connect_client(addr).await;
    let welcome = next_json(&mut client).await;

    assert_eq!(welcome["type"], "connected");
    assert_eq!(welcome["authenticated"], false);
    assert!(welcome["name"].as_str().unwrap().starts_with("Guest-"));
    assert!(!welcome["client_id"].as_str().unwrap().is_empty());
    assert!(welcome.get("room_hint").is_none());
    assert_eq!(server.connection_count().await, 1);
}

#[tokio::test]
async fn test_health_endpoint_answers() {
    let server: SharedServerManager = Arc::new(ServerManager::new(test_config()));
    let addr = spawn_server(server).await;

    let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_create_room_round_trip_over_the_socket() {
    let server: SharedServerManager = Arc::new(ServerManager::new(test_config()));
    let addr = spawn_server(server.clone()).await;

    let mut client = connect_client(addr).await;
    next_json(&mut client).await;

    send_json(&mut client, json!({"type": "create_room", "name": "Ada"})).await;

    let created = next_json(&mut client).await;
    assert_eq!(created["type"], "room_created");
    let roster = next_json(&mut client).await;
    assert_eq!(roster["type"], "room_joined");
    assert_eq!(roster["room_id"], created["room_id"]);
    assert_eq!(roster["players"][0]["name"], "Ada");
    assert_eq!(server.race_count().await, 1);
}

#[tokio::test]
async fn test_two_sockets_race_to_completion() {
    let server: SharedServerManager = Arc::new(ServerManager::with_snippet_source(
        test_config(),
        Arc::new(StaticSnippets::from_texts(vec!["abc".to_string()])),
    ));
    let addr = spawn_server(server.clone()).await;

    let mut alice = connect_client(addr).await;
    next_json(&mut alice).await;
    let mut bob = connect_client(addr).await;
    next_json(&mut bob).await;

    send_json(&mut alice, json!({"type": "create_room", "name": "Alice"})).await;
    let created = next_json(&mut alice).await;
    let room_id = created["room_id"].as_str().unwrap().to_string();
    next_json(&mut alice).await;

    send_json(
        &mut bob,
        json!({"type": "join_room", "room_id": room_id, "name": "Bob"}),
    )
    .await;
    let roster = next_json(&mut bob).await;
    assert_eq!(roster["type"], "room_joined");
    assert_eq!(roster["state"], "countdown");

    let joined = next_json(&mut alice).await;
    assert_eq!(joined["type"], "player_joined");
    assert_eq!(joined["player"]["name"], "Bob");

    let start_a = next_json(&mut alice).await;
    let start_b = next_json(&mut bob).await;
    assert_eq!(start_a["type"], "game_start");
    assert_eq!(start_a["start_time"], start_b["start_time"]);

    // Alice types the whole snippet; Bob follows
    send_json(&mut alice, json!({"type": "progress_update", "progress": 3})).await;
    let finished = next_json(&mut alice).await;
    assert_eq!(finished["type"], "player_finished");
    assert_eq!(finished["rank"], 1);
    let rival = next_json(&mut bob).await;
    assert_eq!(rival["type"], "player_finished_task");

    send_json(&mut bob, json!({"type": "progress_update", "progress": 3})).await;
    let finished_b = next_json(&mut bob).await;
    assert_eq!(finished_b["rank"], 2);
    let summary_b = next_json(&mut bob).await;
    assert_eq!(summary_b["type"], "game_complete");
    assert_eq!(summary_b["rankings"].as_array().unwrap().len(), 2);

    let rival_b = next_json(&mut alice).await;
    assert_eq!(rival_b["type"], "player_finished_task");
    assert_eq!(rival_b["rank"], 2);
    let summary_a = next_json(&mut alice).await;
    assert_eq!(summary_a["type"], "game_complete");
    assert_eq!(server.race_count().await, 0);
}

#[tokio::test]
async fn test_admission_ceiling_closes_excess_connection() {
    let config = ServerConfig {
        max_connections_per_ip: 1,
        ..test_config()
    };
    let server: SharedServerManager = Arc::new(ServerManager::new(config));
    let addr = spawn_server(server.clone()).await;

    let mut first = connect_client(addr).await;
    let welcome = next_json(&mut first).await;
    assert_eq!(welcome["type"], "connected");

    let mut second = connect_client(addr).await;
    let rejection = next_json(&mut second).await;
    assert_eq!(rejection["type"], "error");
    assert_eq!(rejection["code"], "ADMISSION_REJECTED");

    // The rejected socket closes; the admitted one is unaffected
    let mut closed = false;
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_secs(5), second.next()).await
    {
        match frame {
            Ok(msg) if msg.is_close() => {
                closed = true;
                break;
            }
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    assert!(closed);
    assert_eq!(server.connection_count().await, 1);
}

#[tokio::test]
async fn test_authorization_header_authenticates_the_welcome() {
    let config = ServerConfig {
        token_secret: Some(SECRET.to_string()),
        development_mode: false,
        ..test_config()
    };
    let server: SharedServerManager = Arc::new(ServerManager::new(config));
    let addr = spawn_server(server).await;

    let issuer = TokenIssuer::new(SECRET);
    let claims = Claims::new(
        "player-42".to_string(),
        Some("Ada".to_string()),
        Some("room-7".to_string()),
    );
    let token = issuer.issue(&claims).unwrap();

    let mut request = format!("ws://{}/{}", addr, WS_PATH)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    let (mut client, _) = connect_async(request).await.unwrap();

    let welcome = next_json(&mut client).await;
    assert_eq!(welcome["type"], "connected");
    assert_eq!(welcome["authenticated"], true);
    assert_eq!(welcome["player_id"], "player-42");
    assert_eq!(welcome["name"], "Ada");
    assert_eq!(welcome["room_hint"], "room-7");
}

#[tokio::test]
async fn test_bad_token_locks_the_socket_without_closing_it() {
    let config = ServerConfig {
        token_secret: Some(SECRET.to_string()),
        development_mode: false,
        ..test_config()
    };
    let server: SharedServerManager = Arc::new(ServerManager::new(config));
    let addr = spawn_server(server.clone()).await;

    let mut request = format!("ws://{}/{}", addr, WS_PATH)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_static("Bearer not.a.token"),
    );
    let (mut client, _) = connect_async(request).await.unwrap();

    let rejection = next_json(&mut client).await;
    assert_eq!(rejection["type"], "error");
    assert_eq!(rejection["code"], "AUTH_REJECTED");

    // Still open, but every request gets the same answer and no
    // session ever forms
    send_json(&mut client, json!({"type": "create_room", "name": "Mallory"})).await;
    let answer = next_json(&mut client).await;
    assert_eq!(answer["code"], "AUTH_REJECTED");
    assert_eq!(server.connection_count().await, 0);
    assert_eq!(server.race_count().await, 0);
}
