use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use conduit_backend::config::Config;
use conduit_backend::protocol::{
    GamePacket, PacketHeader, ServerHeartbeatPacket, ServerInfoPacket, ServerLoginPacket,
};
use conduit_backend::{AppState, bus, create_app, helpers};
use conduit_store::{Database, MemoryStore};
use serde_json::{Value, json};

/// Helper to create test state on in-memory stores
async fn setup_state() -> Arc<AppState> {
    let db = Database::open_in_memory()
        .await
        .expect("Failed to create in-memory database");
    let store = Arc::new(MemoryStore::new());
    AppState::new(db, store, &Config::default())
}

/// Helper to create app with default test configuration (no rate limiting,
/// which needs connection info absent from oneshot requests)
fn create_test_app(state: Arc<AppState>) -> axum::Router {
    let config = Config::default();
    create_app(state, config.request_body_limit, config.request_timeout, None)
}

/// Helper to send a request and get response
async fn send_request(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut request_builder = Request::builder().uri(uri).method(method);

    if let Some(token) = auth_token {
        request_builder = request_builder.header("Authorization", format!("Bearer {}", token));
    }

    let request = if let Some(json_body) = body {
        request_builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&json_body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        json!({})
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(json!({}))
    };

    (status, json)
}

/// Create a user with a known bearer token, optionally bound.
async fn seed_user(state: &AppState, token: &str, bound: bool) -> i64 {
    let user = state
        .db
        .create_user("tester".to_string(), helpers::hash_api_token(token))
        .await
        .expect("Failed to create user");
    if bound {
        state
            .db
            .bind_minecraft_account(
                user.user_id,
                "069a79f4-44e9-4726-a5be-fca90e38aaf5".to_string(),
                "Steve".to_string(),
            )
            .await
            .expect("Failed to bind account");
    }
    user.user_id
}

fn server_token() -> String {
    "s".repeat(40)
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_returns_ok() {
    let state = setup_state().await;
    let app = create_test_app(state);

    let (status, _body) = send_request(app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

// =============================================================================
// SERVER LIST TESTS
// =============================================================================

#[tokio::test]
async fn test_servers_fall_back_to_offline_placeholders() {
    // GIVEN: No live sessions and an empty store
    let state = setup_state().await;
    let app = create_test_app(state);

    // WHEN: Listing servers
    let (status, body) = send_request(app, "GET", "/servers", None, None).await;

    // THEN: Callers never see an empty list; the fixed offline set comes back
    assert_eq!(status, StatusCode::OK);
    let servers = body.as_array().unwrap();
    assert_eq!(servers.len(), 3);
    for server in servers {
        assert_eq!(server["online"], json!(false));
    }
}

#[tokio::test]
async fn test_login_packet_over_the_bus_registers_a_session() {
    // GIVEN: A verified server token and a running packet pump
    let state = setup_state().await;
    state
        .db
        .create_server_token(server_token(), "Survival SMP".to_string())
        .await
        .unwrap();
    tokio::spawn(bus::packet_pump(
        state.bus.clone(),
        state.registry.clone(),
        state.chat.clone(),
        state.db.clone(),
    ));

    let mut responses = state.bus.subscribe_admin_commands();

    // WHEN: The game server publishes a login packet
    state.bus.publish_packet(&GamePacket::ServerLogin(ServerLoginPacket {
        header: PacketHeader::new(server_token()),
        server_name: "Survival SMP".to_string(),
        server_version: "1.21.4".to_string(),
        server_ip: Some("203.0.113.7".to_string()),
        port: Some(25565),
    }));

    // THEN: A successful login response comes back with a session id
    let json = tokio::time::timeout(Duration::from_secs(2), responses.recv())
        .await
        .expect("no login response")
        .unwrap();
    let session_id = match GamePacket::from_json_safe(&json).unwrap() {
        GamePacket::ServerLoginResp(resp) => {
            assert!(resp.success);
            resp.session_id.unwrap()
        }
        other => panic!("unexpected packet: {}", other.packet_type()),
    };

    // AND: A heartbeat and server info keep the session fresh and visible
    state
        .bus
        .publish_packet(&GamePacket::ServerHeartbeat(ServerHeartbeatPacket {
            header: PacketHeader::new(server_token()),
            session_id: session_id.clone(),
        }));
    state.bus.publish_packet(&GamePacket::ServerInfo(ServerInfoPacket {
        header: PacketHeader::new(server_token()),
        session_id: session_id.clone(),
        server_name: "Survival SMP".to_string(),
        motd: Some("welcome".to_string()),
        online_players: 12,
        max_players: 100,
        tps: 19.9,
        ram_usage: 4096,
        max_ram: 8192,
        player_list: vec![],
        plugin_list: vec![],
    }));

    // Let the pump drain before reading
    tokio::time::sleep(Duration::from_millis(300)).await;

    let app = create_test_app(state);
    let (status, body) = send_request(app, "GET", "/servers", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let servers = body.as_array().unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0]["serverName"], json!("Survival SMP"));
    assert_eq!(servers[0]["onlinePlayers"], json!(12));
    assert_eq!(servers[0]["online"], json!(true));
}

#[tokio::test]
async fn test_login_with_unknown_token_is_rejected() {
    let state = setup_state().await;
    tokio::spawn(bus::packet_pump(
        state.bus.clone(),
        state.registry.clone(),
        state.chat.clone(),
        state.db.clone(),
    ));

    let mut responses = state.bus.subscribe_admin_commands();
    state.bus.publish_packet(&GamePacket::ServerLogin(ServerLoginPacket {
        header: PacketHeader::new(server_token()),
        server_name: "Rogue".to_string(),
        server_version: "1.21.4".to_string(),
        server_ip: None,
        port: None,
    }));

    let json = tokio::time::timeout(Duration::from_secs(2), responses.recv())
        .await
        .expect("no login response")
        .unwrap();
    match GamePacket::from_json_safe(&json).unwrap() {
        GamePacket::ServerLoginResp(resp) => {
            assert!(!resp.success);
            assert!(resp.session_id.is_none());
        }
        other => panic!("unexpected packet: {}", other.packet_type()),
    }
}

// =============================================================================
// CHAT TESTS
// =============================================================================

#[tokio::test]
async fn test_chat_send_requires_bearer_token() {
    let state = setup_state().await;
    let app = create_test_app(state);

    let payload = json!({
        "sessionId": "session-1",
        "serverName": "Survival SMP",
        "channel": "global",
        "world": "world",
        "content": "hello"
    });
    let (status, _body) = send_request(app, "POST", "/chat/send", Some(payload), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST); // missing typed header
}

#[tokio::test]
async fn test_chat_send_rejects_unbound_user() {
    let state = setup_state().await;
    let token = helpers::generate_api_token();
    seed_user(&state, &token, false).await;
    let app = create_test_app(state);

    let payload = json!({
        "sessionId": "session-1",
        "serverName": "Survival SMP",
        "channel": "global",
        "world": "world",
        "content": "hello"
    });
    let (status, body) = send_request(app, "POST", "/chat/send", Some(payload), Some(&token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("game-account binding")
    );
}

#[tokio::test]
async fn test_chat_send_and_history_roundtrip() {
    let state = setup_state().await;
    let token = helpers::generate_api_token();
    seed_user(&state, &token, true).await;

    let payload = json!({
        "sessionId": "session-1",
        "serverName": "Survival SMP",
        "channel": "global",
        "world": "world",
        "content": "hi from the web"
    });
    let (status, body) = send_request(
        create_test_app(state.clone()),
        "POST",
        "/chat/send",
        Some(payload),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], json!("web"));
    assert_eq!(body["player"]["username"], json!("Steve"));

    let (status, body) = send_request(
        create_test_app(state.clone()),
        "GET",
        "/chat/history?serverName=Survival%20SMP&channel=GLOBAL&world=all",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let history = body.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["content"], json!("hi from the web"));

    // Another server's history stays empty
    let (status, body) = send_request(
        create_test_app(state),
        "GET",
        "/chat/history?serverName=Other",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_send_rejects_empty_content() {
    let state = setup_state().await;
    let token = helpers::generate_api_token();
    seed_user(&state, &token, true).await;
    let app = create_test_app(state);

    let payload = json!({
        "sessionId": "session-1",
        "serverName": "Survival SMP",
        "channel": "global",
        "world": "world",
        "content": "   "
    });
    let (status, body) = send_request(app, "POST", "/chat/send", Some(payload), Some(&token)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("empty"));
}

#[tokio::test]
async fn test_chat_catalogs() {
    let state = setup_state().await;

    let (status, body) = send_request(
        create_test_app(state.clone()),
        "GET",
        "/chat/channels",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().iter().any(|c| c["id"] == "global"));

    let (status, body) =
        send_request(create_test_app(state), "GET", "/chat/worlds", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().iter().any(|w| w["id"] == "all"));
}

// =============================================================================
// DEVICE FLOW TESTS
// =============================================================================

#[tokio::test]
async fn test_poll_unknown_device_code_yields_status_not_error() {
    let state = setup_state().await;
    let app = create_test_app(state);

    let payload = json!({ "device_code": "never-issued" });
    let (status, body) = send_request(app, "POST", "/oauth/device/poll", Some(payload), None).await;

    // Polling an unknown or evicted code is not an exceptional condition
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("EXPIRED"));
    assert_eq!(body["terminal"], json!(true));
}

#[tokio::test]
async fn test_poll_blank_device_code_is_rejected() {
    let state = setup_state().await;
    let app = create_test_app(state);

    let payload = json!({ "device_code": "  " });
    let (status, _body) = send_request(app, "POST", "/oauth/device/poll", Some(payload), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oauth_config_is_public() {
    let state = setup_state().await;
    let app = create_test_app(state);

    let (status, body) = send_request(app, "GET", "/oauth/config", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], json!(true));
    assert_eq!(body["polling_interval_secs"], json!(5));
    assert_eq!(body["polling_timeout_secs"], json!(900));
}

#[tokio::test]
async fn test_bind_without_stashed_code_is_rejected() {
    let state = setup_state().await;
    let token = helpers::generate_api_token();
    seed_user(&state, &token, false).await;
    let app = create_test_app(state);

    let (status, body) = send_request(app, "POST", "/oauth/bind", None, Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("code"));
}
