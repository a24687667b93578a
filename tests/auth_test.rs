// Integration tests for connection authentication: issued tokens,
// guest fallback, and the config-driven verifier

use keyclash::auth::token::{Claims, TokenIssuer, TokenVerifier};
use keyclash::config::ServerConfig;
use keyclash::core::server::ServerManager;
use keyclash::handlers::auth::{authenticate_connection, extract_token_comprehensive};
use warp::hyper::header::{HeaderMap, HeaderValue};

const SECRET: &str = "integration-test-signing-key-0123456789";

fn config_with_secret(secret: Option<&str>) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 3030,
        token_secret: secret.map(|s| s.to_string()),
        development_mode: secret.is_none(),
        max_connections_per_ip: 10,
        progress_limit: 60,
        progress_window_ms: 1_000,
        room_action_limit: 10,
        room_action_window_ms: 10_000,
        room_create_limit: 5,
        room_create_window_ms: 60_000,
        countdown_ms: 3_000,
        min_players: 2,
        match_group_size: 2,
        race_timeout_secs: 300,
    }
}

#[test]
fn test_issued_token_authenticates_with_claimed_identity() {
    let issuer = TokenIssuer::new(SECRET);
    let claims = Claims::new(
        "player-42".to_string(),
        Some("Ada".to_string()),
        Some("room-7".to_string()),
    );
    let token = issuer.issue(&claims).unwrap();

    let verifier = TokenVerifier::new(SECRET);
    let grant = authenticate_connection(Some(token), &verifier).unwrap();
    assert!(grant.verified);
    assert_eq!(grant.player.id, "player-42");
    assert_eq!(grant.player.name, "Ada");
    assert_eq!(grant.room_hint.as_deref(), Some("room-7"));
}

#[test]
fn test_token_travels_via_authorization_header() {
    let issuer = TokenIssuer::new(SECRET);
    let claims = Claims::new("player-42".to_string(), None, None);
    let token = issuer.issue(&claims).unwrap();

    let mut headers = HeaderMap::new();
    headers.insert(
        "authorization",
        HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );

    let extracted = extract_token_comprehensive(&headers);
    assert_eq!(extracted.as_deref(), Some(token.as_str()));

    let verifier = TokenVerifier::new(SECRET);
    let grant = authenticate_connection(extracted, &verifier).unwrap();
    assert!(grant.verified);
    assert_eq!(grant.player.id, "player-42");
}

#[test]
fn test_tokenless_connections_get_distinct_guests() {
    let verifier = TokenVerifier::new(SECRET);

    let first = authenticate_connection(None, &verifier).unwrap();
    let second = authenticate_connection(None, &verifier).unwrap();

    assert!(!first.verified);
    assert!(!second.verified);
    assert_ne!(first.player.id, second.player.id);
    assert!(first.player.name.starts_with("Guest-"));
}

#[test]
fn test_expired_token_is_rejected_without_detail() {
    let issuer = TokenIssuer::new(SECRET);
    let mut claims = Claims::new("player-42".to_string(), None, None);
    claims.exp = claims.iat.saturating_sub(7_200);
    let token = issuer.issue(&claims).unwrap();

    let verifier = TokenVerifier::new(SECRET);
    let err = authenticate_connection(Some(token), &verifier).unwrap_err();
    assert_eq!(err.code(), "AUTH_REJECTED");
    assert!(err.to_string().contains("invalid token"));
}

#[test]
fn test_claimed_name_is_sanitized_before_use() {
    let issuer = TokenIssuer::new(SECRET);
    let claims = Claims::new(
        "player-42".to_string(),
        Some("  Ada\u{200B}   Lovelace\u{0007} ".to_string()),
        None,
    );
    let token = issuer.issue(&claims).unwrap();

    let verifier = TokenVerifier::new(SECRET);
    let grant = authenticate_connection(Some(token), &verifier).unwrap();
    assert_eq!(grant.player.name, "Ada Lovelace");
}

#[test]
fn test_server_verifier_follows_configured_secret() {
    let issuer = TokenIssuer::new(SECRET);
    let claims = Claims::new("player-42".to_string(), None, None);
    let token = issuer.issue(&claims).unwrap();

    let with_secret = ServerManager::new(config_with_secret(Some(SECRET)));
    let grant = with_secret.verifier().verify(Some(&token)).unwrap();
    assert!(grant.verified);

    let wrong_secret =
        ServerManager::new(config_with_secret(Some("a-different-signing-key-9876543210ab")));
    assert!(wrong_secret.verifier().verify(Some(&token)).is_err());

    // Secretless dev mode decodes without verifying
    let no_secret = ServerManager::new(config_with_secret(None));
    let grant = no_secret.verifier().verify(Some(&token)).unwrap();
    assert!(!grant.verified);
    assert_eq!(grant.player.id, "player-42");
}
