// Integration tests for per-source connection admission

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use keyclash::config::ServerConfig;
use keyclash::core::admission::ConnectionAdmission;
use keyclash::core::server::ServerManager;

fn ip(last_octet: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet))
}

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 3030,
        token_secret: None,
        development_mode: true,
        max_connections_per_ip: 2,
        progress_limit: 60,
        progress_window_ms: 1_000,
        room_action_limit: 10,
        room_action_window_ms: 10_000,
        room_create_limit: 5,
        room_create_window_ms: 60_000,
        countdown_ms: 50,
        min_players: 2,
        match_group_size: 2,
        race_timeout_secs: 300,
    }
}

#[tokio::test]
async fn test_ceiling_and_introspection() {
    let admission = ConnectionAdmission::new(2);

    assert!(admission.try_admit(ip(1), "a").await);
    assert!(admission.try_admit(ip(1), "b").await);
    assert!(!admission.try_admit(ip(1), "c").await);

    // A second source gets its own budget
    assert!(admission.try_admit(ip(2), "d").await);

    assert_eq!(admission.count(ip(1)).await, 2);
    assert_eq!(admission.count(ip(2)).await, 1);
    assert_eq!(admission.total_tracked().await, 2);
    assert_eq!(admission.total_connections().await, 3);
}

#[tokio::test]
async fn test_release_frees_slot_for_same_source() {
    let admission = ConnectionAdmission::new(1);

    assert!(admission.try_admit(ip(1), "a").await);
    assert!(!admission.try_admit(ip(1), "b").await);

    admission.release(ip(1), "a").await;
    assert!(admission.try_admit(ip(1), "b").await);
    assert_eq!(admission.count(ip(1)).await, 1);
}

#[tokio::test]
async fn test_emptied_source_stays_tracked_through_grace() {
    let admission = ConnectionAdmission::with_grace(1, Duration::from_millis(40));

    assert!(admission.try_admit(ip(1), "a").await);
    admission.release(ip(1), "a").await;

    // Still within grace: the record survives a purge pass
    admission.purge_expired().await;
    assert_eq!(admission.total_tracked().await, 1);

    // Reconnecting reuses the record and cancels the pending purge
    assert!(admission.try_admit(ip(1), "b").await);
    admission.release(ip(1), "b").await;

    tokio::time::sleep(Duration::from_millis(60)).await;
    admission.purge_expired().await;
    assert_eq!(admission.total_tracked().await, 0);
}

#[tokio::test]
async fn test_server_wrappers_enforce_configured_ceiling() {
    let server = Arc::new(ServerManager::new(test_config()));

    assert!(server.try_admit(ip(9), "conn-1").await);
    assert!(server.try_admit(ip(9), "conn-2").await);
    assert!(!server.try_admit(ip(9), "conn-3").await);

    assert_eq!(server.admission_count(ip(9)).await, 2);
    assert_eq!(server.admission_tracked_sources().await, 1);
    assert_eq!(server.admission_total_connections().await, 2);

    server.release_admission(ip(9), "conn-1").await;
    assert_eq!(server.admission_count(ip(9)).await, 1);
    assert!(server.try_admit(ip(9), "conn-3").await);
}

#[tokio::test]
async fn test_sweep_task_purges_idle_sources() {
    let admission = Arc::new(ConnectionAdmission::with_grace(
        1,
        Duration::from_millis(10),
    ));

    assert!(admission.try_admit(ip(1), "a").await);
    admission.release(ip(1), "a").await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    // The sweep task's first tick fires immediately
    let handle = admission.clone().start_sweep_task();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(admission.total_tracked().await, 0);
    handle.abort();
}
