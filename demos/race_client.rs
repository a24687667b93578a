//! Minimal keyclash race client
//!
//! Connects to a running keyclash server, enters the matchmaking queue
//! and lets you race: once the countdown ends, retype the snippet and
//! press enter (partial attempts count, the longest correct prefix is
//! reported as progress).
//!
//! Usage:
//!   cargo run --example race_client [ws://host:port/ws] [name]
//!
//! Set KEYCLASH_TOKEN to connect with a signed token instead of a
//! guest identity.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:3030/ws".to_string());
    let name = std::env::args().nth(2).unwrap_or_else(|| "demo".to_string());

    println!("⌨️  keyclash race client");
    println!("Connecting to {}", url);

    let mut request = url.clone().into_client_request()?;
    if let Ok(token) = std::env::var("KEYCLASH_TOKEN") {
        let value = format!("Bearer {}", token).parse()?;
        request.headers_mut().insert("Authorization", value);
    }

    let (ws_stream, _) = connect_async(request).await?;
    println!("Connected!");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    ws_sender
        .send(Message::Text(
            json!({ "type": "join_queue", "name": name }).to_string(),
        ))
        .await?;

    let mut snippet_text = String::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            frame = ws_receiver.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        eprintln!("Connection error: {}", e);
                        break;
                    }
                    None => {
                        println!("Server closed the connection");
                        break;
                    }
                };
                if !frame.is_text() {
                    continue;
                }
                let value: Value = serde_json::from_str(frame.to_text()?)?;
                match value["type"].as_str().unwrap_or("") {
                    "connected" => {
                        println!(
                            "Playing as {} (authenticated: {})",
                            value["player_id"].as_str().unwrap_or("?"),
                            value["authenticated"]
                        );
                    }
                    "queue_joined" => {
                        println!("Waiting in queue at position {}", value["position"]);
                    }
                    "room_joined" => {
                        snippet_text = value["snippet"]["text"]
                            .as_str()
                            .unwrap_or("")
                            .to_string();
                        println!("Matched into room {}", value["room_id"].as_str().unwrap_or("?"));
                        println!("Snippet: {}", snippet_text);
                    }
                    "countdown_tick" => {
                        println!("{}...", value["seconds_left"]);
                    }
                    "game_start" => {
                        println!("GO! Retype the snippet and press enter:");
                    }
                    "opponent_progress" => {
                        println!(
                            "  {} is at {}/{}",
                            value["player_id"].as_str().unwrap_or("?"),
                            value["progress"],
                            snippet_text.chars().count()
                        );
                    }
                    "player_finished" => {
                        println!(
                            "You finished rank {} in {} ms",
                            value["rank"], value["time_ms"]
                        );
                    }
                    "player_finished_task" => {
                        println!("  {} finished", value["player_id"].as_str().unwrap_or("?"));
                    }
                    "game_complete" => {
                        println!("Race over. Rankings:");
                        if let Some(rankings) = value["rankings"].as_array() {
                            for entry in rankings {
                                let rank = entry["rank"]
                                    .as_u64()
                                    .map(|r| r.to_string())
                                    .unwrap_or_else(|| "-".to_string());
                                println!(
                                    "  {} {} (finished: {})",
                                    rank,
                                    entry["name"].as_str().unwrap_or("?"),
                                    entry["finished"]
                                );
                            }
                        }
                        break;
                    }
                    "validation_failed" => {
                        println!("Progress rejected: {}", value["reason"].as_str().unwrap_or("?"));
                    }
                    "error" => {
                        println!(
                            "Server error {}: {}",
                            value["code"].as_str().unwrap_or("?"),
                            value["message"].as_str().unwrap_or("?")
                        );
                    }
                    other => {
                        println!("Unhandled message type: {}", other);
                    }
                }
            }
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    _ => break,
                };
                let typed = correct_prefix_len(&snippet_text, line.trim_end());
                ws_sender
                    .send(Message::Text(
                        json!({ "type": "progress_update", "progress": typed }).to_string(),
                    ))
                    .await?;
            }
        }
    }

    Ok(())
}

/// Length of the longest prefix of the snippet the attempt got right
fn correct_prefix_len(snippet: &str, typed: &str) -> usize {
    snippet
        .chars()
        .zip(typed.chars())
        .take_while(|(want, got)| want == got)
        .count()
}
