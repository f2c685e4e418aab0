//! Playlist playback through the JSON control plane.
//!
//! Plays WAV files in order on the local output device, driving the bridge
//! the same way a remote controller would.
//!
//! Run with: cargo run --example playlist -- one.wav two.wav

use std::time::Duration;

use serde_json::json;
use stream_bridge::playback::PlayerState;
use stream_bridge::{Bridge, ControlPlane, ControlReply};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let items: Vec<_> = std::env::args()
        .skip(1)
        .map(|path| json!({ "location": path }))
        .collect();
    if items.is_empty() {
        eprintln!("usage: playlist <file.wav>...");
        return Ok(());
    }

    let control = ControlPlane::new(Bridge::builder().build()?);
    control.handle("add/output/local", br#"{"verbose": false}"#).await?;
    control.handle("set/input/media", br#"{"verbose": true}"#).await?;

    let play = json!({ "action": "play_playlist", "items": items, "keep_playing": true });
    control.handle("ctl/media/set", play.to_string().as_bytes()).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let ControlReply::Playback(info) = control.handle("ctl/media/info", b"").await? else {
                    continue;
                };
                if info.state == PlayerState::Stopped {
                    break;
                }
                if let Some(item) = info.item {
                    println!("[{}/{}] {}", info.index.unwrap_or(0) + 1, info.playlist_len, item.label());
                }
            }
        }
    }

    control.handle("ctl/media/set", br#"{"action": "stop"}"#).await?;
    control.bridge().shutdown().await;
    Ok(())
}
