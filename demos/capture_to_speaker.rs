//! Capture to wireless speaker.
//!
//! Lists the capture devices, then forwards the chosen one to the first
//! speaker whose name matches a pattern.
//!
//! Run with: cargo run --example capture_to_speaker -- 0 "^Kitchen"

use std::time::Duration;

use stream_bridge::{
    list_input_devices, AudioDeviceSelector, Bridge, BridgeConfig, CaptureInputConfig, InputSpec,
    OutputSpec, SearchType, SenderOutputConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Capture devices:");
    for (id, name) in list_input_devices()? {
        println!("  [{id}] {name}");
    }

    let mut args = std::env::args().skip(1);
    let device_id: usize = args.next().map(|id| id.parse()).transpose()?.unwrap_or(0);
    let pattern = args.next().unwrap_or_else(|| ".*".to_string());

    let bridge = Bridge::builder()
        .config(BridgeConfig {
            discovery_timeout: Duration::from_secs(15),
            ..Default::default()
        })
        .build()?;

    println!("Looking for a speaker matching /{pattern}/...");
    let id = bridge
        .add_output(OutputSpec::Sender(SenderOutputConfig {
            search_key: pattern,
            search_type: SearchType::Name,
            verbose: true,
        }))
        .await?;
    println!("Connected as output {id}");

    bridge
        .start_input(InputSpec::Capture(CaptureInputConfig {
            audio_device: Some(AudioDeviceSelector {
                id: Some(device_id),
                name: None,
            }),
            verbose: false,
        }))
        .await?;

    println!("Streaming. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    let stats = bridge.stats();
    bridge.shutdown().await;
    println!("Stats: {stats:?}");
    Ok(())
}
