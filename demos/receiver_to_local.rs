//! Receiver to local playback.
//!
//! Advertises a virtual speaker on the network and plays whatever a sender
//! streams to it on the default output device.
//!
//! Run with: cargo run --example receiver_to_local -- "Living Room Bridge" 7000

use stream_bridge::{
    Bridge, BridgeEvent, InputSpec, LocalOutputConfig, OutputSpec, ReceiverInputConfig,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let name = args.next().unwrap_or_else(|| "Stream Bridge".to_string());
    let port = args.next().map(|p| p.parse()).transpose()?.unwrap_or(7000);

    let bridge = Bridge::builder()
        .on_event(|event| match event {
            BridgeEvent::OutputRemoved { name, reason, .. } => {
                eprintln!("[Warning] output {name} removed: {reason}");
            }
            other => println!("Event: {other:?}"),
        })
        .build()?;

    bridge
        .add_output(OutputSpec::Local(LocalOutputConfig { verbose: false }))
        .await?;
    bridge
        .start_input(InputSpec::Receiver(ReceiverInputConfig {
            name: name.clone(),
            port,
            verbose: false,
        }))
        .await?;

    println!("Advertising \"{name}\" on port {port}. Press Ctrl-C to stop.");
    tokio::signal::ctrl_c().await?;

    println!("Connected senders: {:?}", bridge.receiver_clients());
    println!("Stats: {:?}", bridge.stats());
    bridge.shutdown().await;
    Ok(())
}
