//! Pair a heart-rate belt, connect to it and record heart rate for a minute
//!
//! Run with: cargo run --example pairing_monitor

use ired_ble::protocol::{HeartRateCallback, JumpRopeStatus, ScaleCallback};
use ired_ble::{
    BleObserver, ConnectionState, DeviceEvent, DeviceManager, DeviceType, Observers, Result,
    SportObserver,
};
use std::sync::Arc;
use std::time::Duration;

struct Printer;

impl BleObserver for Printer {
    fn adapter_state_changed(&self, state: ired_ble::AdapterState) {
        println!("Bluetooth: {}", state);
    }

    fn device_event(&self, event: &DeviceEvent) {
        match event {
            DeviceEvent::Discovered { device, .. } => {
                println!(
                    "Discovered {} ({}), RSSI {:?}",
                    device.name, device.identifier, device.rssi
                )
            }
            DeviceEvent::Connected { device, .. } => println!("Connected to {}", device.name),
            DeviceEvent::Disconnected { device, reason, .. } => {
                println!("Disconnected from {} ({:?})", device.name, reason)
            }
            DeviceEvent::ConnectionFailed { device, reason, .. } => {
                println!("Could not connect to {}: {}", device.identifier, reason)
            }
        }
    }
}

impl SportObserver for Printer {
    fn jump_rope(&self, _status: &JumpRopeStatus) {}

    fn heart_rate(&self, callback: &HeartRateCallback) {
        match callback {
            HeartRateCallback::HeartRate(bpm) => println!("  {} bpm", bpm),
            HeartRateCallback::Battery(level) => println!("  battery {}%", level),
        }
    }

    fn scale(&self, _callback: &ScaleCallback) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ired_ble=debug".parse().unwrap()),
        )
        .init();

    let printer = Arc::new(Printer);
    let manager = DeviceManager::builder()
        .observers(Observers {
            ble: Some(printer.clone()),
            sport: Some(printer),
            ..Observers::default()
        })
        .build()
        .await?;

    println!("Looking for a heart-rate belt. Wear it so it starts advertising.\n");
    manager.start_pairing(DeviceType::HeartRateBelt).await?;

    let identity = tokio::select! {
        identity = wait_for_pairing(&manager) => identity?,
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted!");
            manager.shutdown().await?;
            return Ok(());
        }
    };
    println!("Paired with {}", identity);

    manager.connect_type(DeviceType::HeartRateBelt).await?;
    while manager.device_data().heart_rate.status.connection != ConnectionState::Connected {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    manager.start_heart_rate_recording().await?;
    println!("Recording for 60 seconds...");
    println!("Press Ctrl+C to stop early.\n");

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(60)) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("\nInterrupted!");
        }
    }
    manager.stop_heart_rate_recording().await?;

    let model = manager.device_data().heart_rate.data;
    println!("\n--- Recording Complete ---");
    println!("Samples: {}", model.recorded_seconds());
    if let (Some(min), Some(max), Some(average)) = (model.min(), model.max(), model.average()) {
        println!("Min {} / Max {} / Average {:.1} bpm", min, max, average);
    }
    println!("{}", model.history.to_csv());

    manager.shutdown().await?;
    println!("\nDone!");

    Ok(())
}

async fn wait_for_pairing(manager: &DeviceManager) -> Result<String> {
    loop {
        if let Some(identity) = manager.paired_identity(DeviceType::HeartRateBelt)? {
            return Ok(identity.name.unwrap_or(identity.identifier));
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}
