use aerobike::{BikeDevice, Result, MAX_RESISTANCE_LEVEL, MIN_RESISTANCE_LEVEL};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🎚️ Aerobike Resistance Control Example");
    info!("Searching for fitness bikes...");

    let bike = match BikeDevice::connect_first().await {
        Ok(device) => {
            info!("✅ Connected to: {}", device.device_info().name);
            device
        }
        Err(e) => {
            error!("❌ Failed to connect to bike: {}", e);
            return Err(e);
        }
    };

    // Take the level from the command line, default to the middle of the range
    let level = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse::<u8>().ok())
        .unwrap_or(20);

    info!(
        "Setting resistance to level {level} (valid range {MIN_RESISTANCE_LEVEL}-{MAX_RESISTANCE_LEVEL})"
    );

    match bike.set_resistance_level(level).await {
        Ok(()) => info!("✅ Resistance command sent"),
        Err(e) => {
            error!("❌ Failed to set resistance: {}", e);
            let _ = bike.disconnect().await;
            return Err(e);
        }
    }

    // Give the bike a moment to acknowledge, then show what it said
    sleep(Duration::from_secs(2)).await;

    let responses = bike.control_responses().await;
    if responses.is_empty() {
        info!("No control point acknowledgment received (bike may not indicate)");
    } else {
        for response in &responses {
            println!(
                "📨 Acknowledgment: request {:#04X} -> {}",
                response.request_opcode, response.result
            );
        }
    }

    // Show the effect on live telemetry
    let metrics = bike.metrics().await;
    println!("\n🚴 Current Metrics:");
    println!("  Speed:      {:.2} km/h", metrics.speed);
    println!("  Cadence:    {:.1} rpm", metrics.cadence);
    println!("  Power:      {} W", metrics.power);
    println!("  Resistance: {}", metrics.resistance);

    info!("🔌 Disconnecting...");
    if let Err(e) = bike.disconnect().await {
        error!("❌ Failed to disconnect: {}", e);
    } else {
        info!("✅ Disconnected successfully");
    }

    info!("🎉 Done!");
    Ok(())
}
