use aerobike::{BikeDevice, Result};
use std::time::Duration;
use tokio::time::{interval, Instant};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🚴 Aerobike Live Metrics Example");
    info!("Searching for fitness bikes...");

    // Connect to the first compatible bike
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

    // Report what the bike claims to support
    match bike.read_features().await {
        Ok(features) => {
            info!(
                "Machine features: resistance={} power={} simulation={}",
                features.resistance_level_supported(),
                features.power_target_supported(),
                features.simulation_supported()
            );
        }
        Err(e) => warn!("Could not read machine features: {}", e),
    }

    info!("📊 Streaming live metrics...");
    info!("Press Ctrl+C to stop");

    let mut tick = interval(Duration::from_secs(2));
    let start_time = Instant::now();
    let mut max_power = 0i16;

    loop {
        tick.tick().await;

        let metrics = bike.metrics().await;
        let status = bike.status().await;

        if metrics.power > max_power {
            max_power = metrics.power;
        }

        let elapsed = start_time.elapsed();
        let minutes = elapsed.as_secs() / 60;
        let seconds = elapsed.as_secs() % 60;

        println!("\n🚴 Ride Update ({minutes:02}:{seconds:02})");
        println!("┌─────────────────────────────────────────┐");
        println!(
            "│ Speed:      {:6.2} km/h (avg {:6.2})    │",
            metrics.speed, metrics.average_speed
        );
        println!(
            "│ Cadence:    {:6.1} rpm  (avg {:6.1})    │",
            metrics.cadence, metrics.average_cadence
        );
        println!(
            "│ Power:      {:4} W     (avg {:4})       │",
            metrics.power, metrics.average_power
        );
        println!("│ Resistance: {:4}                        │", metrics.resistance);
        println!("│ Distance:   {:8.0} m                │", metrics.distance);
        println!("└─────────────────────────────────────────┘");

        if metrics.power > 0 {
            println!("📈 Max Power: {max_power} W");
        }

        if !status.is_monitoring {
            warn!("Telemetry is not flowing");
        }

        if !bike.is_connected().await {
            warn!("❌ Bike disconnected");
            break;
        }
    }

    info!("🔌 Disconnecting...");
    if let Err(e) = bike.disconnect().await {
        error!("❌ Failed to disconnect: {}", e);
    } else {
        info!("✅ Disconnected successfully");
    }

    let final_metrics = bike.metrics().await;
    println!("\n🏁 Final Ride Summary:");
    println!(
        "  Duration: {:02}:{:02}",
        start_time.elapsed().as_secs() / 60,
        start_time.elapsed().as_secs() % 60
    );
    println!("  Distance: {:.0} m", final_metrics.distance);
    println!("  Max Power: {max_power} W");

    info!("🎉 Ride completed!");
    Ok(())
}
