/// Voltage MC PLC Simulator
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Runs an MC protocol TCP server that answers batch read/write requests
/// in 3E and 4E binary frames from in-memory device storage
///
/// Usage:
///   mc_simulator [bind_address]

use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::time::interval;
use log::{info, error};

use voltage_mc::{DeviceMemory, DeviceType, McServer, McTcpServer, McTcpServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let bind_address = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:5000".to_string());

    println!("🚀 Voltage MC PLC Simulator");
    println!("===========================");
    println!("Features:");
    println!("- 3E and 4E binary frames, detected per connection");
    println!("- Q/L/QnA/iQ-L and iQ-R device layouts");
    println!("- Batch read (0x0401) and batch write (0x1401) in word units");
    println!("- PLC end codes for malformed or out-of-range requests");
    println!();

    let device_memory = Arc::new(DeviceMemory::new());

    info!("🔧 Initializing device memory...");
    for i in 0..100u32 {
        device_memory.set_word(DeviceType::D, i, 1000 + i as i16)?;
        device_memory.set_word(DeviceType::W, i, (0x100 + i) as i16)?;
        device_memory.set_word(DeviceType::M, i, (i % 2) as i16)?;
    }
    device_memory.set_device_size(DeviceType::D, 12288)?;
    device_memory.set_device_size(DeviceType::R, 32768)?;

    let config = McTcpServerConfig {
        bind_address: bind_address.parse()?,
        max_connections: 16,
        request_timeout: Duration::from_secs(60),
        device_memory: Some(device_memory.clone()),
    };

    let mut server = McTcpServer::with_config(config)?;

    info!("🚀 Starting MC simulator...");
    server.start().await?;

    let listening = server
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or(bind_address);
    info!("✅ Simulator listening on {}", listening);
    info!("   D0-D99 = 1000 + offset, W0-W63 = 0x100 + offset");
    info!("   D is limited to 12288 words, R to 32768 words");

    let memory_stats = device_memory.clone();
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(10));

        loop {
            interval.tick().await;

            let stats = memory_stats.get_stats();
            info!("📊 Device memory: {} words stored", stats.stored_words);
            let mut devices: Vec<_> = stats.per_device.iter().collect();
            devices.sort();
            for (device, count) in devices {
                info!("   {}: {} words", device, count);
            }
        }
    });

    let memory_sim = device_memory.clone();
    tokio::spawn(async move {
        let mut counter = 0i16;
        let mut interval = interval(Duration::from_secs(5));

        loop {
            interval.tick().await;

            // D1000-D1009 change over time
            for i in 0..10u32 {
                let _ = memory_sim.set_word(DeviceType::D, 1000 + i, counter.wrapping_add(i as i16));
            }

            counter = counter.wrapping_add(1);
            info!("🔄 Data simulation update: counter = {}", counter);
        }
    });

    println!("\n📋 Simulator running, press Ctrl+C to stop");

    match signal::ctrl_c().await {
        Ok(()) => info!("🛑 Received interrupt signal, stopping simulator..."),
        Err(err) => error!("❌ Failed to listen for interrupt signal: {}", err),
    }

    server.stop().await?;

    let final_stats = server.get_stats();
    info!("📊 Final simulator statistics:");
    info!("   Total connections: {}", final_stats.connections_count);
    info!("   Total requests: {}", final_stats.total_requests);
    info!("   Successful requests: {}", final_stats.successful_requests);
    info!("   Failed requests: {}", final_stats.failed_requests);
    info!("   Bytes received: {} bytes", final_stats.bytes_received);
    info!("   Bytes sent: {} bytes", final_stats.bytes_sent);
    info!("   Uptime: {} seconds", final_stats.uptime_seconds);

    println!("\n✅ Simulator stopped");

    Ok(())
}
