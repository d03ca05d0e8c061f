/// Voltage MC Client Demo
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
/// Demonstrates reading and writing PLC device memory over the MC protocol
///
/// Usage:
///   demo [host:port] [series] [frame]
///   demo --config plc.yaml

use std::env;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use voltage_mc::utils::format::format_metrics;
use voltage_mc::{
    ControllerSeries, DeviceAddress, DeviceType, FrameVariant, McConfig, McTcpClient, PlcClient,
    WriteEntry,
};

fn load_config(args: &[String]) -> anyhow::Result<McConfig> {
    if args.len() >= 2 && args[0] == "--config" {
        return McConfig::from_file(&args[1])
            .with_context(|| format!("failed to load configuration from {}", args[1]));
    }

    let mut config = McConfig::default();

    if let Some(address) = args.first() {
        let (host, port) = address
            .rsplit_once(':')
            .with_context(|| format!("expected host:port, got '{}'", address))?;
        config.host = host.to_string();
        config.port = port.parse().with_context(|| format!("invalid port '{}'", port))?;
    }
    if let Some(series) = args.get(1) {
        config.series = series.parse::<ControllerSeries>()?;
    }
    if let Some(frame) = args.get(2) {
        config.frame_variant = frame.parse::<FrameVariant>()?;
    }
    if args.len() > 3 {
        bail!("too many arguments");
    }

    config.packet_logging = env::var("MC_PACKET_LOG").is_ok();
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let config = load_config(&args)?;

    println!("🚀 Voltage MC Client Demo");
    println!("==========================");
    println!("{}", voltage_mc::info());
    println!(
        "📡 Target: {} ({} series, {} frame)",
        config.address(),
        config.series,
        config.frame_variant
    );

    let client = McTcpClient::connect_to(config)
        .await
        .context("failed to connect to PLC")?;
    println!("✅ Connected");

    println!("\n📖 Testing read operations...");

    match client.read_register(DeviceType::D, 100).await {
        Ok(value) => println!("📊 D100 = {}", value),
        Err(e) => println!("❌ Failed to read D100: {}", e),
    }

    let block = DeviceAddress::with_count(DeviceType::D, 0, 10);
    match client.read_words(&block).await {
        Ok(values) => println!("📊 {} = {:?}", block, values),
        Err(e) => println!("❌ Failed to read {}: {}", block, e),
    }

    match client.read_registers(&["D0", "X1F", "M100", "W10"]).await {
        Ok(values) => {
            let mut names: Vec<_> = values.keys().cloned().collect();
            names.sort();
            for name in names {
                println!("📊 {} = {}", name, values[&name]);
            }
        }
        Err(e) => println!("❌ Failed to read named registers: {}", e),
    }

    println!("\n✏️  Testing write operations...");

    match client.write_register(DeviceType::D, 200, -1).await {
        Ok(_) => println!("✅ Wrote D200 = -1"),
        Err(e) => println!("❌ Failed to write D200: {}", e),
    }

    sleep(Duration::from_millis(100)).await;

    match client.write_words(DeviceType::D, 300, &[0x1111, 0x2222, 0x3333]).await {
        Ok(_) => println!("✅ Wrote D300-D302"),
        Err(e) => println!("❌ Failed to write D300-D302: {}", e),
    }

    sleep(Duration::from_millis(100)).await;

    let entries = [
        WriteEntry::new(DeviceType::W, 0x10, 42),
        WriteEntry::new(DeviceType::R, 5, -42),
    ];
    match client.write_batch(&entries).await {
        Ok(_) => println!("✅ Wrote W10 and R5"),
        Err(e) => println!("❌ Batch write failed: {}", e),
    }

    match client.read_register(DeviceType::D, 200).await {
        Ok(value) => println!("🔁 D200 read back = {}", value),
        Err(e) => println!("❌ Failed to read back D200: {}", e),
    }

    let stats = client.get_stats();
    println!("\n📊 Connection Statistics:");
    println!("   Requests sent: {}", stats.requests_sent);
    println!("   Responses received: {}", stats.responses_received);
    println!("   Errors: {}", stats.errors);
    println!("   Timeouts: {}", stats.timeouts);
    println!("   Bytes sent: {}", stats.bytes_sent);
    println!("   Bytes received: {}", stats.bytes_received);
    println!("   Discarded frames: {}", stats.discarded_frames);

    if stats.requests_sent > 0 {
        let success_rate = (stats.responses_received as f64 / stats.requests_sent as f64) * 100.0;
        println!("   Success rate: {:.1}%", success_rate);
    }

    println!("\n⏱️  {}", format_metrics(&client.metrics()));

    if let Err(e) = client.disconnect().await {
        eprintln!("⚠️  Error closing connection: {}", e);
    } else {
        println!("\n✅ Connection closed successfully");
    }

    println!("\n🎉 Demo completed!");

    Ok(())
}
