use std::sync::atomic::Ordering;
use std::time::Duration;

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use signal_bridge::cli::Args;
use signal_bridge::{list_ports, Bridge, BridgeConfig, HttpForwarder, SerialLineSource};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    if args.list_ports {
        match list_ports() {
            Ok(ports) if ports.is_empty() => println!("No serial ports found."),
            Ok(ports) => {
                println!("{}", "Available serial ports:".bright_yellow());
                for port in ports {
                    println!("  {port}");
                }
            }
            Err(e) => {
                eprintln!("{} {}", "Failed to enumerate ports:".bright_red(), e);
                std::process::exit(1);
            }
        }
        return;
    }

    let mut config = BridgeConfig::new(&args.port, args.baud, &args.url);
    config.request_timeout = Duration::from_secs(args.request_timeout);

    let source = match SerialLineSource::open(&config.port, config.baud_rate, config.read_timeout) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{} {}", "Error:".bright_red(), e);
            eprintln!();
            eprintln!("{}", "Troubleshooting:".bright_yellow());
            eprintln!("  1. Check that the device is plugged in");
            eprintln!("  2. Verify the port name with --list-ports");
            eprintln!("  3. Pass the right port, e.g. signal-bridge /dev/ttyACM0");
            eprintln!("  4. Close other programs using the port");
            std::process::exit(1);
        }
    };
    println!(
        "{} {}",
        "Connected to device on".bright_green(),
        config.port.bright_white()
    );

    let forwarder = HttpForwarder::new(&config.url, config.connect_timeout, config.request_timeout);
    let mut bridge = Bridge::new(source, forwarder, config);

    // Ctrl-C flips the flag; the loop observes it between iterations.
    let shutdown = bridge.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    bridge.run().await;

    // The serial handle drops here, releasing the port.
    println!("{}", "Serial port closed".bright_blue());
}
