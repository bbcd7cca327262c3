use clap::Parser;

#[derive(Parser)]
#[command(name = "signal-bridge")]
#[command(version)]
#[command(about = "Forward JSON events from a serial device to an HTTP endpoint")]
pub struct Args {
    /// Serial port to read from (e.g. COM3, /dev/ttyACM0)
    #[arg(default_value = "COM3")]
    pub port: String,

    /// Baud rate of the serial connection
    #[arg(long, default_value = "115200")]
    pub baud: u32,

    /// Server endpoint that receives event payloads
    #[arg(long, default_value = "http://127.0.0.1:5000/api/door-alert")]
    pub url: String,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "5")]
    pub request_timeout: u64,

    /// List available serial ports and exit
    #[arg(long)]
    pub list_ports: bool,
}

/// Strip a single trailing slash so endpoint paths concatenate cleanly.
pub fn normalize_url(url: &str) -> String {
    url.strip_suffix('/').unwrap_or(url).to_string()
}
