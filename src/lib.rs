//! # signal-bridge
//!
//! Bridges a line-oriented serial device (a microcontroller emitting
//! JSON-encoded event messages) to a remote HTTP endpoint.
//!
//! ## What It Does
//!
//! 1. **Read** — drains lines off a serial port with a bounded read timeout.
//! 2. **Classify** — lines beginning with `{` are parsed as JSON events;
//!    everything else is diagnostic text for the operator.
//! 3. **Forward** — each parsed event is POSTed to the configured server
//!    endpoint; delivery failures are reported and the event is dropped,
//!    the loop never stops for them.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = BridgeConfig::new("/dev/ttyACM0", 115_200, "http://127.0.0.1:5000/api/door-alert");
//! let source = SerialLineSource::open(&config.port, config.baud_rate, config.read_timeout)?;
//! let forwarder = HttpForwarder::new(&config.url, config.connect_timeout, config.request_timeout);
//! let mut bridge = Bridge::new(source, forwarder, config);
//! bridge.run().await;
//! ```

pub mod bridge;
pub mod cli;
pub mod error;
pub mod forward;
pub mod serial;

pub use bridge::{classify_line, Bridge, BridgeConfig, LineClass, PollOutcome, SessionStats};
pub use error::BridgeError;
pub use forward::{Forwarder, HttpForwarder};
pub use serial::{list_ports, LineSource, ScriptedLineSource, SerialLineSource};
