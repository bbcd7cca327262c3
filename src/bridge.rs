//! The bridge loop: classify each serial line, forward structured events to
//! the server, and stay alive through every per-event failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use colored::*;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::error::BridgeError;
use crate::forward::Forwarder;
use crate::serial::LineSource;

/// Runtime configuration for one bridge session.
///
/// Passed into [`Bridge::new`] rather than read from globals so that tests
/// can inject a scripted line source and a recording forwarder.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Serial port path (e.g. `COM3`, `/dev/ttyACM0`).
    pub port: String,
    pub baud_rate: u32,
    /// Server endpoint that receives event payloads.
    pub url: String,
    /// Bounded serial read timeout.
    pub read_timeout: Duration,
    /// Pacing delay between loop iterations.
    pub idle_delay: Duration,
    /// TCP connection timeout for the HTTP client.
    pub connect_timeout: Duration,
    /// Per-request timeout for the HTTP client.
    pub request_timeout: Duration,
    /// Pause after an iteration-level error before resuming.
    pub error_backoff: Duration,
}

impl BridgeConfig {
    /// Create a config with sensible defaults.
    ///
    /// - read_timeout: 1 s
    /// - idle_delay: 100 ms
    /// - connect_timeout: 3 s
    /// - request_timeout: 5 s
    /// - error_backoff: 1 s
    pub fn new(port: impl Into<String>, baud_rate: u32, url: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            url: crate::cli::normalize_url(&url.into()),
            read_timeout: Duration::from_secs(1),
            idle_delay: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// What one raw serial line turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    /// Nothing left after trimming; discarded silently.
    Empty,
    /// Parsed JSON event payload, ready to forward.
    Event(Value),
    /// Looked like JSON (leading `{`) but did not parse.
    Malformed { line: String, detail: String },
    /// Free-form device output, surfaced for the operator only.
    Diagnostic(String),
}

/// Trim a raw line and classify it by its first character.
pub fn classify_line(raw: &str) -> LineClass {
    let line = raw.trim();
    if line.is_empty() {
        return LineClass::Empty;
    }
    if line.starts_with('{') {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => LineClass::Event(value),
            Err(e) => LineClass::Malformed {
                line: line.to_string(),
                detail: e.to_string(),
            },
        }
    } else {
        LineClass::Diagnostic(line.to_string())
    }
}

/// Result of one loop iteration.
///
/// Forwarding variants carry the event payload so callers (and tests) can
/// see exactly what was attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// No unread input was available.
    Idle,
    /// A line arrived but was empty after trimming.
    Empty,
    /// Event forwarded, server replied 200 with `response`.
    Delivered { event: Value, response: Value },
    /// Event forwarded, server replied with a non-200 status.
    Rejected {
        event: Value,
        status: u16,
        body: String,
    },
    /// Event could not be delivered at the transport level.
    Unreachable { event: Value, detail: String },
    /// Line began with `{` but was not valid JSON; dropped.
    Malformed { line: String, detail: String },
    /// Non-JSON device output; never forwarded.
    Diagnostic { line: String },
}

/// Counters for one bridge session, printed in the shutdown footer.
#[derive(Debug, Default, Clone, Serialize)]
pub struct SessionStats {
    /// Non-empty lines read off the wire.
    pub lines_read: u64,
    pub events_delivered: u64,
    /// Rejected, unreachable, and malformed events combined.
    pub events_failed: u64,
    pub diagnostics: u64,
}

/// The read-classify-forward loop.
///
/// Owns the line source and the forwarder exclusively; there is one thread
/// of control and every iteration is independent of the last.
pub struct Bridge<S, F> {
    source: S,
    forwarder: F,
    config: BridgeConfig,
    shutdown: Arc<AtomicBool>,
    stats: SessionStats,
}

impl<S: LineSource, F: Forwarder> Bridge<S, F> {
    pub fn new(source: S, forwarder: F, config: BridgeConfig) -> Self {
        Self {
            source,
            forwarder,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: SessionStats::default(),
        }
    }

    /// Flag that stops the loop between iterations when set. Hand a clone
    /// to the Ctrl-C handler.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Run one iteration: poll, read, classify, forward.
    ///
    /// Per-event failures (malformed JSON, non-200, transport errors) are
    /// `Ok` outcomes — the event is dropped and the loop goes on. An `Err`
    /// here means the serial layer itself failed; [`Bridge::run`] reports it
    /// and backs off.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, BridgeError> {
        if !self.source.data_ready()? {
            return Ok(PollOutcome::Idle);
        }
        let Some(raw) = self.source.next_line()? else {
            return Ok(PollOutcome::Idle);
        };

        let outcome = match classify_line(&raw) {
            LineClass::Empty => PollOutcome::Empty,
            LineClass::Event(event) => {
                self.stats.lines_read += 1;
                match self.forwarder.forward(&event).await {
                    Ok(response) => {
                        self.stats.events_delivered += 1;
                        PollOutcome::Delivered { event, response }
                    }
                    Err(BridgeError::Http { status, body, .. }) => {
                        self.stats.events_failed += 1;
                        PollOutcome::Rejected {
                            event,
                            status,
                            body,
                        }
                    }
                    Err(e) => {
                        self.stats.events_failed += 1;
                        PollOutcome::Unreachable {
                            event,
                            detail: e.to_string(),
                        }
                    }
                }
            }
            LineClass::Malformed { line, detail } => {
                self.stats.lines_read += 1;
                self.stats.events_failed += 1;
                PollOutcome::Malformed { line, detail }
            }
            LineClass::Diagnostic(line) => {
                self.stats.lines_read += 1;
                self.stats.diagnostics += 1;
                PollOutcome::Diagnostic { line }
            }
        };
        Ok(outcome)
    }

    /// Run until the shutdown flag is set.
    ///
    /// Every iteration ends with the pacing sleep to bound CPU use; serial
    /// layer errors are reported and followed by the longer error backoff
    /// instead, so a dead device cannot spin the loop.
    pub async fn run(&mut self) {
        self.print_banner();

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.poll_once().await {
                Ok(outcome) => {
                    self.report(&outcome);
                    tokio::time::sleep(self.config.idle_delay).await;
                }
                Err(e) => {
                    warn!(error = %e, "bridge iteration failed, backing off");
                    eprintln!("{} {}", "Error:".bright_red(), e);
                    tokio::time::sleep(self.config.error_backoff).await;
                }
            }
        }

        self.print_footer();
    }

    fn report(&self, outcome: &PollOutcome) {
        match outcome {
            PollOutcome::Idle | PollOutcome::Empty => {}
            PollOutcome::Delivered { event, response } => {
                println!("{} {}", "Received event:".bright_cyan(), event);
                println!("{} {}", "Sent to server:".bright_green(), response);
            }
            PollOutcome::Rejected {
                event,
                status,
                body,
            } => {
                println!("{} {}", "Received event:".bright_cyan(), event);
                println!("{} HTTP {}", "Server error:".bright_red(), status);
                println!("  Response: {body}");
                warn!(status = *status, "server rejected event");
            }
            PollOutcome::Unreachable { event, detail } => {
                println!("{} {}", "Received event:".bright_cyan(), event);
                println!("{} {}", "Failed to send to server:".bright_red(), detail);
                error!(detail = %detail, "event delivery failed, dropping event");
            }
            PollOutcome::Malformed { line, detail } => {
                println!("{} {}", "Invalid JSON:".bright_yellow(), line);
                println!("  Error: {detail}");
                warn!(line = %line, "dropped malformed line");
            }
            PollOutcome::Diagnostic { line } => {
                println!("{} {}", "Device:".bright_blue(), line);
            }
        }
    }

    fn print_banner(&self) {
        println!("{}", "=".repeat(50).bright_blue());
        println!("{}", "Serial-to-HTTP Signal Bridge".bright_cyan().bold());
        println!("{}", "=".repeat(50).bright_blue());
        println!(
            "{}: {}",
            "Serial Port".bright_yellow(),
            self.config.port.bright_white()
        );
        println!("{}: {}", "Baud Rate".bright_yellow(), self.config.baud_rate);
        println!(
            "{}: {}",
            "Server URL".bright_yellow(),
            self.config.url.bright_white()
        );
        println!("{}", "=".repeat(50).bright_blue());
        println!("Listening for data...\n");
    }

    fn print_footer(&self) {
        println!("\n{}", "=".repeat(50).bright_blue());
        println!("{}", "Bridge stopped.".bright_cyan());
        println!("Lines read:       {}", self.stats.lines_read);
        println!("Events delivered: {}", self.stats.events_delivered);
        println!("Events failed:    {}", self.stats.events_failed);
        println!("Diagnostics:      {}", self.stats.diagnostics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    use crate::serial::ScriptedLineSource;

    /// Replays canned replies and records every event it was asked to send.
    struct StubForwarder {
        replies: RefCell<VecDeque<Result<Value, BridgeError>>>,
        seen: RefCell<Vec<Value>>,
    }

    impl StubForwarder {
        fn replying(replies: Vec<Result<Value, BridgeError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                seen: RefCell::new(Vec::new()),
            }
        }

        fn always_ok() -> Self {
            Self {
                replies: RefCell::new(VecDeque::new()),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl Forwarder for StubForwarder {
        async fn forward(&self, event: &Value) -> Result<Value, BridgeError> {
            self.seen.borrow_mut().push(event.clone());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or(Ok(json!({"status": "ok"})))
        }
    }

    fn make_bridge(
        lines: Vec<&str>,
        forwarder: StubForwarder,
    ) -> Bridge<ScriptedLineSource, StubForwarder> {
        Bridge::new(
            ScriptedLineSource::new(lines),
            forwarder,
            BridgeConfig::new("/dev/ttyTEST", 115_200, "http://127.0.0.1:5000/api/door-alert"),
        )
    }

    // -- classify_line ------------------------------------------------------

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("\r\n")]
    #[case("\t \n")]
    fn classify_whitespace_only_is_empty(#[case] raw: &str) {
        assert_eq!(classify_line(raw), LineClass::Empty);
    }

    #[rstest]
    #[case("DEBUG: sensor ready")]
    #[case("booting...")]
    #[case("[12:00:01] heartbeat")]
    #[case("100% not json")]
    fn classify_non_brace_lines_are_diagnostic(#[case] raw: &str) {
        assert_eq!(
            classify_line(raw),
            LineClass::Diagnostic(raw.trim().to_string())
        );
    }

    #[test]
    fn classify_valid_json_object_is_event() {
        let class = classify_line(r#"{"event":"door_open","ts":123}"#);
        assert_eq!(
            class,
            LineClass::Event(json!({"event": "door_open", "ts": 123}))
        );
    }

    #[test]
    fn classify_trims_surrounding_whitespace_before_parsing() {
        let class = classify_line("  {\"a\":1}\r\n");
        assert_eq!(class, LineClass::Event(json!({"a": 1})));
    }

    #[test]
    fn classify_bad_json_is_malformed_with_detail() {
        match classify_line("{bad json") {
            LineClass::Malformed { line, detail } => {
                assert_eq!(line, "{bad json");
                assert!(!detail.is_empty());
            }
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    // -- BridgeConfig -------------------------------------------------------

    #[test]
    fn config_defaults() {
        let cfg = BridgeConfig::new("COM3", 115_200, "http://localhost:5000/api/door-alert");
        assert_eq!(cfg.read_timeout, Duration::from_secs(1));
        assert_eq!(cfg.idle_delay, Duration::from_millis(100));
        assert_eq!(cfg.connect_timeout, Duration::from_secs(3));
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.error_backoff, Duration::from_secs(1));
    }

    #[test]
    fn config_strips_trailing_slash_from_url() {
        let cfg = BridgeConfig::new("COM3", 9600, "http://localhost:5000/");
        assert_eq!(cfg.url, "http://localhost:5000");
    }

    // -- poll_once ----------------------------------------------------------

    #[tokio::test]
    async fn idle_when_no_input_available() {
        let mut bridge = make_bridge(vec![], StubForwarder::always_ok());
        assert_eq!(bridge.poll_once().await.unwrap(), PollOutcome::Idle);
        assert_eq!(bridge.stats().lines_read, 0);
    }

    #[tokio::test]
    async fn empty_line_is_discarded_without_side_effects() {
        let mut bridge = make_bridge(vec!["   \r\n"], StubForwarder::always_ok());
        assert_eq!(bridge.poll_once().await.unwrap(), PollOutcome::Empty);
        assert!(bridge.forwarder.seen.borrow().is_empty());
        assert_eq!(bridge.stats().lines_read, 0);
    }

    #[tokio::test]
    async fn valid_event_is_forwarded_byte_equivalent() {
        let mut bridge = make_bridge(
            vec!["{\"event\":\"door_open\",\"ts\":123}\n"],
            StubForwarder::replying(vec![Ok(json!({"status": "ok"}))]),
        );
        let outcome = bridge.poll_once().await.unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Delivered {
                event: json!({"event": "door_open", "ts": 123}),
                response: json!({"status": "ok"}),
            }
        );
        let seen = bridge.forwarder.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(
            serde_json::to_string(&seen[0]).unwrap(),
            serde_json::to_string(&json!({"event": "door_open", "ts": 123})).unwrap()
        );
    }

    #[tokio::test]
    async fn diagnostic_line_is_never_forwarded() {
        let mut bridge = make_bridge(vec!["DEBUG: sensor ready\n"], StubForwarder::always_ok());
        assert_eq!(
            bridge.poll_once().await.unwrap(),
            PollOutcome::Diagnostic {
                line: "DEBUG: sensor ready".to_string()
            }
        );
        assert!(bridge.forwarder.seen.borrow().is_empty());
        assert_eq!(bridge.stats().diagnostics, 1);
    }

    #[tokio::test]
    async fn malformed_json_is_dropped_without_forwarding() {
        let mut bridge = make_bridge(vec!["{bad json\n"], StubForwarder::always_ok());
        match bridge.poll_once().await.unwrap() {
            PollOutcome::Malformed { line, .. } => assert_eq!(line, "{bad json"),
            other => panic!("expected Malformed, got {other:?}"),
        }
        assert!(bridge.forwarder.seen.borrow().is_empty());
        assert_eq!(bridge.stats().events_failed, 1);
    }

    #[tokio::test]
    async fn non_200_status_is_rejected_not_fatal() {
        let mut bridge = make_bridge(
            vec!["{\"a\":1}\n", "{\"b\":2}\n"],
            StubForwarder::replying(vec![
                Err(BridgeError::Http {
                    status: 500,
                    url: "http://x".to_string(),
                    body: "boom".to_string(),
                }),
                Ok(json!({"status": "ok"})),
            ]),
        );
        assert_eq!(
            bridge.poll_once().await.unwrap(),
            PollOutcome::Rejected {
                event: json!({"a": 1}),
                status: 500,
                body: "boom".to_string(),
            }
        );
        // Loop continues: the next event still goes out.
        assert_eq!(
            bridge.poll_once().await.unwrap(),
            PollOutcome::Delivered {
                event: json!({"b": 2}),
                response: json!({"status": "ok"}),
            }
        );
        assert_eq!(bridge.stats().events_failed, 1);
        assert_eq!(bridge.stats().events_delivered, 1);
    }

    #[tokio::test]
    async fn transport_failure_drops_event_after_one_attempt() {
        let mut bridge = make_bridge(
            vec!["{\"a\":1}\n"],
            StubForwarder::replying(vec![Err(BridgeError::Request {
                url: "http://127.0.0.1:1".to_string(),
                detail: "connection refused".to_string(),
            })]),
        );
        match bridge.poll_once().await.unwrap() {
            PollOutcome::Unreachable { event, detail } => {
                assert_eq!(event, json!({"a": 1}));
                assert!(detail.contains("connection refused"));
            }
            other => panic!("expected Unreachable, got {other:?}"),
        }
        // One attempt, no retry.
        assert_eq!(bridge.forwarder.seen.borrow().len(), 1);
        assert_eq!(bridge.poll_once().await.unwrap(), PollOutcome::Idle);
        assert_eq!(bridge.forwarder.seen.borrow().len(), 1);
    }

    // -- run / shutdown -----------------------------------------------------

    #[tokio::test]
    async fn run_exits_immediately_when_shutdown_preset() {
        let mut bridge = make_bridge(vec!["{\"a\":1}\n"], StubForwarder::always_ok());
        bridge.shutdown_handle().store(true, Ordering::SeqCst);
        bridge.run().await;
        // No iteration ran: the scripted line was never consumed.
        assert!(bridge.forwarder.seen.borrow().is_empty());
        assert_eq!(bridge.stats().lines_read, 0);
    }

    #[tokio::test]
    async fn run_drains_script_then_stops_on_shutdown() {
        let mut bridge = make_bridge(
            vec!["{\"a\":1}\n", "DEBUG ok\n", "{bad\n"],
            StubForwarder::always_ok(),
        );
        bridge.config.idle_delay = Duration::from_millis(1);
        let shutdown = bridge.shutdown_handle();
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.store(true, Ordering::SeqCst);
        });
        bridge.run().await;
        stopper.await.unwrap();
        assert_eq!(bridge.stats().lines_read, 3);
        assert_eq!(bridge.stats().events_delivered, 1);
        assert_eq!(bridge.stats().events_failed, 1);
        assert_eq!(bridge.stats().diagnostics, 1);
    }

    // -- SessionStats -------------------------------------------------------

    #[test]
    fn session_stats_serialize_shape() {
        let stats = SessionStats {
            lines_read: 4,
            events_delivered: 2,
            events_failed: 1,
            diagnostics: 1,
        };
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("\"lines_read\":4"), "json: {json}");
        assert!(json.contains("\"events_delivered\":2"), "json: {json}");
    }
}
