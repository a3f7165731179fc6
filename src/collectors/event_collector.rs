use crate::error::SourceError;
use crate::events::EventRecord;
use log::{debug, error, info, warn};
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc::Sender;

const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// How a stream of event output ended
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    /// The source closed its output
    Eof,
    /// Nobody is listening for events any more
    ChannelClosed,
    /// The collector was asked to stop
    Stopped,
}

/// Event source backed by a subprocess
///
/// Spawns and supervises a command that prints one JSON event record per
/// line (by default a PowerShell watcher over the Windows Application log)
/// and forwards every parsed `EventRecord` to a channel. The subprocess is
/// restarted with exponential backoff if it exits.
pub struct EventCollector {
    /// Program and arguments of the source command
    command: Vec<String>,
    /// Channel to send parsed event records
    output_channel: Sender<EventRecord>,
    /// Handle to the background thread
    thread_handle: Option<JoinHandle<()>>,
    /// Whether the collector should keep running
    running: Arc<AtomicBool>,
    /// Currently running source process, killed on stop
    child: Arc<Mutex<Option<Child>>>,
}

impl EventCollector {
    /// Create a new EventCollector for the given source command
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use event_notifier::collectors::EventCollector;
    ///
    /// let (tx, rx) = tokio::sync::mpsc::channel(64);
    /// let collector = EventCollector::new(
    ///     vec!["my-event-source".to_string(), "--json".to_string()],
    ///     tx,
    /// );
    /// ```
    pub fn new(command: Vec<String>, channel: Sender<EventRecord>) -> Self {
        Self {
            command,
            output_channel: channel,
            thread_handle: None,
            running: Arc::new(AtomicBool::new(false)),
            child: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the collector
    ///
    /// Checks that the source command can be spawned, then supervises it on
    /// a background thread.
    ///
    /// # Errors
    ///
    /// Returns `SourceError::SubprocessSpawn` if the source cannot be started.
    pub fn start(&mut self) -> Result<(), SourceError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(()); // Already running
        }

        // Test that we can spawn the subprocess before starting the thread
        match Self::spawn_source(&self.command) {
            Ok(mut child) => {
                let _ = child.kill();
                let _ = child.wait();
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let command = self.command.clone();
        let channel = self.output_channel.clone();
        let running = Arc::clone(&self.running);
        let child = Arc::clone(&self.child);

        let handle = thread::spawn(move || {
            Self::collector_thread(command, channel, running, child);
        });

        self.thread_handle = Some(handle);
        info!("EventCollector started: {}", self.program());
        Ok(())
    }

    /// Stop the collector
    ///
    /// Terminates the source subprocess and waits for the supervising
    /// thread to finish.
    pub fn stop(&mut self) -> Result<(), SourceError> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(child) = self
            .child
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            let _ = child.kill();
        }

        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| {
                SourceError::SubprocessTerminated("Failed to join collector thread".to_string())
            })?;
        }

        info!("EventCollector stopped");
        Ok(())
    }

    /// Check if the collector is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }

    /// Supervise the source process until stopped
    fn collector_thread(
        command: Vec<String>,
        channel: Sender<EventRecord>,
        running: Arc<AtomicBool>,
        child_slot: Arc<Mutex<Option<Child>>>,
    ) {
        let mut restart_delay = Duration::from_secs(1);
        let max_delay = Duration::from_secs(60);
        let mut consecutive_failures = 0;

        while running.load(Ordering::SeqCst) {
            match Self::spawn_source(&command) {
                Ok(mut child) => {
                    info!("Event source subprocess started");
                    let stdout = child.stdout.take();
                    *child_slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(child);

                    let outcome = match stdout {
                        Some(stdout) => Self::process_stream(stdout, &channel, &running),
                        None => Err(SourceError::ParseError("No stdout available".to_string())),
                    };

                    let finished = child_slot.lock().unwrap_or_else(|e| e.into_inner()).take();
                    if let Some(mut child) = finished {
                        let _ = child.kill();
                        match child.wait() {
                            Ok(status) if running.load(Ordering::SeqCst) => {
                                warn!("Event source subprocess exited with status: {}", status)
                            }
                            Ok(_) => debug!("Event source subprocess terminated"),
                            Err(e) => error!("Failed to reap event source subprocess: {}", e),
                        }
                    }

                    match outcome {
                        Ok(StreamEnd::ChannelClosed) => {
                            info!("Event channel closed, stopping collector");
                            break;
                        }
                        Ok(StreamEnd::Stopped) => break,
                        Ok(StreamEnd::Eof) => consecutive_failures += 1,
                        Err(e) => {
                            error!("Error reading event source: {}", e);
                            consecutive_failures += 1;
                        }
                    }
                }
                Err(e) => {
                    error!("Failed to spawn event source: {}", e);
                    consecutive_failures += 1;
                }
            }

            if !running.load(Ordering::SeqCst) {
                break;
            }

            // Too many consecutive failures: back off to the degraded retry rate
            if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                let degraded_delay = Duration::from_secs(60);
                warn!(
                    "Too many consecutive failures ({}), retrying every {:?}",
                    consecutive_failures, degraded_delay
                );
                Self::sleep_while_running(degraded_delay, &running);

                consecutive_failures = 0;
                restart_delay = Duration::from_secs(1);
                continue;
            }

            warn!(
                "Restarting event source in {:?} (failure #{}/{})",
                restart_delay, consecutive_failures, MAX_CONSECUTIVE_FAILURES
            );
            Self::sleep_while_running(restart_delay, &running);
            restart_delay = std::cmp::min(restart_delay * 2, max_delay);
        }

        running.store(false, Ordering::SeqCst);
        info!("Event collector thread finished");
    }

    /// Sleep in short steps so a stop request is noticed promptly
    fn sleep_while_running(duration: Duration, running: &AtomicBool) {
        let step = Duration::from_millis(500);
        let mut remaining = duration;
        while remaining > Duration::ZERO && running.load(Ordering::SeqCst) {
            let sleep_time = std::cmp::min(remaining, step);
            thread::sleep(sleep_time);
            remaining = remaining.saturating_sub(sleep_time);
        }
    }

    /// Spawn the source subprocess
    fn spawn_source(command: &[String]) -> Result<Child, SourceError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SourceError::SubprocessSpawn("empty source command".to_string()))?;
        debug!("Spawning event source: {}", program);

        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| SourceError::SubprocessSpawn(format!("{}: {}", program, e)))
    }

    /// Read JSON lines from the source and forward parsed records
    ///
    /// Lines are decoded lossily so a console code page mismatch cannot stop
    /// the stream. Malformed lines are logged and skipped.
    fn process_stream<R: Read>(
        output: R,
        channel: &Sender<EventRecord>,
        running: &AtomicBool,
    ) -> Result<StreamEnd, SourceError> {
        let mut reader = BufReader::new(output);
        let mut buffer = Vec::new();

        loop {
            if !running.load(Ordering::SeqCst) {
                debug!("Stopping event processing due to shutdown signal");
                return Ok(StreamEnd::Stopped);
            }

            buffer.clear();
            if reader.read_until(b'\n', &mut buffer)? == 0 {
                debug!("Event source closed its output");
                return Ok(StreamEnd::Eof);
            }

            let line = String::from_utf8_lossy(&buffer);
            if line.trim().is_empty() {
                continue;
            }

            match EventRecord::from_json(&line) {
                Ok(record) => {
                    debug!(
                        "Parsed event record: {} - {} - level {}",
                        record.timestamp, record.provider_name, record.level
                    );

                    if channel.blocking_send(record).is_err() {
                        return Ok(StreamEnd::ChannelClosed);
                    }
                }
                Err(e) => {
                    debug!("Failed to parse event line '{}': {}", line.trim(), e);
                }
            }
        }
    }
}

impl Drop for EventCollector {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::sync::mpsc;

    const VALID_LINE: &str = r#"{"timestamp":"2024-12-09T10:30:45Z","id":1000,"logName":"Application","level":2,"providerName":"Application Error","taskName":"","opCode":"Info","machineName":"HOST01"}"#;

    #[test]
    fn test_event_collector_creation() {
        let (tx, _rx) = mpsc::channel(8);
        let collector = EventCollector::new(vec!["source".to_string()], tx);
        assert!(!collector.is_running());
        assert_eq!(collector.program(), "source");
    }

    #[test]
    fn test_process_stream_forwards_records() {
        let (tx, mut rx) = mpsc::channel(8);
        let running = AtomicBool::new(true);
        let input = format!("{}\n{}\n", VALID_LINE, VALID_LINE);

        let end = EventCollector::process_stream(Cursor::new(input), &tx, &running).unwrap();

        assert_eq!(end, StreamEnd::Eof);
        let record = rx.try_recv().unwrap();
        assert_eq!(record.provider_name, "Application Error");
        assert_eq!(record.level, 2);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_process_stream_skips_malformed_and_empty_lines() {
        let (tx, mut rx) = mpsc::channel(8);
        let running = AtomicBool::new(true);
        let input = format!("invalid json data\n\n   \n{{\"level\": 2}}\n{}", VALID_LINE);

        let end = EventCollector::process_stream(Cursor::new(input), &tx, &running).unwrap();

        assert_eq!(end, StreamEnd::Eof);
        assert_eq!(rx.try_recv().unwrap().id, 1000);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_process_stream_tolerates_invalid_utf8() {
        let (tx, mut rx) = mpsc::channel(8);
        let running = AtomicBool::new(true);
        let mut input = vec![0xff, 0xfe, b'\n'];
        input.extend_from_slice(VALID_LINE.as_bytes());

        EventCollector::process_stream(Cursor::new(input), &tx, &running).unwrap();

        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_process_stream_stops_when_channel_closed() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let running = AtomicBool::new(true);

        let end =
            EventCollector::process_stream(Cursor::new(VALID_LINE), &tx, &running).unwrap();

        assert_eq!(end, StreamEnd::ChannelClosed);
    }

    #[test]
    fn test_process_stream_honours_stop_flag() {
        let (tx, mut rx) = mpsc::channel(8);
        let running = AtomicBool::new(false);

        let end =
            EventCollector::process_stream(Cursor::new(VALID_LINE), &tx, &running).unwrap();

        assert_eq!(end, StreamEnd::Stopped);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_fails_for_missing_program() {
        let (tx, _rx) = mpsc::channel(8);
        let mut collector =
            EventCollector::new(vec!["definitely-not-an-event-source".to_string()], tx);

        let result = collector.start();

        assert!(matches!(result, Err(SourceError::SubprocessSpawn(_))));
        assert!(!collector.is_running());
    }

    #[test]
    fn test_spawn_rejects_empty_command() {
        let result = EventCollector::spawn_source(&[]);
        assert!(matches!(result, Err(SourceError::SubprocessSpawn(_))));
    }

    #[test]
    #[cfg(unix)]
    fn test_collector_delivers_and_stops() {
        let (tx, mut rx) = mpsc::channel(8);
        let script = format!("echo '{}'; exec sleep 30", VALID_LINE);
        let mut collector =
            EventCollector::new(vec!["sh".to_string(), "-c".to_string(), script], tx);

        collector.start().unwrap();
        assert!(collector.is_running());

        let record = rx.blocking_recv().unwrap();
        assert_eq!(record.machine_name, "HOST01");

        collector.stop().unwrap();
        assert!(!collector.is_running());
    }
}

// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;
    use std::io::Cursor;
    use tokio::sync::mpsc;

    const VALID_LINE: &str = r#"{"timestamp":"2024-12-09T11:00:00Z","id":1,"logName":"Application","level":2,"providerName":"Test"}"#;

    /// Lines a misbehaving event source might print
    #[derive(Debug, Clone)]
    struct MalformedLine(String);

    impl Arbitrary for MalformedLine {
        fn arbitrary(g: &mut Gen) -> Self {
            let variants: Vec<String> = vec![
                "{\"timestamp\": \"2024-12-09T10:30:45Z\"".to_string(),
                "{\"level\": 2, \"providerName\":".to_string(),
                "not json at all".to_string(),
                "{ invalid: json }".to_string(),
                "{\"timestamp\": \"yesterday\", \"id\": 1, \"logName\": \"A\", \"level\": 2, \"providerName\": \"x\"}".to_string(),
                "{\"timestamp\": \"2024-12-09T10:30:45Z\", \"id\": -1, \"logName\": \"A\", \"level\": 2, \"providerName\": \"x\"}".to_string(),
                "{\"timestamp\": \"2024-12-09T10:30:45Z\", \"id\": 1, \"logName\": \"A\", \"level\": 900, \"providerName\": \"x\"}".to_string(),
                "[]".to_string(),
                "null".to_string(),
                String::arbitrary(g).replace('\n', " "),
            ];
            MalformedLine(g.choose(&variants).unwrap().clone())
        }
    }

    #[quickcheck]
    fn prop_stream_survives_malformed_lines(lines: Vec<MalformedLine>) -> bool {
        let truly_malformed: Vec<&str> = lines
            .iter()
            .map(|l| l.0.as_str())
            .filter(|l| EventRecord::from_json(l).is_err())
            .collect();

        let mut input = truly_malformed.join("\n");
        input.push('\n');
        input.push_str(VALID_LINE);

        let (tx, mut rx) = mpsc::channel(truly_malformed.len() + 1);
        let running = AtomicBool::new(true);
        let result = EventCollector::process_stream(Cursor::new(input), &tx, &running);

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        result.is_ok() && received == 1
    }
}

