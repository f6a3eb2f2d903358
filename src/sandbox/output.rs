/// Bounded output collection
///
/// Each stream is drained on its own thread so a chatty program can never
/// block on a full pipe. Bytes past the per-stream bound are counted and
/// discarded; the captured text then carries a truncation marker.
use crossbeam_channel::{bounded, Receiver};
use std::fmt;
use std::io::Read;
use std::thread;
use std::time::{Duration, Instant};

/// Output limits configuration
#[derive(Debug, Clone)]
pub struct OutputLimits {
    /// Per-stream stdout limit (bytes)
    pub stdout_limit: usize,
    /// Per-stream stderr limit (bytes)
    pub stderr_limit: usize,
    /// How long to wait for a reader after the process is gone (milliseconds)
    pub collection_timeout_ms: u64,
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputLimits {
            stdout_limit: 64 * 1024,
            stderr_limit: 16 * 1024,
            collection_timeout_ms: 2000,
        }
    }
}

/// Integrity of one captured stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputIntegrity {
    Complete,
    TruncatedByLimit,
    ReadError,
    /// Reader did not finish within the collection timeout
    Abandoned,
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::TruncatedByLimit => write!(f, "truncated_by_limit"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
            OutputIntegrity::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Captured bytes from one stream
#[derive(Debug, Clone)]
pub struct CapturedStream {
    pub data: Vec<u8>,
    /// Bytes read past the limit and dropped
    pub omitted: u64,
    pub integrity: OutputIntegrity,
}

impl CapturedStream {
    fn empty() -> Self {
        CapturedStream {
            data: Vec::new(),
            omitted: 0,
            integrity: OutputIntegrity::Complete,
        }
    }

    pub fn truncated(&self) -> bool {
        self.integrity != OutputIntegrity::Complete
    }

    /// Lossy UTF-8 text with a marker when bytes were dropped.
    pub fn into_text(self) -> (String, bool) {
        let truncated = self.truncated();
        let mut text = String::from_utf8_lossy(&self.data).into_owned();
        match self.integrity {
            OutputIntegrity::TruncatedByLimit => {
                text.push_str(&format!("\n[output truncated: {} bytes omitted]", self.omitted));
            }
            OutputIntegrity::Abandoned => text.push_str("\n[output truncated: stream not closed]"),
            OutputIntegrity::ReadError => text.push_str("\n[output truncated: read error]"),
            OutputIntegrity::Complete => {}
        }
        (text, truncated)
    }
}

/// Output collection result
#[derive(Debug, Clone)]
pub struct OutputResult {
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

/// Output collector with bounded collection
pub struct OutputCollector {
    limits: OutputLimits,
}

/// Readers started for a running process
pub struct PendingOutput {
    stdout: Option<Receiver<CapturedStream>>,
    stderr: Option<Receiver<CapturedStream>>,
    timeout: Duration,
}

impl OutputCollector {
    pub fn new(limits: OutputLimits) -> Self {
        OutputCollector { limits }
    }

    /// Start draining both streams in the background
    pub fn start<O, E>(&self, stdout: Option<O>, stderr: Option<E>) -> PendingOutput
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        PendingOutput {
            stdout: stdout.map(|s| spawn_reader(s, self.limits.stdout_limit)),
            stderr: stderr.map(|s| spawn_reader(s, self.limits.stderr_limit)),
            timeout: Duration::from_millis(self.limits.collection_timeout_ms),
        }
    }
}

impl PendingOutput {
    /// Wait for both readers; call only after the process group is gone.
    pub fn finish(self) -> OutputResult {
        let deadline = Instant::now() + self.timeout;
        OutputResult {
            stdout: wait_reader(self.stdout, deadline),
            stderr: wait_reader(self.stderr, deadline),
        }
    }
}

fn wait_reader(rx: Option<Receiver<CapturedStream>>, deadline: Instant) -> CapturedStream {
    let Some(rx) = rx else {
        return CapturedStream::empty();
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
        Ok(captured) => captured,
        Err(_) => {
            log::warn!("Output reader did not finish in time; abandoning stream");
            CapturedStream {
                data: Vec::new(),
                omitted: 0,
                integrity: OutputIntegrity::Abandoned,
            }
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: R, limit: usize) -> Receiver<CapturedStream> {
    let (tx, rx) = bounded(1);
    thread::spawn(move || {
        let _ = tx.send(collect_stream(stream, limit));
    });
    rx
}

/// Collect from a single stream with limit
fn collect_stream<R: Read>(mut stream: R, limit: usize) -> CapturedStream {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut omitted: u64 = 0;
    let mut integrity = OutputIntegrity::Complete;

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(buffer.len());
                let kept = room.min(n);
                buffer.extend_from_slice(&chunk[..kept]);
                if kept < n {
                    omitted += (n - kept) as u64;
                    integrity = OutputIntegrity::TruncatedByLimit;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => {
                integrity = OutputIntegrity::ReadError;
                break;
            }
        }
    }

    CapturedStream {
        data: buffer,
        omitted,
        integrity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_output_limits_default() {
        let limits = OutputLimits::default();
        assert_eq!(limits.stdout_limit, 64 * 1024);
        assert_eq!(limits.stderr_limit, 16 * 1024);
    }

    #[test]
    fn test_collect_within_limit() {
        let captured = collect_stream(Cursor::new(b"hello".to_vec()), 16);
        assert_eq!(captured.data, b"hello");
        assert_eq!(captured.integrity, OutputIntegrity::Complete);
        let (text, truncated) = captured.into_text();
        assert_eq!(text, "hello");
        assert!(!truncated);
    }

    #[test]
    fn test_collect_truncates_and_counts() {
        let captured = collect_stream(Cursor::new(vec![b'x'; 100]), 10);
        assert_eq!(captured.data.len(), 10);
        assert_eq!(captured.omitted, 90);
        let (text, truncated) = captured.into_text();
        assert!(truncated);
        assert!(text.starts_with("xxxxxxxxxx\n[output truncated: 90 bytes omitted]"));
    }

    #[test]
    fn test_collector_with_no_streams() {
        let collector = OutputCollector::new(OutputLimits::default());
        let pending = collector.start::<Cursor<Vec<u8>>, Cursor<Vec<u8>>>(None, None);
        let result = pending.finish();
        assert!(result.stdout.data.is_empty());
        assert_eq!(result.stderr.integrity, OutputIntegrity::Complete);
    }

    #[test]
    fn test_collector_reads_both_streams() {
        let collector = OutputCollector::new(OutputLimits {
            stdout_limit: 4,
            stderr_limit: 64,
            collection_timeout_ms: 1000,
        });
        let pending = collector.start(
            Some(Cursor::new(b"abcdef".to_vec())),
            Some(Cursor::new(b"warn".to_vec())),
        );
        let result = pending.finish();
        assert_eq!(result.stdout.data, b"abcd");
        assert!(result.stdout.truncated());
        assert_eq!(result.stderr.data, b"warn");
    }

    #[test]
    fn test_integrity_display() {
        assert_eq!(format!("{}", OutputIntegrity::Complete), "complete");
        assert_eq!(
            format!("{}", OutputIntegrity::TruncatedByLimit),
            "truncated_by_limit"
        );
    }
}
