//! Line reassembly and readiness detection for the worker's stdout.
//!
//! Both pieces are pure so fragmentation and malformed-input behavior can be
//! exercised by feeding byte chunks directly, without a process.

pub const READY_MARKER: &str = "AGENTRELAY READY";

/// Outcome of inspecting one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    NotReady,
    Ready { port: u16 },
    /// The marker was present but the port field was unusable.
    ParseError { reason: String },
}

/// Inspect a single complete line (without its terminator).
pub fn parse_readiness_line(line: &str) -> Readiness {
    let Some(rest) = line.strip_prefix(READY_MARKER) else {
        return Readiness::NotReady;
    };
    // `AGENTRELAY READYX` is not the marker.
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Readiness::NotReady;
    }

    let Some(field) = rest.split_whitespace().last() else {
        return Readiness::ParseError {
            reason: "missing port field".to_string(),
        };
    };

    match field.parse::<u16>() {
        Ok(0) => Readiness::ParseError {
            reason: "port 0 is not a listening port".to_string(),
        },
        Ok(port) => Readiness::Ready { port },
        Err(e) => Readiness::ParseError {
            reason: format!("invalid port {field:?}: {e}"),
        },
    }
}

/// Reassembles byte chunks into complete lines.
///
/// Splits on `\n`, strips a trailing `\r`, and decodes each whole line so a
/// multi-byte character split across reads is never mangled.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            self.partial.extend_from_slice(&rest[..pos]);
            lines.push(decode_line(&std::mem::take(&mut self.partial)));
            rest = &rest[pos + 1..];
        }
        self.partial.extend_from_slice(rest);

        lines
    }

    /// Emit whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(decode_line(&std::mem::take(&mut self.partial)))
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// What the supervisor should publish for one stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Log(String),
    /// First readiness line. The line itself is still a log entry.
    Ready { line: String, port: u16 },
}

/// Latching readiness detector over a stream of lines.
#[derive(Debug)]
pub struct ReadinessDetector {
    fallback_port: u16,
    ready: bool,
}

impl ReadinessDetector {
    pub fn new(fallback_port: u16) -> Self {
        Self {
            fallback_port,
            ready: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn observe(&mut self, line: String) -> LineOutcome {
        if self.ready {
            return LineOutcome::Log(line);
        }

        let port = match parse_readiness_line(&line) {
            Readiness::NotReady => return LineOutcome::Log(line),
            Readiness::Ready { port } => port,
            Readiness::ParseError { reason } => {
                tracing::warn!(
                    target: "agentrelay::runtime",
                    %reason,
                    fallback_port = self.fallback_port,
                    "Readiness line has no usable port"
                );
                self.fallback_port
            }
        };

        self.ready = true;
        LineOutcome::Ready { line, port }
    }
}

/// `LineBuffer` and `ReadinessDetector` combined, as used on the stdout pipe.
#[derive(Debug)]
pub struct StdoutDecoder {
    lines: LineBuffer,
    detector: ReadinessDetector,
}

impl StdoutDecoder {
    pub fn new(fallback_port: u16) -> Self {
        Self {
            lines: LineBuffer::new(),
            detector: ReadinessDetector::new(fallback_port),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<LineOutcome> {
        self.lines
            .push(chunk)
            .into_iter()
            .map(|line| self.detector.observe(line))
            .collect()
    }

    pub fn finish(&mut self) -> Option<LineOutcome> {
        self.lines.finish().map(|line| self.detector.observe(line))
    }
}
