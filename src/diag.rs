//! Append-only diagnostic stream for the ingestion pipeline.
//!
//! The phone normalizer and duplicate detector write one timestamped
//! line per decision so disputed leads can be audited after the fact.
//! Sinks are injected (never ambient globals) and a sink failure must
//! never abort the operation that produced the line.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Utc;

pub trait DiagnosticSink: Send + Sync {
    /// Append one line. Implementations swallow their own errors.
    fn append(&self, line: &str);
}

/// Writes newline-delimited text to one file per calendar day,
/// `leadgate-YYYY-MM-DD.log` under the configured directory.
pub struct DailyFileSink {
    dir: PathBuf,
    file: Mutex<()>,
}

impl DailyFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file: Mutex::new(()),
        }
    }

    fn path_for_today(&self) -> PathBuf {
        let day = chrono::Local::now().date_naive();
        self.dir.join(format!("leadgate-{day}.log"))
    }
}

impl DiagnosticSink for DailyFileSink {
    fn append(&self, line: &str) {
        let _guard = match self.file.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(error = %err, "diagnostic log directory unavailable");
            return;
        }
        let path = self.path_for_today();
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{} {}", Utc::now().to_rfc3339(), line));
        if let Err(err) = result {
            tracing::warn!(path = %path.display(), error = %err, "diagnostic append failed");
        }
    }
}

/// Collects lines in memory; the pipeline tests assert on them.
#[cfg(any(test, feature = "mock"))]
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

#[cfg(any(test, feature = "mock"))]
impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[cfg(any(test, feature = "mock"))]
impl DiagnosticSink for MemorySink {
    fn append(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
