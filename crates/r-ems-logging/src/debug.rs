//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-bus debug trace sinks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Debug sinks receive free-form, labelled trace lines from a bus.
//!
//! Each line is prefixed with the seconds elapsed since the sink was created
//! and an optional label, e.g. `[12.034\tsend] : /node/voltage=1+0j`. Sinks
//! are shared between a bus and its control channel through
//! [`SharedDebugSink`].

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

/// Default file name used by [`FileDebugSink`].
pub const DEFAULT_DEBUG_FILE: &str = "debug.log";

/// Destination for labelled debug trace lines.
pub trait DebugSink: Send {
    /// Prepare the sink for writing.
    fn open(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Record one line.
    fn write(&mut self, message: &str, label: &str);

    /// Flush and release the sink. Calling it twice is harmless.
    fn close(&mut self) {}
}

impl fmt::Debug for dyn DebugSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DebugSink")
    }
}

/// Debug sink shared between cooperating components.
pub type SharedDebugSink = Arc<Mutex<Box<dyn DebugSink>>>;

/// Wrap a sink for sharing.
pub fn shared<S: DebugSink + 'static>(sink: S) -> SharedDebugSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// A shared sink that discards everything.
pub fn noop() -> SharedDebugSink {
    shared(NoopDebugSink)
}

fn prefix(started: Instant, label: &str) -> String {
    let elapsed = started.elapsed().as_secs_f64();
    if label.is_empty() {
        format!("[{elapsed:5.3}] : ")
    } else {
        format!("[{elapsed:5.3}\t{label}] : ")
    }
}

/// Sink that drops every line.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDebugSink;

impl DebugSink for NoopDebugSink {
    fn write(&mut self, _message: &str, _label: &str) {}
}

/// Sink that prints each line to stdout.
#[derive(Debug)]
pub struct ConsoleDebugSink {
    started: Instant,
}

impl ConsoleDebugSink {
    /// Create a console sink whose clock starts now.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for ConsoleDebugSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugSink for ConsoleDebugSink {
    fn write(&mut self, message: &str, label: &str) {
        println!("{}{}", prefix(self.started, label), message);
    }
}

/// Sink that appends each line to a file, optionally echoing to stdout.
///
/// The file is truncated and a banner is written on [`DebugSink::open`].
/// Lines written before `open` are dropped.
#[derive(Debug)]
pub struct FileDebugSink {
    path: PathBuf,
    echo: bool,
    started: Instant,
    writer: Option<BufWriter<File>>,
}

impl FileDebugSink {
    /// Create a file sink. Nothing touches the disk until `open`.
    pub fn new(path: impl Into<PathBuf>, echo: bool) -> Self {
        Self {
            path: path.into(),
            echo,
            started: Instant::now(),
            writer: None,
        }
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `open` has succeeded and `close` has not been called.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }
}

impl DebugSink for FileDebugSink {
    fn open(&mut self) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&self.path)?);
        let rule = "-".repeat(52);
        writeln!(
            writer,
            "{rule}\nDEBUG LOG STARTING AT {}\n{rule}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.6f")
        )?;
        writer.flush()?;
        self.writer = Some(writer);
        Ok(())
    }

    fn write(&mut self, message: &str, label: &str) {
        let line = format!("{}{}", prefix(self.started, label), message);
        if self.echo {
            println!("{line}");
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(err) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            tracing::warn!(path = %self.path.display(), error = %err, "debug sink write failed");
        }
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
    }
}

impl Drop for FileDebugSink {
    fn drop(&mut self) {
        self.close();
    }
}
