//! Operator-facing sync log.
//!
//! All coordinators and executors share one sink: either the console or a
//! single append-only file handle opened at startup. Writes are
//! line-oriented. Colors are a console-only readability aid; log files
//! receive plain text.

use chrono::Local;
use colored::{Color, Colorize};
use std::io;
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Rotating per-directory palette. Index modulo length; carries no semantic
/// weight.
pub const COLOR_PALETTE: [Color; 8] = [
    Color::TrueColor {
        r: 255,
        g: 170,
        b: 170,
    },
    Color::Blue,
    Color::Magenta,
    Color::Cyan,
    Color::BrightGreen,
    Color::BrightBlue,
    Color::BrightMagenta,
    Color::BrightCyan,
];

/// Color assigned to a watched directory by its index.
pub fn palette_color(index: usize) -> Color {
    COLOR_PALETTE[index % COLOR_PALETTE.len()]
}

/// Timestamp prefix for sync log lines, e.g. `Thu Aug 07 2025 14:03:22`.
pub fn timestamp() -> String {
    Local::now().format("%a %b %d %Y %H:%M:%S").to_string()
}

enum Sink {
    Console,
    File(Mutex<File>),
}

/// Shared, line-oriented log sink.
pub struct LogSink {
    sink: Sink,
}

impl LogSink {
    /// Console-backed sink.
    pub fn console() -> Self {
        Self {
            sink: Sink::Console,
        }
    }

    /// Open the sink: an appended log file when a path is configured, the
    /// console otherwise. Failing to open the file (permissions, missing
    /// parent directory) is a fatal startup error for the caller.
    pub async fn open(path: Option<&Path>) -> io::Result<Self> {
        match path {
            None => Ok(Self::console()),
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .await?;
                Ok(Self {
                    sink: Sink::File(Mutex::new(file)),
                })
            }
        }
    }

    /// Whether output goes to a file rather than the console.
    pub fn is_file(&self) -> bool {
        matches!(self.sink, Sink::File(_))
    }

    /// Write one line with an optional console color.
    pub async fn line(&self, content: &str, color: Option<Color>) {
        match &self.sink {
            Sink::Console => match color {
                Some(color) => println!("{}", content.color(color)),
                None => println!("{content}"),
            },
            Sink::File(file) => {
                let mut file = file.lock().await;
                let _ = file.write_all(content.as_bytes()).await;
                let _ = file.write_all(b"\n").await;
                let _ = file.flush().await;
            }
        }
    }

    /// Write a warning-level line (yellow on console).
    pub async fn warning(&self, content: &str) {
        self.line(content, Some(Color::Yellow)).await;
    }

    /// Write an error-level line (red on console).
    pub async fn error(&self, content: &str) {
        self.line(content, Some(Color::Red)).await;
    }

    /// Flush buffered output. Called from the termination path before exit.
    pub async fn flush(&self) {
        if let Sink::File(file) = &self.sink {
            let mut file = file.lock().await;
            let _ = file.sync_all().await;
        }
    }
}
