//! Log writer module
//!
//! Resolves a log destination (file or console) into a writer the
//! subscriber layers can share across threads.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Console stream used when no file is configured
#[derive(Debug, Clone, Copy)]
pub enum Console {
    Stdout,
    Stderr,
}

/// Writer for `path`, or for the console stream when unset
pub fn make_writer(path: Option<&str>, console: Console) -> io::Result<BoxMakeWriter> {
    Ok(match (path, console) {
        (Some(path), _) => BoxMakeWriter::new(Mutex::new(open_log_file(path)?)),
        (None, Console::Stdout) => BoxMakeWriter::new(io::stdout),
        (None, Console::Stderr) => BoxMakeWriter::new(io::stderr),
    })
}

/// Open or create a log file for appending
fn open_log_file(path: &str) -> io::Result<File> {
    // Create parent directories if they don't exist
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    OpenOptions::new().create(true).append(true).open(path)
}
