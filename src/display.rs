// src/display.rs
//
// Interactive-side store for received lines.
// The display buffer keeps every accepted line in arrival order; the visible
// view is the subset matching the current view keyword.

use chrono::{DateTime, Local};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::MonitorError;
use crate::filter::matches;

/// Which lines an export writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportScope {
    /// Every line in the display buffer
    All,
    /// Only the lines currently visible
    Visible,
}

impl ExportScope {
    fn file_prefix(self) -> &'static str {
        match self {
            ExportScope::All => "all_",
            ExportScope::Visible => "visible_",
        }
    }
}

/// Default export file name, e.g. `serial_data_all_20260301_084500.txt`.
pub fn default_export_name(scope: ExportScope, now: DateTime<Local>) -> String {
    format!(
        "serial_data_{}{}.txt",
        scope.file_prefix(),
        now.format("%Y%m%d_%H%M%S")
    )
}

/// Owned by the interactive context; never shared with the reader.
#[derive(Debug, Default)]
pub struct DisplaySink {
    buffer: Vec<String>,
    visible: Vec<String>,
    keyword: String,
}

impl DisplaySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line. Returns true if it is visible under the current keyword.
    pub fn accept(&mut self, line: String) -> bool {
        let shown = matches(&line, &self.keyword);
        if shown {
            self.visible.push(line.clone());
        }
        self.buffer.push(line);
        shown
    }

    /// Change the view keyword and rebuild the visible view from the whole buffer.
    /// Returns the number of visible lines.
    pub fn set_keyword(&mut self, keyword: &str) -> usize {
        self.keyword = keyword.trim().to_string();
        self.visible = self
            .buffer
            .iter()
            .filter(|line| matches(line, &self.keyword))
            .cloned()
            .collect();
        self.visible.len()
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Empty the buffer and the visible view together.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.visible.clear();
    }

    pub fn lines(&self) -> &[String] {
        &self.buffer
    }

    pub fn visible(&self) -> &[String] {
        &self.visible
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Write the full buffer to `path`, one `\n`-terminated line per record.
    /// Returns the number of lines written.
    pub fn export_to(&self, path: &Path) -> Result<usize, MonitorError> {
        write_lines(path, &self.buffer)
    }

    /// Write only the visible lines to `path`.
    pub fn export_visible_to(&self, path: &Path) -> Result<usize, MonitorError> {
        write_lines(path, &self.visible)
    }

    pub fn export(&self, scope: ExportScope, path: &Path) -> Result<usize, MonitorError> {
        match scope {
            ExportScope::All => self.export_to(path),
            ExportScope::Visible => self.export_visible_to(path),
        }
    }
}

/// Write to a sibling temp file and rename it over the target, so a failed
/// export never leaves a truncated file at `path`.
fn write_lines(path: &Path, lines: &[String]) -> Result<usize, MonitorError> {
    let export_err = |source: std::io::Error| MonitorError::Export {
        path: path.to_path_buf(),
        source,
    };

    let partial = partial_path(path);
    let result = (|| -> std::io::Result<()> {
        let mut file = std::io::BufWriter::new(fs::File::create(&partial)?);
        for line in lines {
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
        }
        file.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        fs::rename(&partial, path)
    })();

    match result {
        Ok(()) => {
            tlog!("[display] Exported {} lines to {}", lines.len(), path.display());
            Ok(lines.len())
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            tlog!("[display] Export to {} failed: {}", path.display(), e);
            Err(export_err(e))
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "export".into());
    name.push(".partial");
    path.with_file_name(name)
}
