// AI
//! 📊 progress.rs — "Are we there yet?" — every replay, every time, forever.
//!
//! 🚀 A progress bar for the replay, plus a small table of where each request
//! ended up: mocked, flushed, forwarded, or failed to send. Watching it will not make it go
//! faster. We've tried. 🦆

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

// -- 📏 one mebibyte — not a megabyte, pedants.
const MIB: u64 = 1024 * 1024;

/// 📦 Bytes, scaled to the size of the whole file so units stay put.
fn format_bytes(bytes: u64, file_size: u64) -> String {
    if file_size >= 512 * MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if file_size >= MIB {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if you should probably call your mom.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 🚦 Where one replayed request ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Landing {
    Mocked,
    Flushed,
    Forwarded,
    /// 💀 The send failed. A failed flush is back in the buffer by now.
    Failed,
}

/// 📊 Running totals for a replay, rendered into the bar message.
pub(crate) struct ReplayProgress {
    file_name: String,
    total_size: u64,
    total_bytes: u64,
    mocked: u64,
    flushed: u64,
    forwarded: u64,
    failed: u64,
    progress_bar: ProgressBar,
    start_time: Instant,
}

impl std::fmt::Debug for ReplayProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ReplayProgress")
            .field("file_name", &self.file_name)
            .field("total_size", &self.total_size)
            .field("total_bytes", &self.total_bytes)
            .field("mocked", &self.mocked)
            .field("flushed", &self.flushed)
            .field("forwarded", &self.forwarded)
            .field("failed", &self.failed)
            .finish()
    }
}

impl ReplayProgress {
    pub(crate) fn new(file_name: String, total_size: u64) -> Result<Self> {
        let progress_bar = ProgressBar::new(total_size);
        progress_bar.set_style(
            ProgressStyle::default_bar()
                .template("{msg}\n| [{bar:40.cyan/blue}]")
                .context("💀 the progress bar template was rejected by indicatif")?
                .progress_chars("=>-"),
        );
        Ok(Self {
            file_name,
            total_size,
            total_bytes: 0,
            mocked: 0,
            flushed: 0,
            forwarded: 0,
            failed: 0,
            progress_bar,
            start_time: Instant::now(),
        })
    }

    /// 🔄 One request went through the engine. Count it and redraw.
    pub(crate) fn record(&mut self, bytes: u64, landing: Landing) {
        self.total_bytes += bytes;
        match landing {
            Landing::Mocked => self.mocked += 1,
            Landing::Flushed => self.flushed += 1,
            Landing::Forwarded => self.forwarded += 1,
            Landing::Failed => self.failed += 1,
        }
        self.progress_bar
            .set_message(format!("replay: {}\n{}", self.file_name, self.table()));
        self.progress_bar.set_position(self.total_bytes);
    }

    pub(crate) fn finish(&self) {
        self.progress_bar.finish();
    }

    pub(crate) fn requests(&self) -> u64 {
        self.mocked + self.flushed + self.forwarded + self.failed
    }

    fn table(&self) -> Table {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);

        let bytes_progress = format!(
            "{} / {}",
            format_bytes(self.total_bytes, self.total_size),
            format_bytes(self.total_size, self.total_size)
        );
        table.add_row(vec![
            Cell::new(format!("{} mocked", format_number(self.mocked)))
                .set_alignment(CellAlignment::Right),
            Cell::new(bytes_progress).set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} flushed", format_number(self.flushed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} requests", format_number(self.requests())))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} forwarded", format_number(self.forwarded)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} failed", format_number(self.failed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(""),
        ]);
        table
    }
}
