//! ⚖️ decision.rs — the bouncer at the door of the bulk buffer.
//!
//! 🎬 *[a request walks up. 3 MB. the bouncer glances at the line inside.]*
//! *["You can wait in here," it says. "Unless the room's full. Then you go alone."]*
//!
//! Pure policy, zero I/O. Given how many bytes are already buffered and how
//! many bytes just showed up, decide what happens next. The interceptor does
//! the actual work; this module only has opinions. Strong ones. Strictly
//! greater-than ones. 🦆

use serde::Deserialize;

// 📏 ~5.7 MB — once the buffer grows past this, it ships.
const DEFAULT_MIN_FLUSH_SIZE: u64 = 5_728_000;
// 📏 ~8.7 MB — the room capacity. Fire marshal approved.
const DEFAULT_MAX_BUFFER_SIZE: u64 = 8_728_000;
// 📏 ~9.7 MB — the biggest single request the cluster will swallow.
const DEFAULT_HARD_CEILING_SIZE: u64 = 9_728_000;

/// 🎯 What to do with one incoming request. Produced, consumed, forgotten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// 🐘 The item alone is over the hard ceiling. Send it by itself, write its name down.
    PassThrough,
    /// 💤 Append it, answer with a mock, keep waiting for friends.
    BufferOnly,
    /// 🚀 Append it, then ship the whole buffer as one real request.
    BufferAndFlush,
    /// 🚪 Appending would overflow the buffer. Index this one individually.
    RejectOversized,
}

/// 📐 The three size knobs. Deserialized straight from the `[batching]` table.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    /// 🚀 Flush threshold (strict `>`).
    #[serde(default = "default_min_flush_size")]
    pub min_flush_size: u64,
    /// 🧱 Hard cap on buffered content (strict `>`).
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: u64,
    /// 🐘 Absolute per-request ceiling for the individual path.
    #[serde(default = "default_hard_ceiling_size")]
    pub hard_ceiling_size: u64,
}

fn default_min_flush_size() -> u64 {
    DEFAULT_MIN_FLUSH_SIZE
}

fn default_max_buffer_size() -> u64 {
    DEFAULT_MAX_BUFFER_SIZE
}

fn default_hard_ceiling_size() -> u64 {
    DEFAULT_HARD_CEILING_SIZE
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            min_flush_size: DEFAULT_MIN_FLUSH_SIZE,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            hard_ceiling_size: DEFAULT_HARD_CEILING_SIZE,
        }
    }
}

impl BatchLimits {
    /// ⚖️ The whole policy, in four branches.
    ///
    /// - `incoming > hard_ceiling_size` → [`Decision::PassThrough`]
    /// - `existing + incoming > max_buffer_size` → [`Decision::RejectOversized`]
    /// - `existing + incoming > min_flush_size` → [`Decision::BufferAndFlush`]
    /// - otherwise → [`Decision::BufferOnly`]
    ///
    /// Sizes are UTF-8 byte counts. Saturating add, because `u64::MAX` bytes of
    /// NDJSON is a different kind of incident.
    pub fn decide(&self, existing_buffer_size: u64, incoming_body_size: u64) -> Decision {
        if incoming_body_size > self.hard_ceiling_size {
            return Decision::PassThrough;
        }
        let the_combined_size = existing_buffer_size.saturating_add(incoming_body_size);
        if the_combined_size > self.max_buffer_size {
            Decision::RejectOversized
        } else if the_combined_size > self.min_flush_size {
            Decision::BufferAndFlush
        } else {
            Decision::BufferOnly
        }
    }

    /// 🔒 Sanity check for configs written at 3am.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_flush_size >= self.max_buffer_size {
            anyhow::bail!(
                "💀 batching.min_flush_size ({}) must be smaller than batching.max_buffer_size ({}). \
                 Otherwise the buffer fills up before it ever wants to flush, and nothing ever ships.",
                self.min_flush_size,
                self.max_buffer_size
            );
        }
        Ok(())
    }
}
