//! Approximate beacon-chain slot arithmetic from wall-clock time

/// Unix timestamp of the first proof-of-stake block
pub const DEFAULT_GENESIS_TIMESTAMP: i64 = 1_663_224_179;

/// Beacon slot of the first proof-of-stake block
pub const DEFAULT_GENESIS_SLOT: u64 = 4_700_013;

pub const DEFAULT_SECONDS_PER_SLOT: u64 = 12;

const SECONDS_PER_DAY: u64 = 60 * 60 * 24;

/// Maps wall-clock time to an approximate head slot
///
/// Missed slots are ignored, so the result can run slightly ahead of the
/// real chain. Good enough for a 24h window boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotClock {
    pub genesis_timestamp: i64,
    pub genesis_slot: u64,
    pub seconds_per_slot: u64,
}

impl Default for SlotClock {
    fn default() -> Self {
        Self {
            genesis_timestamp: DEFAULT_GENESIS_TIMESTAMP,
            genesis_slot: DEFAULT_GENESIS_SLOT,
            seconds_per_slot: DEFAULT_SECONDS_PER_SLOT,
        }
    }
}

impl SlotClock {
    pub fn slots_per_day(&self) -> u64 {
        SECONDS_PER_DAY / self.seconds_per_slot.max(1)
    }

    /// Approximate head slot at `unix_ts`, never earlier than genesis
    pub fn head_slot_at(&self, unix_ts: i64) -> u64 {
        let elapsed = unix_ts.saturating_sub(self.genesis_timestamp).max(0) as u64;
        self.genesis_slot + elapsed / self.seconds_per_slot.max(1)
    }

    /// First slot of the 24h window ending at `unix_ts`
    pub fn slot_day_ago_at(&self, unix_ts: i64) -> u64 {
        self.head_slot_at(unix_ts)
            .saturating_sub(self.slots_per_day())
    }
}
