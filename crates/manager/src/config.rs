//! Lock manager configuration.

use instantlock_types::LlmqType;
use serde::Deserialize;
use std::time::Duration;

/// Default quorum type used for lock signing sessions.
pub const DEFAULT_LLMQ_TYPE: u8 = 1;

/// Default block-height period between quorum rotations.
pub const DEFAULT_DKG_INTERVAL: u32 = 24;

/// Default chain depth at which an unlocked parent output becomes
/// spendable by a lockable transaction.
pub const DEFAULT_CONFIRMATIONS_REQUIRED: u32 = 6;

/// Default depth at which locks expire when ChainLocks are inactive.
pub const DEFAULT_KEEP_LOCK_BLOCKS: u32 = 24;

/// Default number of blocks an archived lock hash stays recognizable.
pub const DEFAULT_ARCHIVE_RETENTION_BLOCKS: u32 = 100;

/// Default cap on locks drained per verification batch. Bounds duplicate
/// verification work against signatures recovered concurrently by the
/// signing service.
pub const DEFAULT_PENDING_BATCH_LIMIT: usize = 32;

/// Default worker tick interval in milliseconds.
pub const DEFAULT_WORKER_INTERVAL_MS: u64 = 100;

/// Lock manager configuration.
///
/// Consensus-derived parameters; the spork-style dynamic toggles live on
/// [`crate::RuntimeToggles`] and are read fresh on each entry.
#[derive(Debug, Clone, Deserialize)]
pub struct InstantSendConfig {
    /// Quorum type for lock signing sessions. `None` disables signing
    /// entirely (the subsystem still tracks and serves committed locks).
    #[serde(default = "default_llmq_type")]
    pub llmq_type: Option<LlmqType>,

    /// Block-height period between quorum rotations. Also the sign-offset
    /// used to retry verification against the previous quorum set.
    #[serde(default = "default_dkg_interval")]
    pub dkg_interval: u32,

    /// Required depth for unlocked parent outputs.
    #[serde(default = "default_confirmations_required")]
    pub confirmations_required: u32,

    /// Depth at which locks expire when ChainLocks are inactive.
    #[serde(default = "default_keep_lock_blocks")]
    pub keep_lock_blocks: u32,

    /// Blocks an archived lock hash stays recognizable after removal.
    #[serde(default = "default_archive_retention_blocks")]
    pub archive_retention_blocks: u32,

    /// Height from which deterministic lock expiry defers to ChainLocks.
    #[serde(default)]
    pub dip0008_height: u32,

    /// Locks drained per verification batch.
    #[serde(default = "default_pending_batch_limit")]
    pub pending_batch_limit: usize,

    /// Worker tick interval in milliseconds.
    #[serde(default = "default_worker_interval_ms")]
    pub worker_interval_ms: u64,
}

fn default_llmq_type() -> Option<LlmqType> {
    Some(LlmqType(DEFAULT_LLMQ_TYPE))
}

fn default_dkg_interval() -> u32 {
    DEFAULT_DKG_INTERVAL
}

fn default_confirmations_required() -> u32 {
    DEFAULT_CONFIRMATIONS_REQUIRED
}

fn default_keep_lock_blocks() -> u32 {
    DEFAULT_KEEP_LOCK_BLOCKS
}

fn default_archive_retention_blocks() -> u32 {
    DEFAULT_ARCHIVE_RETENTION_BLOCKS
}

fn default_pending_batch_limit() -> usize {
    DEFAULT_PENDING_BATCH_LIMIT
}

fn default_worker_interval_ms() -> u64 {
    DEFAULT_WORKER_INTERVAL_MS
}

impl Default for InstantSendConfig {
    fn default() -> Self {
        Self {
            llmq_type: default_llmq_type(),
            dkg_interval: DEFAULT_DKG_INTERVAL,
            confirmations_required: DEFAULT_CONFIRMATIONS_REQUIRED,
            keep_lock_blocks: DEFAULT_KEEP_LOCK_BLOCKS,
            archive_retention_blocks: DEFAULT_ARCHIVE_RETENTION_BLOCKS,
            dip0008_height: 0,
            pending_batch_limit: DEFAULT_PENDING_BATCH_LIMIT,
            worker_interval_ms: DEFAULT_WORKER_INTERVAL_MS,
        }
    }
}

impl InstantSendConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the quorum type.
    pub fn with_llmq_type(mut self, llmq_type: Option<LlmqType>) -> Self {
        self.llmq_type = llmq_type;
        self
    }

    /// Set the DKG interval.
    pub fn with_dkg_interval(mut self, interval: u32) -> Self {
        self.dkg_interval = interval;
        self
    }

    /// Set the required confirmation depth for unlocked parents.
    pub fn with_confirmations_required(mut self, depth: u32) -> Self {
        self.confirmations_required = depth;
        self
    }

    /// Set the keep-lock depth.
    pub fn with_keep_lock_blocks(mut self, depth: u32) -> Self {
        self.keep_lock_blocks = depth;
        self
    }

    /// The worker tick interval.
    pub fn worker_interval(&self) -> Duration {
        Duration::from_millis(self.worker_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InstantSendConfig::default();
        assert_eq!(config.llmq_type, Some(LlmqType(DEFAULT_LLMQ_TYPE)));
        assert_eq!(config.confirmations_required, 6);
        assert_eq!(config.pending_batch_limit, 32);
        assert_eq!(config.worker_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_builders() {
        let config = InstantSendConfig::new()
            .with_dkg_interval(12)
            .with_confirmations_required(2)
            .with_llmq_type(None);
        assert_eq!(config.dkg_interval, 12);
        assert_eq!(config.confirmations_required, 2);
        assert!(config.llmq_type.is_none());
    }
}
