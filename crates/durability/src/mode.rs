//! Durability mode configuration
//!
//! Controls whether transactions keep a durable undo journal (Cache, Always).

/// Durability mode for transaction undo logs
///
/// # Modes
///
/// | Mode | Journal | msync at commit | Crash recovery |
/// |------|---------|-----------------|----------------|
/// | Cache | None | No | No |
/// | Always | fsync per record | Yes | Yes |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// Undo log kept in memory only
    ///
    /// Abort still rolls back, but nothing is flushed. Anonymous
    /// (ephemeral) pools always run in this mode.
    /// Use case: tests, scratch pools.
    Cache,

    /// Every undo record is fsynced before the guarded mutation proceeds,
    /// and dirty ranges are flushed at commit (the default)
    #[default]
    Always,
}

impl DurabilityMode {
    /// Check if this mode writes lane journals
    pub fn requires_journal(&self) -> bool {
        matches!(self, DurabilityMode::Always)
    }

    /// Parse the config-file spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(DurabilityMode::Always),
            "cache" => Some(DurabilityMode::Cache),
            _ => None,
        }
    }

    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            DurabilityMode::Cache => "Cache (volatile undo log, no crash recovery)",
            DurabilityMode::Always => "Always (journaled undo log, crash safe)",
        }
    }
}
