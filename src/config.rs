//! Configuration options for a hashlog map.

/// What `remove` (or `put` with no value) does when the key has no binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TombstonePolicy {
    /// Append nothing: removing an absent key is a pure no-op.
    #[default]
    SkipIfAbsent,

    /// Always append a tombstone record, even if nothing is bound to the key.
    /// The record is unreachable through the index and only costs log space.
    AppendAlways,
}

/// Configuration options for opening a map.
#[derive(Debug, Clone)]
pub struct Options {
    /// Create the map directory if it doesn't exist.
    /// Default: true
    pub create_if_missing: bool,

    /// fsync the log after every appended record.
    /// `force()` always syncs regardless of this flag.
    /// Default: false
    pub sync_on_write: bool,

    /// Behaviour of removals of keys that have no binding.
    /// Default: TombstonePolicy::SkipIfAbsent
    pub tombstone_policy: TombstonePolicy,

    /// Compaction is recommended once the live fraction of the log drops
    /// below this value.
    /// Default: 0.5
    pub compaction_threshold: f64,

    /// File name of the record log inside a generation directory.
    /// Default: "entries.log"
    pub log_file_name: String,

    /// File name of the index snapshot inside a generation directory.
    /// Default: "index.snapshot"
    pub index_file_name: String,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: false,
            tombstone_policy: TombstonePolicy::SkipIfAbsent,
            compaction_threshold: 0.5,
            log_file_name: "entries.log".to_string(),
            index_file_name: "index.snapshot".to_string(),
        }
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the map directory if it doesn't exist.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether every append is fsync'd.
    pub fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the tombstone policy for removals of unbound keys.
    pub fn tombstone_policy(mut self, policy: TombstonePolicy) -> Self {
        self.tombstone_policy = policy;
        self
    }

    /// Sets the live-fraction threshold below which compaction is recommended.
    pub fn compaction_threshold(mut self, threshold: f64) -> Self {
        self.compaction_threshold = threshold;
        self
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.compaction_threshold > 0.0 && self.compaction_threshold <= 1.0) {
            return Err(crate::Error::invalid_argument(
                "compaction_threshold must be in (0, 1]",
            ));
        }
        if self.log_file_name.is_empty() || self.index_file_name.is_empty() {
            return Err(crate::Error::invalid_argument("file names must not be empty"));
        }
        if self.log_file_name == self.index_file_name {
            return Err(crate::Error::invalid_argument(
                "log and index must live in different files",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert!(opts.create_if_missing);
        assert!(!opts.sync_on_write);
        assert_eq!(opts.tombstone_policy, TombstonePolicy::SkipIfAbsent);
        assert_eq!(opts.compaction_threshold, 0.5);
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .sync_on_write(true)
            .tombstone_policy(TombstonePolicy::AppendAlways)
            .compaction_threshold(0.25);

        assert!(opts.sync_on_write);
        assert_eq!(opts.tombstone_policy, TombstonePolicy::AppendAlways);
        assert_eq!(opts.compaction_threshold, 0.25);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.compaction_threshold = 0.0;
        assert!(opts.validate().is_err());

        opts.compaction_threshold = 1.0;
        assert!(opts.validate().is_ok());

        opts.index_file_name = opts.log_file_name.clone();
        assert!(opts.validate().is_err());
    }
}
