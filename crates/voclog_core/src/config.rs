//! WAL configuration.

use crate::error::{CoreError, CoreResult};
use crate::marker::MAX_MARKER_SIZE;
use std::path::PathBuf;
use std::time::Duration;
use voclog_storage::round_to_page;

/// Smallest accepted logfile size.
pub const MIN_LOGFILE_SIZE: usize = 1024 * 1024;

/// Smallest accepted number of slots.
pub const MIN_SLOTS: usize = 16;

/// Largest accepted logfile size. Header markers store it as a `u32`.
pub const MAX_LOGFILE_SIZE: usize = 2 * 1024 * 1024 * 1024 - 1;

/// Largest marker the WAL accepts, regardless of other settings.
pub const MAX_ENTRY_SIZE: usize = MAX_MARKER_SIZE as usize - 1;

/// Configuration for opening a write-ahead log directory.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding the logfiles, LOCK and SHUTDOWN files.
    pub directory: PathBuf,

    /// Size of a regular logfile, rounded up to the page size.
    pub logfile_size: usize,

    /// Number of slots in the allocator ring.
    pub number_of_slots: usize,

    /// Number of empty logfiles the allocator keeps ready.
    pub reserve_logfiles: usize,

    /// Number of collected logfiles kept around before removal.
    pub historic_logfiles: usize,

    /// Maximum number of logfiles open at once (0 = unlimited).
    pub max_open_logfiles: usize,

    /// How often the synchronizer runs when nobody signals it.
    pub sync_interval: Duration,

    /// How long a writer waits for its tick to become durable.
    pub sync_timeout: Duration,

    /// How long a writer waits for a free slot or a writable logfile.
    pub allocation_timeout: Duration,

    /// Whether entries larger than `logfile_size` get a dedicated logfile.
    pub allow_oversize_entries: bool,

    /// Whether unreadable logfiles are skipped at startup.
    pub ignore_logfile_errors: bool,

    /// Whether corrupted logfiles are repaired instead of failing startup.
    pub ignore_recovery_errors: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("journals"),
            logfile_size: 32 * 1024 * 1024, // 32 MB
            number_of_slots: 8192,
            reserve_logfiles: 3,
            historic_logfiles: 10,
            max_open_logfiles: 0,
            sync_interval: Duration::from_millis(100),
            sync_timeout: Duration::from_secs(30),
            allocation_timeout: Duration::from_secs(30),
            allow_oversize_entries: true,
            ignore_logfile_errors: false,
            ignore_recovery_errors: false,
        }
    }
}

impl WalConfig {
    /// Creates a configuration for `directory` with default values.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Sets the logfile directory.
    #[must_use]
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Sets the regular logfile size.
    #[must_use]
    pub const fn logfile_size(mut self, size: usize) -> Self {
        self.logfile_size = size;
        self
    }

    /// Sets the number of slots.
    #[must_use]
    pub const fn number_of_slots(mut self, slots: usize) -> Self {
        self.number_of_slots = slots;
        self
    }

    /// Sets the number of reserve logfiles.
    #[must_use]
    pub const fn reserve_logfiles(mut self, count: usize) -> Self {
        self.reserve_logfiles = count;
        self
    }

    /// Sets the number of historic logfiles.
    #[must_use]
    pub const fn historic_logfiles(mut self, count: usize) -> Self {
        self.historic_logfiles = count;
        self
    }

    /// Sets the maximum number of open logfiles.
    #[must_use]
    pub const fn max_open_logfiles(mut self, count: usize) -> Self {
        self.max_open_logfiles = count;
        self
    }

    /// Sets the synchronizer interval.
    #[must_use]
    pub const fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the sync wait timeout.
    #[must_use]
    pub const fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Sets the allocation timeout.
    #[must_use]
    pub const fn allocation_timeout(mut self, timeout: Duration) -> Self {
        self.allocation_timeout = timeout;
        self
    }

    /// Sets whether oversize entries are accepted.
    #[must_use]
    pub const fn allow_oversize_entries(mut self, value: bool) -> Self {
        self.allow_oversize_entries = value;
        self
    }

    /// Sets whether unreadable logfiles are skipped at startup.
    #[must_use]
    pub const fn ignore_logfile_errors(mut self, value: bool) -> Self {
        self.ignore_logfile_errors = value;
        self
    }

    /// Sets whether corrupted logfiles are repaired at startup.
    #[must_use]
    pub const fn ignore_recovery_errors(mut self, value: bool) -> Self {
        self.ignore_recovery_errors = value;
        self
    }

    /// Returns the logfile size rounded up to the page size.
    #[must_use]
    pub fn effective_logfile_size(&self) -> usize {
        round_to_page(self.logfile_size).unwrap_or(self.logfile_size)
    }

    /// Checks the configuration for values the WAL cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> CoreResult<()> {
        if self.logfile_size < MIN_LOGFILE_SIZE {
            return Err(CoreError::invalid_config(format!(
                "logfile size {} is below the minimum of {MIN_LOGFILE_SIZE}",
                self.logfile_size
            )));
        }
        if self.logfile_size > MAX_LOGFILE_SIZE {
            return Err(CoreError::invalid_config(format!(
                "logfile size {} exceeds the maximum of {MAX_LOGFILE_SIZE}",
                self.logfile_size
            )));
        }
        if self.number_of_slots < MIN_SLOTS {
            return Err(CoreError::invalid_config(format!(
                "number of slots {} is below the minimum of {MIN_SLOTS}",
                self.number_of_slots
            )));
        }
        if self.reserve_logfiles == 0 {
            return Err(CoreError::invalid_config("at least one reserve logfile is required"));
        }
        if self.sync_interval.is_zero() {
            return Err(CoreError::invalid_config("sync interval must be positive"));
        }
        if self.max_open_logfiles != 0 && self.max_open_logfiles < 2 {
            return Err(CoreError::invalid_config(
                "max open logfiles must be 0 (unlimited) or at least 2",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = WalConfig::default();
        assert_eq!(config.logfile_size, 32 * 1024 * 1024);
        assert_eq!(config.number_of_slots, 8192);
        assert_eq!(config.reserve_logfiles, 3);
        assert!(config.allow_oversize_entries);
        assert!(!config.ignore_recovery_errors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = WalConfig::new("/tmp/wal")
            .logfile_size(2 * MIN_LOGFILE_SIZE)
            .number_of_slots(64)
            .sync_interval(Duration::from_millis(5))
            .allow_oversize_entries(false);

        assert_eq!(config.directory, PathBuf::from("/tmp/wal"));
        assert_eq!(config.logfile_size, 2 * MIN_LOGFILE_SIZE);
        assert_eq!(config.number_of_slots, 64);
        assert!(!config.allow_oversize_entries);
    }

    #[test]
    fn validate_rejects_small_values() {
        let config = WalConfig::default().logfile_size(4096);
        assert!(matches!(
            config.validate(),
            Err(CoreError::InvalidConfig { .. })
        ));

        let config = WalConfig::default().number_of_slots(4);
        assert!(config.validate().is_err());

        let config = WalConfig::default().reserve_logfiles(0);
        assert!(config.validate().is_err());

        let config = WalConfig::default().sync_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn logfile_size_is_page_rounded() {
        let config = WalConfig::default().logfile_size(MIN_LOGFILE_SIZE + 1);
        let size = config.effective_logfile_size();
        assert!(size > MIN_LOGFILE_SIZE);
        assert_eq!(size % voclog_storage::page_size(), 0);
    }
}
