//! The SHUTDOWN state file.
//!
//! A small JSON document with the last tick and the ids of the last
//! collected and sealed logfiles. Numbers are stored as strings so that
//! 64-bit values survive JSON readers limited to doubles.
//!
//! ```json
//! {"tick":"1234","lastCollected":"17","lastSealed":"21","shutdownTime":"1760870400"}
//! ```

use super::dir::WalDir;
use crate::error::CoreResult;
use crate::types::Tick;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Temporary name used for atomic writes.
const SHUTDOWN_TEMP: &str = "SHUTDOWN.tmp";

/// Contents of the SHUTDOWN file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownInfo {
    /// Highest tick handed out.
    #[serde(with = "string_u64")]
    pub tick: Tick,
    /// Id of the last collected logfile.
    #[serde(with = "string_u64")]
    pub last_collected: u64,
    /// Id of the last sealed logfile.
    #[serde(with = "string_u64")]
    pub last_sealed: u64,
    /// Seconds since the epoch, present only for a clean shutdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown_time: Option<String>,
}

impl ShutdownInfo {
    /// Reads the SHUTDOWN file of `dir`.
    ///
    /// Returns `None` if there is none. A `lastSealed` below
    /// `lastCollected` is raised to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(dir: &WalDir) -> CoreResult<Option<Self>> {
        let path = dir.shutdown_path();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let mut info: Self = serde_json::from_str(&data)?;
        if info.last_sealed < info.last_collected {
            info.last_sealed = info.last_collected;
        }
        info!(
            tick = info.tick,
            last_collected = info.last_collected,
            last_sealed = info.last_sealed,
            clean = info.shutdown_time.is_some(),
            "found shutdown info"
        );
        Ok(Some(info))
    }

    /// Writes the SHUTDOWN file atomically: temp file, fsync, rename,
    /// directory fsync.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails.
    pub fn save(&self, dir: &WalDir) -> CoreResult<()> {
        let temp_path = dir.path().join(SHUTDOWN_TEMP);
        let data = serde_json::to_string(self)?;

        let mut file = File::create(&temp_path)?;
        file.write_all(data.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, dir.shutdown_path())?;
        dir.sync()?;
        debug!(tick = self.tick, "wrote shutdown info");
        Ok(())
    }

    /// Current time as stored in `shutdown_time`.
    #[must_use]
    pub fn now() -> String {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
            .to_string()
    }
}

/// Serializes a `u64` as a JSON string; accepts strings or numbers.
mod string_u64 {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s.parse().map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_none() {
        let temp = tempdir().unwrap();
        let dir = WalDir::open(temp.path()).unwrap();
        assert!(ShutdownInfo::load(&dir).unwrap().is_none());
    }

    #[test]
    fn save_and_load() {
        let temp = tempdir().unwrap();
        let dir = WalDir::open(temp.path()).unwrap();
        let info = ShutdownInfo {
            tick: u64::MAX >> 8,
            last_collected: 17,
            last_sealed: 21,
            shutdown_time: Some(ShutdownInfo::now()),
        };
        info.save(&dir).unwrap();
        assert!(!temp.path().join(SHUTDOWN_TEMP).exists());
        assert_eq!(ShutdownInfo::load(&dir).unwrap(), Some(info));
    }

    #[test]
    fn numbers_are_strings_on_disk() {
        let temp = tempdir().unwrap();
        let dir = WalDir::open(temp.path()).unwrap();
        ShutdownInfo {
            tick: 12,
            last_collected: 3,
            last_sealed: 4,
            shutdown_time: None,
        }
        .save(&dir)
        .unwrap();
        let raw = fs::read_to_string(dir.shutdown_path()).unwrap();
        assert_eq!(raw, r#"{"tick":"12","lastCollected":"3","lastSealed":"4"}"#);
    }

    #[test]
    fn last_sealed_is_raised_to_last_collected() {
        let temp = tempdir().unwrap();
        let dir = WalDir::open(temp.path()).unwrap();
        fs::write(
            dir.shutdown_path(),
            r#"{"tick":100,"lastCollected":"9","lastSealed":"2","shutdownTime":"0"}"#,
        )
        .unwrap();
        let info = ShutdownInfo::load(&dir).unwrap().unwrap();
        assert_eq!(info.tick, 100);
        assert_eq!(info.last_sealed, 9);
    }

    #[test]
    fn garbage_fails() {
        let temp = tempdir().unwrap();
        let dir = WalDir::open(temp.path()).unwrap();
        fs::write(dir.shutdown_path(), "not json").unwrap();
        assert!(matches!(
            ShutdownInfo::load(&dir),
            Err(CoreError::StateFile(_))
        ));
    }
}
