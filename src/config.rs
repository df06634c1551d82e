//! Daemon configuration
//!
//! Loaded from a TOML file and overridden by `PHOBOS_<SECTION>_<key>`
//! environment variables; the override applies after the file is
//! parsed, and never overrides a per-request parameter.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{PhoError, PhoResult};
use crate::model::medium::MediumFamily;

/// Selection policy for which medium to assign within a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocPolicy {
    /// Smallest medium whose free space still covers the request.
    BestFit,
    /// First medium encountered that fits.
    FirstFit,
}

impl FromStr for AllocPolicy {
    type Err = PhoError;

    fn from_str(s: &str) -> PhoResult<Self> {
        match s {
            "best_fit" => Ok(AllocPolicy::BestFit),
            "first_fit" => Ok(AllocPolicy::FirstFit),
            other => Err(PhoError::Invalid(format!("unknown policy {other:?}"))),
        }
    }
}

/// The `[lrs]` section of the daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Prefix used to build a per-drive mount root, e.g. `/mnt/phobos-`.
    #[serde(default = "default_mount_prefix")]
    pub mount_prefix: String,
    /// Drive/medium selection policy.
    #[serde(default = "default_policy")]
    pub policy: AllocPolicy,
    /// Medium families this host schedules over.
    #[serde(default = "default_families")]
    pub families: Vec<MediumFamily>,
    /// Robotic library control device.
    #[serde(default = "default_lib_device")]
    pub lib_device: String,
    /// Unix socket path the daemon listens on.
    #[serde(default = "default_server_socket")]
    pub server_socket: String,
    /// Lock file guarding a single daemon instance per host.
    #[serde(default = "default_lock_file")]
    pub lock_file: String,
    /// Per-family sync time threshold, in milliseconds on disk, exposed
    /// here as a [`Duration`].
    #[serde(default = "default_sync_time_threshold", with = "duration_ms_map")]
    pub sync_time_threshold: HashMap<MediumFamily, Duration>,
    /// Per-family batched-request-count sync threshold.
    #[serde(default = "default_sync_nb_req_threshold")]
    pub sync_nb_req_threshold: HashMap<MediumFamily, u32>,
    /// Per-family batched-byte-count sync threshold, the third of the
    /// three release-batching knobs alongside time and request count.
    #[serde(default = "default_sync_bytes_threshold")]
    pub sync_bytes_threshold: HashMap<MediumFamily, u64>,
    /// Grace period before an unsynced, still-`pending` object's extents
    /// are surfaced by the scrubber as `orphan`.
    #[serde(default = "default_scrub_grace")]
    pub scrub_grace: Duration,
}

fn default_mount_prefix() -> String {
    "/mnt/phobos-".to_string()
}
fn default_policy() -> AllocPolicy {
    AllocPolicy::BestFit
}
fn default_families() -> Vec<MediumFamily> {
    vec![MediumFamily::Tape, MediumFamily::Dir]
}
fn default_lib_device() -> String {
    "/dev/changer".to_string()
}
fn default_server_socket() -> String {
    "/run/phobosd/lrs".to_string()
}
fn default_lock_file() -> String {
    "/run/phobosd/phobosd.lock".to_string()
}
fn default_sync_time_threshold() -> HashMap<MediumFamily, Duration> {
    HashMap::from([
        (MediumFamily::Tape, Duration::from_millis(10_000)),
        (MediumFamily::Dir, Duration::from_millis(10)),
    ])
}
fn default_sync_nb_req_threshold() -> HashMap<MediumFamily, u32> {
    HashMap::from([(MediumFamily::Tape, 5), (MediumFamily::Dir, 5)])
}
fn default_sync_bytes_threshold() -> HashMap<MediumFamily, u64> {
    HashMap::from([
        (MediumFamily::Tape, 1 << 30),
        (MediumFamily::Dir, 64 << 20),
    ])
}
fn default_scrub_grace() -> Duration {
    Duration::from_secs(3600)
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mount_prefix: default_mount_prefix(),
            policy: default_policy(),
            families: default_families(),
            lib_device: default_lib_device(),
            server_socket: default_server_socket(),
            lock_file: default_lock_file(),
            sync_time_threshold: default_sync_time_threshold(),
            sync_nb_req_threshold: default_sync_nb_req_threshold(),
            sync_bytes_threshold: default_sync_bytes_threshold(),
            scrub_grace: default_scrub_grace(),
        }
    }
}

/// Top-level TOML document; only the `[lrs]` section is required.
#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    lrs: Config,
}

impl Config {
    /// Load configuration from `path`, then apply `PHOBOS_LRS_*` overrides.
    pub fn load(path: &Path) -> PhoResult<Config> {
        let contents = std::fs::read_to_string(path).map_err(PhoError::Io)?;
        let mut doc: Document =
            toml::from_str(&contents).map_err(|e| PhoError::Invalid(e.to_string()))?;
        doc.lrs.apply_env_overrides();
        Ok(doc.lrs)
    }

    /// Apply `PHOBOS_LRS_<key>` environment overrides on top of whatever
    /// came from the config file. Only scalar string/number keys are
    /// overridable this way; the threshold maps stay file-only.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_var("mount_prefix") {
            self.mount_prefix = v;
        }
        if let Some(v) = env_var("policy") {
            if let Ok(p) = v.parse() {
                self.policy = p;
            }
        }
        if let Some(v) = env_var("lib_device") {
            self.lib_device = v;
        }
        if let Some(v) = env_var("server_socket") {
            self.server_socket = v;
        }
        if let Some(v) = env_var("lock_file") {
            self.lock_file = v;
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(format!("PHOBOS_LRS_{}", key.to_uppercase())).ok()
}

mod duration_ms_map {
    use super::*;
    use serde::de::Deserializer;
    use serde::ser::Serializer;

    pub fn serialize<S: Serializer>(
        map: &HashMap<MediumFamily, Duration>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        let as_millis: HashMap<MediumFamily, u64> =
            map.iter().map(|(k, v)| (*k, v.as_millis() as u64)).collect();
        as_millis.serialize(ser)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<HashMap<MediumFamily, Duration>, D::Error> {
        let as_millis = HashMap::<MediumFamily, u64>::deserialize(de)?;
        Ok(as_millis
            .into_iter()
            .map(|(k, v)| (k, Duration::from_millis(v)))
            .collect())
    }
}

impl fmt::Display for AllocPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocPolicy::BestFit => write!(f, "best_fit"),
            AllocPolicy::FirstFit => write!(f, "first_fit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_values() {
        let cfg = Config::default();
        assert_eq!(cfg.policy, AllocPolicy::BestFit);
        assert_eq!(
            cfg.sync_time_threshold[&MediumFamily::Tape],
            Duration::from_millis(10_000)
        );
        assert_eq!(cfg.sync_nb_req_threshold[&MediumFamily::Dir], 5);
    }

    #[test]
    fn env_override_wins_over_file() {
        let mut cfg = Config::default();
        unsafe {
            env::set_var("PHOBOS_LRS_MOUNT_PREFIX", "/mnt/custom-");
        }
        cfg.apply_env_overrides();
        unsafe {
            env::remove_var("PHOBOS_LRS_MOUNT_PREFIX");
        }
        assert_eq!(cfg.mount_prefix, "/mnt/custom-");
    }
}
