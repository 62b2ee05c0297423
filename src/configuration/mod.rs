//! Tunables of the pool control plane.
//!
//! The configuration is usually read from a TOML file:
//!
//! ```toml
//! cachefile = "/etc/spa/pools.cache"
//! feature_checks_disable = false
//! reference_tracking = true
//! ```
use crate::config_cache::{ConfigCache, FileConfigCache, MemoryConfigCache};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod errors;

pub use self::errors::*;

/// `Configuration` of a `PoolRegistry`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Location of the pool configuration cache. Without one the cache is
    /// kept in memory only.
    pub cachefile: Option<PathBuf>,
    /// Treat every feature as supported when checking whether a pool can be
    /// opened. Meant for debugging only.
    pub feature_checks_disable: bool,
    /// Remember who holds references on a pool.
    pub reference_tracking: bool,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            cachefile: None,
            feature_checks_disable: false,
            reference_tracking: cfg!(debug_assertions),
        }
    }
}

impl Configuration {
    /// Parses the configuration from its TOML representation. Missing keys
    /// keep their default value.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses the configuration file at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        Configuration::from_toml_str(&s)
    }

    /// Opens the configuration cache this configuration refers to.
    pub fn open_config_cache(&self) -> Result<Arc<dyn ConfigCache>> {
        Ok(match self.cachefile {
            Some(ref path) => Arc::new(FileConfigCache::open(path)?),
            None => Arc::new(MemoryConfigCache::new()),
        })
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.cachefile {
            Some(ref path) => write!(f, "cachefile={}", path.display())?,
            None => write!(f, "cachefile=none")?,
        }
        if self.feature_checks_disable {
            write!(f, " feature_checks_disable")?;
        }
        if self.reference_tracking {
            write!(f, " reference_tracking")?;
        }
        Ok(())
    }
}
