//! Installer configuration.
//!
//! Loaded from TOML, then overridden by command-line flags. Lookup order:
//! an explicit path (`--config` / `DEBI_CONFIG`), then
//! `<config dir>/debi/config.toml`, then `/etc/debi/config.toml`, then the
//! built-in defaults.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::runtime::Runtime;

const SYSTEM_CONFIG: &str = "/etc/debi/config.toml";

/// How to gain root for package manager runs when not already privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    #[default]
    Sudo,
    Pkexec,
    None,
}

impl Elevation {
    pub fn program(self) -> Option<&'static str> {
        match self {
            Elevation::Sudo => Some("sudo"),
            Elevation::Pkexec => Some("pkexec"),
            Elevation::None => None,
        }
    }
}

/// Locations of the package manager tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub apt_get: PathBuf,
    pub apt_cache: PathBuf,
    pub dpkg: PathBuf,
    pub dpkg_query: PathBuf,
    pub dpkg_deb: PathBuf,
    pub debsig_verify: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            apt_get: "apt-get".into(),
            apt_cache: "apt-cache".into(),
            dpkg: "dpkg".into(),
            dpkg_query: "dpkg-query".into(),
            dpkg_deb: "dpkg-deb".into(),
            debsig_verify: "debsig-verify".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Accepted architectures. Empty means ask dpkg.
    pub architectures: Vec<String>,
    /// Refuse packages without a valid signature.
    pub require_signature: bool,
    /// Package names that may not be installed.
    pub blocklist: Vec<String>,
    /// File holding further comma-separated package names to block.
    pub blocklist_file: Option<PathBuf>,
    /// Filesystem packages are installed into, used for the free-space check.
    pub target_root: PathBuf,
    pub elevate: Elevation,
    pub tools: ToolPaths,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            architectures: Vec::new(),
            require_signature: false,
            blocklist: Vec::new(),
            blocklist_file: None,
            target_root: PathBuf::from("/"),
            elevate: Elevation::default(),
            tools: ToolPaths::default(),
        }
    }
}

impl Config {
    /// Load configuration, preferring `explicit` when given.
    ///
    /// An explicit path must exist; the default locations are optional.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(runtime, path);
        }

        for candidate in Self::default_locations(runtime) {
            if runtime.is_file(&candidate) {
                return Self::from_file(runtime, &candidate);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    fn default_locations<R: Runtime>(runtime: &R) -> Vec<PathBuf> {
        let mut locations = Vec::new();
        if let Some(dir) = runtime.config_dir() {
            locations.push(dir.join("debi").join("config.toml"));
        }
        locations.push(PathBuf::from(SYSTEM_CONFIG));
        locations
    }

    fn from_file<R: Runtime>(runtime: &R, path: &Path) -> Result<Self> {
        debug!("Loading configuration from {:?}", path);
        let text = runtime
            .read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse configuration {}", path.display()))
    }

    /// Names blocked from installation: the inline list plus the block file.
    ///
    /// The block file holds names separated by commas; whitespace and line
    /// breaks are ignored. A missing block file blocks nothing extra.
    pub fn blocked_names<R: Runtime>(&self, runtime: &R) -> Result<Vec<String>> {
        let mut names = self.blocklist.clone();

        if let Some(path) = &self.blocklist_file {
            if runtime.exists(path) {
                let text = runtime
                    .read_to_string(path)
                    .with_context(|| format!("Failed to read block list {}", path.display()))?;
                let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                names.extend(
                    compact
                        .split(',')
                        .filter(|name| !name.is_empty())
                        .map(str::to_string),
                );
            } else {
                log::warn!("Block list file {} not found", path.display());
            }
        }

        Ok(names)
    }
}
