//! Free space queries.

use anyhow::{Context, Result};
use std::path::Path;

use super::RealRuntime;

impl RealRuntime {
    #[tracing::instrument(skip(self))]
    pub(crate) fn available_space_impl(&self, path: &Path) -> Result<u64> {
        #[cfg(unix)]
        {
            let stat = nix::sys::statvfs::statvfs(path)
                .with_context(|| format!("Failed to query free space for {:?}", path))?;
            #[allow(clippy::unnecessary_cast)]
            Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
        }
        #[cfg(not(unix))]
        {
            let _ = path;
            anyhow::bail!("Free space query is only supported on Unix")
        }
    }
}
