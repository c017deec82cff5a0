use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::Result;

const PROC_SYS: &str = "/proc/sys";

/// Kernel parameter writes
///
/// Keys are given as path segments so interface names containing dots
/// (`eth1.100`) survive intact.
#[async_trait]
pub trait Sysctl: Send + Sync {
    async fn set(&self, key: &[&str], value: &str) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct ProcSysctl;

pub(crate) fn sysctl_path(key: &[&str]) -> PathBuf {
    let mut path = PathBuf::from(PROC_SYS);
    path.extend(key);
    path
}

#[async_trait]
impl Sysctl for ProcSysctl {
    async fn set(&self, key: &[&str], value: &str) -> Result<()> {
        let path = sysctl_path(key);
        debug!(path = %path.display(), value, "Setting sysctl");
        tokio::fs::write(&path, value).await?;
        Ok(())
    }
}
