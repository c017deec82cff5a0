//! ebtables access through the `ebtables-nft` binary

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{NetError, Result};

const EBTABLES: &str = "ebtables-nft";

#[async_trait]
pub trait Ebtables: Send + Sync {
    /// Rules of a chain as printed by `--list`
    async fn list(&self, table: &str, chain: &str) -> Result<Vec<String>>;
    /// Insert a rule at the front of a chain
    async fn insert(&self, table: &str, chain: &str, rule: &[String]) -> Result<()>;
    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> Result<()>;
}

#[derive(Clone, Debug, Default)]
pub struct EbtablesCli;

impl EbtablesCli {
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(args = ?args, "Running ebtables");
        let output = Command::new(EBTABLES).args(args).output().await?;
        if !output.status.success() {
            return Err(NetError::Command {
                cmd: format!("{} {}", EBTABLES, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Ebtables for EbtablesCli {
    async fn list(&self, table: &str, chain: &str) -> Result<Vec<String>> {
        let stdout = self.run(&["-t", table, "--list", chain]).await?;
        Ok(parse_listing(&stdout))
    }

    async fn insert(&self, table: &str, chain: &str, rule: &[String]) -> Result<()> {
        let mut args = vec!["-t", table, "-I", chain];
        args.extend(rule.iter().map(String::as_str));
        self.run(&args).await.map(|_| ())
    }

    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> Result<()> {
        let mut args = vec!["-t", table, "-D", chain];
        args.extend(rule.iter().map(String::as_str));
        self.run(&args).await.map(|_| ())
    }
}

/// Keep only rule lines, dropping the table/chain headers
fn parse_listing(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('-'))
        .map(str::to_string)
        .collect()
}
