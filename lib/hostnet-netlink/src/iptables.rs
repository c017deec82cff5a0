//! iptables access through the `iptables` binary

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{NetError, Result};

const IPTABLES: &str = "iptables";

/// Rule-level iptables operations; rules are argument vectors without the
/// table/chain prefix
#[async_trait]
pub trait Iptables: Send + Sync {
    async fn chain_exists(&self, table: &str, chain: &str) -> Result<bool>;
    async fn new_chain(&self, table: &str, chain: &str) -> Result<()>;
    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> Result<bool>;
    async fn insert(&self, table: &str, chain: &str, position: u32, rule: &[String]) -> Result<()>;
    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> Result<()>;
    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> Result<()>;
    /// Rules of a chain in `-S` form (`-A <chain> ...`)
    async fn list(&self, table: &str, chain: &str) -> Result<Vec<String>>;
    async fn clear_and_delete_chain(&self, table: &str, chain: &str) -> Result<()>;
}

/// [`Iptables`] shelling out to `iptables -w`
#[derive(Clone, Debug, Default)]
pub struct IptablesCli;

impl IptablesCli {
    async fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!(args = ?args, "Running iptables");
        Ok(Command::new(IPTABLES).arg("-w").args(args).output().await?)
    }

    async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(NetError::Command {
                cmd: format!("{} {}", IPTABLES, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn with_rule<'a>(prefix: &[&'a str], rule: &'a [String]) -> Vec<&'a str> {
    prefix
        .iter()
        .copied()
        .chain(rule.iter().map(String::as_str))
        .collect()
}

#[async_trait]
impl Iptables for IptablesCli {
    async fn chain_exists(&self, table: &str, chain: &str) -> Result<bool> {
        let output = self.run(&["-t", table, "-S", chain]).await?;
        Ok(output.status.success())
    }

    async fn new_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.run_checked(&["-t", table, "-N", chain]).await?;
        Ok(())
    }

    async fn exists(&self, table: &str, chain: &str, rule: &[String]) -> Result<bool> {
        let output = self.run(&with_rule(&["-t", table, "-C", chain], rule)).await?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(NetError::Command {
                cmd: format!("{} -t {} -C {} {}", IPTABLES, table, chain, rule.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    async fn insert(&self, table: &str, chain: &str, position: u32, rule: &[String]) -> Result<()> {
        let position = position.to_string();
        self.run_checked(&with_rule(&["-t", table, "-I", chain, position.as_str()], rule))
            .await?;
        Ok(())
    }

    async fn append(&self, table: &str, chain: &str, rule: &[String]) -> Result<()> {
        self.run_checked(&with_rule(&["-t", table, "-A", chain], rule))
            .await?;
        Ok(())
    }

    async fn delete(&self, table: &str, chain: &str, rule: &[String]) -> Result<()> {
        self.run_checked(&with_rule(&["-t", table, "-D", chain], rule))
            .await?;
        Ok(())
    }

    async fn list(&self, table: &str, chain: &str) -> Result<Vec<String>> {
        let stdout = self.run_checked(&["-t", table, "-S", chain]).await?;
        Ok(stdout
            .lines()
            .filter(|line| line.starts_with("-A "))
            .map(str::to_string)
            .collect())
    }

    async fn clear_and_delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.run_checked(&["-t", table, "-F", chain]).await?;
        self.run_checked(&["-t", table, "-X", chain]).await?;
        Ok(())
    }
}

/// Split a `-A <chain> ...` listing line into the rule arguments
pub fn rule_args(line: &str) -> Vec<String> {
    line.split_whitespace().skip(2).map(str::to_string).collect()
}
