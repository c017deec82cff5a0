//! Node identity

use std::{fs, io};

use tracing::debug;

use crate::Result;

/// Environment variable overriding the node name
pub const NODE_NAME_ENV: &str = "NODE_NAME";

/// Resolve the name of the node this instance manages
///
/// An explicit, non-empty override wins; otherwise the OS hostname is used.
pub fn resolve_node_name(override_name: Option<&str>) -> Result<String> {
    if let Some(name) = override_name.map(str::trim).filter(|n| !n.is_empty()) {
        return Ok(name.to_string());
    }

    let name = os_hostname()?;
    debug!(node = %name, "Using OS hostname as node name");
    Ok(name)
}

const HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";

fn os_hostname() -> io::Result<String> {
    let name = fs::read_to_string(HOSTNAME_PATH)?.trim().to_string();
    if name.is_empty() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "empty hostname"));
    }
    Ok(name)
}
