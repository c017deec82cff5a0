use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Netlink error: {0}")]
    Netlink(#[from] rtnetlink::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Command '{cmd}' failed: {stderr}")]
    Command { cmd: String, stderr: String },

    #[error("Invalid CIDR {0}: {1}")]
    InvalidCidr(String, #[source] ipnetwork::IpNetworkError),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Could not find source address for network {0} on host")]
    NoSourceAddress(String),

    #[error("No route to egress network {0}")]
    NoEgressRoute(String),

    #[error("Unable to delete bridge {bridge}, interfaces still attached: {ports:?}")]
    BridgeBusy { bridge: String, ports: Vec<String> },
}

impl NetError {
    /// Map a netlink failure, turning EEXIST and ENODEV into typed variants
    pub(crate) fn from_netlink(err: rtnetlink::Error, subject: &str) -> Self {
        match err {
            rtnetlink::Error::NetlinkError(ref e) if e.raw_code() == -libc::EEXIST => {
                NetError::AlreadyExists(subject.to_string())
            }
            rtnetlink::Error::NetlinkError(ref e) if e.raw_code() == -libc::ENODEV => {
                NetError::NotFound(subject.to_string())
            }
            other => NetError::Netlink(other),
        }
    }
}

/// Treat "already exists" as success
pub(crate) fn ignore_exists(result: Result<()>) -> Result<()> {
    match result {
        Err(NetError::AlreadyExists(_)) => Ok(()),
        other => other,
    }
}
