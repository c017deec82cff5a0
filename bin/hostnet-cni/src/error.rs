//! CNI error document

use hostnet_netlink::NetError;
use serde::Serialize;
use thiserror::Error;

/// Error codes from the CNI specification, plus plugin codes from 100 up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CniErrorCode {
    InvalidEnvironmentVariables = 4,
    IoFailure = 5,
    DecodingFailure = 6,
    InvalidNetworkConfig = 7,

    BridgeFailure = 100,
    RouteFailure = 101,
    MasqueradeFailure = 102,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct CniError {
    code: CniErrorCode,
    msg: String,
    details: Option<String>,
}

impl CniError {
    pub fn new(code: CniErrorCode, msg: &str) -> Self {
        Self {
            code,
            msg: msg.to_string(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }

    pub fn code(&self) -> CniErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Wrap a host network failure under `code`
    pub fn net(code: CniErrorCode, msg: &str, err: NetError) -> Self {
        Self::new(code, msg).with_details(&err.to_string())
    }

    pub fn to_document(&self, cni_version: &str) -> ErrorDocument {
        ErrorDocument {
            cni_version: cni_version.to_string(),
            code: self.code as u32,
            msg: self.msg.clone(),
            details: self.details.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDocument {
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}
