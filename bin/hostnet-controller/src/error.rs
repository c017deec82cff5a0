use hostnet_core::CoreError;
use hostnet_netlink::NetError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Host network error: {0}")]
    Net(#[from] NetError),

    #[error("{0} has no namespace")]
    MissingNamespace(String),
}

impl ReconcileError {
    /// Write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }

    /// Object vanished while being reconciled
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::Kube(kube::Error::Api(ae)) if ae.code == 404)
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16) -> ReconcileError {
    ReconcileError::Kube(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "test".to_string(),
        reason: String::new(),
        code,
    }))
}
