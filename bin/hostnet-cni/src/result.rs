//! CNI result documents

use serde::Serialize;

/// ADD result; this plugin configures host state only, so it carries no
/// interfaces or IPs
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    pub cni_version: String,
}

/// VERSION result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResult {
    pub cni_version: String,
    pub supported_versions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_result_is_version_only() {
        let json = serde_json::to_string(&CniResult {
            cni_version: "0.3.1".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"cniVersion":"0.3.1"}"#);
    }

    #[test]
    fn test_version_result() {
        let doc = serde_json::to_value(VersionResult {
            cni_version: "1.0.0".to_string(),
            supported_versions: vec!["0.3.1".to_string(), "1.0.0".to_string()],
        })
        .unwrap();
        assert_eq!(doc["supportedVersions"][1], "1.0.0");
    }
}
