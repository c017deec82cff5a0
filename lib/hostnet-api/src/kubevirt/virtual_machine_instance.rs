use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// VirtualMachineInstance from KubeVirt - a running virtual machine
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    plural = "virtualmachineinstances",
    namespaced,
    derive = "Default",
    status = "VirtualMachineInstanceStatus",
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    /// Networks the VM is attached to
    #[serde(default)]
    pub networks: Vec<VmiNetwork>,
}

/// Network attached to a VM; exactly one network source is set
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VmiNetwork {
    /// Name referenced by the VM's interfaces
    pub name: String,

    /// Secondary network provided through Multus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multus: Option<MultusNetwork>,

    /// Pod network
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<PodNetwork>,
}

/// Multus network reference
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MultusNetwork {
    /// Network name, optionally qualified as "namespace/name"
    pub network_name: String,

    #[serde(default)]
    pub default: bool,
}

/// Pod network
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodNetwork {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_network_cidr: Option<String>,
}

/// Status of a VirtualMachineInstance
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    /// Node currently running the VM
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// State of the most recent live migration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migration_state: Option<MigrationState>,
}

/// Live migration progress
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    #[serde(default)]
    pub completed: bool,

    /// Set when the migration was aborted or failed; may accompany `completed`
    #[serde(default)]
    pub failed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_node: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_node: Option<String>,
}

impl VirtualMachineInstance {
    /// Whether the last migration finished successfully
    pub fn migration_succeeded(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.migration_state.as_ref())
            .map(|m| m.completed && !m.failed)
            .unwrap_or(false)
    }

    /// Node the last migration moved the VM to
    pub fn migration_target(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.migration_state.as_ref())
            .and_then(|m| m.target_node.as_deref())
    }

    /// Names of the Multus networks the VM is attached to
    pub fn multus_networks(&self) -> Vec<String> {
        self.spec
            .networks
            .iter()
            .filter_map(|n| n.multus.as_ref())
            .map(|m| m.network_name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vmi_from(json: serde_json::Value) -> VirtualMachineInstance {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_migration_succeeded_requires_completed_and_not_failed() {
        let base = serde_json::json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachineInstance",
            "metadata": {"name": "vm1", "namespace": "default"},
            "spec": {"networks": []},
        });

        let mut none = base.clone();
        none["status"] = serde_json::json!({});
        assert!(!vmi_from(none).migration_succeeded());

        let mut ok = base.clone();
        ok["status"] = serde_json::json!({"migrationState": {"completed": true, "targetNode": "n2"}});
        let vmi = vmi_from(ok);
        assert!(vmi.migration_succeeded());
        assert_eq!(vmi.migration_target(), Some("n2"));

        let mut aborted = base;
        aborted["status"] = serde_json::json!({"migrationState": {"completed": true, "failed": true}});
        assert!(!vmi_from(aborted).migration_succeeded());
    }

    #[test]
    fn test_multus_networks_skip_pod_network() {
        let vmi = vmi_from(serde_json::json!({
            "apiVersion": "kubevirt.io/v1",
            "kind": "VirtualMachineInstance",
            "metadata": {"name": "vm1", "namespace": "default"},
            "spec": {"networks": [
                {"name": "default", "pod": {}},
                {"name": "ext", "multus": {"networkName": "infra/ext-net"}},
                {"name": "int", "multus": {"networkName": "int-net"}}
            ]},
        }));
        assert_eq!(vmi.multus_networks(), vec!["infra/ext-net", "int-net"]);
    }
}
