/// Bindings to KubeVirt CRDs
///
/// Only the fields the migration watcher reads are modelled; everything
/// else in the upstream schema is ignored on deserialization.

pub mod virtual_machine_instance;

pub use virtual_machine_instance::{
    MigrationState, MultusNetwork, VirtualMachineInstance, VirtualMachineInstanceSpec,
    VirtualMachineInstanceStatus, VmiNetwork,
};
