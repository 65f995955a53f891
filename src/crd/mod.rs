pub mod dependents;
pub mod managed_storage;

pub use managed_storage::{
    ComponentState, ComponentStatus, ComponentsStatus, ManagedStorage,
    ManagedStorageSpec,
    ManagedStorageStatus, ReconcileStrategy,
};
