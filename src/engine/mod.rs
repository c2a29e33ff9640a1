//! The installation engine: admission, dependency inspection, the queue
//! state machine and execution through the package manager.

mod confirm;
mod events;
mod executor;
mod inspector;
mod queue;
#[cfg(test)]
pub(crate) mod testing;
mod validator;

pub use confirm::{ConfirmationGate, UninstallPrompt, UninstallRisk, UserDecision};
pub use events::QueueEvent;
pub use executor::{ExecutionRequest, OperationExecutor};
pub use inspector::DependencyInspector;
pub use queue::InstallQueue;
pub use validator::{Admission, AdmissionPolicy, AdmittedPackage, KnownPackages, Validator};
