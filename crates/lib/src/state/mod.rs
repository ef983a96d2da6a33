//! Deployment state: the persisted record of what has been provisioned, and
//! the pluggable backends it is stored through.

pub mod local;
pub mod remote;
pub mod store;
pub mod types;

pub use local::LocalStateStore;
pub use remote::RemoteStateStore;
pub use store::{StateError, StateStore, open_store};
pub use types::{DeploymentState, STATE_VERSION, StepRecord, StepStatus};
