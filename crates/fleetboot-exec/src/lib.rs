//! fleetboot-exec: Remote execution abstraction
//!
//! Opens sessions to target machines and runs commands on them, either over
//! SSH (russh) or on the local machine.

pub mod error;
pub mod keys;
pub mod local;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use keys::{KeyError, KeySource};
pub use local::{LocalConnector, LocalExecutor};
pub use result::{CommandOutput, ConnectionInfo};
pub use ssh::{SshConnector, SshConnectorBuilder, SshExecutor};
pub use traits::{Connector, RemoteExecutor};
