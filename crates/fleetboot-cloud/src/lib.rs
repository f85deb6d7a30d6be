//! fleetboot-cloud: Cloud control-plane read contract
//!
//! Describes instances and their status checks. The AWS implementation drives
//! the `aws` CLI and parses its JSON output; the static implementation serves
//! a fixed, always-healthy host list.

pub mod aws;
pub mod error;
pub mod fixed;
pub mod traits;
pub mod types;

pub use aws::AwsCliControlPlane;
pub use error::CloudError;
pub use fixed::{StaticControlPlane, running_instance};
pub use traits::ControlPlane;
pub use types::{CheckStatus, InstanceDescription, InstanceFilter, InstanceState, InstanceStatus};
