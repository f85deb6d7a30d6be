//! Control-plane trait

use async_trait::async_trait;

use crate::error::CloudError;
use crate::types::{InstanceDescription, InstanceFilter, InstanceStatus};

/// Minimal read contract against a cloud control plane
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Status checks for the given instances
    ///
    /// Instances the control plane has no status for yet are omitted from
    /// the result rather than reported as errors.
    async fn describe_instance_status(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceStatus>, CloudError>;

    /// Instances matching the filter
    async fn describe_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceDescription>, CloudError>;

    /// Short name for logs
    fn provider(&self) -> &'static str;
}
