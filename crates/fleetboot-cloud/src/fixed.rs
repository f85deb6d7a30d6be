//! Static control plane for fleets that are not cloud-managed

use async_trait::async_trait;

use crate::error::CloudError;
use crate::traits::ControlPlane;
use crate::types::{
    CheckStatus, InstanceDescription, InstanceFilter, InstanceState, InstanceStatus,
};

/// Serves a fixed instance list
///
/// Every known instance reports running with passing checks, so readiness
/// waits complete on the first poll.
#[derive(Debug, Clone, Default)]
pub struct StaticControlPlane {
    instances: Vec<InstanceDescription>,
}

impl StaticControlPlane {
    /// Create from a host list
    #[must_use]
    pub fn new(instances: Vec<InstanceDescription>) -> Self {
        Self { instances }
    }

    /// Number of configured instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether no instances are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait]
impl ControlPlane for StaticControlPlane {
    async fn describe_instance_status(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceStatus>, CloudError> {
        Ok(self
            .instances
            .iter()
            .filter(|i| instance_ids.contains(&i.instance_id))
            .map(|i| {
                InstanceStatus::new(
                    i.instance_id.clone(),
                    i.state,
                    CheckStatus::Ok,
                    CheckStatus::Ok,
                )
            })
            .collect())
    }

    async fn describe_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceDescription>, CloudError> {
        Ok(self
            .instances
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    fn provider(&self) -> &'static str {
        "static"
    }
}

impl From<Vec<InstanceDescription>> for StaticControlPlane {
    fn from(instances: Vec<InstanceDescription>) -> Self {
        Self::new(instances)
    }
}

/// Convenience for building a running static instance
#[must_use]
pub fn running_instance(
    instance_id: impl Into<String>,
    public_ip: Option<String>,
    private_ip: Option<String>,
) -> InstanceDescription {
    InstanceDescription {
        instance_id: instance_id.into(),
        state: InstanceState::Running,
        public_ip,
        private_ip,
        public_dns: None,
        security_group_ids: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_status_is_healthy() {
        let plane = StaticControlPlane::new(vec![
            running_instance("web-1", Some("10.0.0.1".into()), None),
            running_instance("web-2", Some("10.0.0.2".into()), None),
        ]);

        let statuses = plane
            .describe_instance_status(&["web-2".to_string(), "missing".to_string()])
            .await
            .unwrap();

        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].instance_id, "web-2");
        assert!(statuses[0].checks_passed());
    }

    #[tokio::test]
    async fn test_static_describe_filters() {
        let plane = StaticControlPlane::new(vec![
            running_instance("web-1", None, None),
            running_instance("controller", None, None),
        ]);

        let found = plane
            .describe_instances(&InstanceFilter::running().excluding(["controller"]))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].instance_id, "web-1");
    }
}
