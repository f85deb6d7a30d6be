//! Building a host list from the control plane

use fleetboot_cloud::{CloudError, ControlPlane, InstanceFilter};
use tracing::{info, warn};

use crate::host::HostDescriptor;

/// Instances matching `filter`, as host descriptors
///
/// Instances without any address are skipped.
pub async fn discover_hosts(
    control_plane: &dyn ControlPlane,
    filter: &InstanceFilter,
) -> Result<Vec<HostDescriptor>, CloudError> {
    let instances = control_plane.describe_instances(filter).await?;

    let hosts: Vec<HostDescriptor> = instances
        .into_iter()
        .filter(|i| filter.matches(i))
        .filter_map(|instance| {
            let host = HostDescriptor::from(instance);
            if host.public_addr.is_none() && host.private_addr.is_none() {
                warn!(host = %host.id, "skipping instance without an address");
                None
            } else {
                Some(host)
            }
        })
        .collect();

    info!(
        provider = control_plane.provider(),
        count = hosts.len(),
        "discovered hosts"
    );
    Ok(hosts)
}

#[cfg(test)]
mod tests {
    use fleetboot_cloud::{InstanceDescription, InstanceState, StaticControlPlane, running_instance};

    use super::*;

    #[tokio::test]
    async fn test_discover_excludes_controller_and_addressless() {
        let plane = StaticControlPlane::from(vec![
            running_instance("i-controller", Some("54.0.0.1".into()), Some("172.31.0.1".into())),
            running_instance("i-web-1", Some("54.0.0.2".into()), Some("172.31.0.2".into())),
            running_instance("i-web-2", None, Some("172.31.0.3".into())),
            running_instance("i-dark", None, None),
            InstanceDescription {
                state: InstanceState::Stopped,
                ..running_instance("i-stopped", Some("54.0.0.9".into()), None)
            },
        ]);

        let filter = InstanceFilter::running().excluding(["i-controller"]);
        let hosts = discover_hosts(&plane, &filter).await.unwrap();

        let ids: Vec<&str> = hosts.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["i-web-1", "i-web-2"]);
        assert_eq!(hosts[1].private_addr.as_deref(), Some("172.31.0.3"));
    }
}
