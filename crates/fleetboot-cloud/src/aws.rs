//! AWS control plane via the `aws` CLI

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleetboot_exec::RemoteExecutor;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::error::CloudError;
use crate::traits::ControlPlane;
use crate::types::{
    CheckStatus, InstanceDescription, InstanceFilter, InstanceState, InstanceStatus,
};

/// Control plane backed by `aws ec2 ... --output json`
///
/// Credentials and region resolution are left to the CLI (environment,
/// profile, instance role), with optional explicit overrides.
pub struct AwsCliControlPlane {
    /// Executor running the CLI, normally a `LocalExecutor`
    executor: Arc<dyn RemoteExecutor>,
    region: Option<String>,
    profile: Option<String>,
    timeout: Duration,
}

impl AwsCliControlPlane {
    /// Create a control plane using the CLI's default region and profile
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            executor,
            region: None,
            profile: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Set region
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set named profile
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    /// Set per-call timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn base_command(&self, subcommand: &str) -> String {
        let mut cmd = format!("aws ec2 {subcommand} --output json");
        if let Some(region) = &self.region {
            cmd.push_str(&format!(" --region {}", shell_quote(region)));
        }
        if let Some(profile) = &self.profile {
            cmd.push_str(&format!(" --profile {}", shell_quote(profile)));
        }
        cmd
    }

    fn status_command(&self, instance_ids: &[String]) -> Result<String, CloudError> {
        let mut cmd = self.base_command("describe-instance-status --include-all-instances");
        cmd.push_str(" --instance-ids");
        for id in instance_ids {
            cmd.push(' ');
            cmd.push_str(validate_instance_id(id)?);
        }
        Ok(cmd)
    }

    fn describe_command(&self, filter: &InstanceFilter) -> Result<String, CloudError> {
        let mut cmd = self.base_command("describe-instances");
        if !filter.instance_ids.is_empty() {
            cmd.push_str(" --instance-ids");
            for id in &filter.instance_ids {
                cmd.push(' ');
                cmd.push_str(validate_instance_id(id)?);
            }
        }
        if !filter.states.is_empty() {
            let states: Vec<&str> = filter.states.iter().map(InstanceState::as_str).collect();
            cmd.push_str(&format!(
                " --filters Name=instance-state-name,Values={}",
                states.join(",")
            ));
        }
        Ok(cmd)
    }

    /// Run one CLI call and deserialize its stdout
    #[instrument(skip(self, cmd), level = "debug")]
    async fn call<T: DeserializeOwned>(&self, cmd: &str) -> Result<T, CloudError> {
        debug!(command = %cmd, "calling aws CLI");

        let result = self
            .executor
            .run_with_timeout(cmd, self.timeout)
            .await
            .map_err(|e| CloudError::ExecutionError(e.to_string()))?;

        if !result.success() {
            return Err(classify_cli_failure(result.status, &result.stderr));
        }

        serde_json::from_str(&result.stdout).map_err(|e| CloudError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl ControlPlane for AwsCliControlPlane {
    async fn describe_instance_status(
        &self,
        instance_ids: &[String],
    ) -> Result<Vec<InstanceStatus>, CloudError> {
        if instance_ids.is_empty() {
            return Ok(Vec::new());
        }
        let cmd = self.status_command(instance_ids)?;
        let response: DescribeInstanceStatusResponse = self.call(&cmd).await?;
        Ok(response.into_statuses())
    }

    async fn describe_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<InstanceDescription>, CloudError> {
        let cmd = self.describe_command(filter)?;
        let response: DescribeInstancesResponse = self.call(&cmd).await?;
        let instances: Vec<_> = response
            .into_descriptions()
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect();
        debug!(count = instances.len(), "described instances");
        Ok(instances)
    }

    fn provider(&self) -> &'static str {
        "aws-cli"
    }
}

const ACCESS_DENIED: &[&str] = &[
    "UnauthorizedOperation",
    "AuthFailure",
    "Unable to locate credentials",
    "InvalidClientTokenId",
    "ExpiredToken",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
];

const UNAVAILABLE: &[&str] = &[
    "Could not connect to the endpoint URL",
    "EndpointConnectionError",
    "Connect timeout",
    "Read timeout",
    "ServiceUnavailable",
    "Unavailable",
    "InternalError",
    "InternalFailure",
];

fn classify_cli_failure(status: i32, stderr: &str) -> CloudError {
    let message = stderr.trim().to_string();
    let mentions = |needles: &[&str]| needles.iter().any(|n| stderr.contains(n));

    if status == 127 || mentions(&["aws: not found", "command not found"]) {
        return CloudError::CliNotFound(message);
    }
    if stderr.contains("InvalidInstanceID.NotFound") {
        return CloudError::InstanceNotFound(message);
    }
    if mentions(&["RequestLimitExceeded", "Throttling"]) {
        return CloudError::Throttled(message);
    }
    if mentions(ACCESS_DENIED) {
        return CloudError::AccessDenied(message);
    }
    if mentions(UNAVAILABLE) {
        return CloudError::Unavailable(message);
    }
    CloudError::CommandFailed { status, message }
}

fn validate_instance_id(id: &str) -> Result<&str, CloudError> {
    let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(id)
    } else {
        Err(CloudError::InvalidInstanceId(id.to_string()))
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\"'\"'"))
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstanceStatusResponse {
    #[serde(default)]
    instance_statuses: Vec<WireInstanceStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireInstanceStatus {
    instance_id: String,
    instance_state: WireState,
    #[serde(default)]
    system_status: Option<WireCheck>,
    #[serde(default)]
    instance_status: Option<WireCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireState {
    name: InstanceState,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireCheck {
    status: CheckStatus,
}

impl DescribeInstanceStatusResponse {
    fn into_statuses(self) -> Vec<InstanceStatus> {
        self.instance_statuses
            .into_iter()
            .map(|s| InstanceStatus {
                instance_id: s.instance_id,
                state: s.instance_state.name,
                system_status: s.system_status.map_or(CheckStatus::Unknown, |c| c.status),
                instance_status: s.instance_status.map_or(CheckStatus::Unknown, |c| c.status),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    reservations: Vec<WireReservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireReservation {
    #[serde(default)]
    instances: Vec<WireInstance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireInstance {
    instance_id: String,
    state: WireState,
    #[serde(default)]
    public_ip_address: Option<String>,
    #[serde(default)]
    private_ip_address: Option<String>,
    #[serde(default)]
    public_dns_name: Option<String>,
    #[serde(default)]
    security_groups: Vec<WireSecurityGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireSecurityGroup {
    group_id: String,
}

impl DescribeInstancesResponse {
    fn into_descriptions(self) -> Vec<InstanceDescription> {
        self.reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .map(|i| InstanceDescription {
                instance_id: i.instance_id,
                state: i.state.name,
                public_ip: i.public_ip_address,
                private_ip: i.private_ip_address,
                // the API reports "" rather than omitting the field
                public_dns: i.public_dns_name.filter(|d| !d.is_empty()),
                security_group_ids: i.security_groups.into_iter().map(|g| g.group_id).collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetboot_exec::{CommandOutput, ExecError};
    use tokio::sync::Mutex;

    const STATUS_JSON: &str = r#"{
        "InstanceStatuses": [
            {
                "AvailabilityZone": "us-east-1a",
                "InstanceId": "i-0a1b2c3d",
                "InstanceState": {"Code": 16, "Name": "running"},
                "InstanceStatus": {"Details": [{"Name": "reachability", "Status": "passed"}], "Status": "ok"},
                "SystemStatus": {"Details": [{"Name": "reachability", "Status": "passed"}], "Status": "ok"}
            },
            {
                "InstanceId": "i-0e0f",
                "InstanceState": {"Code": 0, "Name": "pending"},
                "InstanceStatus": {"Status": "initializing"},
                "SystemStatus": {"Status": "initializing"}
            }
        ]
    }"#;

    const INSTANCES_JSON: &str = r#"{
        "Reservations": [
            {
                "Instances": [
                    {
                        "InstanceId": "i-0a1b2c3d",
                        "State": {"Code": 16, "Name": "running"},
                        "PublicIpAddress": "54.210.1.10",
                        "PrivateIpAddress": "172.31.20.5",
                        "PublicDnsName": "",
                        "SecurityGroups": [{"GroupId": "sg-01", "GroupName": "default"}]
                    },
                    {
                        "InstanceId": "i-0ddbf7fd",
                        "State": {"Code": 16, "Name": "running"},
                        "PrivateIpAddress": "172.31.20.6",
                        "SecurityGroups": []
                    }
                ]
            }
        ]
    }"#;

    /// Replays canned CLI output and records the commands it was given
    struct ScriptedCli {
        output: CommandOutput,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedCli {
        fn new(status: i32, stdout: &str, stderr: &str) -> Arc<Self> {
            Arc::new(Self {
                output: CommandOutput::new(status, stdout, stderr),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedCli {
        async fn run(&self, cmd: &str) -> Result<CommandOutput, ExecError> {
            self.seen.lock().await.push(cmd.to_string());
            Ok(self.output.clone())
        }

        async fn run_with_timeout(
            &self,
            cmd: &str,
            _timeout: Duration,
        ) -> Result<CommandOutput, ExecError> {
            self.run(cmd).await
        }

        fn executor_type(&self) -> &'static str {
            "scripted"
        }
    }

    #[tokio::test]
    async fn test_parse_instance_status() {
        let cli = ScriptedCli::new(0, STATUS_JSON, "");
        let plane = AwsCliControlPlane::new(cli.clone()).with_region("us-east-1");

        let statuses = plane
            .describe_instance_status(&["i-0a1b2c3d".to_string(), "i-0e0f".to_string()])
            .await
            .unwrap();

        assert_eq!(statuses.len(), 2);
        assert!(statuses[0].checks_passed());
        assert_eq!(statuses[1].state, InstanceState::Pending);
        assert_eq!(statuses[1].system_status, CheckStatus::Initializing);

        let seen = cli.seen.lock().await;
        assert!(seen[0].contains("describe-instance-status --include-all-instances"));
        assert!(seen[0].contains("--region 'us-east-1'"));
        assert!(seen[0].ends_with("--instance-ids i-0a1b2c3d i-0e0f"));
    }

    #[tokio::test]
    async fn test_describe_instances_applies_exclusions() {
        let cli = ScriptedCli::new(0, INSTANCES_JSON, "");
        let plane = AwsCliControlPlane::new(cli.clone());

        let filter = InstanceFilter::running().excluding(["i-0ddbf7fd"]);
        let instances = plane.describe_instances(&filter).await.unwrap();

        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].public_ip.as_deref(), Some("54.210.1.10"));
        assert_eq!(instances[0].private_ip.as_deref(), Some("172.31.20.5"));
        assert_eq!(instances[0].public_dns, None);
        assert_eq!(instances[0].security_group_ids, vec!["sg-01"]);

        let seen = cli.seen.lock().await;
        assert!(seen[0].contains("--filters Name=instance-state-name,Values=running"));
    }

    #[tokio::test]
    async fn test_not_found_is_retryable() {
        let cli = ScriptedCli::new(
            254,
            "",
            "An error occurred (InvalidInstanceID.NotFound) when calling the DescribeInstanceStatus operation",
        );
        let plane = AwsCliControlPlane::new(cli);

        let err = plane
            .describe_instance_status(&["i-new".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::InstanceNotFound(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejects_unsafe_instance_id() {
        let cli = ScriptedCli::new(0, STATUS_JSON, "");
        let plane = AwsCliControlPlane::new(cli.clone());

        let err = plane
            .describe_instance_status(&["i-1; rm -rf /".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::InvalidInstanceId(_)));
        assert!(cli.seen.lock().await.is_empty());
    }

    #[test]
    fn test_classify_cli_failure() {
        assert!(matches!(
            classify_cli_failure(127, "sh: 1: aws: not found"),
            CloudError::CliNotFound(_)
        ));
        assert!(matches!(
            classify_cli_failure(254, "An error occurred (RequestLimitExceeded)"),
            CloudError::Throttled(_)
        ));
        assert!(matches!(
            classify_cli_failure(253, "Unable to locate credentials. You can configure credentials by running \"aws configure\"."),
            CloudError::AccessDenied(_)
        ));
        assert!(matches!(
            classify_cli_failure(254, "An error occurred (UnauthorizedOperation) when calling the DescribeInstances operation"),
            CloudError::AccessDenied(_)
        ));
        assert!(matches!(
            classify_cli_failure(1, "something unexpected"),
            CloudError::CommandFailed { status: 1, .. }
        ));
    }

    #[test]
    fn test_endpoint_outages_are_retryable() {
        for stderr in [
            "Could not connect to the endpoint URL: \"https://ec2.us-east-1.amazonaws.com/\"",
            "Read timeout on endpoint URL: \"https://ec2.us-east-1.amazonaws.com/\"",
            "An error occurred (Unavailable) when calling the DescribeInstanceStatus operation",
            "An error occurred (InternalError) when calling the DescribeInstanceStatus operation",
            "An error occurred (ServiceUnavailable) when calling the DescribeInstanceStatus operation",
        ] {
            let err = classify_cli_failure(255, stderr);
            assert!(matches!(err, CloudError::Unavailable(_)), "{stderr}");
            assert!(err.is_retryable(), "{stderr}");
        }
    }

    #[tokio::test]
    async fn test_truncated_output_is_retryable() {
        let cli = ScriptedCli::new(0, "{\"InstanceStatuses\": [", "");
        let plane = AwsCliControlPlane::new(cli);

        let err = plane
            .describe_instance_status(&["i-0a1b2c3d".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::ParseError(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_retryable() {
        let cli = ScriptedCli::new(
            255,
            "",
            "\nCould not connect to the endpoint URL: \"https://ec2.us-east-1.amazonaws.com/\"\n",
        );
        let plane = AwsCliControlPlane::new(cli);

        let err = plane
            .describe_instance_status(&["i-0a1b2c3d".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Unavailable(_)));
        assert!(err.is_retryable());
    }
}
