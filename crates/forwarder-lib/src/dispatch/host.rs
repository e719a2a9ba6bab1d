//! Host identity lookup

use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{info, warn};

/// EC2 instance metadata endpoint for the instance id
pub const INSTANCE_ID_URL: &str = "http://169.254.169.254/latest/meta-data/instance-id";

pub const INSTANCE_ID_TIMEOUT: Duration = Duration::from_secs(1);

/// Fetch the host instance id.
///
/// Any failure (timeout, non-200, empty body) yields `None`; the caller omits
/// the `InstanceId` dimension for the lifetime of the process.
pub async fn resolve_instance_id(url: &str, timeout: Duration) -> Option<String> {
    let client = match Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "Failed to build metadata client");
            return None;
        }
    };

    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, error = %e, "Instance metadata unavailable, omitting InstanceId");
            return None;
        }
    };

    if response.status() != StatusCode::OK {
        warn!(
            url = %url,
            status = response.status().as_u16(),
            "Instance metadata lookup failed, omitting InstanceId"
        );
        return None;
    }

    match response.text().await {
        Ok(body) if !body.trim().is_empty() => {
            let instance_id = body.trim().to_string();
            info!(instance_id = %instance_id, "Resolved host instance id");
            Some(instance_id)
        }
        Ok(_) => {
            warn!(url = %url, "Instance metadata returned an empty id");
            None
        }
        Err(e) => {
            warn!(url = %url, error = %e, "Failed to read instance metadata response");
            None
        }
    }
}
