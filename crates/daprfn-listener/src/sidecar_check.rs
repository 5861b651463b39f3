//! Post-start check that the sidecar will call back to where we listen.
//!
//! Compares the sidecar's `appConnectionProperties` from its metadata API
//! against the listener address. Mismatches are logged, never fatal.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use daprfn_client::DaprClient;

/// Upper bound for the metadata request.
pub const METADATA_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Query the sidecar and log a warning per mismatch. Returns the warnings.
pub async fn check_sidecar_config(client: &DaprClient, app_addr: SocketAddr) -> Vec<String> {
    let client = client.clone().with_timeout(METADATA_CHECK_TIMEOUT);
    let metadata = match client.get_metadata().await {
        Ok(metadata) => metadata,
        Err(e) if e.is_sidecar_unreachable() => {
            debug!(sidecar = client.base_address(), "sidecar not reachable, skipping configuration check");
            return Vec::new();
        }
        Err(e) => {
            warn!(
                sidecar = client.base_address(),
                status = %e.status(),
                error = %e,
                "failed to query the sidecar metadata API"
            );
            return Vec::new();
        }
    };

    let warnings = find_mismatches(&metadata, app_addr);
    for warning in &warnings {
        warn!(sidecar = client.base_address(), "{warning}");
    }
    warnings
}

/// Mismatches between the sidecar's app channel and `app_addr`.
pub fn find_mismatches(metadata: &Value, app_addr: SocketAddr) -> Vec<String> {
    let Some(props) = metadata.get("appConnectionProperties").and_then(Value::as_object) else {
        return Vec::new();
    };

    let mut warnings = Vec::new();

    if let Some(port) = props.get("port").and_then(Value::as_u64) {
        if port != u64::from(app_addr.port()) {
            warnings.push(format!(
                "The Dapr sidecar is configured to call the app on port {port}, but the app is listening on port {}",
                app_addr.port()
            ));
        }
    }

    if let Some(address) = props.get("channelAddress").and_then(Value::as_str) {
        if address != app_addr.ip().to_string() {
            warnings.push(format!(
                "The Dapr sidecar is configured to call the app at address {address}, but the app is listening on {}",
                app_addr.ip()
            ));
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:3001".parse().unwrap()
    }

    #[test]
    fn matching_config_has_no_warnings() {
        let metadata = json!({
            "id": "app",
            "appConnectionProperties": {"port": 3001, "channelAddress": "127.0.0.1", "protocol": "http"}
        });
        assert!(find_mismatches(&metadata, addr()).is_empty());
    }

    #[test]
    fn port_and_address_mismatches_are_reported() {
        let metadata = json!({
            "appConnectionProperties": {"port": 8080, "channelAddress": "10.0.0.5"}
        });
        let warnings = find_mismatches(&metadata, addr());
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("port 8080"));
        assert!(warnings[1].contains("10.0.0.5"));
    }

    #[test]
    fn missing_properties_are_ignored() {
        assert!(find_mismatches(&json!({"id": "app"}), addr()).is_empty());
        assert!(find_mismatches(&json!({"appConnectionProperties": {}}), addr()).is_empty());
        assert!(find_mismatches(&json!({"appConnectionProperties": "bad"}), addr()).is_empty());
    }

    #[tokio::test]
    async fn unreachable_sidecar_yields_nothing() {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let client = DaprClient::new(format!("http://127.0.0.1:{port}"));
        assert!(check_sidecar_config(&client, addr()).await.is_empty());
    }
}
