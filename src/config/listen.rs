//! Endpoint listener configuration.

use serde::Deserialize;

/// Maximum length of a listen parameter string (`"[host]:port"`), per the
/// external interface contract.
pub const MAX_LISTEN_PARAM_SZ: usize = 32;

/// Configuration for one [`crate::network::Endpoint`].
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Listen parameters, `"[host]:port"` style, e.g. `":8817"` or
    /// `"127.0.0.1:8817"`.
    pub listen: String,
    /// Human-readable label used in logs and the `LISTENING`/`DROPPED`
    /// notification, e.g. `"public"`.
    #[serde(default)]
    pub label: Option<String>,
}

/// Normalize a listen parameter string into a bindable socket address,
/// filling in the default host (`0.0.0.0`) when only a port is given.
///
/// Accepts `":8817"`, `"8817"`, or a full `"host:port"` string.
pub fn normalize_listen_params(raw: &str) -> Result<String, String> {
    if raw.len() > MAX_LISTEN_PARAM_SZ {
        return Err(format!(
            "listen parameter string {raw:?} exceeds {MAX_LISTEN_PARAM_SZ} bytes"
        ));
    }

    let raw = raw.trim();
    if let Some(port) = raw.strip_prefix(':') {
        validate_port(port)?;
        return Ok(format!("0.0.0.0:{port}"));
    }
    if raw.chars().all(|c| c.is_ascii_digit()) && !raw.is_empty() {
        validate_port(raw)?;
        return Ok(format!("0.0.0.0:{raw}"));
    }
    if raw.contains(':') {
        return Ok(raw.to_string());
    }
    Err(format!("listen parameter string {raw:?} has no port"))
}

fn validate_port(port: &str) -> Result<(), String> {
    port.parse::<u16>()
        .map(|_| ())
        .map_err(|_| format!("invalid port {port:?}"))
}
