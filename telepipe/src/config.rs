//! Service-level configuration read from the environment.

use std::env;

use crate::logs::Severity;

/// Recognized configuration for the pipeline and its demo collaborators.
///
/// Every field has an environment-variable source and a default; values
/// set programmatically (or via [`TelemetryConfig::default`] plus struct
/// update) override the environment.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Logical service name (`SERVICE_NAME`).
    pub service_name: String,
    /// Service version (`SERVICE_VERSION`).
    pub service_version: String,
    /// Deployment environment (`NODE_ENV`), e.g. `development` or `production`.
    pub environment: String,
    /// Base collector endpoint (`OTLP_ENDPOINT`); signal paths are appended.
    pub otlp_endpoint: String,
    /// Bearer token sent with every export request (`OTLP_TOKEN`).
    pub otlp_token: Option<String>,
    /// Fraction of traces retained (`TRACE_SAMPLE_RATIO`, default 1.0).
    pub trace_sample_ratio: f64,
    /// Minimum severity emitted by the logger (`LOG_LEVEL`).
    pub log_level: Severity,
    /// Listen port for the inbound HTTP surface (`PORT`).
    pub port: u16,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            service_name: "unknown_service".to_owned(),
            service_version: "1.0.0".to_owned(),
            environment: "development".to_owned(),
            otlp_endpoint: "http://localhost:4317".to_owned(),
            otlp_token: None,
            trace_sample_ratio: 1.0,
            log_level: Severity::Info,
            port: 3000,
        }
    }
}

impl TelemetryConfig {
    /// Read the configuration from the environment, falling back to
    /// defaults for unset or unparsable values.
    pub fn from_env() -> Self {
        let defaults = TelemetryConfig::default();
        TelemetryConfig {
            service_name: env::var("SERVICE_NAME").unwrap_or(defaults.service_name),
            service_version: env::var("SERVICE_VERSION").unwrap_or(defaults.service_version),
            environment: env::var("NODE_ENV").unwrap_or(defaults.environment),
            otlp_endpoint: env::var("OTLP_ENDPOINT").unwrap_or(defaults.otlp_endpoint),
            otlp_token: env::var("OTLP_TOKEN").ok().filter(|token| !token.is_empty()),
            trace_sample_ratio: env::var("TRACE_SAMPLE_RATIO")
                .ok()
                .and_then(|ratio| ratio.parse::<f64>().ok())
                .map(|ratio| ratio.clamp(0.0, 1.0))
                .unwrap_or(defaults.trace_sample_ratio),
            log_level: env::var("LOG_LEVEL")
                .ok()
                .and_then(|level| level.parse().ok())
                .unwrap_or(defaults.log_level),
            port: env::var("PORT")
                .ok()
                .and_then(|port| port.parse().ok())
                .unwrap_or(defaults.port),
        }
    }

    /// Whether the service runs outside production. Development mode
    /// exposes raw error messages on the error surface.
    pub fn is_development(&self) -> bool {
        self.environment != "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_values_are_parsed() {
        temp_env::with_vars(
            [
                ("SERVICE_NAME", Some("orders")),
                ("SERVICE_VERSION", Some("2.3.1")),
                ("NODE_ENV", Some("production")),
                ("OTLP_ENDPOINT", Some("http://collector:4317")),
                ("OTLP_TOKEN", Some("secret")),
                ("TRACE_SAMPLE_RATIO", Some("0.25")),
                ("LOG_LEVEL", Some("warn")),
                ("PORT", Some("8080")),
            ],
            || {
                let config = TelemetryConfig::from_env();
                assert_eq!(config.service_name, "orders");
                assert_eq!(config.service_version, "2.3.1");
                assert_eq!(config.environment, "production");
                assert_eq!(config.otlp_endpoint, "http://collector:4317");
                assert_eq!(config.otlp_token.as_deref(), Some("secret"));
                assert!((config.trace_sample_ratio - 0.25).abs() < f64::EPSILON);
                assert_eq!(config.log_level, Severity::Warn);
                assert_eq!(config.port, 8080);
                assert!(!config.is_development());
            },
        );
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        temp_env::with_vars(
            [
                ("TRACE_SAMPLE_RATIO", Some("not-a-number")),
                ("LOG_LEVEL", Some("chatty")),
                ("PORT", Some("-1")),
                ("OTLP_TOKEN", Some("")),
            ],
            || {
                let config = TelemetryConfig::from_env();
                assert!((config.trace_sample_ratio - 1.0).abs() < f64::EPSILON);
                assert_eq!(config.log_level, Severity::Info);
                assert_eq!(config.port, 3000);
                assert_eq!(config.otlp_token, None);
            },
        );
    }

    #[test]
    fn sample_ratio_is_clamped() {
        temp_env::with_vars([("TRACE_SAMPLE_RATIO", Some("3.5"))], || {
            let config = TelemetryConfig::from_env();
            assert!((config.trace_sample_ratio - 1.0).abs() < f64::EPSILON);
        });
    }
}
