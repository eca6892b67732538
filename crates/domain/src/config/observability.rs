use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Logging and trace export
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `serve` always writes JSON log lines, including one `ch_event` line per
/// pipeline milestone. Spans are additionally exported over OTLP/gRPC when
/// `otlp_endpoint` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "d_log_filter")]
    pub log_filter: String,

    /// e.g. `http://localhost:4317`. Blank counts as unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Fraction of traces exported. Clamped into `0.0..=1.0`.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,
}

impl ObservabilityConfig {
    pub fn otlp_endpoint(&self) -> Option<&str> {
        self.otlp_endpoint.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    pub fn sample_ratio(&self) -> f64 {
        if self.sample_rate.is_nan() {
            return 1.0;
        }
        self.sample_rate.clamp(0.0, 1.0)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: d_log_filter(),
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
        }
    }
}

fn d_log_filter() -> String {
    "info,ch_gateway=debug,ch_worker=debug".into()
}

fn d_service_name() -> String {
    "chorus".into()
}

fn d_sample_rate() -> f64 {
    1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_is_off_by_default() {
        let cfg: ObservabilityConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.otlp_endpoint(), None);
        assert_eq!(cfg.service_name, "chorus");
        assert!(cfg.log_filter.contains("ch_worker=debug"));
    }

    #[test]
    fn blank_endpoint_is_unset() {
        let cfg: ObservabilityConfig = toml::from_str(r#"otlp_endpoint = "  ""#).unwrap();
        assert_eq!(cfg.otlp_endpoint(), None);
    }

    #[test]
    fn sample_ratio_is_clamped() {
        let mut cfg = ObservabilityConfig {
            otlp_endpoint: Some("http://collector:4317".into()),
            sample_rate: 2.5,
            ..Default::default()
        };
        assert_eq!(cfg.otlp_endpoint(), Some("http://collector:4317"));
        assert!((cfg.sample_ratio() - 1.0).abs() < f64::EPSILON);

        cfg.sample_rate = -0.3;
        assert_eq!(cfg.sample_ratio(), 0.0);
        cfg.sample_rate = 0.25;
        assert!((cfg.sample_ratio() - 0.25).abs() < f64::EPSILON);
    }
}
