//! relay-telemetry - 可观测性库
//!
//! tracing 日志初始化与 Prometheus 指标导出。`RUST_LOG` 优先于配置的日志级别。

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Failed to install tracing subscriber: {0}")]
    Tracing(String),

    #[error("Failed to install Prometheus recorder: {0}")]
    Metrics(String),
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// 初始化 tracing
pub fn init_tracing(log_level: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| TelemetryError::Tracing(e.to_string()))
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(log_level: &str) -> Result<(), TelemetryError> {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| TelemetryError::Tracing(e.to_string()))
}

/// 初始化 Prometheus metrics
pub fn init_metrics() -> Result<PrometheusHandle, TelemetryError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Metrics(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_returns_error() {
        // 第一次可能因其他测试已初始化而失败，第二次必定失败
        let _ = init_tracing("debug");
        assert!(matches!(
            init_tracing_json("info"),
            Err(TelemetryError::Tracing(_))
        ));
    }

    #[test]
    fn test_metrics_handle_renders_recorded_counters() {
        let handle = init_metrics().unwrap();
        metrics::counter!("outbox_serialization_retries_total").increment(1);

        assert!(handle.render().contains("outbox_serialization_retries_total"));
        assert!(matches!(init_metrics(), Err(TelemetryError::Metrics(_))));
    }
}
