//! 运行时初始化

use relay_config::AppConfig;
use relay_telemetry::{TelemetryError, init_tracing, init_tracing_json};
use tracing::info;

/// 初始化日志
///
/// 生产环境或显式开启 `telemetry.json` 时输出 JSON，否则输出文本
pub fn init_runtime(config: &AppConfig) -> Result<(), TelemetryError> {
    if use_json_logs(config) {
        init_tracing_json(&config.telemetry.log_level)?;
    } else {
        init_tracing(&config.telemetry.log_level)?;
    }

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        "Runtime initialized"
    );
    Ok(())
}

fn use_json_logs(config: &AppConfig) -> bool {
    config.is_production() || config.telemetry.json
}
