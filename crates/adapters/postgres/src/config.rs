//! PostgreSQL 配置模块
//!
//! 连接池大小、超时与连接建立时的重试设置

use std::time::Duration;

use relay_common::RetryConfig;

/// PostgreSQL 配置
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// 数据库 URL
    pub url: String,
    /// 最小连接数
    pub pool_min: u32,
    /// 最大连接数
    pub pool_max: u32,
    /// 获取连接超时
    pub acquire_timeout: Duration,
    /// 空闲超时
    pub idle_timeout: Duration,
    /// 连接最大生命周期
    pub max_lifetime: Option<Duration>,
    /// 建立连接池时的重试（仅针对连接类错误）
    pub connect_retry: RetryConfig,
    /// 应用名称（用于连接标识）
    pub application_name: Option<String>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_min: 1,
            pool_max: 10,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Some(Duration::from_secs(1800)),
            connect_retry: RetryConfig::default(),
            application_name: None,
        }
    }
}

impl PostgresConfig {
    /// 从 URL 创建配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置连接池配置
    pub fn with_pool(mut self, min: u32, max: u32) -> Self {
        self.pool_min = min;
        self.pool_max = max.max(1);
        self
    }

    /// 设置获取连接超时
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// 设置建立连接时的重试配置
    pub fn with_connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }

    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    /// URL 中的用户名（用于错误提示）
    pub fn username(&self) -> Option<&str> {
        let rest = self.url.split_once("://")?.1;
        let (userinfo, _) = rest.split_once('@')?;
        let user = userinfo.split(':').next()?;
        if user.is_empty() { None } else { Some(user) }
    }

    /// 获取带连接参数的 URL
    pub fn connection_url(&self) -> String {
        match self.application_name {
            Some(ref app_name) => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}application_name={}", self.url, separator, app_name)
            }
            None => self.url.clone(),
        }
    }
}
