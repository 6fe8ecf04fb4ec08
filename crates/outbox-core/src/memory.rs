//! 进程内存储与消息通道
//!
//! `InMemoryStore` 是带版本号的键值表：读集在提交时做乐观校验，
//! 以此模拟 SERIALIZABLE 下的串行化冲突。连接池用信号量表示。
//! 两者都支持故障注入，用于测试与本地开发。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_errors::{AppError, AppResult};
use relay_ports::{
    ChannelPublisher, IsolationLevel, OutboxMessage, StoreTransaction, TransactionOptions,
    TransactionalStore,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

const DEFAULT_POOL_SIZE: usize = 10;
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// 存储统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub begun: u64,
    pub committed: u64,
    pub rolled_back: u64,
    pub rollback_failures: u64,
    pub conflicts: u64,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_begin: bool,
    conflicting_commits: u32,
    fail_rollbacks: bool,
}

#[derive(Debug, Clone)]
struct Versioned {
    value: Option<String>,
    version: u64,
}

#[derive(Debug, Default)]
struct Table {
    rows: HashMap<String, Versioned>,
    commit_seq: u64,
}

impl Table {
    fn version_of(&self, key: &str) -> u64 {
        self.rows.get(key).map(|row| row.version).unwrap_or(0)
    }
}

struct Shared {
    table: Mutex<Table>,
    pool: Arc<Semaphore>,
    pool_size: usize,
    acquire_timeout: Duration,
    faults: Mutex<Faults>,
    stats: Mutex<StoreStats>,
    last_isolation: Mutex<Option<IsolationLevel>>,
}

/// 进程内事务型存储
#[derive(Clone)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_pool(DEFAULT_POOL_SIZE, DEFAULT_ACQUIRE_TIMEOUT)
    }

    /// 指定连接池大小与签出超时
    pub fn with_pool(pool_size: usize, acquire_timeout: Duration) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(Table::default()),
                pool: Arc::new(Semaphore::new(pool_size)),
                pool_size,
                acquire_timeout,
                faults: Mutex::new(Faults::default()),
                stats: Mutex::new(StoreStats::default()),
                last_isolation: Mutex::new(None),
            }),
        }
    }

    /// 写入已提交数据（绕过事务）
    pub fn seed(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut table = self.shared.table.lock();
        table.commit_seq += 1;
        let version = table.commit_seq;
        table.rows.insert(
            key.into(),
            Versioned {
                value: Some(value.into()),
                version,
            },
        );
    }

    /// 读取已提交数据
    pub fn get(&self, key: &str) -> Option<String> {
        self.shared
            .table
            .lock()
            .rows
            .get(key)
            .and_then(|row| row.value.clone())
    }

    pub fn stats(&self) -> StoreStats {
        self.shared.stats.lock().clone()
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool_size
    }

    /// 当前被签出的连接数
    pub fn checked_out(&self) -> usize {
        self.shared.pool_size - self.shared.pool.available_permits()
    }

    /// 最近一次 begin 使用的隔离级别
    pub fn last_isolation_level(&self) -> Option<IsolationLevel> {
        *self.shared.last_isolation.lock()
    }

    /// 下一次 begin 以连接错误失败
    pub fn fail_next_begin(&self) {
        self.shared.faults.lock().fail_next_begin = true;
    }

    /// 接下来的 n 次提交以串行化冲突失败
    pub fn conflict_on_next_commits(&self, n: u32) {
        self.shared.faults.lock().conflicting_commits = n;
    }

    /// 回滚是否失败（连接仍会归还）
    pub fn fail_rollbacks(&self, enabled: bool) {
        self.shared.faults.lock().fail_rollbacks = enabled;
    }
}

#[async_trait]
impl TransactionalStore for InMemoryStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self, options: &TransactionOptions) -> AppResult<Self::Transaction> {
        let fail = std::mem::take(&mut self.shared.faults.lock().fail_next_begin);
        if fail {
            return Err(AppError::resource("connection refused"));
        }

        let permit = tokio::time::timeout(
            self.shared.acquire_timeout,
            self.shared.pool.clone().acquire_owned(),
        )
        .await
        .map_err(|_| AppError::resource("pool timed out while waiting for an open connection"))?
        .map_err(|_| AppError::resource("attempted to acquire a connection on a closed pool"))?;

        *self.shared.last_isolation.lock() = Some(options.isolation_level);
        self.shared.stats.lock().begun += 1;
        debug!(isolation = ?options.isolation_level, "In-memory transaction started");

        Ok(MemoryTransaction {
            shared: self.shared.clone(),
            options: options.clone(),
            reads: HashMap::new(),
            writes: BTreeMap::new(),
            savepoints: Vec::new(),
            finished: false,
            _permit: permit,
        })
    }
}

/// 进程内存储事务
///
/// 持有一个连接池许可，事务结束或被丢弃时归还
pub struct MemoryTransaction {
    shared: Arc<Shared>,
    options: TransactionOptions,
    /// 首次读取时看到的版本号
    reads: HashMap<String, u64>,
    /// 未提交的写入，None 表示删除
    writes: BTreeMap<String, Option<String>>,
    savepoints: Vec<(String, BTreeMap<String, Option<String>>)>,
    finished: bool,
    _permit: OwnedSemaphorePermit,
}

impl MemoryTransaction {
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// 读取：优先返回本事务的写入
    pub fn get(&mut self, key: &str) -> Option<String> {
        if let Some(pending) = self.writes.get(key) {
            return pending.clone();
        }

        let table = self.shared.table.lock();
        self.reads
            .entry(key.to_string())
            .or_insert_with(|| table.version_of(key));
        table.rows.get(key).and_then(|row| row.value.clone())
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> AppResult<()> {
        self.ensure_writable()?;
        self.writes.insert(key.into(), Some(value.into()));
        Ok(())
    }

    pub fn delete(&mut self, key: impl Into<String>) -> AppResult<()> {
        self.ensure_writable()?;
        self.writes.insert(key.into(), None);
        Ok(())
    }

    fn ensure_writable(&self) -> AppResult<()> {
        if self.options.is_read_only() {
            return Err(AppError::database(
                "cannot execute write in a read-only transaction",
            ));
        }
        Ok(())
    }

    fn savepoint_index(&self, name: &str) -> AppResult<usize> {
        self.savepoints
            .iter()
            .rposition(|(sp, _)| sp == name)
            .ok_or_else(|| AppError::database(format!("savepoint \"{name}\" does not exist")))
    }

    /// 读集中是否有键已被并发事务改写
    fn stale_reads(&self, table: &Table) -> Vec<String> {
        self.reads
            .iter()
            .filter(|(key, version)| table.version_of(key) != **version)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn savepoint(&mut self, name: &str) -> AppResult<()> {
        self.savepoints.push((name.to_string(), self.writes.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> AppResult<()> {
        let index = self.savepoint_index(name)?;
        self.writes = self.savepoints[index].1.clone();
        // savepoint 本身在回滚后仍然存在
        self.savepoints.truncate(index + 1);
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> AppResult<()> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    async fn commit(mut self) -> AppResult<()> {
        self.finished = true;

        let injected = {
            let mut faults = self.shared.faults.lock();
            if faults.conflicting_commits > 0 {
                faults.conflicting_commits -= 1;
                true
            } else {
                false
            }
        };
        if injected {
            self.shared.stats.lock().conflicts += 1;
            return Err(AppError::transient_conflict(
                "could not serialize access due to read/write dependencies among transactions",
            ));
        }

        {
            let mut table = self.shared.table.lock();

            if self.options.isolation_level == IsolationLevel::Serializable {
                let stale = self.stale_reads(&table);
                if !stale.is_empty() {
                    drop(table);
                    self.shared.stats.lock().conflicts += 1;
                    debug!(keys = ?stale, "In-memory serialization conflict");
                    return Err(AppError::transient_conflict(format!(
                        "could not serialize access due to concurrent update of {}",
                        stale.join(", ")
                    )));
                }
            }

            if !self.writes.is_empty() {
                table.commit_seq += 1;
                let version = table.commit_seq;
                let keys = self.writes.len();
                for (key, value) in std::mem::take(&mut self.writes) {
                    table.rows.insert(key, Versioned { value, version });
                }
                debug!(keys, version, "In-memory transaction applied");
            }
        }

        self.shared.stats.lock().committed += 1;
        Ok(())
    }

    async fn rollback(mut self) -> AppResult<()> {
        self.finished = true;

        if self.shared.faults.lock().fail_rollbacks {
            self.shared.stats.lock().rollback_failures += 1;
            return Err(AppError::database("rollback failed: connection lost"));
        }

        self.shared.stats.lock().rolled_back += 1;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!("In-memory transaction dropped without commit, discarding writes");
            self.shared.stats.lock().rolled_back += 1;
        }
    }
}

#[derive(Default)]
struct Recording {
    published: Vec<OutboxMessage>,
    calls: usize,
    failing: HashSet<String>,
}

/// 记录所有发布调用的消息通道
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之后发往该频道的消息都返回错误
    pub fn fail_channel(&self, channel: impl Into<String>) {
        self.inner.lock().failing.insert(channel.into());
    }

    /// 成功发布的消息（按发布顺序）
    pub fn published(&self) -> Vec<OutboxMessage> {
        self.inner.lock().published.clone()
    }

    pub fn published_pairs(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .published
            .iter()
            .map(|m| (m.channel.clone(), m.payload.clone()))
            .collect()
    }

    /// 发布调用次数（含失败）
    pub fn calls(&self) -> usize {
        self.inner.lock().calls
    }
}

#[async_trait]
impl ChannelPublisher for RecordingPublisher {
    async fn publish(&self, channel: &str, message: &str) -> AppResult<()> {
        let mut inner = self.inner.lock();
        inner.calls += 1;

        if inner.failing.contains(channel) {
            return Err(AppError::resource(format!("channel {channel} unavailable")));
        }

        inner.published.push(OutboxMessage::new(channel, message));
        Ok(())
    }
}
