//! sqlx 错误分类
//!
//! 按 SQLSTATE 判定串行化冲突，并将驱动错误映射为 `AppError`

use relay_errors::AppError;
use relay_ports::ConflictClassifier;

/// serialization_failure
pub const SERIALIZATION_FAILURE: &str = "40001";
/// deadlock_detected
pub const DEADLOCK_DETECTED: &str = "40P01";

/// 基于 SQLSTATE 的冲突判定
///
/// 默认只把 `40001` 视为串行化冲突
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlStateClassifier {
    codes: Vec<String>,
}

impl Default for SqlStateClassifier {
    fn default() -> Self {
        Self {
            codes: vec![SERIALIZATION_FAILURE.to_string()],
        }
    }
}

impl SqlStateClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把死锁也视为可重试冲突
    pub fn with_deadlocks(mut self) -> Self {
        if !self.codes.iter().any(|c| c == DEADLOCK_DETECTED) {
            self.codes.push(DEADLOCK_DETECTED.to_string());
        }
        self
    }

    /// 替换 SQLSTATE 集合
    pub fn with_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    fn matches(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }
}

/// 提取数据库错误的 SQLSTATE
pub fn sqlstate(error: &sqlx::Error) -> Option<String> {
    match error {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

impl ConflictClassifier<sqlx::Error> for SqlStateClassifier {
    fn is_serialization_conflict(&self, error: &sqlx::Error) -> bool {
        sqlstate(error).is_some_and(|code| self.matches(&code))
    }
}

impl ConflictClassifier<str> for SqlStateClassifier {
    fn is_serialization_conflict(&self, code: &str) -> bool {
        self.matches(code)
    }
}

/// 将 sqlx 错误映射为 `AppError`
///
/// - 冲突判定命中：`TransientConflict`
/// - 连接 / 连接池错误：`Resource`
/// - 其他：`Database`
pub fn classify_sqlx_error(
    classifier: &dyn ConflictClassifier<sqlx::Error>,
    error: sqlx::Error,
    context: &str,
) -> AppError {
    if classifier.is_serialization_conflict(&error) {
        return AppError::transient_conflict(format!("{}: {}", context, error));
    }

    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => AppError::resource(format!("{}: {}", context, error)),
        _ => AppError::database(format!("{}: {}", context, error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_errors::ErrorKind;
    use relay_ports::FnClassifier;

    #[test]
    fn test_default_codes() {
        let classifier = SqlStateClassifier::default();
        assert!(classifier.is_serialization_conflict(SERIALIZATION_FAILURE));
        assert!(!classifier.is_serialization_conflict(DEADLOCK_DETECTED));
        assert!(!classifier.is_serialization_conflict("23505"));
    }

    #[test]
    fn test_with_deadlocks() {
        let classifier = SqlStateClassifier::new().with_deadlocks().with_deadlocks();
        assert_eq!(classifier.codes().len(), 2);
        assert!(classifier.is_serialization_conflict(DEADLOCK_DETECTED));
    }

    #[test]
    fn test_with_codes_replaces() {
        let classifier = SqlStateClassifier::new().with_codes(["40P01"]);
        assert!(!classifier.is_serialization_conflict(SERIALIZATION_FAILURE));
        assert!(classifier.is_serialization_conflict(DEADLOCK_DETECTED));
    }

    #[test]
    fn test_non_database_errors_have_no_sqlstate() {
        let classifier = SqlStateClassifier::default();
        assert_eq!(sqlstate(&sqlx::Error::RowNotFound), None);
        assert!(!classifier.is_serialization_conflict(&sqlx::Error::PoolTimedOut));
    }

    #[test]
    fn test_resource_errors() {
        let classifier = SqlStateClassifier::default();

        let err = classify_sqlx_error(&classifier, sqlx::Error::PoolTimedOut, "begin transaction");
        assert_eq!(err.kind(), ErrorKind::Resource);

        let err = classify_sqlx_error(&classifier, sqlx::Error::PoolClosed, "begin transaction");
        assert_eq!(err.kind(), ErrorKind::Resource);

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err = classify_sqlx_error(&classifier, sqlx::Error::Io(io), "commit");
        assert_eq!(err.kind(), ErrorKind::Resource);
    }

    #[test]
    fn test_other_errors_are_database() {
        let classifier = SqlStateClassifier::default();
        let err = classify_sqlx_error(&classifier, sqlx::Error::RowNotFound, "select job");
        assert!(matches!(err, AppError::Database(ref msg) if msg.starts_with("select job")));
    }

    #[test]
    fn test_injected_classifier_decides_conflicts() {
        let always = FnClassifier(|_: &sqlx::Error| true);
        let err = classify_sqlx_error(&always, sqlx::Error::RowNotFound, "commit");
        assert!(err.is_transient_conflict());
    }
}
