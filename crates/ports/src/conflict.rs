//! 串行化冲突判定策略

/// 判断驱动错误是否为串行化冲突
///
/// 由存储适配器注入，执行器只看已分类的 `AppError::TransientConflict`
pub trait ConflictClassifier<E: ?Sized>: Send + Sync {
    fn is_serialization_conflict(&self, error: &E) -> bool;
}

/// 从闭包构造的冲突判定策略
pub struct FnClassifier<F>(pub F);

impl<E: ?Sized, F> ConflictClassifier<E> for FnClassifier<F>
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_serialization_conflict(&self, error: &E) -> bool {
        (self.0)(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_classifier() {
        let classifier = FnClassifier(|e: &str| e.contains("could not serialize"));

        assert!(classifier.is_serialization_conflict(
            "could not serialize access due to read/write dependencies"
        ));
        assert!(!classifier.is_serialization_conflict("duplicate key value"));
    }
}
