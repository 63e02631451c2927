use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// One async mutex per project.
///
/// Serializes the record/pointer/retention sequence and explicit deletes for
/// a project within this process.
#[derive(Debug, Clone, Default)]
pub struct ProjectLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl ProjectLocks {
    /// Wait for exclusive access to `project`.
    pub async fn lock(&self, project: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(project.to_owned()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_project_is_exclusive() {
        let locks = ProjectLocks::default();
        let guard = locks.lock("demo").await;

        let contended = tokio::time::timeout(Duration::from_millis(50), locks.lock("demo")).await;
        assert!(contended.is_err());

        drop(guard);
        let _guard = locks.lock("demo").await;
    }

    #[tokio::test]
    async fn different_projects_do_not_contend() {
        let locks = ProjectLocks::default();
        let _demo = locks.lock("demo").await;
        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock("other")).await;
        assert!(other.is_ok());
    }
}
