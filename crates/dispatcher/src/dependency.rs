use std::collections::{HashMap, HashSet};

use grid_core::{GridError, GridResult};
use tracing::debug;

/// 作业依赖图
///
/// 队列持锁调用，内部不再加锁。作业注册时声明它依赖的
/// 作业uuid，全部依赖完成前该作业不参与分发。指向尚未
/// 提交作业的依赖视为未满足，等那个作业提交并完成。
#[derive(Debug, Default)]
pub struct DependencyManager {
    /// 已完成的作业uuid
    completed: HashSet<String>,
    /// 作业 → 尚未满足的依赖
    unmet: HashMap<String, HashSet<String>>,
    /// 依赖 → 等待它的作业
    dependents: HashMap<String, HashSet<String>>,
}

impl DependencyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册作业及其依赖，检出环时整体拒绝
    pub fn register(&mut self, uuid: &str, dependencies: &[String]) -> GridResult<()> {
        let pending: HashSet<String> = dependencies
            .iter()
            .filter(|d| !self.completed.contains(*d))
            .cloned()
            .collect();

        if self.would_cycle(uuid, &pending) {
            return Err(GridError::CircularDependency);
        }

        for dep in &pending {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(uuid.to_string());
        }
        if !pending.is_empty() {
            debug!("作业 {uuid} 等待 {} 个依赖", pending.len());
            self.unmet.insert(uuid.to_string(), pending);
        }
        Ok(())
    }

    /// 新边 `uuid → pending` 是否会把依赖图连成环
    fn would_cycle(&self, uuid: &str, pending: &HashSet<String>) -> bool {
        let mut stack: Vec<&str> = pending.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == uuid {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(next) = self.unmet.get(current) {
                stack.extend(next.iter().map(String::as_str));
            }
        }
        false
    }

    pub fn is_blocked(&self, uuid: &str) -> bool {
        self.unmet.contains_key(uuid)
    }

    /// 标记作业完成，返回因此解除阻塞的作业uuid
    pub fn mark_complete(&mut self, uuid: &str) -> Vec<String> {
        self.completed.insert(uuid.to_string());
        self.unmet.remove(uuid);

        let mut released = Vec::new();
        if let Some(waiters) = self.dependents.remove(uuid) {
            for waiter in waiters {
                if let Some(pending) = self.unmet.get_mut(&waiter) {
                    pending.remove(uuid);
                    if pending.is_empty() {
                        self.unmet.remove(&waiter);
                        released.push(waiter);
                    }
                }
            }
        }
        if !released.is_empty() {
            debug!("作业 {uuid} 完成，解除 {} 个作业的阻塞", released.len());
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_dependencies_not_blocked() {
        let mut mgr = DependencyManager::new();
        mgr.register("a", &[]).unwrap();
        assert!(!mgr.is_blocked("a"));
    }

    #[test]
    fn test_blocked_until_dependency_completes() {
        let mut mgr = DependencyManager::new();
        mgr.register("a", &[]).unwrap();
        mgr.register("b", &["a".to_string()]).unwrap();
        assert!(mgr.is_blocked("b"));

        let released = mgr.mark_complete("a");
        assert_eq!(released, vec!["b".to_string()]);
        assert!(!mgr.is_blocked("b"));
    }

    #[test]
    fn test_dependency_on_already_completed_job() {
        let mut mgr = DependencyManager::new();
        mgr.register("a", &[]).unwrap();
        mgr.mark_complete("a");
        mgr.register("b", &["a".to_string()]).unwrap();
        assert!(!mgr.is_blocked("b"));
    }

    #[test]
    fn test_cycle_rejected() {
        let mut mgr = DependencyManager::new();
        mgr.register("a", &["b".to_string()]).unwrap();
        mgr.register("b", &["c".to_string()]).unwrap();
        assert!(matches!(
            mgr.register("c", &["a".to_string()]),
            Err(GridError::CircularDependency)
        ));
        // 被拒绝的注册不留痕迹
        assert!(!mgr.is_blocked("c"));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let mut mgr = DependencyManager::new();
        mgr.register("top", &[]).unwrap();
        mgr.register("left", &["top".to_string()]).unwrap();
        mgr.register("right", &["top".to_string()]).unwrap();
        mgr.register("bottom", &["left".to_string(), "right".to_string()])
            .unwrap();

        mgr.mark_complete("top");
        mgr.mark_complete("left");
        assert!(mgr.is_blocked("bottom"));
        let released = mgr.mark_complete("right");
        assert_eq!(released, vec!["bottom".to_string()]);
    }

    #[test]
    fn test_dependency_on_unknown_job_blocks() {
        let mut mgr = DependencyManager::new();
        mgr.register("b", &["ghost".to_string()]).unwrap();
        assert!(mgr.is_blocked("b"));
        mgr.mark_complete("ghost");
        assert!(!mgr.is_blocked("b"));
    }
}
