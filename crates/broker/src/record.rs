use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Lifecycle state of a supervised child (§3, §4.C state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildStatus {
    Spawning,
    Running,
    Exited,
    Killed,
    Failed,
}

/// Auto-restart policy for a child record.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub auto_restart: bool,
    /// `-1` means unbounded.
    pub max_restarts: i64,
}

impl RestartPolicy {
    pub fn none() -> Self {
        Self {
            auto_restart: false,
            max_restarts: 0,
        }
    }

    /// Whether another restart is still permitted given `restart_count` restarts so far.
    pub fn allows(&self, restart_count: u32) -> bool {
        self.auto_restart && (self.max_restarts < 0 || (restart_count as i64) < self.max_restarts)
    }
}

/// The supervisor's record of one child (§3 "Child record").
#[derive(Debug, Clone, Serialize)]
pub struct ChildRecord {
    pub process_id: String,
    pub command: String,
    pub argv: Vec<String>,
    #[serde(skip)]
    pub env: HashMap<String, String>,
    pub rpc_enabled: bool,
    #[serde(skip)]
    pub restart_policy: RestartPolicy,
    pub pid: Option<u32>,
    pub status: ChildStatus,
    pub restart_count: u32,
    pub last_exit_code: Option<i32>,
    pub started_at: Option<u64>,
    pub ended_at: Option<u64>,
}

impl ChildRecord {
    pub fn new(
        process_id: String,
        command: String,
        argv: Vec<String>,
        env: HashMap<String, String>,
        rpc_enabled: bool,
        restart_policy: RestartPolicy,
    ) -> Self {
        Self {
            process_id,
            command,
            argv,
            env,
            rpc_enabled,
            restart_policy,
            pid: None,
            status: ChildStatus::Spawning,
            restart_count: 0,
            last_exit_code: None,
            started_at: None,
            ended_at: None,
        }
    }

    pub fn mark_running(&mut self, pid: u32) {
        self.pid = Some(pid);
        self.status = ChildStatus::Running;
        self.started_at = Some(now_millis());
    }

    pub fn mark_terminal(&mut self, status: ChildStatus, exit_code: Option<i32>) {
        debug_assert!(matches!(
            status,
            ChildStatus::Exited | ChildStatus::Killed | ChildStatus::Failed
        ));
        self.status = status;
        self.last_exit_code = exit_code;
        self.ended_at = Some(now_millis());
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_policy_always_allows_restart() {
        let policy = RestartPolicy {
            auto_restart: true,
            max_restarts: -1,
        };
        assert!(policy.allows(0));
        assert!(policy.allows(10_000));
    }

    #[test]
    fn bounded_policy_stops_after_max_restarts() {
        let policy = RestartPolicy {
            auto_restart: true,
            max_restarts: 2,
        };
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }

    #[test]
    fn disabled_policy_never_allows_restart() {
        assert!(!RestartPolicy::none().allows(0));
    }

    #[test]
    fn mark_running_then_terminal_stamps_timestamps() {
        let mut record = ChildRecord::new(
            "echo-1".into(),
            "echo".into(),
            vec!["hi".into()],
            HashMap::new(),
            false,
            RestartPolicy::none(),
        );
        assert_eq!(record.status, ChildStatus::Spawning);
        record.mark_running(123);
        assert_eq!(record.status, ChildStatus::Running);
        assert_eq!(record.pid, Some(123));
        assert!(record.started_at.is_some());
        record.mark_terminal(ChildStatus::Exited, Some(0));
        assert_eq!(record.status, ChildStatus::Exited);
        assert_eq!(record.last_exit_code, Some(0));
        assert!(record.ended_at.is_some());
    }
}
