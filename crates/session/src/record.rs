use serde::{Deserialize, Serialize};

/// A session's lifecycle state (§4.G). `Stopped` is terminal; a stopped session is removed
/// from memory entirely rather than kept around in this state (see [`crate::controller`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Paused,
    Stopped,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped)
    }
}

/// The durable record the controller checkpoints on every state transition and every counter
/// update (§4.G persistence & recovery).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub state: SessionState,
    pub start_index: u64,
    pub results_per_batch: u32,
    pub fetched_count: u64,
    pub stored_count: u64,
    pub error_count: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SessionRecord {
    pub fn new(session_id: String, start_index: u64, results_per_batch: u32, now: u64) -> Self {
        Self {
            session_id,
            state: SessionState::Running,
            start_index,
            results_per_batch,
            fetched_count: 0,
            stored_count: 0,
            error_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_running_with_zeroed_counters() {
        let record = SessionRecord::new("s1".to_string(), 0, 50, 1_000);
        assert_eq!(record.state, SessionState::Running);
        assert_eq!(record.fetched_count, 0);
        assert_eq!(record.created_at, 1_000);
        assert_eq!(record.updated_at, 1_000);
    }

    #[test]
    fn only_stopped_is_terminal() {
        assert!(!SessionState::Running.is_terminal());
        assert!(!SessionState::Paused.is_terminal());
        assert!(SessionState::Stopped.is_terminal());
    }
}
