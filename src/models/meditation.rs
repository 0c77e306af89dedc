use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only meditation session log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Meditation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Meditation {
    /// A session is in progress until completed_at is set.
    pub fn in_progress(&self) -> bool {
        self.completed_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_until_completed() {
        let mut m = Meditation {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            session_type: "one_minute".into(),
            started_at: Utc::now(),
            completed_at: None,
            created_at: Utc::now(),
        };
        assert!(m.in_progress());
        m.completed_at = Some(Utc::now());
        assert!(!m.in_progress());
    }
}
