//! Request/response DTOs for the Empathica API.
//!
//! All API contract types in one module.
//!
//! Conventions:
//! - `*Request`  → deserialized from client JSON body or query params
//! - `*Response` → serialized to client JSON
//! - All validation is expressed via `validator` derive macros; cross-field
//!   rules live in helper impls at the bottom

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::chat::ChatMessage;
use crate::models::user::UserProfile;
use crate::services::assistant::RunStatus;

// ============================================================================
// Common
// ============================================================================

/// Standard success message response
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Standard delete confirmation
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub id: Uuid,
}

// ============================================================================
// Auth
// ============================================================================

/// POST /api/auth/signup
#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(min = 3, max = 30, message = "Username must be 3-30 characters"))]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    #[validate(length(max = 254, message = "Email too long"))]
    pub email: String,

    #[validate(length(min = 8, max = 128, message = "Password must be 8-128 characters"))]
    pub password: String,
}

/// POST /api/auth/login. `identifier` accepts an email address or a username.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Identifier is required"))]
    pub identifier: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// POST /api/auth/refresh
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Response for signup, login, and refresh
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub user: UserSummary,
}

/// Minimal user info returned in auth responses
#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    pub questionnaire_complete: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&UserProfile> for UserSummary {
    fn from(user: &UserProfile) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
            profile_picture: user.profile_picture.clone(),
            questionnaire_complete: user.questionnaire_complete,
            created_at: user.created_at,
        }
    }
}

// ============================================================================
// Profile
// ============================================================================

/// PUT /api/profile: display fields plus the four lists, which are replaced
/// wholesale (the stored lists become exactly what is submitted)
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(min = 3, max = 30, message = "Username must be 3-30 characters"))]
    pub username: String,

    #[validate(length(max = 500, message = "Profile picture URL too long"))]
    pub profile_picture: Option<String>,

    #[validate(length(max = 2000, message = "Description must be under 2000 characters"))]
    pub description: Option<String>,

    pub loves: Vec<String>,
    pub struggles: Vec<String>,
    pub activities: Vec<String>,
    pub fun_facts: Vec<String>,
}

/// POST /api/profile/questionnaire carries the five preference answers. Submitting
/// again overwrites the previous answers; the completion flag is always set.
#[derive(Debug, Deserialize, Validate)]
pub struct QuestionnaireRequest {
    #[validate(length(max = 500, message = "Answer must be under 500 characters"))]
    pub meditation: String,

    #[validate(length(max = 500, message = "Answer must be under 500 characters"))]
    pub journaling: String,

    #[validate(length(max = 500, message = "Answer must be under 500 characters"))]
    pub meals: String,

    #[validate(length(max = 500, message = "Answer must be under 500 characters"))]
    pub sleep: String,

    #[validate(length(max = 500, message = "Answer must be under 500 characters"))]
    pub exercise: String,
}

// ============================================================================
// Journals
// ============================================================================

/// POST /api/journals
#[derive(Debug, Deserialize, Validate)]
pub struct CreateJournalRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: String,

    /// Rich-text HTML from the editor, stored verbatim
    #[validate(length(max = 50000, message = "Entry is too long"))]
    pub description: String,
}

/// PUT /api/journals/{id}, partial update
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateJournalRequest {
    #[validate(length(min = 1, max = 200, message = "Title must be 1-200 characters"))]
    pub title: Option<String>,

    #[validate(length(max = 50000, message = "Entry is too long"))]
    pub description: Option<String>,
}

// ============================================================================
// Meditations
// ============================================================================

/// POST /api/meditations
#[derive(Debug, Deserialize, Validate)]
pub struct CreateMeditationRequest {
    #[validate(length(min = 1, max = 100, message = "Session type must be 1-100 characters"))]
    pub session_type: String,

    pub started_at: DateTime<Utc>,

    /// Absent while the session is still in progress
    pub completed_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Chat
// ============================================================================

/// POST /api/chat/send. Omit `thread_id` to start a new conversation.
#[derive(Debug, Deserialize, Validate)]
pub struct SendMessageRequest {
    pub thread_id: Option<String>,

    #[validate(length(min = 1, max = 4000, message = "Message must be 1-4000 characters"))]
    pub message: String,
}

/// GET /api/chat/runs/{run_id} query params
#[derive(Debug, Deserialize)]
pub struct RunStatusQuery {
    pub thread_id: String,
}

/// Response for GET /api/chat/runs/{run_id}. `message` is present only once
/// the run has completed
#[derive(Debug, Serialize)]
pub struct RunStatusResponse {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Response for GET /api/chat/threads/{thread_id}/messages
#[derive(Debug, Serialize)]
pub struct ThreadMessagesResponse {
    pub thread_id: String,
    pub messages: Vec<ChatMessage>,
}

// ============================================================================
// Validation helpers
// ============================================================================

const MAX_LIST_ITEMS: usize = 50;
const MAX_ITEM_CHARS: usize = 200;

impl UpdateProfileRequest {
    /// List items come from free-form inputs; cap both list length and item
    /// size before they reach the database.
    pub fn validate_lists(&self) -> Result<(), String> {
        for (label, items) in [
            ("loves", &self.loves),
            ("struggles", &self.struggles),
            ("activities", &self.activities),
            ("fun_facts", &self.fun_facts),
        ] {
            if items.len() > MAX_LIST_ITEMS {
                return Err(format!("{} may hold at most {} items", label, MAX_LIST_ITEMS));
            }
            for item in items {
                if item.trim().is_empty() {
                    return Err(format!("{} items must not be empty", label));
                }
                if item.chars().count() > MAX_ITEM_CHARS {
                    return Err(format!(
                        "{} items must be under {} characters",
                        label, MAX_ITEM_CHARS
                    ));
                }
            }
        }
        Ok(())
    }
}

impl UpdateJournalRequest {
    /// A PUT with neither field is a no-op the client never intends.
    pub fn validate_any_field(&self) -> Result<(), String> {
        if self.title.is_none() && self.description.is_none() {
            return Err("Provide a title or a description to update".into());
        }
        Ok(())
    }
}

impl CreateMeditationRequest {
    /// A session cannot finish before it starts.
    pub fn validate_times(&self) -> Result<(), String> {
        if let Some(completed) = self.completed_at {
            if completed < self.started_at {
                return Err("completed_at must not be earlier than started_at".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_lists_reject_oversized_items() {
        let req = UpdateProfileRequest {
            name: "Ana".into(),
            username: "ana".into(),
            profile_picture: None,
            description: None,
            loves: vec!["x".repeat(MAX_ITEM_CHARS + 1)],
            struggles: vec![],
            activities: vec![],
            fun_facts: vec![],
        };
        assert!(req.validate_lists().is_err());
    }

    #[test]
    fn profile_lists_reject_blank_items() {
        let req = UpdateProfileRequest {
            name: "Ana".into(),
            username: "ana".into(),
            profile_picture: None,
            description: None,
            loves: vec![],
            struggles: vec!["   ".into()],
            activities: vec![],
            fun_facts: vec![],
        };
        assert!(req.validate_lists().is_err());
    }

    #[test]
    fn journal_update_needs_at_least_one_field() {
        let req = UpdateJournalRequest {
            title: None,
            description: None,
        };
        assert!(req.validate_any_field().is_err());

        let req = UpdateJournalRequest {
            title: Some("Morning pages".into()),
            description: None,
        };
        assert!(req.validate_any_field().is_ok());
    }

    #[test]
    fn meditation_must_not_complete_before_it_starts() {
        let started = Utc::now();
        let req = CreateMeditationRequest {
            session_type: "breathing".into(),
            started_at: started,
            completed_at: Some(started - chrono::Duration::minutes(5)),
        };
        assert!(req.validate_times().is_err());
    }

    #[test]
    fn run_status_response_omits_message_until_completed() {
        let body = serde_json::to_value(RunStatusResponse {
            status: RunStatus::InProgress,
            message: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "status": "in_progress" }));

        let body = serde_json::to_value(RunStatusResponse {
            status: RunStatus::Completed,
            message: Some("Here for you.".into()),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "status": "completed", "message": "Here for you." })
        );
    }
}
