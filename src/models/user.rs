use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub profile_picture: Option<String>,
    pub description: Option<String>,
    pub meditation: Option<String>,
    pub journaling: Option<String>,
    pub meals: Option<String>,
    pub sleep: Option<String>,
    pub exercise: Option<String>,
    pub questionnaire_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry in an ordered profile list (loves, struggles, activities,
/// fun facts). Lists are replaced wholesale on profile edit.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProfileItem {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: ProfileItemKind,
    pub content: String,
    pub position: i32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "profile_item_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProfileItemKind {
    Loves,
    Struggles,
    Activities,
    FunFacts,
}

/// Profile with the four lists flattened to plain strings, the shape the
/// profile page consumes and the only view the chat orchestrator reads when
/// building first-turn context.
#[derive(Debug, Clone, Serialize)]
pub struct FullProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub username: String,
    pub profile_picture: Option<String>,
    pub description: Option<String>,
    pub meditation: Option<String>,
    pub journaling: Option<String>,
    pub meals: Option<String>,
    pub sleep: Option<String>,
    pub exercise: Option<String>,
    pub questionnaire_complete: bool,
    pub loves: Vec<String>,
    pub struggles: Vec<String>,
    pub activities: Vec<String>,
    pub fun_facts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FullProfile {
    /// Items must arrive ordered by (kind, position); the query in the
    /// profile handler guarantees that.
    pub fn assemble(user: UserProfile, items: Vec<ProfileItem>) -> Self {
        let mut loves = Vec::new();
        let mut struggles = Vec::new();
        let mut activities = Vec::new();
        let mut fun_facts = Vec::new();

        for item in items {
            match item.kind {
                ProfileItemKind::Loves => loves.push(item.content),
                ProfileItemKind::Struggles => struggles.push(item.content),
                ProfileItemKind::Activities => activities.push(item.content),
                ProfileItemKind::FunFacts => fun_facts.push(item.content),
            }
        }

        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            username: user.username,
            profile_picture: user.profile_picture,
            description: user.description,
            meditation: user.meditation,
            journaling: user.journaling,
            meals: user.meals,
            sleep: user.sleep,
            exercise: user.exercise,
            questionnaire_complete: user.questionnaire_complete,
            loves,
            struggles,
            activities,
            fun_facts,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserProfile {
        UserProfile {
            id: Uuid::new_v4(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            username: "ada".into(),
            password_hash: "x".into(),
            profile_picture: None,
            description: None,
            meditation: None,
            journaling: None,
            meals: None,
            sleep: None,
            exercise: None,
            questionnaire_complete: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn assemble_partitions_items_by_kind() {
        let u = user();
        let uid = u.id;
        let item = |kind, content: &str, position| ProfileItem {
            id: Uuid::new_v4(),
            user_id: uid,
            kind,
            content: content.into(),
            position,
        };

        let full = FullProfile::assemble(
            u,
            vec![
                item(ProfileItemKind::Loves, "hiking", 0),
                item(ProfileItemKind::FunFacts, "plays theremin", 0),
                item(ProfileItemKind::Loves, "tea", 1),
            ],
        );

        assert_eq!(full.loves, vec!["hiking", "tea"]);
        assert_eq!(full.fun_facts, vec!["plays theremin"]);
        assert!(full.struggles.is_empty());
        assert!(full.activities.is_empty());
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let json = serde_json::to_value(user()).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["email"], "ada@example.com");
    }

    #[test]
    fn item_kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&ProfileItemKind::FunFacts).unwrap(),
            "\"fun_facts\""
        );
        let kind: ProfileItemKind = serde_json::from_str("\"loves\"").unwrap();
        assert_eq!(kind, ProfileItemKind::Loves);
    }
}
