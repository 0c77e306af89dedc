use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One row per user per calendar day; enforced by UNIQUE (user_id, task_date).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DailyTask {
    pub id: Uuid,
    pub user_id: Uuid,
    pub task_date: NaiveDate,
    pub meditation_completed: bool,
    pub journaling_completed: bool,
    pub meals_completed: bool,
    pub sleep_completed: bool,
    pub exercise_completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The five independently toggleable completion flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskField {
    Meditation,
    Journaling,
    Meals,
    Sleep,
    Exercise,
}

impl TaskField {
    /// Column flipped by a toggle. Static names only; never interpolate
    /// request input into SQL.
    pub fn column(&self) -> &'static str {
        match self {
            TaskField::Meditation => "meditation_completed",
            TaskField::Journaling => "journaling_completed",
            TaskField::Meals => "meals_completed",
            TaskField::Sleep => "sleep_completed",
            TaskField::Exercise => "exercise_completed",
        }
    }

    /// Read this flag off a task row.
    pub fn get(&self, task: &DailyTask) -> bool {
        match self {
            TaskField::Meditation => task.meditation_completed,
            TaskField::Journaling => task.journaling_completed,
            TaskField::Meals => task.meals_completed,
            TaskField::Sleep => task.sleep_completed,
            TaskField::Exercise => task.exercise_completed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ToggleTaskRequest {
    pub field: TaskField,
}
