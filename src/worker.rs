//! The worker record and the shape clients send to create or update one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored worker row.
///
/// `username` is the primary key and never changes after creation. The
/// timestamps and `version` are managed by the store: `version` starts at 1
/// and is bumped by every update and by the soft delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Worker {
    pub username: String,
    #[serde(rename = "firstname")]
    pub first_name: String,
    #[serde(rename = "lastname")]
    pub last_name: String,
    pub city: String,
    pub division: String,
    pub position: String,
    pub salary: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker. Rows with a value here are invisible to normal reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub version: i32,
}

/// Client-supplied worker fields. Any of them may be omitted.
///
/// System-managed fields in the body (`created_at`, `version`, ...) are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerInput {
    pub username: String,
    #[serde(rename = "firstname")]
    pub first_name: String,
    #[serde(rename = "lastname")]
    pub last_name: String,
    pub city: String,
    pub division: String,
    pub position: String,
    pub salary: i64,
}

impl Worker {
    /// A fresh, never-stored worker built from client input.
    pub fn new(input: WorkerInput) -> Self {
        let now = Utc::now();
        Self {
            username: input.username,
            first_name: input.first_name,
            last_name: input.last_name,
            city: input.city,
            division: input.division,
            position: input.position,
            salary: input.salary,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            version: 1,
        }
    }

    /// Copies every mutable field from `input`. The username is left alone.
    pub fn apply(&mut self, input: WorkerInput) {
        self.first_name = input.first_name;
        self.last_name = input.last_name;
        self.city = input.city;
        self.division = input.division;
        self.position = input.position;
        self.salary = input.salary;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl WorkerInput {
    fn seed(username: &str, first: &str, last: &str, city: &str, division: &str) -> Self {
        Self {
            username: username.to_owned(),
            first_name: first.to_owned(),
            last_name: last.to_owned(),
            city: city.to_owned(),
            division: division.to_owned(),
            position: "Software Engineer".to_owned(),
            salary: 55,
        }
    }
}

/// The profiles inserted at startup unless seeding is disabled.
pub fn default_seed() -> Vec<WorkerInput> {
    vec![
        WorkerInput::seed("masud", "Masudur", "Rahman", "Madaripur", "Dhaka"),
        WorkerInput::seed("fahim", "Fahim", "Abrar", "Chittagong", "Chittagong"),
        WorkerInput::seed("tahsin", "Tahsin", "Rahman", "Chittagong", "Chittagong"),
        WorkerInput::seed("jenny", "Jannatul", "Ferdows", "Chittagong", "Chittagong"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_accepts_partial_bodies() {
        let input: WorkerInput =
            serde_json::from_str(r#"{"username":"alice","firstname":"Alice","version":9}"#).unwrap();
        assert_eq!(input.username, "alice");
        assert_eq!(input.first_name, "Alice");
        assert_eq!(input.salary, 0);
        assert!(input.city.is_empty());
    }

    #[test]
    fn apply_keeps_username_and_copies_position() {
        let mut worker = Worker::new(WorkerInput { username: "alice".into(), ..Default::default() });
        worker.apply(WorkerInput {
            username: "bob".into(),
            position: "Lead".into(),
            salary: 90,
            ..Default::default()
        });
        assert_eq!(worker.username, "alice");
        assert_eq!(worker.position, "Lead");
        assert_eq!(worker.salary, 90);
    }

    #[test]
    fn serialized_form_hides_null_deletion_marker() {
        let worker = Worker::new(WorkerInput { username: "alice".into(), ..Default::default() });
        let json = serde_json::to_value(&worker).unwrap();
        assert_eq!(json["firstname"], "");
        assert_eq!(json["version"], 1);
        assert!(json.get("deleted_at").is_none());
        assert!(json.get("created_at").is_some());
    }
}
