use chrono::{DateTime, Local, NaiveDateTime, Utc};
use uuid::Uuid;

/// Injection points for the non-deterministic static functions, so the
/// evaluator stays byte-for-byte reproducible under test.
#[derive(Clone, Copy)]
pub struct RuntimeFns {
    pub now_local: fn() -> NaiveDateTime,
    pub now_utc: fn() -> DateTime<Utc>,
    pub new_guid: fn() -> Uuid,
    pub current_user: fn() -> String,
}

impl Default for RuntimeFns {
    fn default() -> Self {
        RuntimeFns {
            now_local: || Local::now().naive_local(),
            now_utc: Utc::now,
            new_guid: Uuid::new_v4,
            current_user: process_user,
        }
    }
}

fn process_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
