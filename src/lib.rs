pub mod config;
pub mod error;
pub mod grader;
pub mod question;
pub mod script;
pub mod session;
pub mod worker;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
