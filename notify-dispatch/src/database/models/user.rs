//! User database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::notification::recipient::Supervisor;

/// A row of the `user_account` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct UserDbModel {
    pub id: i64,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub supervisor_id: Option<i64>,
}

impl UserDbModel {
    /// `First Last`, trimmed.
    pub fn full_name(&self) -> String {
        format!("{} {}", self.firstname.trim(), self.lastname.trim())
            .trim()
            .to_string()
    }
}

impl From<UserDbModel> for Supervisor {
    fn from(user: UserDbModel) -> Self {
        Supervisor::new(user.full_name(), user.email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(firstname: &str, lastname: &str) -> UserDbModel {
        UserDbModel {
            id: 1,
            firstname: firstname.to_string(),
            lastname: lastname.to_string(),
            email: "s@x.com".to_string(),
            supervisor_id: None,
        }
    }

    #[test]
    fn test_full_name() {
        assert_eq!(user("Ann", "Smith").full_name(), "Ann Smith");
        assert_eq!(user("", "Smith").full_name(), "Smith");
    }

    #[test]
    fn test_into_supervisor() {
        let supervisor: Supervisor = user("Ann", "Smith").into();
        assert_eq!(supervisor.mailbox(), "Ann Smith <s@x.com>");
    }
}
