//! User credential records

use serde::{Deserialize, Serialize};

use crate::secrets::Secret;

/// A (role, database) pair attached to a user
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoleGrant {
    pub role: String,
    pub db: String,
}

impl RoleGrant {
    pub fn new(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: db.into(),
        }
    }

    /// `root` on the given database
    pub fn root(db: &str) -> Self {
        Self::new("root", db)
    }

    /// `userAdminAnyDatabase` on the given database
    pub fn user_admin_any_database(db: &str) -> Self {
        Self::new("userAdminAnyDatabase", db)
    }

    /// `readWrite` on the given database
    pub fn read_write(db: &str) -> Self {
        Self::new("readWrite", db)
    }
}

impl std::fmt::Display for RoleGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.role, self.db)
    }
}

/// A user to be created
#[derive(Clone, Debug)]
pub struct UserSpec {
    pub username: String,
    pub password: Secret,
    pub roles: Vec<RoleGrant>,
}

impl UserSpec {
    pub fn new(username: impl Into<String>, password: Secret, roles: Vec<RoleGrant>) -> Self {
        Self {
            username: username.into(),
            password,
            roles,
        }
    }

    /// Role grants in a stable order, for comparison with what the server reports
    pub fn sorted_roles(&self) -> Vec<RoleGrant> {
        sorted(&self.roles)
    }
}

/// A user as reported by the server's user directory
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserInfo {
    #[serde(rename = "user")]
    pub username: String,

    pub db: String,

    #[serde(default)]
    pub roles: Vec<RoleGrant>,
}

impl UserInfo {
    /// Whether the user holds exactly these grants (order-insensitive)
    pub fn has_exact_roles(&self, roles: &[RoleGrant]) -> bool {
        sorted(&self.roles) == sorted(roles)
    }
}

fn sorted(roles: &[RoleGrant]) -> Vec<RoleGrant> {
    let mut roles = roles.to_vec();
    roles.sort();
    roles.dedup();
    roles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_roles_ignores_order() {
        let info = UserInfo {
            username: "admin".into(),
            db: "admin".into(),
            roles: vec![
                RoleGrant::user_admin_any_database("admin"),
                RoleGrant::root("admin"),
            ],
        };

        assert!(info.has_exact_roles(&[
            RoleGrant::root("admin"),
            RoleGrant::user_admin_any_database("admin"),
        ]));
        assert!(!info.has_exact_roles(&[RoleGrant::root("admin")]));
    }

    #[test]
    fn test_users_info_entry_deserializes() {
        let doc = bson::doc! {
            "_id": "abell.abell",
            "user": "abell",
            "db": "abell",
            "roles": [{ "role": "readWrite", "db": "abell" }],
            "mechanisms": ["SCRAM-SHA-256"],
        };

        let info: UserInfo = bson::from_document(doc).unwrap();
        assert_eq!(info.username, "abell");
        assert_eq!(info.roles, vec![RoleGrant::read_write("abell")]);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(RoleGrant::read_write("abell").to_string(), "readWrite@abell");
    }
}
