use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::UserId;

/// An authenticated session, as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    pub email: String,
    pub signed_in_at: DateTime<Utc>,
}

/// Who the caller is, resolved once per load and threaded through every
/// reconciliation and save call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Unauthenticated,
    Admin(UserId),
    SubUser(UserId),
}

impl Role {
    /// Builds the role for an authenticated user from the allow-list verdict.
    #[must_use]
    pub fn authenticated(user_id: UserId, is_admin: bool) -> Self {
        if is_admin {
            Role::Admin(user_id)
        } else {
            Role::SubUser(user_id)
        }
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&UserId> {
        match self {
            Role::Unauthenticated => None,
            Role::Admin(id) | Role::SubUser(id) => Some(id),
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin(_))
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Role::Unauthenticated => "unauthenticated",
            Role::Admin(_) => "admin",
            Role::SubUser(_) => "sub-user",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticated_branches_on_allow_list() {
        let id = UserId::new("u1");
        assert_eq!(Role::authenticated(id.clone(), true), Role::Admin(id.clone()));
        assert_eq!(Role::authenticated(id.clone(), false), Role::SubUser(id));
    }

    #[test]
    fn unauthenticated_has_no_user() {
        assert_eq!(Role::default().user_id(), None);
        assert_eq!(Role::default().label(), "unauthenticated");
    }
}
