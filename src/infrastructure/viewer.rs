// Viewer context - who is making the request

use uuid::Uuid;

use crate::models::User;

/// Request-scoped identity. Handlers and services only see this, never the
/// raw headers.
#[derive(Debug, Clone)]
pub struct ViewerContext {
    pub user: Option<User>,
    pub request_id: String,
}

impl ViewerContext {
    pub fn anonymous() -> Self {
        Self {
            user: None,
            request_id: new_request_id(),
        }
    }

    pub fn authenticated(user: User) -> Self {
        Self {
            user: Some(user),
            request_id: new_request_id(),
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user.as_ref().map(|user| user.id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_staff(&self) -> bool {
        self.user.as_ref().is_some_and(|user| user.is_staff || user.is_superuser)
    }

    pub fn is_superuser(&self) -> bool {
        self.user.as_ref().is_some_and(|user| user.is_superuser)
    }

    pub fn has_perm(&self, codename: &str) -> bool {
        self.user.as_ref().is_some_and(|user| user.has_perm(codename))
    }
}

fn new_request_id() -> String {
    format!("req-{}", Uuid::new_v4())
}
