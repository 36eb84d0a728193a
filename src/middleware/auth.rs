//! Authenticated principal
//!
//! Authentication happens upstream. The gateway forwards the caller identity
//! in headers; this module only reads it and checks payee ownership.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::{AppError, AppErrorKind, AuthorizationError};
use crate::middleware::error::get_request_id_from_headers;

pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
/// Comma-separated payee ids the caller may act for
pub const PRINCIPAL_PAYEES_HEADER: &str = "x-principal-payee-ids";
/// Comma-separated roles
pub const PRINCIPAL_ROLES_HEADER: &str = "x-principal-roles";

const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub payee_ids: Vec<String>,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    /// A principal may act for its own id, any payee it was granted, or any
    /// payee at all when it holds the admin role.
    pub fn can_act_for(&self, payee_id: &str) -> bool {
        self.is_admin() || self.id == payee_id || self.payee_ids.iter().any(|p| p == payee_id)
    }

    pub fn authorize(&self, payee_id: &str) -> Result<(), AppError> {
        if self.can_act_for(payee_id) {
            return Ok(());
        }
        tracing::warn!(
            principal_id = %self.id,
            payee_id = %payee_id,
            "principal not authorized for payee"
        );
        Err(forbidden(payee_id))
    }

    pub fn require_admin(&self, payee_id: &str) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(forbidden(payee_id))
        }
    }
}

fn forbidden(payee_id: &str) -> AppError {
    AppError::new(AppErrorKind::Authorization(AuthorizationError::Forbidden {
        payee_id: payee_id.to_string(),
    }))
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());

        let id = header(PRINCIPAL_ID_HEADER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);
        let Some(id) = id else {
            let mut err = AppError::new(AppErrorKind::Authorization(
                AuthorizationError::Unauthenticated,
            ));
            if let Some(request_id) = get_request_id_from_headers(&parts.headers) {
                err = err.with_request_id(request_id);
            }
            return Err(err);
        };

        Ok(Principal {
            id,
            payee_ids: split_list(header(PRINCIPAL_PAYEES_HEADER)),
            roles: split_list(header(PRINCIPAL_ROLES_HEADER)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(id: &str, payees: &[&str], roles: &[&str]) -> Principal {
        Principal {
            id: id.to_string(),
            payee_ids: payees.iter().map(|s| s.to_string()).collect(),
            roles: roles.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn ownership_rules() {
        let owner = principal("user_1", &["biz_1", "staff_9"], &[]);
        assert!(owner.can_act_for("biz_1"));
        assert!(owner.can_act_for("user_1"));
        assert!(!owner.can_act_for("biz_2"));
        assert_eq!(owner.authorize("biz_2").unwrap_err().status_code(), 403);

        let admin = principal("ops", &[], &["admin"]);
        assert!(admin.can_act_for("anything"));
        assert!(admin.require_admin("biz_1").is_ok());
        assert!(owner.require_admin("biz_1").is_err());
    }

    #[tokio::test]
    async fn extracts_from_headers() {
        let request = http::Request::builder()
            .header(PRINCIPAL_ID_HEADER, "user_1")
            .header(PRINCIPAL_PAYEES_HEADER, "biz_1, biz_2,")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let principal = Principal::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(principal.payee_ids, vec!["biz_1", "biz_2"]);

        let request = http::Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        let err = Principal::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }
}
