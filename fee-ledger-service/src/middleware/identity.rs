//! Caller identity supplied by the gateway.
//!
//! The gateway authenticates the user and forwards who they are in
//! `X-User-ID`, `X-User-Role` and optionally `X-User-Permissions`
//! (comma-separated). These headers are trusted as-is.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use service_core::error::AppError;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_PERMISSIONS_HEADER: &str = "x-user-permissions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Staff,
    Parent,
}

impl Role {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "staff" => Some(Self::Staff),
            "parent" => Some(Self::Parent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Staff => "staff",
            Self::Parent => "parent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: Uuid,
    pub role: Role,
    pub permissions: Vec<String>,
}

impl CallerIdentity {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header")))?;
        let user_id = Uuid::parse_str(user_id.trim())
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Malformed X-User-ID header")))?;

        let role = headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing X-User-Role header")))?;
        let role = Role::parse(role)
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Unknown role '{}'", role)))?;

        let permissions = headers
            .get(USER_PERMISSIONS_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            user_id,
            role,
            permissions,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Administrator role required"
            )))
        }
    }

    /// Staff or admin. Parents may only read.
    pub fn require_staff(&self) -> Result<(), AppError> {
        match self.role {
            Role::Admin | Role::Staff => Ok(()),
            Role::Parent => Err(AppError::Forbidden(anyhow::anyhow!(
                "Staff or administrator role required"
            ))),
        }
    }

    /// Admins always pass; staff need the named permission when one is
    /// granted through the header set.
    pub fn require_staff_permission(&self, permission: &str) -> Result<(), AppError> {
        self.require_staff()?;
        if self.is_admin() || self.permissions.is_empty() || self.has_permission(permission) {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Missing permission '{}'",
                permission
            )))
        }
    }

    /// Admin, or the staff member the wallet or collection belongs to.
    pub fn require_admin_or_self(&self, owner_id: Uuid) -> Result<(), AppError> {
        if self.is_admin() || (self.role == Role::Staff && self.user_id == owner_id) {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Only the owner or an administrator may view this resource"
            )))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = Self::from_headers(&parts.headers)?;

        let span = tracing::Span::current();
        span.record("user_id", tracing::field::display(identity.user_id));
        span.record("role", identity.role.as_str());

        Ok(identity)
    }
}
