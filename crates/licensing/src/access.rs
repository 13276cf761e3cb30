//! Superuser gate for license administration.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::LicenseError;

/// The authenticated user, as reported by the backend's `/users/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
}

fn default_true() -> bool {
    true
}

/// License administration is superuser-only. Inactive accounts are refused even when
/// flagged as superuser.
pub fn require_superuser(principal: &Principal) -> Result<(), LicenseError> {
    if !principal.is_active {
        return Err(LicenseError::Unauthorized(format!(
            "account {} is inactive",
            principal.email
        )));
    }
    if !principal.is_superuser {
        return Err(LicenseError::Unauthorized(format!(
            "{} is not a superuser",
            principal.email
        )));
    }
    Ok(())
}
