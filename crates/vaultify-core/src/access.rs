//! Access mediator (C4): resolves "may principal P read/write path X at
//! version V?" by consulting ownership and the sharing-rule table.

use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{AccessMode, SecretVersionRow};
use crate::secret_store::SecretStore;
use crate::sharing::SharingRuleStore;

/// The principal attempting access: the fields out of a verified PASETO
/// payload that authorization needs.
#[derive(Debug, Clone, Copy)]
pub struct Principal<'a> {
    pub user_id: Uuid,
    pub email: &'a str,
}

/// The resolved version record a grant is about.
pub struct AccessGrant {
    pub version: SecretVersionRow,
}

/// Resolves ownership and delegated-sharing access over [`SecretStore`]
/// and [`SharingRuleStore`].
pub struct AccessMediator<'a> {
    secrets: &'a SecretStore,
    sharing: &'a SharingRuleStore,
}

impl<'a> AccessMediator<'a> {
    #[must_use]
    pub fn new(secrets: &'a SecretStore, sharing: &'a SharingRuleStore) -> Self {
        Self { secrets, sharing }
    }

    /// Authorizes `principal` for `mode` on `path`, optionally pinned to
    /// `version`. Expired sharing rules are treated as absent even if the
    /// reaper has not yet physically removed them.
    pub async fn authorize(
        &self,
        principal: Principal<'_>,
        path: &str,
        version: Option<i32>,
        mode: AccessMode,
    ) -> Result<AccessGrant, CoreError> {
        let version = match version {
            Some(v) => self.secrets.get_version(path, v).await?,
            None => self.secrets.get_latest(path).await?,
        };

        if version.owner_id == principal.user_id {
            return Ok(AccessGrant { version });
        }

        let permission = match self.sharing.get_permission(path, principal.email).await {
            Ok(permission) => permission,
            Err(CoreError::NotFound(_)) => {
                return Err(CoreError::Forbidden(format!("no access to path '{path}'")));
            }
            Err(other) => return Err(other),
        };

        if permission.satisfies(mode) {
            Ok(AccessGrant { version })
        } else {
            Err(CoreError::Forbidden(format!(
                "read-only access to path '{path}'"
            )))
        }
    }
}
