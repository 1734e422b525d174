//! Admission decisions for authenticated callers.
//!
//! Admins are always admitted. Everyone else must own at least one client
//! whose bound address equals the caller's address. The login variant also
//! checks credentials and, for users with a TOTP secret, the one-time code.

use serde::Serialize;
use std::{fmt, sync::Arc};
use tracing::{debug, instrument, warn};

use crate::directory::{DirectoryBackend, UserRecord};
use crate::error::{Error, Result};
use crate::totp::TotpVerifier;

/// Stable, machine-readable denial reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "&'static str")]
pub enum DenyReason {
    Unauthorized,
    NoTenantBinding,
    TenantMismatch,
    SecondFactorRejected,
}

impl DenyReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NoTenantBinding => "no tenant binding",
            Self::TenantMismatch => "tenant mismatch",
            Self::SecondFactorRejected => "second-factor rejected",
        }
    }
}

impl From<DenyReason> for &'static str {
    fn from(reason: DenyReason) -> Self {
        reason.as_str()
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow(Box<UserRecord>),
    Deny(DenyReason),
}

impl Decision {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// Pick the caller address: the first forwarded entry when present and
/// non-empty, else the direct connection address.
#[must_use]
pub fn resolve_caller_address(forwarded: Option<&str>, direct: Option<&str>) -> Option<String> {
    forwarded
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .or_else(|| direct.map(str::trim).filter(|addr| !addr.is_empty()))
        .map(str::to_string)
}

/// Admission steps 2 to 5 for a known user.
#[must_use]
pub fn admit(user: UserRecord, caller: Option<&str>) -> Decision {
    if user.is_admin {
        return Decision::Allow(Box::new(user));
    }
    if user.clients.is_empty() {
        return Decision::Deny(DenyReason::NoTenantBinding);
    }
    let bound = caller.is_some_and(|caller| {
        user.clients
            .iter()
            .any(|client| client.bound_address == caller)
    });
    if bound {
        Decision::Allow(Box::new(user))
    } else {
        Decision::Deny(DenyReason::TenantMismatch)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginAttempt {
    pub username: String,
    pub password: String,
    pub code: Option<String>,
    /// Resolved caller address, see [`resolve_caller_address`].
    pub caller: Option<String>,
}

#[derive(Clone)]
pub struct AccessAuthorizer {
    directory: Arc<dyn DirectoryBackend>,
    totp: TotpVerifier,
}

impl AccessAuthorizer {
    #[must_use]
    pub fn new(directory: Arc<dyn DirectoryBackend>, totp: TotpVerifier) -> Self {
        Self { directory, totp }
    }

    /// Decide whether `username`, calling from `caller`, may proceed.
    ///
    /// # Errors
    /// Only storage failures; every refusal is a [`Decision::Deny`].
    #[instrument(skip(self))]
    pub async fn authorize(&self, username: &str, caller: Option<&str>) -> Result<Decision> {
        let Some(user) = self.directory.user_by_username(username).await? else {
            debug!("unknown identity");
            return Ok(Decision::Deny(DenyReason::Unauthorized));
        };
        Ok(admit(user, caller))
    }

    /// Credential check, admission, then the second factor.
    ///
    /// # Errors
    /// Only storage failures.
    #[instrument(skip(self, attempt), fields(username = %attempt.username))]
    pub async fn login(&self, attempt: &LoginAttempt) -> Result<Decision> {
        let Some(user) = self
            .directory
            .user_by_credentials(&attempt.username, &attempt.password)
            .await?
        else {
            debug!("credentials rejected");
            return Ok(Decision::Deny(DenyReason::Unauthorized));
        };

        let decision = admit(user, attempt.caller.as_deref());
        let Decision::Allow(user) = decision else {
            return Ok(decision);
        };

        if !user.second_factor_enabled() {
            return Ok(Decision::Allow(user));
        }
        let code = attempt.code.as_deref().unwrap_or_default();
        match self.totp.validate(&user.totp_secret, code) {
            Ok(true) => Ok(Decision::Allow(user)),
            Ok(false) => Ok(Decision::Deny(DenyReason::SecondFactorRejected)),
            Err(Error::Validation(reason)) => {
                warn!("stored TOTP secret is unusable: {reason}");
                Ok(Decision::Deny(DenyReason::SecondFactorRejected))
            }
            Err(err) => Err(err),
        }
    }
}
