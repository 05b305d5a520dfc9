use crate::error::AuthError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use superfan_core::{ClubId, UserId};
use superfan_store::Store;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {}", other)),
        }
    }
}

/// Club admin authorization
#[derive(Debug, Clone, Copy)]
pub struct AdminPolicy {
    environment: Environment,
    skip_admin_check: bool,
}

impl AdminPolicy {
    pub fn new(environment: Environment, skip_admin_check: bool) -> Self {
        if skip_admin_check && environment.is_production() {
            error!("skip_admin_check is set in production; ignoring it");
        }
        AdminPolicy {
            environment,
            skip_admin_check,
        }
    }

    /// Whether the bypass is actually in effect
    pub fn bypass_active(&self) -> bool {
        self.skip_admin_check && !self.environment.is_production()
    }

    pub async fn require_admin(&self, store: &dyn Store, user: &UserId, club: &ClubId) -> Result<(), AuthError> {
        if self.bypass_active() {
            warn!(user_id = %user, club_id = %club, environment = %self.environment, "admin check skipped");
            return Ok(());
        }
        if self.skip_admin_check {
            error!(user_id = %user, club_id = %club, "admin bypass requested in production; enforcing check");
        }
        if store.is_club_admin(user, club).await? {
            Ok(())
        } else {
            Err(AuthError::Forbidden(club.to_string()))
        }
    }
}
