//! Gateway definitions consumed by the synchronization engine.
//!
//! Only the slice of the API definition the engine needs is modelled here:
//! the API id, its enabled flag and its plans with their security scheme.
//! API keys and subscriptions mirror the backing-store records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::{CoreError, Result};

/// Security scheme protecting a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PlanSecurityType {
    KeyLess,
    ApiKey,
    Jwt,
    OAuth2,
}

impl PlanSecurityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanSecurityType::KeyLess => "KEY_LESS",
            PlanSecurityType::ApiKey => "API_KEY",
            PlanSecurityType::Jwt => "JWT",
            PlanSecurityType::OAuth2 => "OAUTH2",
        }
    }
}

impl fmt::Display for PlanSecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanSecurityType {
    type Err = CoreError;

    /// Parses a security type case-insensitively; `-` and `_` are interchangeable.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "KEY_LESS" | "KEYLESS" => Ok(PlanSecurityType::KeyLess),
            "API_KEY" | "APIKEY" => Ok(PlanSecurityType::ApiKey),
            "JWT" => Ok(PlanSecurityType::Jwt),
            "OAUTH2" => Ok(PlanSecurityType::OAuth2),
            _ => Err(CoreError::invalid_security_type(s)),
        }
    }
}

impl TryFrom<String> for PlanSecurityType {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PlanSecurityType> for String {
    fn from(value: PlanSecurityType) -> Self {
        value.as_str().to_string()
    }
}

/// A plan attached to an API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub security: PlanSecurityType,
}

impl Plan {
    pub fn new(id: impl Into<String>, security: PlanSecurityType) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            security,
        }
    }

    pub fn is_api_key(&self) -> bool {
        self.security == PlanSecurityType::ApiKey
    }
}

/// A deployable API as carried by lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Api {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub plans: Vec<Plan>,
}

fn default_enabled() -> bool {
    true
}

impl Api {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            enabled: true,
            plans: Vec::new(),
        }
    }

    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plans.push(plan);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Ids of the plans secured by an API key. Empty for disabled APIs.
    pub fn api_key_plans(&self) -> impl Iterator<Item = &str> {
        self.plans
            .iter()
            .filter(|plan| self.enabled && plan.is_api_key())
            .map(|plan| plan.id.as_str())
    }
}

/// Lifecycle status of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Pending,
    Accepted,
    Paused,
    Rejected,
    Closed,
}

impl FromStr for SubscriptionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(SubscriptionStatus::Pending),
            "ACCEPTED" => Ok(SubscriptionStatus::Accepted),
            "PAUSED" => Ok(SubscriptionStatus::Paused),
            "REJECTED" => Ok(SubscriptionStatus::Rejected),
            "CLOSED" => Ok(SubscriptionStatus::Closed),
            _ => Err(CoreError::invalid_subscription_status(s)),
        }
    }
}

/// Subscription of an application to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub api: String,
    pub plan: String,
    pub application: String,
    pub status: SubscriptionStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ending_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Subscription {
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        self.status == SubscriptionStatus::Accepted
            && self.ending_at.is_none_or(|ending_at| ending_at > now)
    }
}

/// An API key record from the backing store.
///
/// Revocation and pausing are attributes: a revoked key stays in the cache
/// with `revoked = true` rather than being removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub key: String,
    pub api: String,
    pub plan: String,
    pub subscription: String,
    pub application: String,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expire_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl ApiKey {
    pub fn is_active_at(&self, now: OffsetDateTime) -> bool {
        !self.revoked && !self.paused && self.expire_at.is_none_or(|expire_at| expire_at > now)
    }
}
