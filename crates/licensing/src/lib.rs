//! License Console licensing core — license records, validation, lifecycle, and entitlements.
//!
//! A license binds one organization to a tier, three quota ceilings, a validity window,
//! and a set of add-on modules. [`validator`] turns operator input into normalized
//! payloads, [`service`] drives the backend through the [`backend`] traits, and
//! [`entitlement`] answers runtime questions (is this module enabled, is this quota hit).

pub mod access;
pub mod backend;
pub mod entitlement;
pub mod keys;
pub mod memory;
pub mod service;
pub mod timestamp;
pub mod validator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use access::{require_superuser, Principal};
pub use backend::{LicenseBackend, ModuleRegistry, OrganizationDirectory};
pub use memory::InMemoryBackend;
pub use service::LicenseService;
pub use validator::{
    FieldError, LicenseDraft, LicensePatch, LicenseValidator, ValidationErrors, ValidationPolicy,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("license key `{0}` is already in use")]
    DuplicateKey(String),
    /// A 409 the backend explained only in prose.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("{resource} quota exceeded: licensed for {limit}, currently {current}")]
    QuotaExceeded {
        resource: QuotaResource,
        limit: u32,
        current: u32,
    },
    #[error("backend returned HTTP {status}: {detail}")]
    Backend { status: u16, detail: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl LicenseError {
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown tier `{0}`, expected one of: starter, business, enterprise")]
pub struct UnknownTier(pub String);

// ---------------------------------------------------------------------------
// Tiers and quotas
// ---------------------------------------------------------------------------

/// Named license class. The tier picks default quotas and the base module set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseTier {
    Starter,
    Business,
    Enterprise,
}

impl LicenseTier {
    pub const ALL: &'static [LicenseTier] = &[Self::Starter, Self::Business, Self::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Business => "business",
            Self::Enterprise => "enterprise",
        }
    }

    /// Quotas applied when a new license leaves them unset.
    pub fn default_quotas(&self) -> Quotas {
        match self {
            Self::Starter => Quotas {
                max_locations: 1,
                max_users: 5,
                max_devices: 5,
            },
            Self::Business | Self::Enterprise => Quotas {
                max_locations: 10,
                max_users: 50,
                max_devices: 50,
            },
        }
    }

    /// Modules every license of this tier gets without add-ons.
    pub fn base_modules(&self) -> &'static [&'static str] {
        match self {
            Self::Starter => &["qr", "access_control", "audit"],
            Self::Business => &["qr", "access_control", "audit", "face_recognition"],
            Self::Enterprise => &[
                "qr",
                "access_control",
                "audit",
                "face_recognition",
                "voice_id",
                "analytics",
            ],
        }
    }
}

impl std::fmt::Display for LicenseTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LicenseTier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "starter" => Ok(Self::Starter),
            "business" => Ok(Self::Business),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(UnknownTier(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    pub max_locations: u32,
    pub max_users: u32,
    pub max_devices: u32,
}

/// A resource counted against a license quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    Users,
    Locations,
    Devices,
}

impl QuotaResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Locations => "locations",
            Self::Devices => "devices",
        }
    }
}

impl std::fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// License record
// ---------------------------------------------------------------------------

/// A license as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct License {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub license_key: String,
    pub tier: LicenseTier,
    pub max_locations: u32,
    pub max_users: u32,
    pub max_devices: u32,
    #[serde(with = "timestamp")]
    pub valid_from: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub addon_modules: Vec<String>,
}

/// Status derived from `is_active` and the validity window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Active,
    Inactive,
    Expired,
}

impl std::fmt::Display for LicenseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
        })
    }
}

impl License {
    pub fn quotas(&self) -> Quotas {
        Quotas {
            max_locations: self.max_locations,
            max_users: self.max_users,
            max_devices: self.max_devices,
        }
    }

    pub fn quota_for(&self, resource: QuotaResource) -> u32 {
        match resource {
            QuotaResource::Users => self.max_users,
            QuotaResource::Locations => self.max_locations,
            QuotaResource::Devices => self.max_devices,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// The administrative flag wins over the window: a deactivated license reads
    /// as inactive even after it has expired.
    pub fn status_at(&self, now: DateTime<Utc>) -> LicenseStatus {
        if !self.is_active {
            LicenseStatus::Inactive
        } else if self.is_expired_at(now) {
            LicenseStatus::Expired
        } else {
            LicenseStatus::Active
        }
    }
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Normalized create payload. A `None` key asks the backend to generate one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLicense {
    pub organization_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    pub tier: LicenseTier,
    pub max_locations: u32,
    pub max_users: u32,
    pub max_devices: u32,
    #[serde(with = "timestamp")]
    pub valid_from: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    #[serde(default)]
    pub addon_modules: Vec<String>,
}

/// Normalized partial update. Carries no key or organization field, so neither can
/// be changed through an update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LicenseUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<LicenseTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_locations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_users: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_devices: Option<u32>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "timestamp::option"
    )]
    pub valid_until: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addon_modules: Option<Vec<String>>,
}

impl LicenseUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply the set fields to a stored record.
    pub fn apply_to(&self, license: &mut License) {
        if let Some(tier) = self.tier {
            license.tier = tier;
        }
        if let Some(v) = self.max_locations {
            license.max_locations = v;
        }
        if let Some(v) = self.max_users {
            license.max_users = v;
        }
        if let Some(v) = self.max_devices {
            license.max_devices = v;
        }
        if let Some(v) = self.valid_until {
            license.valid_until = v;
        }
        if let Some(v) = self.is_active {
            license.is_active = v;
        }
        if let Some(modules) = &self.addon_modules {
            license.addon_modules = modules.clone();
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub address: String,
    pub contact_email: String,
    pub is_active: bool,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// An entry in the backend's module registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
}

/// Offset pagination as the backend's list routes take it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Page {
    pub skip: u32,
    pub limit: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 100,
        }
    }
}

/// `{ "data": [...], "count": n }` list envelope. `count` is the total, not the page size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
    pub count: u64,
}

/// Plain acknowledgement returned by destructive routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
