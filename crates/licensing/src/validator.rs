//! Candidate license validation and default policy.
//!
//! Operator input arrives loosely typed ([`LicenseDraft`], [`LicensePatch`]): tiers and
//! dates as strings, quotas as signed integers. The validator collects every field error
//! in one pass and, when there are none, returns the normalized payload the backend takes.

use std::collections::BTreeSet;

use chrono::{DateTime, Months, Utc};
use console_core::config::LicensingConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{timestamp, License, LicenseTier, LicenseUpdate, NewLicense};

// ---------------------------------------------------------------------------
// Field errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Every field-scoped problem found in one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("invalid license: {}", summarize(.errors))]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

fn summarize(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.push(field, message);
        errors
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    pub fn field(&self, name: &str) -> Option<&FieldError> {
        self.errors.iter().find(|e| e.field == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Candidate for a new license. Unset quotas and dates are filled by policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicenseDraft {
    /// Blank or missing means the backend generates a key.
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub max_locations: Option<i64>,
    #[serde(default)]
    pub max_users: Option<i64>,
    #[serde(default)]
    pub max_devices: Option<i64>,
    #[serde(default)]
    pub valid_from: Option<String>,
    #[serde(default)]
    pub valid_until: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub addon_modules: Vec<String>,
}

impl LicenseDraft {
    pub fn new(tier: impl Into<String>) -> Self {
        Self {
            tier: Some(tier.into()),
            ..Default::default()
        }
    }
}

/// Candidate for an update, shaped like the edit form. `license_key` and
/// `organization_id` are accepted so a whole form can be passed through, but they
/// never reach the update payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicensePatch {
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub max_locations: Option<i64>,
    #[serde(default)]
    pub max_users: Option<i64>,
    #[serde(default)]
    pub max_devices: Option<i64>,
    #[serde(default)]
    pub valid_until: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub addon_modules: Option<Vec<String>>,
}

impl LicensePatch {
    /// True when the patch touches add-on modules and so needs the registry.
    pub fn mentions_modules(&self) -> bool {
        self.addon_modules.as_ref().is_some_and(|m| !m.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub require_license_key: bool,
    pub validity_months: u32,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            require_license_key: false,
            validity_months: 12,
        }
    }
}

impl From<&LicensingConfig> for ValidationPolicy {
    fn from(config: &LicensingConfig) -> Self {
        Self {
            require_license_key: config.require_license_key,
            validity_months: config.validity_months,
        }
    }
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct LicenseValidator {
    policy: ValidationPolicy,
}

impl LicenseValidator {
    pub fn new(policy: ValidationPolicy) -> Self {
        Self { policy }
    }

    /// Validate a create candidate. `known_modules` only has to cover the draft's add-ons.
    pub fn validate_new(
        &self,
        organization_id: Uuid,
        draft: &LicenseDraft,
        known_modules: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<NewLicense, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let license_key = match non_blank(draft.license_key.as_deref()) {
            Some(key) => Some(key.to_string()),
            None => {
                if self.policy.require_license_key {
                    errors.push("license_key", "license key is required");
                }
                None
            }
        };

        let tier = match non_blank(draft.tier.as_deref()) {
            Some(raw) => parse_tier(raw, &mut errors),
            None => {
                errors.push("tier", "tier is required");
                None
            }
        };

        let max_locations = quota("max_locations", draft.max_locations, &mut errors);
        let max_users = quota("max_users", draft.max_users, &mut errors);
        let max_devices = quota("max_devices", draft.max_devices, &mut errors);

        let window = self.window(
            draft.valid_from.as_deref(),
            draft.valid_until.as_deref(),
            now,
            &mut errors,
        );
        let addon_modules = normalize_modules(&draft.addon_modules, known_modules, &mut errors);

        let (Some(tier), Some((valid_from, valid_until)), true) = (tier, window, errors.is_empty())
        else {
            return Err(errors);
        };

        let defaults = tier.default_quotas();
        Ok(NewLicense {
            organization_id,
            license_key,
            tier,
            max_locations: max_locations.unwrap_or(defaults.max_locations),
            max_users: max_users.unwrap_or(defaults.max_users),
            max_devices: max_devices.unwrap_or(defaults.max_devices),
            valid_from,
            valid_until,
            is_active: draft.is_active.unwrap_or(true),
            addon_modules,
        })
    }

    /// Validate an update against the stored record. Quotas are never re-defaulted,
    /// even when the tier changes.
    pub fn validate_update(
        &self,
        current: &License,
        patch: &LicensePatch,
        known_modules: &BTreeSet<String>,
    ) -> Result<LicenseUpdate, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if patch.license_key.is_some() || patch.organization_id.is_some() {
            debug!(license_id = %current.id, "dropping immutable fields from license update");
        }

        let tier = match patch.tier.as_deref() {
            Some(raw) => parse_tier(raw, &mut errors),
            None => None,
        };

        let valid_until = match non_blank(patch.valid_until.as_deref()) {
            Some(raw) => match timestamp::parse(raw) {
                Some(until) if until > current.valid_from => Some(until),
                Some(_) => {
                    errors.push("valid_until", "must be after valid_from");
                    None
                }
                None => {
                    errors.push("valid_until", format!("malformed date `{raw}`"));
                    None
                }
            },
            None => None,
        };

        let addon_modules = patch
            .addon_modules
            .as_ref()
            .map(|modules| normalize_modules(modules, known_modules, &mut errors));

        let update = LicenseUpdate {
            tier,
            max_locations: quota("max_locations", patch.max_locations, &mut errors),
            max_users: quota("max_users", patch.max_users, &mut errors),
            max_devices: quota("max_devices", patch.max_devices, &mut errors),
            valid_until,
            is_active: patch.is_active,
            addon_modules,
        };

        if errors.is_empty() {
            Ok(update)
        } else {
            Err(errors)
        }
    }

    fn window(
        &self,
        from: Option<&str>,
        until: Option<&str>,
        now: DateTime<Utc>,
        errors: &mut ValidationErrors,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let valid_from = match non_blank(from) {
            Some(raw) => match timestamp::parse(raw) {
                Some(dt) => dt,
                None => {
                    errors.push("valid_from", format!("malformed date `{raw}`"));
                    // Still check valid_until on its own.
                    return self.check_until_alone(until, errors);
                }
            },
            None => now,
        };

        let valid_until = match non_blank(until) {
            Some(raw) => match timestamp::parse(raw) {
                Some(dt) => dt,
                None => {
                    errors.push("valid_until", format!("malformed date `{raw}`"));
                    return None;
                }
            },
            None => match valid_from.checked_add_months(Months::new(self.policy.validity_months)) {
                Some(dt) => dt,
                None => {
                    errors.push("valid_until", "default validity window is out of range");
                    return None;
                }
            },
        };

        if valid_until <= valid_from {
            errors.push("valid_until", "must be after valid_from");
            return None;
        }
        Some((valid_from, valid_until))
    }

    fn check_until_alone(
        &self,
        until: Option<&str>,
        errors: &mut ValidationErrors,
    ) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        if let Some(raw) = non_blank(until) {
            if timestamp::parse(raw).is_none() {
                errors.push("valid_until", format!("malformed date `{raw}`"));
            }
        }
        None
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_tier(raw: &str, errors: &mut ValidationErrors) -> Option<LicenseTier> {
    match raw.parse::<LicenseTier>() {
        Ok(tier) => Some(tier),
        Err(e) => {
            errors.push("tier", e.to_string());
            None
        }
    }
}

/// `None` when unset or rejected; rejection is recorded in `errors`.
fn quota(field: &'static str, raw: Option<i64>, errors: &mut ValidationErrors) -> Option<u32> {
    let value = raw?;
    if value < 1 {
        errors.push(field, "must be at least 1");
        return None;
    }
    match u32::try_from(value) {
        Ok(v) => Some(v),
        Err(_) => {
            errors.push(field, format!("must be at most {}", u32::MAX));
            None
        }
    }
}

/// Trim, drop blanks and duplicates (first occurrence wins), and check each against the registry.
fn normalize_modules(
    modules: &[String],
    known: &BTreeSet<String>,
    errors: &mut ValidationErrors,
) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(modules.len());
    for name in modules.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
        if !seen.insert(name) {
            continue;
        }
        if !known.contains(name) {
            errors.push("addon_modules", format!("unknown module `{name}`"));
            continue;
        }
        out.push(name.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::make_test_license;
    use crate::Quotas;
    use chrono::{Duration, TimeZone};

    fn registry() -> BTreeSet<String> {
        ["qr", "face_recognition", "voice_id"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_omitted_quotas_default_by_tier() {
        let validator = LicenseValidator::default();
        for tier in LicenseTier::ALL {
            let draft = LicenseDraft::new(tier.as_str());
            let new = validator
                .validate_new(Uuid::new_v4(), &draft, &registry(), now())
                .unwrap();
            let got = Quotas {
                max_locations: new.max_locations,
                max_users: new.max_users,
                max_devices: new.max_devices,
            };
            assert_eq!(got, tier.default_quotas(), "tier {tier}");
        }
    }

    #[test]
    fn test_starter_defaults() {
        let new = LicenseValidator::default()
            .validate_new(Uuid::new_v4(), &LicenseDraft::new("starter"), &registry(), now())
            .unwrap();
        assert_eq!(new.max_locations, 1);
        assert_eq!(new.max_users, 5);
        assert_eq!(new.max_devices, 5);
        assert!(new.is_active);
        assert!(new.license_key.is_none());
    }

    #[test]
    fn test_explicit_quota_kept_others_defaulted() {
        let draft = LicenseDraft {
            max_users: Some(12),
            ..LicenseDraft::new("business")
        };
        let new = LicenseValidator::default()
            .validate_new(Uuid::new_v4(), &draft, &registry(), now())
            .unwrap();
        assert_eq!(new.max_users, 12);
        assert_eq!(new.max_locations, 10);
        assert_eq!(new.max_devices, 50);
    }

    #[test]
    fn test_default_window_is_one_year() {
        let new = LicenseValidator::default()
            .validate_new(Uuid::new_v4(), &LicenseDraft::new("starter"), &registry(), now())
            .unwrap();
        assert_eq!(new.valid_from, now());
        assert_eq!(
            new.valid_until,
            Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_missing_until_follows_explicit_from() {
        let draft = LicenseDraft {
            valid_from: Some("2025-01-01".into()),
            ..LicenseDraft::new("starter")
        };
        let policy = ValidationPolicy {
            validity_months: 3,
            ..Default::default()
        };
        let new = LicenseValidator::new(policy)
            .validate_new(Uuid::new_v4(), &draft, &registry(), now())
            .unwrap();
        assert_eq!(
            new.valid_until,
            Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_zero_users_rejected() {
        let draft = LicenseDraft {
            max_users: Some(0),
            ..LicenseDraft::new("starter")
        };
        let errors = LicenseValidator::default()
            .validate_new(Uuid::new_v4(), &draft, &registry(), now())
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.field("max_users").unwrap().message, "must be at least 1");
    }

    #[test]
    fn test_unknown_tier_rejected() {
        let errors = LicenseValidator::default()
            .validate_new(Uuid::new_v4(), &LicenseDraft::new("platinum"), &registry(), now())
            .unwrap_err();
        assert!(errors.has_field("tier"));

        let errors = LicenseValidator::default()
            .validate_new(Uuid::new_v4(), &LicenseDraft::default(), &registry(), now())
            .unwrap_err();
        assert_eq!(errors.field("tier").unwrap().message, "tier is required");
    }

    #[test]
    fn test_inverted_and_malformed_windows() {
        let validator = LicenseValidator::default();

        let inverted = LicenseDraft {
            valid_from: Some("2025-06-01".into()),
            valid_until: Some("2025-05-01".into()),
            ..LicenseDraft::new("starter")
        };
        let errors = validator
            .validate_new(Uuid::new_v4(), &inverted, &registry(), now())
            .unwrap_err();
        assert!(errors.has_field("valid_until"));

        let equal = LicenseDraft {
            valid_from: Some("2025-06-01".into()),
            valid_until: Some("2025-06-01".into()),
            ..LicenseDraft::new("starter")
        };
        assert!(validator
            .validate_new(Uuid::new_v4(), &equal, &registry(), now())
            .is_err());

        let malformed = LicenseDraft {
            valid_from: Some("yesterday".into()),
            valid_until: Some("soon".into()),
            ..LicenseDraft::new("starter")
        };
        let errors = validator
            .validate_new(Uuid::new_v4(), &malformed, &registry(), now())
            .unwrap_err();
        assert!(errors.has_field("valid_from"));
        assert!(errors.has_field("valid_until"));
    }

    #[test]
    fn test_errors_collected_across_fields() {
        let draft = LicenseDraft {
            tier: Some("gold".into()),
            max_users: Some(-1),
            max_devices: Some(0),
            addon_modules: vec!["teleport".into()],
            ..Default::default()
        };
        let errors = LicenseValidator::default()
            .validate_new(Uuid::new_v4(), &draft, &registry(), now())
            .unwrap_err();
        assert_eq!(errors.len(), 4);
        let rendered = errors.to_string();
        assert!(rendered.contains("max_devices"));
        assert!(rendered.contains("teleport"));
    }

    #[test]
    fn test_license_key_policy() {
        let blank = LicenseDraft {
            license_key: Some("   ".into()),
            ..LicenseDraft::new("starter")
        };

        let optional = LicenseValidator::default()
            .validate_new(Uuid::new_v4(), &blank, &registry(), now())
            .unwrap();
        assert!(optional.license_key.is_none());

        let strict = LicenseValidator::new(ValidationPolicy {
            require_license_key: true,
            ..Default::default()
        });
        let errors = strict
            .validate_new(Uuid::new_v4(), &blank, &registry(), now())
            .unwrap_err();
        assert!(errors.has_field("license_key"));

        let supplied = LicenseDraft {
            license_key: Some("  KEY1-KEY2-KEY3-KEY4 ".into()),
            ..LicenseDraft::new("starter")
        };
        let new = strict
            .validate_new(Uuid::new_v4(), &supplied, &registry(), now())
            .unwrap();
        assert_eq!(new.license_key.as_deref(), Some("KEY1-KEY2-KEY3-KEY4"));
    }

    #[test]
    fn test_addon_modules_deduplicated_and_checked() {
        let draft = LicenseDraft {
            addon_modules: vec!["qr".into(), " voice_id".into(), "qr".into(), "".into()],
            ..LicenseDraft::new("starter")
        };
        let new = LicenseValidator::default()
            .validate_new(Uuid::new_v4(), &draft, &registry(), now())
            .unwrap();
        assert_eq!(new.addon_modules, vec!["qr".to_string(), "voice_id".to_string()]);

        let unknown = LicenseDraft {
            addon_modules: vec!["qr".into(), "teleport".into()],
            ..LicenseDraft::new("starter")
        };
        let errors = LicenseValidator::default()
            .validate_new(Uuid::new_v4(), &unknown, &registry(), now())
            .unwrap_err();
        assert_eq!(
            errors.field("addon_modules").unwrap().message,
            "unknown module `teleport`"
        );
    }

    #[test]
    fn test_update_drops_immutable_fields() {
        let current = make_test_license();
        let patch = LicensePatch {
            license_key: Some("NEW0-NEW0-NEW0-NEW0".into()),
            organization_id: Some(Uuid::new_v4()),
            is_active: Some(false),
            ..Default::default()
        };
        let update = LicenseValidator::default()
            .validate_update(&current, &patch, &registry())
            .unwrap();
        let json = serde_json::to_value(&update).unwrap();
        assert!(json.get("license_key").is_none());
        assert!(json.get("organization_id").is_none());
        assert_eq!(json["is_active"], false);
    }

    #[test]
    fn test_update_tier_change_keeps_quotas() {
        let current = make_test_license();
        let patch = LicensePatch {
            tier: Some("enterprise".into()),
            ..Default::default()
        };
        let update = LicenseValidator::default()
            .validate_update(&current, &patch, &registry())
            .unwrap();
        assert_eq!(update.tier, Some(LicenseTier::Enterprise));
        assert_eq!(update.max_users, None);
        assert_eq!(update.max_locations, None);
        assert_eq!(update.max_devices, None);
    }

    #[test]
    fn test_update_window_checked_against_stored_start() {
        let current = make_test_license();
        let before_start = (current.valid_from - Duration::days(1)).to_rfc3339();
        let patch = LicensePatch {
            valid_until: Some(before_start),
            ..Default::default()
        };
        let errors = LicenseValidator::default()
            .validate_update(&current, &patch, &registry())
            .unwrap_err();
        assert!(errors.has_field("valid_until"));

        let later = (current.valid_from + Duration::days(700)).to_rfc3339();
        let patch = LicensePatch {
            valid_until: Some(later),
            ..Default::default()
        };
        let update = LicenseValidator::default()
            .validate_update(&current, &patch, &registry())
            .unwrap();
        assert!(update.valid_until.unwrap() > current.valid_from);
    }

    #[test]
    fn test_update_rejects_zero_quota() {
        let patch = LicensePatch {
            max_devices: Some(0),
            ..Default::default()
        };
        let errors = LicenseValidator::default()
            .validate_update(&make_test_license(), &patch, &registry())
            .unwrap_err();
        assert!(errors.has_field("max_devices"));
    }

    #[test]
    fn test_update_rejects_unknown_addon() {
        let patch = LicensePatch {
            addon_modules: Some(vec!["voice_id".into(), "teleport".into()]),
            ..Default::default()
        };
        let errors = LicenseValidator::default()
            .validate_update(&make_test_license(), &patch, &registry())
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.field("addon_modules").unwrap().message.contains("teleport"));
    }

    #[test]
    fn test_update_rejects_malformed_until() {
        let patch = LicensePatch {
            valid_until: Some("soon".into()),
            is_active: Some(false),
            ..Default::default()
        };
        let errors = LicenseValidator::default()
            .validate_update(&make_test_license(), &patch, &registry())
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors.field("valid_until").unwrap().message.contains("soon"));
    }

    #[test]
    fn test_policy_from_config() {
        let config = LicensingConfig {
            require_license_key: true,
            validity_months: 6,
            default_page_size: 25,
        };
        let policy = ValidationPolicy::from(&config);
        assert!(policy.require_license_key);
        assert_eq!(policy.validity_months, 6);
    }
}
