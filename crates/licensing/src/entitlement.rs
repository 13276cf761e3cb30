//! Runtime entitlement checks against a license record.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{License, LicenseError, LicenseStatus, QuotaResource};

impl License {
    /// Tier base modules plus add-ons.
    pub fn enabled_modules(&self) -> BTreeSet<String> {
        self.tier
            .base_modules()
            .iter()
            .map(|m| m.to_string())
            .chain(self.addon_modules.iter().cloned())
            .collect()
    }

    /// Whether `module` is granted and the license is currently in force.
    pub fn is_module_enabled(&self, module: &str, now: DateTime<Utc>) -> bool {
        self.status_at(now) == LicenseStatus::Active
            && (self.tier.base_modules().contains(&module)
                || self.addon_modules.iter().any(|m| m == module))
    }

    /// Check that one more `resource` fits: `current_count` must stay below the ceiling.
    pub fn check_limit(
        &self,
        resource: QuotaResource,
        current_count: u32,
    ) -> Result<(), LicenseError> {
        let limit = self.quota_for(resource);
        if current_count >= limit {
            return Err(LicenseError::QuotaExceeded {
                resource,
                limit,
                current: current_count,
            });
        }
        Ok(())
    }
}

/// The license that governs `organization_id` at `now`: the first one that is
/// active and unexpired.
pub fn effective_license<'a, I>(
    licenses: I,
    organization_id: Uuid,
    now: DateTime<Utc>,
) -> Option<&'a License>
where
    I: IntoIterator<Item = &'a License>,
{
    licenses.into_iter().find(|l| {
        l.organization_id == organization_id && l.status_at(now) == LicenseStatus::Active
    })
}
