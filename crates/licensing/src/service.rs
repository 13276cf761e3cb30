//! License lifecycle service — validates operator input and drives the backend.
//!
//! Each call is one independent operation: nothing is retried, and a failure leaves
//! no state behind in the service. Conflicting concurrent edits are the backend's call.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::backend::{LicenseBackend, ModuleRegistry, OrganizationDirectory};
use crate::entitlement::effective_license;
use crate::validator::{
    LicenseDraft, LicensePatch, LicenseValidator, ValidationErrors, ValidationPolicy,
};
use crate::{License, LicenseError, ListResponse, Message, ModuleDescriptor, Organization, Page};

pub struct LicenseService {
    backend: Arc<dyn LicenseBackend>,
    registry: Arc<dyn ModuleRegistry>,
    directory: Arc<dyn OrganizationDirectory>,
    validator: LicenseValidator,
}

impl LicenseService {
    pub fn new(
        backend: Arc<dyn LicenseBackend>,
        registry: Arc<dyn ModuleRegistry>,
        directory: Arc<dyn OrganizationDirectory>,
        policy: ValidationPolicy,
    ) -> Self {
        Self {
            backend,
            registry,
            directory,
            validator: LicenseValidator::new(policy),
        }
    }

    /// Build a service over one value that serves every collaborator role.
    pub fn with_backend<B>(backend: Arc<B>, policy: ValidationPolicy) -> Self
    where
        B: LicenseBackend + ModuleRegistry + OrganizationDirectory + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend, policy)
    }

    /// Create a license for `organization_id`. Duplicate keys come back from the
    /// backend as [`LicenseError::DuplicateKey`].
    pub async fn create_license(
        &self,
        organization_id: Uuid,
        draft: &LicenseDraft,
    ) -> Result<License, LicenseError> {
        let known = self.known_modules(!draft.addon_modules.is_empty()).await?;
        let validated =
            self.validator
                .validate_new(organization_id, draft, &known, Utc::now());

        let organization_known = match self.directory.get_organization(organization_id).await {
            Ok(_) => true,
            Err(LicenseError::NotFound { .. }) => false,
            Err(e) => return Err(e),
        };

        let new = match (validated, organization_known) {
            (Ok(new), true) => new,
            (Ok(_), false) => {
                let errors = ValidationErrors::single("organization_id", "unknown organization");
                warn!(organization_id = %organization_id, "license rejected: {errors}");
                return Err(errors.into());
            }
            (Err(mut errors), known) => {
                if !known {
                    errors.push("organization_id", "unknown organization");
                }
                warn!(organization_id = %organization_id, "license rejected: {errors}");
                return Err(errors.into());
            }
        };

        let license = self.backend.create_license(&new).await.inspect_err(|e| {
            warn!(organization_id = %organization_id, error = %e, "license create failed");
        })?;
        info!(
            license_id = %license.id,
            organization_id = %license.organization_id,
            tier = %license.tier,
            "License created successfully"
        );
        Ok(license)
    }

    /// Apply a partial update. The stored record is read first; a stale id is
    /// [`LicenseError::NotFound`]. Key and organization never change here.
    pub async fn update_license(
        &self,
        id: Uuid,
        patch: &LicensePatch,
    ) -> Result<License, LicenseError> {
        let current = self.backend.get_license(id).await?;
        let known = self.known_modules(patch.mentions_modules()).await?;
        let update = self
            .validator
            .validate_update(&current, patch, &known)
            .inspect_err(|errors| warn!(license_id = %id, "license update rejected: {errors}"))?;

        if update.is_empty() {
            info!(license_id = %id, "license update has no changes");
            return Ok(current);
        }

        let license = self
            .backend
            .update_license(id, &update)
            .await
            .inspect_err(|e| warn!(license_id = %id, error = %e, "license update failed"))?;
        info!(license_id = %id, tier = %license.tier, "License updated successfully");
        Ok(license)
    }

    /// Permanently delete a license. There is no undo and no cascade.
    pub async fn delete_license(&self, id: Uuid) -> Result<Message, LicenseError> {
        let ack = self
            .backend
            .delete_license(id)
            .await
            .inspect_err(|e| warn!(license_id = %id, error = %e, "license delete failed"))?;
        info!(license_id = %id, "License deleted successfully");
        Ok(ack)
    }

    pub async fn read_licenses(&self, page: Page) -> Result<ListResponse<License>, LicenseError> {
        self.backend.list_licenses(page).await
    }

    pub async fn get_license(&self, id: Uuid) -> Result<License, LicenseError> {
        self.backend.get_license(id).await
    }

    pub async fn licenses_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<ListResponse<License>, LicenseError> {
        self.backend.licenses_for_organization(organization_id).await
    }

    /// The license currently governing an organization, if any.
    pub async fn effective_license(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<License>, LicenseError> {
        let licenses = self.licenses_for_organization(organization_id).await?;
        Ok(effective_license(&licenses.data, organization_id, now).cloned())
    }

    pub async fn list_modules(&self) -> Result<Vec<ModuleDescriptor>, LicenseError> {
        self.registry.list_modules().await
    }

    pub async fn list_organizations(
        &self,
        page: Page,
    ) -> Result<ListResponse<Organization>, LicenseError> {
        self.directory.list_organizations(page).await
    }

    async fn known_modules(&self, needed: bool) -> Result<BTreeSet<String>, LicenseError> {
        if needed {
            self.registry.module_ids().await
        } else {
            Ok(BTreeSet::new())
        }
    }
}
