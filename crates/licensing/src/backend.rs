//! Collaborator traits for the license lifecycle.
//!
//! The backend owns persistence, key generation, and key uniqueness. Implementations map
//! their failures onto [`LicenseError`]: a missing record is `NotFound`, a duplicate key
//! is `DuplicateKey`, a refused caller is `Unauthorized`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    License, LicenseError, LicenseUpdate, ListResponse, Message, ModuleDescriptor, NewLicense,
    Organization, Page,
};

#[async_trait]
pub trait LicenseBackend: Send + Sync {
    async fn list_licenses(&self, page: Page) -> Result<ListResponse<License>, LicenseError>;

    async fn get_license(&self, id: Uuid) -> Result<License, LicenseError>;

    async fn create_license(&self, new: &NewLicense) -> Result<License, LicenseError>;

    async fn update_license(
        &self,
        id: Uuid,
        update: &LicenseUpdate,
    ) -> Result<License, LicenseError>;

    async fn delete_license(&self, id: Uuid) -> Result<Message, LicenseError>;

    async fn licenses_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<ListResponse<License>, LicenseError>;
}

/// Source of valid add-on module identifiers.
#[async_trait]
pub trait ModuleRegistry: Send + Sync {
    async fn list_modules(&self) -> Result<Vec<ModuleDescriptor>, LicenseError>;

    async fn module_ids(&self) -> Result<BTreeSet<String>, LicenseError> {
        Ok(self
            .list_modules()
            .await?
            .into_iter()
            .map(|m| m.name)
            .collect())
    }
}

#[async_trait]
pub trait OrganizationDirectory: Send + Sync {
    async fn list_organizations(
        &self,
        page: Page,
    ) -> Result<ListResponse<Organization>, LicenseError>;

    async fn get_organization(&self, id: Uuid) -> Result<Organization, LicenseError>;
}
