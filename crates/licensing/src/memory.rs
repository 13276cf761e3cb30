//! In-process backend over `DashMap`, used by tests and the CLI demo mode.
//!
//! Mirrors what the REST backend does on its side: it generates a key when none is
//! supplied, enforces key uniqueness, and reports missing records as `NotFound`.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use crate::backend::{LicenseBackend, ModuleRegistry, OrganizationDirectory};
use crate::keys::generate_license_key;
use crate::{
    License, LicenseError, LicenseTier, LicenseUpdate, ListResponse, Message, ModuleDescriptor,
    NewLicense, Organization, Page,
};

/// Modules the demo registry knows about.
const DEFAULT_MODULES: &[(&str, &str, &str)] = &[
    ("qr", "1.2.0", "QR code access passes"),
    ("access_control", "1.0.0", "Door and turnstile access rules"),
    ("audit", "1.0.0", "Access audit trail"),
    ("face_recognition", "0.9.0", "Face recognition at access points"),
    ("voice_id", "0.4.0", "Voice identification"),
    ("analytics", "1.1.0", "Occupancy and traffic analytics"),
    ("audit_stats", "0.3.0", "Aggregated audit statistics"),
    ("weather_connector", "0.2.0", "External weather feed"),
];

struct Stored {
    seq: u64,
    license: License,
}

#[derive(Default)]
pub struct InMemoryBackend {
    licenses: DashMap<Uuid, Stored>,
    keys: DashMap<String, Uuid>,
    organizations: DashMap<Uuid, Organization>,
    modules: DashMap<String, ModuleDescriptor>,
    next_seq: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with the default module registry and no organizations.
    pub fn with_default_modules() -> Self {
        let backend = Self::new();
        for (name, version, description) in DEFAULT_MODULES {
            backend.register_module(ModuleDescriptor {
                name: (*name).into(),
                version: (*version).into(),
                description: (*description).into(),
            });
        }
        backend
    }

    pub fn register_module(&self, module: ModuleDescriptor) {
        self.modules.insert(module.name.clone(), module);
    }

    pub fn add_organization(&self, name: impl Into<String>) -> Organization {
        let name = name.into();
        let org = Organization {
            id: Uuid::new_v4(),
            contact_email: format!(
                "admin@{}.example",
                name.to_lowercase().replace(' ', "-")
            ),
            name,
            kind: "office".into(),
            address: String::new(),
            is_active: true,
            created_at: Utc::now(),
        };
        self.organizations.insert(org.id, org.clone());
        org
    }

    pub fn insert_organization(&self, org: Organization) {
        self.organizations.insert(org.id, org);
    }

    pub fn license_count(&self) -> usize {
        self.licenses.len()
    }

    /// Populate registry, organizations, and a few licenses for demo runs.
    pub fn seed_demo_data(&self) {
        let now = Utc::now();
        for (name, version, description) in DEFAULT_MODULES {
            self.register_module(ModuleDescriptor {
                name: (*name).into(),
                version: (*version).into(),
                description: (*description).into(),
            });
        }

        let orgs = [
            (0x01, "Harbor Residences", "residential", LicenseTier::Starter),
            (0x02, "Northwind Offices", "office", LicenseTier::Business),
            (0x03, "Cobalt Retail Park", "commercial", LicenseTier::Enterprise),
        ];
        for (n, name, kind, tier) in orgs {
            let org_id = Uuid::from_u128(n);
            self.insert_organization(Organization {
                id: org_id,
                name: name.into(),
                kind: kind.into(),
                address: format!("{n} Demo Street"),
                contact_email: format!("admin{n}@demo.example"),
                is_active: true,
                created_at: now - Duration::days(400),
            });

            let quotas = tier.default_quotas();
            let license = License {
                id: Uuid::from_u128(0x1000 + n),
                organization_id: org_id,
                license_key: generate_license_key(),
                tier,
                max_locations: quotas.max_locations,
                max_users: quotas.max_users,
                max_devices: quotas.max_devices,
                valid_from: now - Duration::days(90),
                valid_until: now + Duration::days(275),
                is_active: true,
                addon_modules: if tier == LicenseTier::Business {
                    vec!["voice_id".into()]
                } else {
                    vec![]
                },
            };
            self.store(license);
        }

        // A lapsed license next to the current one for the office tenant.
        let quotas = LicenseTier::Starter.default_quotas();
        self.store(License {
            id: Uuid::from_u128(0x1004),
            organization_id: Uuid::from_u128(0x02),
            license_key: generate_license_key(),
            tier: LicenseTier::Starter,
            max_locations: quotas.max_locations,
            max_users: quotas.max_users,
            max_devices: quotas.max_devices,
            valid_from: now - Duration::days(800),
            valid_until: now - Duration::days(435),
            is_active: true,
            addon_modules: vec![],
        });
    }

    fn store(&self, license: License) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.keys.insert(license.license_key.clone(), license.id);
        self.licenses.insert(license.id, Stored { seq, license });
    }

    /// All licenses in creation order.
    fn ordered(&self, filter: impl Fn(&License) -> bool) -> Vec<License> {
        let mut list: Vec<(u64, License)> = self
            .licenses
            .iter()
            .filter(|e| filter(&e.value().license))
            .map(|e| (e.value().seq, e.value().license.clone()))
            .collect();
        list.sort_by_key(|(seq, _)| *seq);
        list.into_iter().map(|(_, l)| l).collect()
    }

    /// Pick a generated key nobody holds yet.
    fn fresh_key(&self) -> String {
        loop {
            let key = generate_license_key();
            if !self.keys.contains_key(&key) {
                return key;
            }
        }
    }
}

fn paginate<T>(items: Vec<T>, page: Page) -> ListResponse<T> {
    let count = items.len() as u64;
    let data = items
        .into_iter()
        .skip(page.skip as usize)
        .take(page.limit as usize)
        .collect();
    ListResponse { data, count }
}

#[async_trait]
impl LicenseBackend for InMemoryBackend {
    async fn list_licenses(&self, page: Page) -> Result<ListResponse<License>, LicenseError> {
        Ok(paginate(self.ordered(|_| true), page))
    }

    async fn get_license(&self, id: Uuid) -> Result<License, LicenseError> {
        self.licenses
            .get(&id)
            .map(|e| e.value().license.clone())
            .ok_or_else(|| LicenseError::not_found("license", id))
    }

    async fn create_license(&self, new: &NewLicense) -> Result<License, LicenseError> {
        if !self.organizations.contains_key(&new.organization_id) {
            return Err(LicenseError::not_found("organization", new.organization_id));
        }

        let key = match &new.license_key {
            Some(key) => key.clone(),
            None => self.fresh_key(),
        };
        let id = Uuid::new_v4();
        match self.keys.entry(key.clone()) {
            Entry::Occupied(_) => return Err(LicenseError::DuplicateKey(key)),
            Entry::Vacant(slot) => {
                slot.insert(id);
            }
        }

        let license = License {
            id,
            organization_id: new.organization_id,
            license_key: key,
            tier: new.tier,
            max_locations: new.max_locations,
            max_users: new.max_users,
            max_devices: new.max_devices,
            valid_from: new.valid_from,
            valid_until: new.valid_until,
            is_active: new.is_active,
            addon_modules: new.addon_modules.clone(),
        };
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.licenses.insert(
            id,
            Stored {
                seq,
                license: license.clone(),
            },
        );
        info!(license_id = %id, key = %license.license_key, "stored license");
        Ok(license)
    }

    async fn update_license(
        &self,
        id: Uuid,
        update: &LicenseUpdate,
    ) -> Result<License, LicenseError> {
        let mut entry = self
            .licenses
            .get_mut(&id)
            .ok_or_else(|| LicenseError::not_found("license", id))?;
        update.apply_to(&mut entry.license);
        Ok(entry.license.clone())
    }

    async fn delete_license(&self, id: Uuid) -> Result<Message, LicenseError> {
        let (_, stored) = self
            .licenses
            .remove(&id)
            .ok_or_else(|| LicenseError::not_found("license", id))?;
        self.keys.remove(&stored.license.license_key);
        Ok(Message::new("License deleted successfully"))
    }

    async fn licenses_for_organization(
        &self,
        organization_id: Uuid,
    ) -> Result<ListResponse<License>, LicenseError> {
        if !self.organizations.contains_key(&organization_id) {
            return Err(LicenseError::not_found("organization", organization_id));
        }
        let list = self.ordered(|l| l.organization_id == organization_id);
        Ok(ListResponse {
            count: list.len() as u64,
            data: list,
        })
    }
}

#[async_trait]
impl ModuleRegistry for InMemoryBackend {
    async fn list_modules(&self) -> Result<Vec<ModuleDescriptor>, LicenseError> {
        let mut modules: Vec<_> = self.modules.iter().map(|e| e.value().clone()).collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(modules)
    }
}

#[async_trait]
impl OrganizationDirectory for InMemoryBackend {
    async fn list_organizations(
        &self,
        page: Page,
    ) -> Result<ListResponse<Organization>, LicenseError> {
        let mut orgs: Vec<_> = self
            .organizations
            .iter()
            .map(|e| e.value().clone())
            .collect();
        orgs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(paginate(orgs, page))
    }

    async fn get_organization(&self, id: Uuid) -> Result<Organization, LicenseError> {
        self.organizations
            .get(&id)
            .map(|e| e.value().clone())
            .ok_or_else(|| LicenseError::not_found("organization", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::is_generated_format;

    fn new_license(org: Uuid, key: Option<&str>) -> NewLicense {
        let now = Utc::now();
        NewLicense {
            organization_id: org,
            license_key: key.map(str::to_string),
            tier: LicenseTier::Starter,
            max_locations: 1,
            max_users: 5,
            max_devices: 5,
            valid_from: now,
            valid_until: now + Duration::days(365),
            is_active: true,
            addon_modules: vec![],
        }
    }

    #[tokio::test]
    async fn test_generates_key_when_missing() {
        let backend = InMemoryBackend::new();
        let org = backend.add_organization("Acme");
        let license = backend.create_license(&new_license(org.id, None)).await.unwrap();
        assert!(is_generated_format(&license.license_key));
    }

    #[tokio::test]
    async fn test_duplicate_key_conflicts() {
        let backend = InMemoryBackend::new();
        let org = backend.add_organization("Acme");
        backend
            .create_license(&new_license(org.id, Some("DUPE-KEY0-0000-0000")))
            .await
            .unwrap();
        let err = backend
            .create_license(&new_license(org.id, Some("DUPE-KEY0-0000-0000")))
            .await
            .unwrap_err();
        assert!(matches!(err, LicenseError::DuplicateKey(k) if k == "DUPE-KEY0-0000-0000"));
        assert_eq!(backend.license_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_frees_key_and_reports_missing() {
        let backend = InMemoryBackend::new();
        let org = backend.add_organization("Acme");
        let license = backend
            .create_license(&new_license(org.id, Some("KEEP-0000-0000-0000")))
            .await
            .unwrap();

        backend.delete_license(license.id).await.unwrap();
        let err = backend.delete_license(license.id).await.unwrap_err();
        assert!(matches!(err, LicenseError::NotFound { resource: "license", .. }));

        // The key is free again.
        assert!(backend
            .create_license(&new_license(org.id, Some("KEEP-0000-0000-0000")))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_list_in_creation_order_with_paging() {
        let backend = InMemoryBackend::new();
        let org = backend.add_organization("Acme");
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(backend.create_license(&new_license(org.id, None)).await.unwrap().id);
        }

        let page = backend
            .list_licenses(Page { skip: 1, limit: 2 })
            .await
            .unwrap();
        assert_eq!(page.count, 5);
        let got: Vec<Uuid> = page.data.iter().map(|l| l.id).collect();
        assert_eq!(got, ids[1..3].to_vec());
    }

    #[tokio::test]
    async fn test_unknown_organization() {
        let backend = InMemoryBackend::new();
        let err = backend
            .create_license(&new_license(Uuid::new_v4(), None))
            .await
            .unwrap_err();
        assert!(matches!(err, LicenseError::NotFound { resource: "organization", .. }));
    }

    #[tokio::test]
    async fn test_seeded_demo_data() {
        let backend = InMemoryBackend::new();
        backend.seed_demo_data();
        assert_eq!(backend.license_count(), 4);
        let orgs = backend.list_organizations(Page::default()).await.unwrap();
        assert_eq!(orgs.count, 3);
        let office = backend
            .licenses_for_organization(Uuid::from_u128(0x02))
            .await
            .unwrap();
        assert_eq!(office.count, 2);
        let ids = backend.module_ids().await.unwrap();
        assert!(ids.contains("voice_id"));
    }
}
