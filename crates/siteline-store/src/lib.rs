//! Data-access layer for Siteline.
//!
//! The in-memory store is the single point of concurrency control: every
//! mutation is a short-lived operation behind one async RwLock. The
//! storage-engine-native behavior of the Postgres schema (unique pairs,
//! foreign-key cascades, check constraints, the custom-region row-level
//! predicates) is re-expressed here as explicit checks on every path.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use siteline_core::{
    AssistedSite, AssistedSiteRequest, AssistedSiteStatus, CustomRegion, LiveOpportunity, Lpa,
    NewCustomRegion, NewOpportunity, NewSite, OpportunityInterest, OpportunityStatus,
    OpportunityTag, OpportunityType, Requester, Shortlist, Site, SiteFile, SiteTag, Tenure,
    ValidationError,
};

pub const CRATE_NAME: &str = "siteline-store";

/// Flat fee for a staff-assisted listing, in pence.
pub const ASSISTED_LISTING_FEE_PENCE: u32 = 49_900;

/// Failure taxonomy surfaced to the API layer: validation rejections,
/// constraint conflicts, missing rows and row-level authorization denials.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("not permitted: {0}")]
    Forbidden(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// Mirror of an externally-authenticated account; kept so user deletion can
/// honor the schema's ON DELETE CASCADE behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Listing filter for the buyer-facing browse query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityFilter {
    pub status: Option<OpportunityStatus>,
    pub opportunity_type: Option<OpportunityType>,
    pub tenure: Option<Tenure>,
    pub lpa_code: Option<String>,
    pub region_code: Option<String>,
}

#[derive(Debug, Default)]
struct StoreInner {
    users: BTreeMap<Uuid, UserRecord>,
    sites: BTreeMap<Uuid, Site>,
    site_tags: BTreeMap<Uuid, SiteTag>,
    site_files: BTreeMap<Uuid, SiteFile>,
    opportunities: BTreeMap<Uuid, LiveOpportunity>,
    opportunity_tags: BTreeMap<Uuid, OpportunityTag>,
    custom_regions: BTreeMap<Uuid, CustomRegion>,
    interests: BTreeMap<Uuid, OpportunityInterest>,
    shortlists: BTreeMap<Uuid, Shortlist>,
    assisted_sites: BTreeMap<Uuid, AssistedSite>,
    lpas: BTreeMap<String, Lpa>,
}

impl StoreInner {
    fn ensure_user(&mut self, user_id: Uuid) {
        self.users.entry(user_id).or_insert_with(|| UserRecord {
            id: user_id,
            email: None,
            created_at: Utc::now(),
        });
    }

    /// Cascade of `live_opportunities` deletion: tags, interests and
    /// shortlists go with the row; assisted back-references are nulled.
    fn drop_opportunity_dependents(&mut self, opportunity_id: Uuid) {
        self.opportunity_tags
            .retain(|_, tag| tag.opportunity_id != opportunity_id);
        self.interests
            .retain(|_, interest| interest.opportunity_id != opportunity_id);
        self.shortlists
            .retain(|_, entry| entry.opportunity_id != opportunity_id);
        for assisted in self.assisted_sites.values_mut() {
            if assisted.published_site_id == Some(opportunity_id) {
                assisted.published_site_id = None;
            }
        }
    }

    fn drop_site_dependents(&mut self, site_id: Uuid) {
        self.site_tags.retain(|_, tag| tag.site_id != site_id);
        self.site_files.retain(|_, file| file.site_id != site_id);
    }

    fn opportunity_visible(&self, requester: Requester, opportunity: &LiveOpportunity) -> bool {
        opportunity.status == OpportunityStatus::Published
            || requester.admin
            || opportunity.user_id == requester.user_id
    }

    fn region_visible(&self, requester: Requester, region: &CustomRegion) -> bool {
        region.is_default || region.user_id == Some(requester.user_id)
    }
}

/// Shared application store. Uniqueness races resolve inside the write
/// lock: both submissions are accepted, exactly one row is created, and the
/// loser observes the existing row as a benign outcome.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- users -----------------------------------------------------------

    pub async fn register_user(&self, user_id: Uuid, email: &str) -> Result<UserRecord, StoreError> {
        siteline_core::validate_email(email)?;
        let mut inner = self.inner.write().await;
        if inner
            .users
            .values()
            .any(|u| u.id != user_id && u.email.as_deref() == Some(email))
        {
            return Err(StoreError::Conflict(format!("email {email} already registered")));
        }
        let record = UserRecord {
            id: user_id,
            email: Some(email.to_string()),
            created_at: Utc::now(),
        };
        inner.users.insert(user_id, record.clone());
        Ok(record)
    }

    /// Removes an account and everything hanging off it, mirroring the
    /// schema's user cascades.
    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.users.remove(&user_id).is_none() {
            return Err(StoreError::NotFound("user"));
        }
        let site_ids: Vec<Uuid> = inner
            .sites
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();
        for site_id in site_ids {
            inner.sites.remove(&site_id);
            inner.drop_site_dependents(site_id);
        }
        let opportunity_ids: Vec<Uuid> = inner
            .opportunities
            .values()
            .filter(|o| o.user_id == user_id)
            .map(|o| o.id)
            .collect();
        for opportunity_id in opportunity_ids {
            inner.opportunities.remove(&opportunity_id);
            inner.drop_opportunity_dependents(opportunity_id);
        }
        inner.custom_regions.retain(|_, r| r.user_id != Some(user_id));
        inner.interests.retain(|_, i| i.user_id != user_id);
        inner.shortlists.retain(|_, s| s.user_id != user_id);
        inner.assisted_sites.retain(|_, a| a.user_id != user_id);
        info!(%user_id, "deleted user and dependents");
        Ok(())
    }

    // ---- sites -----------------------------------------------------------

    pub async fn create_site(
        &self,
        requester: Requester,
        draft: NewSite,
    ) -> Result<Site, StoreError> {
        draft.validate()?;
        let mut inner = self.inner.write().await;
        inner.ensure_user(requester.user_id);
        let now = Utc::now();
        let site = Site {
            id: Uuid::new_v4(),
            user_id: requester.user_id,
            name: draft.name,
            address: draft.address,
            custom_address: draft.custom_address,
            developer_name: draft.developer_name,
            developer_regions: draft.developer_regions,
            lpa_codes: draft.lpa_codes,
            region_codes: draft.region_codes,
            planning_status: draft.planning_status,
            land_purchase_status: draft.land_purchase_status,
            location: draft.location,
            boundary: draft.boundary,
            context: draft.context,
            programme: draft.programme,
            terms: draft.terms,
            created_at: now,
            updated_at: now,
        };
        inner.sites.insert(site.id, site.clone());
        Ok(site)
    }

    pub async fn get_site(&self, requester: Requester, site_id: Uuid) -> Result<Site, StoreError> {
        let inner = self.inner.read().await;
        let site = inner.sites.get(&site_id).ok_or(StoreError::NotFound("site"))?;
        if !requester.admin && site.user_id != requester.user_id {
            return Err(StoreError::NotFound("site"));
        }
        Ok(site.clone())
    }

    pub async fn list_sites(&self, requester: Requester) -> Result<Vec<Site>, StoreError> {
        let inner = self.inner.read().await;
        let mut sites: Vec<Site> = inner
            .sites
            .values()
            .filter(|s| requester.admin || s.user_id == requester.user_id)
            .cloned()
            .collect();
        sites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sites)
    }

    pub async fn update_site(
        &self,
        requester: Requester,
        site_id: Uuid,
        draft: NewSite,
    ) -> Result<Site, StoreError> {
        draft.validate()?;
        let mut inner = self.inner.write().await;
        let site = inner
            .sites
            .get_mut(&site_id)
            .ok_or(StoreError::NotFound("site"))?;
        if !requester.admin && site.user_id != requester.user_id {
            return Err(StoreError::NotFound("site"));
        }
        site.name = draft.name;
        site.address = draft.address;
        site.custom_address = draft.custom_address;
        site.developer_name = draft.developer_name;
        site.developer_regions = draft.developer_regions;
        site.lpa_codes = draft.lpa_codes;
        site.region_codes = draft.region_codes;
        site.planning_status = draft.planning_status;
        site.land_purchase_status = draft.land_purchase_status;
        site.location = draft.location;
        site.boundary = draft.boundary;
        site.context = draft.context;
        site.programme = draft.programme;
        site.terms = draft.terms;
        site.updated_at = Utc::now();
        Ok(site.clone())
    }

    pub async fn delete_site(&self, requester: Requester, site_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let site = inner.sites.get(&site_id).ok_or(StoreError::NotFound("site"))?;
        if !requester.admin && site.user_id != requester.user_id {
            return Err(StoreError::NotFound("site"));
        }
        inner.sites.remove(&site_id);
        inner.drop_site_dependents(site_id);
        Ok(())
    }

    pub async fn add_site_tag(
        &self,
        requester: Requester,
        site_id: Uuid,
        tag: &str,
    ) -> Result<SiteTag, StoreError> {
        siteline_core::require("tag", tag)?;
        let mut inner = self.inner.write().await;
        let site = inner.sites.get(&site_id).ok_or(StoreError::NotFound("site"))?;
        if !requester.admin && site.user_id != requester.user_id {
            return Err(StoreError::NotFound("site"));
        }
        let record = SiteTag {
            id: Uuid::new_v4(),
            site_id,
            tag: tag.trim().to_string(),
        };
        inner.site_tags.insert(record.id, record.clone());
        Ok(record)
    }

    pub async fn remove_site_tag(
        &self,
        requester: Requester,
        site_id: Uuid,
        tag: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let site = inner.sites.get(&site_id).ok_or(StoreError::NotFound("site"))?;
        if !requester.admin && site.user_id != requester.user_id {
            return Err(StoreError::NotFound("site"));
        }
        let before = inner.site_tags.len();
        inner
            .site_tags
            .retain(|_, t| !(t.site_id == site_id && t.tag == tag));
        Ok(inner.site_tags.len() != before)
    }

    pub async fn site_tags(&self, requester: Requester, site_id: Uuid) -> Result<Vec<SiteTag>, StoreError> {
        let inner = self.inner.read().await;
        let site = inner.sites.get(&site_id).ok_or(StoreError::NotFound("site"))?;
        if !requester.admin && site.user_id != requester.user_id {
            return Err(StoreError::NotFound("site"));
        }
        Ok(inner
            .site_tags
            .values()
            .filter(|t| t.site_id == site_id)
            .cloned()
            .collect())
    }

    pub async fn attach_site_file(
        &self,
        requester: Requester,
        site_id: Uuid,
        title: &str,
        description: Option<String>,
        url: &str,
        content_hash: Option<String>,
    ) -> Result<SiteFile, StoreError> {
        siteline_core::require("title", title)?;
        siteline_core::require("url", url)?;
        let mut inner = self.inner.write().await;
        let site = inner.sites.get(&site_id).ok_or(StoreError::NotFound("site"))?;
        if !requester.admin && site.user_id != requester.user_id {
            return Err(StoreError::NotFound("site"));
        }
        let record = SiteFile {
            id: Uuid::new_v4(),
            site_id,
            url: url.to_string(),
            title: title.trim().to_string(),
            description,
            content_hash,
            created_at: Utc::now(),
        };
        inner.site_files.insert(record.id, record.clone());
        Ok(record)
    }

    pub async fn remove_site_file(
        &self,
        requester: Requester,
        site_id: Uuid,
        file_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let site = inner.sites.get(&site_id).ok_or(StoreError::NotFound("site"))?;
        if !requester.admin && site.user_id != requester.user_id {
            return Err(StoreError::NotFound("site"));
        }
        let matched = inner
            .site_files
            .get(&file_id)
            .is_some_and(|f| f.site_id == site_id);
        if matched {
            inner.site_files.remove(&file_id);
        }
        Ok(matched)
    }

    pub async fn site_files(
        &self,
        requester: Requester,
        site_id: Uuid,
    ) -> Result<Vec<SiteFile>, StoreError> {
        let inner = self.inner.read().await;
        let site = inner.sites.get(&site_id).ok_or(StoreError::NotFound("site"))?;
        if !requester.admin && site.user_id != requester.user_id {
            return Err(StoreError::NotFound("site"));
        }
        Ok(inner
            .site_files
            .values()
            .filter(|f| f.site_id == site_id)
            .cloned()
            .collect())
    }

    // ---- live opportunities ---------------------------------------------

    pub async fn create_opportunity(
        &self,
        requester: Requester,
        draft: NewOpportunity,
    ) -> Result<LiveOpportunity, StoreError> {
        draft.validate()?;
        let tenures = draft.tenure_set();
        let mut inner = self.inner.write().await;
        inner.ensure_user(requester.user_id);
        let now = Utc::now();
        let opportunity = LiveOpportunity {
            id: Uuid::new_v4(),
            user_id: requester.user_id,
            name: draft.name,
            address: draft.address,
            custom_address: draft.custom_address,
            opportunity_type: draft.opportunity_type,
            developer_name: draft.developer_name,
            developer_regions: draft.developer_regions,
            planning_status: draft.planning_status,
            land_purchase_status: draft.land_purchase_status,
            plots: draft.plots,
            tenures,
            lpa_codes: draft.lpa_codes,
            region_codes: draft.region_codes,
            location: draft.location,
            boundary: draft.boundary,
            start_on_site: draft.start_on_site,
            first_handover: draft.first_handover,
            final_handover: draft.final_handover,
            context: draft.context,
            programme: draft.programme,
            terms: draft.terms,
            documents: draft.documents,
            status: OpportunityStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        inner.opportunities.insert(opportunity.id, opportunity.clone());
        Ok(opportunity)
    }

    pub async fn get_opportunity(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
    ) -> Result<LiveOpportunity, StoreError> {
        let inner = self.inner.read().await;
        let opportunity = inner
            .opportunities
            .get(&opportunity_id)
            .ok_or(StoreError::NotFound("opportunity"))?;
        if !inner.opportunity_visible(requester, opportunity) {
            return Err(StoreError::NotFound("opportunity"));
        }
        Ok(opportunity.clone())
    }

    /// Buyer browse query. Published rows are visible to everyone; draft and
    /// withdrawn rows appear only for their owner or an admin.
    pub async fn list_opportunities(
        &self,
        requester: Requester,
        filter: &OpportunityFilter,
    ) -> Result<Vec<LiveOpportunity>, StoreError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<LiveOpportunity> = inner
            .opportunities
            .values()
            .filter(|o| inner.opportunity_visible(requester, o))
            .filter(|o| filter.status.is_none_or(|s| o.status == s))
            .filter(|o| filter.opportunity_type.is_none_or(|t| o.opportunity_type == t))
            .filter(|o| {
                filter
                    .tenure
                    .is_none_or(|tenure| o.tenures.contains(&tenure))
            })
            .filter(|o| {
                filter
                    .lpa_code
                    .as_deref()
                    .is_none_or(|code| o.lpa_codes.iter().any(|c| c == code))
            })
            .filter(|o| {
                filter
                    .region_code
                    .as_deref()
                    .is_none_or(|code| o.region_codes.iter().any(|c| c == code))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    pub async fn update_opportunity(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
        draft: NewOpportunity,
    ) -> Result<LiveOpportunity, StoreError> {
        draft.validate()?;
        let tenures = draft.tenure_set();
        let mut inner = self.inner.write().await;
        let opportunity = inner
            .opportunities
            .get_mut(&opportunity_id)
            .ok_or(StoreError::NotFound("opportunity"))?;
        if !requester.admin && opportunity.user_id != requester.user_id {
            return Err(StoreError::NotFound("opportunity"));
        }
        opportunity.name = draft.name;
        opportunity.address = draft.address;
        opportunity.custom_address = draft.custom_address;
        opportunity.opportunity_type = draft.opportunity_type;
        opportunity.developer_name = draft.developer_name;
        opportunity.developer_regions = draft.developer_regions;
        opportunity.planning_status = draft.planning_status;
        opportunity.land_purchase_status = draft.land_purchase_status;
        opportunity.plots = draft.plots;
        opportunity.tenures = tenures;
        opportunity.lpa_codes = draft.lpa_codes;
        opportunity.region_codes = draft.region_codes;
        opportunity.location = draft.location;
        opportunity.boundary = draft.boundary;
        opportunity.start_on_site = draft.start_on_site;
        opportunity.first_handover = draft.first_handover;
        opportunity.final_handover = draft.final_handover;
        opportunity.context = draft.context;
        opportunity.programme = draft.programme;
        opportunity.terms = draft.terms;
        opportunity.documents = draft.documents;
        opportunity.updated_at = Utc::now();
        Ok(opportunity.clone())
    }

    pub async fn publish_opportunity(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
    ) -> Result<LiveOpportunity, StoreError> {
        let mut inner = self.inner.write().await;
        let opportunity = inner
            .opportunities
            .get_mut(&opportunity_id)
            .ok_or(StoreError::NotFound("opportunity"))?;
        if !requester.admin && opportunity.user_id != requester.user_id {
            return Err(StoreError::NotFound("opportunity"));
        }
        match opportunity.status {
            OpportunityStatus::Draft => {
                opportunity.status = OpportunityStatus::Published;
                opportunity.updated_at = Utc::now();
                info!(%opportunity_id, "published opportunity");
            }
            OpportunityStatus::Published => {}
            OpportunityStatus::Withdrawn => {
                return Err(StoreError::Conflict(
                    "withdrawn opportunities cannot be republished".to_string(),
                ));
            }
        }
        Ok(opportunity.clone())
    }

    pub async fn withdraw_opportunity(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
    ) -> Result<LiveOpportunity, StoreError> {
        let mut inner = self.inner.write().await;
        let opportunity = inner
            .opportunities
            .get_mut(&opportunity_id)
            .ok_or(StoreError::NotFound("opportunity"))?;
        if !requester.admin && opportunity.user_id != requester.user_id {
            return Err(StoreError::NotFound("opportunity"));
        }
        match opportunity.status {
            OpportunityStatus::Published => {
                opportunity.status = OpportunityStatus::Withdrawn;
                opportunity.updated_at = Utc::now();
                info!(%opportunity_id, "withdrew opportunity");
            }
            OpportunityStatus::Withdrawn => {}
            OpportunityStatus::Draft => {
                return Err(StoreError::Conflict(
                    "draft opportunities cannot be withdrawn".to_string(),
                ));
            }
        }
        Ok(opportunity.clone())
    }

    pub async fn delete_opportunity(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let opportunity = inner
            .opportunities
            .get(&opportunity_id)
            .ok_or(StoreError::NotFound("opportunity"))?;
        if !requester.admin && opportunity.user_id != requester.user_id {
            return Err(StoreError::NotFound("opportunity"));
        }
        inner.opportunities.remove(&opportunity_id);
        inner.drop_opportunity_dependents(opportunity_id);
        Ok(())
    }

    pub async fn add_opportunity_tag(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
        tag: &str,
    ) -> Result<OpportunityTag, StoreError> {
        siteline_core::require("tag", tag)?;
        let mut inner = self.inner.write().await;
        let opportunity = inner
            .opportunities
            .get(&opportunity_id)
            .ok_or(StoreError::NotFound("opportunity"))?;
        if !requester.admin && opportunity.user_id != requester.user_id {
            return Err(StoreError::NotFound("opportunity"));
        }
        let record = OpportunityTag {
            id: Uuid::new_v4(),
            opportunity_id,
            tag: tag.trim().to_string(),
        };
        inner.opportunity_tags.insert(record.id, record.clone());
        Ok(record)
    }

    // ---- interest and shortlist toggles ---------------------------------

    /// Records interest; returns whether a row was created. A second call
    /// for the same pair is the benign "already exists" outcome.
    pub async fn register_interest(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let opportunity = inner
            .opportunities
            .get(&opportunity_id)
            .ok_or(StoreError::NotFound("opportunity"))?;
        if !inner.opportunity_visible(requester, opportunity) {
            return Err(StoreError::NotFound("opportunity"));
        }
        let exists = inner
            .interests
            .values()
            .any(|i| i.opportunity_id == opportunity_id && i.user_id == requester.user_id);
        if exists {
            debug!(%opportunity_id, user_id = %requester.user_id, "interest already recorded");
            return Ok(false);
        }
        inner.ensure_user(requester.user_id);
        let record = OpportunityInterest {
            id: Uuid::new_v4(),
            opportunity_id,
            user_id: requester.user_id,
            created_at: Utc::now(),
        };
        inner.interests.insert(record.id, record);
        Ok(true)
    }

    /// Removing an absent pair is a no-op, not an error.
    pub async fn withdraw_interest(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.interests.len();
        inner
            .interests
            .retain(|_, i| !(i.opportunity_id == opportunity_id && i.user_id == requester.user_id));
        Ok(inner.interests.len() != before)
    }

    pub async fn interests_for(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
    ) -> Result<Vec<OpportunityInterest>, StoreError> {
        let inner = self.inner.read().await;
        let opportunity = inner
            .opportunities
            .get(&opportunity_id)
            .ok_or(StoreError::NotFound("opportunity"))?;
        if !requester.admin && opportunity.user_id != requester.user_id {
            return Err(StoreError::Forbidden("only the owner may view interest"));
        }
        Ok(inner
            .interests
            .values()
            .filter(|i| i.opportunity_id == opportunity_id)
            .cloned()
            .collect())
    }

    /// Adds to the shortlist; idempotent under the (user, opportunity)
    /// unique pair.
    pub async fn shortlist_add(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let opportunity = inner
            .opportunities
            .get(&opportunity_id)
            .ok_or(StoreError::NotFound("opportunity"))?;
        if !inner.opportunity_visible(requester, opportunity) {
            return Err(StoreError::NotFound("opportunity"));
        }
        let exists = inner
            .shortlists
            .values()
            .any(|s| s.user_id == requester.user_id && s.opportunity_id == opportunity_id);
        if exists {
            debug!(%opportunity_id, user_id = %requester.user_id, "already shortlisted");
            return Ok(false);
        }
        inner.ensure_user(requester.user_id);
        let record = Shortlist {
            id: Uuid::new_v4(),
            user_id: requester.user_id,
            opportunity_id,
            created_at: Utc::now(),
        };
        inner.shortlists.insert(record.id, record);
        Ok(true)
    }

    pub async fn shortlist_remove(
        &self,
        requester: Requester,
        opportunity_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let before = inner.shortlists.len();
        inner
            .shortlists
            .retain(|_, s| !(s.user_id == requester.user_id && s.opportunity_id == opportunity_id));
        Ok(inner.shortlists.len() != before)
    }

    pub async fn shortlisted_opportunities(
        &self,
        requester: Requester,
    ) -> Result<Vec<LiveOpportunity>, StoreError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<LiveOpportunity> = inner
            .shortlists
            .values()
            .filter(|s| s.user_id == requester.user_id)
            .filter_map(|s| inner.opportunities.get(&s.opportunity_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    pub async fn shortlist_count(&self, opportunity_id: Uuid) -> usize {
        let inner = self.inner.read().await;
        inner
            .shortlists
            .values()
            .filter(|s| s.opportunity_id == opportunity_id)
            .count()
    }

    // ---- custom regions --------------------------------------------------

    /// Read predicate: default rows or rows the requester owns.
    pub async fn list_regions(&self, requester: Requester) -> Result<Vec<CustomRegion>, StoreError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<CustomRegion> = inner
            .custom_regions
            .values()
            .filter(|r| inner.region_visible(requester, r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    pub async fn get_region(
        &self,
        requester: Requester,
        region_id: Uuid,
    ) -> Result<CustomRegion, StoreError> {
        let inner = self.inner.read().await;
        let region = inner
            .custom_regions
            .get(&region_id)
            .ok_or(StoreError::NotFound("region"))?;
        if !inner.region_visible(requester, region) {
            return Err(StoreError::NotFound("region"));
        }
        Ok(region.clone())
    }

    /// Insert predicate: the requester becomes the owner and the row is
    /// never a system default.
    pub async fn create_region(
        &self,
        requester: Requester,
        draft: NewCustomRegion,
    ) -> Result<CustomRegion, StoreError> {
        draft.validate()?;
        let mut inner = self.inner.write().await;
        let duplicate = inner
            .custom_regions
            .values()
            .any(|r| r.name == draft.name && r.user_id == Some(requester.user_id));
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "region `{}` already exists for this user",
                draft.name
            )));
        }
        inner.ensure_user(requester.user_id);
        let region = CustomRegion {
            id: Uuid::new_v4(),
            name: draft.name,
            user_id: Some(requester.user_id),
            is_default: false,
            lpa_codes: draft.lpa_codes,
            created_at: Utc::now(),
        };
        inner.custom_regions.insert(region.id, region.clone());
        Ok(region)
    }

    /// Seeds a system default (no owner, globally readable). Idempotent on
    /// name so reseeding environments is safe.
    pub async fn seed_default_region(
        &self,
        name: &str,
        lpa_codes: Vec<String>,
    ) -> Result<bool, StoreError> {
        siteline_core::require("name", name)?;
        let mut inner = self.inner.write().await;
        let exists = inner
            .custom_regions
            .values()
            .any(|r| r.is_default && r.name == name);
        if exists {
            return Ok(false);
        }
        let region = CustomRegion {
            id: Uuid::new_v4(),
            name: name.to_string(),
            user_id: None,
            is_default: true,
            lpa_codes,
            created_at: Utc::now(),
        };
        inner.custom_regions.insert(region.id, region);
        Ok(true)
    }

    /// Update predicate: owned and non-default. Defaults are immutable to
    /// end users and surface as an authorization denial, not a missing row.
    pub async fn update_region(
        &self,
        requester: Requester,
        region_id: Uuid,
        draft: NewCustomRegion,
    ) -> Result<CustomRegion, StoreError> {
        draft.validate()?;
        let mut inner = self.inner.write().await;
        let visible = inner
            .custom_regions
            .get(&region_id)
            .map(|r| inner.region_visible(requester, r));
        match visible {
            None | Some(false) => return Err(StoreError::NotFound("region")),
            Some(true) => {}
        }
        let duplicate = inner.custom_regions.values().any(|r| {
            r.id != region_id && r.name == draft.name && r.user_id == Some(requester.user_id)
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "region `{}` already exists for this user",
                draft.name
            )));
        }
        let region = inner
            .custom_regions
            .get_mut(&region_id)
            .ok_or(StoreError::NotFound("region"))?;
        if region.is_default || region.user_id != Some(requester.user_id) {
            return Err(StoreError::Forbidden("default regions are read-only"));
        }
        region.name = draft.name;
        region.lpa_codes = draft.lpa_codes;
        Ok(region.clone())
    }

    pub async fn delete_region(
        &self,
        requester: Requester,
        region_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let region = inner
            .custom_regions
            .get(&region_id)
            .ok_or(StoreError::NotFound("region"))?;
        if !inner.region_visible(requester, region) {
            return Err(StoreError::NotFound("region"));
        }
        if region.is_default || region.user_id != Some(requester.user_id) {
            return Err(StoreError::Forbidden("default regions are read-only"));
        }
        inner.custom_regions.remove(&region_id);
        Ok(())
    }

    // ---- LPA directory ---------------------------------------------------

    pub async fn seed_lpas(&self, lpas: Vec<Lpa>) -> usize {
        let mut inner = self.inner.write().await;
        let mut added = 0;
        for lpa in lpas {
            if inner.lpas.insert(lpa.code.clone(), lpa).is_none() {
                added += 1;
            }
        }
        added
    }

    pub async fn list_lpas(&self) -> Vec<Lpa> {
        let inner = self.inner.read().await;
        inner.lpas.values().cloned().collect()
    }

    // ---- assisted sites --------------------------------------------------

    pub async fn submit_assisted_site(
        &self,
        requester: Requester,
        request: AssistedSiteRequest,
    ) -> Result<AssistedSite, StoreError> {
        request.validate()?;
        let mut inner = self.inner.write().await;
        inner.ensure_user(requester.user_id);
        let now = Utc::now();
        let assisted = AssistedSite {
            id: Uuid::new_v4(),
            user_id: requester.user_id,
            status: AssistedSiteStatus::Pending,
            site_name: request.site_name,
            address: request.address,
            contact_name: request.contact_name,
            contact_email: request.contact_email,
            contact_phone: request.contact_phone,
            developer_name: request.developer_name,
            plots: request.plots,
            tenures: request.tenures,
            notes: request.notes,
            location: request.location,
            boundary: request.boundary,
            payment_session_id: None,
            is_paid: false,
            published_site_id: None,
            created_at: now,
            updated_at: now,
        };
        inner.assisted_sites.insert(assisted.id, assisted.clone());
        Ok(assisted)
    }

    pub async fn get_assisted_site(
        &self,
        requester: Requester,
        assisted_id: Uuid,
    ) -> Result<AssistedSite, StoreError> {
        let inner = self.inner.read().await;
        let assisted = inner
            .assisted_sites
            .get(&assisted_id)
            .ok_or(StoreError::NotFound("assisted site"))?;
        if !requester.admin && assisted.user_id != requester.user_id {
            return Err(StoreError::NotFound("assisted site"));
        }
        Ok(assisted.clone())
    }

    /// Staff queue, optionally narrowed to one workflow state.
    pub async fn list_assisted_sites(
        &self,
        requester: Requester,
        status: Option<AssistedSiteStatus>,
    ) -> Result<Vec<AssistedSite>, StoreError> {
        if !requester.admin {
            return Err(StoreError::Forbidden("assisted-site queue is staff-only"));
        }
        let inner = self.inner.read().await;
        let mut rows: Vec<AssistedSite> = inner
            .assisted_sites
            .values()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    /// Opens (or returns) the payment session for an intake. Only the
    /// submitting seller can check out, and only while the row is pending.
    pub async fn create_checkout(
        &self,
        requester: Requester,
        assisted_id: Uuid,
        gateway: &dyn PaymentGateway,
    ) -> Result<PaymentSession, StoreError> {
        let existing = {
            let inner = self.inner.read().await;
            let assisted = inner
                .assisted_sites
                .get(&assisted_id)
                .ok_or(StoreError::NotFound("assisted site"))?;
            if assisted.user_id != requester.user_id {
                return Err(StoreError::NotFound("assisted site"));
            }
            if assisted.status != AssistedSiteStatus::Pending {
                return Err(StoreError::Conflict(format!(
                    "checkout is only available while pending, not {}",
                    assisted.status.as_str()
                )));
            }
            if assisted.is_paid {
                return Err(StoreError::Conflict("intake is already paid".to_string()));
            }
            assisted.payment_session_id.clone()
        };

        if let Some(session_id) = existing {
            return gateway
                .resume_session(&session_id)
                .await
                .map_err(StoreError::Io);
        }

        let session = gateway
            .create_session(assisted_id, ASSISTED_LISTING_FEE_PENCE)
            .await
            .map_err(StoreError::Io)?;

        let mut inner = self.inner.write().await;
        let assisted = inner
            .assisted_sites
            .get_mut(&assisted_id)
            .ok_or(StoreError::NotFound("assisted site"))?;
        assisted.payment_session_id = Some(session.session_id.clone());
        assisted.updated_at = Utc::now();
        info!(%assisted_id, session_id = %session.session_id, "opened checkout session");
        Ok(session)
    }

    /// Payment-confirmation callback. The session identifier is opaque; it
    /// is only matched against what checkout stored. Idempotent.
    pub async fn confirm_payment(
        &self,
        session_id: &str,
        gateway: &dyn PaymentGateway,
    ) -> Result<AssistedSite, StoreError> {
        let paid = gateway
            .session_paid(session_id)
            .await
            .map_err(StoreError::Io)?;
        if !paid {
            return Err(StoreError::Conflict(format!(
                "payment session {session_id} is not settled"
            )));
        }
        let mut inner = self.inner.write().await;
        let assisted = inner
            .assisted_sites
            .values_mut()
            .find(|a| a.payment_session_id.as_deref() == Some(session_id))
            .ok_or(StoreError::NotFound("assisted site"))?;
        if !assisted.is_paid {
            assisted.is_paid = true;
            assisted.updated_at = Utc::now();
            info!(assisted_id = %assisted.id, "payment confirmed");
        }
        Ok(assisted.clone())
    }

    /// `pending → processing`; gated on confirmed payment.
    pub async fn begin_processing(
        &self,
        requester: Requester,
        assisted_id: Uuid,
    ) -> Result<AssistedSite, StoreError> {
        if !requester.admin {
            return Err(StoreError::Forbidden("processing is staff-only"));
        }
        let mut inner = self.inner.write().await;
        let assisted = inner
            .assisted_sites
            .get_mut(&assisted_id)
            .ok_or(StoreError::NotFound("assisted site"))?;
        if assisted.status != AssistedSiteStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "cannot start processing from {}",
                assisted.status.as_str()
            )));
        }
        if !assisted.is_paid {
            return Err(StoreError::Conflict(
                "payment must be confirmed before processing".to_string(),
            ));
        }
        assisted.status = AssistedSiteStatus::Processing;
        assisted.updated_at = Utc::now();
        Ok(assisted.clone())
    }

    /// `processing → published`: creates the live opportunity on behalf of
    /// the submitting seller and links it. This is the only transition that
    /// populates `published_site_id`.
    pub async fn publish_assisted_site(
        &self,
        requester: Requester,
        assisted_id: Uuid,
        draft: NewOpportunity,
    ) -> Result<(AssistedSite, LiveOpportunity), StoreError> {
        if !requester.admin {
            return Err(StoreError::Forbidden("publication is staff-only"));
        }
        draft.validate()?;
        let tenures = draft.tenure_set();
        let mut inner = self.inner.write().await;
        let owner = {
            let assisted = inner
                .assisted_sites
                .get(&assisted_id)
                .ok_or(StoreError::NotFound("assisted site"))?;
            if assisted.status != AssistedSiteStatus::Processing {
                return Err(StoreError::Conflict(format!(
                    "cannot publish from {}",
                    assisted.status.as_str()
                )));
            }
            assisted.user_id
        };

        let now = Utc::now();
        let opportunity = LiveOpportunity {
            id: Uuid::new_v4(),
            user_id: owner,
            name: draft.name,
            address: draft.address,
            custom_address: draft.custom_address,
            opportunity_type: draft.opportunity_type,
            developer_name: draft.developer_name,
            developer_regions: draft.developer_regions,
            planning_status: draft.planning_status,
            land_purchase_status: draft.land_purchase_status,
            plots: draft.plots,
            tenures,
            lpa_codes: draft.lpa_codes,
            region_codes: draft.region_codes,
            location: draft.location,
            boundary: draft.boundary,
            start_on_site: draft.start_on_site,
            first_handover: draft.first_handover,
            final_handover: draft.final_handover,
            context: draft.context,
            programme: draft.programme,
            terms: draft.terms,
            documents: draft.documents,
            status: OpportunityStatus::Published,
            created_at: now,
            updated_at: now,
        };
        inner.opportunities.insert(opportunity.id, opportunity.clone());

        let assisted = inner
            .assisted_sites
            .get_mut(&assisted_id)
            .ok_or(StoreError::NotFound("assisted site"))?;
        assisted.status = AssistedSiteStatus::Published;
        assisted.published_site_id = Some(opportunity.id);
        assisted.updated_at = now;
        info!(%assisted_id, opportunity_id = %opportunity.id, "assisted site published");
        Ok((assisted.clone(), opportunity))
    }

    /// Terminal rejection; never carries a published reference.
    pub async fn reject_assisted_site(
        &self,
        requester: Requester,
        assisted_id: Uuid,
    ) -> Result<AssistedSite, StoreError> {
        if !requester.admin {
            return Err(StoreError::Forbidden("rejection is staff-only"));
        }
        let mut inner = self.inner.write().await;
        let assisted = inner
            .assisted_sites
            .get_mut(&assisted_id)
            .ok_or(StoreError::NotFound("assisted site"))?;
        match assisted.status {
            AssistedSiteStatus::Pending | AssistedSiteStatus::Processing => {
                assisted.status = AssistedSiteStatus::Rejected;
                assisted.updated_at = Utc::now();
                Ok(assisted.clone())
            }
            AssistedSiteStatus::Published | AssistedSiteStatus::Rejected => {
                Err(StoreError::Conflict(format!(
                    "cannot reject from {}",
                    assisted.status.as_str()
                )))
            }
        }
    }
}

// ---- payment gateway -----------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub session_id: String,
    pub checkout_url: String,
}

/// Port to the hosted payment processor. The processor itself is outside
/// this system; session identifiers are opaque and stored only for
/// reconciliation.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, reference: Uuid, amount_pence: u32)
        -> anyhow::Result<PaymentSession>;

    async fn resume_session(&self, session_id: &str) -> anyhow::Result<PaymentSession>;

    async fn session_paid(&self, session_id: &str) -> anyhow::Result<bool>;
}

/// Stand-in gateway: issues opaque session ids and treats a session as
/// settled once `settle` has been called, which is what the confirmation
/// webhook does in deployments.
#[derive(Debug, Default)]
pub struct OfflineGateway {
    sessions: Mutex<BTreeMap<String, bool>>,
}

impl OfflineGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a session as paid, as the processor's webhook would.
    pub async fn settle(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_id) {
            Some(paid) => {
                *paid = true;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn create_session(
        &self,
        reference: Uuid,
        _amount_pence: u32,
    ) -> anyhow::Result<PaymentSession> {
        let session_id = format!("cs_{}", Uuid::new_v4().simple());
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session_id.clone(), false);
        debug!(%reference, %session_id, "issued offline payment session");
        Ok(PaymentSession {
            checkout_url: format!("https://checkout.invalid/pay/{session_id}"),
            session_id,
        })
    }

    async fn resume_session(&self, session_id: &str) -> anyhow::Result<PaymentSession> {
        let sessions = self.sessions.lock().await;
        if !sessions.contains_key(session_id) {
            anyhow::bail!("unknown payment session {session_id}");
        }
        Ok(PaymentSession {
            session_id: session_id.to_string(),
            checkout_url: format!("https://checkout.invalid/pay/{session_id}"),
        })
    }

    async fn session_paid(&self, session_id: &str) -> anyhow::Result<bool> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.get(session_id).copied().unwrap_or(false))
    }
}

// ---- document store ------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
    pub url: String,
}

/// Hash-addressed storage for uploaded site documents.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn document_relative_path(site_id: Uuid, content_hash: &str, filename: &str) -> PathBuf {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        PathBuf::from(site_id.to_string()).join(format!("{content_hash}.{ext}"))
    }

    /// Stores bytes immutably under a hash-addressed path with an atomic
    /// temp-file rename; identical re-uploads deduplicate.
    pub async fn store_bytes(
        &self,
        site_id: Uuid,
        filename: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredDocument> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = Self::document_relative_path(site_id, &content_hash, filename);
        let absolute_path = self.root.join(&relative_path);
        let url = format!("/documents/{}", relative_path.display());

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating document directory {}", parent.display()))?;
        }

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking document path {}", absolute_path.display()))?
        {
            return Ok(StoredDocument {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: true,
                url,
            });
        }

        let temp_name = format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len());
        let temp_path = absolute_path
            .parent()
            .expect("document path always has parent")
            .join(temp_name);

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp document file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp document file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp document file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(StoredDocument {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: false,
                url,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(StoredDocument {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    deduplicated: true,
                    url,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp document {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

// ---- configuration and seeds ---------------------------------------------

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub documents_dir: PathBuf,
    pub seeds_dir: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        Self {
            documents_dir: std::env::var("SITELINE_DOCUMENTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./documents")),
            seeds_dir: std::env::var("SITELINE_SEEDS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./seeds")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LpaSeedFile {
    pub lpas: Vec<Lpa>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionSeedFile {
    pub regions: Vec<RegionSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionSeed {
    pub name: String,
    #[serde(default)]
    pub lpa_codes: Vec<String>,
}

pub fn load_lpa_seed(path: impl AsRef<Path>) -> anyhow::Result<LpaSeedFile> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn load_region_seed(path: impl AsRef<Path>) -> anyhow::Result<RegionSeedFile> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Loads both seed files from `seeds_dir` into the store; returns
/// (lpas added, regions added).
pub async fn seed_from_dir(
    store: &MemoryStore,
    seeds_dir: impl AsRef<Path>,
) -> anyhow::Result<(usize, usize)> {
    let seeds_dir = seeds_dir.as_ref();
    let lpa_file = load_lpa_seed(seeds_dir.join("lpas.yaml"))?;
    let region_file = load_region_seed(seeds_dir.join("regions.yaml"))?;

    let lpas_added = store.seed_lpas(lpa_file.lpas).await;
    let mut regions_added = 0;
    for region in region_file.regions {
        if store
            .seed_default_region(&region.name, region.lpa_codes)
            .await?
        {
            regions_added += 1;
        }
    }
    Ok((lpas_added, regions_added))
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteline_core::{GeoPoint, PlotMix};
    use tempfile::tempdir;

    fn buyer() -> Requester {
        Requester::user(Uuid::new_v4())
    }

    fn staff() -> Requester {
        Requester::admin(Uuid::new_v4())
    }

    fn opportunity_draft(name: &str) -> NewOpportunity {
        NewOpportunity {
            name: name.to_string(),
            address: "1 Foundry Way, Manchester".to_string(),
            custom_address: None,
            opportunity_type: OpportunityType::Section106,
            developer_name: Some("Northstone Homes".to_string()),
            developer_regions: vec!["north-west".to_string()],
            planning_status: Default::default(),
            land_purchase_status: Default::default(),
            plots: PlotMix::of(48),
            tenures: vec![Tenure::SocialRent, Tenure::SharedOwnership],
            lpa_codes: vec!["E08000003".to_string()],
            region_codes: vec!["north-west".to_string()],
            location: Some(GeoPoint { lng: -2.2426, lat: 53.4808 }),
            boundary: None,
            start_on_site: None,
            first_handover: None,
            final_handover: None,
            context: None,
            programme: None,
            terms: None,
            documents: vec![],
        }
    }

    fn assisted_request() -> AssistedSiteRequest {
        AssistedSiteRequest {
            site_name: "Mill Lane".to_string(),
            address: "Mill Lane, Leeds".to_string(),
            contact_name: "J. Carter".to_string(),
            contact_email: "j.carter@example.org".to_string(),
            contact_phone: "0113 496 0000".to_string(),
            developer_name: None,
            plots: 24,
            tenures: vec![Tenure::AffordableRent],
            notes: None,
            location: None,
            boundary: None,
        }
    }

    #[tokio::test]
    async fn draft_is_invisible_to_buyers_until_published() {
        let store = MemoryStore::new();
        let seller = buyer();
        let shopper = buyer();

        let created = store
            .create_opportunity(seller, opportunity_draft("Foundry Yard"))
            .await
            .unwrap();
        assert_eq!(created.status, OpportunityStatus::Draft);

        let listing = store
            .list_opportunities(shopper, &OpportunityFilter::default())
            .await
            .unwrap();
        assert!(listing.is_empty());
        assert!(matches!(
            store.get_opportunity(shopper, created.id).await,
            Err(StoreError::NotFound(_))
        ));

        store.publish_opportunity(seller, created.id).await.unwrap();
        let listing = store
            .list_opportunities(shopper, &OpportunityFilter::default())
            .await
            .unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(
            listing[0].tenures,
            vec![Tenure::SocialRent, Tenure::SharedOwnership]
        );
    }

    #[tokio::test]
    async fn withdrawn_cannot_be_republished() {
        let store = MemoryStore::new();
        let seller = buyer();
        let created = store
            .create_opportunity(seller, opportunity_draft("Foundry Yard"))
            .await
            .unwrap();
        store.publish_opportunity(seller, created.id).await.unwrap();
        store.withdraw_opportunity(seller, created.id).await.unwrap();
        assert!(matches!(
            store.publish_opportunity(seller, created.id).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn listing_filters_narrow_by_tenure_and_lpa() {
        let store = MemoryStore::new();
        let seller = buyer();
        let shopper = buyer();

        let a = store
            .create_opportunity(seller, opportunity_draft("A"))
            .await
            .unwrap();
        let mut other = opportunity_draft("B");
        other.tenures = vec![Tenure::OpenMarket];
        other.lpa_codes = vec!["E09000030".to_string()];
        let b = store.create_opportunity(seller, other).await.unwrap();
        store.publish_opportunity(seller, a.id).await.unwrap();
        store.publish_opportunity(seller, b.id).await.unwrap();

        let filter = OpportunityFilter {
            tenure: Some(Tenure::SocialRent),
            ..Default::default()
        };
        let rows = store.list_opportunities(shopper, &filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "A");

        let filter = OpportunityFilter {
            lpa_code: Some("E09000030".to_string()),
            ..Default::default()
        };
        let rows = store.list_opportunities(shopper, &filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "B");
    }

    #[tokio::test]
    async fn shortlist_add_is_idempotent_and_remove_is_a_noop_when_absent() {
        let store = MemoryStore::new();
        let seller = buyer();
        let shopper = buyer();
        let created = store
            .create_opportunity(seller, opportunity_draft("Foundry Yard"))
            .await
            .unwrap();
        store.publish_opportunity(seller, created.id).await.unwrap();

        assert!(store.shortlist_add(shopper, created.id).await.unwrap());
        assert!(!store.shortlist_add(shopper, created.id).await.unwrap());
        assert_eq!(store.shortlist_count(created.id).await, 1);

        assert!(store.shortlist_remove(shopper, created.id).await.unwrap());
        assert!(!store.shortlist_remove(shopper, created.id).await.unwrap());
        assert_eq!(store.shortlist_count(created.id).await, 0);
    }

    #[tokio::test]
    async fn concurrent_shortlist_adds_leave_exactly_one_row() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let seller = buyer();
        let shopper = buyer();
        let created = store
            .create_opportunity(seller, opportunity_draft("Foundry Yard"))
            .await
            .unwrap();
        store.publish_opportunity(seller, created.id).await.unwrap();

        let (first, second) = tokio::join!(
            store.shortlist_add(shopper, created.id),
            store.shortlist_add(shopper, created.id),
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        assert_eq!(outcomes.iter().filter(|added| **added).count(), 1);
        assert_eq!(store.shortlist_count(created.id).await, 1);
    }

    #[tokio::test]
    async fn interest_is_unique_per_pair() {
        let store = MemoryStore::new();
        let seller = buyer();
        let shopper = buyer();
        let created = store
            .create_opportunity(seller, opportunity_draft("Foundry Yard"))
            .await
            .unwrap();
        store.publish_opportunity(seller, created.id).await.unwrap();

        assert!(store.register_interest(shopper, created.id).await.unwrap());
        assert!(!store.register_interest(shopper, created.id).await.unwrap());
        let interests = store.interests_for(seller, created.id).await.unwrap();
        assert_eq!(interests.len(), 1);

        assert!(store.withdraw_interest(shopper, created.id).await.unwrap());
        assert!(!store.withdraw_interest(shopper, created.id).await.unwrap());
    }

    #[tokio::test]
    async fn region_predicates_hide_and_protect_rows() {
        let store = MemoryStore::new();
        let alice = buyer();
        let bob = buyer();

        store
            .seed_default_region("North West", vec!["E08000003".to_string()])
            .await
            .unwrap();
        let mine = store
            .create_region(
                alice,
                NewCustomRegion {
                    name: "My patch".to_string(),
                    lpa_codes: vec![],
                },
            )
            .await
            .unwrap();

        // Bob sees the default but not Alice's private region.
        let visible = store.list_regions(bob).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert!(visible[0].is_default);
        assert!(matches!(
            store.get_region(bob, mine.id).await,
            Err(StoreError::NotFound(_))
        ));

        // Same name is fine across owners, a conflict for the same owner.
        store
            .create_region(
                bob,
                NewCustomRegion {
                    name: "My patch".to_string(),
                    lpa_codes: vec![],
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            store
                .create_region(
                    alice,
                    NewCustomRegion {
                        name: "My patch".to_string(),
                        lpa_codes: vec![],
                    },
                )
                .await,
            Err(StoreError::Conflict(_))
        ));

        // Defaults are immutable to end users.
        let default_id = visible[0].id;
        assert!(matches!(
            store
                .update_region(
                    alice,
                    default_id,
                    NewCustomRegion {
                        name: "Renamed".to_string(),
                        lpa_codes: vec![],
                    },
                )
                .await,
            Err(StoreError::Forbidden(_))
        ));
        assert!(matches!(
            store.delete_region(alice, default_id).await,
            Err(StoreError::Forbidden(_))
        ));

        // Bob cannot touch Alice's row either; it reads as missing.
        assert!(matches!(
            store.delete_region(bob, mine.id).await,
            Err(StoreError::NotFound(_))
        ));
        store.delete_region(alice, mine.id).await.unwrap();
    }

    #[tokio::test]
    async fn assisted_workflow_enforces_payment_gate_and_reference() {
        let store = MemoryStore::new();
        let gateway = OfflineGateway::new();
        let seller = buyer();
        let admin = staff();

        let assisted = store
            .submit_assisted_site(seller, assisted_request())
            .await
            .unwrap();
        assert_eq!(assisted.status, AssistedSiteStatus::Pending);
        assert!(!assisted.is_paid);

        // Unpaid rows cannot enter processing.
        assert!(matches!(
            store.begin_processing(admin, assisted.id).await,
            Err(StoreError::Conflict(_))
        ));

        let session = store
            .create_checkout(seller, assisted.id, &gateway)
            .await
            .unwrap();
        assert!(session.session_id.starts_with("cs_"));

        // Unsettled session is rejected at confirmation time.
        assert!(matches!(
            store.confirm_payment(&session.session_id, &gateway).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(gateway.settle(&session.session_id).await);
        let paid = store
            .confirm_payment(&session.session_id, &gateway)
            .await
            .unwrap();
        assert!(paid.is_paid);

        let processing = store.begin_processing(admin, assisted.id).await.unwrap();
        assert_eq!(processing.status, AssistedSiteStatus::Processing);

        let (published, opportunity) = store
            .publish_assisted_site(admin, assisted.id, opportunity_draft("Mill Lane"))
            .await
            .unwrap();
        assert_eq!(published.status, AssistedSiteStatus::Published);
        assert_eq!(published.published_site_id, Some(opportunity.id));
        assert_eq!(opportunity.status, OpportunityStatus::Published);
        assert_eq!(opportunity.user_id, seller.user_id);

        // Published is terminal for the assisted row.
        assert!(matches!(
            store.reject_assisted_site(admin, assisted.id).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn assisted_publication_requires_processing_state() {
        let store = MemoryStore::new();
        let seller = buyer();
        let admin = staff();
        let assisted = store
            .submit_assisted_site(seller, assisted_request())
            .await
            .unwrap();
        assert!(matches!(
            store
                .publish_assisted_site(admin, assisted.id, opportunity_draft("Mill Lane"))
                .await,
            Err(StoreError::Conflict(_))
        ));

        let rejected = store.reject_assisted_site(admin, assisted.id).await.unwrap();
        assert_eq!(rejected.status, AssistedSiteStatus::Rejected);
        assert_eq!(rejected.published_site_id, None);
    }

    #[tokio::test]
    async fn assisted_queue_is_staff_only() {
        let store = MemoryStore::new();
        let seller = buyer();
        store
            .submit_assisted_site(seller, assisted_request())
            .await
            .unwrap();
        assert!(matches!(
            store.list_assisted_sites(seller, None).await,
            Err(StoreError::Forbidden(_))
        ));
        let queue = store.list_assisted_sites(staff(), None).await.unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn deleting_an_opportunity_cascades_and_nulls_back_references() {
        let store = MemoryStore::new();
        let gateway = OfflineGateway::new();
        let seller = buyer();
        let shopper = buyer();
        let admin = staff();

        let assisted = store
            .submit_assisted_site(seller, assisted_request())
            .await
            .unwrap();
        let session = store
            .create_checkout(seller, assisted.id, &gateway)
            .await
            .unwrap();
        gateway.settle(&session.session_id).await;
        store
            .confirm_payment(&session.session_id, &gateway)
            .await
            .unwrap();
        store.begin_processing(admin, assisted.id).await.unwrap();
        let (_, opportunity) = store
            .publish_assisted_site(admin, assisted.id, opportunity_draft("Mill Lane"))
            .await
            .unwrap();

        store.shortlist_add(shopper, opportunity.id).await.unwrap();
        store.register_interest(shopper, opportunity.id).await.unwrap();
        store
            .add_opportunity_tag(admin, opportunity.id, "brownfield")
            .await
            .unwrap();

        store.delete_opportunity(admin, opportunity.id).await.unwrap();

        assert_eq!(store.shortlist_count(opportunity.id).await, 0);
        let assisted = store.get_assisted_site(admin, assisted.id).await.unwrap();
        assert_eq!(assisted.published_site_id, None);
        assert_eq!(assisted.status, AssistedSiteStatus::Published);
    }

    #[tokio::test]
    async fn deleting_a_user_cascades_to_owned_rows() {
        let store = MemoryStore::new();
        let seller = buyer();
        let shopper = buyer();
        let created = store
            .create_opportunity(seller, opportunity_draft("Foundry Yard"))
            .await
            .unwrap();
        store.publish_opportunity(seller, created.id).await.unwrap();
        store.shortlist_add(shopper, created.id).await.unwrap();

        store.delete_user(seller.user_id).await.unwrap();

        assert!(matches!(
            store.get_opportunity(shopper, created.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.shortlist_count(created.id).await, 0);
    }

    #[tokio::test]
    async fn site_files_and_tags_follow_their_site() {
        let store = MemoryStore::new();
        let seller = buyer();
        let site = store
            .create_site(
                seller,
                NewSite {
                    name: "Foundry Yard".to_string(),
                    address: "1 Foundry Way".to_string(),
                    custom_address: None,
                    developer_name: None,
                    developer_regions: vec![],
                    lpa_codes: vec![],
                    region_codes: vec![],
                    planning_status: Default::default(),
                    land_purchase_status: Default::default(),
                    location: None,
                    boundary: None,
                    context: None,
                    programme: None,
                    terms: None,
                },
            )
            .await
            .unwrap();

        store.add_site_tag(seller, site.id, "brownfield").await.unwrap();
        store
            .attach_site_file(
                seller,
                site.id,
                "Title plan",
                None,
                "/documents/x.pdf",
                None,
            )
            .await
            .unwrap();
        assert_eq!(store.site_tags(seller, site.id).await.unwrap().len(), 1);
        assert_eq!(store.site_files(seller, site.id).await.unwrap().len(), 1);

        store.delete_site(seller, site.id).await.unwrap();
        assert!(matches!(
            store.site_tags(seller, site.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn document_store_deduplicates_identical_bytes() {
        let dir = tempdir().expect("tempdir");
        let documents = DocumentStore::new(dir.path());
        let site_id = Uuid::new_v4();

        let first = documents
            .store_bytes(site_id, "plan.pdf", b"%PDF-1.7 title plan")
            .await
            .expect("first store");
        let second = documents
            .store_bytes(site_id, "plan.pdf", b"%PDF-1.7 title plan")
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(first.url, second.url);
        assert!(first.absolute_path.exists());
        assert!(first.url.starts_with("/documents/"));
    }

    #[tokio::test]
    async fn seeds_load_and_reseed_idempotently() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("lpas.yaml"),
            "lpas:\n  - code: E08000003\n    name: Manchester\n  - code: E09000030\n    name: Tower Hamlets\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("regions.yaml"),
            "regions:\n  - name: North West\n    lpa_codes: [E08000003]\n",
        )
        .unwrap();

        let store = MemoryStore::new();
        let (lpas, regions) = seed_from_dir(&store, dir.path()).await.unwrap();
        assert_eq!((lpas, regions), (2, 1));

        let (lpas, regions) = seed_from_dir(&store, dir.path()).await.unwrap();
        assert_eq!((lpas, regions), (0, 0));

        assert_eq!(store.list_lpas().await.len(), 2);
        let defaults = store.list_regions(buyer()).await.unwrap();
        assert_eq!(defaults.len(), 1);
        assert!(defaults[0].is_default);
        assert_eq!(defaults[0].user_id, None);
    }
}
