//! Core domain model for Siteline: sites, live opportunities, regions,
//! shortlists and the assisted-site intake entities.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "siteline-core";

/// Field-level rejection raised before anything reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("malformed email address `{0}`")]
    InvalidEmail(String),
    #[error("malformed phone number `{0}`")]
    InvalidPhone(String),
    #[error("`{value}` is not a valid {field}")]
    InvalidEnum { field: &'static str, value: String },
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("plot count must be greater than zero")]
    InvalidPlotCount,
    #[error("plot breakdown totals {breakdown} but plot count is {total}")]
    PlotBreakdownMismatch { total: u32, breakdown: u32 },
}

/// Lifecycle of a live opportunity. Published rows are visible to every
/// buyer; draft and withdrawn rows only to their owner and admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpportunityStatus {
    Draft,
    Published,
    Withdrawn,
}

impl OpportunityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "withdrawn" => Ok(Self::Withdrawn),
            other => Err(ValidationError::InvalidEnum {
                field: "opportunity status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commercial structure of the deal being offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OpportunityType {
    #[default]
    Section106,
    LandSale,
    PackageDeal,
    GoldenBrick,
    Turnkey,
}

impl OpportunityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Section106 => "section-106",
            Self::LandSale => "land-sale",
            Self::PackageDeal => "package-deal",
            Self::GoldenBrick => "golden-brick",
            Self::Turnkey => "turnkey",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "section-106" => Ok(Self::Section106),
            "land-sale" => Ok(Self::LandSale),
            "package-deal" => Ok(Self::PackageDeal),
            "golden-brick" => Ok(Self::GoldenBrick),
            "turnkey" => Ok(Self::Turnkey),
            other => Err(ValidationError::InvalidEnum {
                field: "opportunity type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PlanningStatus {
    Outline,
    Detailed,
    Pending,
    #[default]
    None,
}

impl PlanningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outline => "outline",
            Self::Detailed => "detailed",
            Self::Pending => "pending",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LandPurchaseStatus {
    Owned,
    UnderOffer,
    Exchanged,
    Completed,
    #[default]
    NotSecured,
}

impl LandPurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owned => "owned",
            Self::UnderOffer => "under-offer",
            Self::Exchanged => "exchanged",
            Self::Completed => "completed",
            Self::NotSecured => "not-secured",
        }
    }
}

/// Housing occupancy category offered on a scheme. The spaced aliases
/// cover payloads that write tenures the way listing copy does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tenure {
    #[serde(alias = "social rent")]
    SocialRent,
    #[serde(alias = "affordable rent")]
    AffordableRent,
    #[serde(alias = "shared ownership")]
    SharedOwnership,
    #[serde(alias = "open market")]
    OpenMarket,
    #[serde(alias = "build to rent")]
    BuildToRent,
    #[serde(alias = "supported living")]
    SupportedLiving,
}

impl Tenure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SocialRent => "social-rent",
            Self::AffordableRent => "affordable-rent",
            Self::SharedOwnership => "shared-ownership",
            Self::OpenMarket => "open-market",
            Self::BuildToRent => "build-to-rent",
            Self::SupportedLiving => "supported-living",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "social-rent" | "social rent" => Ok(Self::SocialRent),
            "affordable-rent" | "affordable rent" => Ok(Self::AffordableRent),
            "shared-ownership" | "shared ownership" => Ok(Self::SharedOwnership),
            "open-market" | "open market" => Ok(Self::OpenMarket),
            "build-to-rent" | "build to rent" => Ok(Self::BuildToRent),
            "supported-living" | "supported living" => Ok(Self::SupportedLiving),
            other => Err(ValidationError::InvalidEnum {
                field: "tenure",
                value: other.to_string(),
            }),
        }
    }
}

/// Workflow state of a staff-assisted listing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssistedSiteStatus {
    Pending,
    Processing,
    Published,
    Rejected,
}

impl AssistedSiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Published => "published",
            Self::Rejected => "rejected",
        }
    }
}

/// WGS 84 (EPSG:4326) longitude/latitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lng: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(ValidationError::InvalidGeometry(format!(
                "longitude {} out of range",
                self.lng
            )));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(ValidationError::InvalidGeometry(format!(
                "latitude {} out of range",
                self.lat
            )));
        }
        Ok(())
    }

    pub fn to_wkt(&self) -> String {
        format!("SRID=4326;POINT({} {})", self.lng, self.lat)
    }
}

/// Site boundary as a single closed exterior ring in EPSG:4326.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPolygon {
    pub exterior: Vec<GeoPoint>,
}

impl GeoPolygon {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.exterior.len() < 4 {
            return Err(ValidationError::InvalidGeometry(
                "polygon ring needs at least four points".to_string(),
            ));
        }
        let first = &self.exterior[0];
        let last = &self.exterior[self.exterior.len() - 1];
        if first != last {
            return Err(ValidationError::InvalidGeometry(
                "polygon ring is not closed".to_string(),
            ));
        }
        for point in &self.exterior {
            point.validate()?;
        }
        Ok(())
    }

    pub fn to_wkt(&self) -> String {
        let ring = self
            .exterior
            .iter()
            .map(|p| format!("{} {}", p.lng, p.lat))
            .collect::<Vec<_>>()
            .join(", ");
        format!("SRID=4326;POLYGON(({ring}))")
    }
}

/// Plot count with an optional per-tenure breakdown. When a breakdown is
/// present its figures must account for every plot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlotMix {
    pub total: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<BTreeMap<String, u32>>,
}

impl PlotMix {
    pub fn of(total: u32) -> Self {
        Self {
            total,
            breakdown: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.total == 0 {
            return Err(ValidationError::InvalidPlotCount);
        }
        if let Some(breakdown) = &self.breakdown {
            for key in breakdown.keys() {
                Tenure::parse(key)?;
            }
            let sum: u32 = breakdown.values().sum();
            if sum != self.total {
                return Err(ValidationError::PlotBreakdownMismatch {
                    total: self.total,
                    breakdown: sum,
                });
            }
        }
        Ok(())
    }
}

/// External document attached to an opportunity (URL plus title).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A seller-held development site prior to (or independent of) listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub address: String,
    pub custom_address: Option<String>,
    pub developer_name: Option<String>,
    pub developer_regions: Vec<String>,
    pub lpa_codes: Vec<String>,
    pub region_codes: Vec<String>,
    pub planning_status: PlanningStatus,
    pub land_purchase_status: LandPurchaseStatus,
    pub location: Option<GeoPoint>,
    pub boundary: Option<GeoPolygon>,
    pub context: Option<String>,
    pub programme: Option<String>,
    pub terms: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input payload for creating or replacing a site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSite {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub custom_address: Option<String>,
    #[serde(default)]
    pub developer_name: Option<String>,
    #[serde(default)]
    pub developer_regions: Vec<String>,
    #[serde(default)]
    pub lpa_codes: Vec<String>,
    #[serde(default)]
    pub region_codes: Vec<String>,
    #[serde(default)]
    pub planning_status: PlanningStatus,
    #[serde(default)]
    pub land_purchase_status: LandPurchaseStatus,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub boundary: Option<GeoPolygon>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub programme: Option<String>,
    #[serde(default)]
    pub terms: Option<String>,
}

impl NewSite {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)?;
        require("address", &self.address)?;
        if let Some(point) = &self.location {
            point.validate()?;
        }
        if let Some(polygon) = &self.boundary {
            polygon.validate()?;
        }
        Ok(())
    }
}

/// A published (or publishable) marketplace listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveOpportunity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub address: String,
    pub custom_address: Option<String>,
    pub opportunity_type: OpportunityType,
    pub developer_name: Option<String>,
    pub developer_regions: Vec<String>,
    pub planning_status: PlanningStatus,
    pub land_purchase_status: LandPurchaseStatus,
    pub plots: PlotMix,
    pub tenures: Vec<Tenure>,
    pub lpa_codes: Vec<String>,
    pub region_codes: Vec<String>,
    pub location: Option<GeoPoint>,
    pub boundary: Option<GeoPolygon>,
    pub start_on_site: Option<NaiveDate>,
    pub first_handover: Option<NaiveDate>,
    pub final_handover: Option<NaiveDate>,
    pub context: Option<String>,
    pub programme: Option<String>,
    pub terms: Option<String>,
    pub documents: Vec<DocumentRef>,
    pub status: OpportunityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input payload for creating or replacing an opportunity. New rows always
/// enter the lifecycle as drafts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOpportunity {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub custom_address: Option<String>,
    #[serde(default)]
    pub opportunity_type: OpportunityType,
    #[serde(default)]
    pub developer_name: Option<String>,
    #[serde(default)]
    pub developer_regions: Vec<String>,
    #[serde(default)]
    pub planning_status: PlanningStatus,
    #[serde(default)]
    pub land_purchase_status: LandPurchaseStatus,
    pub plots: PlotMix,
    #[serde(default)]
    pub tenures: Vec<Tenure>,
    #[serde(default)]
    pub lpa_codes: Vec<String>,
    #[serde(default)]
    pub region_codes: Vec<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub boundary: Option<GeoPolygon>,
    #[serde(default)]
    pub start_on_site: Option<NaiveDate>,
    #[serde(default)]
    pub first_handover: Option<NaiveDate>,
    #[serde(default)]
    pub final_handover: Option<NaiveDate>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub programme: Option<String>,
    #[serde(default)]
    pub terms: Option<String>,
    #[serde(default)]
    pub documents: Vec<DocumentRef>,
}

impl NewOpportunity {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)?;
        require("address", &self.address)?;
        self.plots.validate()?;
        if let Some(point) = &self.location {
            point.validate()?;
        }
        if let Some(polygon) = &self.boundary {
            polygon.validate()?;
        }
        Ok(())
    }

    /// Tenure set with duplicates removed, preserving first occurrence.
    pub fn tenure_set(&self) -> Vec<Tenure> {
        let mut seen = Vec::new();
        for tenure in &self.tenures {
            if !seen.contains(tenure) {
                seen.push(*tenure);
            }
        }
        seen
    }
}

/// Free-text label attached to a site; removed with its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteTag {
    pub id: Uuid,
    pub site_id: Uuid,
    pub tag: String,
}

/// Free-text label attached to an opportunity; removed with its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityTag {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub tag: String,
}

/// Uploaded file reference attached to a site; removed with its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteFile {
    pub id: Uuid,
    pub site_id: Uuid,
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Named geographic grouping. Default rows belong to the system (no owner,
/// globally readable); user rows belong to exactly one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomRegion {
    pub id: Uuid,
    pub name: String,
    pub user_id: Option<Uuid>,
    pub is_default: bool,
    pub lpa_codes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCustomRegion {
    pub name: String,
    #[serde(default)]
    pub lpa_codes: Vec<String>,
}

impl NewCustomRegion {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("name", &self.name)
    }
}

/// A buyer's expression of interest; unique per (opportunity, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpportunityInterest {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// A buyer's bookmark; unique per (user, opportunity).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortlist {
    pub id: Uuid,
    pub user_id: Uuid,
    pub opportunity_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Seller request for a staff-assisted (paid) listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistedSite {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: AssistedSiteStatus,
    pub site_name: String,
    pub address: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: String,
    pub developer_name: Option<String>,
    pub plots: u32,
    pub tenures: Vec<Tenure>,
    pub notes: Option<String>,
    pub location: Option<GeoPoint>,
    pub boundary: Option<GeoPolygon>,
    pub payment_session_id: Option<String>,
    pub is_paid: bool,
    pub published_site_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Intake payload for the assisted path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistedSiteRequest {
    pub site_name: String,
    pub address: String,
    pub contact_name: String,
    pub contact_email: String,
    pub contact_phone: String,
    #[serde(default)]
    pub developer_name: Option<String>,
    pub plots: u32,
    #[serde(default)]
    pub tenures: Vec<Tenure>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub boundary: Option<GeoPolygon>,
}

impl AssistedSiteRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("site_name", &self.site_name)?;
        require("address", &self.address)?;
        require("contact_name", &self.contact_name)?;
        validate_email(&self.contact_email)?;
        validate_phone(&self.contact_phone)?;
        if self.plots == 0 {
            return Err(ValidationError::InvalidPlotCount);
        }
        if let Some(point) = &self.location {
            point.validate()?;
        }
        if let Some(polygon) = &self.boundary {
            polygon.validate()?;
        }
        Ok(())
    }
}

/// Local Planning Authority reference entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lpa {
    pub code: String,
    pub name: String,
}

/// Authenticated caller identity as asserted by the fronting API layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub user_id: Uuid,
    pub admin: bool,
}

impl Requester {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            admin: false,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            admin: true,
        }
    }
}

pub fn require(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField(field.to_string()))
    } else {
        Ok(())
    }
}

pub fn validate_email(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    let Some((local, domain)) = trimmed.split_once('@') else {
        return Err(ValidationError::InvalidEmail(value.to_string()));
    };
    if local.is_empty() || domain.is_empty() || !domain.contains('.') || trimmed.contains(' ') {
        return Err(ValidationError::InvalidEmail(value.to_string()));
    }
    Ok(())
}

pub fn validate_phone(value: &str) -> Result<(), ValidationError> {
    let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
    let allowed = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '+' | '-' | '(' | ')'));
    if digits < 7 || digits > 15 || !allowed {
        return Err(ValidationError::InvalidPhone(value.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OpportunityStatus::Draft,
            OpportunityStatus::Published,
            OpportunityStatus::Withdrawn,
        ] {
            assert_eq!(OpportunityStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(OpportunityStatus::parse("archived").is_err());
    }

    #[test]
    fn tenure_accepts_spaced_and_kebab_forms() {
        assert_eq!(Tenure::parse("social rent").unwrap(), Tenure::SocialRent);
        assert_eq!(
            Tenure::parse("shared-ownership").unwrap(),
            Tenure::SharedOwnership
        );
        assert!(Tenure::parse("freehold").is_err());

        let tenures: Vec<Tenure> =
            serde_json::from_str(r#"["social rent", "shared-ownership"]"#).unwrap();
        assert_eq!(tenures, vec![Tenure::SocialRent, Tenure::SharedOwnership]);
    }

    #[test]
    fn point_rejects_out_of_range_coordinates() {
        assert!(GeoPoint { lng: -0.1276, lat: 51.5072 }.validate().is_ok());
        assert!(GeoPoint { lng: 181.0, lat: 0.0 }.validate().is_err());
        assert!(GeoPoint { lng: 0.0, lat: -90.5 }.validate().is_err());
    }

    #[test]
    fn polygon_must_be_a_closed_ring() {
        let open = GeoPolygon {
            exterior: vec![
                GeoPoint { lng: 0.0, lat: 0.0 },
                GeoPoint { lng: 1.0, lat: 0.0 },
                GeoPoint { lng: 1.0, lat: 1.0 },
                GeoPoint { lng: 0.0, lat: 1.0 },
            ],
        };
        assert!(open.validate().is_err());

        let mut closed = open.clone();
        closed.exterior.push(GeoPoint { lng: 0.0, lat: 0.0 });
        assert!(closed.validate().is_ok());
        assert!(closed.to_wkt().starts_with("SRID=4326;POLYGON(("));
    }

    #[test]
    fn plot_mix_breakdown_must_account_for_every_plot() {
        let mut breakdown = BTreeMap::new();
        breakdown.insert("social-rent".to_string(), 30);
        breakdown.insert("shared-ownership".to_string(), 20);

        let mix = PlotMix {
            total: 50,
            breakdown: Some(breakdown.clone()),
        };
        assert!(mix.validate().is_ok());

        let short = PlotMix {
            total: 60,
            breakdown: Some(breakdown),
        };
        assert_eq!(
            short.validate().unwrap_err(),
            ValidationError::PlotBreakdownMismatch {
                total: 60,
                breakdown: 50
            }
        );
        assert!(PlotMix::of(0).validate().is_err());
    }

    #[test]
    fn plot_breakdown_rejects_unknown_tenure_keys() {
        let mut breakdown = BTreeMap::new();
        breakdown.insert("leasehold".to_string(), 10);
        let mix = PlotMix {
            total: 10,
            breakdown: Some(breakdown),
        };
        assert!(matches!(
            mix.validate(),
            Err(ValidationError::InvalidEnum { field: "tenure", .. })
        ));
    }

    #[test]
    fn contact_validation_catches_malformed_input() {
        assert!(validate_email("dev@northstone.co.uk").is_ok());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_phone("+44 20 7946 0958").is_ok());
        assert!(validate_phone("12345").is_err());
        assert!(validate_phone("call me maybe").is_err());
    }

    #[test]
    fn assisted_request_requires_positive_plots_and_contact() {
        let request = AssistedSiteRequest {
            site_name: "Mill Lane".into(),
            address: "Mill Lane, Leeds".into(),
            contact_name: "J. Carter".into(),
            contact_email: "j.carter@example.org".into(),
            contact_phone: "0113 496 0000".into(),
            developer_name: None,
            plots: 0,
            tenures: vec![],
            notes: None,
            location: None,
            boundary: None,
        };
        assert_eq!(
            request.validate().unwrap_err(),
            ValidationError::InvalidPlotCount
        );

        let ok = AssistedSiteRequest {
            plots: 24,
            ..request
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn tenure_set_removes_duplicates() {
        let draft = NewOpportunity {
            name: "x".into(),
            address: "y".into(),
            custom_address: None,
            opportunity_type: OpportunityType::default(),
            developer_name: None,
            developer_regions: vec![],
            planning_status: PlanningStatus::default(),
            land_purchase_status: LandPurchaseStatus::default(),
            plots: PlotMix::of(10),
            tenures: vec![Tenure::SocialRent, Tenure::SocialRent, Tenure::OpenMarket],
            lpa_codes: vec![],
            region_codes: vec![],
            location: None,
            boundary: None,
            start_on_site: None,
            first_handover: None,
            final_handover: None,
            context: None,
            programme: None,
            terms: None,
            documents: vec![],
        };
        assert_eq!(draft.tenure_set(), vec![Tenure::SocialRent, Tenure::OpenMarket]);
    }
}
