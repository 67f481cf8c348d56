use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Why a set of extracted fields could not become a listing
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ListingValidationError {
    #[error("external id is empty")]
    EmptyId,
    #[error("title is empty")]
    EmptyTitle,
    #[error("price {0} is negative")]
    NegativePrice(i64),
    #[error("{field} must be a finite non-negative number, got {value}")]
    InvalidMeasure { field: &'static str, value: f64 },
    #[error("detail url {url:?} is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Core listing data model, one parsed result card
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingRecord {
    pub external_id: String,
    pub title: String,
    pub price_eur: i64,
    pub rooms: Option<f64>,
    pub size_sqm: Option<f64>,
    pub district: Option<String>,
    pub detail_url: Url,
    pub first_seen_at: DateTime<Utc>,
}

/// Raw fields pulled from a card before validation
#[derive(Debug, Clone, Default)]
pub struct ListingDraft {
    pub external_id: String,
    pub title: String,
    pub price_eur: i64,
    pub rooms: Option<f64>,
    pub size_sqm: Option<f64>,
    pub district: Option<String>,
    pub detail_url: String,
}

impl ListingDraft {
    /// Validate every required field and stamp the record with the current time.
    pub fn validate(self) -> Result<ListingRecord, ListingValidationError> {
        self.validate_at(Utc::now())
    }

    pub fn validate_at(self, seen_at: DateTime<Utc>) -> Result<ListingRecord, ListingValidationError> {
        let external_id = self.external_id.trim().to_string();
        if external_id.is_empty() {
            return Err(ListingValidationError::EmptyId);
        }

        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(ListingValidationError::EmptyTitle);
        }

        if self.price_eur < 0 {
            return Err(ListingValidationError::NegativePrice(self.price_eur));
        }

        for (field, value) in [("rooms", self.rooms), ("size_sqm", self.size_sqm)] {
            if let Some(value) = value {
                if !value.is_finite() || value < 0.0 {
                    return Err(ListingValidationError::InvalidMeasure { field, value });
                }
            }
        }

        let detail_url = Url::parse(&self.detail_url).map_err(|e| ListingValidationError::InvalidUrl {
            url: self.detail_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(detail_url.scheme(), "http" | "https") || detail_url.host_str().is_none() {
            return Err(ListingValidationError::InvalidUrl {
                url: self.detail_url,
                reason: "expected an absolute http(s) url".to_string(),
            });
        }

        let district = self
            .district
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        Ok(ListingRecord {
            external_id,
            title,
            price_eur: self.price_eur,
            rooms: self.rooms,
            size_sqm: self.size_sqm,
            district,
            detail_url,
            first_seen_at: seen_at,
        })
    }
}

/// Row stored for every listing id that has been reported once
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeenRecord {
    pub external_id: String,
    pub seen_at: DateTime<Utc>,
}

/// Listing as returned by the persistence service after an upsert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRow {
    pub external_id: String,
    pub title: String,
    pub price_eur: i64,
    pub rooms: Option<f64>,
    pub size_sqm: Option<f64>,
    pub district: Option<String>,
    pub detail_url: String,
    pub first_seen_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A user's saved search, consumed by notification layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferenceRecord {
    pub id: String,
    pub user_id: String,
    pub max_price_eur: Option<i64>,
    pub min_rooms: Option<f64>,
    pub min_size_sqm: Option<f64>,
    #[serde(default)]
    pub districts: Vec<String>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

impl PreferenceRecord {
    /// Whether a listing satisfies every bound this preference sets.
    ///
    /// Unknown listing measures never satisfy a minimum.
    pub fn matches(&self, listing: &ListingRecord) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(max) = self.max_price_eur {
            if listing.price_eur > max {
                return false;
            }
        }
        if let Some(min) = self.min_rooms {
            if listing.rooms.map_or(true, |rooms| rooms < min) {
                return false;
            }
        }
        if let Some(min) = self.min_size_sqm {
            if listing.size_sqm.map_or(true, |size| size < min) {
                return false;
            }
        }
        if !self.districts.is_empty() {
            let Some(district) = listing.district.as_deref() else {
                return false;
            };
            let district = district.to_lowercase();
            if !self
                .districts
                .iter()
                .any(|wanted| district.contains(&wanted.to_lowercase()))
            {
                return false;
            }
        }
        true
    }
}

impl From<&ListingRecord> for ListingRow {
    fn from(record: &ListingRecord) -> Self {
        Self {
            external_id: record.external_id.clone(),
            title: record.title.clone(),
            price_eur: record.price_eur,
            rooms: record.rooms,
            size_sqm: record.size_sqm,
            district: record.district.clone(),
            detail_url: record.detail_url.to_string(),
            first_seen_at: record.first_seen_at,
            updated_at: None,
        }
    }
}
