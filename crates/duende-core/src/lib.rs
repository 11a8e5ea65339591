//! Core domain model for the Duende artist profile enrichment pipeline.

use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "duende-core";

/// Publication status of an artist's profile page.
///
/// `Failed` is transient: a record carrying it is re-selected on the next
/// batch pass and retried through the same path as a record with no page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    Complete,
    Placeholder,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArtistMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_artist_image_url: Option<String>,
}

/// Persisted artist document. Field names mirror the document store wire
/// format; anything absent in the stored document deserializes to its
/// default here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtistRecord {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "hasProfilePage", default)]
    pub has_profile_page: bool,
    #[serde(rename = "profilePageUrl", default)]
    pub profile_page_url: Option<String>,
    #[serde(rename = "profileStatus", default)]
    pub profile_status: Option<ProfileStatus>,
    #[serde(rename = "short_bio", default)]
    pub short_bio: Option<String>,
    #[serde(default)]
    pub meta: ArtistMeta,
    #[serde(rename = "eventCount", default)]
    pub event_count: i64,
}

impl ArtistRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            has_profile_page: false,
            profile_page_url: None,
            profile_status: None,
            short_bio: None,
            meta: ArtistMeta::default(),
            event_count: 0,
        }
    }
}

/// Enrichment state of a record, keyed by `(hasProfilePage, profileStatus)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileState {
    /// No page exists yet.
    New,
    /// Full biography published.
    Complete,
    /// Minimal stand-in page published.
    Placeholder,
    /// A publish attempt did not complete; retried like `New`.
    Failed,
    /// Page exists but predates status tracking; needs a correction pass.
    LegacyUnstatused,
}

impl ProfileState {
    pub fn of(record: &ArtistRecord) -> Self {
        match (record.has_profile_page, record.profile_status) {
            (_, Some(ProfileStatus::Failed)) => Self::Failed,
            (false, _) => Self::New,
            (true, Some(ProfileStatus::Complete)) => Self::Complete,
            (true, Some(ProfileStatus::Placeholder)) => Self::Placeholder,
            (true, None) => Self::LegacyUnstatused,
        }
    }

    /// Whether a batch pass should pick this record up.
    pub fn needs_work(self) -> bool {
        matches!(self, Self::New | Self::Failed | Self::LegacyUnstatused)
    }
}

/// How sure the content generator is about its existence verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Outcome of asking the generator whether enough public information exists
/// to write a biography. Ephemeral; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    #[serde(rename = "artistExists")]
    pub exists: bool,
    pub confidence: Confidence,
}

impl VerificationResult {
    /// Fail-safe default for malformed verification payloads: assume the
    /// artist cannot be verified rather than raising.
    pub fn unverified() -> Self {
        Self {
            exists: false,
            confidence: Confidence::Low,
        }
    }
}

/// Verified content gathered for one artist, ready for assembly.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentBundle {
    pub short_bio: Option<String>,
    pub long_bio_markup: Option<String>,
    pub image_url: Option<String>,
    pub video_urls: Vec<String>,
}

/// A partial update map for one artist record. `None` fields are left
/// untouched by the store; applying the same update twice yields the same
/// record as applying it once.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArtistUpdate {
    pub has_profile_page: Option<bool>,
    pub profile_page_url: Option<String>,
    pub profile_status: Option<ProfileStatus>,
    pub short_bio: Option<String>,
    pub main_image_url: Option<String>,
}

impl ArtistUpdate {
    pub fn is_empty(&self) -> bool {
        self.has_profile_page.is_none()
            && self.profile_page_url.is_none()
            && self.profile_status.is_none()
            && self.short_bio.is_none()
            && self.main_image_url.is_none()
    }

    /// Merge this update into a record, field-wise. Shared by the in-memory
    /// store and by tests; the Postgres store applies the same semantics via
    /// a shallow document merge of [`ArtistUpdate::to_document`].
    pub fn apply_to(&self, record: &mut ArtistRecord) {
        if let Some(has_page) = self.has_profile_page {
            record.has_profile_page = has_page;
        }
        if let Some(url) = &self.profile_page_url {
            record.profile_page_url = Some(url.clone());
        }
        if let Some(status) = self.profile_status {
            record.profile_status = Some(status);
        }
        if let Some(bio) = &self.short_bio {
            record.short_bio = Some(bio.clone());
        }
        if let Some(image) = &self.main_image_url {
            record.meta.main_artist_image_url = Some(image.clone());
        }
    }

    /// Wire-format document fragment for a field-set partial write.
    pub fn to_document(&self) -> serde_json::Value {
        let mut doc = serde_json::Map::new();
        if let Some(has_page) = self.has_profile_page {
            doc.insert("hasProfilePage".into(), has_page.into());
        }
        if let Some(url) = &self.profile_page_url {
            doc.insert("profilePageUrl".into(), url.as_str().into());
        }
        if let Some(status) = self.profile_status {
            doc.insert(
                "profileStatus".into(),
                serde_json::to_value(status).expect("status serializes"),
            );
        }
        if let Some(bio) = &self.short_bio {
            doc.insert("short_bio".into(), bio.as_str().into());
        }
        if let Some(image) = &self.main_image_url {
            doc.insert(
                "meta".into(),
                serde_json::json!({ "main_artist_image_url": image }),
            );
        }
        serde_json::Value::Object(doc)
    }
}

pub fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Field-level merge policy: a freshly computed value enters the update only
/// if it is non-empty AND the stored value is empty, unless a full
/// regeneration was explicitly requested. This keeps a partial failure in
/// one lookup from blanking a value stored by an earlier pass.
pub fn merge_text(current: &Option<String>, fresh: Option<String>, force: bool) -> Option<String> {
    let fresh = fresh.filter(|v| !v.trim().is_empty());
    match fresh {
        Some(value) if force || is_blank(current) => Some(value),
        _ => None,
    }
}
