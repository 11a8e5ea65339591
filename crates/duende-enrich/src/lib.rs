//! Profile enrichment pipeline: content assembly, the per-artist state
//! machine, and the batch coordinator that drives it one artist at a time.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use duende_adapters::{
    extract_slug, strip_markup, AdapterError, ContentGenerator, GeminiGenerator,
    GoogleImageSearch, ImageSearch, NewPage, PageUpdate, Publisher, VideoSearch,
    WordPressPublisher, YoutubeVideoSearch,
};
use duende_core::{
    merge_text, ArtistRecord, ArtistUpdate, ContentBundle, ProfileState, ProfileStatus,
};
use duende_storage::{ArtistStore, HttpClient, HttpClientConfig, PgArtistStore};
use scraper::{Html, Selector};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "duende-enrich";

/// Shown on placeholder pages when no artist image could be discovered.
pub const FALLBACK_IMAGE_URL: &str =
    "https://buscador.afland.es/assets/flamenco-placeholder.png";
const EVENT_SEARCH_URL: &str = "https://buscador.afland.es/";
/// Page folder every artist profile is filed under in the publisher.
const PAGE_FOLDER_ID: u64 = 40;
const MAX_VIDEO_RESULTS: usize = 3;
const BACKFILL_LIMIT: i64 = 100;
const BACKFILL_PACING: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
#[error("required environment variable {0} is not set")]
pub struct ConfigError(pub &'static str);

/// All environment-sourced settings, read once at process start and passed
/// by reference from there on.
#[derive(Debug, Clone)]
pub struct EnrichConfig {
    pub database_url: String,
    pub gemini_api_key: String,
    pub google_api_key: String,
    pub custom_search_engine_id: String,
    pub wp_url: String,
    pub wp_user: String,
    pub wp_password: String,
    pub batch: BatchOptions,
    pub http_timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub batch_size: i64,
    pub pacing: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 25,
            pacing: Duration::from_secs(15),
        }
    }
}

fn required_env(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError(name)),
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

impl EnrichConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required_env("DATABASE_URL")?,
            gemini_api_key: required_env("GEMINI_API_KEY")?,
            google_api_key: required_env("GOOGLE_API_KEY")?,
            custom_search_engine_id: required_env("CUSTOM_SEARCH_ENGINE_ID")?,
            wp_url: required_env("WP_URL")?.trim_end_matches('/').to_string(),
            wp_user: required_env("WP_USER")?,
            wp_password: required_env("WP_PASSWORD")?,
            batch: BatchOptions {
                batch_size: env_parse("DUENDE_BATCH_SIZE", 25),
                pacing: Duration::from_secs(env_parse("DUENDE_PACING_SECS", 15)),
            },
            http_timeout: Duration::from_secs(env_parse("DUENDE_HTTP_TIMEOUT_SECS", 30)),
            user_agent: std::env::var("DUENDE_USER_AGENT")
                .unwrap_or_else(|_| "duende-enrich/0.1".to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// External service bundle
// ---------------------------------------------------------------------------

pub struct Services {
    pub generator: Box<dyn ContentGenerator>,
    pub images: Box<dyn ImageSearch>,
    pub videos: Box<dyn VideoSearch>,
    pub publisher: Box<dyn Publisher>,
}

impl Services {
    pub fn from_config(config: &EnrichConfig) -> Result<Self> {
        let http = HttpClient::new(HttpClientConfig {
            timeout: config.http_timeout,
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        Ok(Self {
            generator: Box::new(GeminiGenerator::new(http.clone(), &config.gemini_api_key)),
            images: Box::new(GoogleImageSearch::new(
                http.clone(),
                &config.google_api_key,
                &config.custom_search_engine_id,
            )),
            videos: Box::new(YoutubeVideoSearch::new(http.clone(), &config.google_api_key)),
            publisher: Box::new(WordPressPublisher::new(
                http,
                &config.wp_url,
                &config.wp_user,
                &config.wp_password,
            )),
        })
    }
}

// ---------------------------------------------------------------------------
// Content assembly
// ---------------------------------------------------------------------------

const PROFILE_STYLE: &str = "<style>\n\
h1.entry-title { color: #000000 !important; }\n\
.artist-profile-content p {color: #333333 !important;}\n\
.artist-profile-content h2 {color: #26145F !important;}\n\
.artist-title-box { background-color: #26145F; border-radius: 15px; padding: 20px; margin-bottom: 20px; }\n\
.artist-title-box h2 { color: #FFFFFF !important; }\n\
.artist-title-box p { color: #FFFFFF !important; font-style:italic; font-weight:700; }\n\
</style>";

const PLACEHOLDER_STYLE: &str = "<style>\n\
h1.entry-title { color: #000000 !important; }\n\
.artist-placeholder-image { max-width: 300px; margin: auto; }\n\
.artist-profile-content p {color: #333333 !important;}\n\
.artist-title-box { background-color: #26145F; border-radius: 15px; padding: 20px; margin-bottom: 20px; }\n\
.artist-title-box h2 { color: #FFFFFF !important; }\n\
</style>";

pub fn to_embed_url(watch_url: &str) -> String {
    watch_url.replace("watch?v=", "embed/")
}

/// Render the full profile body: title/short-bio box, separator, long
/// biography, media section, in that fixed order. Pure; identical input
/// yields byte-identical output.
pub fn render_complete_page(artist_name: &str, bundle: &ContentBundle) -> String {
    let mut videos_html = String::from("<h2>Actuaciones Destacadas</h2>");
    for url in &bundle.video_urls {
        let embed = to_embed_url(url);
        videos_html.push_str(&format!(
            "\n<div style=\"position: relative; padding-bottom: 56.25%; height: 0; \
             overflow: hidden; margin-bottom: 1em;\">\n<iframe src=\"{embed}\" \
             style=\"position: absolute; top: 0; left: 0; width: 100%; height: 100%;\" \
             frameborder=\"0\" allowfullscreen></iframe>\n</div>"
        ));
    }

    let image_html = bundle
        .image_url
        .as_deref()
        .map(|url| {
            format!(
                "<div class=\"wp-block-column\" style=\"flex-basis:33.33%\">\
                 <figure class=\"wp-block-image size-large\">\
                 <img src=\"{url}\" alt=\"{artist_name}\"/></figure></div>"
            )
        })
        .unwrap_or_default();
    let column_basis = if bundle.image_url.is_some() { "66.66%" } else { "100%" };
    let short_bio = bundle.short_bio.as_deref().unwrap_or("");
    let long_bio = bundle.long_bio_markup.as_deref().unwrap_or("");

    format!(
        "{PROFILE_STYLE}\n\
         <div class=\"wp-block-group artist-profile-content\">\n\
         <div class=\"wp-block-columns\">\n\
         {image_html}\n\
         <div class=\"wp-block-column\" style=\"flex-basis:{column_basis}\">\n\
         <div class=\"artist-title-box\">\n\
         <h2>{artist_name}</h2>\n\
         <p>{short_bio}</p>\n\
         </div>\n\
         </div>\n\
         </div>\n\
         <hr class=\"wp-block-separator has-alpha-channel-opacity\"/>\n\
         {long_bio}\n\
         {videos_html}\n\
         </div>"
    )
}

/// Render the minimal stand-in body for an unverifiable artist. Always
/// references a concrete image (the fixed fallback when discovery found
/// nothing) and a search call-to-action keyed on the URL-encoded name.
pub fn render_placeholder_page(artist_name: &str, image_url: Option<&str>) -> String {
    let image = image_url.unwrap_or(FALLBACK_IMAGE_URL);
    let encoded_name = urlencoding::encode(artist_name);

    format!(
        "{PLACEHOLDER_STYLE}\n\
         <div class=\"wp-block-group artist-profile-content\">\n\
         <div class=\"artist-title-box\">\n\
         <h2>{artist_name}</h2>\n\
         </div>\n\
         <figure class=\"wp-block-image size-large artist-placeholder-image\">\
         <img src=\"{image}\" alt=\"Imagen no disponible\"/></figure>\n\
         <p>En Andalucía Flamenco Land, estamos continuamente comprobando y \
         verificando datos y biografías de los artistas flamencos de todo el mundo.</p>\n\
         <p>Actualmente no disponemos de información biográfica detallada para \
         <strong>{artist_name}</strong>. Nuestro equipo está trabajando para ampliar \
         nuestro archivo.</p>\n\
         <p>Mientras tanto, te invitamos a buscar sus próximas actuaciones y eventos \
         en nuestro buscador especializado:</p>\n\
         <div class=\"wp-block-buttons\"><div class=\"wp-block-button is-style-fill\">\
         <a class=\"wp-block-button__link has-white-color has-vivid-red-background-color \
         has-text-color has-background\" href=\"{EVENT_SEARCH_URL}?q={encoded_name}\" \
         target=\"_blank\" rel=\"noreferrer noopener\">Buscar eventos de {artist_name}</a>\
         </div></div>\n\
         </div>"
    )
}

// ---------------------------------------------------------------------------
// Profile state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOutcome {
    Completed,
    Placeholder,
    /// Correction pass could not locate the existing page; nothing written.
    Unresolved,
    Skipped,
}

fn some_nonempty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Try each query variant in order and accept the first hit. Exhausting all
/// variants is not an error; "no image" is valid input downstream.
async fn discover_image(images: &dyn ImageSearch, artist_name: &str) -> Option<String> {
    let queries = [
        format!("{artist_name} flamenco retrato primer plano"),
        format!("{artist_name} actuando en directo"),
        format!("{artist_name} flamenco"),
    ];
    for query in &queries {
        match images.find_images(query, 1).await {
            Ok(links) => {
                if let Some(link) = links.into_iter().next() {
                    return Some(link);
                }
            }
            Err(err) => warn!(%query, error = %err, "image query failed"),
        }
    }
    None
}

async fn discover_videos(videos: &dyn VideoSearch, artist_name: &str) -> Vec<String> {
    let query = format!("{artist_name} en directo");
    match videos.find_videos(&query, MAX_VIDEO_RESULTS).await {
        Ok(urls) => urls,
        Err(err) => {
            warn!(artist = artist_name, error = %err, "video search failed");
            Vec::new()
        }
    }
}

async fn gather_generated_bundle(
    services: &Services,
    artist_name: &str,
) -> Result<ContentBundle, AdapterError> {
    let bios = services.generator.generate_bios(artist_name).await?;
    let video_urls = discover_videos(services.videos.as_ref(), artist_name).await;
    let image_url = discover_image(services.images.as_ref(), artist_name).await;
    Ok(ContentBundle {
        short_bio: some_nonempty(bios.short_bio),
        long_bio_markup: some_nonempty(bios.long_bio_markup),
        image_url,
        video_urls,
    })
}

async fn gather_reformatted_bundle(
    services: &Services,
    artist_name: &str,
    existing_markup: &str,
) -> Result<ContentBundle, AdapterError> {
    let plain_text = strip_markup(existing_markup);
    let long_bio = services
        .generator
        .reformat_biography(artist_name, &plain_text)
        .await?;
    let short_bio = services.generator.generate_short_bio(artist_name).await?;
    let video_urls = discover_videos(services.videos.as_ref(), artist_name).await;
    let image_url = discover_image(services.images.as_ref(), artist_name).await;
    Ok(ContentBundle {
        short_bio: some_nonempty(short_bio),
        long_bio_markup: some_nonempty(long_bio),
        image_url,
        video_urls,
    })
}

fn completion_update(
    record: &ArtistRecord,
    url: String,
    bundle: &ContentBundle,
    force: bool,
) -> ArtistUpdate {
    ArtistUpdate {
        has_profile_page: Some(true),
        profile_page_url: Some(url),
        profile_status: Some(ProfileStatus::Complete),
        short_bio: merge_text(&record.short_bio, bundle.short_bio.clone(), force),
        main_image_url: merge_text(
            &record.meta.main_artist_image_url,
            bundle.image_url.clone(),
            force,
        ),
    }
}

fn placeholder_update(
    record: &ArtistRecord,
    url: String,
    image_url: Option<String>,
    force: bool,
) -> ArtistUpdate {
    let image = image_url.or_else(|| Some(FALLBACK_IMAGE_URL.to_string()));
    ArtistUpdate {
        has_profile_page: Some(true),
        profile_page_url: Some(url),
        profile_status: Some(ProfileStatus::Placeholder),
        short_bio: None,
        main_image_url: merge_text(&record.meta.main_artist_image_url, image, force),
    }
}

/// Publish against the page recorded on the record when it still exists,
/// otherwise create a fresh one. Keeps a failed retry from stamping out a
/// duplicate page.
async fn publish_page(
    publisher: &dyn Publisher,
    record: &ArtistRecord,
    body: String,
    main_image_url: Option<&str>,
) -> Result<String, AdapterError> {
    if let Some(slug) = record.profile_page_url.as_deref().and_then(extract_slug) {
        if let Some(page) = publisher.find_by_slug(&slug).await? {
            return publisher
                .update_page(
                    page.id,
                    PageUpdate {
                        title: record.name.clone(),
                        body,
                        main_image_url: main_image_url.map(str::to_string),
                    },
                )
                .await;
        }
    }
    let page = publisher
        .create_page(NewPage {
            title: record.name.clone(),
            body,
            status: "publish".to_string(),
            folder_ids: vec![PAGE_FOLDER_ID],
            main_image_url: main_image_url.map(str::to_string),
        })
        .await?;
    Ok(page.url)
}

/// `NEW`/`FAILED` path: verify, then publish either a complete profile or a
/// placeholder.
async fn enrich_unpublished(
    services: &Services,
    record: &ArtistRecord,
    force: bool,
) -> Result<(ProfileOutcome, ArtistUpdate), AdapterError> {
    let verification = services.generator.verify_existence(&record.name).await?;
    if verification.exists {
        let bundle = gather_generated_bundle(services, &record.name).await?;
        let body = render_complete_page(&record.name, &bundle);
        let url = publish_page(
            services.publisher.as_ref(),
            record,
            body,
            bundle.image_url.as_deref(),
        )
        .await?;
        Ok((
            ProfileOutcome::Completed,
            completion_update(record, url, &bundle, force),
        ))
    } else {
        let image = discover_image(services.images.as_ref(), &record.name).await;
        let body = render_placeholder_page(&record.name, image.as_deref());
        let meta_image = image
            .clone()
            .unwrap_or_else(|| FALLBACK_IMAGE_URL.to_string());
        let url = publish_page(
            services.publisher.as_ref(),
            record,
            body,
            Some(meta_image.as_str()),
        )
        .await?;
        Ok((
            ProfileOutcome::Placeholder,
            placeholder_update(record, url, image, force),
        ))
    }
}

/// `LEGACY_UNSTATUSED` correction pass: rework the existing page in place.
/// A page that cannot be located leaves the record untouched and reported
/// rather than silently fabricating a new one.
async fn reformat_legacy(
    services: &Services,
    record: &ArtistRecord,
) -> Result<(ProfileOutcome, ArtistUpdate), AdapterError> {
    let Some(page) = services.publisher.find_by_title(&record.name).await? else {
        warn!(artist = %record.name, "existing page not found; leaving record unresolved");
        return Ok((ProfileOutcome::Unresolved, ArtistUpdate::default()));
    };

    let verification = services.generator.verify_existence(&record.name).await?;
    if verification.exists {
        let bundle = gather_reformatted_bundle(services, &record.name, &page.content_markup).await?;
        let body = render_complete_page(&record.name, &bundle);
        let url = services
            .publisher
            .update_page(
                page.id,
                PageUpdate {
                    title: record.name.clone(),
                    body,
                    main_image_url: bundle.image_url.clone(),
                },
            )
            .await?;
        Ok((
            ProfileOutcome::Completed,
            completion_update(record, url, &bundle, false),
        ))
    } else {
        let body = render_placeholder_page(&record.name, None);
        let url = services
            .publisher
            .update_page(
                page.id,
                PageUpdate {
                    title: record.name.clone(),
                    body,
                    main_image_url: Some(FALLBACK_IMAGE_URL.to_string()),
                },
            )
            .await?;
        Ok((
            ProfileOutcome::Placeholder,
            placeholder_update(record, url, None, false),
        ))
    }
}

/// One state-machine step for a batch candidate. Decides the next action
/// from `(hasProfilePage, profileStatus)` and returns the outcome plus the
/// partial update to merge back.
pub async fn advance_profile(
    services: &Services,
    record: &ArtistRecord,
) -> Result<(ProfileOutcome, ArtistUpdate), AdapterError> {
    match ProfileState::of(record) {
        ProfileState::New | ProfileState::Failed => {
            enrich_unpublished(services, record, false).await
        }
        ProfileState::LegacyUnstatused => reformat_legacy(services, record).await,
        ProfileState::Complete | ProfileState::Placeholder => {
            Ok((ProfileOutcome::Skipped, ArtistUpdate::default()))
        }
    }
}

/// Human-invoked single-artist refresh. Works against the page located via
/// the recorded URL when one exists, creating a new page otherwise, and
/// regenerates every content field.
pub async fn force_update_profile(
    services: &Services,
    record: &ArtistRecord,
) -> Result<(ProfileOutcome, ArtistUpdate), AdapterError> {
    let existing = match record.profile_page_url.as_deref().and_then(extract_slug) {
        Some(slug) => services.publisher.find_by_slug(&slug).await?,
        None => None,
    };

    let Some(page) = existing else {
        return enrich_unpublished(services, record, true).await;
    };

    let verification = services.generator.verify_existence(&record.name).await?;
    if verification.exists {
        let bundle = gather_reformatted_bundle(services, &record.name, &page.content_markup).await?;
        let body = render_complete_page(&record.name, &bundle);
        let url = services
            .publisher
            .update_page(
                page.id,
                PageUpdate {
                    title: record.name.clone(),
                    body,
                    main_image_url: bundle.image_url.clone(),
                },
            )
            .await?;
        Ok((
            ProfileOutcome::Completed,
            completion_update(record, url, &bundle, true),
        ))
    } else {
        let image = discover_image(services.images.as_ref(), &record.name).await;
        let body = render_placeholder_page(&record.name, image.as_deref());
        let url = services
            .publisher
            .update_page(
                page.id,
                PageUpdate {
                    title: record.name.clone(),
                    body,
                    main_image_url: image
                        .clone()
                        .or_else(|| Some(FALLBACK_IMAGE_URL.to_string())),
                },
            )
            .await?;
        Ok((
            ProfileOutcome::Placeholder,
            placeholder_update(record, url, image, true),
        ))
    }
}

// ---------------------------------------------------------------------------
// Batch coordinator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub selected: usize,
    pub completed: usize,
    pub placeholders: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub skipped: usize,
}

async fn process_candidate(
    store: &dyn ArtistStore,
    services: &Services,
    record: &ArtistRecord,
) -> Result<ProfileOutcome> {
    let (outcome, update) = advance_profile(services, record).await?;
    if !update.is_empty() {
        store
            .apply_update(&record.id, &update)
            .await
            .context("persisting artist update")?;
    }
    Ok(outcome)
}

/// Record the failed attempt, but only on records that already carry a
/// status field; freshly discovered artists leave no partial artifacts.
async fn mark_failed_if_tracked(store: &dyn ArtistStore, record: &ArtistRecord) {
    if record.profile_status.is_none() {
        return;
    }
    let update = ArtistUpdate {
        profile_status: Some(ProfileStatus::Failed),
        ..Default::default()
    };
    if let Err(err) = store.apply_update(&record.id, &update).await {
        warn!(artist = %record.name, error = %err, "could not record failed status");
    }
}

/// Run one enrichment batch: bounded candidate selection, strictly
/// sequential per-artist processing with pacing between artists, per-artist
/// failure isolation. Retry across runs is re-invocation of the whole batch.
pub async fn run_batch(
    store: &dyn ArtistStore,
    services: &Services,
    options: &BatchOptions,
) -> Result<BatchSummary> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let candidates = store
        .find_candidates(options.batch_size)
        .await
        .context("selecting enrichment candidates")?;
    info!(%run_id, candidates = candidates.len(), "starting enrichment batch");

    let mut summary = BatchSummary {
        run_id,
        started_at,
        finished_at: started_at,
        selected: candidates.len(),
        completed: 0,
        placeholders: 0,
        failed: 0,
        unresolved: 0,
        skipped: 0,
    };

    for (index, record) in candidates.iter().enumerate() {
        match process_candidate(store, services, record).await {
            Ok(ProfileOutcome::Completed) => summary.completed += 1,
            Ok(ProfileOutcome::Placeholder) => summary.placeholders += 1,
            Ok(ProfileOutcome::Unresolved) => summary.unresolved += 1,
            Ok(ProfileOutcome::Skipped) => summary.skipped += 1,
            Err(err) => {
                warn!(artist = %record.name, error = %err, "artist enrichment failed; continuing batch");
                summary.failed += 1;
                mark_failed_if_tracked(store, record).await;
            }
        }
        if index + 1 < candidates.len() {
            tokio::time::sleep(options.pacing).await;
        }
    }

    summary.finished_at = Utc::now();
    info!(
        %run_id,
        completed = summary.completed,
        placeholders = summary.placeholders,
        failed = summary.failed,
        unresolved = summary.unresolved,
        "enrichment batch finished"
    );
    Ok(summary)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceOutcome {
    Updated {
        outcome_is_complete: bool,
        url: Option<String>,
    },
    Failed,
    ArtistNotFound,
}

pub async fn run_force_update(
    store: &dyn ArtistStore,
    services: &Services,
    artist_name: &str,
) -> Result<ForceOutcome> {
    let Some(record) = store
        .find_by_name(artist_name)
        .await
        .context("looking up artist")?
    else {
        return Ok(ForceOutcome::ArtistNotFound);
    };

    match force_update_profile(services, &record).await {
        Ok((outcome, update)) => {
            let url = update.profile_page_url.clone();
            if !update.is_empty() {
                store
                    .apply_update(&record.id, &update)
                    .await
                    .context("persisting artist update")?;
            }
            Ok(ForceOutcome::Updated {
                outcome_is_complete: outcome == ProfileOutcome::Completed,
                url,
            })
        }
        Err(err) => {
            warn!(artist = %record.name, error = %err, "force update failed");
            mark_failed_if_tracked(store, &record).await;
            Ok(ForceOutcome::Failed)
        }
    }
}

// ---------------------------------------------------------------------------
// Short-bio backfill
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct BackfillSummary {
    pub selected: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Pull the short-bio paragraph out of a published profile body (the `<p>`
/// inside the title box). Returns `None` when the page carries no such
/// block.
pub fn extract_short_bio(markup: &str) -> Option<String> {
    let fragment = Html::parse_fragment(markup);
    let selector = Selector::parse(".artist-title-box p").ok()?;
    fragment.select(&selector).next().and_then(|node| {
        let text = node.text().collect::<String>().trim().to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    })
}

async fn fetch_short_bio(publisher: &dyn Publisher, record: &ArtistRecord) -> Option<String> {
    let url = record.profile_page_url.as_deref()?;
    let slug = extract_slug(url)?;
    match publisher.find_by_slug(&slug).await {
        Ok(Some(page)) => extract_short_bio(&page.content_markup),
        Ok(None) => {
            warn!(artist = %record.name, %slug, "published page not found");
            None
        }
        Err(err) => {
            warn!(artist = %record.name, error = %err, "page fetch failed");
            None
        }
    }
}

/// Fill `short_bio` on completed records from their already-published pages.
pub async fn run_backfill(
    store: &dyn ArtistStore,
    publisher: &dyn Publisher,
    limit: i64,
    pacing: Duration,
) -> Result<BackfillSummary> {
    let targets = store
        .find_backfill_targets(limit)
        .await
        .context("selecting backfill targets")?;
    info!(targets = targets.len(), "starting short-bio backfill");

    let mut summary = BackfillSummary {
        selected: targets.len(),
        ..Default::default()
    };

    for (index, record) in targets.iter().enumerate() {
        match fetch_short_bio(publisher, record).await {
            Some(short_bio) => {
                let update = ArtistUpdate {
                    short_bio: Some(short_bio),
                    ..Default::default()
                };
                match store.apply_update(&record.id, &update).await {
                    Ok(()) => summary.updated += 1,
                    Err(err) => {
                        warn!(artist = %record.name, error = %err, "backfill write failed");
                        summary.skipped += 1;
                    }
                }
            }
            None => summary.skipped += 1,
        }
        if index + 1 < targets.len() {
            tokio::time::sleep(pacing).await;
        }
    }

    Ok(summary)
}

// ---------------------------------------------------------------------------
// Environment entry points (used by the CLI)
// ---------------------------------------------------------------------------

pub async fn run_batch_from_env() -> Result<BatchSummary> {
    let config = EnrichConfig::from_env()?;
    let services = Services::from_config(&config)?;
    let store = PgArtistStore::connect(&config.database_url).await?;
    store.ensure_schema().await?;
    let result = run_batch(&store, &services, &config.batch).await;
    store.close().await;
    result
}

pub async fn run_force_update_from_env(artist_name: &str) -> Result<ForceOutcome> {
    let config = EnrichConfig::from_env()?;
    let services = Services::from_config(&config)?;
    let store = PgArtistStore::connect(&config.database_url).await?;
    store.ensure_schema().await?;
    let result = run_force_update(&store, &services, artist_name).await;
    store.close().await;
    result
}

pub async fn run_backfill_from_env() -> Result<BackfillSummary> {
    let config = EnrichConfig::from_env()?;
    let services = Services::from_config(&config)?;
    let store = PgArtistStore::connect(&config.database_url).await?;
    store.ensure_schema().await?;
    let result = run_backfill(
        &store,
        services.publisher.as_ref(),
        BACKFILL_LIMIT,
        BACKFILL_PACING,
    )
    .await;
    store.close().await;
    result
}
