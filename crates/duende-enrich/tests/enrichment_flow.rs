//! End-to-end state machine and coordinator tests over stubbed external
//! services and the in-memory artist store.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use duende_adapters::{
    AdapterError, ContentGenerator, GeneratedBios, ImageSearch, NewPage, PageRef, PageUpdate,
    PublishedPage, Publisher, VideoSearch,
};
use duende_core::{ArtistRecord, Confidence, ProfileStatus, VerificationResult};
use duende_enrich::{
    run_backfill, run_batch, run_force_update, BatchOptions, ForceOutcome, Services,
    FALLBACK_IMAGE_URL,
};
use duende_storage::{ArtistStore, MemoryArtistStore};

struct StubGenerator {
    exists: bool,
    short_bio: String,
    long_bio: String,
}

#[async_trait]
impl ContentGenerator for StubGenerator {
    async fn verify_existence(
        &self,
        _artist_name: &str,
    ) -> Result<VerificationResult, AdapterError> {
        Ok(VerificationResult {
            exists: self.exists,
            confidence: if self.exists {
                Confidence::High
            } else {
                Confidence::Low
            },
        })
    }

    async fn generate_bios(&self, _artist_name: &str) -> Result<GeneratedBios, AdapterError> {
        Ok(GeneratedBios {
            short_bio: self.short_bio.clone(),
            long_bio_markup: self.long_bio.clone(),
        })
    }

    async fn generate_short_bio(&self, _artist_name: &str) -> Result<String, AdapterError> {
        Ok(self.short_bio.clone())
    }

    async fn reformat_biography(
        &self,
        _artist_name: &str,
        _plain_text: &str,
    ) -> Result<String, AdapterError> {
        Ok(self.long_bio.clone())
    }
}

struct StubImages(Vec<String>);

#[async_trait]
impl ImageSearch for StubImages {
    async fn find_images(&self, _query: &str, limit: usize) -> Result<Vec<String>, AdapterError> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }
}

struct StubVideos(Vec<String>);

#[async_trait]
impl VideoSearch for StubVideos {
    async fn find_videos(&self, _query: &str, limit: usize) -> Result<Vec<String>, AdapterError> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }
}

#[derive(Debug, Clone)]
struct StoredPage {
    id: u64,
    title: String,
    slug: String,
    body: String,
}

#[derive(Debug, Default)]
struct PublisherState {
    pages: Vec<StoredPage>,
    next_id: u64,
    fail_create_titles: HashSet<String>,
}

#[derive(Clone, Default)]
struct StubPublisher {
    state: Arc<Mutex<PublisherState>>,
}

fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

fn page_url(slug: &str) -> String {
    format!("https://pages.test/artistas/{slug}/")
}

impl StubPublisher {
    fn fail_create_for(&self, title: &str) {
        self.state
            .lock()
            .unwrap()
            .fail_create_titles
            .insert(title.to_string());
    }

    fn seed_page(&self, title: &str, body: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let page = StoredPage {
            id: state.next_id,
            title: title.to_string(),
            slug: slugify(title),
            body: body.to_string(),
        };
        let url = page_url(&page.slug);
        state.pages.push(page);
        url
    }

    fn pages(&self) -> Vec<StoredPage> {
        self.state.lock().unwrap().pages.clone()
    }
}

#[async_trait]
impl Publisher for StubPublisher {
    async fn create_page(&self, page: NewPage) -> Result<PublishedPage, AdapterError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create_titles.contains(&page.title) {
            return Err(AdapterError::Message(format!(
                "publish rejected for {}",
                page.title
            )));
        }
        state.next_id += 1;
        let stored = StoredPage {
            id: state.next_id,
            title: page.title.clone(),
            slug: slugify(&page.title),
            body: page.body,
        };
        let result = PublishedPage {
            id: stored.id,
            url: page_url(&stored.slug),
        };
        state.pages.push(stored);
        Ok(result)
    }

    async fn update_page(&self, page_id: u64, page: PageUpdate) -> Result<String, AdapterError> {
        let mut state = self.state.lock().unwrap();
        let stored = state
            .pages
            .iter_mut()
            .find(|p| p.id == page_id)
            .ok_or_else(|| AdapterError::Message(format!("no page {page_id}")))?;
        stored.body = page.body;
        stored.title = page.title;
        Ok(page_url(&stored.slug))
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<PageRef>, AdapterError> {
        let state = self.state.lock().unwrap();
        Ok(state.pages.iter().find(|p| p.slug == slug).map(|p| PageRef {
            id: p.id,
            title: p.title.clone(),
            content_markup: p.body.clone(),
            url: page_url(&p.slug),
        }))
    }

    async fn find_by_title(&self, title: &str) -> Result<Option<PageRef>, AdapterError> {
        let state = self.state.lock().unwrap();
        Ok(state.pages.iter().find(|p| p.title == title).map(|p| PageRef {
            id: p.id,
            title: p.title.clone(),
            content_markup: p.body.clone(),
            url: page_url(&p.slug),
        }))
    }
}

struct Fixture {
    store: MemoryArtistStore,
    publisher: StubPublisher,
    services: Services,
}

fn fixture(exists: bool, images: Vec<String>, videos: Vec<String>) -> Fixture {
    let publisher = StubPublisher::default();
    let services = Services {
        generator: Box::new(StubGenerator {
            exists,
            short_bio: "Una frase corta.".to_string(),
            long_bio: "<h2>Inicios</h2><p>Texto generado.</p>".to_string(),
        }),
        images: Box::new(StubImages(images)),
        videos: Box::new(StubVideos(videos)),
        publisher: Box::new(publisher.clone()),
    };
    Fixture {
        store: MemoryArtistStore::new(),
        publisher,
        services,
    }
}

fn batch_options() -> BatchOptions {
    BatchOptions {
        batch_size: 10,
        pacing: Duration::ZERO,
    }
}

#[tokio::test]
async fn unverifiable_artist_gets_a_placeholder_profile() {
    let fx = fixture(false, vec![], vec![]);
    fx.store.insert(ArtistRecord::new("a1", "Anonymous Cantaor"));

    let summary = run_batch(&fx.store, &fx.services, &batch_options())
        .await
        .unwrap();
    assert_eq!(summary.placeholders, 1);
    assert_eq!(summary.failed, 0);

    let record = fx.store.get("a1").unwrap();
    assert!(record.has_profile_page);
    assert_eq!(record.profile_status, Some(ProfileStatus::Placeholder));
    assert!(record.profile_page_url.is_some());
    assert_eq!(record.short_bio, None);
    assert_eq!(
        record.meta.main_artist_image_url.as_deref(),
        Some(FALLBACK_IMAGE_URL)
    );

    let pages = fx.publisher.pages();
    assert_eq!(pages.len(), 1);
    assert!(pages[0].body.contains(FALLBACK_IMAGE_URL));
    assert!(pages[0].body.contains("Buscar eventos de Anonymous Cantaor"));
}

#[tokio::test]
async fn verified_artist_gets_a_complete_profile() {
    let fx = fixture(
        true,
        vec!["https://img.test/guitarist.jpg".to_string()],
        vec![
            "https://www.youtube.com/watch?v=v1".to_string(),
            "https://www.youtube.com/watch?v=v2".to_string(),
        ],
    );
    fx.store.insert(ArtistRecord::new("a1", "Famous Guitarist"));

    let summary = run_batch(&fx.store, &fx.services, &batch_options())
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);

    let record = fx.store.get("a1").unwrap();
    assert_eq!(record.profile_status, Some(ProfileStatus::Complete));
    assert!(record.has_profile_page);
    assert!(record.profile_page_url.is_some());
    assert_eq!(record.short_bio.as_deref(), Some("Una frase corta."));
    assert_eq!(
        record.meta.main_artist_image_url.as_deref(),
        Some("https://img.test/guitarist.jpg")
    );

    let pages = fx.publisher.pages();
    assert_eq!(pages.len(), 1);
    assert!(pages[0].body.contains("https://www.youtube.com/embed/v1"));
    assert!(pages[0].body.contains("https://www.youtube.com/embed/v2"));
    assert!(pages[0].body.contains("<h2>Inicios</h2>"));
}

#[tokio::test]
async fn one_failing_artist_does_not_abort_the_batch() {
    let fx = fixture(true, vec![], vec![]);
    let mut first = ArtistRecord::new("a1", "Artista Uno");
    first.event_count = 30;
    let mut second = ArtistRecord::new("a2", "Artista Dos");
    second.event_count = 20;
    let mut third = ArtistRecord::new("a3", "Artista Tres");
    third.event_count = 10;
    fx.store.insert(first);
    fx.store.insert(second);
    fx.store.insert(third);
    fx.publisher.fail_create_for("Artista Dos");

    let summary = run_batch(&fx.store, &fx.services, &batch_options())
        .await
        .unwrap();
    assert_eq!(summary.selected, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);

    for id in ["a1", "a3"] {
        let record = fx.store.get(id).unwrap();
        assert_eq!(record.profile_status, Some(ProfileStatus::Complete));
        assert!(record.has_profile_page);
        assert!(record.profile_page_url.is_some());
    }

    let failed = fx.store.get("a2").unwrap();
    assert!(!failed.has_profile_page);
    assert_eq!(failed.profile_page_url, None);
}

#[tokio::test]
async fn publish_failure_leaves_fresh_records_without_artifacts() {
    let fx = fixture(true, vec![], vec![]);

    let fresh = ArtistRecord::new("a-new", "Nuevo Artista");
    fx.store.insert(fresh);

    let mut retried = ArtistRecord::new("a-failed", "Artista Reintentado");
    retried.profile_status = Some(ProfileStatus::Failed);
    fx.store.insert(retried);

    fx.publisher.fail_create_for("Nuevo Artista");
    fx.publisher.fail_create_for("Artista Reintentado");

    let summary = run_batch(&fx.store, &fx.services, &batch_options())
        .await
        .unwrap();
    assert_eq!(summary.failed, 2);

    let fresh = fx.store.get("a-new").unwrap();
    assert_eq!(fresh.profile_status, None);
    assert!(!fresh.has_profile_page);
    assert_eq!(fresh.profile_page_url, None);

    let retried = fx.store.get("a-failed").unwrap();
    assert_eq!(retried.profile_status, Some(ProfileStatus::Failed));
}

#[tokio::test]
async fn legacy_record_is_reformatted_in_place() {
    let fx = fixture(true, vec!["https://img.test/a.jpg".to_string()], vec![]);

    let url = fx
        .publisher
        .seed_page("Bailaora Antigua", "<p>Texto antiguo sin estructura.</p>");
    let mut legacy = ArtistRecord::new("a-legacy", "Bailaora Antigua");
    legacy.has_profile_page = true;
    legacy.profile_page_url = Some(url);
    fx.store.insert(legacy);

    let summary = run_batch(&fx.store, &fx.services, &batch_options())
        .await
        .unwrap();
    assert_eq!(summary.completed, 1);

    let record = fx.store.get("a-legacy").unwrap();
    assert_eq!(record.profile_status, Some(ProfileStatus::Complete));
    assert_eq!(record.short_bio.as_deref(), Some("Una frase corta."));

    let pages = fx.publisher.pages();
    assert_eq!(pages.len(), 1, "reformat must not create a second page");
    assert!(pages[0].body.contains("<h2>Inicios</h2>"));
    assert!(!pages[0].body.contains("Texto antiguo"));
}

#[tokio::test]
async fn legacy_record_without_a_page_is_left_unresolved() {
    let fx = fixture(true, vec![], vec![]);
    let mut legacy = ArtistRecord::new("a-legacy", "Bailaora Perdida");
    legacy.has_profile_page = true;
    legacy.profile_page_url = Some("https://pages.test/artistas/otro-slug/".to_string());
    fx.store.insert(legacy.clone());

    let summary = run_batch(&fx.store, &fx.services, &batch_options())
        .await
        .unwrap();
    assert_eq!(summary.unresolved, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(fx.store.get("a-legacy").unwrap(), legacy);
}

#[tokio::test]
async fn stored_short_bio_survives_a_pass_that_generates_nothing() {
    let publisher = StubPublisher::default();
    let services = Services {
        generator: Box::new(StubGenerator {
            exists: true,
            short_bio: String::new(),
            long_bio: "<h2>Inicios</h2><p>Reformateado.</p>".to_string(),
        }),
        images: Box::new(StubImages(vec![])),
        videos: Box::new(StubVideos(vec![])),
        publisher: Box::new(publisher.clone()),
    };
    let store = MemoryArtistStore::new();

    let url = publisher.seed_page("Cantaor Documentado", "<p>viejo</p>");
    let mut legacy = ArtistRecord::new("a1", "Cantaor Documentado");
    legacy.has_profile_page = true;
    legacy.profile_page_url = Some(url);
    legacy.short_bio = Some("Bio que debe sobrevivir.".to_string());
    store.insert(legacy);

    let summary = run_batch(&store, &services, &batch_options()).await.unwrap();
    assert_eq!(summary.completed, 1);

    let record = store.get("a1").unwrap();
    assert_eq!(record.short_bio.as_deref(), Some("Bio que debe sobrevivir."));
}

#[tokio::test]
async fn force_update_regenerates_against_the_recorded_page() {
    let fx = fixture(true, vec!["https://img.test/new.jpg".to_string()], vec![]);

    let url = fx.publisher.seed_page("Maestro Forzado", "<p>contenido previo</p>");
    let mut record = ArtistRecord::new("a1", "Maestro Forzado");
    record.has_profile_page = true;
    record.profile_page_url = Some(url.clone());
    record.profile_status = Some(ProfileStatus::Complete);
    record.short_bio = Some("Bio vieja.".to_string());
    record.meta.main_artist_image_url = Some("https://img.test/old.jpg".to_string());
    fx.store.insert(record);

    let outcome = run_force_update(&fx.store, &fx.services, "Maestro Forzado")
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ForceOutcome::Updated {
            outcome_is_complete: true,
            url: Some(url),
        }
    );

    let record = fx.store.get("a1").unwrap();
    assert_eq!(record.short_bio.as_deref(), Some("Una frase corta."));
    assert_eq!(
        record.meta.main_artist_image_url.as_deref(),
        Some("https://img.test/new.jpg")
    );
    assert_eq!(fx.publisher.pages().len(), 1);
}

#[tokio::test]
async fn force_update_for_an_unknown_artist_reports_not_found() {
    let fx = fixture(true, vec![], vec![]);
    let outcome = run_force_update(&fx.store, &fx.services, "Nadie")
        .await
        .unwrap();
    assert_eq!(outcome, ForceOutcome::ArtistNotFound);
}

#[tokio::test]
async fn backfill_recovers_short_bio_from_published_markup() {
    let fx = fixture(true, vec![], vec![]);

    let body = "<div class=\"artist-title-box\"><h2>Maestro</h2>\
                <p>Frase publicada hace tiempo.</p></div>";
    let url = fx.publisher.seed_page("Maestro Completo", body);
    let mut record = ArtistRecord::new("a1", "Maestro Completo");
    record.has_profile_page = true;
    record.profile_page_url = Some(url);
    record.profile_status = Some(ProfileStatus::Complete);
    fx.store.insert(record);

    let summary = run_backfill(
        &fx.store,
        fx.services.publisher.as_ref(),
        50,
        Duration::ZERO,
    )
    .await
    .unwrap();
    assert_eq!(summary.updated, 1);
    assert_eq!(
        fx.store.get("a1").unwrap().short_bio.as_deref(),
        Some("Frase publicada hace tiempo.")
    );

    let second = run_backfill(
        &fx.store,
        fx.services.publisher.as_ref(),
        50,
        Duration::ZERO,
    )
    .await
    .unwrap();
    assert_eq!(second.selected, 0);
}
