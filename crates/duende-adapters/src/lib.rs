//! External service adapter contracts + HTTP implementations.
//!
//! Each adapter is a narrow request/response wrapper: the content generator
//! (Gemini), image search (Google Custom Search), video search (YouTube Data
//! API), and the publishing backend (WordPress pages REST API). All of them
//! are stateless; pacing and sequencing live in the enrichment coordinator.

use async_trait::async_trait;
use duende_core::VerificationResult;
use duende_storage::{FetchError, HttpClient};
use scraper::{Html, Node};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "duende-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Http(#[from] FetchError),
    #[error("decoding {service} response: {source}")]
    Decode {
        service: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(FetchError::Request(err))
    }
}

/// Remove code-fence marker lines from generated text.
///
/// Contract: any line whose trimmed content starts with ``` (optionally
/// followed by a language tag) is dropped; everything else is kept verbatim
/// and the result is trimmed. Generated JSON and HTML payloads routinely
/// arrive wrapped in such fences.
pub fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Reduce published page markup to plain text.
///
/// Contract: element tags are removed, `<style>` and `<script>` contents are
/// discarded, and remaining text is whitespace-collapsed into single spaces.
pub fn strip_markup(markup: &str) -> String {
    let fragment = Html::parse_fragment(markup);
    let mut parts: Vec<String> = Vec::new();
    for node in fragment.tree.nodes() {
        if let Node::Text(text) = node.value() {
            let skipped = node.ancestors().any(|a| match a.value() {
                Node::Element(el) => matches!(el.name(), "style" | "script"),
                _ => false,
            });
            if !skipped {
                parts.push(text.to_string());
            }
        }
    }
    parts
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse an existence-verification payload.
///
/// Contract: a well-formed `{"artistExists": bool, "confidence": ...}`
/// object (possibly code-fenced) parses as-is; anything missing or malformed
/// yields the conservative `{exists: false, confidence: low}` default and
/// never an error.
pub fn parse_verification(raw: &str) -> VerificationResult {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(&cleaned).unwrap_or_else(|_| VerificationResult::unverified())
}

/// Long + short biography pair produced in one structured generation call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeneratedBios {
    #[serde(default)]
    pub short_bio: String,
    #[serde(rename = "long_bio_html", default)]
    pub long_bio_markup: String,
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Ask whether enough verifiable public information exists for a
    /// detailed biography. Malformed payloads resolve to the fail-safe
    /// default; only transport-level failures surface as errors.
    async fn verify_existence(&self, artist_name: &str)
        -> Result<VerificationResult, AdapterError>;

    async fn generate_bios(&self, artist_name: &str) -> Result<GeneratedBios, AdapterError>;

    async fn generate_short_bio(&self, artist_name: &str) -> Result<String, AdapterError>;

    /// Restructure existing plain text into the standard biography markup
    /// without inventing new information.
    async fn reformat_biography(
        &self,
        artist_name: &str,
        plain_text: &str,
    ) -> Result<String, AdapterError>;
}

#[async_trait]
pub trait ImageSearch: Send + Sync {
    /// Ordered candidate image links for a query. An empty result is valid.
    async fn find_images(&self, query: &str, limit: usize) -> Result<Vec<String>, AdapterError>;
}

#[async_trait]
pub trait VideoSearch: Send + Sync {
    /// Ordered watch-URLs for a query, at most `limit` of them.
    async fn find_videos(&self, query: &str, limit: usize) -> Result<Vec<String>, AdapterError>;
}

/// A page as known to the publishing backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub id: u64,
    pub title: String,
    pub content_markup: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct NewPage {
    pub title: String,
    pub body: String,
    pub status: String,
    pub folder_ids: Vec<u64>,
    pub main_image_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PageUpdate {
    pub title: String,
    pub body: String,
    pub main_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedPage {
    pub id: u64,
    pub url: String,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn create_page(&self, page: NewPage) -> Result<PublishedPage, AdapterError>;

    /// Update an existing page in place; returns its canonical URL.
    async fn update_page(&self, page_id: u64, page: PageUpdate) -> Result<String, AdapterError>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<PageRef>, AdapterError>;

    /// Best title-search match, accepted only on an exact rendered-title hit.
    async fn find_by_title(&self, title: &str) -> Result<Option<PageRef>, AdapterError>;
}

/// Last path segment of a page URL, used to relocate published pages.
pub fn extract_slug(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_matches('/');
    let last = trimmed.rsplit('/').next()?;
    if last.is_empty() || last.contains(':') {
        return None;
    }
    Some(last.to_string())
}

// ---------------------------------------------------------------------------
// Gemini content generator
// ---------------------------------------------------------------------------

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const GEMINI_MODEL: &str = "gemini-1.5-flash";

#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    http: HttpClient,
    api_key: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GenerateCandidate>,
}

#[derive(Debug, Deserialize)]
struct GenerateCandidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

fn first_candidate_text(response: GenerateContentResponse) -> Option<String> {
    let candidate = response.candidates.into_iter().next()?;
    let text = candidate
        .content
        .parts
        .into_iter()
        .map(|p| p.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

impl GeminiGenerator {
    pub fn new(http: HttpClient, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            model: GEMINI_MODEL.to_string(),
        }
    }

    async fn prompt(&self, prompt: String, json_output: bool) -> Result<String, AdapterError> {
        let url = format!("{GEMINI_ENDPOINT}/{}:generateContent", self.model);
        let mut body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        if json_output {
            body["generationConfig"] = json!({ "response_mime_type": "application/json" });
        }

        let response = self
            .http
            .execute(|client| {
                client
                    .post(&url)
                    .query(&[("key", self.api_key.as_str())])
                    .json(&body)
            })
            .await?;
        let payload = response.text().await?;
        let parsed: GenerateContentResponse =
            serde_json::from_str(&payload).map_err(|source| AdapterError::Decode {
                service: "gemini",
                source,
            })?;
        first_candidate_text(parsed)
            .map(|text| strip_code_fences(&text))
            .ok_or_else(|| AdapterError::Message("gemini returned no candidates".into()))
    }
}

#[async_trait]
impl ContentGenerator for GeminiGenerator {
    async fn verify_existence(
        &self,
        artist_name: &str,
    ) -> Result<VerificationResult, AdapterError> {
        let prompt = format!(
            "Basándote en tu conocimiento público, ¿existe información verificable y \
             suficiente para escribir una biografía detallada sobre un/a artista de \
             flamenco llamado/a '{artist_name}'? Responde únicamente con un objeto JSON \
             con dos claves: 'artistExists' (true o false) y 'confidence' ('high', \
             'medium', o 'low')."
        );
        let raw = self.prompt(prompt, true).await?;
        let verdict = parse_verification(&raw);
        debug!(artist = artist_name, exists = verdict.exists, "existence verification");
        Ok(verdict)
    }

    async fn generate_bios(&self, artist_name: &str) -> Result<GeneratedBios, AdapterError> {
        let prompt = format!(
            "Eres un experto en flamenco y un talentoso escritor de biografías para \
             blogs. Necesito dos textos sobre el artista flamenco {artist_name}. \
             Devuelve la respuesta como un único objeto JSON válido con dos claves: \
             1. 'short_bio': una frase corta, concisa y en texto plano para una \
             entradilla. 2. 'long_bio_html': la biografía completa centrada únicamente \
             en su carrera y estilo, formateada en HTML con subtítulos <h2> para las \
             secciones clave ('Inicios y Formación', 'Estilo e Influencias', \
             'Trayectoria y Colaboraciones'). No incluyas frases finales invitando a \
             visitar redes sociales o webs oficiales."
        );
        let raw = self.prompt(prompt, true).await?;
        serde_json::from_str(&raw).map_err(|source| AdapterError::Decode {
            service: "gemini",
            source,
        })
    }

    async fn generate_short_bio(&self, artist_name: &str) -> Result<String, AdapterError> {
        let prompt = format!(
            "Resume la carrera del artista flamenco {artist_name} en una sola frase \
             impactante y concisa de no más de 25 palabras."
        );
        self.prompt(prompt, false).await
    }

    async fn reformat_biography(
        &self,
        artist_name: &str,
        plain_text: &str,
    ) -> Result<String, AdapterError> {
        let prompt = format!(
            "Actúa como un editor de contenido. Toma el siguiente texto biográfico \
             sobre {artist_name} y reestructúralo en formato HTML. No inventes \
             información nueva. Utiliza subtítulos <h2> para las secciones clave como \
             'Inicios y Formación', 'Estilo e Influencias', y 'Trayectoria y \
             Colaboraciones'. La salida debe ser únicamente el HTML de los párrafos y \
             los subtítulos.\n\nTEXTO A FORMATEAR:\n{plain_text}"
        );
        self.prompt(prompt, false).await
    }
}

// ---------------------------------------------------------------------------
// Google Custom Search image adapter
// ---------------------------------------------------------------------------

const CUSTOM_SEARCH_ENDPOINT: &str = "https://www.googleapis.com/customsearch/v1";

#[derive(Debug, Clone)]
pub struct GoogleImageSearch {
    http: HttpClient,
    api_key: String,
    cx_id: String,
}

#[derive(Debug, Deserialize)]
struct CustomSearchResponse {
    #[serde(default)]
    items: Vec<CustomSearchItem>,
}

#[derive(Debug, Deserialize)]
struct CustomSearchItem {
    #[serde(default)]
    link: String,
}

impl GoogleImageSearch {
    pub fn new(http: HttpClient, api_key: impl Into<String>, cx_id: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            cx_id: cx_id.into(),
        }
    }
}

#[async_trait]
impl ImageSearch for GoogleImageSearch {
    async fn find_images(&self, query: &str, limit: usize) -> Result<Vec<String>, AdapterError> {
        let num = limit.clamp(1, 10).to_string();
        let response = self
            .http
            .execute(|client| {
                client.get(CUSTOM_SEARCH_ENDPOINT).query(&[
                    ("key", self.api_key.as_str()),
                    ("cx", self.cx_id.as_str()),
                    ("q", query),
                    ("searchType", "image"),
                    ("num", num.as_str()),
                ])
            })
            .await?;
        let payload: CustomSearchResponse = serde_json::from_str(&response.text().await?)
            .map_err(|source| AdapterError::Decode {
                service: "custom-search",
                source,
            })?;
        Ok(payload
            .items
            .into_iter()
            .map(|item| item.link)
            .filter(|link| !link.is_empty())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// YouTube video search adapter
// ---------------------------------------------------------------------------

const YOUTUBE_SEARCH_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/search";

#[derive(Debug, Clone)]
pub struct YoutubeVideoSearch {
    http: HttpClient,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct YoutubeSearchResponse {
    #[serde(default)]
    items: Vec<YoutubeSearchItem>,
}

#[derive(Debug, Deserialize)]
struct YoutubeSearchItem {
    #[serde(default)]
    id: YoutubeVideoId,
}

#[derive(Debug, Default, Deserialize)]
struct YoutubeVideoId {
    #[serde(rename = "videoId", default)]
    video_id: String,
}

impl YoutubeVideoSearch {
    pub fn new(http: HttpClient, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl VideoSearch for YoutubeVideoSearch {
    async fn find_videos(&self, query: &str, limit: usize) -> Result<Vec<String>, AdapterError> {
        let max_results = limit.clamp(1, 50).to_string();
        let response = self
            .http
            .execute(|client| {
                client.get(YOUTUBE_SEARCH_ENDPOINT).query(&[
                    ("key", self.api_key.as_str()),
                    ("part", "snippet"),
                    ("type", "video"),
                    ("maxResults", max_results.as_str()),
                    ("q", query),
                ])
            })
            .await?;
        let payload: YoutubeSearchResponse = serde_json::from_str(&response.text().await?)
            .map_err(|source| AdapterError::Decode {
                service: "youtube",
                source,
            })?;
        Ok(payload
            .items
            .into_iter()
            .filter(|item| !item.id.video_id.is_empty())
            .take(limit)
            .map(|item| format!("https://www.youtube.com/watch?v={}", item.id.video_id))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// WordPress publisher adapter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WordPressPublisher {
    http: HttpClient,
    base_url: String,
    user: String,
    password: String,
}

#[derive(Debug, Default, Deserialize)]
struct WpRendered {
    #[serde(default)]
    rendered: String,
}

#[derive(Debug, Deserialize)]
struct WpPagePayload {
    id: u64,
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: WpRendered,
    #[serde(default)]
    content: WpRendered,
}

impl From<WpPagePayload> for PageRef {
    fn from(page: WpPagePayload) -> Self {
        Self {
            id: page.id,
            title: page.title.rendered,
            content_markup: page.content.rendered,
            url: page.link,
        }
    }
}

impl WordPressPublisher {
    pub fn new(
        http: HttpClient,
        base_url: &str,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.into(),
            password: password.into(),
        }
    }

    fn pages_url(&self) -> String {
        format!("{}/wp-json/wp/v2/pages", self.base_url)
    }

    async fn query_pages(&self, params: &[(&str, &str)]) -> Result<Vec<WpPagePayload>, AdapterError> {
        let url = self.pages_url();
        let response = self
            .http
            .execute(|client| {
                client
                    .get(&url)
                    .basic_auth(&self.user, Some(&self.password))
                    .query(params)
            })
            .await?;
        serde_json::from_str(&response.text().await?).map_err(|source| AdapterError::Decode {
            service: "wordpress",
            source,
        })
    }
}

#[async_trait]
impl Publisher for WordPressPublisher {
    async fn create_page(&self, page: NewPage) -> Result<PublishedPage, AdapterError> {
        let url = self.pages_url();
        let body = json!({
            "title": page.title,
            "status": page.status,
            "content": page.body,
            "wf_page_folders": page.folder_ids,
            "meta": { "main_artist_image_url": page.main_image_url.as_deref().unwrap_or("") },
        });
        let response = self
            .http
            .execute(|client| {
                client
                    .post(&url)
                    .basic_auth(&self.user, Some(&self.password))
                    .json(&body)
            })
            .await?;
        let payload: WpPagePayload = serde_json::from_str(&response.text().await?)
            .map_err(|source| AdapterError::Decode {
                service: "wordpress",
                source,
            })?;
        debug!(page_id = payload.id, url = %payload.link, "created page");
        Ok(PublishedPage {
            id: payload.id,
            url: payload.link,
        })
    }

    async fn update_page(&self, page_id: u64, page: PageUpdate) -> Result<String, AdapterError> {
        let url = format!("{}/{page_id}", self.pages_url());
        let body = json!({
            "title": page.title,
            "content": page.body,
            "meta": { "main_artist_image_url": page.main_image_url.as_deref().unwrap_or("") },
        });
        let response = self
            .http
            .execute(|client| {
                client
                    .post(&url)
                    .basic_auth(&self.user, Some(&self.password))
                    .json(&body)
            })
            .await?;
        let payload: WpPagePayload = serde_json::from_str(&response.text().await?)
            .map_err(|source| AdapterError::Decode {
                service: "wordpress",
                source,
            })?;
        Ok(payload.link)
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<PageRef>, AdapterError> {
        let pages = self
            .query_pages(&[("slug", slug), ("per_page", "1"), ("context", "edit")])
            .await?;
        Ok(pages.into_iter().next().map(PageRef::from))
    }

    async fn find_by_title(&self, title: &str) -> Result<Option<PageRef>, AdapterError> {
        let pages = self
            .query_pages(&[("search", title), ("per_page", "1"), ("context", "edit")])
            .await?;
        Ok(pages
            .into_iter()
            .next()
            .filter(|page| page.title.rendered == title)
            .map(PageRef::from))
    }
}
