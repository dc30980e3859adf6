use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::{
    config::AppConfig,
    encoding::EncodedImage,
    error::GenerationError,
    generator::Generator,
    models::{
        Artifact, BrandingConcept, CampaignIdea, CopyVariant, GenerationKind, GenerationRequest, ImageArtifact,
        NameSlogan, OperationHandle, Persona, ReelScript, SeoIdea, SocialIdea, VideoArtifact, VideoRequest,
    },
};

pub const LOGO_STYLES: &[&str] = &[
    "Minimalista",
    "Vintage",
    "Geométrico",
    "Mascota",
    "Emblema",
    "Tipográfico",
    "Abstracto",
    "Degradado moderno",
    "Dibujado a mano",
    "Línea continua",
];

const BLOCKING_FINISH_REASONS: &[&str] =
    &["SAFETY", "PROHIBITED_CONTENT", "IMAGE_SAFETY", "BLOCKLIST", "SPII", "RECITATION"];

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" || key == "bytesBase64Encoded" {
                    if let Value::String(s) = val {
                        if s.len() > 100 {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(truncate_base64_in_json),
        _ => {}
    }
}

fn loggable(body: &Value) -> String {
    let mut copy = body.clone();
    truncate_base64_in_json(&mut copy);
    copy.to_string()
}

pub struct GeminiClient {
    client: Client,
    api_key: RwLock<String>,
    base_url: String,
    image_model: String,
    text_model: String,
    video_model: String,
}

impl GeminiClient {
    pub fn new(config: &AppConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_key: RwLock::new(config.api_key.clone()),
            base_url: config.api_base.clone(),
            image_model: config.image_model.clone(),
            text_model: config.text_model.clone(),
            video_model: config.video_model.clone(),
        })
    }

    fn key(&self) -> String {
        self.api_key.read().clone()
    }

    fn redact(&self, url: &str) -> String {
        url.replace(&self.key(), "***")
    }

    fn with_key(&self, url: &str) -> String {
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{url}{sep}key={}", self.key())
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> Result<reqwest::Response, GenerationError> {
        info!("🔗 Making request to: {}", self.redact(url));
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Transport(format!("request timed out: {e}"))
            } else {
                GenerationError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        debug!("📥 Response status: {}", status);
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("❌ API Error response: status={} body={}", status, body);
        Err(classify_status(status, &body))
    }

    async fn post_json<T: DeserializeOwned>(&self, url: String, body: &Value) -> Result<T, GenerationError> {
        debug!("📤 Request body: {}", loggable(body));
        let response = self.send(self.client.post(self.with_key(&url)).json(body), &url).await?;
        let text = response.text().await.map_err(|e| GenerationError::Transport(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| GenerationError::Malformed(format!("parse error: {e}")))
    }

    async fn generate_content(&self, model: &str, body: Value) -> Result<GeminiResponse, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        self.post_json(url, &body).await
    }

    async fn generate_image(
        &self,
        kind: GenerationKind,
        request: &GenerationRequest,
    ) -> Result<ImageArtifact, GenerationError> {
        let (prompt, style) = match kind {
            GenerationKind::Logo => {
                let style = LOGO_STYLES.choose(&mut rand::thread_rng()).copied().unwrap_or("Minimalista");
                (
                    format!(
                        "Diseña un logo profesional en estilo {style} para: {}. Fondo limpio y neutro, composición centrada, sin texto adicional.",
                        request.prompt
                    ),
                    Some(style.to_string()),
                )
            }
            GenerationKind::SocialImage => (
                format!(
                    "{}. Imagen para redes sociales, alta calidad, composición atractiva, sin texto superpuesto.",
                    request.prompt
                ),
                None,
            ),
            _ => (request.prompt.clone(), None),
        };

        let mut parts = Vec::new();
        if let Some(reference) = &request.reference {
            parts.push(inline_part(reference));
        }
        parts.push(json!({ "text": prompt }));

        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": { "responseModalities": ["IMAGE"] }
        });
        let parsed = self.generate_content(&self.image_model, body).await?;
        let mut image = parsed.first_image()?;
        image.style = style;
        info!("🖼️ Extracted {} image ({} bytes)", image.media_type, image.data.len());
        Ok(image)
    }

    async fn generate_structured(
        &self,
        kind: GenerationKind,
        request: &GenerationRequest,
    ) -> Result<Artifact, GenerationError> {
        let count = request.count.max(1);
        let body = json!({
            "systemInstruction": { "parts": [{ "text": instructions(kind, count) }] },
            "contents": [{ "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema(kind),
                "temperature": 0.9
            }
        });
        let parsed = self.generate_content(&self.text_model, body).await?;
        let text = parsed.first_text()?;
        parse_structured(kind, &text)
    }
}

#[async_trait]
impl Generator for GeminiClient {
    async fn generate(
        &self,
        kind: GenerationKind,
        request: &GenerationRequest,
        slot: Option<usize>,
    ) -> Result<Artifact, GenerationError> {
        info!(?kind, slot, "🎯 Generating with Gemini API");
        if kind.is_image() {
            self.generate_image(kind, request).await.map(Artifact::Image)
        } else {
            self.generate_structured(kind, request).await
        }
    }

    async fn submit_video_job(&self, request: &VideoRequest) -> Result<OperationHandle, GenerationError> {
        let url = format!("{}/models/{}:predictLongRunning", self.base_url, self.video_model);
        let body = json!({
            "instances": [{
                "prompt": request.prompt,
                "image": {
                    "bytesBase64Encoded": request.image.data,
                    "mimeType": request.image.media_type
                }
            }],
            "parameters": { "aspectRatio": request.aspect_ratio.as_str(), "sampleCount": 1 }
        });
        let op: OperationResponse = self.post_json(url, &body).await?;
        info!("🎬 Video job submitted: {}", op.name);
        Ok(op.into_handle())
    }

    async fn poll_video_job(&self, handle: &OperationHandle) -> Result<OperationHandle, GenerationError> {
        let url = format!("{}/{}", self.base_url, handle.name);
        let response = self.send(self.client.get(self.with_key(&url)), &url).await?;
        let text = response.text().await.map_err(|e| GenerationError::Transport(e.to_string()))?;
        let op: OperationResponse =
            serde_json::from_str(&text).map_err(|e| GenerationError::Malformed(format!("parse error: {e}")))?;
        Ok(op.into_handle())
    }

    async fn fetch_video(&self, uri: &str) -> Result<VideoArtifact, GenerationError> {
        let response = self.send(self.client.get(self.with_key(uri)), uri).await?;
        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("video/mp4")
            .to_string();
        let data: Bytes = response.bytes().await.map_err(|e| GenerationError::Transport(e.to_string()))?;
        if data.is_empty() {
            return Err(GenerationError::NoArtifact("video download was empty".into()));
        }
        Ok(VideoArtifact { data, media_type })
    }

    async fn analyze_image(&self, image: &EncodedImage) -> Result<String, GenerationError> {
        let body = json!({
            "contents": [{
                "parts": [
                    inline_part(image),
                    { "text": "Analiza esta imagen desde una perspectiva de marketing: composición, colores, emociones que transmite, público al que conecta y sugerencias concretas para mejorar su impacto. Responde en español, en prosa clara." }
                ]
            }]
        });
        let parsed = self.generate_content(&self.text_model, body).await?;
        parsed.first_text()
    }

    fn reselect_credentials(&self, api_key: String) {
        info!("🔑 API key reselected");
        *self.api_key.write() = api_key;
    }
}

fn inline_part(image: &EncodedImage) -> Value {
    json!({ "inlineData": { "data": image.data, "mimeType": image.media_type } })
}

/// Maps a non-success HTTP answer to the error taxonomy.
pub fn classify_status(status: StatusCode, body: &str) -> GenerationError {
    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|b| b.error.message)
        .unwrap_or_else(|_| body.chars().take(300).collect());

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || message.contains("API key not valid")
        || message.contains("Requested entity was not found")
    {
        return GenerationError::Auth(message);
    }
    GenerationError::Transport(format!("status={status} {message}"))
}

fn instructions(kind: GenerationKind, count: usize) -> String {
    let task = match kind {
        GenerationKind::Branding => "una propuesta de identidad visual: paleta de exactamente 5 colores en hexadecimal, una sugerencia de combinación tipográfica y una descripción del tono de voz",
        GenerationKind::Copywriting => "un texto publicitario persuasivo y listo para publicar, adaptado al formato indicado",
        GenerationKind::SocialIdeas => "ideas de publicación para redes sociales, cada una con el texto del post (copy) y un prompt detallado en español para generar su imagen (imagePrompt)",
        GenerationKind::Campaign => "un concepto de campaña de marketing con nombre del concepto, un resumen y una lista de acciones clave",
        GenerationKind::Script => "un guion para un video corto vertical (reel) con concepto y guion escena por escena",
        GenerationKind::Persona => "un perfil de buyer persona con nombre, edad, ocupación, biografía, metas y puntos de dolor",
        GenerationKind::Seo => "una idea de contenido SEO, de tipo 'title' (título de blog), 'faq' (pregunta frecuente) o 'meta' (meta descripción)",
        GenerationKind::NameSlogan => "una sugerencia de tipo 'name' (nombre de marca) o 'slogan', con una breve justificación",
        GenerationKind::Mockup | GenerationKind::Logo | GenerationKind::SocialImage => "una imagen",
    };
    format!(
        "Eres un experto en marketing y creatividad. Genera {count} resultado(s) distintos y originales. Cada resultado es {task}. Responde únicamente con un array JSON conforme al esquema."
    )
}

fn response_schema(kind: GenerationKind) -> Value {
    let string = json!({ "type": "STRING" });
    let item = match kind {
        GenerationKind::Branding => json!({
            "type": "OBJECT",
            "properties": {
                "colorPalette": { "type": "ARRAY", "items": string, "description": "5 colores en formato #RRGGBB" },
                "typographySuggestion": string,
                "toneOfVoice": string
            },
            "required": ["colorPalette", "typographySuggestion", "toneOfVoice"]
        }),
        GenerationKind::Copywriting => json!({
            "type": "OBJECT",
            "properties": { "copy": string },
            "required": ["copy"]
        }),
        GenerationKind::SocialIdeas => json!({
            "type": "OBJECT",
            "properties": { "copy": string, "imagePrompt": string },
            "required": ["copy", "imagePrompt"]
        }),
        GenerationKind::Campaign => json!({
            "type": "OBJECT",
            "properties": {
                "concept": string,
                "summary": string,
                "keyActions": { "type": "ARRAY", "items": string }
            },
            "required": ["concept", "summary", "keyActions"]
        }),
        GenerationKind::Script => json!({
            "type": "OBJECT",
            "properties": { "concept": string, "script": string },
            "required": ["concept", "script"]
        }),
        GenerationKind::Persona => json!({
            "type": "OBJECT",
            "properties": {
                "name": string,
                "age": { "type": "INTEGER" },
                "occupation": string,
                "bio": string,
                "goals": string,
                "painPoints": string
            },
            "required": ["name", "age", "occupation", "bio", "goals", "painPoints"]
        }),
        GenerationKind::Seo => json!({
            "type": "OBJECT",
            "properties": {
                "type": { "type": "STRING", "enum": ["title", "faq", "meta"] },
                "content": string
            },
            "required": ["type", "content"]
        }),
        GenerationKind::NameSlogan => json!({
            "type": "OBJECT",
            "properties": {
                "type": { "type": "STRING", "enum": ["name", "slogan"] },
                "suggestion": string,
                "justification": string
            },
            "required": ["type", "suggestion", "justification"]
        }),
        GenerationKind::Mockup | GenerationKind::Logo | GenerationKind::SocialImage => json!({ "type": "OBJECT" }),
    };
    json!({ "type": "ARRAY", "items": item })
}

fn first_of<T: DeserializeOwned>(text: &str) -> Result<T, GenerationError> {
    let items: Vec<T> = serde_json::from_str(text).map_err(|e| GenerationError::Malformed(e.to_string()))?;
    items
        .into_iter()
        .next()
        .ok_or_else(|| GenerationError::NoArtifact("empty result list".into()))
}

/// Decodes the JSON text of a structured response into the artifact for `kind`.
pub fn parse_structured(kind: GenerationKind, text: &str) -> Result<Artifact, GenerationError> {
    let text = strip_code_fence(text);
    let artifact = match kind {
        GenerationKind::Branding => Artifact::Branding(first_of::<BrandingConcept>(text)?),
        GenerationKind::Copywriting => Artifact::Copy(first_of::<CopyVariant>(text)?),
        GenerationKind::Campaign => Artifact::Campaign(first_of::<CampaignIdea>(text)?),
        GenerationKind::Script => Artifact::Script(first_of::<ReelScript>(text)?),
        GenerationKind::Persona => Artifact::Persona(first_of::<Persona>(text)?),
        GenerationKind::Seo => Artifact::Seo(first_of::<SeoIdea>(text)?),
        GenerationKind::NameSlogan => Artifact::NameSlogan(first_of::<NameSlogan>(text)?),
        GenerationKind::SocialIdeas => {
            let ideas: Vec<SocialIdea> =
                serde_json::from_str(text).map_err(|e| GenerationError::Malformed(e.to_string()))?;
            if ideas.is_empty() {
                return Err(GenerationError::NoArtifact("no post ideas returned".into()));
            }
            Artifact::SocialIdeas(ideas)
        }
        GenerationKind::Mockup | GenerationKind::Logo | GenerationKind::SocialImage => {
            return Err(GenerationError::Malformed(format!("{kind:?} is not a structured kind")))
        }
    };
    Ok(artifact)
}

fn strip_code_fence(text: &str) -> &str {
    let t = text.trim();
    t.strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(t)
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    safety_ratings: Vec<SafetyRating>,
}

#[derive(Debug, Deserialize)]
struct SafetyRating {
    #[serde(default)]
    category: String,
    #[serde(default)]
    probability: String,
}

#[derive(Debug, Deserialize, Default)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
    Text {
        text: String,
    },
    #[allow(dead_code)]
    Other(Value),
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
    #[serde(rename = "mimeType", default)]
    mime_type: Option<String>,
}

impl GeminiResponse {
    fn blocked(&self) -> Option<String> {
        if let Some(reason) = self.prompt_feedback.as_ref().and_then(|f| f.block_reason.clone()) {
            return Some(reason);
        }
        let candidate = self.candidates.first()?;
        if let Some(reason) = candidate.finish_reason.as_deref() {
            if BLOCKING_FINISH_REASONS.contains(&reason) {
                return Some(reason.to_string());
            }
        }
        candidate
            .safety_ratings
            .iter()
            .find(|r| r.probability != "NEGLIGIBLE")
            .map(|r| format!("{} ({})", r.category, r.probability))
    }

    pub fn first_image(&self) -> Result<ImageArtifact, GenerationError> {
        use base64::Engine;

        for c in &self.candidates {
            for p in &c.content.parts {
                if let Part::Inline { inline_data } = p {
                    let data = base64::engine::general_purpose::STANDARD
                        .decode(&inline_data.data)
                        .map_err(|e| GenerationError::Malformed(format!("image data is not base64: {e}")))?;
                    let media_type = inline_data.mime_type.clone().unwrap_or_else(|| {
                        image::guess_format(&data)
                            .map(|f| f.to_mime_type().to_string())
                            .unwrap_or_else(|_| "image/png".to_string())
                    });
                    return Ok(ImageArtifact { data, media_type, style: None });
                }
            }
        }
        match self.blocked() {
            Some(reason) => {
                warn!("⚠️ Image generation blocked: {}", reason);
                Err(GenerationError::Blocked(reason))
            }
            None => Err(GenerationError::NoArtifact("Gemini did not return an image".into())),
        }
    }

    pub fn first_text(&self) -> Result<String, GenerationError> {
        let text: String = self
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if !text.trim().is_empty() {
            return Ok(text.trim().to_string());
        }
        match self.blocked() {
            Some(reason) => Err(GenerationError::Blocked(reason)),
            None => Err(GenerationError::NoArtifact("Gemini did not return any text".into())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    name: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    response: Option<VideoResponse>,
    #[serde(default)]
    error: Option<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResponse {
    #[serde(default)]
    generate_video_response: Option<GeneratedSamples>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeneratedSamples {
    #[serde(default)]
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Deserialize)]
struct GeneratedSample {
    video: Option<VideoRef>,
}

#[derive(Debug, Deserialize)]
struct VideoRef {
    uri: Option<String>,
}

impl OperationResponse {
    fn into_handle(self) -> OperationHandle {
        let result_uri = self
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .and_then(|s| s.video)
            .and_then(|v| v.uri);
        OperationHandle {
            name: self.name,
            done: self.done,
            result_uri,
            failure: self.error.map(|e| e.message),
        }
    }
}
