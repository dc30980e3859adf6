use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::{
    encoding::EncodedImage,
    error::GenerationError,
    gemini::LOGO_STYLES,
    generator::Generator,
    models::{
        Artifact, BrandingConcept, CampaignIdea, CopyVariant, GenerationKind, GenerationRequest, ImageArtifact,
        NameSlogan, OperationHandle, Persona, ReelScript, SeoIdea, SeoKind, SocialIdea, SuggestionKind, VideoArtifact,
        VideoRequest,
    },
};

const POLLS_UNTIL_DONE: u32 = 2;

const SLOT_COLORS: [&str; 5] = ["#3B82F6", "#EF4444", "#10B981", "#F59E0B", "#8B5CF6"];

/// Offline collaborator used when no real API key is configured.
#[derive(Default)]
pub struct DemoGenerator {
    polls: Mutex<HashMap<String, u32>>,
}

impl DemoGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    fn placeholder_image(&self, title: &str, subtitle: &str, slot: usize) -> ImageArtifact {
        let color = SLOT_COLORS[slot % SLOT_COLORS.len()];
        let svg = format!(
            r#"<svg width="400" height="400" xmlns="http://www.w3.org/2000/svg">
            <defs>
                <linearGradient id="grad" x1="0%" y1="0%" x2="100%" y2="100%">
                    <stop offset="0%" style="stop-color:{color};stop-opacity:1" />
                    <stop offset="100%" style="stop-color:{color};stop-opacity:0.6" />
                </linearGradient>
            </defs>
            <rect width="400" height="400" fill="url(#grad)" />
            <text x="200" y="190" font-family="Arial, sans-serif" font-size="24" font-weight="bold"
                  text-anchor="middle" fill="white">{}</text>
            <text x="200" y="230" font-family="Arial, sans-serif" font-size="12"
                  text-anchor="middle" fill="white" opacity="0.8">{}</text>
        </svg>"#,
            xml_escape(title),
            xml_escape(subtitle)
        );
        ImageArtifact { data: svg.into_bytes(), media_type: "image/svg+xml".to_string(), style: None }
    }
}

fn xml_escape(s: &str) -> String {
    let short: String = s.chars().take(40).collect();
    short.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

fn topic(request: &GenerationRequest) -> String {
    request.prompt.lines().next().unwrap_or_default().chars().take(60).collect()
}

#[async_trait]
impl Generator for DemoGenerator {
    async fn generate(
        &self,
        kind: GenerationKind,
        request: &GenerationRequest,
        slot: Option<usize>,
    ) -> Result<Artifact, GenerationError> {
        info!(?kind, slot, "Using demo mode - no real content generated");
        let slot = slot.unwrap_or(0);
        let topic = topic(request);
        let n = slot + 1;
        let artifact = match kind {
            GenerationKind::Mockup => {
                Artifact::Image(self.placeholder_image("📦 Mockup", &format!("Variante {n}"), slot))
            }
            GenerationKind::Logo => {
                let style = LOGO_STYLES.choose(&mut rand::thread_rng()).copied().unwrap_or("Minimalista");
                let mut img = self.placeholder_image("✨ Logo", style, slot);
                img.style = Some(style.to_string());
                Artifact::Image(img)
            }
            GenerationKind::SocialImage => Artifact::Image(self.placeholder_image("📣 Post", &topic, slot)),
            GenerationKind::Branding => Artifact::Branding(BrandingConcept {
                color_palette: SLOT_COLORS.iter().map(|c| c.to_string()).collect(),
                typography_suggestion: "Playfair Display para títulos + Inter para texto".into(),
                tone_of_voice: format!("Cercano y confiable, pensado para {topic}"),
            }),
            GenerationKind::Copywriting => Artifact::Copy(CopyVariant {
                copy: format!("Variante {n}: descubre por qué todos hablan de esto.\n{topic}"),
            }),
            GenerationKind::SocialIdeas => Artifact::SocialIdeas(
                (1..=request.count.max(1))
                    .map(|i| SocialIdea {
                        copy: format!("Post {i}: {topic} ✨"),
                        image_prompt: format!("Fotografía luminosa de producto, idea {i}: {topic}"),
                    })
                    .collect(),
            ),
            GenerationKind::Campaign => Artifact::Campaign(CampaignIdea {
                concept: format!("Campaña demo {n}"),
                summary: format!("Una campaña de ejemplo basada en: {topic}"),
                key_actions: vec![
                    "Lanzamiento en redes".into(),
                    "Alianza con creadores".into(),
                    "Oferta de bienvenida".into(),
                ],
            }),
            GenerationKind::Script => Artifact::Script(ReelScript {
                concept: format!("Reel demo {n}"),
                script: format!(
                    "Escena 1: gancho sobre {topic}.\nEscena 2: desarrollo.\nEscena 3: llamada a la acción."
                ),
            }),
            GenerationKind::Persona => Artifact::Persona(Persona {
                name: format!("Persona {n}"),
                age: 25 + (slot as u32 * 3) % 30,
                occupation: "Profesional independiente".into(),
                bio: format!("Cliente ideal para: {topic}"),
                goals: "Ahorrar tiempo y sentirse bien con sus compras.".into(),
                pain_points: "Poca información clara y demasiadas opciones.".into(),
            }),
            GenerationKind::Seo => Artifact::Seo(SeoIdea {
                kind: [SeoKind::Title, SeoKind::Faq, SeoKind::Meta][slot % 3],
                content: format!("Guía {n} sobre {topic}"),
            }),
            GenerationKind::NameSlogan => Artifact::NameSlogan(NameSlogan {
                kind: if slot % 2 == 0 { SuggestionKind::Name } else { SuggestionKind::Slogan },
                suggestion: format!("Demo {n}"),
                justification: format!("Evoca la esencia de {topic}"),
            }),
        };
        Ok(artifact)
    }

    async fn submit_video_job(&self, request: &VideoRequest) -> Result<OperationHandle, GenerationError> {
        let name = format!("operations/demo-{}", Uuid::new_v4());
        info!("🎬 Demo video job {} ({})", name, request.aspect_ratio.as_str());
        self.polls.lock().insert(name.clone(), 0);
        Ok(OperationHandle::pending(name))
    }

    async fn poll_video_job(&self, handle: &OperationHandle) -> Result<OperationHandle, GenerationError> {
        let mut polls = self.polls.lock();
        let count = polls
            .get_mut(&handle.name)
            .ok_or_else(|| GenerationError::Auth("Requested entity was not found.".into()))?;
        *count += 1;
        if *count < POLLS_UNTIL_DONE {
            return Ok(OperationHandle::pending(handle.name.clone()));
        }
        polls.remove(&handle.name);
        Ok(OperationHandle {
            name: handle.name.clone(),
            done: true,
            result_uri: Some(format!("demo://{}", handle.name)),
            failure: None,
        })
    }

    async fn fetch_video(&self, uri: &str) -> Result<VideoArtifact, GenerationError> {
        if !uri.starts_with("demo://") {
            return Err(GenerationError::Transport(format!("demo mode cannot fetch {uri}")));
        }
        // an ftyp box header is enough for players to recognise the container
        let mut data = vec![0, 0, 0, 0x18];
        data.extend_from_slice(b"ftypmp42\0\0\0\0mp42isom");
        Ok(VideoArtifact { data: Bytes::from(data), media_type: "video/mp4".to_string() })
    }

    async fn analyze_image(&self, image: &EncodedImage) -> Result<String, GenerationError> {
        Ok(format!(
            "Análisis de demostración: imagen {} recibida. Con una clave de API real obtendrás un análisis de composición, color, emociones y público objetivo.",
            image.media_type
        ))
    }
}
