use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::{encoding::{extension_for, EncodedImage}, error::GenerationError};

/// Parameters handed to the collaborator for one call. Built from a tool's
/// validated inputs and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub reference: Option<EncodedImage>,
    /// How many items a structured call should return.
    pub count: usize,
}

impl GenerationRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), reference: None, count: 1 }
    }
}

/// Selects which model, schema and instructions the collaborator uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Mockup,
    Logo,
    SocialImage,
    Branding,
    Copywriting,
    SocialIdeas,
    Campaign,
    Script,
    Persona,
    Seo,
    NameSlogan,
}

impl GenerationKind {
    pub fn is_image(self) -> bool {
        matches!(self, GenerationKind::Mockup | GenerationKind::Logo | GenerationKind::SocialImage)
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageArtifact {
    #[serde_as(as = "Base64")]
    pub data: Vec<u8>,
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
}

impl ImageArtifact {
    pub fn file_name(&self, stem: &str) -> String {
        format!("{}.{}", stem, extension_for(&self.media_type))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrandingConcept {
    pub color_palette: Vec<String>,
    pub typography_suggestion: String,
    pub tone_of_voice: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyVariant {
    pub copy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialIdea {
    pub copy: String,
    pub image_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignIdea {
    pub concept: String,
    pub summary: String,
    pub key_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReelScript {
    pub concept: String,
    pub script: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    pub name: String,
    pub age: u32,
    pub occupation: String,
    pub bio: String,
    pub goals: String,
    pub pain_points: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeoKind {
    Title,
    Faq,
    Meta,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeoIdea {
    #[serde(rename = "type")]
    pub kind: SeoKind,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionKind {
    Name,
    Slogan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameSlogan {
    #[serde(rename = "type")]
    pub kind: SuggestionKind,
    pub suggestion: String,
    pub justification: String,
}

/// What the collaborator hands back for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Image(ImageArtifact),
    Branding(BrandingConcept),
    Copy(CopyVariant),
    SocialIdeas(Vec<SocialIdea>),
    Campaign(CampaignIdea),
    Script(ReelScript),
    Persona(Persona),
    Seo(SeoIdea),
    NameSlogan(NameSlogan),
}

impl Artifact {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Artifact::Image(_) => "image",
            Artifact::Branding(_) => "branding",
            Artifact::Copy(_) => "copy",
            Artifact::SocialIdeas(_) => "social_ideas",
            Artifact::Campaign(_) => "campaign",
            Artifact::Script(_) => "script",
            Artifact::Persona(_) => "persona",
            Artifact::Seo(_) => "seo",
            Artifact::NameSlogan(_) => "name_slogan",
        }
    }
}

/// Content of a slot that finished successfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Image(ImageArtifact),
    Branding(BrandingConcept),
    Copy(CopyVariant),
    SocialPost { idea: SocialIdea, image: ImageArtifact },
    Campaign(CampaignIdea),
    Script(ReelScript),
    Persona(Persona),
    Seo(SeoIdea),
    NameSlogan(NameSlogan),
}

impl Payload {
    pub fn image(&self) -> Option<&ImageArtifact> {
        match self {
            Payload::Image(img) | Payload::SocialPost { image: img, .. } => Some(img),
            _ => None,
        }
    }

    /// Text placed on the clipboard by a card's copy action.
    pub fn copy_text(&self) -> Option<String> {
        match self {
            Payload::Image(_) => None,
            Payload::Copy(c) => Some(c.copy.clone()),
            Payload::SocialPost { idea, .. } => Some(idea.copy.clone()),
            Payload::Seo(s) => Some(s.content.clone()),
            Payload::NameSlogan(n) => Some(n.suggestion.clone()),
            Payload::Campaign(c) => Some(format!(
                "Concepto: {}\n\nResumen: {}\n\nAcciones Clave:\n- {}",
                c.concept,
                c.summary,
                c.key_actions.join("\n- ")
            )),
            Payload::Script(s) => Some(format!("Concepto: {}\n\nGuion:\n{}", s.concept, s.script)),
            Payload::Branding(b) => Some(format!(
                "Paleta de Colores: {}\nTipografía: {}\nTono de Voz: {}",
                b.color_palette.join(", "),
                b.typography_suggestion,
                b.tone_of_voice
            )),
            Payload::Persona(p) => Some(format!(
                "{}, {} ({})\n\n{}\n\nMetas: {}\nPuntos de Dolor: {}",
                p.name, p.age, p.occupation, p.bio, p.goals, p.pain_points
            )),
        }
    }

    /// Serialized form used by the "export all" action.
    pub fn export_text(&self) -> String {
        match self {
            Payload::Image(img) => {
                let style = img.style.as_deref().map(|s| format!(", estilo: {s}")).unwrap_or_default();
                format!("[imagen {} · {} bytes]{}", img.media_type, img.data.len(), style)
            }
            Payload::Seo(s) => format!("[{}] {}", seo_label(s.kind), s.content),
            Payload::NameSlogan(n) => format!(
                "[{}] {}\n{}",
                match n.kind {
                    SuggestionKind::Name => "Nombre",
                    SuggestionKind::Slogan => "Slogan",
                },
                n.suggestion,
                n.justification
            ),
            // every other variant has a copy text
            other => other.copy_text().unwrap_or_default(),
        }
    }
}

fn seo_label(kind: SeoKind) -> &'static str {
    match kind {
        SeoKind::Title => "Título de Blog",
        SeoKind::Faq => "Pregunta Frecuente",
        SeoKind::Meta => "Meta Descripción",
    }
}

/// Checks a structured artifact against the invariants its schema cannot express.
pub fn validate_artifact(artifact: &Artifact) -> Result<(), GenerationError> {
    let blank = |field: &str, value: &str| -> Result<(), GenerationError> {
        if value.trim().is_empty() {
            Err(GenerationError::Malformed(format!("field `{field}` is empty")))
        } else {
            Ok(())
        }
    };
    match artifact {
        Artifact::Image(img) if img.data.is_empty() => Err(GenerationError::NoArtifact("image has no bytes".into())),
        Artifact::Image(_) => Ok(()),
        Artifact::Branding(b) => {
            if b.color_palette.len() != 5 {
                return Err(GenerationError::Malformed(format!(
                    "expected 5 palette colors, got {}",
                    b.color_palette.len()
                )));
            }
            if let Some(bad) = b.color_palette.iter().find(|c| !is_hex_color(c)) {
                return Err(GenerationError::Malformed(format!("`{bad}` is not a hex color")));
            }
            blank("typographySuggestion", &b.typography_suggestion)?;
            blank("toneOfVoice", &b.tone_of_voice)
        }
        Artifact::Copy(c) => blank("copy", &c.copy),
        Artifact::SocialIdeas(ideas) => ideas.iter().try_for_each(|i| {
            blank("copy", &i.copy)?;
            blank("imagePrompt", &i.image_prompt)
        }),
        Artifact::Campaign(c) => {
            blank("concept", &c.concept)?;
            blank("summary", &c.summary)?;
            if c.key_actions.is_empty() {
                return Err(GenerationError::Malformed("campaign has no key actions".into()));
            }
            Ok(())
        }
        Artifact::Script(s) => {
            blank("concept", &s.concept)?;
            blank("script", &s.script)
        }
        Artifact::Persona(p) => {
            blank("name", &p.name)?;
            blank("occupation", &p.occupation)?;
            blank("bio", &p.bio)
        }
        Artifact::Seo(s) => blank("content", &s.content),
        Artifact::NameSlogan(n) => blank("suggestion", &n.suggestion),
    }
}

fn is_hex_color(s: &str) -> bool {
    let Some(hex) = s.strip_prefix('#') else { return false };
    matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit())
}

/// Options for an asynchronous video job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Landscape => "16:9",
            AspectRatio::Portrait => "9:16",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRequest {
    pub prompt: String,
    pub image: EncodedImage,
    pub aspect_ratio: AspectRatio,
}

/// Handle for a server-side video job, as returned by submission and by each status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationHandle {
    pub name: String,
    pub done: bool,
    pub result_uri: Option<String>,
    pub failure: Option<String>,
}

impl OperationHandle {
    pub fn pending(name: impl Into<String>) -> Self {
        Self { name: name.into(), done: false, result_uri: None, failure: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoArtifact {
    pub data: Bytes,
    pub media_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn campaign_copy_text_matches_card_format() {
        let p = Payload::Campaign(CampaignIdea {
            concept: "Respira".into(),
            summary: "Pausas de un minuto".into(),
            key_actions: vec!["Reto de 7 días".into(), "Embajadores".into()],
        });
        assert_eq!(
            p.copy_text().unwrap(),
            "Concepto: Respira\n\nResumen: Pausas de un minuto\n\nAcciones Clave:\n- Reto de 7 días\n- Embajadores"
        );
    }

    #[test]
    fn script_copy_text() {
        let p = Payload::Script(ReelScript { concept: "Tip".into(), script: "Escena 1".into() });
        assert_eq!(p.copy_text().unwrap(), "Concepto: Tip\n\nGuion:\nEscena 1");
    }

    #[test]
    fn images_have_no_copy_text() {
        let p = Payload::Image(ImageArtifact { data: vec![1, 2], media_type: "image/png".into(), style: None });
        assert!(p.copy_text().is_none());
        assert_eq!(p.export_text(), "[imagen image/png · 2 bytes]");
    }

    #[test]
    fn branding_palette_is_validated() {
        let mut b = BrandingConcept {
            color_palette: vec!["#fff".into(), "#000000".into(), "#A1B2C3".into(), "#123".into(), "#abcdef".into()],
            typography_suggestion: "Lora + Inter".into(),
            tone_of_voice: "Cercano".into(),
        };
        assert!(validate_artifact(&Artifact::Branding(b.clone())).is_ok());

        b.color_palette[2] = "red".into();
        assert!(matches!(validate_artifact(&Artifact::Branding(b.clone())), Err(GenerationError::Malformed(_))));

        b.color_palette.pop();
        assert!(matches!(validate_artifact(&Artifact::Branding(b)), Err(GenerationError::Malformed(_))));
    }

    #[test]
    fn seo_and_name_wire_names() {
        let seo: SeoIdea = serde_json::from_str(r#"{"type":"faq","content":"¿Qué es?"}"#).unwrap();
        assert_eq!(seo.kind, SeoKind::Faq);
        let name: NameSlogan =
            serde_json::from_str(r#"{"type":"slogan","suggestion":"Sabe a casa","justification":"Cálido"}"#).unwrap();
        assert_eq!(name.kind, SuggestionKind::Slogan);
        let persona: Persona = serde_json::from_str(
            r#"{"name":"Ana","age":34,"occupation":"Diseñadora","bio":"b","goals":"g","painPoints":"p"}"#,
        )
        .unwrap();
        assert_eq!(persona.pain_points, "p");
    }

    #[test]
    fn aspect_ratio_wire_format() {
        assert_eq!(serde_json::to_string(&AspectRatio::Portrait).unwrap(), "\"9:16\"");
        let r: AspectRatio = serde_json::from_str("\"16:9\"").unwrap();
        assert_eq!(r, AspectRatio::Landscape);
    }
}
