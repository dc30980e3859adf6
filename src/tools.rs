use serde::{Deserialize, Serialize};

use crate::{
    encoding::{EncodedImage, ReferenceImage},
    error::GenerationError,
    models::{GenerationKind, GenerationRequest},
};

/// The batch tools of the suite. Video and image analysis are single-shot
/// flows and live outside this list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Mockups,
    Logos,
    Branding,
    Copywriting,
    Social,
    Campaign,
    Scripts,
    Personas,
    Seo,
    Names,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every slot is a full request with the same parameters.
    Independent,
    /// One call plans all slots, then each slot's image is rendered separately.
    PlanThenFill,
}

impl ToolKind {
    pub const ALL: [ToolKind; 10] = [
        ToolKind::Mockups,
        ToolKind::Logos,
        ToolKind::Branding,
        ToolKind::Copywriting,
        ToolKind::Social,
        ToolKind::Campaign,
        ToolKind::Scripts,
        ToolKind::Personas,
        ToolKind::Seo,
        ToolKind::Names,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            ToolKind::Mockups => "mockups",
            ToolKind::Logos => "logos",
            ToolKind::Branding => "branding",
            ToolKind::Copywriting => "copywriting",
            ToolKind::Social => "social",
            ToolKind::Campaign => "campaign",
            ToolKind::Scripts => "scripts",
            ToolKind::Personas => "personas",
            ToolKind::Seo => "seo",
            ToolKind::Names => "names",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ToolKind::Mockups => "Generador de Mockups",
            ToolKind::Logos => "Generador de Logos",
            ToolKind::Branding => "Asistente de Branding",
            ToolKind::Copywriting => "Asistente de Copywriting",
            ToolKind::Social => "Posts para Redes",
            ToolKind::Campaign => "Ideas de Campaña",
            ToolKind::Scripts => "Guiones para Reels",
            ToolKind::Personas => "Creador de Personas",
            ToolKind::Seo => "Asistente SEO",
            ToolKind::Names => "Nombres y Slogans",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::Mockups => "Sube tu logo y obtén mockups profesionales generados por IA al instante.",
            ToolKind::Logos => "Describe el logo que imaginas y la IA creará conceptos con diferentes estilos.",
            ToolKind::Branding => "Define la esencia de una marca y recibe propuestas completas de identidad visual.",
            ToolKind::Copywriting => "Crea variantes de textos publicitarios de alto impacto para diferentes formatos.",
            ToolKind::Social => "Describe tu objetivo y la IA generará pares de imagen y texto listos para publicar.",
            ToolKind::Campaign => "Detalla tu producto y objetivo para recibir conceptos de campañas de marketing.",
            ToolKind::Scripts => "Dale un tema a la IA y obtén guiones estructurados para videos cortos virales.",
            ToolKind::Personas => "Convierte la descripción de tu público en perfiles de \"Buyer Persona\" detallados.",
            ToolKind::Seo => "Introduce un tema y obtén ideas de contenido optimizado para motores de búsqueda.",
            ToolKind::Names => "Supera el bloqueo creativo generando nombres y slogans para tu nueva marca.",
        }
    }

    pub fn strategy(self) -> Strategy {
        match self {
            ToolKind::Social => Strategy::PlanThenFill,
            _ => Strategy::Independent,
        }
    }

    /// Kind of the per-slot call. For plan-then-fill tools this is the fill call.
    pub fn slot_kind(self) -> GenerationKind {
        match self {
            ToolKind::Mockups => GenerationKind::Mockup,
            ToolKind::Logos => GenerationKind::Logo,
            ToolKind::Branding => GenerationKind::Branding,
            ToolKind::Copywriting => GenerationKind::Copywriting,
            ToolKind::Social => GenerationKind::SocialImage,
            ToolKind::Campaign => GenerationKind::Campaign,
            ToolKind::Scripts => GenerationKind::Script,
            ToolKind::Personas => GenerationKind::Persona,
            ToolKind::Seo => GenerationKind::Seo,
            ToolKind::Names => GenerationKind::NameSlogan,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CopyFormat {
    #[default]
    #[serde(rename = "Anuncio de Facebook")]
    FacebookAd,
    #[serde(rename = "Título para Google Ads")]
    GoogleAdsTitle,
    #[serde(rename = "Asunto de Email")]
    EmailSubject,
    #[serde(rename = "Descripción de Producto")]
    ProductDescription,
}

impl CopyFormat {
    pub fn label(self) -> &'static str {
        match self {
            CopyFormat::FacebookAd => "Anuncio de Facebook",
            CopyFormat::GoogleAdsTitle => "Título para Google Ads",
            CopyFormat::EmailSubject => "Asunto de Email",
            CopyFormat::ProductDescription => "Descripción de Producto",
        }
    }
}

/// Raw form inputs as posted by the UI. Which fields are required depends on the tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInput {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub tone: Option<String>,
    #[serde(default)]
    pub format: Option<CopyFormat>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub brand_context: Option<String>,
    #[serde(default)]
    pub image: Option<ReferenceImage>,
}

/// Validated, tool-specific parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolParams {
    Mockups { logo: EncodedImage, brand_context: String },
    Logos { prompt: String },
    Branding { prompt: String },
    Copywriting { product: String, audience: String, tone: String, format: CopyFormat },
    Social { prompt: String },
    Campaign { product: String, objective: String, audience: String },
    Scripts { prompt: String },
    Personas { prompt: String },
    Seo { prompt: String },
    Names { prompt: String },
}

fn required(field: &str, value: &Option<String>) -> Result<String, GenerationError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GenerationError::Validation(field.to_string()))
}

impl ToolParams {
    /// Validates the inputs required by `tool`. Missing fields yield [`GenerationError::Validation`].
    pub fn build(tool: ToolKind, input: &ToolInput) -> Result<Self, GenerationError> {
        let params = match tool {
            ToolKind::Mockups => {
                let logo = input
                    .image
                    .as_ref()
                    .ok_or_else(|| GenerationError::Validation("image".into()))?
                    .encode()?;
                let brand_context = input.brand_context.as_deref().unwrap_or_default().trim().to_string();
                ToolParams::Mockups { logo, brand_context }
            }
            ToolKind::Logos => ToolParams::Logos { prompt: required("prompt", &input.prompt)? },
            ToolKind::Branding => ToolParams::Branding { prompt: required("prompt", &input.prompt)? },
            ToolKind::Copywriting => ToolParams::Copywriting {
                product: required("product", &input.product)?,
                audience: required("audience", &input.audience)?,
                tone: required("tone", &input.tone)?,
                format: input.format.unwrap_or_default(),
            },
            ToolKind::Social => ToolParams::Social { prompt: required("prompt", &input.prompt)? },
            ToolKind::Campaign => ToolParams::Campaign {
                product: required("product", &input.product)?,
                objective: required("objective", &input.objective)?,
                audience: required("audience", &input.audience)?,
            },
            ToolKind::Scripts => ToolParams::Scripts { prompt: required("prompt", &input.prompt)? },
            ToolKind::Personas => ToolParams::Personas { prompt: required("prompt", &input.prompt)? },
            ToolKind::Seo => ToolParams::Seo { prompt: required("prompt", &input.prompt)? },
            ToolKind::Names => ToolParams::Names { prompt: required("prompt", &input.prompt)? },
        };
        Ok(params)
    }

    /// Request issued for one slot. For the social tool this is the planning request
    /// and `count` is the batch size.
    pub fn request(&self, count: usize) -> GenerationRequest {
        match self {
            ToolParams::Mockups { logo, brand_context } => {
                let context = if brand_context.is_empty() {
                    String::new()
                } else {
                    format!(" Contexto de la marca: {brand_context}.")
                };
                GenerationRequest {
                    prompt: format!(
                        "Crea un mockup fotorrealista y profesional que muestre este logo aplicado de forma natural sobre un producto o soporte de marca.{context}"
                    ),
                    reference: Some(logo.clone()),
                    count: 1,
                }
            }
            ToolParams::Copywriting { product, audience, tone, format } => GenerationRequest::text(format!(
                "Producto: {product}\nPúblico: {audience}\nTono: {tone}\nFormato: {}",
                format.label()
            )),
            ToolParams::Campaign { product, objective, audience } => {
                GenerationRequest::text(format!("Producto: {product}\nObjetivo: {objective}\nPúblico: {audience}"))
            }
            ToolParams::Social { prompt } => GenerationRequest { count, ..GenerationRequest::text(prompt.clone()) },
            ToolParams::Logos { prompt }
            | ToolParams::Branding { prompt }
            | ToolParams::Scripts { prompt }
            | ToolParams::Personas { prompt }
            | ToolParams::Seo { prompt }
            | ToolParams::Names { prompt } => GenerationRequest::text(prompt.clone()),
        }
    }
}
