//! Two-stage image analysis.
//!
//! 1. A vision model describes the image and decides whether it shows a cat,
//!    answering with a JSON object.
//! 2. The persona agent turns that analysis into an in-character reply.
//!
//! Neither stage surfaces an error: a failed vision stage yields
//! [`ImageAnalysis::failed`], a failed persona stage yields
//! [`ANALYSIS_FAILED`] as the reply text.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::agent::prompts::IMAGE_ANALYST_INSTRUCTIONS;
use crate::agent::{GenerateRequest, LanguageModel, ModelMessage, PersonaAgent};
use crate::codec::ImageData;
use crate::memory::Message;

/// Text returned when image analysis fails.
pub const ANALYSIS_FAILED: &str = "画像の分析に失敗しました";

/// Prompt given to the vision model when the user supplied none.
pub const DEFAULT_VISION_PROMPT: &str = "この画像を詳細に分析してください。";

/// Output of the vision stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAnalysis {
    pub is_cat: bool,
    pub analysis: String,
}

impl ImageAnalysis {
    pub fn failed() -> Self {
        Self {
            is_cat: false,
            analysis: ANALYSIS_FAILED.to_string(),
        }
    }
}

/// Parse the first JSON object in `raw` that has the analysis shape.
///
/// Models like to wrap JSON in prose or code fences; everything outside the
/// object is ignored.
pub fn parse_analysis(raw: &str) -> Option<ImageAnalysis> {
    raw.match_indices('{').find_map(|(start, _)| {
        let mut stream =
            serde_json::Deserializer::from_str(&raw[start..]).into_iter::<ImageAnalysis>();
        stream.next().and_then(Result::ok)
    })
}

/// Vision model followed by the persona agent.
#[derive(Clone)]
pub struct ImageAnalysisPipeline {
    vision: Arc<dyn LanguageModel>,
    persona: PersonaAgent,
}

impl ImageAnalysisPipeline {
    pub fn new(vision: Arc<dyn LanguageModel>, persona: PersonaAgent) -> Self {
        Self { vision, persona }
    }

    /// Vision stage. Never fails.
    #[instrument(skip_all, fields(model = %self.vision.name(), mime = %image.mime_type()))]
    pub async fn analyze_image(&self, image: &ImageData, user_prompt: Option<&str>) -> ImageAnalysis {
        let prompt = user_prompt
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_VISION_PROMPT);

        let request = GenerateRequest::new(
            IMAGE_ANALYST_INSTRUCTIONS,
            vec![ModelMessage::image(image.clone(), prompt)],
        );

        match self.vision.generate(request).await {
            Ok(raw) => match parse_analysis(&raw) {
                Some(analysis) => {
                    debug!(is_cat = analysis.is_cat, "image analyzed");
                    analysis
                }
                None => {
                    warn!(raw = %raw, "vision reply contained no analysis object");
                    ImageAnalysis::failed()
                }
            },
            Err(e) => {
                warn!(error = %e, "vision stage failed");
                ImageAnalysis::failed()
            }
        }
    }

    /// Persona stage. Memory is not involved; the caller stores the turn.
    pub async fn respond(&self, analysis: &ImageAnalysis) -> Option<String> {
        let summary = match serde_json::to_string(analysis) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize analysis");
                return None;
            }
        };
        let turn = Message::user(format!("画像分析結果: {}", summary));

        match self.persona.generate(&[turn], None).await {
            Ok(reply) => Some(reply.text),
            Err(e) => {
                warn!(error = %e, "persona stage failed");
                None
            }
        }
    }

    /// Both stages. Returns the reply text, or [`ANALYSIS_FAILED`].
    pub async fn run(&self, image: &ImageData, user_prompt: Option<&str>) -> String {
        let analysis = self.analyze_image(image, user_prompt).await;
        self.finish(analysis).await
    }

    /// Both stages on an embedded data URL. A payload that does not decode
    /// counts as a failed vision stage; the persona still answers.
    pub async fn run_data_url(&self, data_url: &str, user_prompt: Option<&str>) -> String {
        match ImageData::from_data_url(data_url) {
            Some(image) => self.run(&image, user_prompt).await,
            None => {
                warn!(len = data_url.len(), "image payload does not decode");
                self.finish(ImageAnalysis::failed()).await
            }
        }
    }

    async fn finish(&self, analysis: ImageAnalysis) -> String {
        let reply = self
            .respond(&analysis)
            .await
            .unwrap_or_else(|| ANALYSIS_FAILED.to_string());
        info!(is_cat = analysis.is_cat, chars = reply.chars().count(), "image pipeline finished");
        reply
    }
}
