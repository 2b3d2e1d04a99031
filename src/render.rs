use std::collections::BTreeMap;

use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use tracing::info;

use crate::collaborators::Renderer;
use crate::config::Config;
use crate::error::RepaintError;
use crate::models::{FeatureMeta, TransformedMeta};

const NEGATIVE_PROMPT: &str = "blurry, deformed face, part of face, extra faces, deformed hands, deformed fingers, ugly, bad anatomy, extra fingers, bad anatomy, extra legs";
const SAMPLER: &str = "DPM++ 2S a Karras";
const STEPS: u32 = 50;
const CFG_SCALE: u32 = 8;

/// ControlNet preprocessor used to keep the source image's structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlModule {
    /// Pass-through for sketches and ink drawings.
    None,
    /// Straight-line detection, for interiors and architecture.
    Mlsd,
    /// Soft edges, the general-purpose default.
    Hed,
}

impl ControlModule {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlModule::None => "none",
            ControlModule::Mlsd => "mlsd",
            ControlModule::Hed => "hed",
        }
    }
}

/// First match wins: sketch, then people-free interior, then everything else.
pub fn select_module(meta: &FeatureMeta) -> ControlModule {
    if meta.flag("sketch") {
        ControlModule::None
    } else if meta.flag("interior") && !meta.flag("humans") && !meta.flag("face") {
        ControlModule::Mlsd
    } else {
        ControlModule::Hed
    }
}

/// Module → ControlNet model identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelTable(BTreeMap<ControlModule, String>);

impl Default for ModelTable {
    fn default() -> Self {
        Self(BTreeMap::from([
            (ControlModule::Mlsd, "control_sd15_mlsd [fef5e48e]".to_string()),
            (ControlModule::Hed, "control_sd15_hed [fef5e48e]".to_string()),
            (ControlModule::None, "control_sd15_scribble [fef5e48e]".to_string()),
        ]))
    }
}

impl ModelTable {
    pub fn from_config(cfg: &Config) -> Self {
        let mut table = Self::default();
        for (module, model) in [
            (ControlModule::Mlsd, &cfg.model_mlsd),
            (ControlModule::Hed, &cfg.model_hed),
            (ControlModule::None, &cfg.model_none),
        ] {
            if let Some(model) = model {
                table.0.insert(module, model.clone());
            }
        }
        table
    }

    pub fn model_for(&self, module: ControlModule) -> &str {
        self.0.get(&module).map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ControlUnit {
    pub input_image: String,
    pub mask: String,
    pub module: ControlModule,
    pub model: String,
    pub weight: f32,
    pub resize_mode: &'static str,
    pub lowvram: bool,
    pub processor_res: u32,
    pub threshold_a: u32,
    pub threshold_b: u32,
    pub guidance: f32,
    pub guidance_start: f32,
    pub guidance_end: f32,
    pub guessmode: bool,
}

/// Body of the ControlNet txt2img call.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenderRequest {
    pub prompt: String,
    pub negative_prompt: &'static str,
    pub sampler_name: &'static str,
    pub batch_size: u32,
    pub n_iter: u32,
    pub steps: u32,
    pub cfg_scale: u32,
    pub width: u32,
    pub height: u32,
    pub restore_faces: bool,
    pub tiling: bool,
    pub sampler_index: &'static str,
    pub controlnet_units: Vec<ControlUnit>,
}

pub fn build_request(models: &ModelTable, image: &[u8], transformed: &TransformedMeta, width: u32, height: u32) -> RenderRequest {
    let meta = &transformed.meta;
    let module = select_module(meta);
    RenderRequest {
        prompt: transformed.prompt.clone(),
        negative_prompt: NEGATIVE_PROMPT,
        sampler_name: SAMPLER,
        batch_size: 1,
        n_iter: 1,
        steps: STEPS,
        cfg_scale: CFG_SCALE,
        width,
        height,
        restore_faces: meta.flag("face") || meta.flag("humans"),
        tiling: false,
        sampler_index: SAMPLER,
        controlnet_units: vec![ControlUnit {
            input_image: base64::engine::general_purpose::STANDARD.encode(image),
            mask: String::new(),
            module,
            model: models.model_for(module).to_string(),
            weight: 1.0,
            resize_mode: "Just Resize",
            lowvram: false,
            processor_res: 64,
            threshold_a: 64,
            threshold_b: 64,
            guidance: 1.0,
            guidance_start: 0.0,
            guidance_end: 1.0,
            guessmode: false,
        }],
    }
}

/// Picks the control module, builds the request and renders it.
pub async fn dispatch(
    renderer: &dyn Renderer,
    models: &ModelTable,
    image: &[u8],
    transformed: &TransformedMeta,
    width: u32,
    height: u32,
) -> Result<Bytes, RepaintError> {
    let request = build_request(models, image, transformed, width, height);
    if let Some(unit) = request.controlnet_units.first() {
        info!("🎨 Rendering [{}] with [{}] and [{}]", request.prompt, unit.module.as_str(), unit.model);
    }

    let image = renderer.render(&request).await?;
    if image.is_empty() {
        return Err(RepaintError::RenderService("renderer returned an empty image".into()));
    }
    Ok(image)
}
