use crate::json_fields::{
    NULL_SENTINEL, depot_path_field, f32_field, field, is_null_path, opt_f32_field, root_chunk,
    selector_field,
};
use crate::overrides::{self, OverrideTable};
use anyhow::{Result, bail};
use serde::Serialize;
use serde_json::Value;

/// A `.mltemplate`: four textures, a tiling multiplier and its presets.
#[derive(Debug, Clone, Serialize)]
pub struct MaterialTemplate {
    pub depot_path: String,
    pub color_texture: Option<String>,
    pub normal_texture: Option<String>,
    pub roughness_texture: Option<String>,
    pub metalness_texture: Option<String>,
    pub tiling_multiplier: f32,
    pub overrides: OverrideTable,
    /// The document could not be found; every channel is a placeholder.
    pub placeholder: bool,
}

impl MaterialTemplate {
    pub fn from_doc(depot_path: &str, doc: &Value) -> Self {
        let Some(root) = root_chunk(doc) else {
            log::warn!("{}: no Data.RootChunk, treating as empty template", depot_path);
            return Self::placeholder(depot_path);
        };
        let texture = |keys: &[&str]| depot_path_field(root, keys).filter(|p| !is_null_path(p));
        Self {
            depot_path: depot_path.to_string(),
            color_texture: texture(&["colorTexture", "ColorTexture"]),
            normal_texture: texture(&["normalTexture", "NormalTexture"]),
            roughness_texture: texture(&["roughnessTexture", "RoughnessTexture"]),
            metalness_texture: texture(&["metalnessTexture", "MetalnessTexture"]),
            tiling_multiplier: f32_field(
                root,
                &["tilingMultiplier", "TilingMultiplier"],
                1.0,
                depot_path,
            ),
            overrides: overrides::resolve(root),
            placeholder: false,
        }
    }

    pub fn placeholder(depot_path: &str) -> Self {
        Self {
            depot_path: depot_path.to_string(),
            color_texture: None,
            normal_texture: None,
            roughness_texture: None,
            metalness_texture: None,
            tiling_multiplier: 1.0,
            overrides: OverrideTable::default(),
            placeholder: true,
        }
    }
}

/// One entry of a multilayer setup, as authored. Absent fields stay `None`
/// and are defaulted when the layer is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerSpec {
    pub material: Option<String>,
    /// `None` for a missing or `"null"` microblend.
    pub microblend: Option<String>,
    pub mat_tile: Option<f32>,
    pub mb_tile: Option<f32>,
    pub microblend_contrast: Option<f32>,
    pub microblend_normal_strength: Option<f32>,
    pub microblend_offset_u: Option<f32>,
    pub microblend_offset_v: Option<f32>,
    pub opacity: Option<f32>,
    pub color_scale: Option<String>,
    pub normal_strength: Option<String>,
    pub rough_levels_out: Option<String>,
    pub metal_levels_out: Option<String>,
}

impl LayerSpec {
    pub fn from_value(layer: &Value, context: &str) -> Self {
        let num = |keys: &[&str]| opt_f32_field(layer, keys, context);
        Self {
            material: depot_path_field(layer, &["material", "Material"])
                .filter(|p| !is_null_path(p)),
            microblend: depot_path_field(layer, &["microblend", "Microblend"])
                .filter(|p| !is_null_path(p)),
            mat_tile: num(&["matTile", "MatTile"]),
            mb_tile: num(&["mbTile", "MbTile"]),
            microblend_contrast: num(&["microblendContrast", "MicroblendContrast"]),
            microblend_normal_strength: num(&[
                "microblendNormalStrength",
                "MicroblendNormalStrength",
            ]),
            microblend_offset_u: num(&["microblendOffsetU", "MicroblendOffsetU"]),
            microblend_offset_v: num(&["microblendOffsetV", "MicroblendOffsetV"]),
            opacity: num(&["opacity", "Opacity"]),
            color_scale: selector_field(layer, &["colorScale", "ColorScale"]),
            normal_strength: selector_field(layer, &["normalStrength", "NormalStrength"]),
            rough_levels_out: selector_field(layer, &["roughLevelsOut", "RoughLevelsOut"]),
            metal_levels_out: selector_field(layer, &["metalLevelsOut", "MetalLevelsOut"]),
        }
    }

    /// The colour tint is skipped entirely for a literal `"null"` selector.
    pub fn tints_color(&self) -> bool {
        self.color_scale.as_deref() != Some(NULL_SENTINEL)
    }
}

/// A `.mlsetup`: layers in compositing order, bottom first.
#[derive(Debug, Clone, Serialize)]
pub struct MultilayerSetup {
    pub depot_path: String,
    pub layers: Vec<LayerSpec>,
}

impl MultilayerSetup {
    pub fn from_doc(depot_path: &str, doc: &Value) -> Result<Self> {
        let Some(root) = root_chunk(doc) else {
            bail!("{}: no Data.RootChunk", depot_path);
        };
        let Some(layers) = field(root, &["layers", "Layers"]).and_then(|v| v.as_array()) else {
            bail!("{}: no layers array", depot_path);
        };
        if layers.is_empty() {
            bail!("{}: multilayer setup has no layers", depot_path);
        }
        let layers = layers
            .iter()
            .enumerate()
            .map(|(i, l)| LayerSpec::from_value(l, &format!("{} layer {}", depot_path, i)))
            .collect();
        Ok(Self {
            depot_path: depot_path.to_string(),
            layers,
        })
    }

    /// Setup file name without directories or the `.mlsetup` extension.
    pub fn stem(&self) -> String {
        crate::assets::short_name(&self.depot_path)
    }
}
