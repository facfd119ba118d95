use crate::base_layer::{OUT_COLOR, OUT_METALNESS, OUT_NORMAL, OUT_ROUGHNESS, TILE_MULTIPLIER};
use crate::blend_math::{CONTRAST_EPSILON, MASK_CONTRAST_SCALE};
use crate::documents::{LayerSpec, MaterialTemplate};
use crate::node_graph::{
    BlendMode, ColorSpace, CurveChannel, InterfaceSocket, Interpolation, MathOp, MixDataType,
    NodeId, NodeKind, NodeTree, RampStop, RgbCurves, Rgba, SocketType, SocketValue, VectorOp,
};
use crate::overrides::{LevelsPair, OverrideTable};
use crate::session::BuildContext;
use serde::Serialize;
use std::rc::Rc;

pub const IN_COLOR_SCALE: &str = "ColorScale";
pub const IN_MAT_TILE: &str = "MatTile";
pub const IN_MB_TILE: &str = "MbTile";
pub const IN_MB_NORMAL_STRENGTH: &str = "MicroblendNormalStrength";
pub const IN_MB_CONTRAST: &str = "MicroblendContrast";
pub const IN_MB_OFFSET_U: &str = "MicroblendOffsetU";
pub const IN_MB_OFFSET_V: &str = "MicroblendOffsetV";
pub const IN_NORMAL_STRENGTH: &str = "NormalStrength";
pub const IN_OPACITY: &str = "Opacity";
pub const IN_MASK: &str = "Mask";
pub const OUT_LAYER_MASK: &str = "Layer Mask";

pub const LAYER_INPUTS: [&str; 10] = [
    IN_COLOR_SCALE,
    IN_MAT_TILE,
    IN_MB_TILE,
    IN_MB_NORMAL_STRENGTH,
    IN_MB_CONTRAST,
    IN_MB_OFFSET_U,
    IN_MB_OFFSET_V,
    IN_NORMAL_STRENGTH,
    IN_OPACITY,
    IN_MASK,
];

pub const LAYER_OUTPUTS: [&str; 5] = [
    OUT_COLOR,
    OUT_METALNESS,
    OUT_ROUGHNESS,
    OUT_NORMAL,
    OUT_LAYER_MASK,
];

const WHITE: Rgba = [1.0, 1.0, 1.0, 1.0];
const BLACK: Rgba = [0.0, 0.0, 0.0, 1.0];

/// Per-layer values after override lookup and defaulting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerParams {
    pub color_scale: Rgba,
    pub mat_tile: f32,
    pub mb_tile: f32,
    pub microblend_normal_strength: f32,
    pub microblend_contrast: f32,
    pub microblend_offset_u: f32,
    pub microblend_offset_v: f32,
    pub normal_strength: f32,
    pub opacity: f32,
    pub rough_levels: Option<LevelsPair>,
    pub metal_levels: Option<LevelsPair>,
}

impl LayerParams {
    pub fn resolve(spec: &LayerSpec, table: &OverrideTable) -> Self {
        let color_scale = if spec.tints_color() {
            table.color_scale(spec.color_scale.as_deref())
        } else {
            None
        };
        if color_scale.is_none() && spec.tints_color() && spec.color_scale.is_some() {
            log::debug!(
                "colorScale '{}' not in override table, using white",
                spec.color_scale.as_deref().unwrap_or_default()
            );
        }
        Self {
            color_scale: color_scale.unwrap_or(WHITE),
            mat_tile: spec.mat_tile.unwrap_or(1.0),
            // The microblend follows the material tiling unless told otherwise.
            mb_tile: spec.mb_tile.or(spec.mat_tile).unwrap_or(1.0),
            microblend_normal_strength: spec.microblend_normal_strength.unwrap_or(1.0),
            microblend_contrast: spec.microblend_contrast.unwrap_or(1.0),
            microblend_offset_u: spec.microblend_offset_u.unwrap_or(0.0),
            microblend_offset_v: spec.microblend_offset_v.unwrap_or(0.0),
            normal_strength: table
                .normal_strength(spec.normal_strength.as_deref())
                .unwrap_or(1.0),
            opacity: spec.opacity.unwrap_or(1.0),
            rough_levels: table.rough_levels(spec.rough_levels_out.as_deref()),
            metal_levels: table.metal_levels(spec.metal_levels_out.as_deref()),
        }
    }

    /// Values for the layer group instance, keyed by input socket. `Mask` is
    /// left to the chain.
    pub fn instance_defaults(&self) -> Vec<(&'static str, SocketValue)> {
        vec![
            (IN_COLOR_SCALE, SocketValue::Color(self.color_scale)),
            (IN_MAT_TILE, SocketValue::Float(self.mat_tile)),
            (IN_MB_TILE, SocketValue::Float(self.mb_tile)),
            (
                IN_MB_NORMAL_STRENGTH,
                SocketValue::Float(self.microblend_normal_strength),
            ),
            (IN_MB_CONTRAST, SocketValue::Float(self.microblend_contrast)),
            (IN_MB_OFFSET_U, SocketValue::Float(self.microblend_offset_u)),
            (IN_MB_OFFSET_V, SocketValue::Float(self.microblend_offset_v)),
            (IN_NORMAL_STRENGTH, SocketValue::Float(self.normal_strength)),
            (IN_OPACITY, SocketValue::Float(self.opacity)),
        ]
    }
}

/// A synthesized layer group plus what it was built from.
#[derive(Debug, Clone)]
pub struct LayerGraph {
    pub tree: Rc<NodeTree>,
    pub base: Rc<NodeTree>,
    pub params: LayerParams,
    pub template_path: String,
    pub color_scale_key: Option<String>,
    pub microblend: Option<String>,
}

fn layer_interface(tree: &mut NodeTree) {
    let float = |name: &str, default: f32| {
        InterfaceSocket::new(name, SocketType::Float).with_default(SocketValue::Float(default))
    };
    tree.add_input(
        InterfaceSocket::new(IN_COLOR_SCALE, SocketType::Color)
            .with_default(SocketValue::Color(WHITE)),
    );
    tree.add_input(float(IN_MAT_TILE, 1.0));
    tree.add_input(float(IN_MB_TILE, 1.0));
    tree.add_input(float(IN_MB_NORMAL_STRENGTH, 1.0));
    tree.add_input(float(IN_MB_CONTRAST, 1.0).with_range(0.0, 1.0));
    tree.add_input(float(IN_MB_OFFSET_U, 0.0));
    tree.add_input(float(IN_MB_OFFSET_V, 0.0));
    // Base normal strength never inverts.
    tree.add_input(float(IN_NORMAL_STRENGTH, 1.0).with_range(0.0, 10.0));
    tree.add_input(float(IN_OPACITY, 1.0).with_range(0.0, 1.0));
    tree.add_input(float(IN_MASK, 0.0));

    tree.add_output(InterfaceSocket::new(OUT_COLOR, SocketType::Color));
    tree.add_output(InterfaceSocket::new(OUT_METALNESS, SocketType::Float));
    tree.add_output(InterfaceSocket::new(OUT_ROUGHNESS, SocketType::Float));
    tree.add_output(InterfaceSocket::new(OUT_NORMAL, SocketType::Vector));
    tree.add_output(InterfaceSocket::new(OUT_LAYER_MASK, SocketType::Float));
}

fn math(tree: &mut NodeTree, op: MathOp, clamp: bool, at: (f32, f32)) -> NodeId {
    tree.add_node(NodeKind::Math { op, clamp }, at)
}

fn vector_math(tree: &mut NodeTree, op: VectorOp, at: (f32, f32)) -> NodeId {
    tree.add_node(NodeKind::VectorMath { op }, at)
}

/// Ramp for the metalness channel: input 0 takes the pair's second level,
/// input 1 its first.
fn metal_ramp(levels: Option<LevelsPair>) -> Vec<RampStop> {
    let (low, high) = match levels {
        Some(pair) => (pair[1], pair[0]),
        None => (BLACK, WHITE),
    };
    vec![
        RampStop {
            position: 0.0,
            color: low,
        },
        RampStop {
            position: 1.0,
            color: high,
        },
    ]
}

struct MicroblendNodes {
    normal_offset: NodeId,
    layer_mask: NodeId,
}

/// Contrast-weighted mask composite and microblend normal perturbation.
/// Returns the node producing the perturbation vector and the final mask.
fn wire_microblend(
    tree: &mut NodeTree,
    group_in: NodeId,
    image: crate::node_graph::ImageBinding,
) -> MicroblendNodes {
    // Mask.
    let offset = tree.add_labeled(
        NodeKind::Math {
            op: MathOp::Add,
            clamp: false,
        },
        (-2000.0, -200.0),
        "Micro-offset",
    );
    tree.set_default(offset, "B", SocketValue::Float(CONTRAST_EPSILON));
    tree.link(group_in, IN_MB_CONTRAST, offset, "A");

    let inverted = math(tree, MathOp::Subtract, false, (-1200.0, -650.0));
    tree.set_default(inverted, "A", SocketValue::Float(1.0));
    tree.link(offset, "Value", inverted, "B");

    let contrast_scale = math(tree, MathOp::Multiply, false, (-1400.0, -700.0));
    tree.set_default(contrast_scale, "B", SocketValue::Float(MASK_CONTRAST_SCALE));
    tree.link(offset, "Value", contrast_scale, "A");

    let scaled_mask = math(tree, MathOp::Multiply, true, (-1200.0, -700.0));
    tree.link(group_in, IN_MASK, scaled_mask, "A");
    tree.link(contrast_scale, "Value", scaled_mask, "B");

    let coord = tree.add_node(NodeKind::TexCoord, (-2300.0, -500.0));
    let uv_offset = tree.add_node(NodeKind::CombineXyz, (-2300.0, -550.0));
    tree.link(group_in, IN_MB_OFFSET_U, uv_offset, "X");
    tree.link(group_in, IN_MB_OFFSET_V, uv_offset, "Y");
    let mapping = tree.add_node(NodeKind::Mapping, (-2300.0, -650.0));
    tree.link(coord, "UV", mapping, "Vector");
    tree.link(uv_offset, "Vector", mapping, "Location");
    tree.link(group_in, IN_MB_TILE, mapping, "Scale");
    let sample = tree.add_labeled(NodeKind::TexImage { image }, (-2300.0, -800.0), "Microblend");
    tree.link(mapping, "Vector", sample, "Vector");

    // Linear burn by hand: 1 - (1 - (mask + alpha)).
    let burn_add = math(tree, MathOp::Add, false, (-1600.0, -800.0));
    tree.link(group_in, IN_MASK, burn_add, "A");
    tree.link(sample, "Alpha", burn_add, "B");
    let burn_sub = math(tree, MathOp::Subtract, false, (-1400.0, -800.0));
    tree.set_default(burn_sub, "A", SocketValue::Float(1.0));
    tree.link(burn_add, "Value", burn_sub, "B");
    let burn_invert = tree.add_node(NodeKind::Invert, (-1200.0, -800.0));
    tree.set_default(burn_invert, "Fac", SocketValue::Float(1.0));
    tree.link(burn_sub, "Value", burn_invert, "Color");

    let mask_mix = tree.add_labeled(
        NodeKind::Mix {
            data_type: MixDataType::Rgba,
            clamp_factor: true,
            clamp_result: true,
        },
        (-900.0, -750.0),
        "Microblend Mixer",
    );
    tree.link(inverted, "Value", mask_mix, "Factor");
    tree.link(scaled_mask, "Value", mask_mix, "A");
    tree.link(burn_invert, "Color", mask_mix, "B");

    let opacity = tree.add_node(NodeKind::Reroute, (-1500.0, -750.0));
    tree.link(group_in, IN_OPACITY, opacity, "Input");

    // Lower contrast raises From Min, sharpening the mask edge.
    let mask_range = tree.add_node(
        NodeKind::MapRange {
            interpolation: Interpolation::Smootherstep,
            clamp: true,
        },
        (-600.0, -650.0),
    );
    tree.set_default(mask_range, "From Min", SocketValue::Float(0.0));
    tree.set_default(mask_range, "From Max", SocketValue::Float(1.0));
    tree.set_default(mask_range, "To Min", SocketValue::Float(0.0));
    tree.set_default(mask_range, "To Max", SocketValue::Float(1.0));
    tree.link(mask_mix, "Result", mask_range, "Value");
    tree.link(inverted, "Value", mask_range, "From Min");
    tree.link(opacity, "Output", mask_range, "To Max");

    // Normal.
    let flipped = tree.add_node(
        NodeKind::RgbCurve {
            curves: RgbCurves {
                red: CurveChannel::inverted(),
                green: CurveChannel::inverted(),
                ..RgbCurves::default()
            },
        },
        (-1700.0, -350.0),
    );
    tree.link(sample, "Color", flipped, "Color");

    let positive = math(tree, MathOp::GreaterThan, false, (-1400.0, -300.0));
    tree.set_default(positive, "B", SocketValue::Float(0.0));
    tree.link(group_in, IN_MB_NORMAL_STRENGTH, positive, "A");

    let oriented = tree.add_labeled(
        NodeKind::MixRgb {
            blend: BlendMode::Mix,
        },
        (-1400.0, -350.0),
        "MB+- Norm Mix",
    );
    tree.link(positive, "Value", oriented, "Fac");
    tree.link(flipped, "Color", oriented, "Color1");
    tree.link(sample, "Color", oriented, "Color2");

    let strength = math(tree, MathOp::Multiply, false, (-1600.0, -200.0));
    tree.link(group_in, IN_MB_NORMAL_STRENGTH, strength, "A");
    tree.link(offset, "Value", strength, "B");
    let strength_abs = math(tree, MathOp::Absolute, false, (-1400.0, -200.0));
    tree.link(strength, "Value", strength_abs, "A");
    let masked = math(tree, MathOp::Subtract, true, (-1200.0, -250.0));
    tree.link(strength_abs, "Value", masked, "A");
    tree.link(group_in, IN_MASK, masked, "B");

    let mb_normal = tree.add_node(NodeKind::NormalMap, (-750.0, -200.0));
    tree.link(masked, "Value", mb_normal, "Strength");
    tree.link(oriented, "Color", mb_normal, "Color");

    let geometry = tree.add_node(NodeKind::NewGeometry, (-550.0, -350.0));
    let perturbation = vector_math(tree, VectorOp::Subtract, (-550.0, -200.0));
    tree.link(mb_normal, "Normal", perturbation, "A");
    tree.link(geometry, "Normal", perturbation, "B");

    MicroblendNodes {
        normal_offset: perturbation,
        layer_mask: mask_range,
    }
}

/// Builds the group for one layer and registers it under `name`.
pub fn build_layer(
    ctx: &mut BuildContext,
    name: &str,
    spec: &LayerSpec,
    template: &MaterialTemplate,
    base: Rc<NodeTree>,
) -> LayerGraph {
    let params = LayerParams::resolve(spec, &template.overrides);

    let microblend_image = spec.microblend.as_deref().and_then(|mb| {
        let image = ctx.assets.texture(mb, ColorSpace::NonColor);
        if image.placeholder {
            log::warn!("{}: microblend {} not found, skipping it", name, mb);
            None
        } else {
            Some(image)
        }
    });

    let mut tree = NodeTree::new(name);
    tree.properties
        .insert("mlTemplate".to_string(), template.depot_path.clone());
    layer_interface(&mut tree);

    let group_in = tree.add_node(NodeKind::GroupInput, (-2600.0, 0.0));
    let group_out = tree.add_node(NodeKind::GroupOutput, (200.0, -100.0));
    let base_node = tree.add_node(
        NodeKind::Group {
            tree: base.name.clone(),
        },
        (-2000.0, 0.0),
    );
    tree.link(group_in, IN_MAT_TILE, base_node, TILE_MULTIPLIER);

    // Color.
    if spec.tints_color() {
        let tint = tree.add_node(
            NodeKind::MixRgb {
                blend: BlendMode::Overlay,
            },
            (-1400.0, 100.0),
        );
        tree.set_default(tint, "Fac", SocketValue::Float(1.0));
        tree.link(base_node, OUT_COLOR, tint, "Color1");
        tree.link(group_in, IN_COLOR_SCALE, tint, "Color2");
        tree.link(tint, "Color", group_out, OUT_COLOR);
    } else {
        tree.link(base_node, OUT_COLOR, group_out, OUT_COLOR);
    }

    // Roughness: input 0 maps to the pair's second level, 1 to its first.
    let rough = tree.add_labeled(
        NodeKind::MapRange {
            interpolation: Interpolation::Linear,
            clamp: true,
        },
        (-1400.0, 0.0),
        "Roughness Ramp",
    );
    let (to_min, to_max) = params
        .rough_levels
        .map(|pair| (pair[1][0], pair[0][0]))
        .unwrap_or((0.0, 1.0));
    tree.set_default(rough, "From Min", SocketValue::Float(0.0));
    tree.set_default(rough, "From Max", SocketValue::Float(1.0));
    tree.set_default(rough, "To Min", SocketValue::Float(to_min));
    tree.set_default(rough, "To Max", SocketValue::Float(to_max));
    tree.link(base_node, OUT_ROUGHNESS, rough, "Value");
    tree.link(rough, "Result", group_out, OUT_ROUGHNESS);

    let metal = tree.add_labeled(
        NodeKind::ColorRamp {
            stops: metal_ramp(params.metal_levels),
        },
        (-1400.0, 50.0),
        "Metal Ramp",
    );
    tree.link(base_node, OUT_METALNESS, metal, "Fac");
    tree.link(metal, "Color", group_out, OUT_METALNESS);

    // Normal.
    let base_normal = tree.add_labeled(NodeKind::NormalMap, (-1400.0, -100.0), "NormalStrength");
    tree.link(group_in, IN_NORMAL_STRENGTH, base_normal, "Strength");
    tree.link(base_node, OUT_NORMAL, base_normal, "Color");
    let normalize = vector_math(&mut tree, VectorOp::Normalize, (-350.0, -100.0));

    match microblend_image {
        Some(image) => {
            let mb = wire_microblend(&mut tree, group_in, image);
            let combine = vector_math(&mut tree, VectorOp::Add, (-550.0, -100.0));
            tree.link(base_normal, "Normal", combine, "A");
            tree.link(mb.normal_offset, "Vector", combine, "B");
            tree.link(combine, "Vector", normalize, "A");
            tree.link(mb.layer_mask, "Result", group_out, OUT_LAYER_MASK);
        }
        None => {
            tree.link(base_normal, "Normal", normalize, "A");
            let mask = tree.add_labeled(
                NodeKind::Math {
                    op: MathOp::Multiply,
                    clamp: true,
                },
                (-600.0, -650.0),
                "Layer Mask",
            );
            tree.link(group_in, IN_MASK, mask, "A");
            tree.link(group_in, IN_OPACITY, mask, "B");
            tree.link(mask, "Value", group_out, OUT_LAYER_MASK);
        }
    }
    tree.link(normalize, "Vector", group_out, OUT_NORMAL);

    let microblend = spec
        .microblend
        .clone()
        .filter(|_| tree.find_labeled("Microblend").is_some());
    let tree = ctx.library.insert(tree);
    LayerGraph {
        tree,
        base,
        params,
        template_path: template.depot_path.clone(),
        color_scale_key: spec.color_scale.clone(),
        microblend,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetResolver;
    use crate::base_layer::get_or_create_base;
    use crate::config::SynthesisConfig;
    use crate::node_graph::{Direction, GroupLibrary};
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;

    fn table() -> OverrideTable {
        let mut t = OverrideTable::default();
        t.color_scale.insert("red".into(), [1.0, 0.0, 0.0, 1.0]);
        t.normal_strength.insert("soft".into(), 0.25);
        t.rough_levels_out.insert(
            "glossy".into(),
            [[0.4, 0.4, 0.4, 1.0], [0.1, 0.1, 0.1, 1.0]],
        );
        t.metal_levels_out.insert(
            "metal".into(),
            [[1.0, 1.0, 1.0, 1.0], [0.6, 0.6, 0.6, 1.0]],
        );
        t
    }

    fn with_microblend() -> (tempfile::TempDir, AssetResolver) {
        let depot = tempdir().unwrap();
        fs::create_dir_all(depot.path().join("base/mb")).unwrap();
        fs::write(depot.path().join("base/mb/scratch.png"), b"x").unwrap();
        let mut cfg = SynthesisConfig::default();
        cfg.merge(None, Some(depot.path().to_path_buf()), None);
        let assets = AssetResolver::new(&cfg);
        (depot, assets)
    }

    fn build(assets: &AssetResolver, spec: &LayerSpec) -> (GroupLibrary, LayerGraph) {
        let mut template = MaterialTemplate::placeholder("base\\m\\paint.mltemplate");
        template.overrides = table();
        let mut library = GroupLibrary::new();
        let mut ctx = BuildContext {
            library: &mut library,
            assets,
        };
        let base = get_or_create_base(&mut ctx, &template);
        let layer = build_layer(&mut ctx, "car_Layer_0", spec, &template, base);
        (library, layer)
    }

    #[test]
    fn missing_selectors_fall_back_to_literals() {
        let spec = LayerSpec {
            color_scale: Some("not_there".into()),
            normal_strength: Some("nope".into()),
            ..LayerSpec::default()
        };
        let p = LayerParams::resolve(&spec, &table());
        assert_eq!(p.color_scale, [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(p.normal_strength, 1.0);
        assert_eq!(p.mat_tile, 1.0);
        assert_eq!(p.mb_tile, 1.0);
        assert_eq!(p.microblend_contrast, 1.0);
        assert_eq!(p.microblend_normal_strength, 1.0);
        assert_eq!(p.opacity, 1.0);
        assert_eq!(p.microblend_offset_u, 0.0);
        assert_eq!(p.microblend_offset_v, 0.0);
        assert!(p.rough_levels.is_none());
    }

    #[test]
    fn selectors_resolve_through_table() {
        let spec = LayerSpec {
            color_scale: Some("red".into()),
            normal_strength: Some("soft".into()),
            rough_levels_out: Some("glossy".into()),
            mat_tile: Some(3.0),
            ..LayerSpec::default()
        };
        let p = LayerParams::resolve(&spec, &table());
        assert_eq!(p.color_scale, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(p.normal_strength, 0.25);
        assert_eq!(p.mb_tile, 3.0);
        assert!(p.rough_levels.is_some());
        assert_eq!(p.instance_defaults().len(), 9);
    }

    #[test]
    fn interface_has_ten_inputs_and_five_outputs() {
        let (_depot, assets) = with_microblend();
        let spec = LayerSpec {
            microblend: Some("base\\mb\\scratch.xbm".into()),
            ..LayerSpec::default()
        };
        let (library, layer) = build(&assets, &spec);
        let tree = &layer.tree;
        tree.validate(&library).unwrap();
        let inputs: Vec<_> = tree.inputs.iter().map(|s| s.name.as_str()).collect();
        let outputs: Vec<_> = tree.outputs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(inputs, LAYER_INPUTS);
        assert_eq!(outputs, LAYER_OUTPUTS);

        let out_node = tree
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::GroupOutput)
            .unwrap();
        for socket in out_node
            .kind
            .sockets(Direction::In, tree, &library)
            .unwrap()
        {
            assert!(tree.link_into(out_node.id, &socket).is_some(), "{} unlinked", socket);
        }
        assert!(tree.find_labeled("Microblend").is_some());
        assert_eq!(layer.microblend.as_deref(), Some("base\\mb\\scratch.xbm"));
    }

    #[test]
    fn microblend_mask_chain_matches_reference_formula() {
        let (_depot, assets) = with_microblend();
        let spec = LayerSpec {
            microblend: Some("base\\mb\\scratch.xbm".into()),
            ..LayerSpec::default()
        };
        let (_library, layer) = build(&assets, &spec);
        let tree = &layer.tree;

        let offset = tree.find_labeled("Micro-offset").unwrap();
        assert_eq!(
            offset.defaults.get("B"),
            Some(&SocketValue::Float(CONTRAST_EPSILON))
        );
        let mixer = tree.find_labeled("Microblend Mixer").unwrap();
        assert_eq!(
            mixer.kind,
            NodeKind::Mix {
                data_type: MixDataType::Rgba,
                clamp_factor: true,
                clamp_result: true
            }
        );
        let range = tree
            .nodes
            .iter()
            .find(|n| {
                matches!(
                    n.kind,
                    NodeKind::MapRange {
                        interpolation: Interpolation::Smootherstep,
                        ..
                    }
                )
            })
            .unwrap();
        let from_min = tree.link_into(range.id, "From Min").unwrap();
        let factor = tree.link_into(mixer.id, "Factor").unwrap();
        assert_eq!(from_min.from, factor.from);
        assert!(tree.link_into(range.id, "To Max").is_some());
    }

    #[test]
    fn strength_sign_selects_flipped_sample() {
        let (_depot, assets) = with_microblend();
        let spec = LayerSpec {
            microblend: Some("base\\mb\\scratch.xbm".into()),
            microblend_normal_strength: Some(-0.5),
            ..LayerSpec::default()
        };
        let (_library, layer) = build(&assets, &spec);
        let tree = &layer.tree;
        let mix = tree.find_labeled("MB+- Norm Mix").unwrap();
        let gate = tree.link_into(mix.id, "Fac").unwrap().from.node;
        assert_eq!(
            tree.node(gate).unwrap().kind,
            NodeKind::Math {
                op: MathOp::GreaterThan,
                clamp: false
            }
        );
        let flipped = tree.link_into(mix.id, "Color1").unwrap().from.node;
        match &tree.node(flipped).unwrap().kind {
            NodeKind::RgbCurve { curves } => {
                let out = curves.evaluate([0.25, 0.5, 0.75]);
                assert_eq!(out, [0.75, 0.5, 0.75]);
            }
            other => panic!("expected curves, got {:?}", other),
        }
        assert!(tree.nodes.iter().any(|n| n.kind
            == NodeKind::Math {
                op: MathOp::Absolute,
                clamp: false
            }));
        assert_eq!(layer.params.microblend_normal_strength, -0.5);
    }

    #[test]
    fn null_microblend_passes_base_normal_through() {
        let assets = AssetResolver::new(&SynthesisConfig::default());
        let (library, layer) = build(&assets, &LayerSpec::default());
        let tree = &layer.tree;
        tree.validate(&library).unwrap();
        assert!(tree.find_labeled("Microblend").is_none());
        assert_eq!(tree.count_nodes(|k| matches!(k, NodeKind::NewGeometry)), 0);
        let normalize = tree
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::VectorMath { op: VectorOp::Normalize })
            .unwrap();
        let src = tree.link_into(normalize.id, "A").unwrap().from.node;
        assert_eq!(tree.node(src).unwrap().label.as_deref(), Some("NormalStrength"));
    }

    #[test]
    fn plain_mask_is_clamped_mask_times_opacity() {
        let assets = AssetResolver::new(&SynthesisConfig::default());
        let (library, layer) = build(&assets, &LayerSpec::default());
        let tree = &layer.tree;
        tree.validate(&library).unwrap();

        let mask = tree.find_labeled(OUT_LAYER_MASK).unwrap();
        assert_eq!(
            mask.kind,
            NodeKind::Math {
                op: MathOp::Multiply,
                clamp: true
            }
        );
        let group_in = tree
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::GroupInput)
            .unwrap()
            .id;
        let a = tree.link_into(mask.id, "A").unwrap();
        let b = tree.link_into(mask.id, "B").unwrap();
        assert_eq!(a.from, crate::node_graph::SocketRef::new(group_in, IN_MASK));
        assert_eq!(b.from, crate::node_graph::SocketRef::new(group_in, IN_OPACITY));

        let group_out = tree
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::GroupOutput)
            .unwrap()
            .id;
        let out = tree.link_into(group_out, OUT_LAYER_MASK).unwrap();
        assert_eq!(out.from.node, mask.id);
        assert_eq!(out.from.socket, "Value");
    }

    #[test]
    fn missing_microblend_file_takes_plain_path() {
        let assets = AssetResolver::new(&SynthesisConfig::default());
        let spec = LayerSpec {
            microblend: Some("base\\mb\\gone.xbm".into()),
            ..LayerSpec::default()
        };
        let (_library, layer) = build(&assets, &spec);
        assert!(layer.tree.find_labeled("Microblend").is_none());
        assert!(layer.microblend.is_none());
    }

    #[test]
    fn null_color_scale_skips_tint() {
        let assets = AssetResolver::new(&SynthesisConfig::default());
        let tinted = build(&assets, &LayerSpec::default()).1;
        let plain = build(
            &assets,
            &LayerSpec {
                color_scale: Some("null".into()),
                ..LayerSpec::default()
            },
        )
        .1;
        let overlay = |t: &NodeTree| {
            t.count_nodes(|k| {
                matches!(
                    k,
                    NodeKind::MixRgb {
                        blend: BlendMode::Overlay
                    }
                )
            })
        };
        assert_eq!(overlay(&tinted.tree), 1);
        assert_eq!(overlay(&plain.tree), 0);
    }

    #[test]
    fn levels_map_second_element_to_zero() {
        let assets = AssetResolver::new(&SynthesisConfig::default());
        let spec = LayerSpec {
            rough_levels_out: Some("glossy".into()),
            metal_levels_out: Some("metal".into()),
            ..LayerSpec::default()
        };
        let layer = build(&assets, &spec).1;
        let rough = layer.tree.find_labeled("Roughness Ramp").unwrap();
        let expected: BTreeMap<String, SocketValue> = [
            ("From Min", 0.0),
            ("From Max", 1.0),
            ("To Min", 0.1),
            ("To Max", 0.4),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), SocketValue::Float(v)))
        .collect();
        assert_eq!(rough.defaults, expected);

        match &layer.tree.find_labeled("Metal Ramp").unwrap().kind {
            NodeKind::ColorRamp { stops } => {
                assert_eq!(stops[0].color, [0.6, 0.6, 0.6, 1.0]);
                assert_eq!(stops[1].color, [1.0, 1.0, 1.0, 1.0]);
            }
            other => panic!("expected ramp, got {:?}", other),
        }
    }
}
