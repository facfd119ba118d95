use crate::base_layer::{OUT_COLOR, OUT_METALNESS, OUT_NORMAL, OUT_ROUGHNESS, get_or_create_base};
use crate::documents::{MaterialTemplate, MultilayerSetup};
use crate::layer::{IN_MASK, LayerGraph, OUT_LAYER_MASK, build_layer};
use crate::node_graph::{
    GroupLibrary, InterfaceSocket, MixDataType, NodeId, NodeKind, NodeTree, SocketRef, SocketType,
    SocketValue,
};
use crate::session::BuildContext;
use anyhow::{Result, bail};
use std::collections::BTreeMap;
use std::rc::Rc;

pub const LAYER_BLEND: &str = "Layer_Blend";
pub const BLEND_MASK: &str = "Mask";
pub const PRINCIPLED_BSDF: &str = "Principled BSDF";

/// Layer and blend outputs share these names, so either can be the terminal.
pub const CHANNELS: [&str; 4] = [OUT_COLOR, OUT_METALNESS, OUT_ROUGHNESS, OUT_NORMAL];

/// Template used for layers whose material reference is missing or `null`.
const NULL_TEMPLATE: &str = "null";

fn lower(channel: &str) -> String {
    format!("{} A", channel)
}

fn upper(channel: &str) -> String {
    format!("{} B", channel)
}

/// The shared blend group: four independent mixes driven by one mask.
pub fn get_or_create_layer_blend(library: &mut GroupLibrary) -> Rc<NodeTree> {
    if let Some(existing) = library.get(LAYER_BLEND) {
        return existing;
    }

    let mut tree = NodeTree::new(LAYER_BLEND);
    let socket_type = |channel: &str| match channel {
        OUT_COLOR => SocketType::Color,
        OUT_NORMAL => SocketType::Vector,
        _ => SocketType::Float,
    };
    for name in [lower as fn(&str) -> String, upper] {
        for channel in CHANNELS {
            tree.add_input(InterfaceSocket::new(&name(channel), socket_type(channel)));
        }
    }
    tree.add_input(InterfaceSocket::new(BLEND_MASK, SocketType::Float));
    for channel in CHANNELS {
        tree.add_output(InterfaceSocket::new(channel, socket_type(channel)));
    }

    let group_in = tree.add_node(NodeKind::GroupInput, (-700.0, 0.0));
    let group_out = tree.add_node(NodeKind::GroupOutput, (200.0, 0.0));
    let mixes = [
        (OUT_COLOR, MixDataType::Rgba, true, "Color Mix"),
        (OUT_METALNESS, MixDataType::Float, true, "Metal Mix"),
        (OUT_ROUGHNESS, MixDataType::Float, true, "Rough Mix"),
        // Normals interpolate without clamping the factor.
        (OUT_NORMAL, MixDataType::Vector, false, "Normal Mix"),
    ];
    for (i, (channel, data_type, clamp_factor, label)) in mixes.into_iter().enumerate() {
        let mix = tree.add_labeled(
            NodeKind::Mix {
                data_type,
                clamp_factor,
                clamp_result: false,
            },
            (-300.0, 100.0 - 100.0 * i as f32),
            label,
        );
        tree.link(group_in, BLEND_MASK, mix, "Factor");
        tree.link(group_in, &lower(channel), mix, "A");
        tree.link(group_in, &upper(channel), mix, "B");
        tree.link(mix, "Result", group_out, channel);
    }

    library.insert(tree)
}

#[derive(Debug, Clone)]
pub struct ChainOutputs {
    /// Node whose four channel outputs feed the surface shader.
    pub terminal: NodeId,
    pub layer_nodes: Vec<NodeId>,
    pub blend_nodes: Vec<NodeId>,
    pub layers: Vec<LayerGraph>,
}

impl ChainOutputs {
    pub fn normal(&self) -> SocketRef {
        SocketRef::new(self.terminal, OUT_NORMAL)
    }
}

/// Builds every layer in document order and folds them bottom-up into
/// `material`. Layer `i` for `i >= 1` is blended over the stack below it
/// using its own `Layer Mask` output.
pub fn compose_chain(
    ctx: &mut BuildContext,
    material: &mut NodeTree,
    setup: &MultilayerSetup,
    templates: &BTreeMap<String, MaterialTemplate>,
    mlmask: Option<&str>,
) -> Result<ChainOutputs> {
    if setup.layers.is_empty() {
        bail!("{}: nothing to compose, setup has no layers", setup.depot_path);
    }
    let stem = setup.stem();
    let fallback = MaterialTemplate::placeholder(NULL_TEMPLATE);

    let mut layers = Vec::with_capacity(setup.layers.len());
    let mut layer_nodes = Vec::with_capacity(setup.layers.len());
    for (i, spec) in setup.layers.iter().enumerate() {
        let template = spec
            .material
            .as_deref()
            .and_then(|path| templates.get(path))
            .unwrap_or(&fallback);
        let base = get_or_create_base(ctx, template);
        let group_name = ctx.library.unique_name(&format!("{}_Layer_{}", stem, i));
        let layer = build_layer(ctx, &group_name, spec, template, base);

        let node = material.add_node(
            NodeKind::Group {
                tree: layer.tree.name.clone(),
            },
            (-2000.0, 500.0 - 100.0 * i as f32),
        );
        material.set_name(node, &format!("Mat_Mod_Layer_{}", i));
        for (socket, value) in layer.params.instance_defaults() {
            material.set_default(node, socket, value);
        }
        // Only upper layers get a mask image; the bottom layer's mask stays
        // at 0 so its microblend normal is not masked away.
        material.set_default(node, IN_MASK, SocketValue::Float(0.0));

        layers.push(layer);
        layer_nodes.push(node);
    }

    if layer_nodes.len() > 1 {
        get_or_create_layer_blend(ctx.library);
        if mlmask.is_none() {
            log::warn!(
                "{}: {} layers but no multilayer mask, upper layers stay hidden",
                setup.depot_path,
                layer_nodes.len()
            );
        }
    }

    let mut blend_nodes = Vec::with_capacity(layer_nodes.len().saturating_sub(1));
    for x in 0..layer_nodes.len().saturating_sub(1) {
        let below = if x == 0 {
            layer_nodes[0]
        } else {
            blend_nodes[x - 1]
        };
        let above = layer_nodes[x + 1];

        let blend = material.add_node(
            NodeKind::Group {
                tree: LAYER_BLEND.to_string(),
            },
            (-1400.0, 400.0 - 100.0 * x as f32),
        );
        material.set_name(blend, &format!("Layer_{}", x));
        for channel in CHANNELS {
            material.link(below, channel, blend, &lower(channel));
            material.link(above, channel, blend, &upper(channel));
        }

        if let Some(mlmask) = mlmask {
            let image = ctx.assets.layer_mask(mlmask, x + 1);
            let mask = material.add_labeled(
                NodeKind::TexImage { image },
                (-2400.0, 400.0 - 100.0 * x as f32),
                &format!("Layer_{}", x + 1),
            );
            material.link(mask, "Color", above, IN_MASK);
        }
        material.link(above, OUT_LAYER_MASK, blend, BLEND_MASK);
        blend_nodes.push(blend);
    }

    let terminal = blend_nodes.last().copied().unwrap_or(layer_nodes[0]);
    Ok(ChainOutputs {
        terminal,
        layer_nodes,
        blend_nodes,
        layers,
    })
}

/// Wires the terminal channels into the material's principled shader. The
/// normal comes in separately since it may have passed through the global
/// normal step.
pub fn connect_surface(
    material: &mut NodeTree,
    terminal: NodeId,
    normal: &SocketRef,
) -> Result<()> {
    let Some(bsdf) = material.find_named(PRINCIPLED_BSDF).map(|n| n.id) else {
        bail!("'{}' has no {} node", material.name, PRINCIPLED_BSDF);
    };
    material.link(terminal, OUT_COLOR, bsdf, "Base Color");
    material.link(terminal, OUT_METALNESS, bsdf, "Metallic");
    material.link(terminal, OUT_ROUGHNESS, bsdf, "Roughness");
    material.link_ref(normal, bsdf, "Normal");
    Ok(())
}
