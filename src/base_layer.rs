use crate::assets::short_name;
use crate::documents::MaterialTemplate;
use crate::node_graph::{
    ColorSpace, CurveChannel, InterfaceSocket, NodeKind, NodeTree, RgbCurves, SocketType,
    SocketValue, VectorOp,
};
use crate::session::BuildContext;
use std::rc::Rc;

pub const TILE_MULTIPLIER: &str = "Tile Multiplier";
pub const OUT_COLOR: &str = "Color";
pub const OUT_METALNESS: &str = "Metalness";
pub const OUT_ROUGHNESS: &str = "Roughness";
pub const OUT_NORMAL: &str = "Normal";

/// Game normal maps use the DirectX green convention: keep R, flip G and
/// force B to 1 so the host's normal-map decode rebuilds Z.
pub fn dx_to_gl_curves() -> RgbCurves {
    RgbCurves {
        green: CurveChannel::inverted(),
        blue: CurveChannel::constant(1.0),
        ..RgbCurves::default()
    }
}

/// Name a template's base group is registered under.
pub fn base_graph_name(template: &MaterialTemplate) -> String {
    let name = short_name(&template.depot_path);
    if name.is_empty() {
        "missing_template".to_string()
    } else {
        name
    }
}

fn channel_image(
    ctx: &BuildContext,
    path: Option<&str>,
    colorspace: ColorSpace,
    fallback_name: String,
) -> NodeKind {
    let image = match path {
        Some(p) => ctx.assets.texture(p, colorspace),
        None => ctx.assets.placeholder(&fallback_name, colorspace),
    };
    NodeKind::TexImage { image }
}

/// Returns the base group for `template`, building and registering it the
/// first time its name is seen in this session.
pub fn get_or_create_base(ctx: &mut BuildContext, template: &MaterialTemplate) -> Rc<NodeTree> {
    let name = base_graph_name(template);
    if let Some(existing) = ctx.library.get(&name) {
        return existing;
    }
    log::debug!("building base material group '{}'", name);

    let mut tree = NodeTree::new(&name);
    tree.properties
        .insert("mlTemplate".to_string(), template.depot_path.clone());
    tree.add_input(
        InterfaceSocket::new(TILE_MULTIPLIER, SocketType::Vector)
            .with_default(SocketValue::Vector([1.0, 1.0, 1.0])),
    );
    tree.add_output(InterfaceSocket::new(OUT_COLOR, SocketType::Color));
    tree.add_output(InterfaceSocket::new(OUT_METALNESS, SocketType::Float));
    tree.add_output(InterfaceSocket::new(OUT_ROUGHNESS, SocketType::Float));
    tree.add_output(InterfaceSocket::new(OUT_NORMAL, SocketType::Color));

    // Only the colour map is sRGB; the rest are data.
    let color = tree.add_node(
        channel_image(
            ctx,
            template.color_texture.as_deref(),
            ColorSpace::Srgb,
            format!("{}_color", name),
        ),
        (0.0, 0.0),
    );
    let metal = tree.add_node(
        channel_image(
            ctx,
            template.metalness_texture.as_deref(),
            ColorSpace::NonColor,
            format!("{}_metalness", name),
        ),
        (0.0, -50.0),
    );
    let rough = tree.add_node(
        channel_image(
            ctx,
            template.roughness_texture.as_deref(),
            ColorSpace::NonColor,
            format!("{}_roughness", name),
        ),
        (0.0, -100.0),
    );
    let normal = tree.add_node(
        channel_image(
            ctx,
            template.normal_texture.as_deref(),
            ColorSpace::NonColor,
            format!("{}_normal", name),
        ),
        (0.0, -150.0),
    );

    let mapping = tree.add_node(NodeKind::Mapping, (-310.0, -64.0));
    let tex_coord = tree.add_node(NodeKind::TexCoord, (-500.0, -64.0));
    let tile = tree.add_node(
        NodeKind::Value {
            value: template.tiling_multiplier,
        },
        (-700.0, -90.0),
    );
    let group_in = tree.add_node(NodeKind::GroupInput, (-700.0, -180.0));
    let scale = tree.add_node(
        NodeKind::VectorMath {
            op: VectorOp::Multiply,
        },
        (-500.0, -135.0),
    );
    let flip = tree.add_labeled(
        NodeKind::RgbCurve {
            curves: dx_to_gl_curves(),
        },
        (400.0, -150.0),
        "Convert DX to OpenGL Normal",
    );
    let group_out = tree.add_node(NodeKind::GroupOutput, (700.0, 0.0));

    tree.link(tex_coord, "UV", mapping, "Vector");
    tree.link(scale, "Vector", mapping, "Scale");
    for tex in [color, normal, rough, metal] {
        tree.link(mapping, "Vector", tex, "Vector");
    }
    tree.link(tile, "Value", scale, "A");
    tree.link(group_in, TILE_MULTIPLIER, scale, "B");
    tree.link(color, "Color", group_out, OUT_COLOR);
    tree.link(metal, "Color", group_out, OUT_METALNESS);
    tree.link(rough, "Color", group_out, OUT_ROUGHNESS);
    tree.link(normal, "Color", flip, "Color");
    tree.link(flip, "Color", group_out, OUT_NORMAL);

    ctx.library.insert(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetResolver;
    use crate::config::SynthesisConfig;
    use crate::node_graph::GroupLibrary;

    fn template(path: &str) -> MaterialTemplate {
        let mut t = MaterialTemplate::placeholder(path);
        t.color_texture = Some("base\\t\\c.xbm".to_string());
        t.normal_texture = Some("base\\t\\n.xbm".to_string());
        t.tiling_multiplier = 4.0;
        t.placeholder = false;
        t
    }

    #[test]
    fn builds_four_samples_sharing_one_mapping() {
        let assets = AssetResolver::new(&SynthesisConfig::default());
        let mut library = GroupLibrary::new();
        let mut ctx = BuildContext {
            library: &mut library,
            assets: &assets,
        };
        let base = get_or_create_base(&mut ctx, &template("base\\m\\steel.mltemplate"));
        assert_eq!(base.name, "steel");
        base.validate(&library).unwrap();

        let images: Vec<_> = base
            .nodes
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::TexImage { image } => Some(image),
                _ => None,
            })
            .collect();
        assert_eq!(images.len(), 4);
        assert_eq!(images[0].colorspace, ColorSpace::Srgb);
        assert!(images[1..].iter().all(|i| i.colorspace == ColorSpace::NonColor));
        assert!(images.iter().all(|i| i.placeholder));

        let mapping = base
            .nodes
            .iter()
            .find(|n| n.kind == NodeKind::Mapping)
            .unwrap()
            .id;
        assert_eq!(base.links_from(mapping).count(), 4);
        assert!(base.nodes.iter().any(|n| n.kind == NodeKind::Value { value: 4.0 }));
        assert_eq!(
            base.properties.get("mlTemplate").map(String::as_str),
            Some("base\\m\\steel.mltemplate")
        );
    }

    #[test]
    fn reuses_groups_by_name() {
        let assets = AssetResolver::new(&SynthesisConfig::default());
        let mut library = GroupLibrary::new();
        let mut ctx = BuildContext {
            library: &mut library,
            assets: &assets,
        };
        let a = get_or_create_base(&mut ctx, &template("base\\m\\steel.mltemplate"));
        let b = get_or_create_base(&mut ctx, &template("base\\m\\steel.mltemplate"));
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(library.len(), 1);
    }

    #[test]
    fn dx_flip_inverts_green_only() {
        let out = dx_to_gl_curves().evaluate([0.2, 0.3, 0.4]);
        assert!((out[0] - 0.2).abs() < 1e-6);
        assert!((out[1] - 0.7).abs() < 1e-6);
        assert_eq!(out[2], 1.0);
    }
}
