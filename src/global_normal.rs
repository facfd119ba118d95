use crate::blend_math::clamp01;
use crate::node_graph::{
    ColorSpace, CurveChannel, GroupLibrary, InterfaceSocket, Interpolation, MathOp, NodeKind,
    NodeTree, RgbCurves, SocketRef, SocketType, SocketValue, VectorOp,
};
use crate::session::BuildContext;
use std::rc::Rc;

pub const REBUILD_NORMAL_Z: &str = "Rebuild Normal Z";
const IMAGE: &str = "Image";

/// Slack added under the square root so a fully tilted XY still yields a
/// small positive Z.
pub const Z_REBUILD_BIAS: f32 = 1.02;

/// Blue channel the rebuild group writes for an encoded XY pair.
pub fn rebuild_z(r: f32, g: f32) -> f32 {
    let x = r * 2.0 - 1.0;
    let y = g * 2.0 - 1.0;
    let z = (Z_REBUILD_BIAS - (x * x + y * y)).max(0.0).sqrt();
    clamp01((z + 1.0) / 2.0)
}

/// Group that drops the stored blue channel, reconstructs it from red and
/// green, then flips green from DirectX to OpenGL.
pub fn get_or_create_rebuild_group(library: &mut GroupLibrary) -> Rc<NodeTree> {
    if let Some(existing) = library.get(REBUILD_NORMAL_Z) {
        return existing;
    }

    let mut tree = NodeTree::new(REBUILD_NORMAL_Z);
    tree.add_input(InterfaceSocket::new(IMAGE, SocketType::Color));
    tree.add_output(InterfaceSocket::new(IMAGE, SocketType::Color));

    let group_in = tree.add_node(NodeKind::GroupInput, (-1400.0, 0.0));
    let group_out = tree.add_node(NodeKind::GroupOutput, (200.0, 0.0));

    let scale = tree.add_node(
        NodeKind::VectorMath {
            op: VectorOp::Multiply,
        },
        (-1200.0, -200.0),
    );
    tree.set_default(scale, "B", SocketValue::Vector([2.0, 2.0, 0.0]));
    let center = tree.add_node(
        NodeKind::VectorMath {
            op: VectorOp::Subtract,
        },
        (-1000.0, -200.0),
    );
    tree.set_default(center, "B", SocketValue::Vector([1.0, 1.0, 0.0]));
    let dot = tree.add_node(
        NodeKind::VectorMath {
            op: VectorOp::DotProduct,
        },
        (-800.0, -200.0),
    );
    let remainder = tree.add_node(
        NodeKind::Math {
            op: MathOp::Subtract,
            clamp: false,
        },
        (-600.0, -200.0),
    );
    tree.set_default(remainder, "A", SocketValue::Float(Z_REBUILD_BIAS));
    let root = tree.add_node(
        NodeKind::Math {
            op: MathOp::Sqrt,
            clamp: false,
        },
        (-400.0, -200.0),
    );
    let range = tree.add_node(
        NodeKind::MapRange {
            interpolation: Interpolation::Linear,
            clamp: true,
        },
        (-200.0, -200.0),
    );
    tree.set_default(range, "From Min", SocketValue::Float(-1.0));
    tree.set_default(range, "From Max", SocketValue::Float(1.0));
    tree.set_default(range, "To Min", SocketValue::Float(0.0));
    tree.set_default(range, "To Max", SocketValue::Float(1.0));

    let split = tree.add_node(NodeKind::SeparateRgb, (-600.0, 0.0));
    let join = tree.add_node(NodeKind::CombineRgb, (-300.0, 0.0));
    let flip = tree.add_labeled(
        NodeKind::RgbCurve {
            curves: RgbCurves {
                green: CurveChannel::inverted(),
                ..RgbCurves::default()
            },
        },
        (-100.0, 0.0),
        "Convert DX to OpenGL Normal",
    );

    tree.link(group_in, IMAGE, scale, "A");
    tree.link(scale, "Vector", center, "A");
    tree.link(center, "Vector", dot, "A");
    tree.link(center, "Vector", dot, "B");
    tree.link(dot, "Value", remainder, "B");
    tree.link(remainder, "Value", root, "A");
    tree.link(root, "Value", range, "Value");
    tree.link(group_in, IMAGE, split, IMAGE);
    tree.link(split, "R", join, "R");
    tree.link(split, "G", join, "G");
    tree.link(range, "Result", join, "B");
    tree.link(join, IMAGE, flip, "Color");
    tree.link(flip, "Color", group_out, IMAGE);

    library.insert(tree)
}

/// Adds the perturbation carried by a material-wide normal map to the chain's
/// terminal normal and renormalizes. Without a texture the terminal normal
/// is returned unchanged and nothing is added to `material`.
pub fn apply_global_normal(
    ctx: &mut BuildContext,
    material: &mut NodeTree,
    terminal: SocketRef,
    texture: Option<&str>,
) -> SocketRef {
    let Some(texture) = texture else {
        return terminal;
    };
    log::debug!("applying global normal {}", texture);
    let rebuild = get_or_create_rebuild_group(ctx.library);

    let image = ctx.assets.texture(texture, ColorSpace::NonColor);
    let sample = material.add_labeled(NodeKind::TexImage { image }, (-1000.0, -550.0), "GlobalNormal");
    let rebuilt = material.add_labeled(
        NodeKind::Group {
            tree: rebuild.name.clone(),
        },
        (-750.0, -550.0),
        "GlobalNormal Rebuilt",
    );
    let decode = material.add_node(NodeKind::NormalMap, (-600.0, -550.0));
    let geometry = material.add_node(NodeKind::NewGeometry, (-800.0, -250.0));
    let perturbation = material.add_node(
        NodeKind::VectorMath {
            op: VectorOp::Subtract,
        },
        (-600.0, -250.0),
    );
    let sum = material.add_node(NodeKind::VectorMath { op: VectorOp::Add }, (-400.0, -250.0));
    let normalize = material.add_node(
        NodeKind::VectorMath {
            op: VectorOp::Normalize,
        },
        (-200.0, -250.0),
    );

    material.link(sample, "Color", rebuilt, IMAGE);
    material.link(rebuilt, IMAGE, decode, "Color");
    material.link(decode, "Normal", perturbation, "A");
    material.link(geometry, "Normal", perturbation, "B");
    material.link_ref(&terminal, sum, "A");
    material.link(perturbation, "Vector", sum, "B");
    material.link(sum, "Vector", normalize, "A");

    SocketRef::new(normalize, "Vector")
}
