use anyhow::{Result, bail};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::rc::Rc;

pub type NodeId = usize;
pub type Rgba = [f32; 4];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum SocketValue {
    Float(f32),
    Vector([f32; 3]),
    Color(Rgba),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketType {
    Float,
    Vector,
    Color,
}

#[derive(Debug, Clone, Serialize)]
pub struct InterfaceSocket {
    pub name: String,
    pub socket_type: SocketType,
    pub default: Option<SocketValue>,
    pub min: Option<f32>,
    pub max: Option<f32>,
}

impl InterfaceSocket {
    pub fn new(name: &str, socket_type: SocketType) -> Self {
        Self {
            name: name.to_string(),
            socket_type,
            default: None,
            min: None,
            max: None,
        }
    }

    pub fn with_default(mut self, value: SocketValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColorSpace {
    Srgb,
    NonColor,
}

/// An image datablock as the host would see it. Placeholders are 1x1 images
/// pointing at the expected depot location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageBinding {
    pub name: String,
    pub path: String,
    pub colorspace: ColorSpace,
    pub width: u32,
    pub height: u32,
    pub placeholder: bool,
}

/// Piecewise linear curve through sorted control points, clamped at the ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveChannel {
    pub points: Vec<(f32, f32)>,
}

impl CurveChannel {
    pub fn identity() -> Self {
        Self {
            points: vec![(0.0, 0.0), (1.0, 1.0)],
        }
    }

    pub fn inverted() -> Self {
        Self {
            points: vec![(0.0, 1.0), (1.0, 0.0)],
        }
    }

    pub fn constant(value: f32) -> Self {
        Self {
            points: vec![(0.0, value), (1.0, value)],
        }
    }

    pub fn evaluate(&self, x: f32) -> f32 {
        let Some(first) = self.points.first() else {
            return x;
        };
        if x <= first.0 {
            return first.1;
        }
        for pair in self.points.windows(2) {
            let (x0, y0) = pair[0];
            let (x1, y1) = pair[1];
            if x <= x1 {
                if (x1 - x0).abs() <= f32::EPSILON {
                    return y1;
                }
                return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
            }
        }
        self.points.last().map(|p| p.1).unwrap_or(x)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RgbCurves {
    pub combined: CurveChannel,
    pub red: CurveChannel,
    pub green: CurveChannel,
    pub blue: CurveChannel,
}

impl Default for RgbCurves {
    fn default() -> Self {
        Self {
            combined: CurveChannel::identity(),
            red: CurveChannel::identity(),
            green: CurveChannel::identity(),
            blue: CurveChannel::identity(),
        }
    }
}

impl RgbCurves {
    pub fn evaluate(&self, rgb: [f32; 3]) -> [f32; 3] {
        [
            self.combined.evaluate(self.red.evaluate(rgb[0])),
            self.combined.evaluate(self.green.evaluate(rgb[1])),
            self.combined.evaluate(self.blue.evaluate(rgb[2])),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RampStop {
    pub position: f32,
    pub color: Rgba,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MathOp {
    Add,
    Subtract,
    Multiply,
    GreaterThan,
    Absolute,
    Sqrt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VectorOp {
    Add,
    Subtract,
    Multiply,
    Normalize,
    DotProduct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlendMode {
    Mix,
    Overlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MixDataType {
    Float,
    Vector,
    Rgba,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Interpolation {
    Linear,
    Smootherstep,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum NodeKind {
    TexCoord,
    Mapping,
    TexImage { image: ImageBinding },
    Value { value: f32 },
    Math { op: MathOp, clamp: bool },
    VectorMath { op: VectorOp },
    MixRgb { blend: BlendMode },
    Mix {
        data_type: MixDataType,
        clamp_factor: bool,
        clamp_result: bool,
    },
    RgbCurve { curves: RgbCurves },
    NormalMap,
    MapRange { interpolation: Interpolation, clamp: bool },
    ColorRamp { stops: Vec<RampStop> },
    Invert,
    CombineXyz,
    SeparateRgb,
    CombineRgb,
    NewGeometry,
    Reroute,
    GroupInput,
    GroupOutput,
    Group { tree: String },
    PrincipledBsdf,
    MaterialOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn interface_names(sockets: &[InterfaceSocket]) -> Vec<String> {
    sockets.iter().map(|s| s.name.clone()).collect()
}

impl NodeKind {
    /// Socket names for one side of the node. Group-shaped nodes take their
    /// sockets from the owning tree or the referenced library tree; `None`
    /// means the referenced tree is unknown.
    pub fn sockets(
        &self,
        dir: Direction,
        owner: &NodeTree,
        library: &GroupLibrary,
    ) -> Option<Vec<String>> {
        use Direction::{In, Out};
        let out = match (self, dir) {
            (NodeKind::TexCoord, In) => Vec::new(),
            (NodeKind::TexCoord, Out) => names(&["Generated", "Normal", "UV"]),
            (NodeKind::Mapping, In) => names(&["Vector", "Location", "Rotation", "Scale"]),
            (NodeKind::Mapping, Out) => names(&["Vector"]),
            (NodeKind::TexImage { .. }, In) => names(&["Vector"]),
            (NodeKind::TexImage { .. }, Out) => names(&["Color", "Alpha"]),
            (NodeKind::Value { .. }, In) => Vec::new(),
            (NodeKind::Value { .. }, Out) => names(&["Value"]),
            (NodeKind::Math { .. }, In) => names(&["A", "B"]),
            (NodeKind::Math { .. }, Out) => names(&["Value"]),
            (NodeKind::VectorMath { .. }, In) => names(&["A", "B"]),
            (NodeKind::VectorMath { .. }, Out) => names(&["Vector", "Value"]),
            (NodeKind::MixRgb { .. }, In) => names(&["Fac", "Color1", "Color2"]),
            (NodeKind::MixRgb { .. }, Out) => names(&["Color"]),
            (NodeKind::Mix { .. }, In) => names(&["Factor", "A", "B"]),
            (NodeKind::Mix { .. }, Out) => names(&["Result"]),
            (NodeKind::RgbCurve { .. }, In) => names(&["Fac", "Color"]),
            (NodeKind::RgbCurve { .. }, Out) => names(&["Color"]),
            (NodeKind::NormalMap, In) => names(&["Strength", "Color"]),
            (NodeKind::NormalMap, Out) => names(&["Normal"]),
            (NodeKind::MapRange { .. }, In) => {
                names(&["Value", "From Min", "From Max", "To Min", "To Max"])
            }
            (NodeKind::MapRange { .. }, Out) => names(&["Result"]),
            (NodeKind::ColorRamp { .. }, In) => names(&["Fac"]),
            (NodeKind::ColorRamp { .. }, Out) => names(&["Color", "Alpha"]),
            (NodeKind::Invert, In) => names(&["Fac", "Color"]),
            (NodeKind::Invert, Out) => names(&["Color"]),
            (NodeKind::CombineXyz, In) => names(&["X", "Y", "Z"]),
            (NodeKind::CombineXyz, Out) => names(&["Vector"]),
            (NodeKind::SeparateRgb, In) => names(&["Image"]),
            (NodeKind::SeparateRgb, Out) => names(&["R", "G", "B"]),
            (NodeKind::CombineRgb, In) => names(&["R", "G", "B"]),
            (NodeKind::CombineRgb, Out) => names(&["Image"]),
            (NodeKind::NewGeometry, In) => Vec::new(),
            (NodeKind::NewGeometry, Out) => names(&["Position", "Normal"]),
            (NodeKind::Reroute, In) => names(&["Input"]),
            (NodeKind::Reroute, Out) => names(&["Output"]),
            (NodeKind::GroupInput, In) => Vec::new(),
            (NodeKind::GroupInput, Out) => interface_names(&owner.inputs),
            (NodeKind::GroupOutput, In) => interface_names(&owner.outputs),
            (NodeKind::GroupOutput, Out) => Vec::new(),
            (NodeKind::Group { tree }, In) => interface_names(&library.get(tree)?.inputs),
            (NodeKind::Group { tree }, Out) => interface_names(&library.get(tree)?.outputs),
            (NodeKind::PrincipledBsdf, In) => {
                names(&["Base Color", "Metallic", "Roughness", "Normal"])
            }
            (NodeKind::PrincipledBsdf, Out) => names(&["BSDF"]),
            (NodeKind::MaterialOutput, In) => names(&["Surface"]),
            (NodeKind::MaterialOutput, Out) => Vec::new(),
        };
        Some(out)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub id: NodeId,
    pub name: Option<String>,
    pub label: Option<String>,
    pub kind: NodeKind,
    pub location: (f32, f32),
    pub hidden: bool,
    pub defaults: BTreeMap<String, SocketValue>,
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SocketRef {
    pub node: NodeId,
    pub socket: String,
}

impl SocketRef {
    pub fn new(node: NodeId, socket: &str) -> Self {
        Self {
            node,
            socket: socket.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub from: SocketRef,
    pub to: SocketRef,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeTree {
    pub name: String,
    pub inputs: Vec<InterfaceSocket>,
    pub outputs: Vec<InterfaceSocket>,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
    pub properties: BTreeMap<String, String>,
}

impl NodeTree {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            nodes: Vec::new(),
            links: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn add_input(&mut self, socket: InterfaceSocket) {
        self.inputs.push(socket);
    }

    pub fn add_output(&mut self, socket: InterfaceSocket) {
        self.outputs.push(socket);
    }

    pub fn add_node(&mut self, kind: NodeKind, location: (f32, f32)) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            name: None,
            label: None,
            kind,
            location,
            hidden: true,
            defaults: BTreeMap::new(),
            properties: BTreeMap::new(),
        });
        id
    }

    pub fn add_labeled(&mut self, kind: NodeKind, location: (f32, f32), label: &str) -> NodeId {
        let id = self.add_node(kind, location);
        self.nodes[id].label = Some(label.to_string());
        id
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn set_name(&mut self, id: NodeId, name: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.name = Some(name.to_string());
        }
    }

    pub fn set_default(&mut self, id: NodeId, socket: &str, value: SocketValue) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.defaults.insert(socket.to_string(), value);
        }
    }

    pub fn link(&mut self, from: NodeId, from_socket: &str, to: NodeId, to_socket: &str) {
        self.link_ref(&SocketRef::new(from, from_socket), to, to_socket);
    }

    pub fn link_ref(&mut self, from: &SocketRef, to: NodeId, to_socket: &str) {
        // An input accepts one link; relinking replaces the previous source.
        self.links
            .retain(|l| !(l.to.node == to && l.to.socket == to_socket));
        self.links.push(Link {
            from: from.clone(),
            to: SocketRef::new(to, to_socket),
        });
    }

    pub fn find_named(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name.as_deref() == Some(name))
    }

    pub fn find_labeled(&self, label: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.label.as_deref() == Some(label))
    }

    pub fn link_into(&self, node: NodeId, socket: &str) -> Option<&Link> {
        self.links
            .iter()
            .find(|l| l.to.node == node && l.to.socket == socket)
    }

    pub fn links_from(&self, node: NodeId) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |l| l.from.node == node)
    }

    pub fn count_nodes(&self, pred: impl Fn(&NodeKind) -> bool) -> usize {
        self.nodes.iter().filter(|n| pred(&n.kind)).count()
    }

    pub fn group_instances<'a>(&'a self, tree_name: &'a str) -> impl Iterator<Item = &'a Node> {
        self.nodes.iter().filter(move |n| match &n.kind {
            NodeKind::Group { tree } => tree == tree_name,
            _ => false,
        })
    }

    /// Names of the library trees instanced directly by this tree.
    pub fn referenced_groups(&self) -> Vec<String> {
        let mut out = Vec::<String>::new();
        for node in &self.nodes {
            if let NodeKind::Group { tree } = &node.kind
                && !out.contains(tree)
            {
                out.push(tree.clone());
            }
        }
        out
    }

    pub fn topo_order(&self) -> Result<Vec<NodeId>> {
        let mut indeg: HashMap<NodeId, usize> = self.nodes.iter().map(|n| (n.id, 0)).collect();
        let mut outgoing: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for l in &self.links {
            if !indeg.contains_key(&l.from.node) || !indeg.contains_key(&l.to.node) {
                bail!(
                    "link references missing node in '{}': {} -> {}",
                    self.name,
                    l.from.node,
                    l.to.node
                );
            }
            if let Some(d) = indeg.get_mut(&l.to.node) {
                *d += 1;
            }
            outgoing.entry(l.from.node).or_default().push(l.to.node);
        }

        let mut q: VecDeque<NodeId> = self
            .nodes
            .iter()
            .filter(|n| indeg.get(&n.id) == Some(&0))
            .map(|n| n.id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(n) = q.pop_front() {
            order.push(n);
            if let Some(nexts) = outgoing.get(&n) {
                for m in nexts {
                    if let Some(d) = indeg.get_mut(m) {
                        *d -= 1;
                        if *d == 0 {
                            q.push_back(*m);
                        }
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            bail!("cycle detected in node tree '{}'", self.name);
        }
        Ok(order)
    }

    pub fn validate(&self, library: &GroupLibrary) -> Result<()> {
        for l in &self.links {
            let Some(from) = self.node(l.from.node) else {
                bail!("'{}': link from missing node {}", self.name, l.from.node);
            };
            let Some(to) = self.node(l.to.node) else {
                bail!("'{}': link to missing node {}", self.name, l.to.node);
            };
            let Some(outs) = from.kind.sockets(Direction::Out, self, library) else {
                bail!("'{}': node {} instances an unknown group", self.name, from.id);
            };
            if !outs.contains(&l.from.socket) {
                bail!(
                    "'{}': node {} has no output socket '{}'",
                    self.name,
                    from.id,
                    l.from.socket
                );
            }
            let Some(ins) = to.kind.sockets(Direction::In, self, library) else {
                bail!("'{}': node {} instances an unknown group", self.name, to.id);
            };
            if !ins.contains(&l.to.socket) {
                bail!(
                    "'{}': node {} has no input socket '{}'",
                    self.name,
                    to.id,
                    l.to.socket
                );
            }
        }

        for node in &self.nodes {
            let Some(ins) = node.kind.sockets(Direction::In, self, library) else {
                bail!("'{}': node {} instances an unknown group", self.name, node.id);
            };
            for key in node.defaults.keys() {
                if !ins.contains(key) {
                    bail!(
                        "'{}': default for unknown input '{}' on node {}",
                        self.name,
                        key,
                        node.id
                    );
                }
            }
        }

        let mut seen = HashSet::new();
        for l in &self.links {
            if !seen.insert(&l.to) {
                bail!(
                    "'{}': input '{}' on node {} has more than one link",
                    self.name,
                    l.to.socket,
                    l.to.node
                );
            }
        }

        self.topo_order().map(|_| ())
    }
}

/// Named node groups shared between materials of one import.
#[derive(Debug, Default)]
pub struct GroupLibrary {
    trees: BTreeMap<String, Rc<NodeTree>>,
}

impl GroupLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Rc<NodeTree>> {
        self.trees.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.trees.contains_key(name)
    }

    pub fn insert(&mut self, tree: NodeTree) -> Rc<NodeTree> {
        let tree = Rc::new(tree);
        self.trees.insert(tree.name.clone(), Rc::clone(&tree));
        tree
    }

    pub fn len(&self) -> usize {
        self.trees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trees.is_empty()
    }

    /// `base`, or the first free `base.NNN` variant.
    pub fn unique_name(&self, base: &str) -> String {
        if !self.contains(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{}.{:03}", base, i))
            .find(|candidate| !self.contains(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Trees reachable from `root` through group instances, in discovery order.
    pub fn collect_used(&self, root: &NodeTree) -> Vec<Rc<NodeTree>> {
        let mut out = Vec::<Rc<NodeTree>>::new();
        let mut stack = root.referenced_groups();
        stack.reverse();
        while let Some(name) = stack.pop() {
            if out.iter().any(|t| t.name == name) {
                continue;
            }
            let Some(tree) = self.get(&name) else {
                continue;
            };
            let mut nested = tree.referenced_groups();
            nested.reverse();
            stack.extend(nested);
            out.push(tree);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn math_tree() -> NodeTree {
        let mut tree = NodeTree::new("t");
        tree.add_input(InterfaceSocket::new("X", SocketType::Float));
        tree.add_output(InterfaceSocket::new("Y", SocketType::Float));
        let input = tree.add_node(NodeKind::GroupInput, (0.0, 0.0));
        let add = tree.add_node(
            NodeKind::Math {
                op: MathOp::Add,
                clamp: false,
            },
            (100.0, 0.0),
        );
        let output = tree.add_node(NodeKind::GroupOutput, (200.0, 0.0));
        tree.link(input, "X", add, "A");
        tree.set_default(add, "B", SocketValue::Float(1.0));
        tree.link(add, "Value", output, "Y");
        tree
    }

    #[test]
    fn valid_tree_passes() {
        let lib = GroupLibrary::new();
        let tree = math_tree();
        tree.validate(&lib).unwrap();
        assert_eq!(tree.topo_order().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn rejects_unknown_socket() {
        let lib = GroupLibrary::new();
        let mut tree = math_tree();
        tree.link(0, "X", 1, "C");
        assert!(tree.validate(&lib).is_err());
    }

    #[test]
    fn rejects_cycles() {
        let lib = GroupLibrary::new();
        let mut tree = NodeTree::new("cyc");
        let a = tree.add_node(NodeKind::Reroute, (0.0, 0.0));
        let b = tree.add_node(NodeKind::Reroute, (0.0, 0.0));
        tree.link(a, "Output", b, "Input");
        tree.link(b, "Output", a, "Input");
        let err = tree.validate(&lib).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn relinking_replaces_source() {
        let mut tree = math_tree();
        tree.link(0, "X", 1, "A");
        tree.link(0, "X", 1, "A");
        assert_eq!(tree.links.len(), 2);
    }

    #[test]
    fn group_instances_resolve_through_library() {
        let mut lib = GroupLibrary::new();
        lib.insert(math_tree());
        let mut outer = NodeTree::new("outer");
        let g = outer.add_node(NodeKind::Group { tree: "t".into() }, (0.0, 0.0));
        let v = outer.add_node(NodeKind::Value { value: 2.0 }, (0.0, 0.0));
        outer.link(v, "Value", g, "X");
        outer.validate(&lib).unwrap();
        assert_eq!(lib.collect_used(&outer).len(), 1);

        let mut broken = NodeTree::new("broken");
        broken.add_node(NodeKind::Group { tree: "missing".into() }, (0.0, 0.0));
        assert!(broken.validate(&lib).is_err());
    }

    #[test]
    fn unique_names_get_numeric_suffix() {
        let mut lib = GroupLibrary::new();
        assert_eq!(lib.unique_name("t"), "t");
        lib.insert(math_tree());
        assert_eq!(lib.unique_name("t"), "t.001");
    }

    #[test]
    fn curves_interpolate_and_clamp() {
        let c = CurveChannel::inverted();
        assert!((c.evaluate(0.25) - 0.75).abs() < 1e-6);
        assert_eq!(c.evaluate(-1.0), 1.0);
        assert_eq!(c.evaluate(2.0), 0.0);
        assert_eq!(CurveChannel::constant(1.0).evaluate(0.3), 1.0);
    }
}
