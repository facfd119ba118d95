use crate::assets::AssetResolver;
use crate::chain::{PRINCIPLED_BSDF, compose_chain, connect_surface};
use crate::config::SynthesisConfig;
use crate::documents::{MaterialTemplate, MultilayerSetup};
use crate::global_normal::apply_global_normal;
use crate::json_fields::is_null_path;
use crate::layer::LayerParams;
use crate::node_graph::{GroupLibrary, NodeKind, NodeTree};
use crate::version;
use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::rc::Rc;

/// What graph builders need while a material is being synthesized.
pub struct BuildContext<'a> {
    pub library: &'a mut GroupLibrary,
    pub assets: &'a AssetResolver,
}

/// One material to build, in the shape the mesh importer hands over.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MaterialRequest {
    #[serde(rename = "MultilayerSetup")]
    pub multilayer_setup: String,
    #[serde(rename = "MultilayerMask", default)]
    pub multilayer_mask: Option<String>,
    #[serde(rename = "GlobalNormal", default)]
    pub global_normal: Option<String>,
    #[serde(rename = "BakedNormal", default)]
    pub baked_normal: Option<String>,
    /// Material name; the setup's file stem when absent.
    #[serde(default)]
    pub name: Option<String>,
}

fn usable(path: &Option<String>) -> Option<&str> {
    path.as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty() && !is_null_path(p))
}

impl MaterialRequest {
    pub fn new(multilayer_setup: &str) -> Self {
        Self {
            multilayer_setup: multilayer_setup.to_string(),
            ..Self::default()
        }
    }

    /// Baked normals win over the global normal.
    pub fn normal_overlay(&self) -> Option<&str> {
        usable(&self.baked_normal).or_else(|| usable(&self.global_normal))
    }

    pub fn mask(&self) -> Option<&str> {
        usable(&self.multilayer_mask)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerReport {
    pub index: usize,
    pub node: String,
    pub group: String,
    pub base_group: String,
    pub template: String,
    pub color_scale: Option<String>,
    pub microblend: Option<String>,
    pub params: LayerParams,
}

/// Result of one synthesis: the material tree plus every group it uses.
#[derive(Debug, Clone, Serialize)]
pub struct MaterialGraph {
    pub generated_at: String,
    pub multilayer_setup: String,
    pub layer_count: usize,
    pub blend_stages: usize,
    pub layers: Vec<LayerReport>,
    pub material: NodeTree,
    pub groups: Vec<Rc<NodeTree>>,
}

pub fn new_material_tree(name: &str, multilayer_setup: &str) -> NodeTree {
    let mut tree = NodeTree::new(name);
    tree.properties
        .insert("MLSetup".to_string(), multilayer_setup.to_string());
    let bsdf = tree.add_node(NodeKind::PrincipledBsdf, (0.0, 0.0));
    tree.set_name(bsdf, PRINCIPLED_BSDF);
    let output = tree.add_node(NodeKind::MaterialOutput, (300.0, 0.0));
    tree.set_name(output, "Material Output");
    tree.link(bsdf, "BSDF", output, "Surface");
    tree
}

/// One import: the resolver and a group library shared by every material
/// synthesized through it.
pub struct SynthesisSession {
    config: SynthesisConfig,
    assets: AssetResolver,
    library: GroupLibrary,
}

impl SynthesisSession {
    pub fn new(config: SynthesisConfig) -> Self {
        let assets = AssetResolver::new(&config);
        Self {
            config,
            assets,
            library: GroupLibrary::new(),
        }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    pub fn library(&self) -> &GroupLibrary {
        &self.library
    }

    pub fn assets(&self) -> &AssetResolver {
        &self.assets
    }

    pub fn load_setup(&self, depot_path: &str) -> Result<MultilayerSetup> {
        let Some((found, doc)) = self.assets.load_json(depot_path)? else {
            bail!(
                "Multilayer setup {}.json not found under the project or depot root",
                depot_path
            );
        };
        log::debug!("loaded {} from {:?}", found.request_path, found.source);
        version::ensure_compatible(&doc, "mlsetup", depot_path)?;
        MultilayerSetup::from_doc(depot_path, &doc)
    }

    /// Missing templates degrade to placeholders; outdated ones are fatal.
    pub fn load_template(&self, depot_path: &str) -> Result<MaterialTemplate> {
        let Some((found, doc)) = self.assets.load_json(depot_path)? else {
            log::warn!("material template {} not found, using placeholders", depot_path);
            return Ok(MaterialTemplate::placeholder(depot_path));
        };
        log::debug!("loaded {} from {:?}", found.request_path, found.source);
        version::ensure_compatible(&doc, "mltemplate", depot_path)?;
        Ok(MaterialTemplate::from_doc(depot_path, &doc))
    }

    fn load_templates(&self, setup: &MultilayerSetup) -> Result<BTreeMap<String, MaterialTemplate>> {
        let mut templates = BTreeMap::new();
        for path in setup.layers.iter().filter_map(|l| l.material.as_deref()) {
            if templates.contains_key(path) {
                continue;
            }
            let template = self
                .load_template(path)
                .with_context(|| format!("While loading layers of {}", setup.depot_path))?;
            templates.insert(path.to_string(), template);
        }
        Ok(templates)
    }

    /// Builds the node graph for one multilayered material. Every document is
    /// loaded and version-checked before the group library is touched.
    pub fn synthesize(&mut self, request: &MaterialRequest) -> Result<MaterialGraph> {
        let setup = self.load_setup(&request.multilayer_setup)?;
        let templates = self.load_templates(&setup)?;

        let name = request.name.clone().unwrap_or_else(|| setup.stem());
        let mut material = new_material_tree(&name, &setup.depot_path);
        let mut ctx = BuildContext {
            library: &mut self.library,
            assets: &self.assets,
        };
        let chain = compose_chain(&mut ctx, &mut material, &setup, &templates, request.mask())?;
        let normal = apply_global_normal(
            &mut ctx,
            &mut material,
            chain.normal(),
            request.normal_overlay(),
        );
        connect_surface(&mut material, chain.terminal, &normal)?;

        material
            .validate(&self.library)
            .with_context(|| format!("Generated graph for {} is invalid", setup.depot_path))?;
        let groups = self.library.collect_used(&material);
        for group in &groups {
            group.validate(&self.library)?;
        }

        let layers = chain
            .layers
            .iter()
            .zip(&chain.layer_nodes)
            .enumerate()
            .map(|(index, (layer, &node))| LayerReport {
                index,
                node: material
                    .node(node)
                    .and_then(|n| n.name.clone())
                    .unwrap_or_default(),
                group: layer.tree.name.clone(),
                base_group: layer.base.name.clone(),
                template: layer.template_path.clone(),
                color_scale: layer.color_scale_key.clone(),
                microblend: layer.microblend.clone(),
                params: layer.params.clone(),
            })
            .collect();

        log::info!(
            "[ok] {}: {} layers, {} blend stages, {} groups",
            name,
            chain.layer_nodes.len(),
            chain.blend_nodes.len(),
            groups.len()
        );
        Ok(MaterialGraph {
            generated_at: Utc::now().to_rfc3339(),
            multilayer_setup: setup.depot_path.clone(),
            layer_count: chain.layer_nodes.len(),
            blend_stages: chain.blend_nodes.len(),
            layers,
            material,
            groups,
        })
    }
}
