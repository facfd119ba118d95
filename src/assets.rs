use crate::config::SynthesisConfig;
use crate::node_graph::{ColorSpace, ImageBinding};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Layer masks are always exported as PNG next to the `.mlmask`.
const MASK_FORMAT: &str = "png";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetSourceKind {
    Project,
    Depot,
}

#[derive(Debug, Clone)]
pub struct ResolvedFile {
    pub request_path: String,
    pub path: PathBuf,
    pub source: AssetSourceKind,
}

#[derive(Debug, Clone)]
pub struct AssetResolver {
    project_root: Option<PathBuf>,
    depot_root: Option<PathBuf>,
    image_format: String,
}

pub fn normalize_rel_path(path: &str) -> Option<String> {
    let raw = path.trim().replace('\\', "/");
    if raw.is_empty() {
        return None;
    }

    let mut out = PathBuf::new();
    for comp in Path::new(&raw).components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            Component::Normal(v) => out.push(v),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let s = out.to_string_lossy().replace('\\', "/");
    if s.is_empty() { None } else { Some(s) }
}

/// Swaps the last extension of the file part (`a/b.xbm` -> `a/b.png`).
pub fn with_extension(rel: &str, ext: &str) -> String {
    let (dir, file) = match rel.rsplit_once('/') {
        Some((d, f)) => (Some(d), f),
        None => (None, rel),
    };
    let stem = file.rsplit_once('.').map(|(s, _)| s).unwrap_or(file);
    match dir {
        Some(d) => format!("{}/{}.{}", d, stem, ext),
        None => format!("{}.{}", stem, ext),
    }
}

/// File name up to its first dot; used as the name of images and base
/// material groups.
pub fn short_name(depot_path: &str) -> String {
    let unified = depot_path.replace('\\', "/");
    let file = unified.rsplit('/').next().unwrap_or_default();
    file.split('.').next().unwrap_or_default().to_string()
}

fn display_path(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

impl AssetResolver {
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            project_root: config.project_root.clone(),
            depot_root: config.depot_root.clone(),
            image_format: config.image_format.clone(),
        }
    }

    pub fn image_format(&self) -> &str {
        &self.image_format
    }

    fn roots(&self) -> Vec<(AssetSourceKind, &Path)> {
        let mut out = Vec::new();
        if let Some(p) = &self.project_root {
            out.push((AssetSourceKind::Project, p.as_path()));
        }
        if let Some(p) = &self.depot_root {
            out.push((AssetSourceKind::Depot, p.as_path()));
        }
        out
    }

    /// Where a missing file would have been expected.
    fn expected_path(&self, rel: &str) -> PathBuf {
        match &self.depot_root {
            Some(root) => root.join(rel),
            None => PathBuf::from(rel),
        }
    }

    /// Project root first, then the depot root.
    pub fn resolve(&self, request_path: &str) -> Option<ResolvedFile> {
        let rel = normalize_rel_path(request_path)?;
        for (source, root) in self.roots() {
            let candidate = root.join(&rel);
            if candidate.is_file() {
                return Some(ResolvedFile {
                    request_path: rel,
                    path: candidate,
                    source,
                });
            }
        }
        None
    }

    /// Loads `<depot_path>.json`. A missing file is `Ok(None)`; a file that
    /// exists but does not parse is an error.
    pub fn load_json(&self, depot_path: &str) -> Result<Option<(ResolvedFile, Value)>> {
        let Some(found) = self.resolve(&format!("{}.json", depot_path.trim())) else {
            return Ok(None);
        };
        let raw = fs::read(&found.path)
            .with_context(|| format!("Failed reading {}", found.path.display()))?;
        let doc: Value = serde_json::from_slice(&raw)
            .with_context(|| format!("Invalid JSON in {}", found.path.display()))?;
        Ok(Some((found, doc)))
    }

    fn bind(
        &self,
        name: String,
        found: Option<PathBuf>,
        expected: PathBuf,
        colorspace: ColorSpace,
    ) -> ImageBinding {
        match found {
            Some(path) => {
                let (width, height) = image::image_dimensions(&path).unwrap_or_else(|e| {
                    log::debug!("could not probe {}: {}", path.display(), e);
                    (1, 1)
                });
                ImageBinding {
                    name,
                    path: display_path(&path),
                    colorspace,
                    width,
                    height,
                    placeholder: false,
                }
            }
            None => {
                log::warn!("missing texture {}, using a blank placeholder", expected.display());
                ImageBinding {
                    name,
                    path: display_path(&expected),
                    colorspace,
                    width: 1,
                    height: 1,
                    placeholder: true,
                }
            }
        }
    }

    /// Blank binding for a channel whose template names no texture at all.
    pub fn placeholder(&self, name: &str, colorspace: ColorSpace) -> ImageBinding {
        ImageBinding {
            name: name.to_string(),
            path: String::new(),
            colorspace,
            width: 1,
            height: 1,
            placeholder: true,
        }
    }

    /// Texture for a depot path, with the extension swapped for the
    /// configured raster format. Missing files give a 1x1 placeholder.
    pub fn texture(&self, depot_path: &str, colorspace: ColorSpace) -> ImageBinding {
        let name = short_name(depot_path);
        let Some(rel) = normalize_rel_path(depot_path) else {
            return self.bind(name, None, PathBuf::from(depot_path), colorspace);
        };
        let rel = with_extension(&rel, &self.image_format);
        let found = self.resolve(&rel).map(|f| f.path);
        self.bind(name, found, self.expected_path(&rel), colorspace)
    }

    /// Mask image for layer `index` of a multilayer mask. Project exports
    /// keep them in a `<name>_layers` folder; the depot keeps them alongside.
    pub fn layer_mask(&self, mlmask: &str, index: usize) -> ImageBinding {
        let name = short_name(mlmask);
        let label = format!("{}_{}", name, index);
        let rel = normalize_rel_path(mlmask).unwrap_or_default();
        let dir = rel.rsplit_once('/').map(|(d, _)| d).unwrap_or_default();
        let join = |parts: &[&str]| {
            parts
                .iter()
                .filter(|p| !p.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join("/")
        };
        let file = format!("{}.{}", label, MASK_FORMAT);
        let layers_dir = format!("{}_layers", name);
        let project_rel = join(&[dir, layers_dir.as_str(), file.as_str()]);
        let depot_rel = join(&[dir, file.as_str()]);

        let in_project = self
            .project_root
            .as_ref()
            .map(|root| root.join(&project_rel))
            .filter(|p| p.is_file());
        let in_depot = self
            .depot_root
            .as_ref()
            .map(|root| root.join(&depot_rel))
            .filter(|p| p.is_file());

        self.bind(
            label,
            in_project.or(in_depot),
            self.expected_path(&depot_rel),
            ColorSpace::NonColor,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn resolver(project: &Path, depot: &Path) -> AssetResolver {
        let mut cfg = SynthesisConfig::default();
        cfg.merge(Some(project.to_path_buf()), Some(depot.to_path_buf()), None);
        AssetResolver::new(&cfg)
    }

    #[test]
    fn normalize_path_works() {
        assert_eq!(normalize_rel_path("./a/b/../c.json").as_deref(), Some("a/c.json"));
        assert_eq!(
            normalize_rel_path("base\\materials\\x.xbm").as_deref(),
            Some("base/materials/x.xbm")
        );
        assert!(normalize_rel_path("  ").is_none());
    }

    #[test]
    fn extension_substitution() {
        assert_eq!(with_extension("base/a/tex.xbm", "png"), "base/a/tex.png");
        assert_eq!(with_extension("tex", "png"), "tex.png");
        assert_eq!(short_name("base\\a\\metal_01.mltemplate"), "metal_01");
    }

    #[test]
    fn project_root_wins_over_depot() {
        let proj = tempdir().unwrap();
        let depot = tempdir().unwrap();
        for root in [proj.path(), depot.path()] {
            fs::create_dir_all(root.join("base/m")).unwrap();
            fs::write(root.join("base/m/a.mltemplate.json"), "{}").unwrap();
        }
        let r = resolver(proj.path(), depot.path());
        let (found, _) = r.load_json("base\\m\\a.mltemplate").unwrap().unwrap();
        assert_eq!(found.source, AssetSourceKind::Project);

        fs::remove_file(proj.path().join("base/m/a.mltemplate.json")).unwrap();
        let (found, _) = r.load_json("base\\m\\a.mltemplate").unwrap().unwrap();
        assert_eq!(found.source, AssetSourceKind::Depot);

        assert!(r.load_json("base\\m\\missing.mltemplate").unwrap().is_none());
    }

    #[test]
    fn corrupt_json_is_an_error() {
        let proj = tempdir().unwrap();
        let depot = tempdir().unwrap();
        fs::write(depot.path().join("bad.mlsetup.json"), "{ nope").unwrap();
        let r = resolver(proj.path(), depot.path());
        assert!(r.load_json("bad.mlsetup").is_err());
    }

    #[test]
    fn textures_probe_size_or_fall_back_to_placeholder() {
        let proj = tempdir().unwrap();
        let depot = tempdir().unwrap();
        fs::create_dir_all(depot.path().join("base/t")).unwrap();
        image::RgbaImage::new(4, 2)
            .save(depot.path().join("base/t/color.png"))
            .unwrap();
        let r = resolver(proj.path(), depot.path());

        let found = r.texture("base\\t\\color.xbm", ColorSpace::Srgb);
        assert!(!found.placeholder);
        assert_eq!((found.width, found.height), (4, 2));
        assert_eq!(found.name, "color");

        let missing = r.texture("base\\t\\normal.xbm", ColorSpace::NonColor);
        assert!(missing.placeholder);
        assert_eq!((missing.width, missing.height), (1, 1));
        assert!(missing.path.ends_with("base/t/normal.png"));
    }

    #[test]
    fn layer_masks_prefer_project_layers_folder() {
        let proj = tempdir().unwrap();
        let depot = tempdir().unwrap();
        fs::create_dir_all(proj.path().join("base/v/car_layers")).unwrap();
        fs::create_dir_all(depot.path().join("base/v")).unwrap();
        fs::write(proj.path().join("base/v/car_layers/car_1.png"), b"x").unwrap();
        fs::write(depot.path().join("base/v/car_1.png"), b"x").unwrap();
        fs::write(depot.path().join("base/v/car_2.png"), b"x").unwrap();
        let r = resolver(proj.path(), depot.path());

        let one = r.layer_mask("base\\v\\car.mlmask", 1);
        assert!(one.path.contains("car_layers"));
        assert_eq!(one.colorspace, ColorSpace::NonColor);
        let two = r.layer_mask("base\\v\\car.mlmask", 2);
        assert!(!two.placeholder);
        assert!(!two.path.contains("car_layers"));
        assert!(r.layer_mask("base\\v\\car.mlmask", 3).placeholder);
    }
}
