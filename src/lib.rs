use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::fs;
use std::path::Path;

pub mod assets;
pub mod base_layer;
pub mod blend_math;
pub mod chain;
pub mod cli;
pub mod config;
pub mod documents;
pub mod global_normal;
pub mod json_fields;
pub mod layer;
pub mod node_graph;
pub mod overrides;
pub mod session;
pub mod version;

use cli::{Cli, Commands, ConfigCommands, OutputStyle, RootArgs};
use config::{SynthesisConfig, load_config, save_config};
use session::{MaterialRequest, SynthesisSession};

/// Config file, then environment, then command-line flags.
pub fn resolve_config(roots: &RootArgs) -> Result<SynthesisConfig> {
    let mut cfg = load_config(&roots.config)?;
    cfg.apply_env();
    cfg.merge(
        roots.project_root.clone(),
        roots.depot_root.clone(),
        roots.image_format.clone(),
    );
    Ok(cfg)
}

fn to_json<T: Serialize>(value: &T, style: OutputStyle) -> Result<String> {
    Ok(match style {
        OutputStyle::Pretty => serde_json::to_string_pretty(value)?,
        OutputStyle::Compact => serde_json::to_string(value)?,
    })
}

fn validate_file(path: &Path) -> Result<bool> {
    let raw = fs::read(path).with_context(|| format!("Failed reading {}", path.display()))?;
    let doc: serde_json::Value = serde_json::from_slice(&raw)
        .with_context(|| format!("Invalid JSON in {}", path.display()))?;
    Ok(version::validate(&doc))
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Build {
            mlsetup,
            mlmask,
            global_normal,
            baked_normal,
            name,
            out,
            style,
            roots,
        } => {
            let cfg = resolve_config(&roots)?;
            if cfg.project_root.is_none() && cfg.depot_root.is_none() {
                bail!("No search roots configured; pass --depot-root or run `config set`");
            }
            let mut session = SynthesisSession::new(cfg);
            let request = MaterialRequest {
                multilayer_setup: mlsetup,
                multilayer_mask: mlmask,
                global_normal,
                baked_normal,
                name,
            };
            let graph = session.synthesize(&request)?;
            let text = to_json(&graph, style)?;
            match out {
                Some(path) => {
                    fs::write(&path, text)
                        .with_context(|| format!("Failed writing {}", path.display()))?;
                    log::info!("[ok] wrote {}", path.display());
                }
                None => println!("{}", text),
            }
            Ok(())
        }
        Commands::Validate { files } => {
            let mut failed = 0usize;
            for file in &files {
                let valid = validate_file(file)?;
                if !valid {
                    failed += 1;
                }
                let line = serde_json::json!({ "file": file, "valid": valid });
                println!("{}", serde_json::to_string(&line)?);
            }
            if failed > 0 {
                bail!(
                    "{} of {} files were written by an outdated exporter; regenerate them with WolvenKit 8.9.1 or higher",
                    failed,
                    files.len()
                );
            }
            Ok(())
        }
        Commands::Overrides { mltemplate, roots } => {
            let session = SynthesisSession::new(resolve_config(&roots)?);
            let template = session.load_template(&mltemplate)?;
            if template.placeholder {
                bail!("Material template {} not found", mltemplate);
            }
            println!("{}", serde_json::to_string_pretty(&template.overrides)?);
            Ok(())
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show { roots } => {
                let cfg = resolve_config(&roots)?;
                println!("{}", serde_json::to_string_pretty(&cfg)?);
                Ok(())
            }
            ConfigCommands::Set {
                config,
                project_root,
                depot_root,
                image_format,
            } => {
                let mut cfg = load_config(&config)?;
                cfg.merge(project_root, depot_root, image_format);
                save_config(&config, &cfg)?;
                log::info!("[ok] saved {}", config.display());
                println!("{}", serde_json::to_string_pretty(&cfg)?);
                Ok(())
            }
        },
    }
}
