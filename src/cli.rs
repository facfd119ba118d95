use crate::config::default_config_path;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputStyle {
    #[default]
    Pretty,
    Compact,
}

#[derive(Parser)]
#[command(name = "mlsetup-graph")]
#[command(about = "Builds shader node graphs from exported multilayered material setups")]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

/// Where documents and textures are looked up. Flags override the config
/// file and environment.
#[derive(Args, Debug, Clone)]
pub struct RootArgs {
    #[arg(long, default_value_os_t = default_config_path())]
    pub config: PathBuf,
    #[arg(long)]
    pub project_root: Option<PathBuf>,
    #[arg(long)]
    pub depot_root: Option<PathBuf>,
    #[arg(long)]
    pub image_format: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize the node graph for one `.mlsetup` and print it as JSON.
    Build {
        /// Depot path of the setup, e.g. `base\vehicles\car.mlsetup`.
        mlsetup: String,
        #[arg(long)]
        mlmask: Option<String>,
        #[arg(long)]
        global_normal: Option<String>,
        #[arg(long)]
        baked_normal: Option<String>,
        /// Material name; defaults to the setup's file name.
        #[arg(long)]
        name: Option<String>,
        /// Write the graph here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = OutputStyle::Pretty)]
        style: OutputStyle,
        #[command(flatten)]
        roots: RootArgs,
    },
    /// Check exported JSON files against the minimum exporter version.
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print the override table of a material template.
    Overrides {
        mltemplate: String,
        #[command(flatten)]
        roots: RootArgs,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration.
    Show {
        #[command(flatten)]
        roots: RootArgs,
    },
    /// Persist search roots and the texture format.
    Set {
        #[arg(long, default_value_os_t = default_config_path())]
        config: PathBuf,
        #[arg(long)]
        project_root: Option<PathBuf>,
        #[arg(long)]
        depot_root: Option<PathBuf>,
        #[arg(long)]
        image_format: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_flags_parse() {
        let cli = Cli::try_parse_from([
            "mlsetup-graph",
            "build",
            "base\\v\\car.mlsetup",
            "--mlmask",
            "base\\v\\car.mlmask",
            "--depot-root",
            "/depot",
            "--style",
            "compact",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Build {
                mlsetup,
                mlmask,
                roots,
                style,
                ..
            } => {
                assert_eq!(mlsetup, "base\\v\\car.mlsetup");
                assert_eq!(mlmask.as_deref(), Some("base\\v\\car.mlmask"));
                assert_eq!(roots.depot_root, Some(PathBuf::from("/depot")));
                assert!(matches!(style, OutputStyle::Compact));
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn validate_needs_files() {
        assert!(Cli::try_parse_from(["mlsetup-graph", "validate"]).is_err());
    }
}
