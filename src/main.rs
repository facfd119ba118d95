use clap::Parser;
use mlsetup_graph::cli::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    mlsetup_graph::run(cli)
}
