#![forbid(unsafe_code)]

mod config;
mod env;
mod error;
mod extract;
mod fetch;
mod generate;
mod index;
mod mirror;
mod net;
mod prelude;
mod select;
mod server;
mod util;
mod vocab;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::mirror::{MirrorOptions, Mirrorer};
use crate::prelude::*;
use crate::select::SelectOptions;

#[derive(Parser)]
#[command(name = "depot", version, about = "PyPI mirror for restricted environments")]
struct Cli {
    /// Path to the package index
    #[arg(short = 'i', long, default_value = ".", global = true)]
    index_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the configured requirements and their dependency closure
    Mirror {
        /// Base URL of the Python package index
        #[arg(short = 'I', long, default_value = "https://pypi.org/simple/")]
        index_url: String,

        /// Config file (default: <INDEX_PATH>/depot.ini)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Do not install the server binary into the mirror afterwards
        #[arg(long)]
        skip_server_copy: bool,

        /// For top-level requirements, mirror every release matching the
        /// specifiers instead of only the latest
        #[arg(short = 'a', long)]
        mirror_all_versions: bool,

        /// Download every compatible wheel for each release instead of
        /// the best one per environment
        #[arg(short = 'W', long)]
        mirror_all_wheels: bool,

        /// Regular expression selecting which package file types to mirror
        #[arg(long, default_value = r"(whl|zip|tar\.gz)")]
        package_type_regex: String,
    },
    /// Install the server binary into the mirror root
    #[command(alias = "copy_server")]
    CopyServer,
    /// Print a template environment block
    #[command(alias = "generate_env")]
    GenerateEnv {
        /// Name of the environment to configure
        #[arg(short, long, default_value = "local")]
        env: String,
    },
    /// Print a [requirements] block for an installed site-packages tree
    #[command(alias = "generate_reqs")]
    GenerateReqs {
        /// Versioning mode for the generated requirements
        #[arg(short, long, default_value = ">=", value_parser = [">=", "==", "<="])]
        mode: String,

        /// site-packages directory to scan
        #[arg(long)]
        site_packages: PathBuf,
    },
    /// Serve the mirror over HTTP
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,

        /// Do not advertise metadata sidecars
        #[arg(long)]
        no_metadata: bool,
    },
    /// Print version information
    Version,
}

/// Normalize the index URL the way the engine wants it: absolute,
/// query/fragment dropped, exactly one trailing slash.
fn normalize_index_url(raw: &str) -> Result<Url> {
    let mut url: Url = raw
        .trim_end_matches('/')
        .parse()
        .with_context(|| format!("invalid index URL {:?}", raw))?;
    if !url.has_host() {
        bail!("index URL {:?} has no host", raw);
    }
    url.set_query(None);
    url.set_fragment(None);
    let path = format!("{}/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DEPOT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Mirror {
            index_url,
            config,
            skip_server_copy,
            mirror_all_versions,
            mirror_all_wheels,
            package_type_regex,
        } => {
            let config_path = config.unwrap_or_else(|| cli.index_path.join("depot.ini"));
            let config = Config::load(&config_path)?;
            let mut mirrorer = Mirrorer::new(
                &config,
                MirrorOptions {
                    index_path: cli.index_path.clone(),
                    index_url: normalize_index_url(&index_url)?,
                    select: SelectOptions {
                        mirror_all_versions,
                        mirror_all_wheels,
                        package_type_regex,
                    },
                },
            )?;
            mirrorer.run()?;
            if !skip_server_copy {
                server::install(&cli.index_path)?;
            }
        }
        Command::CopyServer => server::install(&cli.index_path)?,
        Command::GenerateEnv { env } => generate::env_block(&env),
        Command::GenerateReqs {
            mode,
            site_packages,
        } => generate::requirements_block(&mode, &site_packages)?,
        Command::Serve {
            host,
            port,
            no_metadata,
        } => server::serve(&cli.index_path, &host, port, no_metadata)?,
        Command::Version => println!("depot v{}", env!("CARGO_PKG_VERSION")),
    }
    Ok(())
}
