//! OCDS Extensions CLI
//!
//! Command-line tool for querying the extension registry and building profiles.

use clap::{Parser, Subcommand};
use ocdsext_core::profile::DEFAULT_REGISTRY_BASE_URL;
use ocdsext_core::{
    data_file, json_dump, ExtensionRegistry, ExtensionSelection, Fetch, HttpFetcher, ProfileConfig,
    VersionFilter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "ocdsext")]
#[command(about = "OCDS extension registry and profile builder", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct RegistryArgs {
    /// URL or path of the registry's extension_versions.csv
    #[arg(long, default_value_t = format!("{DEFAULT_REGISTRY_BASE_URL}extension_versions.csv"))]
    extension_versions_url: String,

    /// URL or path of the registry's extensions.csv
    #[arg(long, default_value_t = format!("{DEFAULT_REGISTRY_BASE_URL}extensions.csv"))]
    extensions_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List versions of extensions
    List {
        #[command(flatten)]
        registry: RegistryArgs,

        /// Only versions of this extension
        #[arg(long)]
        id: Option<String>,

        /// Only this version, e.g. v1.1.4 or master
        #[arg(long)]
        version: Option<String>,

        /// Only extensions in this category
        #[arg(long)]
        category: Option<String>,

        /// Only core (true) or community (false) extensions
        #[arg(long)]
        core: Option<bool>,
    },

    /// Show the latest version of an extension
    Latest {
        #[command(flatten)]
        registry: RegistryArgs,

        /// Extension id
        id: String,
    },

    /// Build a profile and write its schemas and codelists
    Profile {
        /// Path to profile configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Create a profile configuration template
    CreateConfig {
        /// Output path for the configuration
        #[arg(short, long)]
        output: PathBuf,

        /// Tag of the standard
        #[arg(long, default_value = "1__1__5")]
        standard_tag: String,

        /// Extensions to include (id==version, or a URL)
        #[arg(short, long)]
        extension: Vec<String>,
    },

    /// Print a JSON data file describing versions of extensions
    GenerateDataFile {
        #[command(flatten)]
        registry: RegistryArgs,

        /// Versions to include, e.g. bids or lots==master (default all)
        versions: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn run(command: Commands) -> ocdsext_core::Result<()> {
    let fetcher: Arc<dyn Fetch> = Arc::new(HttpFetcher::new());

    match command {
        Commands::List {
            registry,
            id,
            version,
            category,
            core,
        } => {
            let filter = VersionFilter {
                id,
                version,
                category,
                core,
                date: None,
            };
            cmd_list(&load_registry(&registry, fetcher)?, &filter)
        }
        Commands::Latest { registry, id } => cmd_latest(&load_registry(&registry, fetcher)?, &id),
        Commands::Profile { config, output } => cmd_profile(&config, &output, fetcher),
        Commands::CreateConfig {
            output,
            standard_tag,
            extension,
        } => cmd_create_config(&output, &standard_tag, &extension),
        Commands::GenerateDataFile { registry, versions } => {
            cmd_generate_data_file(&load_registry(&registry, fetcher)?, &versions)
        }
    }
}

fn load_registry(args: &RegistryArgs, fetcher: Arc<dyn Fetch>) -> ocdsext_core::Result<ExtensionRegistry> {
    ExtensionRegistry::new(
        &args.extension_versions_url,
        Some(args.extensions_url.as_str()),
        fetcher,
    )
}

fn cmd_list(registry: &ExtensionRegistry, filter: &VersionFilter) -> ocdsext_core::Result<()> {
    let versions = registry.filter(filter)?;

    println!("Extension versions ({}):", versions.len());
    println!();

    for version in &versions {
        let date = version
            .date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let core = if version.core().unwrap_or(false) { " [core]" } else { "" };
        println!(
            "  {:<30} {:<12} {:<10} {}{}",
            version.id,
            version.version,
            date,
            version.category().unwrap_or("-"),
            core
        );
    }

    Ok(())
}

fn cmd_latest(registry: &ExtensionRegistry, id: &str) -> ocdsext_core::Result<()> {
    let version = registry.latest(id)?;

    println!("{}", version);
    if let Some(url) = &version.base_url {
        println!("  Base URL:     {}", url);
    }
    if let Some(url) = &version.download_url {
        println!("  Download URL: {}", url);
    }

    Ok(())
}

fn cmd_profile(config_path: &Path, output_dir: &Path, fetcher: Arc<dyn Fetch>) -> ocdsext_core::Result<()> {
    let config = ProfileConfig::load(config_path)?;
    debug!("building profile of {} from {}", config.standard_tag, config_path.display());
    let result = config.export(fetcher, output_dir)?;

    println!("Wrote {} files to {}", result.files_written.len(), output_dir.display());
    for path in &result.files_written {
        println!("  {}", path.display());
    }

    if !result.warnings.is_empty() {
        println!();
        println!("Warnings ({}):", result.warnings.len());
        for warning in &result.warnings {
            println!("  {}", warning);
        }
    }

    Ok(())
}

fn cmd_create_config(output: &Path, standard_tag: &str, extensions: &[String]) -> ocdsext_core::Result<()> {
    let selection = ExtensionSelection::from_selectors(extensions)?;

    let config = ProfileConfig {
        standard_tag: standard_tag.to_string(),
        extensions: selection,
        ..Default::default()
    };
    config.save(output)?;

    println!("Created config: {}", output.display());
    Ok(())
}

fn cmd_generate_data_file(registry: &ExtensionRegistry, selectors: &[String]) -> ocdsext_core::Result<()> {
    let data = data_file::generate(registry, selectors)?;
    println!("{}", json_dump(&data)?);
    Ok(())
}
