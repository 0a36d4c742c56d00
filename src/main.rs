use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use nuget_lens::config::Config;
use nuget_lens::reports::{
    format_metadata, generate_json_report, generate_markdown_report, generate_summary_report,
};
use nuget_lens::resolver::ResolutionEngine;
use nuget_lens::utils::{format_downloads, parse_package_spec, truncate_string};
use nuget_lens::vulnerabilities::format_range;

#[derive(Parser)]
#[command(name = "nuget-lens")]
#[command(about = "Version, update and vulnerability lookups for NuGet packages", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum OutputFormat {
    #[default]
    Summary,
    Json,
    Markdown,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve installed packages: latest versions, update kind, vulnerabilities
    Resolve {
        /// Installed packages as `Id@Version`
        #[arg(required = true)]
        packages: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Summary)]
        format: OutputFormat,

        /// Exit with code 1 if any installed version is vulnerable
        #[arg(long)]
        fail_on_vulns: bool,
    },
    /// List published versions, newest first
    Versions {
        package: String,

        /// Include pre-release versions
        #[arg(long)]
        prerelease: bool,
    },
    /// Show metadata for a package version (latest when omitted)
    Info {
        package: String,

        #[arg(short, long)]
        version: Option<String>,
    },
    /// List known vulnerabilities affecting one version
    Vulns { package: String, version: String },
    /// Search the package index
    Search {
        query: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "20")]
        take: usize,

        /// Include pre-release versions
        #[arg(long)]
        prerelease: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let engine = ResolutionEngine::from_config(&config)?;

    match cli.command {
        Commands::Resolve {
            packages,
            format,
            fail_on_vulns,
        } => run_resolve(&engine, &packages, format, fail_on_vulns).await,
        Commands::Versions {
            package,
            prerelease,
        } => run_versions(&engine, &package, prerelease).await,
        Commands::Info { package, version } => run_info(&engine, &package, version.as_deref()).await,
        Commands::Vulns { package, version } => run_vulns(&engine, &package, &version).await,
        Commands::Search {
            query,
            take,
            prerelease,
        } => run_search(&engine, &query, take, prerelease).await,
    }
}

async fn run_resolve(
    engine: &ResolutionEngine,
    specs: &[String],
    format: OutputFormat,
    fail_on_vulns: bool,
) -> anyhow::Result<ExitCode> {
    let packages = specs
        .iter()
        .map(|spec| {
            parse_package_spec(spec)
                .ok_or_else(|| anyhow::anyhow!("Expected Id@Version, got {:?}", spec))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    eprintln!("Resolving {} packages...", packages.len());
    let results = engine.resolve_batch(&packages).await;

    match format {
        OutputFormat::Json => println!("{}", generate_json_report(&results)?),
        OutputFormat::Markdown => println!("{}", generate_markdown_report(&results)),
        OutputFormat::Summary => print!("{}", generate_summary_report(&results)),
    }

    if fail_on_vulns && results.iter().any(|r| r.is_vulnerable()) {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

async fn run_versions(
    engine: &ResolutionEngine,
    package: &str,
    prerelease: bool,
) -> anyhow::Result<ExitCode> {
    let versions = engine.try_versions(package).await?;
    for version in versions
        .iter()
        .filter(|v| prerelease || !nuget_lens::registries::version_utils::is_prerelease(v))
    {
        println!("{}", version);
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_info(
    engine: &ResolutionEngine,
    package: &str,
    version: Option<&str>,
) -> anyhow::Result<ExitCode> {
    match engine.metadata(package, version).await {
        Some(metadata) => {
            println!("{}", format_metadata(&metadata));
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No metadata found for {}", package);
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn run_vulns(
    engine: &ResolutionEngine,
    package: &str,
    version: &str,
) -> anyhow::Result<ExitCode> {
    let vulnerabilities = engine.vulnerabilities(package, version).await;
    if vulnerabilities.is_empty() {
        println!("[OK] No known vulnerabilities for {} {}", package, version);
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "⚠ {} vulnerabilities affect {} {}\n",
        vulnerabilities.len(),
        package,
        version
    );
    for vuln in &vulnerabilities {
        println!(
            "  {:<8} {}  (affects {})",
            vuln.severity.as_str().to_uppercase(),
            vuln.url,
            format_range(&vuln.affected_range)
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_search(
    engine: &ResolutionEngine,
    query: &str,
    take: usize,
    prerelease: bool,
) -> anyhow::Result<ExitCode> {
    let results = engine.search(query, take, prerelease).await;
    if results.is_empty() {
        eprintln!("No packages match {:?}", query);
        return Ok(ExitCode::SUCCESS);
    }

    for result in &results {
        let downloads = result
            .total_downloads
            .map(format_downloads)
            .unwrap_or_default();
        let verified = if result.verified == Some(true) { " ✓" } else { "" };
        println!(
            "{}{} {}  {}",
            result.id, verified, result.version, downloads
        );
        if let Some(description) = &result.description {
            println!("    {}", truncate_string(description.trim(), 80));
        }
    }
    Ok(ExitCode::SUCCESS)
}
