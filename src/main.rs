use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use gcexport::cache::DataSourceCacheSet;
use gcexport::config::Config;
use gcexport::genesys::{
    auth::{ClientCredentials, StaticToken, TokenSource},
    client::ApiClient,
    source,
};
use gcexport::resource::{
    enumerate::{export, ExportOptions, ExportResult},
    filter,
    meta::ResourceIdMetaMap,
    registry::{builtin_definitions, ExporterConfig, ExporterRegistry},
    resolver::ResolveOptions,
    sanitizer::Strategy,
    StaticSource,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Version injected at compile time via GCEXPORT_VERSION env var, or the
/// crate version for local builds.
pub const VERSION: &str = match option_env!("GCEXPORT_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};

/// Genesys Cloud configuration exporter
#[derive(Parser, Debug)]
#[command(name = "gcexport", version = VERSION, about, long_about = None)]
struct Args {
    /// Config file (defaults to <config dir>/gcexport/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the registered resource types
    Types,

    /// Sanitize display names into block labels
    Sanitize {
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,
        names: Vec<String>,
    },

    /// Export resources from a snapshot file or the live API
    Export(ExportArgs),

    /// Resolve a resource name to its ID through the data source cache
    Lookup {
        resource_type: String,
        names: Vec<String>,
        /// Bearer token to use instead of OAuth client credentials
        #[arg(long, env = "GENESYSCLOUD_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(clap::Args, Debug)]
struct ExportArgs {
    /// JSON or YAML file of resource type -> ID -> resource metadata
    #[arg(long, conflicts_with = "live", required_unless_present = "live")]
    snapshot: Option<PathBuf>,

    /// Enumerate resources from the Platform API
    #[arg(long)]
    live: bool,

    /// Bearer token to use instead of OAuth client credentials
    #[arg(long, env = "GENESYSCLOUD_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// `type` or `type::name`; repeatable
    #[arg(long = "filter")]
    resource_filter: Vec<String>,

    /// `type::id` of resources to export; repeatable
    #[arg(long = "id")]
    id_filter: Vec<String>,

    /// `type::regex` of labels to keep; repeatable
    #[arg(long = "include")]
    include_filter: Vec<String>,

    /// `type::regex` of labels to drop; repeatable
    #[arg(long = "exclude")]
    exclude_filter: Vec<String>,

    /// `type_regex.attribute` to leave out of the export; repeatable
    #[arg(long = "exclude-attribute")]
    excluded_attributes: Vec<String>,

    /// Decode JSON string attributes into structured values
    #[arg(long)]
    decode_json: bool,

    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,

    /// Write to a file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Legacy,
    Optimized,
    Transliterating,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Legacy => Strategy::Legacy,
            StrategyArg::Optimized => Strategy::Optimized,
            StrategyArg::Transliterating => Strategy::Transliterating,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // RUST_LOG narrows individual targets below the chosen level
    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(tracing_level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("gcexport {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("gcexport").join("gcexport.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".gcexport").join("gcexport.log");
    }
    PathBuf::from("gcexport.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level)?;

    let config = match &args.config {
        Some(path) => Config::load_from(path)?.with_env_overrides(|name| std::env::var(name).ok()),
        None => Config::load(),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match args.command {
        Command::Types => list_types(),
        Command::Sanitize { strategy, names } => {
            let strategy = strategy.map(Strategy::from).unwrap_or_else(|| config.effective_strategy());
            sanitize_names(strategy, &names);
            Ok(())
        }
        Command::Export(export_args) => run_export(&config, export_args, &cancel).await,
        Command::Lookup {
            resource_type,
            names,
            access_token,
        } => run_lookup(&config, &resource_type, &names, access_token, &cancel).await,
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn list_types() -> Result<()> {
    let registry = ExporterRegistry::with_builtin()?;
    let defs = builtin_definitions()?;
    for resource_type in registry.type_names() {
        let def = &defs[&resource_type];
        println!(
            "{:<48} {:<32} {}",
            resource_type,
            def.display_name,
            def.api_path.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn sanitize_names(strategy: Strategy, names: &[String]) {
    // Index keys keep input order and allow duplicate names
    let entries: BTreeMap<String, String> = names
        .iter()
        .enumerate()
        .map(|(i, name)| (format!("{:08}", i), name.clone()))
        .collect();
    for (key, label) in strategy.sanitize_batch(&entries) {
        println!("{}\t{}", entries[&key], label);
    }
}

fn api_client(config: &Config, access_token: Option<String>) -> Result<Arc<ApiClient>> {
    let token: Arc<dyn TokenSource> = match access_token {
        Some(token) => Arc::new(StaticToken(token)),
        None => {
            let client_id = config
                .oauth_client_id
                .as_deref()
                .context("No OAuth client configured. Set GENESYSCLOUD_OAUTHCLIENT_ID")?;
            let secret = config
                .oauth_client_secret
                .as_deref()
                .context("Set GENESYSCLOUD_OAUTHCLIENT_SECRET")?;
            Arc::new(ClientCredentials::with_login_url(
                &config.effective_login_url()?,
                client_id,
                secret,
            )?)
        }
    };
    let client = ApiClient::new(&config.effective_api_url()?, token)?
        .with_page_size(config.effective_page_size());
    Ok(Arc::new(client))
}

/// Registry whose sources serve the resources in a snapshot file
fn snapshot_registry(path: &Path) -> Result<ExporterRegistry> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let mut snapshot: BTreeMap<String, ResourceIdMetaMap> =
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => serde_yaml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };

    let registry = ExporterRegistry::new();
    for (resource_type, def) in builtin_definitions()? {
        let mut exporter = ExporterConfig::from_def(resource_type, def.clone())?;
        if let Some(mut resources) = snapshot.remove(resource_type) {
            if let Some(prefix) = &def.id_prefix {
                for meta in resources.values_mut().filter(|m| m.id_prefix.is_none()) {
                    meta.id_prefix = Some(prefix.clone());
                }
            }
            exporter = exporter.with_source(Arc::new(StaticSource::new(resources)));
        }
        registry.register(resource_type, exporter)?;
    }
    for (resource_type, resources) in snapshot {
        tracing::warn!("No exporter definition for {}, exporting without policy", resource_type);
        registry.register(
            &resource_type,
            ExporterConfig::default().with_source(Arc::new(StaticSource::new(resources))),
        )?;
    }
    Ok(registry)
}

async fn run_export(config: &Config, args: ExportArgs, cancel: &CancellationToken) -> Result<()> {
    let registry = match &args.snapshot {
        Some(path) => snapshot_registry(path)?,
        None => source::live_registry(api_client(config, args.access_token.clone())?)?,
    };
    registry.freeze();

    let merge = |cli: &[String], file: &[String]| -> Vec<String> {
        file.iter().chain(cli).cloned().collect()
    };
    let options = ExportOptions {
        strategy: args
            .strategy
            .map(Strategy::from)
            .unwrap_or_else(|| config.effective_strategy()),
        resource_filter: merge(&args.resource_filter, &config.resource_filter),
        id_filter: args.id_filter.clone(),
        include_filter: merge(&args.include_filter, &config.include_filter),
        exclude_filter: merge(&args.exclude_filter, &config.exclude_filter),
        resolve: ResolveOptions {
            decode_json_attributes: args.decode_json || config.decode_json_attributes,
        },
    };

    let mut exporters = registry.get_all();
    filter::include_types(&mut exporters, &merge(&options.id_filter, &options.resource_filter));
    filter::populate_excluded_attributes(
        &exporters,
        &merge(&args.excluded_attributes, &config.excluded_attributes),
    )?;

    tracing::info!(
        "Exporting {} resource types with {} strategy",
        exporters.len(),
        options.strategy.as_str()
    );
    let result = export(&exporters, &options, cancel).await;
    report_diagnostics(&result);

    let rendered = match args.format {
        OutputFormat::Json => serde_json::to_string_pretty(&result)?,
        OutputFormat::Yaml => serde_yaml::to_string(&result)?,
    };
    match &args.output {
        Some(path) => std::fs::write(path, rendered).with_context(|| format!("Failed to write {:?}", path))?,
        None => println!("{}", rendered),
    }

    if result.has_errors() {
        anyhow::bail!("Export finished with errors");
    }
    Ok(())
}

fn report_diagnostics(result: &ExportResult) {
    for (resource_type, diagnostics) in &result.diagnostics {
        for diag in diagnostics.iter() {
            eprintln!(
                "{:?}: {} {}{}",
                diag.severity,
                resource_type,
                diag.summary,
                diag.attribute
                    .as_deref()
                    .map(|a| format!(" ({})", a))
                    .unwrap_or_default()
            );
        }
    }
    eprintln!(
        "Exported {} resources, {} referenced types outside the export",
        result.resource_count(),
        result.unresolved.len()
    );
}

async fn run_lookup(
    config: &Config,
    resource_type: &str,
    names: &[String],
    access_token: Option<String>,
    cancel: &CancellationToken,
) -> Result<()> {
    let client = api_client(config, access_token)?;
    let caches = DataSourceCacheSet::new();
    let cache = source::data_source_cache(&caches, client, resource_type)?;

    let mut failed = false;
    for name in names {
        match cache.resolve(name, cancel).await {
            Ok(id) => println!("{}\t{}", name, id),
            Err(diagnostics) => {
                failed = true;
                for diag in diagnostics {
                    eprintln!("{}: {}", name, diag.summary);
                }
            }
        }
    }
    caches.close_all().await;

    if failed {
        anyhow::bail!("Lookup failed for one or more names");
    }
    Ok(())
}
