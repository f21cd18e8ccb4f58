use std::fs;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use kira_metadata::app::App;
use kira_metadata::config::{ConfigLoader, ResolvedConfig};
use kira_metadata::error::KiraError;
use kira_metadata::output::JsonOutput;
use kira_metadata::pipeline::PipelineFindRequest;
use kira_metadata::query::FindRequest;
use kira_metadata::registration::{DEFAULT_METADATA_TAGS, HttpFetcher, HttpObjectRegistry};
use kira_metadata::store::MemoryStore;

#[derive(Parser)]
#[command(name = "kira-md")]
#[command(about = "Query, provenance traversal and DRS registration over research metadata")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    /// Overrides `data_dir` from the config file.
    #[arg(long, global = true)]
    data_dir: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Filtered, sorted, paginated listing of a collection")]
    Find(FindArgs),
    #[command(about = "Run a read-only aggregation pipeline")]
    Pipeline(PipelineArgs),
    #[command(about = "Data objects derived from each biosample of a study")]
    StudyDataObjects(StudyArgs),
    #[command(about = "Describe remote JSON documents as DRS objects")]
    Register(RegisterArgs),
    #[command(about = "Tag a registered metadata object once its activities check out")]
    TagMetadata(TagMetadataArgs),
    #[command(about = "PUT a local file to an upload URL")]
    Upload(UploadArgs),
    #[command(about = "Redistribute activity_set records by type")]
    Specialize(SpecializeArgs),
    #[command(about = "List recent JSON files from a directory index")]
    RecentUrls(RecentUrlsArgs),
}

#[derive(Args)]
struct FindArgs {
    collection: String,

    #[arg(long)]
    filter: Option<String>,

    #[arg(long)]
    sort: Option<String>,

    #[arg(long)]
    page_size: Option<usize>,

    #[arg(long)]
    page_token: Option<String>,

    #[arg(long)]
    fields: Option<String>,
}

#[derive(Args)]
struct PipelineArgs {
    /// Pipeline JSON, or `@path` to read it from a file.
    spec: String,

    #[arg(long, default_value = "")]
    description: String,
}

#[derive(Args)]
struct StudyArgs {
    study_id: String,
}

#[derive(Args)]
struct RegisterArgs {
    #[arg(required = true)]
    urls: Vec<String>,

    /// Post each described object to `drs_base_url`.
    #[arg(long)]
    submit: bool,
}

#[derive(Args)]
struct TagMetadataArgs {
    drs_id: String,

    /// Repeat to replace the default metadata tags.
    #[arg(long = "tag")]
    tags: Vec<String>,
}

#[derive(Args)]
struct UploadArgs {
    path: Utf8PathBuf,
    url: String,

    /// Guessed from the file extension when omitted.
    #[arg(long)]
    mime_type: Option<String>,
}

#[derive(Args)]
struct SpecializeArgs {
    path: Utf8PathBuf,
}

#[derive(Args)]
struct RecentUrlsArgs {
    urlpath: String,

    #[arg(long)]
    since: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    if error.is_not_found() {
        return 2;
    }
    if error.is_validation() {
        return 4;
    }
    match error {
        KiraError::Http(_) | KiraError::HttpStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Find(args) => {
            let app = store_app(&config)?;
            let request = FindRequest {
                filter: args.filter,
                sort: args.sort,
                page_size: args.page_size,
                page_token: args.page_token,
                fields: args.fields,
            };
            let result = app.find(&args.collection, &request)?;
            JsonOutput::print_find(&result).into_diagnostic()
        }
        Commands::Pipeline(args) => {
            let app = store_app(&config)?;
            let pipeline_spec = match args.spec.strip_prefix('@') {
                Some(path) => fs::read_to_string(path)
                    .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?,
                None => args.spec,
            };
            let request = PipelineFindRequest {
                pipeline_spec,
                description: args.description,
            };
            let result = app.pipeline_find(&request)?;
            JsonOutput::print_pipeline(&result).into_diagnostic()
        }
        Commands::StudyDataObjects(args) => {
            let app = store_app(&config)?;
            let result = app.data_objects_for_study(&args.study_id)?;
            JsonOutput::print_study(&result).into_diagnostic()
        }
        Commands::Register(args) => {
            let app = remote_app(&config)?;
            if args.submit {
                let registry = object_registry(&config)?;
                let submissions = app.submit_many(&args.urls, &registry);
                return JsonOutput::print_submissions(&submissions).into_diagnostic();
            }
            if let [url] = args.urls.as_slice() {
                let outcome = app.register(url)?;
                JsonOutput::print_registration(&outcome).into_diagnostic()
            } else {
                let outcomes = app.register_many(&args.urls);
                JsonOutput::print_batch(&outcomes).into_diagnostic()
            }
        }
        Commands::TagMetadata(args) => {
            let app = remote_app(&config)?;
            let registry = object_registry(&config)?;
            let tags = if args.tags.is_empty() {
                DEFAULT_METADATA_TAGS.to_vec()
            } else {
                args.tags.iter().map(String::as_str).collect()
            };
            let result = app.ensure_metadata_tags(&args.drs_id, &tags, &registry)?;
            JsonOutput::print_tags(&result).into_diagnostic()
        }
        Commands::Upload(args) => {
            let app = remote_app(&config)?;
            let registry = object_registry(&config)?;
            let result = app.upload(
                args.path.as_std_path(),
                &args.url,
                args.mime_type.as_deref(),
                &registry,
            )?;
            JsonOutput::print_upload(&result).into_diagnostic()
        }
        Commands::Specialize(args) => {
            let app = remote_app(&config)?;
            let content = fs::read_to_string(&args.path)
                .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", args.path)))?;
            let docs = match serde_json::from_str(&content).into_diagnostic()? {
                Value::Object(docs) => docs,
                _ => {
                    return Err(KiraError::StoreLoad(format!(
                        "{} must contain a JSON object of collections",
                        args.path
                    ))
                    .into());
                }
            };
            let result = app.specialize(docs);
            JsonOutput::print_specialized(&result).into_diagnostic()
        }
        Commands::RecentUrls(args) => {
            let app = remote_app(&config)?;
            let result = app.recent_urls(&args.urlpath, args.since.as_deref())?;
            JsonOutput::print_recent(&result).into_diagnostic()
        }
    }
}

fn store_app(config: &ResolvedConfig) -> Result<App<MemoryStore, HttpFetcher>, KiraError> {
    let store = MemoryStore::load(&config.data_dir)?;
    let fetcher = HttpFetcher::new(config.fetch_timeout)?;
    Ok(App::from_config(store, fetcher, config))
}

fn remote_app(config: &ResolvedConfig) -> Result<App<MemoryStore, HttpFetcher>, KiraError> {
    let fetcher = HttpFetcher::new(config.fetch_timeout)?;
    Ok(App::from_config(MemoryStore::new(), fetcher, config))
}

fn object_registry(config: &ResolvedConfig) -> Result<HttpObjectRegistry, KiraError> {
    let base_url = config
        .drs_base_url
        .as_deref()
        .ok_or_else(|| KiraError::ConfigParse("drs_base_url is not configured".to_string()))?;
    HttpObjectRegistry::new(base_url, config.fetch_timeout)
}
