use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

mod batch;
mod config;
mod db;
mod export;
mod extract;
mod io;
mod llm;
mod ocr;
mod pipeline;
mod render;
mod segment;
mod tokenizer;
mod transcript;
use crate::render as render_mod;
use anyhow::Context as _;
use db::{DocumentStore as _, SqliteStore};
use llm::ProviderRegistry;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_SAMPLE_PATH: &str = "sample_submission.csv";

#[derive(Parser, Debug, Clone)]
#[command(name = "gazette", version, about = "Extract land notices from Kenya Gazette scans", long_about = None)]
struct Cli {
    /// Active profile name
    #[arg(short = 'p', long = "profile", global = true)]
    profile: Option<String>,

    /// Model (or Azure deployment) override
    #[arg(short = 'm', long = "model", global = true)]
    model: Option<String>,

    /// Database path (overrides DB_URL and the config file)
    #[arg(long = "db", global = true)]
    db: Option<String>,

    /// Output JSON instead of human-readable text
    #[arg(long = "json", global = true)]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Timeout (seconds) for network requests
    #[arg(long = "timeout", global = true)]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Write a config file
    Init(InitArgs),

    /// OCR a gazette PDF and store the result
    Read(ReadArgs),

    /// Store an OCR result that was fetched earlier
    Import(ImportArgs),

    /// Split a stored document into notices and extract land records
    Extract(ExtractArgs),

    /// Show the notices (or batches) of a stored document without calling a model
    Sections(SectionsArgs),

    /// Export extracted records as a submission CSV
    Csv(CsvArgs),
}

#[derive(Args, Debug, Clone)]
struct InitArgs {
    /// Language model provider (azure, openai, mock)
    #[arg(long)]
    provider: Option<String>,
    /// Language model endpoint
    #[arg(long)]
    endpoint: Option<String>,
    /// Language model API key
    #[arg(long = "api-key")]
    api_key: Option<String>,
    /// Default model or deployment name
    #[arg(long)]
    default_model: Option<String>,
    /// Computer Vision endpoint
    #[arg(long)]
    ocr_endpoint: Option<String>,
    /// Computer Vision key
    #[arg(long)]
    ocr_key: Option<String>,
    /// Profile name to create or update (default: "default")
    #[arg(long, default_value = "default")]
    profile: String,
}

#[derive(Args, Debug, Clone)]
struct ReadArgs {
    /// PDF to read
    #[arg(value_name = "PDF")]
    file: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct ImportArgs {
    /// OCR result JSON (Read API v3.2 format)
    #[arg(value_name = "JSON")]
    file: PathBuf,
    /// Document name used in exports (default: file name without extension)
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct ExtractArgs {
    /// Document id printed by `read` or `import`
    doc_id: String,
    /// Provider override (azure, openai, mock)
    #[arg(long)]
    provider: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct SectionsArgs {
    /// Document id printed by `read` or `import`
    doc_id: String,
    /// Show the batches that `extract` would send
    #[arg(long)]
    batches: bool,
}

#[derive(Args, Debug, Clone)]
struct CsvArgs {
    /// One or more document ids
    #[arg(required = true, num_args = 1.., value_name = "DOC_ID...")]
    doc_ids: Vec<String>,
    /// Output file (default: sections_export.csv in the downloads directory)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,
    /// Sample submission whose ids are filled with "none" when not exported
    #[arg(long)]
    sample: Option<PathBuf>,
}

#[derive(Debug, Clone)]
struct GlobalOpts {
    profile: Option<String>,
    model: Option<String>,
    db: Option<String>,
    json: bool,
    timeout_secs: Option<u64>,
}

impl GlobalOpts {
    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }

    fn settings(&self, provider: Option<&str>) -> anyhow::Result<config::Settings> {
        config::resolve_settings(&config::CliOverrides {
            profile: self.profile.as_deref(),
            provider,
            model: self.model.as_deref(),
            db_url: self.db.as_deref(),
        })
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let Cli {
        profile,
        model,
        db,
        json,
        verbose,
        timeout_secs,
        command,
    } = cli;
    init_tracing(verbose);

    let globals = GlobalOpts {
        profile,
        model,
        db,
        json,
        timeout_secs,
    };

    let result = match command {
        Commands::Init(args) => cmd_init(&globals, args).await,
        Commands::Read(args) => cmd_read(&globals, args).await,
        Commands::Import(args) => cmd_import(&globals, args).await,
        Commands::Extract(args) => cmd_extract(&globals, args).await,
        Commands::Sections(args) => cmd_sections(&globals, args).await,
        Commands::Csv(args) => cmd_csv(&globals, args).await,
    };

    if let Err(e) = result {
        let msg = format!("{:#}", e);
        if globals.json {
            let (code, hint) = classify_error(&e);
            render_mod::print_json_error(&code, &msg, hint.as_deref());
        } else {
            eprintln!("{}", msg);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn classify_error(e: &anyhow::Error) -> (String, Option<String>) {
    if let Some(ocr_err) = e.chain().find_map(|c| c.downcast_ref::<ocr::OcrError>()) {
        return match ocr_err {
            ocr::OcrError::Timeout(_) => ("timeout".to_string(), Some("raise poll_timeout_secs in the config".to_string())),
            _ => ("ocr_failed".to_string(), None),
        };
    }
    let msg = format!("{:#}", e).to_lowercase();
    if msg.contains("file not found") {
        return ("file_not_found".to_string(), Some("check the file path".to_string()));
    }
    if msg.contains("document not found") || msg.contains("profile not found") {
        return ("not_found".to_string(), None);
    }
    if msg.contains("invalid document id") || msg.contains("invalid token limits") || msg.contains("invalid poll settings") || msg.contains("invalid gazette_") {
        return ("invalid_args".to_string(), None);
    }
    if msg.contains("missing azure_openai_key") {
        return ("missing_api_key".to_string(), Some("set AZURE_OPENAI_KEY and AZURE_OPENAI_ENDPOINT in env or .env".to_string()));
    }
    if msg.contains("missing cognitive_services_key") || msg.contains("missing ocr endpoint") {
        return ("missing_api_key".to_string(), Some("set COGNITIVE_SERVICES_KEY and COGNITIVE_SERVICES_ENDPOINT in env or .env".to_string()));
    }
    if msg.contains("timed out") || msg.contains("timeout") {
        return ("timeout".to_string(), Some("try increasing --timeout or check network".to_string()));
    }
    if msg.contains("unsupported provider") {
        return ("provider_unsupported".to_string(), None);
    }
    if msg.contains("failed to parse") || msg.contains("parse error") {
        return ("parse_error".to_string(), None);
    }
    if msg.contains("database error") {
        return ("database_error".to_string(), None);
    }
    if msg.contains("network") || msg.contains("dns") || msg.contains("connection refused") {
        return ("network_error".to_string(), None);
    }
    ("unknown".to_string(), None)
}

async fn cmd_init(globals: &GlobalOpts, args: InitArgs) -> anyhow::Result<()> {
    use config::{default_config_path, load_config_if_exists, write_config, Profile};

    let path = default_config_path()?;
    let mut cfg = load_config_if_exists(&path)?.unwrap_or_default();

    if let Some(endpoint) = args.ocr_endpoint { cfg.ocr_endpoint = Some(endpoint); }
    if let Some(key) = args.ocr_key { cfg.ocr_key = Some(key); }
    if let Some(db) = globals.db.clone() { cfg.db_url = Some(db); }

    let prof = cfg
        .profiles
        .entry(args.profile.clone())
        .or_insert_with(Profile::default);
    if let Some(p) = args.provider { prof.provider = Some(p.to_lowercase()); }
    if let Some(endpoint) = args.endpoint { prof.endpoint = Some(endpoint); }
    if let Some(api_key) = args.api_key { prof.api_key = Some(api_key); }
    if let Some(model) = args.default_model { prof.model = Some(model); }
    if cfg.default_profile.is_none() { cfg.default_profile = Some(args.profile); }

    write_config(&path, &cfg)?;
    if globals.json {
        #[derive(serde::Serialize)]
        struct Out { config: String }
        render_mod::print_json(&Out { config: path.display().to_string() });
    } else {
        println!("config written: {}", path.display());
    }
    Ok(())
}

fn print_doc_id(globals: &GlobalOpts, id: uuid::Uuid, name: &str) {
    if globals.json {
        #[derive(serde::Serialize)]
        struct Out<'a> { doc_id: String, name: &'a str }
        render_mod::print_json(&Out { doc_id: id.to_string(), name });
    } else {
        println!("{}", id);
    }
}

async fn cmd_read(globals: &GlobalOpts, args: ReadArgs) -> anyhow::Result<()> {
    let pdf = io::read_file_bytes_async(&args.file).await?;
    let settings = globals.settings(None)?;
    let (endpoint, key) = settings.require_ocr()?;
    let policy = ocr::PollPolicy { interval: settings.poll_interval, timeout: settings.poll_timeout };
    let client = ocr::ReadClient::new(endpoint, key, policy, globals.timeout())?;
    let store = SqliteStore::open(&settings.db_url)?;
    let name = io::document_name(&args.file);
    let id = pipeline::read_document(&store, &client, pdf, &name).await?;
    print_doc_id(globals, id, &name);
    Ok(())
}

async fn cmd_import(globals: &GlobalOpts, args: ImportArgs) -> anyhow::Result<()> {
    let raw = io::read_file_to_string_async(&args.file).await?;
    let settings = globals.settings(None)?;
    let store = SqliteStore::open(&settings.db_url)?;
    let name = args.name.unwrap_or_else(|| io::document_name(&args.file));
    let id = pipeline::import_document(&store, &raw, &name)?;
    print_doc_id(globals, id, &name);
    Ok(())
}

async fn cmd_extract(globals: &GlobalOpts, args: ExtractArgs) -> anyhow::Result<()> {
    let doc_id = db::parse_doc_id(&args.doc_id)?;
    let settings = globals.settings(args.provider.as_deref())?;
    let store = SqliteStore::open(&settings.db_url)?;
    let registry = ProviderRegistry::from_settings(&settings, globals.timeout())?;
    let adapter = registry.require(&settings.llm_provider)?;
    tracing::info!(provider = %settings.llm_provider, model = %settings.llm_model, "extracting");

    let opts = pipeline::ExtractOptions { model: &settings.llm_model, limits: settings.batch_limits() };
    let summary = pipeline::extract_document(&store, adapter, &tokenizer::WordTokenizer, doc_id, opts).await?;
    if globals.json {
        render_mod::print_json(&summary);
    } else {
        render_mod::render_summary_text(&summary);
    }
    Ok(())
}

async fn cmd_sections(globals: &GlobalOpts, args: SectionsArgs) -> anyhow::Result<()> {
    let doc_id = db::parse_doc_id(&args.doc_id)?;
    let settings = globals.settings(None)?;
    let store = SqliteStore::open(&settings.db_url)?;
    let full_text = pipeline::load_document(&store, doc_id)?;
    let (sections, plan) = pipeline::plan_document(&full_text, &tokenizer::WordTokenizer, settings.batch_limits())?;
    match (args.batches, globals.json) {
        (true, true) => render_mod::print_json(&plan),
        (true, false) => render_mod::render_plan_text(&plan),
        (false, true) => render_mod::print_json(&sections),
        (false, false) => render_mod::render_sections_text(&sections),
    }
    Ok(())
}

async fn cmd_csv(globals: &GlobalOpts, args: CsvArgs) -> anyhow::Result<()> {
    let doc_ids = args
        .doc_ids
        .iter()
        .map(|s| db::parse_doc_id(s))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let settings = globals.settings(None)?;
    let store = SqliteStore::open(&settings.db_url)?;

    let mut rows = Vec::new();
    for id in doc_ids {
        pipeline::load_document(&store, id)?;
        rows.extend(store.get_sections_by_doc_id(id)?);
    }

    let sample_ids = match &args.sample {
        Some(path) => {
            let text = io::read_file_to_string_async(path).await?;
            export::read_sample_ids(text.as_bytes())?
        }
        None => {
            let default = PathBuf::from(DEFAULT_SAMPLE_PATH);
            if default.exists() {
                let text = io::read_file_to_string_async(&default).await?;
                export::read_sample_ids(text.as_bytes())?
            } else {
                Vec::new()
            }
        }
    };

    let output = match args.output {
        Some(p) => p,
        None => io::default_export_path()?,
    };
    io::ensure_parent_dir(&output)?;
    let file = std::fs::File::create(&output)
        .with_context(|| format!("creating export file: {}", output.display()))?;
    let summary = export::write_export(file, &rows, &sample_ids)?;
    tracing::info!(rows = summary.rows, filled = summary.filled, "export written");

    if globals.json {
        #[derive(serde::Serialize)]
        struct Out { output: String, rows: usize, filled: usize }
        render_mod::print_json(&Out { output: output.display().to_string(), rows: summary.rows, filled: summary.filled });
    } else {
        render_mod::render_export_text(&output, &summary);
    }
    Ok(())
}
