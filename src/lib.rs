pub mod assets;
pub mod backfill;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod io_utils;
pub mod parse;
pub mod record;
pub mod recommend;
pub mod sample;
pub mod schema;
pub mod session;
pub mod store;
pub mod table;
pub mod yaml_provider;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::Parser;
use log::{LevelFilter, debug, info};
use serde_json::Value;

use crate::{
    assets::AssetResolver,
    backfill::DefaultContext,
    cli::{Cli, Commands, SampleFormat},
    config::AppConfig,
    endpoint::{STATUS_OK, handle_import_request},
    executor::{Executor, ExecutorOptions},
    recommend::recommend,
    session::ImportSession,
    store::MemoryStore,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("record_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Preview(args) => handle_preview(&args),
        Commands::Fields(args) => handle_fields(&args),
        Commands::Recommend(args) => handle_recommend(&args),
        Commands::Sample(args) => handle_sample(&args),
        Commands::Import(args) => block_on(handle_import(&args)),
        Commands::Request(args) => block_on(handle_request(&args)),
    }
}

fn block_on<F>(future: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")?;
    runtime.block_on(future)
}

fn load_collection(args: &cli::CollectionArgs) -> Result<(AppConfig, schema::Schema)> {
    let config = AppConfig::load(&args.config)?;
    let schema = config.require_schema(&args.collection)?.clone();
    Ok((config, schema))
}

fn default_context(config: &AppConfig, locale: Option<&str>, user: Option<&str>) -> DefaultContext {
    let mut context = DefaultContext::default();
    if let Some(locale) = locale.or(config.locale.as_deref()) {
        context = context.with_locale(locale);
    }
    if let Some(user) = user {
        context = context.with_user(serde_json::json!({ "id": user }));
    }
    context
}

fn handle_preview(args: &cli::PreviewArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let table = parse::read_file(&args.input, encoding)?;
    info!(
        "Parsed {} row(s) from {:?}",
        table.row_count(),
        args.input
    );
    print!("{}", table::render_preview(&table, args.rows));
    Ok(())
}

fn handle_fields(args: &cli::FieldsArgs) -> Result<()> {
    let (_, schema) = load_collection(&args.target)?;
    let fields = schema.flatten();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&fields)?);
        return Ok(());
    }
    let headers = ["path", "label", "type", "required", "default", "example"]
        .map(String::from)
        .to_vec();
    let rows = fields
        .iter()
        .map(|field| {
            vec![
                field.path.clone(),
                field.label.clone(),
                field.type_description.clone(),
                yes_no(field.required),
                yes_no(field.has_default_value),
                field.example.clone(),
            ]
        })
        .collect::<Vec<_>>();
    print!("{}", table::render_table(&headers, &rows));
    Ok(())
}

fn yes_no(flag: bool) -> String {
    let label = if flag { "yes" } else { "no" };
    label.to_string()
}

fn handle_recommend(args: &cli::RecommendArgs) -> Result<()> {
    let (_, schema) = load_collection(&args.target)?;
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let table = parse::read_file(&args.input, encoding)?;
    let recommendations = recommend(&table.headers, &schema.flatten());
    let unmatched = table.headers.len().saturating_sub(recommendations.len());
    let headers = ["column", "field", "confidence"].map(String::from).to_vec();
    let rows = recommendations
        .iter()
        .map(|rec| {
            vec![
                rec.csv_field.clone(),
                rec.recommended_field.clone(),
                format!("{:.1}", rec.confidence),
            ]
        })
        .collect::<Vec<_>>();
    print!("{}", table::render_table(&headers, &rows));
    info!(
        "{} of {} column(s) matched, {unmatched} without a confident match",
        recommendations.len(),
        table.headers.len()
    );
    Ok(())
}

fn handle_sample(args: &cli::SampleArgs) -> Result<()> {
    let (_, schema) = load_collection(&args.target)?;
    let fields = schema.flatten();
    let today = Utc::now().date_naive();
    let contents = match args.format {
        SampleFormat::Csv => sample::generate_sample_csv(&fields, today)?,
        SampleFormat::Json => sample::generate_sample_json(&fields, today)?,
    };
    io_utils::write_output(args.output.as_deref(), &contents)?;
    debug!("Sample with {} field(s) written", fields.len());
    Ok(())
}

async fn handle_import(args: &cli::ImportArgs) -> Result<()> {
    let (config, schema) = load_collection(&args.target)?;
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let table = parse::read_file(&args.input, encoding)?;

    let mut session = ImportSession::new(&args.target.collection, schema);
    session.load_table(table)?;
    if args.no_recommend {
        for mapping in session.settings().field_mappings.as_slice().to_vec() {
            session.set_mapping(&mapping.csv_field, "")?;
        }
    }
    for (header, field) in &args.mappings {
        debug!("Explicit mapping '{header}' -> '{field}'");
        session.set_mapping(header, field)?;
    }
    session.set_mode(args.mode.into())?;
    session.set_compare_field(args.compare_field.clone())?;
    session.set_locale(args.locale.clone().or_else(|| config.locale.clone()))?;
    if !session.can_proceed() {
        bail!(
            "Import cannot start: {}",
            session.missing_requirements().join("; ")
        );
    }

    let store = MemoryStore::load(&args.store)?;
    let assets = AssetResolver::from_config(&config.assets)
        .map_err(|err| anyhow!("Building asset resolver: {err}"))?;
    let executor = Executor::new(&store, &assets)
        .with_context(default_context(
            &config,
            args.locale.as_deref(),
            args.user.as_deref(),
        ))
        .with_options(ExecutorOptions {
            verbose: args.verbose || config.verbose,
        });
    let response = session.start(&executor).await?;
    println!("{}", serde_json::to_string_pretty(response)?);
    store.save(&args.store).await?;
    info!("{}", response.message);
    Ok(())
}

async fn handle_request(args: &cli::RequestArgs) -> Result<()> {
    let config = AppConfig::load(&args.config)?;
    let body = io_utils::read_input(&args.body)
        .with_context(|| format!("Reading request body {:?}", args.body))?;
    let body = String::from_utf8(body).context("Request body is not UTF-8")?;
    let store = MemoryStore::load(&args.store)?;
    let assets = AssetResolver::from_config(&config.assets)
        .map_err(|err| anyhow!("Building asset resolver: {err}"))?;
    let response = handle_import_request(
        &body,
        &config,
        &store,
        &assets,
        default_context(&config, None, args.user.as_deref()),
        ExecutorOptions {
            verbose: args.verbose || config.verbose,
        },
    )
    .await;
    let mut output = serde_json::Map::new();
    output.insert("status".into(), Value::from(response.status));
    output.insert("body".into(), serde_json::to_value(&response.body)?);
    println!("{}", serde_json::to_string_pretty(&output)?);
    if response.status != STATUS_OK {
        bail!("Request failed with status {}", response.status);
    }
    store.save(&args.store).await?;
    Ok(())
}
