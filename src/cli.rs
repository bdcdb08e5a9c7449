use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::executor::ImportMode;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Import CSV, JSON and spreadsheet files into record collections",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Parse an input file and preview its rows in a formatted table
    Preview(PreviewArgs),
    /// List the importable fields of a configured collection
    Fields(FieldsArgs),
    /// Suggest column-to-field mappings for an input file
    Recommend(RecommendArgs),
    /// Write a sample CSV or JSON file for a collection
    Sample(SampleArgs),
    /// Import an input file into a collection store
    Import(ImportArgs),
    /// Feed a raw JSON import request to the request handler
    Request(RequestArgs),
}

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// Input file (.csv, .json, .xlsx, .xls)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Number of rows to display
    #[arg(long, default_value_t = 10)]
    pub rows: usize,
    /// Character encoding of text input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct CollectionArgs {
    /// YAML configuration declaring collections and their fields
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
    /// Slug of the target collection
    #[arg(long)]
    pub collection: String,
}

#[derive(Debug, Args)]
pub struct FieldsArgs {
    #[command(flatten)]
    pub target: CollectionArgs,
    /// Emit the flattened fields as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RecommendArgs {
    /// Input file whose headers should be mapped
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    #[command(flatten)]
    pub target: CollectionArgs,
    /// Character encoding of text input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum SampleFormat {
    Csv,
    Json,
}

#[derive(Debug, Args)]
pub struct SampleArgs {
    #[command(flatten)]
    pub target: CollectionArgs,
    /// Sample file format
    #[arg(long, value_enum, default_value = "csv")]
    pub format: SampleFormat,
    /// Output file (stdout when omitted or '-')
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    Create,
    Update,
    Upsert,
}

impl From<ModeArg> for ImportMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Create => ImportMode::Create,
            ModeArg::Update => ImportMode::Update,
            ModeArg::Upsert => ImportMode::Upsert,
        }
    }
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Input file (.csv, .json, .xlsx, .xls)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    #[command(flatten)]
    pub target: CollectionArgs,
    /// JSON file backing the record store (created when missing)
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    /// Write mode
    #[arg(long, value_enum, default_value = "create")]
    pub mode: ModeArg,
    /// Field used to match rows to stored records in update/upsert mode
    #[arg(long = "compare-field")]
    pub compare_field: Option<String>,
    /// Explicit mapping `header=field` (repeatable; an empty field removes the mapping)
    #[arg(long = "map", action = clap::ArgAction::Append, value_parser = parse_mapping)]
    pub mappings: Vec<(String, String)>,
    /// Start from an empty mapping instead of the recommendations
    #[arg(long = "no-recommend")]
    pub no_recommend: bool,
    /// Locale passed to the store and to computed defaults
    #[arg(long)]
    pub locale: Option<String>,
    /// Id of the importing user, available to computed defaults
    #[arg(long)]
    pub user: Option<String>,
    /// Include per-row details in the report
    #[arg(short, long)]
    pub verbose: bool,
    /// Character encoding of text input (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// YAML configuration declaring collections and their fields
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,
    /// JSON file backing the record store (created when missing)
    #[arg(short = 's', long = "store")]
    pub store: PathBuf,
    /// File containing the JSON request body ('-' for stdin)
    #[arg(short = 'b', long = "body")]
    pub body: PathBuf,
    /// Id of the requesting user, available to computed defaults
    #[arg(long)]
    pub user: Option<String>,
    /// Include per-row details in the response
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_mapping(value: &str) -> Result<(String, String), String> {
    let (header, field) = value
        .split_once('=')
        .ok_or_else(|| format!("Mapping '{value}' must look like header=field"))?;
    let header = header.trim();
    if header.is_empty() {
        return Err(format!("Mapping '{value}' has an empty header"));
    }
    Ok((header.to_string(), field.trim().to_string()))
}
