use bqchain::config::{default_credentials_path, parse_param, DEFAULT_API_BASE_URL};
use bqchain::{
    run_in_order, BqClient, CancellationToken, Config, Destination, QueryDef, QueryLoader,
    QueryRunner, RenderedQuery, ResultSet, Result,
};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use futures::StreamExt;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tabled::builder::Builder;
use tabled::settings::Style;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bqchain")]
#[command(about = "Run BigQuery query jobs and chain them in order", long_about = None)]
#[command(version)]
struct Cli {
    /// Account whose gcloud credentials sign requests
    #[arg(long, global = true, env = "BQCHAIN_ACCOUNT")]
    account: Option<String>,

    /// Project that owns the jobs and destination tables
    #[arg(long, global = true, env = "BQCHAIN_PROJECT")]
    project: Option<String>,

    /// Print queries instead of running them
    #[arg(long, global = true, env = "BQCHAIN_DRY_RUN")]
    dry_run: bool,

    /// Template parameter, repeatable
    #[arg(short = 'p', long = "param", global = true, value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// gcloud credentials file
    #[arg(long, global = true, env = "BQCHAIN_CREDENTIALS")]
    credentials: Option<PathBuf>,

    #[arg(long, global = true, env = "BQCHAIN_API_URL", default_value = DEFAULT_API_BASE_URL)]
    api_url: String,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every query of a pipeline manifest, in order
    Run {
        pipeline: PathBuf,

        /// Run only these queries (keeps pipeline order)
        #[arg(long)]
        only: Vec<String>,
    },
    /// Run one query; prefix with @ to read SQL from a file
    Query {
        sql: String,

        #[arg(long)]
        dataset: Option<String>,

        #[arg(long)]
        table: Option<String>,
    },
    /// Show the rendered queries and destinations of a pipeline
    List { pipeline: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;

    match cli.command {
        Commands::Run { pipeline, only } => {
            let pipeline = QueryLoader::new().load_pipeline(&pipeline)?;
            let pipeline = if only.is_empty() {
                pipeline
            } else {
                pipeline.select(&only)?
            };
            let queries = pipeline.render(&config.params)?;
            run_queries(config, &queries, cli.format).await
        }
        Commands::Query {
            sql,
            dataset,
            table,
        } => {
            let sql = match sql.strip_prefix('@') {
                Some(path) => std::fs::read_to_string(path)?,
                None => sql,
            };
            let query = adhoc_query(sql, dataset, table).render(&config.params)?;
            run_queries(config, std::slice::from_ref(&query), cli.format).await
        }
        Commands::List { pipeline } => {
            let pipeline = QueryLoader::new().load_pipeline(&pipeline)?;
            let queries = pipeline.render(&config.params)?;

            let mut builder = Builder::default();
            builder.push_record(["name", "destination", "description"]);
            for (def, query) in pipeline.queries.iter().zip(&queries) {
                builder.push_record([
                    query.name.clone(),
                    destination_label(query.destination.as_ref()),
                    def.description.clone().unwrap_or_default(),
                ]);
            }
            let mut table = builder.build();
            table.with(Style::rounded());
            println!("{}", table);
            Ok(())
        }
    }
}

/// A one-off query from the command line, held to the same destination rule as pipeline queries.
fn adhoc_query(sql: String, dataset: Option<String>, table: Option<String>) -> QueryDef {
    QueryDef {
        name: "query".to_string(),
        description: None,
        sql,
        destination_dataset: dataset,
        destination_table: table,
    }
}

fn build_config(cli: &Cli) -> Result<Config> {
    let params = cli
        .params
        .iter()
        .map(|raw| parse_param(raw))
        .collect::<Result<BTreeMap<_, _>>>()?;

    let config = Config::new(
        cli.account.clone().unwrap_or_default(),
        cli.project.clone().unwrap_or_default(),
    )
    .with_dry_run(cli.dry_run)
    .with_params(params)
    .with_credentials_path(
        cli.credentials
            .clone()
            .unwrap_or_else(default_credentials_path),
    )
    .with_api_base_url(cli.api_url.clone());

    config.validate()?;
    Ok(config)
}

async fn run_queries(config: Config, queries: &[RenderedQuery], format: OutputFormat) -> Result<()> {
    let dry_run = config.dry_run;
    let client = Arc::new(BqClient::new(Arc::new(config))?);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    let runner = QueryRunner::new(client).with_cancellation(cancel);
    let runner = &runner;
    let ops = queries
        .iter()
        .map(|query| move || runner.run_rendered(query));

    let outcomes = run_in_order(ops);
    futures::pin_mut!(outcomes);

    let mut remaining = queries.iter();
    while let Some(outcome) = outcomes.next().await {
        let outcome = outcome?;
        let Some(query) = remaining.next() else {
            break;
        };

        if dry_run {
            print_dry_run(query);
            continue;
        }

        println!(
            "{} {} {}",
            "✓".green(),
            query.name.bold(),
            destination_label(query.destination.as_ref()).dimmed()
        );
        if let Some(results) = outcome {
            print_results(&results, format)?;
        }
    }
    Ok(())
}

fn print_dry_run(query: &RenderedQuery) {
    println!();
    println!("{} {}", "Query dry run:".yellow().bold(), query.name);
    println!("{}", query.sql.trim_end());
    if let Some(dest) = &query.destination {
        println!("--> [{}]", dest);
    }
}

fn print_results(results: &ResultSet, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", results.to_json_pretty()?),
        OutputFormat::Table => {
            let mut builder = Builder::default();
            builder.push_record(results.fields.iter().cloned());
            for row in &results.rows {
                builder.push_record(row.values().map(cell_text));
            }
            let mut table = builder.build();
            table.with(Style::rounded());
            println!("{}", table);
        }
    }
    Ok(())
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn destination_label(destination: Option<&Destination>) -> String {
    match destination {
        Some(dest) => format!("--> [{}]", dest),
        None => "(inline)".to_string(),
    }
}
