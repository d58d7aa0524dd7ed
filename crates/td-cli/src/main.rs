//! # td: TANDEM command line
//!
//! Thin client for a running `td-hub`.
//!
//! - `td capabilities`: fields each platform can answer.
//! - `td query -m clicks -d query --start .. --end ..`: run a unified query.
//! - `td tool <name> --arg key=value`: run a report preset.
//! - `td dashboard week`: combined report for a fixed period.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use tabled::{builder::Builder, settings::Style, Table, Tabled};
use td_core::{FilterConstraint, OrderBy, PlatformId, SortDirection};

#[derive(Parser)]
#[command(name = "td", version, about = "TANDEM unified analytics client", long_about = None)]
struct Cli {
    /// Base URL of the td-hub service.
    #[arg(long, env = "TD_BASE_URL", default_value = "http://127.0.0.1:3000", global = true)]
    base_url: String,

    /// Print the raw JSON response instead of tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Service liveness and configured platforms.
    Status,

    /// List the dimensions and metrics each platform supports.
    Capabilities,

    /// Run a unified query.
    Query(QueryArgs),

    /// List report presets.
    Tools,

    /// Run a report preset.
    Tool {
        name: String,
        /// Argument as key=value; values that parse as JSON are sent as JSON.
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
        /// All arguments as one JSON object.
        #[arg(long, conflicts_with = "args")]
        args_json: Option<String>,
    },

    /// Combined report for today, yesterday, week or month.
    Dashboard { period: String },
}

#[derive(clap::Args)]
struct QueryArgs {
    #[arg(long)]
    start: NaiveDate,
    #[arg(long)]
    end: NaiveDate,
    #[arg(short, long = "dimension", value_delimiter = ',')]
    dimensions: Vec<String>,
    #[arg(short, long = "metric", value_delimiter = ',', required = true)]
    metrics: Vec<String>,
    /// `field=value` for equality, `field=a|b` for inclusion.
    #[arg(short, long = "filter", value_name = "FIELD=VALUE")]
    filters: Vec<String>,
    /// `field` or `field:desc`.
    #[arg(short, long = "order-by", value_name = "FIELD[:DIR]")]
    order_by: Vec<String>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, default_value_t = 0)]
    offset: usize,
    #[arg(short, long = "target")]
    targets: Vec<PlatformId>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let client = reqwest::Client::new();
    let base = cli.base_url.trim_end_matches('/');

    match cli.command {
        Commands::Status => {
            let body = get(&client, &format!("{}/api/status", base)).await?;
            if cli.json {
                return print_json(&body);
            }
            println!(
                "{} v{} up {}s, platforms: {}",
                text(&body["status"]),
                text(&body["version"]),
                text(&body["uptime_secs"]),
                body["platforms"]
                    .as_array()
                    .map(|ps| ps.iter().map(text).collect::<Vec<_>>().join(", "))
                    .unwrap_or_default()
            );
        }

        Commands::Capabilities => {
            let body = get(&client, &format!("{}/api/capabilities", base)).await?;
            if cli.json {
                return print_json(&body);
            }
            println!("{}", capabilities_table(&body));
        }

        Commands::Query(args) => {
            let payload = query_body(&args)?;
            let body = post(&client, &format!("{}/api/query", base), &payload).await?;
            if cli.json {
                return print_json(&body);
            }
            print_result(&body);
        }

        Commands::Tools => {
            let body = get(&client, &format!("{}/api/tools", base)).await?;
            if cli.json {
                return print_json(&body);
            }
            let mut builder = Builder::default();
            builder.push_record(["tool", "description"]);
            for tool in body.as_array().into_iter().flatten() {
                builder.push_record([text(&tool["name"]), text(&tool["description"])]);
            }
            println!("{}", builder.build().with(Style::modern()));
        }

        Commands::Tool {
            name,
            args,
            args_json,
        } => {
            let payload = match args_json {
                Some(raw) => serde_json::from_str(&raw).context("--args-json is not valid JSON")?,
                None => tool_args(&args)?,
            };
            let body = post(&client, &format!("{}/api/tools/{}", base, name), &payload).await?;
            if cli.json {
                return print_json(&body);
            }
            print_output(&body);
        }

        Commands::Dashboard { period } => {
            let body = get(&client, &format!("{}/api/dashboards/{}", base, period)).await?;
            if cli.json {
                return print_json(&body);
            }
            print_output(&body);
        }
    }
    Ok(())
}

// =============================================================================
// HTTP
// =============================================================================

async fn get(client: &reqwest::Client, url: &str) -> Result<Value> {
    read(client.get(url).send().await.with_context(|| format!("GET {}", url))?).await
}

async fn post(client: &reqwest::Client, url: &str, payload: &Value) -> Result<Value> {
    let resp = client
        .post(url)
        .json(payload)
        .send()
        .await
        .with_context(|| format!("POST {}", url))?;
    read(resp).await
}

async fn read(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let raw = resp.text().await.context("failed to read response body")?;
    parse_body(status, &raw)
}

/// Error bodies that are not JSON (proxies, framework rejections) are
/// reported verbatim with their status.
fn parse_body(status: StatusCode, raw: &str) -> Result<Value> {
    let body = serde_json::from_str::<Value>(raw);
    if !status.is_success() {
        match body {
            Ok(body) if body.get("error").is_some() => {
                bail!("{} ({}): {}", status, text(&body["kind"]), text(&body["error"]))
            }
            _ => bail!("{}: {}", status, raw.trim()),
        }
    }
    body.context("response is not JSON")
}

// =============================================================================
// Request building
// =============================================================================

fn query_body(args: &QueryArgs) -> Result<Value> {
    let mut filters = Map::new();
    for raw in &args.filters {
        let (field, constraint) = parse_filter(raw)?;
        filters.insert(field, serde_json::to_value(constraint)?);
    }
    let order_by = args
        .order_by
        .iter()
        .map(|raw| parse_order(raw))
        .collect::<Result<Vec<_>>>()?;

    let mut body = json!({
        "start_date": args.start,
        "end_date": args.end,
        "dimensions": args.dimensions,
        "metrics": args.metrics,
        "filters": filters,
        "order_by": order_by,
        "offset": args.offset,
        "targets": args.targets,
    });
    if let Some(limit) = args.limit {
        body["limit"] = json!(limit);
    }
    Ok(body)
}

fn parse_filter(raw: &str) -> Result<(String, FilterConstraint)> {
    let Some((field, value)) = raw.split_once('=') else {
        bail!("filter '{}' must be FIELD=VALUE", raw);
    };
    let field = field.trim();
    if field.is_empty() {
        bail!("filter '{}' has no field", raw);
    }
    let constraint = if value.contains('|') {
        FilterConstraint::In(value.split('|').map(str::to_string).collect())
    } else {
        FilterConstraint::Equals(value.to_string())
    };
    Ok((field.to_string(), constraint))
}

fn parse_order(raw: &str) -> Result<OrderBy> {
    let (field, direction) = match raw.split_once(':') {
        None => (raw, SortDirection::Ascending),
        Some((field, "asc" | "ascending")) => (field, SortDirection::Ascending),
        Some((field, "desc" | "descending")) => (field, SortDirection::Descending),
        Some((_, other)) => bail!("unknown sort direction '{}'", other),
    };
    Ok(OrderBy {
        field: field.to_string(),
        direction,
    })
}

fn tool_args(pairs: &[String]) -> Result<Value> {
    let mut args = Map::new();
    for raw in pairs {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("tool argument '{}' must be KEY=VALUE", raw);
        };
        // Dates must stay strings; everything else may be a JSON literal.
        let value = match serde_json::from_str::<Value>(value) {
            Ok(v) if !v.is_string() => v,
            _ => Value::String(value.to_string()),
        };
        args.insert(key.to_string(), value);
    }
    Ok(Value::Object(args))
}

// =============================================================================
// Rendering
// =============================================================================

#[derive(Tabled)]
struct FieldLine {
    platform: String,
    role: &'static str,
    field: String,
    native: String,
    #[tabled(rename = "type")]
    field_type: String,
}

fn capabilities_table(body: &Value) -> String {
    let mut lines = Vec::new();
    for platform in body.as_array().into_iter().flatten() {
        for (role, key) in [("dimension", "dimensions"), ("metric", "metrics")] {
            for field in platform[key].as_array().into_iter().flatten() {
                lines.push(FieldLine {
                    platform: text(&platform["platform"]),
                    role,
                    field: text(&field["name"]),
                    native: text(&field["native"]),
                    field_type: text(&field["field_type"]),
                });
            }
        }
    }
    Table::new(lines).with(Style::modern()).to_string()
}

/// Rows as a table: `platform` first, then every field in first-seen order.
fn rows_table(rows: &[Value]) -> String {
    let mut columns = vec!["platform".to_string()];
    for row in rows {
        for key in row.as_object().into_iter().flat_map(|o| o.keys()) {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut builder = Builder::default();
    builder.push_record(columns.clone());
    for row in rows {
        builder.push_record(columns.iter().map(|c| text(&row[c.as_str()])));
    }
    builder.build().with(Style::modern()).to_string()
}

fn print_result(body: &Value) {
    let rows = body["rows"].as_array().map(Vec::as_slice).unwrap_or_default();
    println!("{}", rows_table(rows));
    println!(
        "{} of {} rows{}",
        rows.len(),
        text(&body["total_rows"]),
        if body["truncated"].as_bool() == Some(true) {
            " (truncated)"
        } else {
            ""
        }
    );
    for failure in body["status"]["degraded"].as_array().into_iter().flatten() {
        println!(
            "degraded: {} ({}): {}",
            text(&failure["platform"]),
            text(&failure["kind"]),
            text(&failure["message"])
        );
    }
}

/// Tool and dashboard output: a single result, or nested report sections.
fn print_output(body: &Value) {
    if body.get("rows").is_some() && body.get("platforms").is_some() {
        print_result(body);
    } else {
        print_sections(body, "");
    }
}

fn print_sections(value: &Value, path: &str) {
    let Some(object) = value.as_object() else {
        return;
    };
    match object.get("status").and_then(Value::as_str) {
        Some("ok") => {
            println!("== {}", path);
            let rows = object["rows"].as_array().map(Vec::as_slice).unwrap_or_default();
            println!("{}", rows_table(rows));
            return;
        }
        Some("failed") => {
            println!("== {}", path);
            println!("failed ({}): {}", text(&object["kind"]), text(&object["error"]));
            return;
        }
        _ => {}
    }
    for (key, child) in object {
        if child.is_object() && key != "date_range" {
            let path = if path.is_empty() {
                key.clone()
            } else {
                format!("{} / {}", path, key)
            };
            print_sections(child, &path);
        } else if !child.is_object() && !child.is_null() {
            println!("{}: {}", key, text(child));
        }
    }
}

fn print_json(body: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

fn text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
