//! ETL Service - Rebuilds the sales star schema from the raw orders extract
//!
//! Pipeline stages:
//! 1. Extract: read the delimited orders file (encoding, decimal mark and
//!    separator are configurable), normalize headers, coerce cell types
//! 2. Transform: derive the six dimension tables and the fact table
//! 3. Quality gate: fatal checks abort the run before anything is written
//! 4. Load: full refresh of the destination schema (truncate + reload)
//!
//! CRITICAL: The pipeline must be DETERMINISTIC and IDEMPOTENT
//! Same input file + same configuration = same star schema, run after run

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate, Weekday};
use clap::Parser;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "etl", about = "Rebuilds the sales star schema from the raw orders extract")]
struct Args {
    /// Path to the delimited orders file (overrides DATA_PATH)
    #[arg(long)]
    input: Option<String>,

    /// Column separator: auto, comma, semicolon, tab, pipe or a literal character (overrides SEP)
    #[arg(long)]
    sep: Option<String>,

    /// Text encoding label, e.g. utf-8 or latin1 (overrides ENCODING)
    #[arg(long)]
    encoding: Option<String>,

    /// Decimal mark used in numeric cells (overrides DECIMAL)
    #[arg(long)]
    decimal: Option<String>,

    /// Dry run - extract and derive tables but don't touch the database
    #[arg(long, default_value = "false")]
    dry_run: bool,
}

// ============================================================================
// Configuration
// ============================================================================

/// Column separator for the orders file.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Separator {
    Auto,
    Byte(u8),
}

impl Separator {
    /// Accepts "auto", spelled-out names and literal single characters.
    fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim().to_lowercase();
        Ok(match value.as_str() {
            "" | "auto" => Separator::Auto,
            "," | "comma" => Separator::Byte(b','),
            ";" | "semicolon" => Separator::Byte(b';'),
            "\t" | "\\t" | "tab" => Separator::Byte(b'\t'),
            "|" | "pipe" => Separator::Byte(b'|'),
            other => {
                let mut chars = other.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii() => Separator::Byte(c as u8),
                    _ => bail!("unsupported separator {:?}", raw),
                }
            }
        })
    }
}

#[derive(Debug, Clone)]
struct Config {
    db_url: Option<String>,
    data_path: String,
    encoding: String,
    decimal: char,
    separator: Separator,
    dry_run: bool,
}

impl Config {
    /// CLI flags win over environment variables, defaults fill the rest.
    fn from_env(args: &Args) -> Result<Self> {
        let data_path = args
            .input
            .clone()
            .or_else(|| std::env::var("DATA_PATH").ok())
            .unwrap_or_else(|| "data/raw/orders.txt".to_string());

        let encoding = args
            .encoding
            .clone()
            .or_else(|| std::env::var("ENCODING").ok())
            .unwrap_or_else(|| "utf-8".to_string());

        let decimal_raw = args
            .decimal
            .clone()
            .or_else(|| std::env::var("DECIMAL").ok())
            .unwrap_or_else(|| ".".to_string());
        let mut decimal_chars = decimal_raw.trim().chars();
        let decimal = match (decimal_chars.next(), decimal_chars.next()) {
            (Some(c), None) => c,
            _ => bail!("DECIMAL must be a single character, got {:?}", decimal_raw),
        };

        let sep_raw = args
            .sep
            .clone()
            .or_else(|| std::env::var("SEP").ok())
            .unwrap_or_else(|| "auto".to_string());

        Ok(Config {
            db_url: std::env::var("DB_URL").ok(),
            data_path,
            encoding,
            decimal,
            separator: Separator::parse(&sep_raw)?,
            dry_run: args.dry_run,
        })
    }
}

// ============================================================================
// Order records (extractor output)
// ============================================================================

/// One line of the raw orders extract after type coercion.
///
/// Every field is optional: a cell that fails to parse becomes None instead
/// of aborting the run. The quality gate decides later which nulls are fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct OrderRecord {
    order_id: Option<String>,
    order_date: Option<NaiveDate>,
    ship_date: Option<NaiveDate>,
    ship_mode: Option<String>,
    customer_id: Option<String>,
    customer_name: Option<String>,
    segment: Option<String>,
    postal_code: Option<String>,
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
    region: Option<String>,
    market: Option<String>,
    market2: Option<String>,
    product_id: Option<String>,
    category: Option<String>,
    sub_category: Option<String>,
    product_name: Option<String>,
    sales: Option<f64>,
    quantity: Option<f64>,
    discount: Option<f64>,
    profit: Option<f64>,
    shipping_cost: Option<f64>,
    order_priority: Option<String>,
}

// ============================================================================
// Extraction
// ============================================================================

/// Lowercases a raw header and replaces every run of non-alphanumeric
/// characters with a single underscore: "Sub-Category" -> "sub_category".
fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%m-%d-%Y", "%d-%m-%Y",
];

/// Tries a fixed list of date formats in order, month-first for the
/// ambiguous ones. Timestamp suffixes are dropped. None if nothing matches.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    if let Some(date) = parse_date_token(value) {
        return Some(date);
    }
    // "2013-01-05 00:00:00" style exports: retry on the date token alone
    if let Some(first) = value.split_whitespace().next() {
        if first != value {
            return parse_date_token(first);
        }
    }
    None
}

/// One token against the format list. date_key packs dates as fixed-width
/// YYYYMMDD integers, so years outside 1000..=9999 parse as None.
fn parse_date_token(value: &str) -> Option<NaiveDate> {
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            if (1000..=9999).contains(&date.year()) {
                return Some(date);
            }
        }
    }
    None
}

/// Parses a numeric cell honoring the configured decimal mark.
/// Unparseable or non-finite values become None.
fn parse_number(raw: &str, decimal: char) -> Option<f64> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }
    let normalized = if decimal == '.' {
        value.to_string()
    } else {
        value.replace(decimal, ".")
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Counts candidate separators outside quoted spans of the header line and
/// picks the most frequent one. Ties resolve in candidate order.
fn detect_separator(text: &str) -> Result<u8> {
    const CANDIDATES: [char; 4] = [',', ';', '\t', '|'];
    let header = text.lines().next().unwrap_or("");
    let mut counts = [0usize; 4];
    let mut in_quotes = false;
    for ch in header.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            if let Some(pos) = CANDIDATES.iter().position(|&c| c == ch) {
                counts[pos] += 1;
            }
        }
    }
    let mut best = 0;
    for i in 1..CANDIDATES.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    if counts[best] == 0 {
        bail!("could not detect a column separator in the header line");
    }
    Ok(CANDIDATES[best] as u8)
}

/// Reads one cell by normalized column name. Missing columns and
/// whitespace-only cells both come back as None.
fn cell(record: &csv::StringRecord, columns: &HashMap<String, usize>, name: &str) -> Option<String> {
    let index = *columns.get(name)?;
    let value = record.get(index)?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parses the decoded orders text into typed records.
///
/// DETERMINISTIC: input order is preserved, malformed cells coerce to None
/// and the discount scale decision is made once over the whole file.
fn extract_orders(text: &str, separator: u8, decimal: char) -> Result<Vec<OrderRecord>> {
    let content = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut columns: HashMap<String, usize> = HashMap::new();
    let headers = reader.headers().context("Failed to read header line")?;
    for (index, header) in headers.iter().enumerate() {
        // first occurrence wins when two headers normalize to the same name
        columns.entry(normalize_header(header)).or_insert(index);
    }

    let mut orders = Vec::new();
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                eprintln!("Warning: skipping unreadable line {}: {}", line + 2, e);
                continue;
            }
        };
        let text_cell = |name: &str| cell(&record, &columns, name);
        let date_cell = |name: &str| cell(&record, &columns, name).and_then(|v| parse_date(&v));
        let num_cell =
            |name: &str| cell(&record, &columns, name).and_then(|v| parse_number(&v, decimal));
        orders.push(OrderRecord {
            order_id: text_cell("order_id"),
            order_date: date_cell("order_date"),
            ship_date: date_cell("ship_date"),
            ship_mode: text_cell("ship_mode"),
            customer_id: text_cell("customer_id"),
            customer_name: text_cell("customer_name"),
            segment: text_cell("segment"),
            postal_code: text_cell("postal_code"),
            city: text_cell("city"),
            state: text_cell("state"),
            country: text_cell("country"),
            region: text_cell("region"),
            market: text_cell("market"),
            market2: text_cell("market2"),
            product_id: text_cell("product_id"),
            category: text_cell("category"),
            sub_category: text_cell("sub_category"),
            product_name: text_cell("product_name"),
            sales: num_cell("sales"),
            quantity: num_cell("quantity"),
            discount: num_cell("discount"),
            profit: num_cell("profit"),
            shipping_cost: num_cell("shipping_cost"),
            order_priority: text_cell("order_priority"),
        });
    }

    if normalize_discounts(&mut orders) {
        println!("  Discount column looks percentage-scaled, divided by 100");
    }
    Ok(orders)
}

/// File-wide discount rescale: if any discount exceeds 1 the whole column is
/// treated as percentages and divided by 100. Returns whether it happened.
fn normalize_discounts(orders: &mut [OrderRecord]) -> bool {
    let max = orders
        .iter()
        .filter_map(|o| o.discount)
        .fold(f64::NEG_INFINITY, f64::max);
    if max > 1.0 {
        for order in orders.iter_mut() {
            if let Some(d) = order.discount.as_mut() {
                *d /= 100.0;
            }
        }
        true
    } else {
        false
    }
}

/// Reads, decodes and parses the orders file.
async fn read_orders(config: &Config) -> Result<Vec<OrderRecord>> {
    let bytes = tokio::fs::read(&config.data_path)
        .await
        .with_context(|| format!("Failed to read {}", config.data_path))?;

    let encoding = encoding_rs::Encoding::for_label(config.encoding.trim().as_bytes())
        .with_context(|| format!("Unknown encoding label {:?}", config.encoding))?;
    let (decoded, _, had_errors) = encoding.decode(&bytes);
    if had_errors {
        eprintln!(
            "⚠ Some bytes were not valid {} and were replaced",
            encoding.name()
        );
    }

    let separator = match config.separator {
        Separator::Byte(b) => b,
        Separator::Auto => detect_separator(&decoded)?,
    };
    println!("  Separator: {:?}", separator as char);

    extract_orders(&decoded, separator, config.decimal)
}

// ============================================================================
// Dimension derivation
// ============================================================================

/// Calendar dimension row, keyed by the date as a yyyymmdd integer.
#[derive(Debug, Clone, PartialEq)]
struct DimDate {
    date_key: i32,
    date: NaiveDate,
    year: i32,
    quarter: i32,
    month: i32,
    day: i32,
    week: i32,
    is_weekend: bool,
    yyyymm: i32,
    yyyyqq: String,
}

#[derive(Debug, Clone, PartialEq)]
struct DimCustomer {
    customer_id: Option<String>,
    customer_name: Option<String>,
    segment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct DimProduct {
    product_id: Option<String>,
    product_name: Option<String>,
    category: Option<String>,
    sub_category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct DimGeography {
    geo_key: String,
    country: Option<String>,
    state: Option<String>,
    city: Option<String>,
    region: Option<String>,
    market: Option<String>,
    market2: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct DimShip {
    ship_mode: Option<String>,
    speed_bucket: String,
}

#[derive(Debug, Clone, PartialEq)]
struct DimPriority {
    priority: Option<String>,
    priority_rank: Option<i32>,
}

/// One sale line at the fact grain (order_id, order_line).
#[derive(Debug, Clone, PartialEq)]
struct FactRow {
    order_id: Option<String>,
    order_line: i32,
    order_date_key: Option<i32>,
    ship_date_key: Option<i32>,
    customer_id: Option<String>,
    product_id: Option<String>,
    geo_key: String,
    ship_mode: Option<String>,
    priority: Option<String>,
    sales: Option<f64>,
    quantity: Option<f64>,
    discount: Option<f64>,
    profit: Option<f64>,
    shipping_cost: Option<f64>,
    shipping_days: Option<i64>,
}

/// The full star schema produced by one pipeline run.
#[derive(Debug, Clone, PartialEq)]
struct TableSet {
    dim_date: Vec<DimDate>,
    dim_customer: Vec<DimCustomer>,
    dim_product: Vec<DimProduct>,
    dim_geography: Vec<DimGeography>,
    dim_ship: Vec<DimShip>,
    dim_priority: Vec<DimPriority>,
    fact_sales: Vec<FactRow>,
}

fn date_key(date: NaiveDate) -> i32 {
    date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32
}

fn dim_date_row(date: NaiveDate) -> DimDate {
    let year = date.year();
    let month = date.month() as i32;
    let quarter = (month - 1) / 3 + 1;
    DimDate {
        date_key: date_key(date),
        date,
        year,
        quarter,
        month,
        day: date.day() as i32,
        week: date.iso_week().week() as i32,
        is_weekend: matches!(date.weekday(), Weekday::Sat | Weekday::Sun),
        yyyymm: year * 100 + month,
        yyyyqq: format!("{}Q{}", year, quarter),
    }
}

/// Shipping speed bucket derived from the raw ship mode label.
fn speed_bucket(ship_mode: Option<&str>) -> &'static str {
    let mode = ship_mode.unwrap_or("").to_lowercase();
    if mode.contains("same") || mode.contains("first") {
        "Express"
    } else if mode.contains("second") {
        "Standard+"
    } else {
        "Standard"
    }
}

/// Priority sort rank: critical=1 .. low=4, anything else unranked.
fn priority_rank(priority: Option<&str>) -> Option<i32> {
    match priority.unwrap_or("").trim().to_lowercase().as_str() {
        "critical" => Some(1),
        "high" => Some(2),
        "medium" => Some(3),
        "low" => Some(4),
        _ => None,
    }
}

/// Surrogate geography key: country|state|city|region with empty strings for
/// missing parts. The fact builder and the dimension builder MUST both go
/// through here so the keys always line up.
fn geo_key(
    country: Option<&str>,
    state: Option<&str>,
    city: Option<&str>,
    region: Option<&str>,
) -> String {
    format!(
        "{}|{}|{}|{}",
        country.unwrap_or(""),
        state.unwrap_or(""),
        city.unwrap_or(""),
        region.unwrap_or("")
    )
}

/// Sort key that puts missing values after everything else.
fn nulls_last(value: &Option<String>) -> (bool, &str) {
    (value.is_none(), value.as_deref().unwrap_or(""))
}

/// Calendar dimension: every distinct order or ship date, order dates first,
/// first appearance wins.
fn build_dim_date(orders: &[OrderRecord]) -> Vec<DimDate> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    let dates = orders
        .iter()
        .filter_map(|o| o.order_date)
        .chain(orders.iter().filter_map(|o| o.ship_date));
    for date in dates {
        if seen.insert(date_key(date)) {
            rows.push(dim_date_row(date));
        }
    }
    rows
}

/// Customer dimension: one row per customer_id.
///
/// Conflicting attribute sets for the same id are resolved by sorting on
/// (customer_id, segment, customer_name) with nulls last and keeping the
/// first row, so the winner never depends on input order.
fn build_dim_customer(orders: &[OrderRecord]) -> Vec<DimCustomer> {
    let mut rows: Vec<DimCustomer> = orders
        .iter()
        .map(|o| DimCustomer {
            customer_id: o.customer_id.clone(),
            customer_name: o.customer_name.clone(),
            segment: o.segment.clone(),
        })
        .collect();
    rows.sort_by(|a, b| {
        (
            nulls_last(&a.customer_id),
            nulls_last(&a.segment),
            nulls_last(&a.customer_name),
        )
            .cmp(&(
                nulls_last(&b.customer_id),
                nulls_last(&b.segment),
                nulls_last(&b.customer_name),
            ))
    });
    let mut seen = HashSet::new();
    rows.retain(|row| seen.insert(row.customer_id.clone()));
    rows
}

/// Product dimension: one row per product_id, same conflict rule as customers.
fn build_dim_product(orders: &[OrderRecord]) -> Vec<DimProduct> {
    let mut rows: Vec<DimProduct> = orders
        .iter()
        .map(|o| DimProduct {
            product_id: o.product_id.clone(),
            product_name: o.product_name.clone(),
            category: o.category.clone(),
            sub_category: o.sub_category.clone(),
        })
        .collect();
    rows.sort_by(|a, b| {
        (
            nulls_last(&a.product_id),
            nulls_last(&a.category),
            nulls_last(&a.sub_category),
            nulls_last(&a.product_name),
        )
            .cmp(&(
                nulls_last(&b.product_id),
                nulls_last(&b.category),
                nulls_last(&b.sub_category),
                nulls_last(&b.product_name),
            ))
    });
    let mut seen = HashSet::new();
    rows.retain(|row| seen.insert(row.product_id.clone()));
    rows
}

/// Geography dimension: first appearance of each composite geo_key wins.
fn build_dim_geography(orders: &[OrderRecord]) -> Vec<DimGeography> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for o in orders {
        let key = geo_key(
            o.country.as_deref(),
            o.state.as_deref(),
            o.city.as_deref(),
            o.region.as_deref(),
        );
        if seen.insert(key.clone()) {
            rows.push(DimGeography {
                geo_key: key,
                country: o.country.clone(),
                state: o.state.clone(),
                city: o.city.clone(),
                region: o.region.clone(),
                market: o.market.clone(),
                market2: o.market2.clone(),
            });
        }
    }
    rows
}

/// Ship dimension: distinct ship modes in first-appearance order.
fn build_dim_ship(orders: &[OrderRecord]) -> Vec<DimShip> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for o in orders {
        if seen.insert(o.ship_mode.clone()) {
            rows.push(DimShip {
                ship_mode: o.ship_mode.clone(),
                speed_bucket: speed_bucket(o.ship_mode.as_deref()).to_string(),
            });
        }
    }
    rows
}

/// Priority dimension: distinct priorities in first-appearance order.
fn build_dim_priority(orders: &[OrderRecord]) -> Vec<DimPriority> {
    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for o in orders {
        if seen.insert(o.order_priority.clone()) {
            rows.push(DimPriority {
                priority: o.order_priority.clone(),
                priority_rank: priority_rank(o.order_priority.as_deref()),
            });
        }
    }
    rows
}

// ============================================================================
// Fact derivation
// ============================================================================

/// Builds the fact table in input order.
///
/// order_line numbers the lines of each order 1..n by first appearance, so
/// the (order_id, order_line) grain is stable across reruns of the same file.
fn build_fact(orders: &[OrderRecord]) -> Vec<FactRow> {
    let mut line_counts: HashMap<Option<&str>, i32> = HashMap::new();
    let mut rows = Vec::with_capacity(orders.len());
    for o in orders {
        let line = line_counts.entry(o.order_id.as_deref()).or_insert(0);
        *line += 1;
        let shipping_days = match (o.order_date, o.ship_date) {
            (Some(ordered), Some(shipped)) => Some((shipped - ordered).num_days()),
            _ => None,
        };
        rows.push(FactRow {
            order_id: o.order_id.clone(),
            order_line: *line,
            order_date_key: o.order_date.map(date_key),
            ship_date_key: o.ship_date.map(date_key),
            customer_id: o.customer_id.clone(),
            product_id: o.product_id.clone(),
            geo_key: geo_key(
                o.country.as_deref(),
                o.state.as_deref(),
                o.city.as_deref(),
                o.region.as_deref(),
            ),
            ship_mode: o.ship_mode.clone(),
            priority: o.order_priority.clone(),
            sales: o.sales,
            quantity: o.quantity,
            discount: o.discount,
            profit: o.profit,
            shipping_cost: o.shipping_cost,
            shipping_days,
        });
    }
    rows
}

/// Derives the complete star schema from the extracted orders.
fn build_tables(orders: &[OrderRecord]) -> TableSet {
    TableSet {
        dim_date: build_dim_date(orders),
        dim_customer: build_dim_customer(orders),
        dim_product: build_dim_product(orders),
        dim_geography: build_dim_geography(orders),
        dim_ship: build_dim_ship(orders),
        dim_priority: build_dim_priority(orders),
        fact_sales: build_fact(orders),
    }
}

// ============================================================================
// Quality gate
// ============================================================================

/// Non-fatal findings surfaced to the operator.
#[derive(Debug, Default, PartialEq)]
struct QualityWarnings {
    ship_before_order: usize,
}

/// Fatal pre-load checks. Any violation aborts the run before the database
/// is touched; warnings are returned for the caller to print.
fn run_quality_checks(orders: &[OrderRecord]) -> Result<QualityWarnings> {
    let null_ids = orders.iter().filter(|o| o.order_id.is_none()).count();
    if null_ids > 0 {
        bail!("quality check failed: {} row(s) with null order_id", null_ids);
    }

    let measures: [(&str, fn(&OrderRecord) -> Option<f64>); 3] = [
        ("sales", |o| o.sales),
        ("profit", |o| o.profit),
        ("quantity", |o| o.quantity),
    ];
    for (name, value) in measures {
        let nulls = orders.iter().filter(|o| value(o).is_none()).count();
        if nulls > 0 {
            bail!("quality check failed: {} row(s) with null {}", nulls, name);
        }
    }

    Ok(QualityWarnings {
        ship_before_order: orders
            .iter()
            .filter(|o| matches!((o.order_date, o.ship_date), (Some(od), Some(sd)) if sd < od))
            .count(),
    })
}

/// Post-build invariant checks: unique dimension keys and every fact foreign
/// key resolvable. A violation here means a builder bug, so the load aborts.
fn verify_tables(tables: &TableSet) -> Result<()> {
    fn unique_keys<T, K: std::hash::Hash + Eq>(
        rows: &[T],
        table: &str,
        key: impl Fn(&T) -> K,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for row in rows {
            if !seen.insert(key(row)) {
                bail!("{}: duplicate dimension key", table);
            }
        }
        Ok(())
    }

    unique_keys(&tables.dim_date, "dim_date", |r| r.date_key)?;
    unique_keys(&tables.dim_customer, "dim_customer", |r| r.customer_id.clone())?;
    unique_keys(&tables.dim_product, "dim_product", |r| r.product_id.clone())?;
    unique_keys(&tables.dim_geography, "dim_geography", |r| r.geo_key.clone())?;
    unique_keys(&tables.dim_ship, "dim_ship", |r| r.ship_mode.clone())?;
    unique_keys(&tables.dim_priority, "dim_priority", |r| r.priority.clone())?;

    let date_keys: HashSet<i32> = tables.dim_date.iter().map(|r| r.date_key).collect();
    let customers: HashSet<&Option<String>> =
        tables.dim_customer.iter().map(|r| &r.customer_id).collect();
    let products: HashSet<&Option<String>> =
        tables.dim_product.iter().map(|r| &r.product_id).collect();
    let geos: HashSet<&String> = tables.dim_geography.iter().map(|r| &r.geo_key).collect();
    let ships: HashSet<&Option<String>> = tables.dim_ship.iter().map(|r| &r.ship_mode).collect();
    let priorities: HashSet<&Option<String>> =
        tables.dim_priority.iter().map(|r| &r.priority).collect();

    for (index, fact) in tables.fact_sales.iter().enumerate() {
        if let Some(k) = fact.order_date_key {
            if !date_keys.contains(&k) {
                bail!("fact_sales[{}]: order_date_key {} not in dim_date", index, k);
            }
        }
        if let Some(k) = fact.ship_date_key {
            if !date_keys.contains(&k) {
                bail!("fact_sales[{}]: ship_date_key {} not in dim_date", index, k);
            }
        }
        if !customers.contains(&fact.customer_id) {
            bail!("fact_sales[{}]: customer_id not in dim_customer", index);
        }
        if !products.contains(&fact.product_id) {
            bail!("fact_sales[{}]: product_id not in dim_product", index);
        }
        if !geos.contains(&fact.geo_key) {
            bail!("fact_sales[{}]: geo_key {:?} not in dim_geography", index, fact.geo_key);
        }
        if !ships.contains(&fact.ship_mode) {
            bail!("fact_sales[{}]: ship_mode not in dim_ship", index);
        }
        if !priorities.contains(&fact.priority) {
            bail!("fact_sales[{}]: priority not in dim_priority", index);
        }
    }
    Ok(())
}

// ============================================================================
// Persistence (full refresh)
// ============================================================================

/// Destination schema. Statements run one at a time in order, so parent
/// tables exist before the fact table references them.
const SCHEMA: [&str; 8] = [
    "CREATE TABLE IF NOT EXISTS dim_date (
        date_key INTEGER PRIMARY KEY,
        date DATE NOT NULL,
        year INTEGER NOT NULL,
        quarter INTEGER NOT NULL,
        month INTEGER NOT NULL,
        day INTEGER NOT NULL,
        week INTEGER NOT NULL,
        is_weekend BOOLEAN NOT NULL,
        yyyymm INTEGER NOT NULL,
        yyyyqq TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS dim_customer (
        customer_id TEXT UNIQUE,
        customer_name TEXT,
        segment TEXT
    )",
    "CREATE TABLE IF NOT EXISTS dim_product (
        product_id TEXT UNIQUE,
        product_name TEXT,
        category TEXT,
        sub_category TEXT
    )",
    "CREATE TABLE IF NOT EXISTS dim_geography (
        geo_key TEXT PRIMARY KEY,
        country TEXT,
        state TEXT,
        city TEXT,
        region TEXT,
        market TEXT,
        market2 TEXT
    )",
    "CREATE TABLE IF NOT EXISTS dim_ship (
        ship_mode TEXT UNIQUE,
        speed_bucket TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS dim_priority (
        priority TEXT UNIQUE,
        priority_rank INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS fact_sales (
        order_id TEXT NOT NULL,
        order_line INTEGER NOT NULL,
        order_date_key INTEGER REFERENCES dim_date(date_key),
        ship_date_key INTEGER REFERENCES dim_date(date_key),
        customer_id TEXT REFERENCES dim_customer(customer_id),
        product_id TEXT REFERENCES dim_product(product_id),
        geo_key TEXT NOT NULL REFERENCES dim_geography(geo_key),
        ship_mode TEXT REFERENCES dim_ship(ship_mode),
        priority TEXT REFERENCES dim_priority(priority),
        sales DOUBLE PRECISION NOT NULL,
        quantity DOUBLE PRECISION NOT NULL,
        discount DOUBLE PRECISION,
        profit DOUBLE PRECISION NOT NULL,
        shipping_cost DOUBLE PRECISION,
        shipping_days BIGINT,
        PRIMARY KEY (order_id, order_line)
    )",
    "CREATE TABLE IF NOT EXISTS etl_runs (
        run_id UUID PRIMARY KEY,
        started_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        finished_at TIMESTAMPTZ,
        status TEXT NOT NULL,
        source_path TEXT NOT NULL,
        detail JSONB NOT NULL DEFAULT '{}',
        error TEXT
    )",
];

async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to create schema")?;
    }
    Ok(())
}

/// Creates an audit row for this run and returns its id.
async fn create_run(pool: &PgPool, source_path: &str) -> Result<Uuid> {
    let run_id = Uuid::new_v4();
    sqlx::query("INSERT INTO etl_runs (run_id, status, source_path) VALUES ($1, 'running', $2)")
        .bind(run_id)
        .bind(source_path)
        .execute(pool)
        .await?;
    Ok(run_id)
}

async fn finish_run(
    pool: &PgPool,
    run_id: Uuid,
    status: &str,
    error: Option<&str>,
    detail: serde_json::Value,
) -> Result<()> {
    sqlx::query(
        "UPDATE etl_runs SET finished_at = now(), status = $1, error = $2, detail = $3 WHERE run_id = $4",
    )
    .bind(status)
    .bind(error)
    .bind(detail)
    .bind(run_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn truncate(pool: &PgPool, table: &str) -> Result<()> {
    sqlx::query(&format!("TRUNCATE TABLE {} RESTART IDENTITY CASCADE", table))
        .execute(pool)
        .await
        .with_context(|| format!("Failed to truncate {}", table))?;
    Ok(())
}

async fn insert_dim_date(pool: &PgPool, rows: &[DimDate]) -> Result<()> {
    for row in rows {
        sqlx::query(
            "INSERT INTO dim_date (date_key, date, year, quarter, month, day, week, is_weekend, yyyymm, yyyyqq)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(row.date_key)
        .bind(row.date)
        .bind(row.year)
        .bind(row.quarter)
        .bind(row.month)
        .bind(row.day)
        .bind(row.week)
        .bind(row.is_weekend)
        .bind(row.yyyymm)
        .bind(&row.yyyyqq)
        .execute(pool)
        .await?;
    }
    Ok(())
}

async fn insert_dim_customer(pool: &PgPool, rows: &[DimCustomer]) -> Result<()> {
    for row in rows {
        sqlx::query(
            "INSERT INTO dim_customer (customer_id, customer_name, segment) VALUES ($1, $2, $3)",
        )
        .bind(row.customer_id.as_deref())
        .bind(row.customer_name.as_deref())
        .bind(row.segment.as_deref())
        .execute(pool)
        .await?;
    }
    Ok(())
}

async fn insert_dim_product(pool: &PgPool, rows: &[DimProduct]) -> Result<()> {
    for row in rows {
        sqlx::query(
            "INSERT INTO dim_product (product_id, product_name, category, sub_category) VALUES ($1, $2, $3, $4)",
        )
        .bind(row.product_id.as_deref())
        .bind(row.product_name.as_deref())
        .bind(row.category.as_deref())
        .bind(row.sub_category.as_deref())
        .execute(pool)
        .await?;
    }
    Ok(())
}

async fn insert_dim_geography(pool: &PgPool, rows: &[DimGeography]) -> Result<()> {
    for row in rows {
        sqlx::query(
            "INSERT INTO dim_geography (geo_key, country, state, city, region, market, market2)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&row.geo_key)
        .bind(row.country.as_deref())
        .bind(row.state.as_deref())
        .bind(row.city.as_deref())
        .bind(row.region.as_deref())
        .bind(row.market.as_deref())
        .bind(row.market2.as_deref())
        .execute(pool)
        .await?;
    }
    Ok(())
}

async fn insert_dim_ship(pool: &PgPool, rows: &[DimShip]) -> Result<()> {
    for row in rows {
        sqlx::query("INSERT INTO dim_ship (ship_mode, speed_bucket) VALUES ($1, $2)")
            .bind(row.ship_mode.as_deref())
            .bind(&row.speed_bucket)
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn insert_dim_priority(pool: &PgPool, rows: &[DimPriority]) -> Result<()> {
    for row in rows {
        sqlx::query("INSERT INTO dim_priority (priority, priority_rank) VALUES ($1, $2)")
            .bind(row.priority.as_deref())
            .bind(row.priority_rank)
            .execute(pool)
            .await?;
    }
    Ok(())
}

async fn insert_fact_sales(pool: &PgPool, rows: &[FactRow]) -> Result<()> {
    for row in rows {
        sqlx::query(
            "INSERT INTO fact_sales (order_id, order_line, order_date_key, ship_date_key, customer_id,
                                     product_id, geo_key, ship_mode, priority, sales, quantity, discount,
                                     profit, shipping_cost, shipping_days)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(row.order_id.as_deref())
        .bind(row.order_line)
        .bind(row.order_date_key)
        .bind(row.ship_date_key)
        .bind(row.customer_id.as_deref())
        .bind(row.product_id.as_deref())
        .bind(&row.geo_key)
        .bind(row.ship_mode.as_deref())
        .bind(row.priority.as_deref())
        .bind(row.sales)
        .bind(row.quantity)
        .bind(row.discount)
        .bind(row.profit)
        .bind(row.shipping_cost)
        .bind(row.shipping_days)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Truncate + reload every table, parents before fact_sales so the foreign
/// keys hold at insert time.
async fn full_refresh(pool: &PgPool, tables: &TableSet) -> Result<()> {
    truncate(pool, "dim_date").await?;
    insert_dim_date(pool, &tables.dim_date).await?;
    println!("  dim_date: {} rows", tables.dim_date.len());

    truncate(pool, "dim_customer").await?;
    insert_dim_customer(pool, &tables.dim_customer).await?;
    println!("  dim_customer: {} rows", tables.dim_customer.len());

    truncate(pool, "dim_product").await?;
    insert_dim_product(pool, &tables.dim_product).await?;
    println!("  dim_product: {} rows", tables.dim_product.len());

    truncate(pool, "dim_geography").await?;
    insert_dim_geography(pool, &tables.dim_geography).await?;
    println!("  dim_geography: {} rows", tables.dim_geography.len());

    truncate(pool, "dim_ship").await?;
    insert_dim_ship(pool, &tables.dim_ship).await?;
    println!("  dim_ship: {} rows", tables.dim_ship.len());

    truncate(pool, "dim_priority").await?;
    insert_dim_priority(pool, &tables.dim_priority).await?;
    println!("  dim_priority: {} rows", tables.dim_priority.len());

    truncate(pool, "fact_sales").await?;
    insert_fact_sales(pool, &tables.fact_sales).await?;
    println!("  fact_sales: {} rows", tables.fact_sales.len());

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::from_env(&args)?;

    println!("=== Sales Star Schema ETL ===");
    println!("Input: {}", config.data_path);
    println!(
        "Encoding: {} | decimal mark: {:?}",
        config.encoding, config.decimal
    );
    if config.dry_run {
        println!("DRY RUN - nothing will be written");
    }

    println!("\n=== Extract ===");
    let orders = read_orders(&config).await?;
    println!("  Extracted {} order line(s)", orders.len());
    if orders.is_empty() {
        eprintln!("⚠ no rows extracted, the refresh will empty every table");
    }

    println!("\n=== Quality gate ===");
    let warnings = run_quality_checks(&orders)?;
    if warnings.ship_before_order > 0 {
        eprintln!(
            "⚠ {} row(s) ship before they were ordered",
            warnings.ship_before_order
        );
    }
    println!("  Fatal checks passed");

    println!("\n=== Transform ===");
    let tables = build_tables(&orders);
    verify_tables(&tables)?;
    println!("  dim_date: {} rows", tables.dim_date.len());
    println!("  dim_customer: {} rows", tables.dim_customer.len());
    println!("  dim_product: {} rows", tables.dim_product.len());
    println!("  dim_geography: {} rows", tables.dim_geography.len());
    println!("  dim_ship: {} rows", tables.dim_ship.len());
    println!("  dim_priority: {} rows", tables.dim_priority.len());
    println!("  fact_sales: {} rows", tables.fact_sales.len());

    let null_order_dates = tables
        .fact_sales
        .iter()
        .filter(|f| f.order_date_key.is_none())
        .count();
    let null_ship_dates = tables
        .fact_sales
        .iter()
        .filter(|f| f.ship_date_key.is_none())
        .count();
    if null_order_dates > 0 {
        eprintln!("⚠ {} fact row(s) with no order date", null_order_dates);
    }
    if null_ship_dates > 0 {
        eprintln!("⚠ {} fact row(s) with no ship date", null_ship_dates);
    }

    if config.dry_run {
        println!("\n=== Dry run - sample records ===");
        for (i, order) in orders.iter().take(3).enumerate() {
            println!("  [{}] {}", i + 1, serde_json::to_string(order)?);
        }
        println!("\nDry run complete - database untouched");
        return Ok(());
    }

    println!("\n=== Load ===");
    let db_url = config.db_url.as_deref().context("DB_URL env var missing")?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("Failed to connect to database")?;
    ensure_schema(&pool).await?;

    let run_id = create_run(&pool, &config.data_path).await?;
    let detail = serde_json::json!({
        "rows_extracted": orders.len(),
        "dim_date": tables.dim_date.len(),
        "dim_customer": tables.dim_customer.len(),
        "dim_product": tables.dim_product.len(),
        "dim_geography": tables.dim_geography.len(),
        "dim_ship": tables.dim_ship.len(),
        "dim_priority": tables.dim_priority.len(),
        "fact_sales": tables.fact_sales.len(),
        "ship_before_order": warnings.ship_before_order,
    });

    match full_refresh(&pool, &tables).await {
        Ok(()) => {
            finish_run(&pool, run_id, "ok", None, detail).await?;
            println!("\n=== ETL complete (run {}) ===", run_id);
        }
        Err(e) => {
            let message = format!("{:#}", e);
            finish_run(&pool, run_id, "failed", Some(&message), detail).await?;
            return Err(e);
        }
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_csv() -> String {
        [
            "Order ID,Order Date,Ship Date,Ship Mode,Customer ID,Customer Name,Segment,Postal Code,City,State,Country,Region,Market,Market2,Product ID,Category,Sub-Category,Product Name,Sales,Quantity,Discount,Profit,Shipping Cost,Order Priority",
            "O1,2013-01-05,2013-01-08,Second Class,C7,Ann Lee,Consumer,00153,Rome,Lazio,Italy,South,EU,EMEA,P1,Office Supplies,Binders,Binder Pro,261.96,2,0.10,41.91,3.55,High",
            "O2,2013-01-05,2013-01-10,Standard Class,C8,Bo Chen,Corporate,,Milan,Lombardy,Italy,South,EU,EMEA,P2,Furniture,Chairs,Chair X,731.94,3,0,219.58,11.20,Medium",
            "O2,2013-01-05,2013-01-10,Standard Class,C8,Bo Chen,Corporate,,Milan,Lombardy,Italy,South,EU,EMEA,P3,Technology,Phones,Phone Y,957.58,5,0.45,-383.03,24.10,Medium",
            "O3,2013-02-11,2013-02-11,Same Day,C7,Ann Lee,Consumer,00153,Rome,Lazio,Italy,South,EU,EMEA,P1,Office Supplies,Binders,Binder Pro,14.62,1,0,6.87,1.20,Critical",
        ]
        .join("\n")
    }

    fn sample_orders() -> Vec<OrderRecord> {
        extract_orders(&sample_csv(), b',', '.').unwrap()
    }

    fn blank_order() -> OrderRecord {
        OrderRecord {
            order_id: Some("O1".to_string()),
            order_date: NaiveDate::from_ymd_opt(2013, 1, 5),
            ship_date: NaiveDate::from_ymd_opt(2013, 1, 8),
            ship_mode: None,
            customer_id: None,
            customer_name: None,
            segment: None,
            postal_code: None,
            city: None,
            state: None,
            country: None,
            region: None,
            market: None,
            market2: None,
            product_id: None,
            category: None,
            sub_category: None,
            product_name: None,
            sales: Some(1.0),
            quantity: Some(1.0),
            discount: None,
            profit: Some(0.5),
            shipping_cost: None,
            order_priority: None,
        }
    }

    fn customer_row(id: &str, name: &str, segment: &str) -> OrderRecord {
        OrderRecord {
            customer_id: Some(id.to_string()),
            customer_name: Some(name.to_string()),
            segment: Some(segment.to_string()),
            ..blank_order()
        }
    }

    fn discount_row(discount: f64) -> OrderRecord {
        OrderRecord {
            discount: Some(discount),
            ..blank_order()
        }
    }

    // ========================================================================
    // DETERMINISM TESTS - same input must always produce the same tables
    // ========================================================================

    #[test]
    fn test_extract_orders_determinism() {
        assert_eq!(sample_orders(), sample_orders());
    }

    #[test]
    fn test_build_tables_determinism() {
        let orders = sample_orders();
        assert_eq!(build_tables(&orders), build_tables(&orders));
    }

    #[test]
    fn test_customer_winner_survives_input_shuffle() {
        let a = vec![
            customer_row("C1", "Zed", "Home Office"),
            customer_row("C1", "Amy", "Consumer"),
        ];
        let b = vec![
            customer_row("C1", "Amy", "Consumer"),
            customer_row("C1", "Zed", "Home Office"),
        ];
        assert_eq!(build_dim_customer(&a), build_dim_customer(&b));
        let dim = build_dim_customer(&a);
        assert_eq!(dim.len(), 1);
        assert_eq!(dim[0].segment.as_deref(), Some("Consumer"));
        assert_eq!(dim[0].customer_name.as_deref(), Some("Amy"));
    }

    #[test]
    fn test_customer_with_missing_segment_loses_to_filled_one() {
        let mut incomplete = customer_row("C2", "Kim", "Consumer");
        incomplete.segment = None;
        let dim = build_dim_customer(&[incomplete, customer_row("C2", "Kim", "Corporate")]);
        assert_eq!(dim.len(), 1);
        assert_eq!(dim[0].segment.as_deref(), Some("Corporate"));
    }

    // ========================================================================
    // HEADER NORMALIZATION TESTS
    // ========================================================================

    #[test]
    fn test_normalize_header_basic() {
        assert_eq!(normalize_header("Order ID"), "order_id");
        assert_eq!(normalize_header("Sub-Category"), "sub_category");
        assert_eq!(normalize_header("Market2"), "market2");
    }

    #[test]
    fn test_normalize_header_collapses_runs_and_trims() {
        assert_eq!(normalize_header("  Ship -- Mode  "), "ship_mode");
        assert_eq!(normalize_header("__Sales__"), "sales");
        assert_eq!(normalize_header("Postal.Code"), "postal_code");
    }

    #[test]
    fn test_header_variants_map_to_the_same_columns() {
        let csv = "order id;ORDER DATE;Sales;Profit;Quantity\nO9;2014-03-02;10.5;2.5;1\n";
        let orders = extract_orders(csv, b';', '.').unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_id.as_deref(), Some("O9"));
        assert_eq!(orders[0].order_date, NaiveDate::from_ymd_opt(2014, 3, 2));
        assert_eq!(orders[0].sales, Some(10.5));
    }

    // ========================================================================
    // SEPARATOR TESTS
    // ========================================================================

    #[test]
    fn test_detect_separator_candidates() {
        assert_eq!(detect_separator("a,b,c\n1,2,3").unwrap(), b',');
        assert_eq!(detect_separator("a;b;c\n").unwrap(), b';');
        assert_eq!(detect_separator("a\tb\tc").unwrap(), b'\t');
        assert_eq!(detect_separator("a|b|c").unwrap(), b'|');
    }

    #[test]
    fn test_detect_separator_ignores_quoted_spans() {
        assert_eq!(detect_separator("\"last, first\";b;c").unwrap(), b';');
    }

    #[test]
    fn test_detect_separator_fails_without_candidates() {
        assert!(detect_separator("just one column").is_err());
    }

    #[test]
    fn test_separator_parse_names() {
        assert_eq!(Separator::parse("auto").unwrap(), Separator::Auto);
        assert_eq!(Separator::parse("comma").unwrap(), Separator::Byte(b','));
        assert_eq!(Separator::parse(";").unwrap(), Separator::Byte(b';'));
        assert_eq!(Separator::parse("TAB").unwrap(), Separator::Byte(b'\t'));
        assert_eq!(Separator::parse("|").unwrap(), Separator::Byte(b'|'));
        assert!(Separator::parse("multi char").is_err());
    }

    // ========================================================================
    // TYPE COERCION TESTS
    // ========================================================================

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2013, 1, 5);
        assert_eq!(parse_date("2013-01-05"), expected);
        assert_eq!(parse_date("2013/01/05"), expected);
        assert_eq!(parse_date("01/05/2013"), expected);
        assert_eq!(parse_date("01-05-2013"), expected);
        assert_eq!(parse_date("2013-01-05 00:00:00"), expected);
        assert_eq!(parse_date("31/01/2013"), NaiveDate::from_ymd_opt(2013, 1, 31));
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_parse_date_rejects_years_outside_the_key_range() {
        assert_eq!(parse_date("+262142-01-01"), None);
        assert_eq!(parse_date("-262142-01-01"), None);
        assert_eq!(parse_date("0500-01-03"), None);
        assert_eq!(parse_date("1000-01-01"), NaiveDate::from_ymd_opt(1000, 1, 1));
        assert_eq!(parse_date("9999-12-31"), NaiveDate::from_ymd_opt(9999, 12, 31));

        let csv = "Order ID,Order Date,Sales,Quantity,Profit\n\
                   O1,+262142-01-01,10,1,2\n";
        let tables = build_tables(&extract_orders(csv, b',', '.').unwrap());
        assert_eq!(tables.fact_sales[0].order_date_key, None);
        assert!(tables.dim_date.is_empty());
    }

    #[test]
    fn test_parse_number_decimal_marks() {
        assert_eq!(parse_number("261.96", '.'), Some(261.96));
        assert_eq!(parse_number("261,96", ','), Some(261.96));
        assert_eq!(parse_number("-383.03", '.'), Some(-383.03));
        assert_eq!(parse_number("", '.'), None);
        assert_eq!(parse_number("n/a", '.'), None);
        assert_eq!(parse_number("NaN", '.'), None);
    }

    #[test]
    fn test_bad_cells_coerce_to_none_without_losing_the_row() {
        let csv = "Order ID,Order Date,Ship Date,Sales,Quantity,Profit,Discount\n\
                   O1,bogus,2013-01-08,abc,2,1.5,0.1\n";
        let orders = extract_orders(csv, b',', '.').unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].order_date, None);
        assert_eq!(orders[0].ship_date, NaiveDate::from_ymd_opt(2013, 1, 8));
        assert_eq!(orders[0].sales, None);
        assert_eq!(orders[0].quantity, Some(2.0));
    }

    #[test]
    fn test_postal_code_keeps_leading_zeros() {
        let orders = sample_orders();
        assert_eq!(orders[0].postal_code.as_deref(), Some("00153"));
    }

    #[test]
    fn test_missing_columns_and_blank_rows() {
        let csv = "Order ID,Sales\nO1,10\n\n   ,  \nO2,20\n";
        let orders = extract_orders(csv, b',', '.').unwrap();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0].customer_id, None);
        assert_eq!(orders[1].order_id, None);
        assert_eq!(orders[1].sales, None);
        assert_eq!(orders[2].order_id.as_deref(), Some("O2"));
        assert!(run_quality_checks(&orders).is_err());
    }

    #[test]
    fn test_utf8_bom_is_stripped_from_the_first_header() {
        let csv = "\u{feff}Order ID,Sales\nO1,10\n";
        let orders = extract_orders(csv, b',', '.').unwrap();
        assert_eq!(orders[0].order_id.as_deref(), Some("O1"));
    }

    // ========================================================================
    // DISCOUNT SCALE TESTS - one decision over the whole file
    // ========================================================================

    #[test]
    fn test_discounts_within_unit_range_stay_untouched() {
        let mut orders = vec![discount_row(0.0), discount_row(0.45), discount_row(1.0)];
        assert!(!normalize_discounts(&mut orders));
        assert_eq!(orders[1].discount, Some(0.45));
    }

    #[test]
    fn test_percent_scaled_discounts_divide_by_100() {
        let mut orders = vec![discount_row(0.0), discount_row(15.0), discount_row(40.0)];
        assert!(normalize_discounts(&mut orders));
        assert_eq!(orders[0].discount, Some(0.0));
        assert_eq!(orders[1].discount, Some(0.15));
        assert_eq!(orders[2].discount, Some(0.4));
    }

    #[test]
    fn test_discount_rescale_skips_missing_values() {
        let mut orders = vec![discount_row(200.0), blank_order()];
        assert!(normalize_discounts(&mut orders));
        assert_eq!(orders[0].discount, Some(2.0));
        assert_eq!(orders[1].discount, None);
    }

    #[test]
    fn test_discount_rescale_with_no_discounts_at_all() {
        let mut orders = vec![blank_order()];
        assert!(!normalize_discounts(&mut orders));
    }

    // ========================================================================
    // DATE DIMENSION TESTS
    // ========================================================================

    #[test]
    fn test_dim_date_covers_order_and_ship_dates_once() {
        let dim = build_dim_date(&sample_orders());
        let keys: Vec<i32> = dim.iter().map(|d| d.date_key).collect();
        assert_eq!(keys, vec![20130105, 20130211, 20130108, 20130110]);
    }

    #[test]
    fn test_dim_date_attributes() {
        let saturday = NaiveDate::from_ymd_opt(2013, 1, 5).unwrap();
        let row = dim_date_row(saturday);
        assert_eq!(row.date_key, 20130105);
        assert_eq!(row.year, 2013);
        assert_eq!(row.quarter, 1);
        assert_eq!(row.month, 1);
        assert_eq!(row.day, 5);
        assert_eq!(row.week, 1);
        assert!(row.is_weekend);
        assert_eq!(row.yyyymm, 201301);
        assert_eq!(row.yyyyqq, "2013Q1");
    }

    #[test]
    fn test_dim_date_iso_week_crosses_year_boundary() {
        // 2014-12-29 is a Monday that already belongs to ISO week 1 of 2015
        let row = dim_date_row(NaiveDate::from_ymd_opt(2014, 12, 29).unwrap());
        assert_eq!(row.week, 1);
        assert_eq!(row.quarter, 4);
        assert_eq!(row.yyyyqq, "2014Q4");
        assert!(!row.is_weekend);
    }

    // ========================================================================
    // GEOGRAPHY TESTS
    // ========================================================================

    #[test]
    fn test_geo_key_joins_with_empty_for_missing() {
        assert_eq!(
            geo_key(Some("Italy"), Some("Lazio"), Some("Rome"), Some("South")),
            "Italy|Lazio|Rome|South"
        );
        assert_eq!(geo_key(None, None, None, None), "|||");
        assert_eq!(geo_key(Some("Italy"), None, Some("Rome"), None), "Italy||Rome|");
    }

    #[test]
    fn test_fact_geo_keys_always_resolve_in_dim_geography() {
        let mut orders = sample_orders();
        orders.push(blank_order());
        let tables = build_tables(&orders);
        let dim_keys: HashSet<&String> =
            tables.dim_geography.iter().map(|g| &g.geo_key).collect();
        for fact in &tables.fact_sales {
            assert!(dim_keys.contains(&fact.geo_key));
        }
        assert!(dim_keys.contains(&"|||".to_string()));
    }

    #[test]
    fn test_dim_geography_keeps_first_attribute_set() {
        let mut first = blank_order();
        first.country = Some("Italy".to_string());
        first.market = Some("EU".to_string());
        let mut second = blank_order();
        second.country = Some("Italy".to_string());
        second.market = Some("EMEA".to_string());
        let dim = build_dim_geography(&[first, second]);
        assert_eq!(dim.len(), 1);
        assert_eq!(dim[0].market.as_deref(), Some("EU"));
    }

    // ========================================================================
    // SHIP SPEED TESTS
    // ========================================================================

    #[test]
    fn test_speed_bucket_mapping() {
        assert_eq!(speed_bucket(Some("Same Day")), "Express");
        assert_eq!(speed_bucket(Some("First Class")), "Express");
        assert_eq!(speed_bucket(Some("SECOND CLASS")), "Standard+");
        assert_eq!(speed_bucket(Some("Standard Class")), "Standard");
        assert_eq!(speed_bucket(Some("Delivery Truck")), "Standard");
        assert_eq!(speed_bucket(None), "Standard");
    }

    #[test]
    fn test_dim_ship_distinct_modes_in_first_appearance_order() {
        let dim = build_dim_ship(&sample_orders());
        assert_eq!(dim.len(), 3);
        assert_eq!(dim[0].ship_mode.as_deref(), Some("Second Class"));
        assert_eq!(dim[0].speed_bucket, "Standard+");
        assert_eq!(dim[2].ship_mode.as_deref(), Some("Same Day"));
        assert_eq!(dim[2].speed_bucket, "Express");
    }

    // ========================================================================
    // PRIORITY TESTS
    // ========================================================================

    #[test]
    fn test_priority_rank_mapping() {
        assert_eq!(priority_rank(Some("Critical")), Some(1));
        assert_eq!(priority_rank(Some("  high ")), Some(2));
        assert_eq!(priority_rank(Some("MEDIUM")), Some(3));
        assert_eq!(priority_rank(Some("low")), Some(4));
        assert_eq!(priority_rank(Some("Rush")), None);
        assert_eq!(priority_rank(None), None);
    }

    #[test]
    fn test_dim_priority_keeps_unranked_labels() {
        let mut orders = sample_orders();
        orders.push(OrderRecord {
            order_priority: Some("Rush".to_string()),
            ..blank_order()
        });
        let dim = build_dim_priority(&orders);
        let rush = dim
            .iter()
            .find(|p| p.priority.as_deref() == Some("Rush"))
            .unwrap();
        assert_eq!(rush.priority_rank, None);
    }

    // ========================================================================
    // FACT TABLE TESTS
    // ========================================================================

    #[test]
    fn test_order_line_numbers_each_order_from_one() {
        let fact = build_fact(&sample_orders());
        let lines: Vec<(Option<&str>, i32)> = fact
            .iter()
            .map(|f| (f.order_id.as_deref(), f.order_line))
            .collect();
        assert_eq!(
            lines,
            vec![
                (Some("O1"), 1),
                (Some("O2"), 1),
                (Some("O2"), 2),
                (Some("O3"), 1)
            ]
        );
    }

    #[test]
    fn test_shipping_days_signed_and_nullable() {
        let fact = build_fact(&sample_orders());
        assert_eq!(fact[0].shipping_days, Some(3));
        assert_eq!(fact[3].shipping_days, Some(0));

        let mut late = blank_order();
        late.order_date = NaiveDate::from_ymd_opt(2013, 5, 10);
        late.ship_date = NaiveDate::from_ymd_opt(2013, 5, 7);
        let mut missing = blank_order();
        missing.ship_date = None;
        let fact = build_fact(&[late, missing]);
        assert_eq!(fact[0].shipping_days, Some(-3));
        assert_eq!(fact[1].shipping_days, None);
        assert_eq!(fact[1].ship_date_key, None);
    }

    #[test]
    fn test_fact_keeps_rows_with_missing_dates() {
        let mut order = blank_order();
        order.order_date = None;
        order.ship_date = None;
        let tables = build_tables(&[order]);
        assert_eq!(tables.fact_sales.len(), 1);
        assert_eq!(tables.fact_sales[0].order_date_key, None);
        assert!(tables.dim_date.is_empty());
        assert!(verify_tables(&tables).is_ok());
    }

    #[test]
    fn test_first_sample_row_end_to_end() {
        let tables = build_tables(&sample_orders());
        let f = &tables.fact_sales[0];
        assert_eq!(f.order_id.as_deref(), Some("O1"));
        assert_eq!(f.order_line, 1);
        assert_eq!(f.order_date_key, Some(20130105));
        assert_eq!(f.ship_date_key, Some(20130108));
        assert_eq!(f.geo_key, "Italy|Lazio|Rome|South");
        assert_eq!(f.discount, Some(0.10));
        assert_eq!(f.shipping_days, Some(3));

        let ship = tables
            .dim_ship
            .iter()
            .find(|s| s.ship_mode.as_deref() == Some("Second Class"))
            .unwrap();
        assert_eq!(ship.speed_bucket, "Standard+");
        let priority = tables
            .dim_priority
            .iter()
            .find(|p| p.priority.as_deref() == Some("High"))
            .unwrap();
        assert_eq!(priority.priority_rank, Some(2));
    }

    // ========================================================================
    // QUALITY GATE TESTS
    // ========================================================================

    #[test]
    fn test_quality_passes_on_clean_input() {
        let warnings = run_quality_checks(&sample_orders()).unwrap();
        assert_eq!(warnings.ship_before_order, 0);
    }

    #[test]
    fn test_quality_fails_on_null_order_id() {
        let mut orders = sample_orders();
        orders[1].order_id = None;
        let err = run_quality_checks(&orders).unwrap_err().to_string();
        assert!(err.contains("order_id"), "unexpected error: {err}");
    }

    #[test]
    fn test_quality_fails_on_null_measures() {
        for field in ["sales", "profit", "quantity"] {
            let mut orders = sample_orders();
            match field {
                "sales" => orders[0].sales = None,
                "profit" => orders[0].profit = None,
                _ => orders[0].quantity = None,
            }
            let err = run_quality_checks(&orders).unwrap_err().to_string();
            assert!(err.contains(field), "error should name {field}: {err}");
        }
    }

    #[test]
    fn test_quality_accepts_an_empty_extract() {
        let orders =
            extract_orders("Order ID,Order Date,Sales,Quantity,Profit\n", b',', '.').unwrap();
        assert!(orders.is_empty());
        let warnings = run_quality_checks(&orders).unwrap();
        assert_eq!(warnings, QualityWarnings::default());
        let tables = build_tables(&orders);
        assert!(tables.fact_sales.is_empty());
        assert!(verify_tables(&tables).is_ok());
    }

    #[test]
    fn test_ship_before_order_is_a_warning_not_an_error() {
        let mut orders = sample_orders();
        orders[0].order_date = NaiveDate::from_ymd_opt(2013, 1, 9);
        let warnings = run_quality_checks(&orders).unwrap();
        assert_eq!(warnings.ship_before_order, 1);
    }

    // ========================================================================
    // TABLE VERIFICATION TESTS
    // ========================================================================

    #[test]
    fn test_verify_accepts_derived_tables() {
        assert!(verify_tables(&build_tables(&sample_orders())).is_ok());
    }

    #[test]
    fn test_verify_rejects_duplicate_dimension_keys() {
        let mut tables = build_tables(&sample_orders());
        let dup = tables.dim_customer[0].clone();
        tables.dim_customer.push(dup);
        assert!(verify_tables(&tables).is_err());
    }

    #[test]
    fn test_verify_rejects_dangling_fact_keys() {
        let mut tables = build_tables(&sample_orders());
        tables.fact_sales[0].geo_key = "nowhere|||".to_string();
        assert!(verify_tables(&tables).is_err());
    }

    // ========================================================================
    // FILE INGEST TESTS
    // ========================================================================

    fn file_config(path: &str) -> Config {
        Config {
            db_url: None,
            data_path: path.to_string(),
            encoding: "utf-8".to_string(),
            decimal: '.',
            separator: Separator::Auto,
            dry_run: true,
        }
    }

    #[tokio::test]
    async fn test_read_orders_detects_separator_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.txt");
        std::fs::write(&path, "Order ID;Sales;Profit;Quantity\nO1;10,5;2,0;1\n").unwrap();
        let mut config = file_config(path.to_str().unwrap());
        config.decimal = ',';
        let orders = read_orders(&config).await.unwrap();
        assert_eq!(orders[0].sales, Some(10.5));
    }

    #[tokio::test]
    async fn test_read_orders_decodes_latin1() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        let mut bytes = b"Order ID,City,Sales,Profit,Quantity\nO1,S".to_vec();
        bytes.push(0xe3); // latin1 encoded a-tilde
        bytes.extend_from_slice(b"o Paulo,1,1,1\n");
        std::fs::write(&path, bytes).unwrap();
        let mut config = file_config(path.to_str().unwrap());
        config.encoding = "latin1".to_string();
        let orders = read_orders(&config).await.unwrap();
        assert_eq!(orders[0].city.as_deref(), Some("São Paulo"));
    }

    #[tokio::test]
    async fn test_read_orders_missing_file_is_fatal() {
        let config = file_config("/nonexistent/orders.csv");
        assert!(read_orders(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_read_orders_rejects_unknown_encoding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.csv");
        std::fs::write(&path, "Order ID,Sales\nO1,1\n").unwrap();
        let mut config = file_config(path.to_str().unwrap());
        config.encoding = "klingon-8".to_string();
        assert!(read_orders(&config).await.is_err());
    }
}
