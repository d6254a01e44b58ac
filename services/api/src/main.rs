//! API Service - Dashboard queries over the sales star schema
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /filters - Distinct values for the dashboard filter controls
//! - GET /kpis - Headline totals for the current selection
//! - GET /sales/monthly - Sales and profit by calendar month
//! - GET /sales/by-category - Sales by product category
//! - GET /sales/by-subcategory - Top sub-categories by sales
//! - GET /profit/by-region - Profit by geographic region
//! - GET /sales/by-ship-speed - Sales by shipping speed bucket
//! - GET /scatter/discount-profit - Discount vs profit sample points
//! - GET /runs - Recent ETL runs

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    pool: PgPool,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct KpiResponse {
    total_sales: f64,
    total_profit: f64,
    margin_pct: Option<f64>,
    total_quantity: f64,
    order_count: i64,
    line_count: i64,
    avg_shipping_days: Option<f64>,
}

#[derive(Serialize)]
struct MonthlyRow {
    yyyymm: i32,
    sales: f64,
    profit: f64,
}

#[derive(Serialize)]
struct CategoryRow {
    category: Option<String>,
    sales: f64,
    profit: f64,
    quantity: f64,
    margin_pct: Option<f64>,
}

#[derive(Serialize)]
struct SubcategoryRow {
    sub_category: Option<String>,
    sales: f64,
    profit: f64,
    margin_pct: Option<f64>,
}

#[derive(Serialize)]
struct RegionRow {
    region: Option<String>,
    sales: f64,
    profit: f64,
    margin_pct: Option<f64>,
}

#[derive(Serialize)]
struct ShipSpeedRow {
    speed_bucket: Option<String>,
    sales: f64,
    profit: f64,
    line_count: i64,
    avg_shipping_days: Option<f64>,
}

#[derive(Serialize)]
struct ScatterPoint {
    discount: f64,
    profit: f64,
    sales: f64,
    category: Option<String>,
    product_name: Option<String>,
    customer_name: Option<String>,
}

#[derive(Serialize)]
struct FiltersResponse {
    markets: Vec<String>,
    regions: Vec<String>,
    segments: Vec<String>,
    categories: Vec<String>,
    ship_modes: Vec<String>,
    priorities: Vec<String>,
    date_min: Option<NaiveDate>,
    date_max: Option<NaiveDate>,
}

#[derive(Serialize, sqlx::FromRow)]
struct RunResponse {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
    source_path: String,
    detail: serde_json::Value,
    error: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Query params and filters
// ============================================================================

/// Query string shared by the dashboard endpoints. The multi-select params
/// take comma-separated lists, e.g. ?market=EU,APAC&segment=Consumer.
#[derive(Deserialize, Default)]
struct DashboardQuery {
    market: Option<String>,
    region: Option<String>,
    segment: Option<String>,
    category: Option<String>,
    ship_mode: Option<String>,
    priority: Option<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    top_n: Option<i64>,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct RunsQuery {
    limit: Option<i64>,
}

/// "EU, APAC" -> ["EU", "APAC"]. Blank entries are dropped.
fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, PartialEq)]
struct FilterSet {
    markets: Vec<String>,
    regions: Vec<String>,
    segments: Vec<String>,
    categories: Vec<String>,
    ship_modes: Vec<String>,
    priorities: Vec<String>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

impl FilterSet {
    fn from_query(params: &DashboardQuery) -> Self {
        FilterSet {
            markets: split_csv(params.market.as_deref()),
            regions: split_csv(params.region.as_deref()),
            segments: split_csv(params.segment.as_deref()),
            categories: split_csv(params.category.as_deref()),
            ship_modes: split_csv(params.ship_mode.as_deref()),
            priorities: split_csv(params.priority.as_deref()),
            from: params.from,
            to: params.to,
        }
    }

    /// Appends one AND clause per active filter, numbering placeholders from
    /// `first`. Returns the SQL fragment and the next free placeholder index.
    /// `bind_filters` must bind values in the same order.
    fn sql(&self, first: usize) -> (String, usize) {
        let mut clauses = String::new();
        let mut idx = first;
        let lists: [(&str, &Vec<String>); 6] = [
            ("g.market", &self.markets),
            ("g.region", &self.regions),
            ("c.segment", &self.segments),
            ("p.category", &self.categories),
            ("f.ship_mode", &self.ship_modes),
            ("f.priority", &self.priorities),
        ];
        for (column, values) in lists {
            if !values.is_empty() {
                clauses.push_str(&format!(" AND {} = ANY(${})", column, idx));
                idx += 1;
            }
        }
        if self.from.is_some() {
            clauses.push_str(&format!(" AND d.date >= ${}", idx));
            idx += 1;
        }
        if self.to.is_some() {
            clauses.push_str(&format!(" AND d.date <= ${}", idx));
            idx += 1;
        }
        (clauses, idx)
    }
}

/// Binds the active filter values in the order `FilterSet::sql` numbered them.
fn bind_filters<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    filters: &FilterSet,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    for values in [
        &filters.markets,
        &filters.regions,
        &filters.segments,
        &filters.categories,
        &filters.ship_modes,
        &filters.priorities,
    ] {
        if !values.is_empty() {
            q = q.bind(values.clone());
        }
    }
    if let Some(from) = filters.from {
        q = q.bind(from);
    }
    if let Some(to) = filters.to {
        q = q.bind(to);
    }
    q
}

/// Shared star join for the dashboard queries. Inner joins, so lines with a
/// null order date, customer id, or product id fall out of every view. Every
/// dimension key is unique, so the join never duplicates fact lines.
const FACT_JOIN: &str = "\
FROM fact_sales f
JOIN dim_date d ON d.date_key = f.order_date_key
JOIN dim_customer c ON c.customer_id = f.customer_id
JOIN dim_product p ON p.product_id = f.product_id
JOIN dim_geography g ON g.geo_key = f.geo_key";

/// Percentage of `part` over `whole`, None when the denominator is zero.
fn safe_pct(part: f64, whole: f64) -> Option<f64> {
    if whole == 0.0 {
        None
    } else {
        Some(part / whole * 100.0)
    }
}

fn internal_error(e: sqlx::Error) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: "0.1.0",
    })
}

async fn kpis_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardQuery>,
) -> impl IntoResponse {
    let filters = FilterSet::from_query(&params);
    let mut query = format!(
        "SELECT COALESCE(SUM(f.sales), 0) AS total_sales,
                COALESCE(SUM(f.profit), 0) AS total_profit,
                COALESCE(SUM(f.quantity), 0) AS total_quantity,
                COUNT(DISTINCT f.order_id) AS order_count,
                COUNT(*) AS line_count,
                AVG(f.shipping_days)::float8 AS avg_shipping_days
         {} WHERE 1=1",
        FACT_JOIN
    );
    let (filter_sql, _) = filters.sql(1);
    query.push_str(&filter_sql);

    let row = bind_filters(sqlx::query(&query), &filters)
        .fetch_one(&state.pool)
        .await;

    match row {
        Ok(row) => {
            use sqlx::Row;
            let total_sales: f64 = row.get("total_sales");
            let total_profit: f64 = row.get("total_profit");
            Json(KpiResponse {
                total_sales,
                total_profit,
                margin_pct: safe_pct(total_profit, total_sales),
                total_quantity: row.get("total_quantity"),
                order_count: row.get("order_count"),
                line_count: row.get("line_count"),
                avg_shipping_days: row.get("avg_shipping_days"),
            })
            .into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn sales_monthly_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardQuery>,
) -> impl IntoResponse {
    let filters = FilterSet::from_query(&params);
    let mut query = format!(
        "SELECT d.yyyymm AS yyyymm, SUM(f.sales) AS sales, SUM(f.profit) AS profit
         {} WHERE 1=1",
        FACT_JOIN
    );
    let (filter_sql, _) = filters.sql(1);
    query.push_str(&filter_sql);
    query.push_str(" GROUP BY d.yyyymm ORDER BY d.yyyymm");

    let rows = bind_filters(sqlx::query(&query), &filters)
        .fetch_all(&state.pool)
        .await;

    match rows {
        Ok(rows) => {
            use sqlx::Row;
            let months: Vec<MonthlyRow> = rows
                .iter()
                .map(|row| MonthlyRow {
                    yyyymm: row.get("yyyymm"),
                    sales: row.get("sales"),
                    profit: row.get("profit"),
                })
                .collect();
            Json(serde_json::json!({ "months": months })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn sales_by_category_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardQuery>,
) -> impl IntoResponse {
    let filters = FilterSet::from_query(&params);
    let mut query = format!(
        "SELECT p.category AS category, SUM(f.sales) AS sales,
                SUM(f.profit) AS profit, SUM(f.quantity) AS quantity
         {} WHERE 1=1",
        FACT_JOIN
    );
    let (filter_sql, _) = filters.sql(1);
    query.push_str(&filter_sql);
    query.push_str(" GROUP BY p.category ORDER BY sales DESC");

    let rows = bind_filters(sqlx::query(&query), &filters)
        .fetch_all(&state.pool)
        .await;

    match rows {
        Ok(rows) => {
            use sqlx::Row;
            let categories: Vec<CategoryRow> = rows
                .iter()
                .map(|row| {
                    let sales: f64 = row.get("sales");
                    let profit: f64 = row.get("profit");
                    CategoryRow {
                        category: row.get("category"),
                        sales,
                        profit,
                        quantity: row.get("quantity"),
                        margin_pct: safe_pct(profit, sales),
                    }
                })
                .collect();
            Json(serde_json::json!({ "categories": categories })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn sales_by_subcategory_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardQuery>,
) -> impl IntoResponse {
    let top_n = params.top_n.unwrap_or(12).clamp(1, 50);
    let filters = FilterSet::from_query(&params);
    let mut query = format!(
        "SELECT p.sub_category AS sub_category, SUM(f.sales) AS sales, SUM(f.profit) AS profit
         {} WHERE 1=1",
        FACT_JOIN
    );
    let (filter_sql, next) = filters.sql(1);
    query.push_str(&filter_sql);
    query.push_str(&format!(
        " GROUP BY p.sub_category ORDER BY sales DESC LIMIT ${}",
        next
    ));

    let rows = bind_filters(sqlx::query(&query), &filters)
        .bind(top_n)
        .fetch_all(&state.pool)
        .await;

    match rows {
        Ok(rows) => {
            use sqlx::Row;
            let subcategories: Vec<SubcategoryRow> = rows
                .iter()
                .map(|row| {
                    let sales: f64 = row.get("sales");
                    let profit: f64 = row.get("profit");
                    SubcategoryRow {
                        sub_category: row.get("sub_category"),
                        sales,
                        profit,
                        margin_pct: safe_pct(profit, sales),
                    }
                })
                .collect();
            Json(serde_json::json!({ "subcategories": subcategories })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn profit_by_region_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardQuery>,
) -> impl IntoResponse {
    let filters = FilterSet::from_query(&params);
    let mut query = format!(
        "SELECT g.region AS region, SUM(f.sales) AS sales, SUM(f.profit) AS profit
         {} WHERE 1=1",
        FACT_JOIN
    );
    let (filter_sql, _) = filters.sql(1);
    query.push_str(&filter_sql);
    // worst regions first
    query.push_str(" GROUP BY g.region ORDER BY profit ASC");

    let rows = bind_filters(sqlx::query(&query), &filters)
        .fetch_all(&state.pool)
        .await;

    match rows {
        Ok(rows) => {
            use sqlx::Row;
            let regions: Vec<RegionRow> = rows
                .iter()
                .map(|row| {
                    let sales: f64 = row.get("sales");
                    let profit: f64 = row.get("profit");
                    RegionRow {
                        region: row.get("region"),
                        sales,
                        profit,
                        margin_pct: safe_pct(profit, sales),
                    }
                })
                .collect();
            Json(serde_json::json!({ "regions": regions })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn sales_by_ship_speed_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardQuery>,
) -> impl IntoResponse {
    let filters = FilterSet::from_query(&params);
    let mut query = format!(
        "SELECT s.speed_bucket AS speed_bucket,
                SUM(f.sales) AS sales, SUM(f.profit) AS profit,
                COUNT(*) AS line_count, AVG(f.shipping_days)::float8 AS avg_shipping_days
         {} LEFT JOIN dim_ship s ON s.ship_mode = f.ship_mode WHERE 1=1",
        FACT_JOIN
    );
    let (filter_sql, _) = filters.sql(1);
    query.push_str(&filter_sql);
    // lines with no ship mode group under a null bucket
    query.push_str(" GROUP BY s.speed_bucket ORDER BY sales DESC");

    let rows = bind_filters(sqlx::query(&query), &filters)
        .fetch_all(&state.pool)
        .await;

    match rows {
        Ok(rows) => {
            use sqlx::Row;
            let buckets: Vec<ShipSpeedRow> = rows
                .iter()
                .map(|row| ShipSpeedRow {
                    speed_bucket: row.get("speed_bucket"),
                    sales: row.get("sales"),
                    profit: row.get("profit"),
                    line_count: row.get("line_count"),
                    avg_shipping_days: row.get("avg_shipping_days"),
                })
                .collect();
            Json(serde_json::json!({ "buckets": buckets })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn scatter_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DashboardQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(2000).clamp(1, 20_000);
    let filters = FilterSet::from_query(&params);
    let mut query = format!(
        "SELECT f.discount AS discount, f.profit AS profit, f.sales AS sales,
                p.category AS category, p.product_name AS product_name,
                c.customer_name AS customer_name
         {} WHERE 1=1",
        FACT_JOIN
    );
    let (filter_sql, next) = filters.sql(1);
    query.push_str(&filter_sql);
    query.push_str(&format!(
        " AND f.discount IS NOT NULL ORDER BY f.order_id, f.order_line LIMIT ${}",
        next
    ));

    let rows = bind_filters(sqlx::query(&query), &filters)
        .bind(limit)
        .fetch_all(&state.pool)
        .await;

    match rows {
        Ok(rows) => {
            use sqlx::Row;
            let points: Vec<ScatterPoint> = rows
                .iter()
                .map(|row| ScatterPoint {
                    discount: row.get("discount"),
                    profit: row.get("profit"),
                    sales: row.get("sales"),
                    category: row.get("category"),
                    product_name: row.get("product_name"),
                    customer_name: row.get("customer_name"),
                })
                .collect();
            Json(serde_json::json!({ "points": points })).into_response()
        }
        Err(e) => internal_error(e),
    }
}

async fn distinct_values(pool: &PgPool, sql: &str) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(sql).fetch_all(pool).await?;
    Ok(rows.into_iter().map(|(v,)| v).collect())
}

async fn load_filter_options(pool: &PgPool) -> Result<FiltersResponse, sqlx::Error> {
    let markets = distinct_values(
        pool,
        "SELECT DISTINCT market FROM dim_geography WHERE market IS NOT NULL ORDER BY market",
    )
    .await?;
    let regions = distinct_values(
        pool,
        "SELECT DISTINCT region FROM dim_geography WHERE region IS NOT NULL ORDER BY region",
    )
    .await?;
    let segments = distinct_values(
        pool,
        "SELECT DISTINCT segment FROM dim_customer WHERE segment IS NOT NULL ORDER BY segment",
    )
    .await?;
    let categories = distinct_values(
        pool,
        "SELECT DISTINCT category FROM dim_product WHERE category IS NOT NULL ORDER BY category",
    )
    .await?;
    let ship_modes = distinct_values(
        pool,
        "SELECT ship_mode FROM dim_ship WHERE ship_mode IS NOT NULL ORDER BY ship_mode",
    )
    .await?;
    let priorities = distinct_values(
        pool,
        "SELECT priority FROM dim_priority WHERE priority IS NOT NULL
         ORDER BY priority_rank NULLS LAST, priority",
    )
    .await?;
    // order-date bounds, not ship dates, since the filters constrain d.date
    let (date_min, date_max): (Option<NaiveDate>, Option<NaiveDate>) = sqlx::query_as(
        "SELECT MIN(d.date), MAX(d.date)
         FROM dim_date d JOIN fact_sales f ON f.order_date_key = d.date_key",
    )
    .fetch_one(pool)
    .await?;
    Ok(FiltersResponse {
        markets,
        regions,
        segments,
        categories,
        ship_modes,
        priorities,
        date_min,
        date_max,
    })
}

async fn filters_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match load_filter_options(&state.pool).await {
        Ok(options) => Json(options).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn runs_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RunsQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(20).min(100);
    let runs: Result<Vec<RunResponse>, _> = sqlx::query_as(
        "SELECT run_id, started_at, finished_at, status, source_path, detail, error
         FROM etl_runs ORDER BY started_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(&state.pool)
    .await;

    match runs {
        Ok(r) => Json(serde_json::json!({ "runs": r })).into_response(),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let db_url = std::env::var("DB_URL").context("DB_URL env var missing")?;
    let bind = std::env::var("API_BIND").unwrap_or_else(|_| "127.0.0.1:8080".to_string());

    println!("=== Sales Dashboard API ===");
    println!("Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&db_url)
        .await
        .context("Failed to connect to database")?;

    println!("Database connected");

    let state = Arc::new(AppState { pool });

    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/filters", get(filters_handler))
        .route("/kpis", get(kpis_handler))
        .route("/sales/monthly", get(sales_monthly_handler))
        .route("/sales/by-category", get(sales_by_category_handler))
        .route("/sales/by-subcategory", get(sales_by_subcategory_handler))
        .route("/profit/by-region", get(profit_by_region_handler))
        .route("/sales/by-ship-speed", get(sales_by_ship_speed_handler))
        .route("/scatter/discount-profit", get(scatter_handler))
        .route("/runs", get(runs_handler))
        .layer(cors)
        .with_state(state);

    println!("API listening on http://{}", bind);
    println!("\nEndpoints:");
    println!("  GET /health");
    println!("  GET /filters");
    println!("  GET /kpis");
    println!("  GET /sales/monthly");
    println!("  GET /sales/by-category");
    println!("  GET /sales/by-subcategory?top_n=");
    println!("  GET /profit/by-region");
    println!("  GET /sales/by-ship-speed");
    println!("  GET /scatter/discount-profit?limit=");
    println!("  GET /runs?limit=");
    println!("\nDashboard endpoints share: market=&region=&segment=&category=&ship_mode=&priority=&from=&to=");

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_csv_trims_and_drops_blanks() {
        assert_eq!(split_csv(Some(" EU , APAC ,,")), vec!["EU", "APAC"]);
        assert_eq!(split_csv(Some("South")), vec!["South"]);
        assert!(split_csv(Some("  ")).is_empty());
        assert!(split_csv(None).is_empty());
    }

    #[test]
    fn test_filter_set_from_query() {
        let params = DashboardQuery {
            market: Some("EU".to_string()),
            region: Some("South,North".to_string()),
            ..Default::default()
        };
        let filters = FilterSet::from_query(&params);
        assert_eq!(filters.markets, vec!["EU"]);
        assert_eq!(filters.regions, vec!["South", "North"]);
        assert!(filters.segments.is_empty());
        assert_eq!(filters.from, None);
    }

    #[test]
    fn test_filter_sql_empty_without_filters() {
        let (sql, next) = FilterSet::default().sql(1);
        assert_eq!(sql, "");
        assert_eq!(next, 1);
    }

    #[test]
    fn test_filter_sql_numbers_placeholders_in_order() {
        let filters = FilterSet {
            markets: vec!["EU".to_string()],
            segments: vec!["Consumer".to_string()],
            from: NaiveDate::from_ymd_opt(2013, 1, 1),
            ..Default::default()
        };
        let (sql, next) = filters.sql(1);
        assert_eq!(
            sql,
            " AND g.market = ANY($1) AND c.segment = ANY($2) AND d.date >= $3"
        );
        assert_eq!(next, 4);
    }

    #[test]
    fn test_filter_sql_counts_from_the_given_index() {
        let filters = FilterSet {
            categories: vec!["Furniture".to_string()],
            to: NaiveDate::from_ymd_opt(2014, 12, 31),
            ..Default::default()
        };
        let (sql, next) = filters.sql(5);
        assert_eq!(sql, " AND p.category = ANY($5) AND d.date <= $6");
        assert_eq!(next, 7);
    }

    #[test]
    fn test_filter_sql_date_bounds() {
        let filters = FilterSet {
            from: NaiveDate::from_ymd_opt(2013, 1, 1),
            to: NaiveDate::from_ymd_opt(2013, 12, 31),
            ..Default::default()
        };
        let (sql, next) = filters.sql(1);
        assert_eq!(sql, " AND d.date >= $1 AND d.date <= $2");
        assert_eq!(next, 3);
    }

    #[test]
    fn test_safe_pct() {
        assert_eq!(safe_pct(50.0, 200.0), Some(25.0));
        assert_eq!(safe_pct(-20.0, 100.0), Some(-20.0));
        assert_eq!(safe_pct(1.0, 0.0), None);
    }
}
