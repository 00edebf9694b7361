use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use sqlx::PgPool;
use time::{Date, Duration, OffsetDateTime};

use aquabill_core::{
    aggregate::{self, Period, Sample, UsageChart},
    billing::{self, BillDecision},
    db::{bill_queries, usage_queries},
    domain::Bill,
};

/// Customer-facing read/ensure surface. Each request recomputes from a fresh
/// storage snapshot; refresh cadence is the client's concern.
#[derive(Clone)]
pub struct ApiState {
    pub pool: PgPool,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/accounts/:account_id/usage/chart", get(usage_chart))
        .route("/accounts/:account_id/billing/summary", get(billing_summary))
        .route("/accounts/:account_id/bills", get(list_bills))
        .route("/accounts/:account_id/bills/ensure", post(ensure_bill))
        .route("/bills/:bill_number/paid", post(bill_paid))
        .with_state(state)
}

#[derive(serde::Deserialize)]
pub struct ChartParams {
    period: Period,
    /// Injectable "now" for reproducible charts; defaults to the wall clock.
    #[serde(default, with = "time::serde::rfc3339::option")]
    reference: Option<OffsetDateTime>,
}

#[derive(serde::Serialize)]
pub struct BillingSummary {
    pub current_cycle_liters: f64,
    pub current_cycle_amount: f64,
    pub unpaid_previous_amount: f64,
    pub total_due: f64,
    pub due_on: Date,
}

#[derive(serde::Serialize)]
struct EnsureBillResponse {
    status: &'static str,
    bill_number: Option<String>,
}

fn internal(e: anyhow::Error) -> StatusCode {
    tracing::error!(error = %e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

/// Widest window any chart needs: the reference month plus the whole previous
/// month never spans more than 62 days.
const CHART_LOOKBACK_DAYS: i64 = 62;

fn sanitize_logged(account_id: &str, readings: &[aquabill_core::domain::UsageReading]) -> Vec<Sample> {
    let (samples, warnings) = aggregate::sanitize(readings);
    if !warnings.is_empty() {
        tracing::warn!(
            account_id,
            count = warnings.len(),
            "clamped malformed stored readings"
        );
    }
    samples
}

/// Bounded fetch for charts, which only ever look at the reference period and
/// the one before it.
async fn fetch_chart_samples(
    pool: &PgPool,
    account_id: &str,
    reference: OffsetDateTime,
) -> anyhow::Result<Vec<Sample>> {
    let readings = usage_queries::account_readings(
        pool,
        account_id,
        reference - Duration::days(CHART_LOOKBACK_DAYS),
        reference + Duration::days(1),
    )
    .await?;
    Ok(sanitize_logged(account_id, &readings))
}

/// Unbounded fetch for the summary path: the current cycle anchors on the
/// newest reading even when the feed has been idle for months.
async fn fetch_history(pool: &PgPool, account_id: &str) -> anyhow::Result<Vec<Sample>> {
    let readings = usage_queries::account_history(pool, account_id).await?;
    Ok(sanitize_logged(account_id, &readings))
}

async fn usage_chart(
    State(state): State<ApiState>,
    Path(account_id): Path<String>,
    Query(params): Query<ChartParams>,
) -> Result<Json<UsageChart>, StatusCode> {
    let reference = params.reference.unwrap_or_else(OffsetDateTime::now_utc);
    let samples = fetch_chart_samples(&state.pool, &account_id, reference)
        .await
        .map_err(internal)?;
    Ok(Json(aggregate::usage_chart(&samples, params.period, reference)))
}

fn summarize(samples: &[Sample], bills: &[Bill], today: Date) -> BillingSummary {
    let current_cycle_liters = aggregate::current_cycle_liters(samples);
    BillingSummary {
        current_cycle_liters,
        current_cycle_amount: billing::amount_for_liters(current_cycle_liters),
        unpaid_previous_amount: billing::unpaid_amount(bills),
        total_due: billing::current_bill_amount(current_cycle_liters, bills),
        due_on: billing::first_of_next_month(today),
    }
}

async fn billing_summary(
    State(state): State<ApiState>,
    Path(account_id): Path<String>,
) -> Result<Json<BillingSummary>, StatusCode> {
    let now = OffsetDateTime::now_utc();
    let samples = fetch_history(&state.pool, &account_id)
        .await
        .map_err(internal)?;
    let bills = bill_queries::account_bills(&state.pool, &account_id)
        .await
        .map_err(internal)?;
    Ok(Json(summarize(&samples, &bills, now.date())))
}

async fn list_bills(
    State(state): State<ApiState>,
    Path(account_id): Path<String>,
) -> Result<Json<Vec<Bill>>, StatusCode> {
    let bills = bill_queries::account_bills(&state.pool, &account_id)
        .await
        .map_err(internal)?;
    Ok(Json(bills))
}

async fn ensure_bill(
    State(state): State<ApiState>,
    Path(account_id): Path<String>,
) -> Result<Json<EnsureBillResponse>, StatusCode> {
    let now = OffsetDateTime::now_utc();
    let samples = fetch_history(&state.pool, &account_id)
        .await
        .map_err(internal)?;
    let bills = bill_queries::account_bills(&state.pool, &account_id)
        .await
        .map_err(internal)?;

    match billing::ensure_current_cycle_bill(&samples, &bills, &account_id, now.date()) {
        BillDecision::AlreadyExists => Ok(Json(EnsureBillResponse {
            status: "exists",
            bill_number: bills.first().map(|b| b.bill_number.clone()),
        })),
        BillDecision::Create(bill) => {
            let inserted = bill_queries::insert_bill_if_absent(&state.pool, &bill)
                .await
                .map_err(internal)?;
            // A lost race shows up here as a conflict; that is the invariant
            // holding, not a failure.
            Ok(Json(EnsureBillResponse {
                status: if inserted { "created" } else { "exists" },
                bill_number: Some(bill.bill_number),
            }))
        }
    }
}

async fn bill_paid(
    State(state): State<ApiState>,
    Path(bill_number): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let updated = bill_queries::mark_paid(&state.pool, &bill_number)
        .await
        .map_err(internal)?;
    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }
    tracing::info!(%bill_number, "bill marked paid");
    Ok(Json(serde_json::json!({ "status": "Paid" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquabill_core::domain::BillStatus;
    use time::macros::{date, datetime};

    #[test]
    fn period_decodes_from_lowercase_query_values() {
        let p: Period = serde_json::from_str("\"daily\"").unwrap();
        assert_eq!(p, Period::Daily);
        let p: Period = serde_json::from_str("\"monthly\"").unwrap();
        assert_eq!(p, Period::Monthly);
    }

    #[test]
    fn summary_combines_cycle_usage_and_unpaid_bills() {
        let samples = [Sample {
            recorded_at: datetime!(2024-03-20 08:00:00 UTC),
            liters: 1000.0,
        }];
        let bills = [Bill {
            account_id: "acct-1".to_string(),
            bill_number: "AB202402ACCT".to_string(),
            issued_on: date!(2024-02-01),
            amount: 20.0,
            due_on: date!(2024-03-01),
            status: BillStatus::Unpaid,
        }];

        let summary = summarize(&samples, &bills, date!(2024-03-20));
        assert_eq!(summary.current_cycle_liters, 1000.0);
        assert_eq!(summary.current_cycle_amount, 4.5);
        assert_eq!(summary.unpaid_previous_amount, 20.0);
        assert_eq!(summary.total_due, 24.5);
        assert_eq!(summary.due_on, date!(2024-04-01));
    }

    #[test]
    fn summary_reports_last_active_day_for_stale_feeds() {
        // A feed idle for months still reports its last active day, not 0;
        // the summary path must feed this from the unbounded history query.
        let samples = [
            Sample {
                recorded_at: datetime!(2023-11-30 22:00:00 UTC),
                liters: 250.0,
            },
            Sample {
                recorded_at: datetime!(2023-12-01 06:00:00 UTC),
                liters: 300.0,
            },
        ];

        let summary = summarize(&samples, &[], date!(2024-03-20));
        assert_eq!(summary.current_cycle_liters, 300.0);
        assert_eq!(summary.current_cycle_amount, 1.35);
    }
}
