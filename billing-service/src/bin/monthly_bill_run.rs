use anyhow::Result;
use billing_service::{config::AppConfig, observability};
use sqlx::postgres::PgPoolOptions;
use time::{Date, OffsetDateTime};

use aquabill_core::{
    aggregate,
    billing::{self, BillDecision},
    db::{bill_queries, usage_queries},
};

/// Evaluate the ensure-bill decision for every account with readings and
/// persist the bills that are missing for the current month. Safe to re-run:
/// the unique bill-number index turns a repeat into a no-op.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .connect(&cfg.database.uri)
        .await?;

    let today = OffsetDateTime::now_utc().date();
    let month_start = first_of_month(today).midnight().assume_utc();
    let month_end = billing::first_of_next_month(today).midnight().assume_utc();

    let accounts = usage_queries::all_account_ids(&pool).await?;

    let mut created = 0usize;
    let mut existing = 0usize;

    for account_id in &accounts {
        let readings =
            usage_queries::account_readings(&pool, account_id, month_start, month_end).await?;
        let (samples, warnings) = aggregate::sanitize(&readings);
        if !warnings.is_empty() {
            tracing::warn!(
                %account_id,
                count = warnings.len(),
                "clamped malformed stored readings"
            );
        }

        let bills = bill_queries::account_bills(&pool, account_id).await?;

        match billing::ensure_current_cycle_bill(&samples, &bills, account_id, today) {
            BillDecision::AlreadyExists => existing += 1,
            BillDecision::Create(bill) => {
                if bill_queries::insert_bill_if_absent(&pool, &bill).await? {
                    tracing::info!(
                        %account_id,
                        bill_number = %bill.bill_number,
                        amount = bill.amount,
                        "bill created"
                    );
                    created += 1;
                } else {
                    // Another run got there first; the constraint held.
                    existing += 1;
                }
            }
        }
    }

    tracing::info!(
        accounts = accounts.len(),
        created,
        existing,
        "monthly bill run complete"
    );

    Ok(())
}

fn first_of_month(d: Date) -> Date {
    Date::from_calendar_date(d.year(), d.month(), 1).expect("day 1 exists in every month")
}
