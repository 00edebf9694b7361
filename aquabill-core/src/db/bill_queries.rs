use anyhow::{Context, Result};
use sqlx::PgPool;
use time::Date;

use crate::domain::{Bill, BillStatus};

#[derive(Debug, sqlx::FromRow)]
struct BillRow {
    account_id: String,
    bill_number: String,
    issued_on: Date,
    amount: f64,
    due_on: Date,
    status: String,
}

impl TryFrom<BillRow> for Bill {
    type Error = anyhow::Error;

    fn try_from(r: BillRow) -> Result<Self> {
        let status: BillStatus = r
            .status
            .parse()
            .with_context(|| format!("bill {}", r.bill_number))?;
        Ok(Bill {
            account_id: r.account_id,
            bill_number: r.bill_number,
            issued_on: r.issued_on,
            amount: r.amount,
            due_on: r.due_on,
            status,
        })
    }
}

/// Bills for one account, newest first.
pub async fn account_bills(pool: &PgPool, account_id: &str) -> Result<Vec<Bill>> {
    let rows = sqlx::query_as::<_, BillRow>(
        r#"
        SELECT account_id, bill_number, issued_on, amount, due_on, status
        FROM bills
        WHERE account_id = $1
        ORDER BY issued_on DESC
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Bill::try_from).collect()
}

/// Insert a bill, treating a bill-number conflict as "already exists".
///
/// `bill_number` is deterministic per (account, month), so the unique index on
/// it enforces the one-bill-per-month invariant even when two callers race the
/// ensure check. Returns true when this call inserted the row.
pub async fn insert_bill_if_absent(pool: &PgPool, bill: &Bill) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO bills (account_id, bill_number, issued_on, amount, due_on, status)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (bill_number) DO NOTHING
        "#,
    )
    .bind(&bill.account_id)
    .bind(&bill.bill_number)
    .bind(bill.issued_on)
    .bind(bill.amount)
    .bind(bill.due_on)
    .bind(bill.status.as_str())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Unpaid -> Paid transition driven by a confirmed payment. Returns false when
/// no bill carries that number.
pub async fn mark_paid(pool: &PgPool, bill_number: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE bills SET status = 'Paid' WHERE bill_number = $1")
        .bind(bill_number)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}
