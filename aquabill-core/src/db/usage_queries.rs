use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::UsageReading;

/// Fetch a time-ordered usage history for a single account over `[start, end)`.
pub async fn account_readings(
    pool: &PgPool,
    account_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<UsageReading>> {
    let rows = sqlx::query_as::<_, UsageReading>(
        r#"
        SELECT
            recorded_at,
            account_id,
            meter_id,
            liters,
            flow_rate_lpm,
            source_system
        FROM flow_readings
        WHERE account_id = $1
          AND recorded_at >= $2
          AND recorded_at <  $3
        ORDER BY recorded_at
        "#,
    )
    .bind(account_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Full usage history for one account. The billing summary anchors its
/// current cycle on the most recent reading no matter how old it is, so this
/// query takes no time bounds.
pub async fn account_history(pool: &PgPool, account_id: &str) -> Result<Vec<UsageReading>> {
    let rows = sqlx::query_as::<_, UsageReading>(
        r#"
        SELECT
            recorded_at,
            account_id,
            meter_id,
            liters,
            flow_rate_lpm,
            source_system
        FROM flow_readings
        WHERE account_id = $1
        ORDER BY recorded_at
        "#,
    )
    .bind(account_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Every account that has at least one reading. Drives the monthly bill run.
pub async fn all_account_ids(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT account_id FROM flow_readings ORDER BY account_id")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}
