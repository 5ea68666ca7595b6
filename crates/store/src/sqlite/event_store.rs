use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use taskhub_domain::{EventPage, EventRepository, RunEvent};
use taskhub_errors::TaskHubResult;

pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> TaskHubResult<RunEvent> {
        let data_raw: String = row.try_get("data")?;
        Ok(RunEvent {
            run_id: row.try_get("run_id")?,
            seq: row.try_get("seq")?,
            ts: row.try_get("ts")?,
            event_type: row.try_get("event_type")?,
            data: serde_json::from_str(&data_raw)?,
        })
    }
}

#[async_trait]
impl EventRepository for SqliteEventStore {
    async fn append_event(
        &self,
        run_id: &str,
        event_type: &str,
        data: serde_json::Value,
    ) -> TaskHubResult<i64> {
        // seq allocation and insert are one statement, so the database's
        // serialized writer guarantees gapless, duplicate-free sequences.
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO run_events (run_id, seq, ts, event_type, data)
            VALUES ($1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM run_events WHERE run_id = $1),
                    $2, $3, $4)
            RETURNING seq
            "#,
        )
        .bind(run_id)
        .bind(Utc::now())
        .bind(event_type)
        .bind(serde_json::to_string(&data)?)
        .fetch_one(&self.pool)
        .await?;

        Ok(seq)
    }

    async fn list_events(
        &self,
        run_id: &str,
        after_seq: i64,
        limit: i64,
    ) -> TaskHubResult<EventPage> {
        let limit = limit.clamp(1, 1000);
        let rows = sqlx::query(
            r#"
            SELECT run_id, seq, ts, event_type, data FROM run_events
            WHERE run_id = $1 AND seq > $2
            ORDER BY seq ASC
            LIMIT $3
            "#,
        )
        .bind(run_id)
        .bind(after_seq)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let items: Vec<RunEvent> = rows
            .iter()
            .map(Self::row_to_event)
            .collect::<TaskHubResult<_>>()?;
        let next_cursor = items.last().map(|e| e.seq).unwrap_or(after_seq);

        Ok(EventPage { items, next_cursor })
    }
}
