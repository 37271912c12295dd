//! Component C2: durable SQLite-backed storage for alerts, classifications,
//! silences, publishing history, and group flush state. Mirrors the donor's
//! `MetricsStorage`: a pool, a schema migration run once at startup, and one
//! method per access pattern rather than a generic query builder.

use std::collections::HashMap;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::error::AppResult;
use crate::model::{
    Alert, AlertStatus, Classification, ClassificationSource, Matcher, PublishOutcome,
    PublishingResult, Severity, Silence,
};

/// Filters for [`AlertStore::list_alerts`]. Every field is an AND'd exact
/// match; `None` means "don't filter on this column".
#[derive(Debug, Default, Clone)]
pub struct AlertFilters {
    pub status: Option<AlertStatus>,
    pub namespace: Option<String>,
    pub alert_name: Option<String>,
}

pub struct AlertStore {
    pool: SqlitePool,
}

impl AlertStore {
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                fingerprint TEXT PRIMARY KEY,
                alert_name TEXT NOT NULL,
                namespace TEXT,
                status TEXT NOT NULL,
                labels TEXT NOT NULL,
                annotations TEXT NOT NULL,
                starts_at TEXT NOT NULL,
                ends_at TEXT,
                generator_url TEXT,
                received_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS classifications (
                fingerprint TEXT PRIMARY KEY,
                severity TEXT NOT NULL,
                confidence REAL NOT NULL,
                reasoning TEXT NOT NULL,
                recommendations TEXT NOT NULL,
                source TEXT NOT NULL,
                produced_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS silences (
                id TEXT PRIMARY KEY,
                created_by TEXT NOT NULL,
                comment TEXT NOT NULL,
                starts_at TEXT NOT NULL,
                ends_at TEXT NOT NULL,
                matchers TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_silences_ends_at ON silences(ends_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS publishing_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL,
                target_name TEXT NOT NULL,
                outcome TEXT NOT NULL,
                http_status INTEGER,
                duration_ms INTEGER NOT NULL,
                attempt INTEGER NOT NULL,
                error_kind TEXT,
                emitted_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_publish_history_fp ON publishing_history(fingerprint)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                fingerprint TEXT NOT NULL,
                status TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn upsert_alert(&self, alert: &Alert) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts
                (fingerprint, alert_name, namespace, status, labels, annotations, starts_at, ends_at, generator_url, received_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                alert_name = excluded.alert_name,
                namespace = excluded.namespace,
                status = excluded.status,
                labels = excluded.labels,
                annotations = excluded.annotations,
                starts_at = excluded.starts_at,
                ends_at = excluded.ends_at,
                generator_url = excluded.generator_url,
                received_at = excluded.received_at
            "#,
        )
        .bind(&alert.fingerprint)
        .bind(&alert.alert_name)
        .bind(&alert.namespace)
        .bind(alert.status.as_str())
        .bind(serde_json::to_string(&alert.labels)?)
        .bind(serde_json::to_string(&alert.annotations)?)
        .bind(alert.starts_at.to_rfc3339())
        .bind(alert.ends_at.map(|t| t.to_rfc3339()))
        .bind(&alert.generator_url)
        .bind(alert.received_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "INSERT INTO alert_history (fingerprint, status, recorded_at) VALUES (?, ?, ?)",
        )
        .bind(&alert.fingerprint)
        .bind(alert.status.as_str())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_alert(&self, fingerprint: &str) -> AppResult<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_alert).transpose()
    }

    pub async fn list_firing_alerts(&self) -> AppResult<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE status = 'firing'")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_alert).collect()
    }

    /// Paginated, filtered listing (spec §4.2 `ListAlerts(filters, limit,
    /// offset) -> (page, total)`). `total` counts every row matching the
    /// filters, not just the page returned, so callers can render pagination
    /// without a second round trip.
    pub async fn list_alerts(
        &self,
        filters: &AlertFilters,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Alert>, u64)> {
        let mut clauses = Vec::new();
        if filters.status.is_some() {
            clauses.push("status = ?");
        }
        if filters.namespace.is_some() {
            clauses.push("namespace = ?");
        }
        if filters.alert_name.is_some() {
            clauses.push("alert_name = ?");
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let bind_filters = |mut q: sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>>| {
            if let Some(status) = filters.status {
                q = q.bind(status.as_str());
            }
            if let Some(namespace) = &filters.namespace {
                q = q.bind(namespace.clone());
            }
            if let Some(alert_name) = &filters.alert_name {
                q = q.bind(alert_name.clone());
            }
            q
        };

        let count_sql = format!("SELECT COUNT(*) AS c FROM alerts{where_clause}");
        let total: i64 = bind_filters(sqlx::query(&count_sql))
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;

        let page_sql =
            format!("SELECT * FROM alerts{where_clause} ORDER BY received_at DESC LIMIT ? OFFSET ?");
        let rows = bind_filters(sqlx::query(&page_sql))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let page = rows.into_iter().map(row_to_alert).collect::<AppResult<Vec<_>>>()?;

        Ok((page, total as u64))
    }

    pub async fn delete_alert(&self, fingerprint: &str) -> AppResult<()> {
        sqlx::query("DELETE FROM alerts WHERE fingerprint = ?")
            .bind(fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_classification(&self, c: &Classification) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO classifications
                (fingerprint, severity, confidence, reasoning, recommendations, source, produced_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO UPDATE SET
                severity = excluded.severity,
                confidence = excluded.confidence,
                reasoning = excluded.reasoning,
                recommendations = excluded.recommendations,
                source = excluded.source,
                produced_at = excluded.produced_at
            "#,
        )
        .bind(&c.fingerprint)
        .bind(severity_str(c.severity))
        .bind(c.confidence)
        .bind(&c.reasoning)
        .bind(serde_json::to_string(&c.recommendations)?)
        .bind(source_str(c.source))
        .bind(c.produced_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_classification(&self, fingerprint: &str) -> AppResult<Option<Classification>> {
        let row = sqlx::query("SELECT * FROM classifications WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_classification).transpose()
    }

    /// Plain insert, no upsert: the id is a deterministic digest of the
    /// normalized payload (spec §8), so a unique-constraint hit here means
    /// the same silence was already created and must surface as a 409
    /// (`AppError`'s `From<sqlx::Error>` maps the violation to
    /// `storage_conflict`) rather than silently overwriting it.
    pub async fn insert_silence(&self, silence: &Silence) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO silences (id, created_by, comment, starts_at, ends_at, matchers, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(silence.id.to_string())
        .bind(&silence.created_by)
        .bind(&silence.comment)
        .bind(silence.starts_at.to_rfc3339())
        .bind(silence.ends_at.to_rfc3339())
        .bind(serde_json::to_string(&silence.matchers)?)
        .bind(silence.created_at.to_rfc3339())
        .bind(silence.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_silence(&self, id: uuid::Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM silences WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_silences(&self) -> AppResult<Vec<Silence>> {
        let rows = sqlx::query("SELECT * FROM silences").fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_silence).collect()
    }

    pub async fn record_publish_result(&self, result: &PublishingResult) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO publishing_history
                (fingerprint, target_name, outcome, http_status, duration_ms, attempt, error_kind, emitted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.fingerprint)
        .bind(&result.target_name)
        .bind(outcome_str(result.outcome))
        .bind(result.http_status.map(|s| s as i64))
        .bind(result.duration_ms)
        .bind(result.attempt)
        .bind(&result.error_kind)
        .bind(result.emitted_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes alert/history rows older than `retention_days` and silences
    /// past `silence_retention_days`. Called on a periodic schedule. Returns
    /// the total row count deleted across all three tables (spec §4.2
    /// `CleanupOldAlerts(retention_days) -> n`), so the caller can log how
    /// much was actually reclaimed rather than just "cleanup ran".
    pub async fn cleanup(&self, alert_retention_days: i64, silence_retention_days: i64) -> AppResult<u64> {
        let alert_cutoff = (chrono::Utc::now() - chrono::Duration::days(alert_retention_days)).to_rfc3339();
        let silence_cutoff =
            (chrono::Utc::now() - chrono::Duration::days(silence_retention_days)).to_rfc3339();

        let alerts_deleted = sqlx::query("DELETE FROM alerts WHERE status = 'resolved' AND received_at < ?")
            .bind(&alert_cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let history_deleted = sqlx::query("DELETE FROM alert_history WHERE recorded_at < ?")
            .bind(&alert_cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        let silences_deleted = sqlx::query("DELETE FROM silences WHERE ends_at < ?")
            .bind(&silence_cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(alerts_deleted + history_deleted + silences_deleted)
    }

    /// Spec §4.2 `GetAlertStats() -> counts by status/severity/namespace and
    /// min/max timestamps`. Severity comes from the joined `classifications`
    /// row since alerts themselves carry no severity column; alerts with no
    /// classification yet are simply absent from `by_severity`.
    pub async fn stats(&self) -> AppResult<StoreStats> {
        let firing: i64 = sqlx::query("SELECT COUNT(*) AS c FROM alerts WHERE status = 'firing'")
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;
        let silences: i64 = sqlx::query("SELECT COUNT(*) AS c FROM silences")
            .fetch_one(&self.pool)
            .await?
            .try_get("c")?;

        let mut by_status = HashMap::new();
        let status_rows = sqlx::query("SELECT status, COUNT(*) AS c FROM alerts GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        for row in status_rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("c")?;
            by_status.insert(status, count as u64);
        }

        let mut by_namespace = HashMap::new();
        let namespace_rows = sqlx::query(
            "SELECT COALESCE(namespace, '') AS namespace, COUNT(*) AS c FROM alerts GROUP BY namespace",
        )
        .fetch_all(&self.pool)
        .await?;
        for row in namespace_rows {
            let namespace: String = row.try_get("namespace")?;
            let count: i64 = row.try_get("c")?;
            by_namespace.insert(namespace, count as u64);
        }

        let mut by_severity = HashMap::new();
        let severity_rows = sqlx::query(
            r#"
            SELECT c.severity AS severity, COUNT(*) AS n
            FROM alerts a JOIN classifications c ON c.fingerprint = a.fingerprint
            GROUP BY c.severity
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        for row in severity_rows {
            let severity: String = row.try_get("severity")?;
            let count: i64 = row.try_get("n")?;
            by_severity.insert(severity, count as u64);
        }

        let bounds = sqlx::query("SELECT MIN(received_at) AS oldest, MAX(received_at) AS newest FROM alerts")
            .fetch_one(&self.pool)
            .await?;
        let oldest_alert_at: Option<String> = bounds.try_get("oldest")?;
        let newest_alert_at: Option<String> = bounds.try_get("newest")?;

        Ok(StoreStats {
            firing_alert_count: firing as u64,
            silence_count: silences as u64,
            by_status,
            by_severity,
            by_namespace,
            oldest_alert_at: parse_optional_rfc3339(oldest_alert_at)?,
            newest_alert_at: parse_optional_rfc3339(newest_alert_at)?,
        })
    }

    /// Minimal liveness probe for `/healthz` (spec §6): a round-trip that
    /// fails fast if the pool can't reach the database at all.
    pub async fn ping(&self) -> AppResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

pub struct StoreStats {
    pub firing_alert_count: u64,
    pub silence_count: u64,
    pub by_status: HashMap<String, u64>,
    pub by_severity: HashMap<String, u64>,
    pub by_namespace: HashMap<String, u64>,
    pub oldest_alert_at: Option<chrono::DateTime<chrono::Utc>>,
    pub newest_alert_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn parse_optional_rfc3339(value: Option<String>) -> AppResult<Option<chrono::DateTime<chrono::Utc>>> {
    value
        .map(|s| {
            chrono::DateTime::parse_from_rfc3339(&s)
                .map(|d| d.with_timezone(&chrono::Utc))
                .map_err(|e| crate::error::AppError::storage("parse_stats_timestamp", e.to_string()))
        })
        .transpose()
}

fn severity_str(s: Severity) -> &'static str {
    match s {
        Severity::Critical => "critical",
        Severity::Warning => "warning",
        Severity::Info => "info",
    }
}

fn source_str(s: ClassificationSource) -> &'static str {
    match s {
        ClassificationSource::Llm => "llm",
        ClassificationSource::RuleBased => "rule_based",
        ClassificationSource::Cached => "cached",
    }
}

fn outcome_str(o: PublishOutcome) -> &'static str {
    match o {
        PublishOutcome::Success => "success",
        PublishOutcome::Failure => "failure",
        PublishOutcome::Skipped => "skipped",
    }
}

fn row_to_alert(row: sqlx::sqlite::SqliteRow) -> AppResult<Alert> {
    let status: String = row.try_get("status")?;
    let labels: String = row.try_get("labels")?;
    let annotations: String = row.try_get("annotations")?;
    let starts_at: String = row.try_get("starts_at")?;
    let ends_at: Option<String> = row.try_get("ends_at")?;
    let received_at: String = row.try_get("received_at")?;

    Ok(Alert {
        fingerprint: row.try_get("fingerprint")?,
        alert_name: row.try_get("alert_name")?,
        namespace: row.try_get("namespace")?,
        status: if status == "firing" {
            AlertStatus::Firing
        } else {
            AlertStatus::Resolved
        },
        labels: serde_json::from_str(&labels)?,
        annotations: serde_json::from_str(&annotations)?,
        starts_at: chrono::DateTime::parse_from_rfc3339(&starts_at)
            .map_err(|e| crate::error::AppError::storage("parse_alert_row", e.to_string()))?
            .with_timezone(&chrono::Utc),
        ends_at: ends_at
            .map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&chrono::Utc)))
            .transpose()
            .map_err(|e: chrono::ParseError| crate::error::AppError::storage("parse_alert_row", e.to_string()))?,
        generator_url: row.try_get("generator_url")?,
        received_at: chrono::DateTime::parse_from_rfc3339(&received_at)
            .map_err(|e| crate::error::AppError::storage("parse_alert_row", e.to_string()))?
            .with_timezone(&chrono::Utc),
    })
}

fn row_to_classification(row: sqlx::sqlite::SqliteRow) -> AppResult<Classification> {
    let severity: String = row.try_get("severity")?;
    let source: String = row.try_get("source")?;
    let recommendations: String = row.try_get("recommendations")?;
    let produced_at: String = row.try_get("produced_at")?;

    Ok(Classification {
        fingerprint: row.try_get("fingerprint")?,
        severity: match severity.as_str() {
            "critical" => Severity::Critical,
            "warning" => Severity::Warning,
            _ => Severity::Info,
        },
        confidence: row.try_get("confidence")?,
        reasoning: row.try_get("reasoning")?,
        recommendations: serde_json::from_str(&recommendations)?,
        source: match source.as_str() {
            "llm" => ClassificationSource::Llm,
            "cached" => ClassificationSource::Cached,
            _ => ClassificationSource::RuleBased,
        },
        produced_at: chrono::DateTime::parse_from_rfc3339(&produced_at)
            .map_err(|e| crate::error::AppError::storage("parse_classification_row", e.to_string()))?
            .with_timezone(&chrono::Utc),
    })
}

fn row_to_silence(row: sqlx::sqlite::SqliteRow) -> AppResult<Silence> {
    let id: String = row.try_get("id")?;
    let matchers: String = row.try_get("matchers")?;
    let starts_at: String = row.try_get("starts_at")?;
    let ends_at: String = row.try_get("ends_at")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let parsed_matchers: Vec<Matcher> = serde_json::from_str(&matchers)?;

    Ok(Silence {
        id: uuid::Uuid::parse_str(&id).map_err(|e| crate::error::AppError::storage("parse_silence_row", e.to_string()))?,
        created_by: row.try_get("created_by")?,
        comment: row.try_get("comment")?,
        starts_at: chrono::DateTime::parse_from_rfc3339(&starts_at)
            .map_err(|e| crate::error::AppError::storage("parse_silence_row", e.to_string()))?
            .with_timezone(&chrono::Utc),
        ends_at: chrono::DateTime::parse_from_rfc3339(&ends_at)
            .map_err(|e| crate::error::AppError::storage("parse_silence_row", e.to_string()))?
            .with_timezone(&chrono::Utc),
        matchers: parsed_matchers,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| crate::error::AppError::storage("parse_silence_row", e.to_string()))?
            .with_timezone(&chrono::Utc),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| crate::error::AppError::storage("parse_silence_row", e.to_string()))?
            .with_timezone(&chrono::Utc),
    })
}
