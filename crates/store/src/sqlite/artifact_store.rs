use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use taskhub_domain::{Artifact, ArtifactRepository};
use taskhub_errors::TaskHubResult;

pub struct SqliteArtifactStore {
    pool: SqlitePool,
}

impl SqliteArtifactStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_artifact(row: &sqlx::sqlite::SqliteRow) -> TaskHubResult<Artifact> {
        Ok(Artifact {
            artifact_id: row.try_get("artifact_id")?,
            run_id: row.try_get("run_id")?,
            file_id: row.try_get("file_id")?,
            title: row.try_get("title")?,
            kind: row.try_get("kind")?,
            mime: row.try_get("mime")?,
            path: row.try_get("path")?,
            size_bytes: row.try_get("size_bytes")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ArtifactRepository for SqliteArtifactStore {
    async fn insert_artifact(&self, artifact: &Artifact) -> TaskHubResult<Artifact> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (artifact_id, run_id, file_id, title, kind, mime, path,
                                   size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&artifact.artifact_id)
        .bind(&artifact.run_id)
        .bind(&artifact.file_id)
        .bind(&artifact.title)
        .bind(&artifact.kind)
        .bind(&artifact.mime)
        .bind(&artifact.path)
        .bind(artifact.size_bytes)
        .bind(artifact.created_at)
        .execute(&self.pool)
        .await?;

        Ok(artifact.clone())
    }

    async fn list_artifacts(&self, run_id: &str) -> TaskHubResult<Vec<Artifact>> {
        let rows = sqlx::query("SELECT * FROM artifacts WHERE run_id = $1 ORDER BY created_at ASC")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_artifact).collect()
    }

    async fn get_artifact_by_file_id(
        &self,
        run_id: &str,
        file_id: &str,
    ) -> TaskHubResult<Option<Artifact>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE run_id = $1 AND file_id = $2")
            .bind(run_id)
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Self::row_to_artifact(&row)?)),
            None => Ok(None),
        }
    }
}
