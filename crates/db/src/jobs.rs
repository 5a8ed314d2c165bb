// crates/db/src/jobs.rs
//! Job rows and the narrow store interface consumed by the supervision core.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::{Database, DbResult};

/// Lifecycle state of a job. Transitions are forward-only:
/// `pending → processing → {success, error}`. Terminal rows are never
/// updated again; a fresh upload creates a brand-new job instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Success,
    Error,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Error)
    }

    fn parse(raw: &str) -> Self {
        match raw {
            "processing" => JobStatus::Processing,
            "success" => JobStatus::Success,
            "error" => JobStatus::Error,
            _ => JobStatus::Pending,
        }
    }
}

/// One persisted job: a request to turn an uploaded GPS track into a video.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub owner_id: String,
    pub file_name: String,
    pub input_path: String,
    pub status: JobStatus,
    pub progress: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl JobRecord {
    /// Fresh pending job for a just-accepted upload.
    pub fn pending(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        file_name: impl Into<String>,
        input_path: impl Into<String>,
    ) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            file_name: file_name.into(),
            input_path: input_path.into(),
            status: JobStatus::Pending,
            progress: 0,
            message: String::new(),
            artifact_path: None,
            created_at: now,
            updated_at: now,
        }
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobRecord {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            file_name: row.try_get("file_name")?,
            input_path: row.try_get("input_path")?,
            status: JobStatus::parse(&status),
            progress: row.try_get("progress")?,
            message: row.try_get("message")?,
            artifact_path: row.try_get("artifact_path")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl Database {
    /// Insert a new job row (upload front door).
    pub async fn insert_job(&self, job: &JobRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, owner_id, file_name, input_path, status, progress,
                              message, artifact_path, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner_id)
        .bind(&job.file_name)
        .bind(&job.input_path)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(&job.message)
        .bind(&job.artifact_path)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch a job by id.
    pub async fn get_job(&self, id: &str) -> DbResult<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRecord>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(row)
    }

    /// Update status/progress/message for a job.
    ///
    /// `message = None` keeps the previous message (message is
    /// last-write-wins, and progress-only updates must not clear it).
    /// The `WHERE` guard refuses to touch rows already in a terminal state,
    /// so a late or duplicate write can never resurrect or regress a
    /// finished job. Returns whether a row was actually updated.
    pub async fn set_status(
        &self,
        id: &str,
        status: JobStatus,
        message: Option<&str>,
        progress: u8,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?, progress = ?, message = COALESCE(?, message), updated_at = ?
            WHERE id = ? AND status NOT IN ('success', 'error')
            "#,
        )
        .bind(status.as_str())
        .bind(progress as i64)
        .bind(message)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the renamed artifact path. Set only on the way into `success`,
    /// immediately before the terminal status write.
    pub async fn set_artifact(&self, id: &str, path: &str) -> DbResult<()> {
        sqlx::query("UPDATE jobs SET artifact_path = ?, updated_at = ? WHERE id = ?")
            .bind(path)
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn db_with_job(id: &str) -> Database {
        let db = Database::new_in_memory().await.unwrap();
        db.insert_job(&JobRecord::pending(id, "user-1", "track.csv", "/data/uploads/track.csv"))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let db = db_with_job("job-1").await;
        let job = db.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.owner_id, "user-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.artifact_path, None);
    }

    #[tokio::test]
    async fn get_missing_job_is_none() {
        let db = Database::new_in_memory().await.unwrap();
        assert!(db.get_job("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_status_updates_and_keeps_message_when_none() {
        let db = db_with_job("job-1").await;

        assert!(db
            .set_status("job-1", JobStatus::Processing, Some("Loading GPS data..."), 5)
            .await
            .unwrap());
        // Progress-only update: message survives.
        assert!(db
            .set_status("job-1", JobStatus::Processing, None, 15)
            .await
            .unwrap());

        let job = db.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.progress, 15);
        assert_eq!(job.message, "Loading GPS data...");
    }

    #[tokio::test]
    async fn terminal_rows_refuse_further_status_writes() {
        let db = db_with_job("job-1").await;
        assert!(db
            .set_status("job-1", JobStatus::Error, Some("worker exited with exit code 1"), 40)
            .await
            .unwrap());

        // A lagging intermediate write must not regress the terminal row.
        let touched = db
            .set_status("job-1", JobStatus::Processing, Some("late"), 45)
            .await
            .unwrap();
        assert!(!touched);

        let job = db.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.progress, 40);
        assert_eq!(job.message, "worker exited with exit code 1");
    }

    #[tokio::test]
    async fn artifact_path_set_on_success() {
        let db = db_with_job("job-1").await;
        db.set_artifact("job-1", "/data/videos/job-1.mp4").await.unwrap();
        db.set_status("job-1", JobStatus::Success, Some("Video generated successfully!"), 100)
            .await
            .unwrap();

        let job = db.get_job("job-1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Success);
        assert_eq!(job.artifact_path.as_deref(), Some("/data/videos/job-1.mp4"));
    }

    #[tokio::test]
    async fn job_json_uses_camel_case() {
        let db = db_with_job("job-1").await;
        let job = db.get_job("job-1").await.unwrap().unwrap();
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"ownerId\":\"user-1\""));
        assert!(json.contains("\"inputPath\""));
        assert!(json.contains("\"status\":\"pending\""));
        assert!(!json.contains("artifactPath")); // None is skipped
    }
}
