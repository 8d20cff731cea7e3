//! Session files
//!
//! The resumable part of a pipeline instance (project id, launch payload and
//! completed-stage results) saved as pretty JSON. Task records, the active task
//! and progress are not saved; a resumed pipeline restarts its next stage.

use quill_core::dto::session::PersistedPipeline;
use std::path::Path;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Writes `session` to `path`, replacing any previous file
///
/// The file is written next to `path` first and renamed over it, so a crash
/// never leaves a truncated session behind.
pub async fn save(path: &Path, session: &PersistedPipeline) -> Result<()> {
    let body = serde_json::to_vec_pretty(session)
        .map_err(|e| OrchestratorError::Persistence(format!("failed to encode session: {}", e)))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");

    tokio::fs::write(&tmp, body).await.map_err(|e| {
        OrchestratorError::Persistence(format!("failed to write {}: {}", path.display(), e))
    })?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        OrchestratorError::Persistence(format!("failed to replace {}: {}", path.display(), e))
    })?;

    debug!(
        "Saved session for '{}' ({} completed stage(s)) to {}",
        session.pipeline,
        session.results.len(),
        path.display()
    );
    Ok(())
}

/// Reads a session previously written by [`save`]
pub async fn load(path: &Path) -> Result<PersistedPipeline> {
    let body = tokio::fs::read(path).await.map_err(|e| {
        OrchestratorError::Persistence(format!("failed to read {}: {}", path.display(), e))
    })?;

    serde_json::from_slice(&body).map_err(|e| {
        OrchestratorError::Persistence(format!("invalid session file {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn session() -> PersistedPipeline {
        PersistedPipeline {
            pipeline: "video-to-book".into(),
            project_id: "p-42".into(),
            launch_input: json!({"url": "https://video"}),
            results: BTreeMap::from([("transcript".to_string(), json!({"text": "hi"}))]),
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        save(&path, &session()).await.unwrap();
        let loaded = load(&path).await.unwrap();

        assert_eq!(loaded.pipeline, "video-to-book");
        assert_eq!(loaded.project_id, "p-42");
        assert_eq!(loaded.results["transcript"], json!({"text": "hi"}));
        assert!(!dir.path().join("session.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        save(&path, &session()).await.unwrap();
        let mut next = session();
        next.results.insert("clean".into(), json!("cleaned"));
        save(&path, &next).await.unwrap();

        assert_eq!(load(&path).await.unwrap().results.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.json")).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Persistence(_)));
    }

    #[tokio::test]
    async fn test_load_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = load(&path).await.unwrap_err();
        assert!(err.to_string().contains("invalid session file"));
    }

    #[tokio::test]
    async fn test_load_without_launch_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(
            &path,
            r#"{"pipeline":"p","project_id":"x","results":{},"saved_at":"2025-01-01T00:00:00Z"}"#,
        )
        .await
        .unwrap();

        let loaded = load(&path).await.unwrap();
        assert!(loaded.launch_input.is_null());
    }
}
