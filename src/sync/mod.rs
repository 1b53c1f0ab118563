//! Sync engine for mirroring the remote catalog.
//!
//! Full-replace synchronization: when the version gate reports a stale
//! local copy, every reference collection is fetched from the remote
//! service and applied in one transaction, so readers only ever observe
//! the complete old state or the complete new state.

pub mod api;

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::{DbError, HistoryRepository, SharedRepository, VersionRepository};
use crate::types::{CatalogSnapshot, Chapter, License, Question, Quiz, VersionMarker};
use self::api::{CatalogApi, RemoteChapter, RemoteLicense, RemoteQuestion, RemoteQuiz};

/// Key-value flag recorded after the first successful sync. Informational
/// only; staleness decisions use the version log.
pub const HAS_SYNCED_KEY: &str = "hasSynced";

/// Sync errors.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("backend error: {status} - {message}")]
    Backend { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("sync already in progress")]
    AlreadyInProgress,
}

/// Sync status for UI.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum SyncStatus {
    Idle,
    Syncing { stage: SyncStage },
    Completed { synced_at: String, stats: SyncStats },
    Failed { error: String },
}

/// Current sync stage.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(tag = "name")]
pub enum SyncStage {
    CheckingVersion,
    FetchingCatalog,
    ApplyingChanges,
}

/// Row counts applied by the last sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub chapters: usize,
    pub licenses: usize,
    pub questions: usize,
    pub question_links: usize,
    pub quizzes: usize,
    pub quiz_links: usize,
}

/// Result of a `synchronize` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Version gate reported not-stale; nothing was written.
    AlreadyCurrent,
    Updated(SyncStats),
}

/// Version gate verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    pub stale: bool,
    /// None when the remote could not be reached but a cached catalog
    /// exists (degraded, not-stale path).
    pub remote_version: Option<String>,
}

struct SyncEngineInner<C> {
    api: C,
    repository: SharedRepository,
    status: Mutex<SyncStatus>,
}

/// Sync engine orchestrating version gating, catalog fetch, and the
/// transactional replace.
///
/// Clone-able because all state lives behind an Arc; the repository handle
/// is only locked after every network await has resolved.
pub struct SyncEngine<C> {
    inner: Arc<SyncEngineInner<C>>,
}

impl<C> Clone for SyncEngine<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: CatalogApi> SyncEngine<C> {
    pub fn new(api: C, repository: SharedRepository) -> Self {
        Self {
            inner: Arc::new(SyncEngineInner {
                api,
                repository,
                status: Mutex::new(SyncStatus::Idle),
            }),
        }
    }

    /// Get current sync status.
    pub async fn status(&self) -> SyncStatus {
        self.inner.status.lock().await.clone()
    }

    /// Latest locally recorded catalog version.
    pub fn local_version(&self) -> Result<Option<VersionMarker>, SyncError> {
        let repo = self.inner.repository.lock().expect("repository lock");
        Ok(repo.local_version()?)
    }

    /// Whether at least one full sync has ever completed on this database.
    pub fn has_synced(&self) -> Result<bool, SyncError> {
        let repo = self.inner.repository.lock().expect("repository lock");
        Ok(repo.get_value(HAS_SYNCED_KEY)?.as_deref() == Some("true"))
    }

    /// Compare the local version marker against the remote service.
    ///
    /// First run (no local version) treats a remote failure as fatal since
    /// the app has no usable data; once a cached catalog exists, remote
    /// failures degrade to a not-stale verdict.
    pub async fn check_for_update(&self) -> Result<UpdateCheck, SyncError> {
        let local = self.local_version()?;

        match self.inner.api.latest_version().await {
            Ok(remote) => {
                let stale = local.map(|v| v.version != remote).unwrap_or(true);
                Ok(UpdateCheck { stale, remote_version: Some(remote) })
            }
            Err(err) if local.is_some() => {
                warn!(error = %err, "version check failed, serving cached catalog");
                Ok(UpdateCheck { stale: false, remote_version: None })
            }
            Err(err) => Err(err),
        }
    }

    /// Run a full catalog sync. A no-op when the version gate reports
    /// not-stale; safe to invoke repeatedly.
    pub async fn synchronize(&self) -> Result<SyncOutcome, SyncError> {
        {
            let mut status = self.inner.status.lock().await;
            if matches!(*status, SyncStatus::Syncing { .. }) {
                return Err(SyncError::AlreadyInProgress);
            }
            *status = SyncStatus::Syncing { stage: SyncStage::CheckingVersion };
        }

        match self.synchronize_inner().await {
            Ok(SyncOutcome::AlreadyCurrent) => {
                self.set_status(SyncStatus::Idle).await;
                Ok(SyncOutcome::AlreadyCurrent)
            }
            Ok(SyncOutcome::Updated(stats)) => {
                self.set_status(SyncStatus::Completed {
                    synced_at: Utc::now().to_rfc3339(),
                    stats: stats.clone(),
                })
                .await;
                Ok(SyncOutcome::Updated(stats))
            }
            Err(err) => {
                self.set_status(SyncStatus::Failed { error: err.to_string() }).await;
                Err(err)
            }
        }
    }

    async fn synchronize_inner(&self) -> Result<SyncOutcome, SyncError> {
        let check = self.check_for_update().await?;
        if !check.stale {
            return Ok(SyncOutcome::AlreadyCurrent);
        }
        let Some(remote_version) = check.remote_version else {
            return Ok(SyncOutcome::AlreadyCurrent);
        };

        info!(version = %remote_version, "catalog is stale, starting full sync");
        self.set_status(SyncStatus::Syncing { stage: SyncStage::FetchingCatalog }).await;

        // All fetches complete before any write; a failed fetch never
        // reaches the database.
        let (chapters, licenses, questions, quizzes) = tokio::try_join!(
            self.inner.api.chapters(),
            self.inner.api.licenses(),
            self.inner.api.questions(),
            self.inner.api.quizzes(),
        )?;

        debug!(
            chapters = chapters.len(),
            licenses = licenses.len(),
            questions = questions.len(),
            quizzes = quizzes.len(),
            "fetched remote catalog"
        );

        let snapshot = build_snapshot(chapters, licenses, questions, quizzes);
        let stats = SyncStats {
            chapters: snapshot.chapters.len(),
            licenses: snapshot.licenses.len(),
            questions: snapshot.questions.len(),
            question_links: snapshot.question_licenses.len(),
            quizzes: snapshot.quizzes.len(),
            quiz_links: snapshot.quiz_questions.len(),
        };

        self.set_status(SyncStatus::Syncing { stage: SyncStage::ApplyingChanges }).await;

        {
            let mut repo = self.inner.repository.lock().expect("repository lock");
            repo.replace_catalog(&snapshot, &remote_version)?;
            repo.set_value(HAS_SYNCED_KEY, "true")?;
        }

        info!(version = %remote_version, "catalog sync committed");
        Ok(SyncOutcome::Updated(stats))
    }

    async fn set_status(&self, status: SyncStatus) {
        *self.inner.status.lock().await = status;
    }
}

/// Normalize nested remote payloads into flat relational rows.
fn build_snapshot(
    chapters: Vec<RemoteChapter>,
    licenses: Vec<RemoteLicense>,
    questions: Vec<RemoteQuestion>,
    quizzes: Vec<RemoteQuiz>,
) -> CatalogSnapshot {
    let question_licenses = questions
        .iter()
        .flat_map(|q| q.licenses.iter().map(move |l| (q.id, l.id)))
        .collect();
    let quiz_questions = quizzes
        .iter()
        .flat_map(|z| z.questions.iter().map(move |q| (z.id, q.id)))
        .collect();

    CatalogSnapshot {
        chapters: chapters
            .into_iter()
            .map(|c| Chapter { id: c.id, name: c.name })
            .collect(),
        licenses: licenses
            .into_iter()
            .map(|l| License {
                id: l.id,
                name: l.name,
                description: l.description,
                total_questions: l.total_questions,
                required_correct: l.required_correct,
                duration_minutes: l.duration_minutes,
            })
            .collect(),
        questions: questions
            .into_iter()
            .map(|q| Question {
                id: q.id,
                content: q.content,
                options: q.options,
                correct_answer_index: q.correct_answer_index,
                is_critical: q.is_critical,
                number: q.number,
                image_name: q.image_name,
                explanation: q.explain,
                chapter_id: q.chapter.map(|c| c.id),
            })
            .collect(),
        question_licenses,
        quizzes: quizzes
            .into_iter()
            .map(|z| Quiz { id: z.id, name: z.name, license_id: z.license.id })
            .collect(),
        quiz_questions,
    }
}
