use crate::import::{ImportError, ImportPipeline};
use crate::models::ImportResponse;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Per-store lock that serializes imports. The HTTP route tries it without
/// waiting, the worker waits for it.
pub type ImportPermit = Arc<Mutex<()>>;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

struct Job {
    id: Uuid,
    filename: String,
    bytes: Vec<u8>,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: ImportResponse },
    Failed { error: String, stage: Option<String> },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(
        pipeline: ImportPipeline,
        permit: ImportPermit,
        capacity: usize,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let _permit = permit.lock().await;
                statuses_bg.lock().await.insert(job.id, JobState::Running);

                let result = pipeline.run_file(&job.filename, &job.bytes).await;
                let state = match result {
                    Ok(resp) => {
                        info!(target = "resale.api", job_id = %job.id, inserted = resp.inserted_count, "import_job_completed");
                        JobState::Completed { result: resp }
                    }
                    Err(err) => {
                        warn!(target = "resale.api", job_id = %job.id, stage = err.stage(), error = %err, "import_job_failed");
                        failed(&err)
                    }
                };
                statuses_bg.lock().await.insert(job.id, state);
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_import(&self, filename: String, bytes: Vec<u8>) -> Result<Uuid, String> {
        let id = Uuid::new_v4();
        self.statuses.lock().await.insert(id, JobState::Queued);
        let job = Job {
            id,
            filename,
            bytes,
        };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err("worker not available".into());
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn failed(err: &ImportError) -> JobState {
    JobState::Failed {
        error: err.detail().to_string(),
        stage: Some(err.stage().to_string()),
    }
}
