//! In-memory run repository for local runs and tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runfleet_common::Result;
use uuid::Uuid;

use super::{RunRepository, StatusWrite};
use crate::domain::entities::{Run, RunOutput, RunStatus};

#[derive(Default)]
struct Tables {
    runs: HashMap<Uuid, Run>,
    outputs: Vec<RunOutput>,
}

#[derive(Default)]
pub struct InMemoryRunRepository {
    tables: Mutex<Tables>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<Run> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .runs
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn create(&self, run: &Run) -> Result<Run> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .runs
            .insert(run.id, run.clone());
        Ok(run.clone())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Run>> {
        Ok(self
            .tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .runs
            .get(&id)
            .cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        tables.outputs.retain(|o| o.run_id != id);
        Ok(tables.runs.remove(&id).is_some())
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: RunStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<StatusWrite> {
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(run) = tables.runs.get_mut(&id) else {
            return Ok(StatusWrite::NotFound);
        };
        if run.is_terminal() {
            return Ok(StatusWrite::AlreadyTerminal(run.clone()));
        }

        run.status = status;
        if error_message.is_some() {
            run.error_message = error_message;
        }
        if status.is_terminal() {
            run.ended_at = Some(at);
        }
        run.updated_at = Utc::now();

        Ok(StatusWrite::Applied {
            run: run.clone(),
            completed: status.is_terminal(),
        })
    }

    async fn add_output(&self, run_id: Uuid, data: serde_json::Value) -> Result<RunOutput> {
        let output = RunOutput::new(run_id, data);
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .outputs
            .push(output.clone());
        Ok(output)
    }

    async fn outputs(&self, run_id: Uuid) -> Result<Vec<RunOutput>> {
        Ok(self
            .tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .outputs
            .iter()
            .filter(|o| o.run_id == run_id)
            .cloned()
            .collect())
    }
}
