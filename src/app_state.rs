use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::{oneshot, OnceCell};

use crate::{config::AppConfig, session::Session, sync::SyncSummary};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub status: Arc<Mutex<Status>>,
    /// Se rellena una sola vez, cuando la preparación termina bien.
    pub session: Arc<OnceCell<Session>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    pub fn new(config: AppConfig, shutdown_sender: oneshot::Sender<()>) -> Self {
        Self {
            config,
            status: Arc::new(Mutex::new(Status::default())),
            session: Arc::new(OnceCell::new()),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
        }
    }

    /// Instantánea del estado de la preparación.
    pub fn status(&self) -> Status {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPhase {
    #[default]
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Status {
    pub phase: SetupPhase,
    pub message: String,
    pub progress: f32, // Valor entre 0.0 y 1.0
    pub summary: Option<SyncSummary>,
}

/// Actualiza el mensaje y el progreso de la preparación en curso.
pub fn report(status: &Mutex<Status>, message: &str, progress: f32) {
    let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
    status.message = message.to_string();
    status.progress = progress;
}

/// Marca el final de la preparación.
pub fn finish(status: &Mutex<Status>, phase: SetupPhase, message: String, summary: Option<SyncSummary>) {
    let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
    status.phase = phase;
    status.message = message;
    status.progress = if phase == SetupPhase::Ready { 1.0 } else { 0.0 };
    status.summary = summary;
}
