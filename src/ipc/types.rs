use std::path::PathBuf;

use crate::config::AppConfig;
use crate::session::Session;
use rusqlite::Connection;
use serde::Deserialize;
use tokio::runtime::Runtime;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub config: AppConfig,
    pub session: Session,
    /// Drives generation calls; requests are still answered one at a time.
    pub runtime: Runtime,
}

impl AppState {
    pub fn new(config: AppConfig, runtime: Runtime) -> Self {
        Self {
            workspace: None,
            db: None,
            config,
            session: Session::default(),
            runtime,
        }
    }
}
