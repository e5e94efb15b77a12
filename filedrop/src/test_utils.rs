//! Shared helpers for handler and router tests.

use crate::config::Config;
use crate::uploads::UploadDir;
use crate::{AppState, build_router};
use axum_test::TestServer;
use std::path::Path;

/// Default configuration writing into `upload_dir`, normally a fresh temp directory per test.
pub fn create_test_config(upload_dir: &Path) -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        upload_dir: upload_dir.to_path_buf(),
        ..Default::default()
    }
}

pub fn create_test_server(config: Config) -> TestServer {
    let state = AppState::builder()
        .uploads(UploadDir::from_config(&config))
        .config(config)
        .build();
    let router = build_router(&state).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}
