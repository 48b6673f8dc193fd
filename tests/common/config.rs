//! Test configuration helpers for running the pipeline against a mock server

use corpus_dl::Config;
use std::path::Path;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Start a mock server that serves `body` at `/<name>` exactly `expected_hits` times
pub async fn serve_artifact(name: &str, body: Vec<u8>, expected_hits: u64) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .expect(expected_hits)
        .mount(&server)
        .await;
    server
}

/// Configuration pointing at `/<name>` on `server` with all artifacts in `data_dir`
pub fn config_for(server: &MockServer, name: &str, data_dir: &Path) -> Config {
    let mut config = Config::default();
    config.source.url = format!("{}/{}", server.uri(), name);
    config.paths.data_dir = data_dir.to_path_buf();
    config
}
