//! Test utilities: configuration helpers and an in-memory asset host.

use async_trait::async_trait;
use axum_test::TestServer;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::asset_host::{AssetHost, HostError, HostUpload, StoredAsset, cloudinary};
use crate::config::{AssetHostConfig, Config, Environment, HostCredentials};
use crate::types::ResourceType;
use crate::{AppState, build_router};

/// Configuration with complete credentials, production mode and the default categories.
pub fn create_test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: Environment::Production,
        asset_host: AssetHostConfig {
            cloud_name: Some("demo".to_string()),
            api_key: Some("test-key".to_string()),
            api_secret: Some("test-secret".to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Relay test server backed by the given host.
pub fn create_test_server(config: Config, host: Arc<dyn AssetHost>) -> TestServer {
    let state = AppState::builder().config(Arc::new(config)).asset_host(host).build();
    TestServer::new(build_router(state).into_make_service()).expect("Failed to create test server")
}

/// Asset host that keeps uploads in memory and answers with deterministic URLs.
#[derive(Default)]
pub struct RecordingHost {
    uploads: Mutex<Vec<HostUpload>>,
    failure: Option<(u16, String)>,
}

impl RecordingHost {
    /// A host that rejects every upload.
    pub fn failing(status: u16, message: &str) -> Self {
        Self {
            uploads: Mutex::default(),
            failure: Some((status, message.to_string())),
        }
    }

    /// Uploads received so far, including rejected ones.
    pub fn uploads(&self) -> Vec<HostUpload> {
        self.uploads.lock().expect("uploads lock poisoned").clone()
    }
}

#[async_trait]
impl AssetHost for RecordingHost {
    async fn upload(&self, credentials: &HostCredentials, upload: HostUpload) -> Result<StoredAsset, HostError> {
        self.uploads.lock().expect("uploads lock poisoned").push(upload.clone());

        if let Some((status, message)) = &self.failure {
            return Err(HostError::Rejected {
                status: *status,
                message: message.clone(),
            });
        }

        let file = match (&upload.format, upload.resource_type) {
            (Some(format), ResourceType::Image | ResourceType::Video) => format!("{}.{format}", upload.public_id),
            _ => upload.public_id.clone(),
        };
        let secure_url = Url::parse(&format!(
            "https://res.example.com/{}/{}/upload/v1/{}/{}",
            credentials.cloud_name, upload.resource_type, upload.folder, file
        ))
        .map_err(|e| HostError::InvalidResponse(e.to_string()))?;

        Ok(StoredAsset {
            secure_url,
            public_id: Some(format!("{}/{}", upload.folder, upload.public_id)),
            bytes: Some(upload.bytes.len() as u64),
        })
    }

    fn page_preview(&self, secure_url: &Url) -> Option<Url> {
        cloudinary::insert_transformation(secure_url, cloudinary::PAGE_PREVIEW_TRANSFORMATION)
    }
}
