use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{MetadataDirective, StorageClass};
use aws_smithy_types::error::display::DisplayErrorContext;
use tracing::{debug, info, trace, warn};

use crate::config::args::value_parser::url::check_scheme;
use crate::config::{BackupConfig, ClientConfig};
use crate::storage::{ObjectStore, Store, StoreFactory};
use crate::types::DEFAULT_STORAGE_CLASS;
use crate::types::error::BackupError;

pub use client_cache::ClientCache;

mod client_builder;
mod client_cache;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const NOT_IMPLEMENTED_ERROR_CODE: &str = "NotImplemented";

#[derive(Debug, Default, Clone)]
pub struct S3StoreFactory {}

#[async_trait]
impl StoreFactory for S3StoreFactory {
    async fn connect(&self, user_id: &str, config: &BackupConfig) -> Result<Store> {
        Ok(Box::new(S3Gateway::connect(user_id, config).await?))
    }
}

/// `ObjectStore` over an S3-compatible endpoint.
///
/// The client itself lives in the process-wide `ClientCache`, so a reset from any clone
/// makes every clone reconnect on its next call.
#[derive(Clone)]
pub struct S3Gateway {
    bucket: String,
    identity: String,
    client_config: ClientConfig,
}

impl S3Gateway {
    pub async fn connect(user_id: &str, config: &BackupConfig) -> Result<Self> {
        let client_config = config.client_config();
        validate_client_config(&client_config)?;

        let bucket = config.s3_bucket.trim();
        if bucket.is_empty() {
            return Err(anyhow!(BackupError::Configuration(
                "S3_BUCKET is not set".to_string()
            )));
        }

        let gateway = Self {
            bucket: bucket.to_string(),
            identity: client_config.identity(user_id),
            client_config,
        };
        gateway.client().await;

        info!(
            user_id = user_id,
            endpoint = gateway.client_config.endpoint_url,
            bucket = gateway.bucket,
            secure = gateway.client_config.is_secure(),
            "s3 gateway has been connected."
        );

        Ok(gateway)
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn client(&self) -> Arc<Client> {
        ClientCache::global()
            .get_or_create(&self.identity, &self.client_config)
            .await
    }

    async fn change_storage_class(&self, client: &Client, key: &str, storage_class: &str) {
        let (content_type, metadata) = match client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head_object_output) => (
                head_object_output
                    .content_type()
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string(),
                head_object_output.metadata().cloned().unwrap_or_default(),
            ),
            Err(e) => {
                debug!(
                    key = key,
                    error = DisplayErrorContext(&e).to_string(),
                    "head_object() before storage class change failed."
                );
                (DEFAULT_CONTENT_TYPE.to_string(), HashMap::new())
            }
        };

        let metadata_directive = if metadata.is_empty() {
            MetadataDirective::Copy
        } else {
            MetadataDirective::Replace
        };

        let result = client
            .copy_object()
            .copy_source(copy_source(&self.bucket, key))
            .bucket(&self.bucket)
            .key(key)
            .storage_class(StorageClass::from(
                storage_class.to_ascii_uppercase().as_str(),
            ))
            .metadata_directive(metadata_directive)
            .content_type(content_type)
            .set_metadata((!metadata.is_empty()).then_some(metadata))
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(
                    key = key,
                    storage_class = storage_class,
                    "storage class has been changed."
                );
            }
            Err(e) if e.code() == Some(NOT_IMPLEMENTED_ERROR_CODE) => {
                warn!(
                    key = key,
                    storage_class = storage_class,
                    "storage class change is not supported by the endpoint. object is kept as STANDARD."
                );
            }
            Err(e) => {
                warn!(
                    key = key,
                    storage_class = storage_class,
                    error = DisplayErrorContext(&e).to_string(),
                    "storage class change failed. object is kept as STANDARD."
                );
            }
        }
    }
}

#[async_trait]
impl ObjectStore for S3Gateway {
    async fn test_connection(&self) -> bool {
        match self.client().await.list_buckets().send().await {
            Ok(_) => {
                debug!(endpoint = self.client_config.endpoint_url, "connection test succeeded.");
                true
            }
            Err(e) => {
                warn!(
                    endpoint = self.client_config.endpoint_url,
                    error = DisplayErrorContext(&e).to_string(),
                    "connection test failed."
                );
                ClientCache::global().remove(&self.identity);
                false
            }
        }
    }

    async fn list_existing_keys(&self) -> Result<HashSet<String>> {
        let client = self.client().await;
        let mut keys = HashSet::new();
        let mut continuation_token = None;

        loop {
            let list_objects_output = client
                .list_objects_v2()
                .bucket(&self.bucket)
                .set_continuation_token(continuation_token)
                .send()
                .await
                .context("aws_sdk_s3::client::list_objects_v2() failed.")?;

            keys.extend(
                list_objects_output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(|key| key.to_string())),
            );

            if !list_objects_output.is_truncated().unwrap_or(false) {
                break;
            }

            continuation_token = list_objects_output
                .next_continuation_token()
                .map(|token| token.to_string());
            if continuation_token.is_none() {
                break;
            }
        }

        debug!(bucket = self.bucket, count = keys.len(), "existing keys have been listed.");
        Ok(keys)
    }

    async fn put(
        &self,
        local_path: &Path,
        key: &str,
        storage_class: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<bool> {
        let body = match ByteStream::from_path(local_path).await {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    path = local_path.display().to_string(),
                    error = e.to_string(),
                    "failed to open local file."
                );
                return Ok(false);
            }
        };

        let content_type = mime_guess::from_path(local_path)
            .first_or_octet_stream()
            .to_string();

        trace!(
            key = key,
            bucket = self.bucket,
            storage_class = storage_class,
            "put_object() start."
        );

        let client = self.client().await;
        let result = client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .set_metadata(metadata)
            .send()
            .await;

        if let Err(e) = result {
            warn!(
                key = key,
                error = DisplayErrorContext(&e).to_string(),
                "put_object() failed."
            );
            return Ok(false);
        }

        if requires_storage_class_change(storage_class) {
            self.change_storage_class(&client, key, storage_class).await;
        }

        Ok(true)
    }

    async fn exists(&self, key: &str) -> bool {
        match self
            .client()
            .await
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                if !e.as_service_error().is_some_and(|e| e.is_not_found()) {
                    warn!(
                        key = key,
                        error = DisplayErrorContext(&e).to_string(),
                        "head_object() failed."
                    );
                }
                false
            }
        }
    }

    fn reset_connection(&self) {
        if ClientCache::global().remove(&self.identity) {
            info!(
                endpoint = self.client_config.endpoint_url,
                "s3 connection has been reset."
            );
        }
    }
}

fn validate_client_config(client_config: &ClientConfig) -> Result<(), BackupError> {
    if client_config.endpoint_url.is_empty() {
        return Err(BackupError::Configuration(
            "S3_ENDPOINT is not set".to_string(),
        ));
    }
    check_scheme(&client_config.endpoint_url)
        .map_err(|e| BackupError::Configuration(format!("S3_ENDPOINT: {e}")))?;

    if client_config.access_keys.is_empty() {
        return Err(BackupError::Configuration(
            "S3_ACCESS_KEY and S3_SECRET_KEY are required".to_string(),
        ));
    }

    Ok(())
}

fn requires_storage_class_change(storage_class: &str) -> bool {
    !storage_class.is_empty() && !storage_class.eq_ignore_ascii_case(DEFAULT_STORAGE_CLASS)
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", urlencoding::encode(key))
}
