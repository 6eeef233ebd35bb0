use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{config::BehaviorVersion, Client};
use log::{debug, info};

use super::store::{decode, encode, IndexStore, IndexStoreError};
use super::VectorIndex;
use crate::config::S3Config;

/// Keeps the index as a single object under `{tenant}/{object_name}`.
///
/// A `PutObject` replaces the object atomically, so readers see either the old
/// or the new index.
pub struct S3IndexStore {
    s3_client: Client,
    bucket_name: String,
    key: String,
}

impl S3IndexStore {
    pub async fn new(config: S3Config) -> Self {
        let shared_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::with_client(Client::new(&shared_config), config)
    }

    pub fn with_client(s3_client: Client, config: S3Config) -> Self {
        S3IndexStore {
            s3_client,
            key: config.object_key(),
            bucket_name: config.bucket_name,
        }
    }
}

fn remote<E>(err: E) -> IndexStoreError
where
    E: std::error::Error,
{
    IndexStoreError::Remote(DisplayErrorContext(err).to_string())
}

#[async_trait]
impl IndexStore for S3IndexStore {
    async fn load(&self) -> Result<Option<VectorIndex>, IndexStoreError> {
        let result = self
            .s3_client
            .get_object()
            .bucket(&self.bucket_name)
            .key(&self.key)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(SdkError::ServiceError(e)) if e.err().is_no_such_key() => {
                debug!("No index at {}", self.location());
                return Ok(None);
            }
            Err(e) => return Err(remote(e)),
        };

        let body = output.body.collect().await.map_err(remote)?;
        let index = decode(&body.into_bytes())?;
        info!(
            "Loaded index with {} documents from {}",
            index.len(),
            self.location()
        );
        Ok(Some(index))
    }

    async fn save(&self, index: &VectorIndex) -> Result<(), IndexStoreError> {
        let bytes = encode(index)?;
        self.s3_client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&self.key)
            .content_type("application/json")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(remote)?;

        info!(
            "Saved index with {} documents to {}",
            index.len(),
            self.location()
        );
        Ok(())
    }

    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket_name, self.key)
    }
}
