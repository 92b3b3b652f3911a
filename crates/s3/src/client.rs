//! S3 client implementation
//!
//! Wraps aws-sdk-s3 and implements the ObjectStore trait from s3migrate-core.

use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier,
};
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_runtime_api::client::result::DispatchFailure;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use jiff::Timestamp;
use s3migrate_core::{
    Credentials, DeleteReport, DeleteTarget, Error, ListPage, ObjectBody, ObjectRecord,
    ObjectStore, ObjectVersion, Result, StoreConfig, VersionMarker, VersionPage,
    normalize_endpoint,
};

/// Smallest part used for multipart uploads
pub const MIN_PART_SIZE: u64 = 8 * 1024 * 1024;

/// S3 limit on parts per multipart upload
const MAX_PARTS: u64 = 10_000;

/// S3 client wrapper
pub struct S3Client {
    inner: aws_sdk_s3::Client,
}

impl S3Client {
    /// Create a new S3 client for one side of a migration
    pub async fn new(config: &StoreConfig) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(Error::Config("bucket name is empty".to_string()));
        }
        let endpoint = config
            .endpoint
            .as_deref()
            .map(normalize_endpoint)
            .transpose()?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Credentials::Static {
            access_key_id,
            secret_access_key,
        } = &config.credentials
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key_id,
                secret_access_key,
                None, // session token
                None, // expiry
                "s3migrate-static-credentials",
            );
            loader = loader.credentials_provider(credentials);
        }

        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }

        if let Some(endpoint) = &endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;

        // Custom endpoints are usually S3-compatible servers without virtual-host DNS
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(endpoint.is_some())
            .build();

        Ok(Self {
            inner: aws_sdk_s3::Client::from_conf(s3_config),
        })
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    async fn put_single(&self, bucket: &str, key: &str, data: Bytes) -> Result<u64> {
        let size = data.len() as u64;
        self.inner
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(size as i64)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error("put_object", &target(bucket, key), e))?;
        Ok(size)
    }

    async fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        buffer: BytesMut,
        finished: bool,
        part_size: usize,
    ) -> Result<u64> {
        let upload_id = self
            .inner
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("create_multipart_upload", &target(bucket, key), e))?
            .upload_id
            .ok_or_else(|| Error::Service(format!("no upload id returned for {}", target(bucket, key))))?;

        match self
            .upload_parts(bucket, key, &upload_id, body, buffer, finished, part_size)
            .await
        {
            Ok(total) => Ok(total),
            Err(e) => {
                if let Err(abort_err) = self
                    .inner
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    tracing::warn!(
                        key = key,
                        upload_id = %upload_id,
                        error = %DisplayErrorContext(&abort_err),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        mut body: ObjectBody,
        mut buffer: BytesMut,
        mut finished: bool,
        part_size: usize,
    ) -> Result<u64> {
        let mut parts = Vec::new();
        let mut part_number: i32 = 1;
        let mut total = 0u64;

        loop {
            if !finished {
                finished = fill_part(&mut body, &mut buffer, part_size).await?;
            }

            while buffer.len() >= part_size || (finished && !buffer.is_empty()) {
                let take = buffer.len().min(part_size);
                let part = buffer.split_to(take).freeze();
                total += part.len() as u64;

                let response = self
                    .inner
                    .upload_part()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(part))
                    .send()
                    .await
                    .map_err(|e| map_sdk_error("upload_part", &target(bucket, key), e))?;

                parts.push(
                    CompletedPart::builder()
                        .set_e_tag(response.e_tag)
                        .part_number(part_number)
                        .build(),
                );
                tracing::debug!(key = key, part = part_number, "Uploaded part");
                part_number += 1;
            }

            if finished {
                break;
            }
        }

        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        self.inner
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| map_sdk_error("complete_multipart_upload", &target(bucket, key), e))?;

        Ok(total)
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        self.inner
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| map_sdk_error("head_bucket", bucket, e))?;
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let mut request = self.inner.list_objects_v2().bucket(bucket);

        if !prefix.is_empty() {
            request = request.prefix(prefix);
        }

        let response = request
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| map_sdk_error("list_objects_v2", bucket, e))?;

        let records = response
            .contents()
            .iter()
            .map(|object| ObjectRecord {
                key: object.key().unwrap_or_default().to_string(),
                size: object.size().unwrap_or(0).max(0) as u64,
                last_modified: object
                    .last_modified()
                    .and_then(|dt| Timestamp::from_second(dt.secs()).ok()),
                version_id: None,
                etag: object.e_tag().map(|s| s.trim_matches('"').to_string()),
            })
            .collect();

        let continuation_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(|s| s.to_string())
        } else {
            None
        };

        Ok(ListPage {
            records,
            continuation_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectRecord> {
        let response = self
            .inner
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("head_object", &target(bucket, key), e))?;

        Ok(ObjectRecord {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            last_modified: response
                .last_modified()
                .and_then(|dt| Timestamp::from_second(dt.secs()).ok()),
            version_id: response.version_id().map(|s| s.to_string()),
            etag: response.e_tag().map(|s| s.trim_matches('"').to_string()),
        })
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ObjectBody> {
        let response = self
            .inner
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error("get_object", &target(bucket, key), e))?;

        let location = target(bucket, key);
        let stream = futures::stream::try_unfold(response.body, move |mut body| {
            let location = location.clone();
            async move {
                let chunk = body
                    .try_next()
                    .await
                    .map_err(|e| Error::Network(format!("reading {location}: {e}")))?;
                Ok::<_, Error>(chunk.map(|bytes| (bytes, body)))
            }
        });

        Ok(stream.boxed())
    }

    async fn put_object_stream(
        &self,
        bucket: &str,
        key: &str,
        mut body: ObjectBody,
        size_hint: Option<u64>,
    ) -> Result<u64> {
        let part_size = part_size_for(size_hint);
        let mut buffer = BytesMut::new();

        let finished = fill_part(&mut body, &mut buffer, part_size).await?;
        if finished && buffer.len() <= part_size {
            return self.put_single(bucket, key, buffer.freeze()).await;
        }

        self.put_multipart(bucket, key, body, buffer, finished, part_size)
            .await
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        marker: Option<VersionMarker>,
    ) -> Result<VersionPage> {
        let marker = marker.unwrap_or_default();
        let response = self
            .inner
            .list_object_versions()
            .bucket(bucket)
            .set_key_marker(marker.key_marker)
            .set_version_id_marker(marker.version_id_marker)
            .send()
            .await
            .map_err(|e| map_sdk_error("list_object_versions", bucket, e))?;

        let mut versions: Vec<ObjectVersion> = response
            .versions()
            .iter()
            .map(|v| ObjectVersion {
                key: v.key().unwrap_or_default().to_string(),
                version_id: v.version_id().unwrap_or("null").to_string(),
                is_delete_marker: false,
            })
            .collect();

        versions.extend(response.delete_markers().iter().map(|m| ObjectVersion {
            key: m.key().unwrap_or_default().to_string(),
            version_id: m.version_id().unwrap_or("null").to_string(),
            is_delete_marker: true,
        }));

        let next = if response.is_truncated().unwrap_or(false) {
            Some(VersionMarker {
                key_marker: response.next_key_marker().map(|s| s.to_string()),
                version_id_marker: response.next_version_id_marker().map(|s| s.to_string()),
            })
        } else {
            None
        };

        Ok(VersionPage { versions, next })
    }

    async fn delete_objects(
        &self,
        bucket: &str,
        targets: Vec<DeleteTarget>,
    ) -> Result<DeleteReport> {
        if targets.is_empty() {
            return Ok(DeleteReport::default());
        }

        let objects = targets
            .into_iter()
            .map(|t| {
                ObjectIdentifier::builder()
                    .key(t.key)
                    .set_version_id(t.version_id)
                    .build()
                    .map_err(|e| Error::General(e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(|e| Error::General(e.to_string()))?;

        let response = self
            .inner
            .delete_objects()
            .bucket(bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| map_sdk_error("delete_objects", bucket, e))?;

        let errors = response
            .errors()
            .iter()
            .map(|e| {
                (
                    e.key().unwrap_or_default().to_string(),
                    format!(
                        "{}: {}",
                        e.code().unwrap_or("unknown"),
                        e.message().unwrap_or("no message")
                    ),
                )
            })
            .collect();

        Ok(DeleteReport {
            deleted: response.deleted().len(),
            errors,
        })
    }
}

fn target(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

/// Part size that keeps an object of `size_hint` bytes within the part limit
pub(crate) fn part_size_for(size_hint: Option<u64>) -> usize {
    let needed = size_hint.map(|s| s.div_ceil(MAX_PARTS)).unwrap_or(0);
    needed.max(MIN_PART_SIZE) as usize
}

/// Read from `body` until `buffer` holds at least one part
///
/// Returns `true` once the body is exhausted.
pub(crate) async fn fill_part(
    body: &mut ObjectBody,
    buffer: &mut BytesMut,
    part_size: usize,
) -> Result<bool> {
    while buffer.len() < part_size {
        match body.next().await {
            Some(chunk) => buffer.extend_from_slice(&chunk?),
            None => return Ok(true),
        }
    }
    Ok(false)
}

/// Translate an SDK failure into the pipeline's error taxonomy
fn map_sdk_error<E>(operation: &str, location: &str, error: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    match &error {
        SdkError::TimeoutError(_) => Error::Timeout(format!("{operation} {location}")),
        SdkError::ConstructionFailure(_) => Error::Config(format!(
            "{operation} {location}: {}",
            DisplayErrorContext(&error)
        )),
        SdkError::DispatchFailure(dispatch) => classify_dispatch(
            dispatch,
            format!("{operation} {location}: {}", DisplayErrorContext(&error)),
        ),
        SdkError::ResponseError(_) => Error::Network(format!(
            "{operation} {location}: {}",
            DisplayErrorContext(&error)
        )),
        SdkError::ServiceError(service) => {
            let status = service.raw().status().as_u16();
            let code = service.err().code();
            let message = format!(
                "{operation} {location}: {} ({})",
                code.unwrap_or("unknown"),
                service.err().message().unwrap_or("no message")
            );
            classify(status, code, message)
        }
        _ => Error::General(format!(
            "{operation} {location}: {}",
            DisplayErrorContext(&error)
        )),
    }
}

/// Split request failures that never reached the server
///
/// I/O and timeouts are worth retrying. Anything else, such as an endpoint
/// that is not a valid URI, fails the same way every time.
fn classify_dispatch(dispatch: &DispatchFailure, message: String) -> Error {
    if dispatch.is_timeout() {
        Error::Timeout(message)
    } else if dispatch.is_io() {
        Error::Network(message)
    } else if dispatch.is_user() || message.to_lowercase().contains("endpoint") {
        Error::Config(message)
    } else {
        Error::Network(message)
    }
}

/// Classify a service error by S3 error code, falling back to HTTP status
pub(crate) fn classify(status: u16, code: Option<&str>, message: String) -> Error {
    match code {
        Some("NoSuchKey" | "NoSuchBucket" | "NotFound" | "NoSuchVersion") => {
            return Error::NotFound(message);
        }
        Some(
            "AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch" | "ExpiredToken"
            | "InvalidToken" | "AllAccessDisabled",
        ) => return Error::Auth(message),
        Some(
            "SlowDown" | "Throttling" | "ThrottlingException" | "RequestLimitExceeded"
            | "TooManyRequests" | "ServiceUnavailable",
        ) => return Error::Throttled(message),
        Some("RequestTimeout") => return Error::Timeout(message),
        _ => {}
    }

    match status {
        404 => Error::NotFound(message),
        401 | 403 => Error::Auth(message),
        429 | 503 => Error::Throttled(message),
        408 => Error::Timeout(message),
        500..=599 => Error::Network(message),
        _ => Error::Service(message),
    }
}
