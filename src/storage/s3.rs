use std::{io::Read, sync::Mutex};

use anyhow::anyhow;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    error::SdkError,
    operation::{create_bucket::CreateBucketError, head_bucket::HeadBucketError},
    primitives::{ByteStream, DateTime as S3DateTime},
    types::{
        BucketLocationConstraint, CompletedMultipartUpload, CompletedPart,
        CreateBucketConfiguration,
    },
    Client,
};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::task::spawn_blocking;

use crate::{
    config::S3Settings,
    error::{Error, Result},
    progress::UploadSource,
};

use super::{BlobDescriptor, BlobStore, StorageStats, CONTENT_TYPE};

const MIN_PART_SIZE: u64 = 8 * 1024 * 1024;
const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
const MAX_PARTS: u64 = 10_000;
const DEFAULT_REGION: &str = "us-east-1";
const CREDENTIALS_PROVIDER: &str = "stowaway";

type BoxedSource = Box<dyn UploadSource>;

#[derive(Debug)]
pub struct S3Store {
    client: Client,
    region: String,
    stats: Mutex<StorageStats>,
}

#[derive(Debug)]
struct Part {
    bytes: Vec<u8>,
    digest: String,
}

impl S3Store {
    pub async fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None,
            None,
            CREDENTIALS_PROVIDER,
        );

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint_url) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.endpoint_url.is_some())
            .build();

        S3Store {
            client: Client::from_conf(s3_config),
            region: settings.region.clone(),
            stats: Mutex::new(StorageStats::new()),
        }
    }

    async fn put_single(&self, container: &str, name: &str, part: Part) -> Result<()> {
        let size = part.bytes.len() as u64;
        self.client
            .put_object()
            .bucket(container)
            .key(name)
            .content_type(CONTENT_TYPE)
            .content_md5(part.digest)
            .body(ByteStream::from(part.bytes))
            .send()
            .await?;

        self.stats.lock().unwrap().add_upload_part(size);
        Ok(())
    }

    async fn put_multipart(
        &self,
        container: &str,
        name: &str,
        source: BoxedSource,
        first: Part,
        part_size: u64,
    ) -> Result<()> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(container)
            .key(name)
            .content_type(CONTENT_TYPE)
            .send()
            .await?;
        self.stats.lock().unwrap().add_request();

        let upload_id = response
            .upload_id
            .ok_or_else(|| anyhow!("no upload id returned for `{name}`"))?;

        match self
            .upload_parts(container, name, &upload_id, source, first, part_size)
            .await
        {
            Ok(parts) => {
                let upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();
                self.client
                    .complete_multipart_upload()
                    .bucket(container)
                    .key(name)
                    .upload_id(&upload_id)
                    .multipart_upload(upload)
                    .send()
                    .await?;
                self.stats.lock().unwrap().add_request();
                Ok(())
            }
            Err(err) => {
                let aborted = self
                    .client
                    .abort_multipart_upload()
                    .bucket(container)
                    .key(name)
                    .upload_id(&upload_id)
                    .send()
                    .await;
                if let Err(abort_err) = aborted {
                    warn!("couldn't abort upload of {name}: {}", Error::from(abort_err));
                }

                Err(err)
            }
        }
    }

    async fn upload_parts(
        &self,
        container: &str,
        name: &str,
        upload_id: &str,
        mut source: BoxedSource,
        first: Part,
        part_size: u64,
    ) -> Result<Vec<CompletedPart>> {
        let mut completed = vec![];
        let mut part = first;
        let mut uploaded = 0;

        loop {
            let size = part.bytes.len() as u64;
            let part_number = next_part_number(name, completed.len(), uploaded + size)?;
            let response = self
                .client
                .upload_part()
                .bucket(container)
                .key(name)
                .upload_id(upload_id)
                .part_number(part_number)
                .content_md5(part.digest)
                .body(ByteStream::from(part.bytes))
                .send()
                .await?;

            self.stats.lock().unwrap().add_upload_part(size);
            uploaded += size;
            debug!("uploaded part {part_number} of {name}");

            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(response.e_tag)
                    .build(),
            );

            (source, part) = next_part(source, part_size).await?;
            if part.bytes.is_empty() {
                break;
            }
        }

        Ok(completed)
    }
}

#[async_trait]
impl BlobStore for S3Store {
    async fn container_exists(&self, container: &str) -> Result<bool> {
        let response = self
            .client
            .head_bucket()
            .bucket(container)
            .send()
            .await
            .map_err(SdkError::into_service_error);
        self.stats.lock().unwrap().add_request();

        match response {
            Ok(_) => Ok(true),
            Err(HeadBucketError::NotFound(_)) => Ok(false),
            Err(err) => Err(Error::other(err)),
        }
    }

    async fn create_container(&self, container: &str) -> Result<()> {
        let mut request = self.client.create_bucket().bucket(container);
        if self.region != DEFAULT_REGION {
            let constraint = BucketLocationConstraint::from(self.region.as_str());
            let configuration = CreateBucketConfiguration::builder()
                .location_constraint(constraint)
                .build();
            request = request.create_bucket_configuration(configuration);
        }

        let response = request.send().await.map_err(SdkError::into_service_error);
        self.stats.lock().unwrap().add_request();

        match response {
            Ok(_) => Ok(()),
            Err(CreateBucketError::BucketAlreadyOwnedByYou(_)) => {
                debug!("container {container} was created concurrently");
                Ok(())
            }
            Err(CreateBucketError::BucketAlreadyExists(_)) => {
                Err(Error::ContainerOwnedElsewhere(container.to_owned()))
            }
            Err(err) => Err(Error::other(err)),
        }
    }

    async fn upload(
        &self,
        container: &str,
        name: &str,
        source: BoxedSource,
        size: u64,
    ) -> Result<()> {
        let part_size = part_size_for(name, size)?;
        let (source, first) = next_part(source, part_size).await?;
        if (first.bytes.len() as u64) < part_size {
            let uploaded = first.bytes.len() as u64;
            if uploaded != size {
                warn!("{name} is {uploaded} bytes, expected {size}");
            }
            self.put_single(container, name, first).await?;
        } else {
            self.put_multipart(container, name, source, first, part_size)
                .await?;
        }

        self.stats.lock().unwrap().add_upload();
        Ok(())
    }

    async fn list(&self, container: &str) -> Result<Vec<BlobDescriptor>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(container)
            .into_paginator()
            .send();

        let mut blobs = vec![];
        while let Some(page) = pages.try_next().await? {
            self.stats.lock().unwrap().add_request();

            for object in page.contents.unwrap_or_default() {
                let name = object
                    .key
                    .ok_or_else(|| Error::InvalidBlobName(String::new()))?;
                let Some(last_modified) = object.last_modified.as_ref().and_then(to_utc) else {
                    return Err(Error::MissingLastModified(name));
                };
                let size = object
                    .size
                    .and_then(|size| u64::try_from(size).ok())
                    .unwrap_or(0);

                blobs.push(BlobDescriptor {
                    name,
                    container: container.to_owned(),
                    last_modified,
                    size,
                });
            }
        }

        Ok(blobs)
    }

    async fn delete(&self, container: &str, name: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(container)
            .key(name)
            .send()
            .await?;

        self.stats.lock().unwrap().add_delete();
        Ok(())
    }

    fn stats(&self) -> StorageStats {
        *self.stats.lock().unwrap()
    }
}

/// Reads the next part off the blocking pool. An empty part means the source
/// is exhausted.
async fn next_part(mut source: BoxedSource, part_size: u64) -> Result<(BoxedSource, Part)> {
    let (source, bytes) = spawn_blocking(move || {
        let mut bytes = Vec::with_capacity(usize::try_from(part_size).unwrap_or_default());
        let result = source
            .by_ref()
            .take(part_size)
            .read_to_end(&mut bytes);
        (source, result.map(|_| bytes))
    })
    .await?;

    let bytes = bytes?;
    let digest = md5_base64(&bytes);
    Ok((source, Part { bytes, digest }))
}

/// Smallest part size that fits `size` bytes into the part limit.
fn part_size_for(name: &str, size: u64) -> Result<u64> {
    let part_size = size.div_ceil(MAX_PARTS).max(MIN_PART_SIZE);
    if part_size > MAX_PART_SIZE {
        return Err(Error::BlobTooLarge {
            name: name.to_owned(),
            size,
        });
    }

    Ok(part_size)
}

/// Stops a source that outgrew its declared size before the store rejects it.
fn next_part_number(name: &str, completed: usize, uploaded: u64) -> Result<i32> {
    let part_number = completed as u64 + 1;
    if part_number > MAX_PARTS {
        return Err(Error::BlobTooLarge {
            name: name.to_owned(),
            size: uploaded,
        });
    }

    i32::try_from(part_number).map_err(Error::other)
}

fn md5_base64(bytes: &[u8]) -> String {
    let digest = md5::compute(bytes);
    BASE64_STANDARD.encode(digest.0)
}

fn to_utc(time: &S3DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::{TimeZone, Utc};
    use indicatif::ProgressBar;

    use crate::{error::Error, progress::ProgressReader};

    use super::{
        md5_base64, next_part, next_part_number, part_size_for, to_utc, S3DateTime, MAX_PARTS,
        MAX_PART_SIZE, MIN_PART_SIZE,
    };

    const GIB: u64 = 1024 * 1024 * 1024;

    #[test]
    fn md5_is_base64_encoded() {
        assert_eq!(md5_base64(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn s3_time_converts_to_utc() {
        let time = S3DateTime::from_secs(1_704_164_645);
        let expected = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(to_utc(&time), Some(expected));
    }

    #[test]
    fn small_uploads_use_minimum_part_size() {
        assert_eq!(part_size_for("a", 0).unwrap(), MIN_PART_SIZE);
        assert_eq!(part_size_for("a", GIB).unwrap(), MIN_PART_SIZE);
        assert_eq!(part_size_for("a", MIN_PART_SIZE * MAX_PARTS).unwrap(), MIN_PART_SIZE);
    }

    #[test]
    fn large_uploads_fit_in_part_limit() {
        for size in [100 * GIB, 1024 * GIB, 5 * 1024 * GIB] {
            let part_size = part_size_for("big", size).unwrap();
            assert!(part_size > MIN_PART_SIZE);
            assert!(part_size <= MAX_PART_SIZE);
            assert!(part_size * MAX_PARTS >= size);
        }
        assert_eq!(part_size_for("big", 100 * GIB).unwrap(), 10_737_419);
    }

    #[test]
    fn oversized_upload_is_rejected_up_front() {
        let result = part_size_for("huge", 60 * 1024 * GIB);
        assert!(matches!(result, Err(Error::BlobTooLarge { size, .. }) if size == 60 * 1024 * GIB));
    }

    #[test]
    fn part_numbers_stop_at_limit() {
        assert_eq!(next_part_number("a", 0, 1).unwrap(), 1);
        assert_eq!(next_part_number("a", 9_999, 1).unwrap(), 10_000);
        assert!(matches!(
            next_part_number("a", 10_000, 42),
            Err(Error::BlobTooLarge { size: 42, .. })
        ));
    }

    #[tokio::test]
    async fn parts_split_the_source() {
        let part_size = 1024;
        let source = ProgressReader::new(Cursor::new(vec![9_u8; 1536]), ProgressBar::hidden());

        let (source, first) = next_part(Box::new(source), part_size).await.unwrap();
        let (source, second) = next_part(source, part_size).await.unwrap();
        let (_, third) = next_part(source, part_size).await.unwrap();

        assert_eq!(first.bytes.len(), 1024);
        assert_eq!(second.bytes.len(), 512);
        assert!(third.bytes.is_empty());
    }
}
