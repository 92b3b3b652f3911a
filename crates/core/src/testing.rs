//! In-memory ObjectStore used by the pipeline tests
//!
//! Supports pagination, versioned buckets, injected failures and counts the
//! calls the tests make assertions about.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::error::{Error, Result};
use crate::traits::{
    DeleteReport, DeleteTarget, ListPage, ObjectBody, ObjectRecord, ObjectStore, ObjectVersion,
    VersionMarker, VersionPage,
};

#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    /// `None` marks a delete marker
    data: Option<Bytes>,
}

#[derive(Debug, Default)]
struct Bucket {
    versioned: bool,
    objects: BTreeMap<String, Vec<StoredVersion>>,
}

impl Bucket {
    fn current(&self, key: &str) -> Option<&Bytes> {
        self.objects
            .get(key)
            .and_then(|versions| versions.last())
            .and_then(|v| v.data.as_ref())
    }

    fn version_count(&self) -> usize {
        self.objects.values().map(Vec::len).sum()
    }

    fn current_count(&self) -> usize {
        self.objects.keys().filter(|k| self.current(k).is_some()).count()
    }
}

#[derive(Debug, Default)]
struct Faults {
    credentials: bool,
    list: bool,
    head: HashSet<String>,
    get: HashSet<String>,
    panic_get: HashSet<String>,
    put: HashSet<String>,
    delete: HashSet<String>,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    buckets: Mutex<HashMap<String, Bucket>>,
    faults: Mutex<Faults>,
    page_size: usize,
    transfer_delay: Option<Duration>,
    next_version: AtomicUsize,

    list_tokens: Mutex<Vec<Option<String>>>,
    head_calls: Mutex<Vec<String>>,
    get_calls: Mutex<Vec<String>>,
    put_calls: Mutex<Vec<String>>,
    delete_calls: AtomicUsize,

    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,

    /// (current objects, versions) in the bucket at the first put
    state_at_first_put: Mutex<Option<(usize, usize)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            page_size: 1000,
            ..Default::default()
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Hold each transfer open for `delay` so concurrent transfers overlap
    pub fn with_transfer_delay(mut self, delay: Duration) -> Self {
        self.transfer_delay = Some(delay);
        self
    }

    pub fn create_bucket(&self, bucket: &str, versioned: bool) {
        let mut buckets = self.buckets.lock().unwrap();
        buckets.entry(bucket.to_string()).or_default().versioned = versioned;
    }

    pub fn insert(&self, bucket: &str, key: &str, data: &[u8]) {
        let version_id = self.new_version_id();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(bucket.to_string()).or_default();
        let entry = StoredVersion {
            version_id,
            data: Some(Bytes::copy_from_slice(data)),
        };
        let versions = bucket.objects.entry(key.to_string()).or_default();
        if bucket.versioned {
            versions.push(entry);
        } else {
            *versions = vec![entry];
        }
    }

    pub fn contents(&self, bucket: &str) -> BTreeMap<String, Bytes> {
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .map(|b| {
                b.objects
                    .keys()
                    .filter_map(|k| b.current(k).map(|d| (k.clone(), d.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn version_count(&self, bucket: &str) -> usize {
        let buckets = self.buckets.lock().unwrap();
        buckets.get(bucket).map(Bucket::version_count).unwrap_or(0)
    }

    /// Reject every call as if the access key were invalid
    pub fn reject_credentials(&self) {
        self.faults.lock().unwrap().credentials = true;
    }

    pub fn fail_list(&self) {
        self.faults.lock().unwrap().list = true;
    }

    pub fn fail_head(&self, key: &str) {
        self.faults.lock().unwrap().head.insert(key.to_string());
    }

    pub fn fail_get(&self, key: &str) {
        self.faults.lock().unwrap().get.insert(key.to_string());
    }

    pub fn panic_on_get(&self, key: &str) {
        self.faults.lock().unwrap().panic_get.insert(key.to_string());
    }

    pub fn fail_put(&self, key: &str) {
        self.faults.lock().unwrap().put.insert(key.to_string());
    }

    pub fn fail_delete(&self, key: &str) {
        self.faults.lock().unwrap().delete.insert(key.to_string());
    }

    pub fn list_tokens(&self) -> Vec<Option<String>> {
        self.list_tokens.lock().unwrap().clone()
    }

    pub fn head_calls(&self) -> Vec<String> {
        self.head_calls.lock().unwrap().clone()
    }

    pub fn get_calls(&self) -> Vec<String> {
        self.get_calls.lock().unwrap().clone()
    }

    pub fn put_calls(&self) -> Vec<String> {
        self.put_calls.lock().unwrap().clone()
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn state_at_first_put(&self) -> Option<(usize, usize)> {
        *self.state_at_first_put.lock().unwrap()
    }

    fn new_version_id(&self) -> String {
        format!("v{}", self.next_version.fetch_add(1, Ordering::SeqCst))
    }

    fn enter_transfer(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave_transfer(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn no_bucket(bucket: &str) -> Error {
        Error::NotFound(format!("Bucket not found: {bucket}"))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head_bucket(&self, bucket: &str) -> Result<()> {
        if self.faults.lock().unwrap().credentials {
            return Err(Error::Auth("InvalidAccessKeyId".into()));
        }
        let buckets = self.buckets.lock().unwrap();
        buckets
            .get(bucket)
            .map(|_| ())
            .ok_or_else(|| Self::no_bucket(bucket))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        self.list_tokens
            .lock()
            .unwrap()
            .push(continuation_token.clone());
        if self.faults.lock().unwrap().list {
            return Err(Error::Auth("injected list failure".into()));
        }

        let buckets = self.buckets.lock().unwrap();
        let b = buckets.get(bucket).ok_or_else(|| Self::no_bucket(bucket))?;

        let mut records: Vec<ObjectRecord> = b
            .objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| continuation_token.as_deref().is_none_or(|t| k.as_str() > t))
            .filter_map(|(k, _)| b.current(k).map(|d| ObjectRecord::new(k, d.len() as u64)))
            .take(self.page_size + 1)
            .collect();

        let continuation_token = if records.len() > self.page_size {
            records.truncate(self.page_size);
            records.last().map(|r| r.key.clone())
        } else {
            None
        };

        Ok(ListPage {
            records,
            continuation_token,
        })
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectRecord> {
        self.head_calls.lock().unwrap().push(key.to_string());
        if self.faults.lock().unwrap().credentials {
            return Err(Error::Auth("InvalidAccessKeyId".into()));
        }
        if self.faults.lock().unwrap().head.contains(key) {
            return Err(Error::Throttled("injected head failure".into()));
        }

        let buckets = self.buckets.lock().unwrap();
        let b = buckets.get(bucket).ok_or_else(|| Self::no_bucket(bucket))?;
        b.current(key)
            .map(|d| ObjectRecord::new(key, d.len() as u64))
            .ok_or_else(|| Error::NotFound(format!("{bucket}/{key}")))
    }

    async fn get_object_stream(&self, bucket: &str, key: &str) -> Result<ObjectBody> {
        self.get_calls.lock().unwrap().push(key.to_string());
        if self.faults.lock().unwrap().panic_get.contains(key) {
            panic!("injected panic reading {key}");
        }
        self.enter_transfer();

        if self.faults.lock().unwrap().get.contains(key) {
            self.leave_transfer();
            return Err(Error::Service("injected get failure".into()));
        }

        let data = {
            let buckets = self.buckets.lock().unwrap();
            buckets.get(bucket).and_then(|b| b.current(key).cloned())
        };
        let Some(data) = data else {
            self.leave_transfer();
            return Err(Error::NotFound(format!("{bucket}/{key}")));
        };

        if let Some(delay) = self.transfer_delay {
            tokio::time::sleep(delay).await;
        }

        let chunks: Vec<Result<Bytes>> = data.chunks(4).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        Ok(futures::stream::iter(chunks).boxed())
    }

    async fn put_object_stream(
        &self,
        bucket: &str,
        key: &str,
        mut body: ObjectBody,
        _size_hint: Option<u64>,
    ) -> Result<u64> {
        self.put_calls.lock().unwrap().push(key.to_string());
        {
            let buckets = self.buckets.lock().unwrap();
            let mut first = self.state_at_first_put.lock().unwrap();
            if first.is_none() {
                let state = buckets
                    .get(bucket)
                    .map(|b| (b.current_count(), b.version_count()))
                    .unwrap_or((0, 0));
                *first = Some(state);
            }
        }

        let result = async {
            let mut buffer = BytesMut::new();
            while let Some(chunk) = body.next().await {
                buffer.extend_from_slice(&chunk?);
            }
            if self.faults.lock().unwrap().put.contains(key) {
                return Err(Error::Network("injected put failure".into()));
            }
            let written = buffer.len() as u64;
            self.insert(bucket, key, &buffer);
            Ok(written)
        }
        .await;

        self.leave_transfer();
        result
    }

    async fn list_object_versions(
        &self,
        bucket: &str,
        marker: Option<VersionMarker>,
    ) -> Result<VersionPage> {
        let buckets = self.buckets.lock().unwrap();
        let b = buckets.get(bucket).ok_or_else(|| Self::no_bucket(bucket))?;

        let all: Vec<ObjectVersion> = b
            .objects
            .iter()
            .flat_map(|(key, versions)| {
                versions.iter().map(move |v| ObjectVersion {
                    key: key.clone(),
                    version_id: v.version_id.clone(),
                    is_delete_marker: v.data.is_none(),
                })
            })
            .collect();

        let start = match &marker {
            Some(m) => all
                .iter()
                .position(|v| {
                    Some(&v.key) == m.key_marker.as_ref()
                        && Some(&v.version_id) == m.version_id_marker.as_ref()
                })
                .map(|i| i + 1)
                .unwrap_or(0),
            None => 0,
        };

        let versions: Vec<ObjectVersion> =
            all.iter().skip(start).take(self.page_size).cloned().collect();
        let next = if start + versions.len() < all.len() {
            versions.last().map(|v| VersionMarker {
                key_marker: Some(v.key.clone()),
                version_id_marker: Some(v.version_id.clone()),
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
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        let faults: HashSet<String> = self.faults.lock().unwrap().delete.clone();
        let marker_id = self.new_version_id();

        let mut buckets = self.buckets.lock().unwrap();
        let b = buckets
            .get_mut(bucket)
            .ok_or_else(|| Self::no_bucket(bucket))?;

        let mut report = DeleteReport::default();
        for target in targets {
            if faults.contains(&target.key) {
                report
                    .errors
                    .push((target.key, "AccessDenied".to_string()));
                continue;
            }
            match target.version_id {
                Some(version_id) => {
                    if let Some(versions) = b.objects.get_mut(&target.key) {
                        versions.retain(|v| v.version_id != version_id);
                        if versions.is_empty() {
                            b.objects.remove(&target.key);
                        }
                    }
                }
                None if b.versioned => {
                    b.objects
                        .entry(target.key)
                        .or_default()
                        .push(StoredVersion {
                            version_id: marker_id.clone(),
                            data: None,
                        });
                }
                None => {
                    b.objects.remove(&target.key);
                }
            }
            report.deleted += 1;
        }

        Ok(report)
    }
}
