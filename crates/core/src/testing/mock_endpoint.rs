//! Mock archive endpoint for testing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::endpoint::{ArchiveEndpoint, EndpointError, Listing};

/// Mock implementation of `ArchiveEndpoint`.
///
/// Scripted listings and downloadable files, a controllable upload
/// confirmation set, and recorded calls for assertions.
pub struct MockEndpoint {
    code: String,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    listings: Mutex<HashMap<String, Listing>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    /// Remote paths that serve N empty downloads before real content.
    empty_first: Mutex<HashMap<String, u32>>,
    /// `None` confirms every upload; otherwise only the listed names.
    confirm: Mutex<Option<Vec<String>>>,
    uploads: Mutex<Vec<Vec<String>>>,
    downloads: Mutex<Vec<String>>,
    warnings: Mutex<Vec<String>>,
}

impl MockEndpoint {
    pub fn new(code: &str) -> Self {
        Self {
            code: code.to_string(),
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            listings: Mutex::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            empty_first: Mutex::new(HashMap::new()),
            confirm: Mutex::new(None),
            uploads: Mutex::new(Vec::new()),
            downloads: Mutex::new(Vec::new()),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_listing(&self, path: &str, listing: Listing) {
        self.listings.lock().unwrap().insert(path.to_string(), listing);
    }

    /// Serve `bytes` for a remote path. The file is also copyable from disk
    /// via `add_file_from`.
    pub fn add_file(&self, path: &str, bytes: Vec<u8>) {
        self.files.lock().unwrap().insert(path.to_string(), bytes);
    }

    pub fn add_file_from(&self, remote: &str, local: &Path) {
        let bytes = std::fs::read(local).expect("read fixture");
        self.add_file(remote, bytes);
    }

    /// The first `count` downloads of `path` produce an empty file.
    pub fn serve_empty_first(&self, path: &str, count: u32) {
        self.empty_first.lock().unwrap().insert(path.to_string(), count);
    }

    pub fn confirm_only(&self, names: &[&str]) {
        *self.confirm.lock().unwrap() = Some(names.iter().map(|n| n.to_string()).collect());
    }

    pub fn confirm_all(&self) {
        *self.confirm.lock().unwrap() = None;
    }

    /// Basename batches passed to `upload`, in call order.
    pub fn uploaded_batches(&self) -> Vec<Vec<String>> {
        self.uploads.lock().unwrap().clone()
    }

    /// Remote paths passed to `download`, in call order.
    pub fn downloaded_paths(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveEndpoint for MockEndpoint {
    fn code(&self) -> &str {
        &self.code
    }

    async fn connect(&self) -> Result<(), EndpointError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            self.warnings
                .lock()
                .unwrap()
                .push(format!("could not connect to {}", self.code));
            return Err(EndpointError::Connect {
                url: self.code.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn list_dir(&self, path: &str) -> Result<Listing, EndpointError> {
        Ok(self
            .listings
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default())
    }

    async fn file_info(&self, path: &str) -> Result<Option<i64>, EndpointError> {
        let (dir, base) = match path.rsplit_once('/') {
            Some((dir, base)) => (dir.to_string(), base.to_string()),
            None => (String::new(), path.to_string()),
        };
        Ok(self
            .listings
            .lock()
            .unwrap()
            .get(&dir)
            .and_then(|l| l.files.iter().find(|f| f.name == base))
            .map(|f| f.timestamp))
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<String, EndpointError> {
        self.downloads.lock().unwrap().push(remote.to_string());

        {
            let mut empty = self.empty_first.lock().unwrap();
            if let Some(count) = empty.get_mut(remote) {
                if *count > 0 {
                    *count -= 1;
                    std::fs::write(local, b"").map_err(|e| EndpointError::Download {
                        path: remote.to_string(),
                        reason: e.to_string(),
                    })?;
                    return Ok(format!("{:x}", md5::compute(b"")));
                }
            }
        }

        let bytes = self
            .files
            .lock()
            .unwrap()
            .get(remote)
            .cloned()
            .ok_or_else(|| EndpointError::Download {
                path: remote.to_string(),
                reason: "no such file".to_string(),
            })?;
        std::fs::write(local, &bytes).map_err(|e| EndpointError::Download {
            path: remote.to_string(),
            reason: e.to_string(),
        })?;
        Ok(format!("{:x}", md5::compute(&bytes)))
    }

    async fn upload(&self, files: &[PathBuf]) -> Result<Vec<String>, EndpointError> {
        let names: Vec<String> = files
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .map(|n| n.to_string())
            .collect();
        self.uploads.lock().unwrap().push(names.clone());

        let confirm = self.confirm.lock().unwrap();
        Ok(match confirm.as_ref() {
            Some(allowed) => names
                .into_iter()
                .filter(|n| allowed.contains(n))
                .collect(),
            None => names,
        })
    }

    fn drain_warnings(&self) -> Vec<String> {
        std::mem::take(&mut self.warnings.lock().unwrap())
    }
}
