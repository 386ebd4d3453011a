//! HTTP / HTTPS endpoint implementation.
//!
//! A reqwest client with a per-endpoint cookie session. Listing pages are
//! decoded by the configured parser strategy; downloads stream to disk with
//! an incremental MD5 digest.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::{ConfigError, EndpointConfig};

use super::listing::ListingParserKind;
use super::upload::UploadStrategy;
use super::{
    ArchiveEndpoint, EndpointError, Listing, CONNECT_ATTEMPTS, CONNECT_BACKOFF, INFO_BACKOFF,
    INFO_RETRIES,
};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux; rv:109.0) Gecko/20100101 Firefox/115.0";

/// HTTP / HTTPS archive endpoint.
pub struct HttpEndpoint {
    code: String,
    base: Url,
    first_page: String,
    utc_offset_minutes: i32,
    parser: ListingParserKind,
    upload_strategy: UploadStrategy,
    script: Option<Url>,
    client: Client,
    connected: AtomicBool,
    warnings: Mutex<Vec<String>>,
}

impl HttpEndpoint {
    pub fn new(
        code: &str,
        config: &EndpointConfig,
        parser: ListingParserKind,
        upload_strategy: UploadStrategy,
    ) -> Result<Self, ConfigError> {
        let base_url = format!("{}://{}/", config.protocol.scheme(), config.host);
        let base = Url::parse(&base_url).map_err(|e| ConfigError::InvalidEndpoint {
            code: code.to_string(),
            reason: format!("{base_url}: {e}"),
        })?;
        let script = match &config.script {
            Some(raw) => Some(Url::parse(raw).map_err(|e| ConfigError::InvalidEndpoint {
                code: code.to_string(),
                reason: format!("{raw}: {e}"),
            })?),
            None => None,
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(30)))
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| ConfigError::InvalidEndpoint {
                code: code.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            code: code.to_string(),
            base,
            first_page: config.first_page.clone(),
            utc_offset_minutes: config.utc_offset_minutes,
            parser,
            upload_strategy,
            script,
            client,
            connected: AtomicBool::new(false),
            warnings: Mutex::new(Vec::new()),
        })
    }

    fn push_warning(&self, message: String) {
        self.warnings.lock().unwrap().push(message);
    }

    fn url_for(&self, path: &str) -> Result<Url, EndpointError> {
        self.base.join(path).map_err(|e| EndpointError::InvalidUrl {
            url: format!("{}{path}", self.base),
            reason: e.to_string(),
        })
    }

    fn script_url(&self, suffix: &str) -> Result<Url, EndpointError> {
        let script = self.script.as_ref().ok_or_else(|| EndpointError::Upload {
            code: self.code.clone(),
            reason: "no upload script configured".to_string(),
        })?;
        script.join(suffix).map_err(|e| EndpointError::InvalidUrl {
            url: format!("{script}{suffix}"),
            reason: e.to_string(),
        })
    }

    /// CDDIS-style form upload: login for cookies, one multipart POST, and a
    /// confirmation manifest in the response body.
    async fn upload_cddis(&self, files: &[PathBuf]) -> Result<Vec<String>, EndpointError> {
        let login = self.script_url("login")?;
        let rsp = self
            .client
            .get(login)
            .send()
            .await
            .map_err(|e| self.upload_error(e.to_string()))?;
        let body = rsp.text().await.map_err(|e| self.upload_error(e.to_string()))?;
        if !body.contains("Welcome") {
            self.push_warning(body);
            return Ok(Vec::new());
        }

        let mut form = Form::new().text("fileType", "VLBI");
        let mut attached = 0usize;
        for path in files {
            if !path.exists() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| self.upload_error(format!("{}: {e}", path.display())))?;
            form = form.part("file[]", Part::bytes(data).file_name(name.to_string()));
            attached += 1;
        }
        if attached == 0 {
            return Ok(Vec::new());
        }

        let upload = self.script_url("upload/")?;
        let rsp = self
            .client
            .post(upload)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.upload_error(e.to_string()))?;
        let text = rsp.text().await.map_err(|e| self.upload_error(e.to_string()))?;
        Ok(parse_cddis_manifest(&text))
    }

    /// OPAR-style form upload: one POST per file, response body names the
    /// accepted file.
    async fn upload_opar(&self, files: &[PathBuf]) -> Result<Vec<String>, EndpointError> {
        let mut uploaded = Vec::new();
        for path in files {
            if !path.exists() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let data = tokio::fs::read(path)
                .await
                .map_err(|e| self.upload_error(format!("{}: {e}", path.display())))?;
            let form = Form::new()
                .part("fichier", Part::bytes(data).file_name(name.to_string()))
                .text("mode", "upload");
            let script = self.script_url("")?;
            let rsp = self
                .client
                .post(script)
                .multipart(form)
                .send()
                .await
                .map_err(|e| self.upload_error(e.to_string()))?;
            let text = rsp.text().await.map_err(|e| self.upload_error(e.to_string()))?;
            uploaded.push(text.trim().to_string());
        }
        Ok(uploaded)
    }

    fn upload_error(&self, reason: String) -> EndpointError {
        EndpointError::Upload {
            code: self.code.clone(),
            reason,
        }
    }
}

/// Names confirmed by a CDDIS upload response (`upload: <name>` lines).
fn parse_cddis_manifest(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| line.contains("upload:"))
        .filter_map(|line| line.split(':').nth(1))
        .map(|name| name.trim().to_string())
        .collect()
}

#[async_trait]
impl ArchiveEndpoint for HttpEndpoint {
    fn code(&self) -> &str {
        &self.code
    }

    async fn connect(&self) -> Result<(), EndpointError> {
        let first = self.url_for(&self.first_page)?;
        let mut last_reason = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            match self.client.get(first.clone()).send().await {
                Ok(rsp) if rsp.status().is_success() => {
                    self.connected.store(true, Ordering::SeqCst);
                    debug!(code = %self.code, url = %first, "HTTP session established");
                    return Ok(());
                }
                Ok(rsp) => {
                    last_reason = rsp.status().to_string();
                    self.push_warning(format!(
                        "connect to {} attempt {attempt} [{last_reason}]",
                        self.base
                    ));
                }
                Err(e) => {
                    last_reason = e.to_string();
                    self.push_warning(format!(
                        "connect to {} attempt {attempt} [{last_reason}]",
                        self.base
                    ));
                }
            }
            if attempt < CONNECT_ATTEMPTS {
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
        }
        Err(EndpointError::Connect {
            url: self.base.to_string(),
            reason: last_reason,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn list_dir(&self, path: &str) -> Result<Listing, EndpointError> {
        let url = self.url_for(path)?;
        let rsp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| EndpointError::Listing {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        let content = rsp.text().await.map_err(|e| EndpointError::Listing {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.parser.parse(&content, self.utc_offset_minutes))
    }

    async fn file_info(&self, path: &str) -> Result<Option<i64>, EndpointError> {
        if !self.is_connected() {
            return Err(EndpointError::NotConnected(self.code.clone()));
        }
        let url = self.url_for(path)?;
        if let Ok(rsp) = self.client.head(url).send().await {
            if rsp.status().is_success() {
                if let Some(stamp) = rsp
                    .headers()
                    .get(reqwest::header::LAST_MODIFIED)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                {
                    return Ok(Some(stamp.timestamp()));
                }
            } else if rsp.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
        }
        // Fall back to the parent listing when HEAD is unhelpful.
        let (dir, base) = match path.rsplit_once('/') {
            Some((dir, base)) => (dir.to_string(), base.to_string()),
            None => (String::new(), path.to_string()),
        };
        for attempt in 0..INFO_RETRIES {
            let listing = self.list_dir(&dir).await?;
            if let Some(file) = listing.files.iter().find(|f| f.name == base) {
                return Ok(Some(file.timestamp));
            }
            if attempt + 1 < INFO_RETRIES {
                tokio::time::sleep(INFO_BACKOFF).await;
            }
        }
        Ok(None)
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<String, EndpointError> {
        if !self.is_connected() {
            return Err(EndpointError::NotConnected(self.code.clone()));
        }
        let url = self.url_for(remote)?;
        let download_error = |reason: String| EndpointError::Download {
            path: remote.to_string(),
            reason,
        };

        let mut rsp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| download_error(e.to_string()))?;

        let mut context = md5::Context::new();
        let mut file = tokio::fs::File::create(local)
            .await
            .map_err(|e| download_error(e.to_string()))?;
        while let Some(chunk) = rsp.chunk().await.map_err(|e| download_error(e.to_string()))? {
            context.consume(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| download_error(e.to_string()))?;
        }
        file.flush().await.map_err(|e| download_error(e.to_string()))?;
        Ok(format!("{:x}", context.compute()))
    }

    async fn upload(&self, files: &[PathBuf]) -> Result<Vec<String>, EndpointError> {
        match self.upload_strategy {
            UploadStrategy::Cddis => self.upload_cddis(files).await,
            UploadStrategy::Opar => self.upload_opar(files).await,
            _ => {
                self.push_warning(format!("cannot upload to {}", self.code));
                Ok(Vec::new())
            }
        }
    }

    fn drain_warnings(&self) -> Vec<String> {
        std::mem::take(&mut self.warnings.lock().unwrap())
    }
}
