//! FTP / FTPS endpoint implementation.
//!
//! Wraps the blocking suppaftp client; every session operation runs on the
//! blocking pool behind a shared session handle. Listing timestamps come from
//! `LIST` lines, decoded with the endpoint's UTC offset.

use std::io::Cursor;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Utc};
use suppaftp::native_tls::TlsConnector;
use suppaftp::types::FileType;
use suppaftp::{FtpStream, Mode, NativeTlsConnector, NativeTlsFtpStream};
use tracing::debug;

use crate::config::{EndpointConfig, Protocol};

use super::listing::local_to_timestamp;
use super::upload::UploadStrategy;
use super::{
    ArchiveEndpoint, EndpointError, Listing, RemoteFile, CONNECT_ATTEMPTS, CONNECT_BACKOFF,
    INFO_BACKOFF, INFO_RETRIES, T0_TIMESTAMP,
};

enum FtpSession {
    Plain(FtpStream),
    Secure(NativeTlsFtpStream),
}

impl FtpSession {
    fn list(&mut self, path: &str) -> Result<Vec<String>, String> {
        match self {
            FtpSession::Plain(s) => s.list(Some(path)).map_err(|e| e.to_string()),
            FtpSession::Secure(s) => s.list(Some(path)).map_err(|e| e.to_string()),
        }
    }

    fn retr(&mut self, path: &str) -> Result<Vec<u8>, String> {
        match self {
            FtpSession::Plain(s) => s
                .retr_as_buffer(path)
                .map(|c| c.into_inner())
                .map_err(|e| e.to_string()),
            FtpSession::Secure(s) => s
                .retr_as_buffer(path)
                .map(|c| c.into_inner())
                .map_err(|e| e.to_string()),
        }
    }

    fn put(&mut self, name: &str, data: Vec<u8>) -> Result<(), String> {
        let mut reader = Cursor::new(data);
        match self {
            FtpSession::Plain(s) => s.put_file(name, &mut reader).map(|_| ()).map_err(|e| e.to_string()),
            FtpSession::Secure(s) => s.put_file(name, &mut reader).map(|_| ()).map_err(|e| e.to_string()),
        }
    }

    fn quit(&mut self) {
        match self {
            FtpSession::Plain(s) => {
                let _ = s.quit();
            }
            FtpSession::Secure(s) => {
                let _ = s.quit();
            }
        }
    }
}

/// FTP / FTPS archive endpoint.
pub struct FtpEndpoint {
    code: String,
    host: String,
    secure: bool,
    username: String,
    password: String,
    utc_offset_minutes: i32,
    timeout: Duration,
    upload_strategy: UploadStrategy,
    session: Arc<Mutex<Option<FtpSession>>>,
    warnings: Mutex<Vec<String>>,
}

impl FtpEndpoint {
    pub fn new(code: &str, config: &EndpointConfig, upload_strategy: UploadStrategy) -> Self {
        Self {
            code: code.to_string(),
            host: config.host.clone(),
            secure: config.protocol == Protocol::Ftps,
            username: config.username.clone(),
            password: config.password.clone(),
            utc_offset_minutes: config.utc_offset_minutes,
            timeout: Duration::from_secs(config.timeout_secs),
            upload_strategy,
            session: Arc::new(Mutex::new(None)),
            warnings: Mutex::new(Vec::new()),
        }
    }

    fn push_warning(&self, message: String) {
        self.warnings.lock().unwrap().push(message);
    }

    /// Run one session operation on the blocking pool.
    async fn with_session<T, F>(&self, describe: &str, op: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpSession) -> Result<T, String> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let code = self.code.clone();
        let describe = describe.to_string();
        tokio::task::spawn_blocking(move || {
            let mut guard = session.lock().unwrap();
            let sess = guard
                .as_mut()
                .ok_or_else(|| format!("{code} not connected ({describe})"))?;
            op(sess)
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

fn open_session(
    host: &str,
    secure: bool,
    username: &str,
    password: &str,
    timeout: Duration,
) -> Result<FtpSession, String> {
    let addr = if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:21")
    };
    let resolved = addr
        .to_socket_addrs()
        .map_err(|e| e.to_string())?
        .next()
        .ok_or_else(|| format!("cannot resolve {addr}"))?;

    if secure {
        let plain = NativeTlsFtpStream::connect_timeout(resolved, timeout)
            .map_err(|e| e.to_string())?;
        let tls = TlsConnector::new().map_err(|e| e.to_string())?;
        let domain = host.split(':').next().unwrap_or(host);
        let mut ftp = plain
            .into_secure(NativeTlsConnector::from(tls), domain)
            .map_err(|e| e.to_string())?;
        ftp.login(username, password).map_err(|e| e.to_string())?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|e| e.to_string())?;
        ftp.set_mode(Mode::Passive);
        Ok(FtpSession::Secure(ftp))
    } else {
        let mut ftp =
            FtpStream::connect_timeout(resolved, timeout).map_err(|e| e.to_string())?;
        ftp.login(username, password).map_err(|e| e.to_string())?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|e| e.to_string())?;
        ftp.set_mode(Mode::Passive);
        Ok(FtpSession::Plain(ftp))
    }
}

#[async_trait]
impl ArchiveEndpoint for FtpEndpoint {
    fn code(&self) -> &str {
        &self.code
    }

    async fn connect(&self) -> Result<(), EndpointError> {
        if self.host.is_empty() {
            return Err(EndpointError::Connect {
                url: self.code.clone(),
                reason: "host is null".to_string(),
            });
        }

        let mut last_reason = String::new();
        for attempt in 1..=CONNECT_ATTEMPTS {
            let (host, secure) = (self.host.clone(), self.secure);
            let (user, pass) = (self.username.clone(), self.password.clone());
            let timeout = self.timeout;
            let result =
                tokio::task::spawn_blocking(move || open_session(&host, secure, &user, &pass, timeout))
                    .await
                    .map_err(|e| EndpointError::Task(e.to_string()))?;
            match result {
                Ok(session) => {
                    *self.session.lock().unwrap() = Some(session);
                    debug!(code = %self.code, host = %self.host, "FTP session established");
                    return Ok(());
                }
                Err(reason) => {
                    self.push_warning(format!(
                        "connect to {} attempt {attempt} [{reason}]",
                        self.host
                    ));
                    last_reason = reason;
                }
            }
            if attempt < CONNECT_ATTEMPTS {
                tokio::time::sleep(CONNECT_BACKOFF).await;
            }
        }
        Err(EndpointError::Connect {
            url: self.host.clone(),
            reason: last_reason,
        })
    }

    fn is_connected(&self) -> bool {
        self.session.lock().unwrap().is_some()
    }

    async fn close(&self) {
        let session = Arc::clone(&self.session);
        let _ = tokio::task::spawn_blocking(move || {
            if let Some(mut sess) = session.lock().unwrap().take() {
                sess.quit();
            }
        })
        .await;
    }

    async fn list_dir(&self, path: &str) -> Result<Listing, EndpointError> {
        let path_owned = path.to_string();
        let lines = self
            .with_session("list", move |sess| sess.list(&path_owned))
            .await
            .map_err(|reason| EndpointError::Listing {
                path: path.to_string(),
                reason,
            })?;
        Ok(parse_list_lines(&lines, self.utc_offset_minutes, Utc::now()))
    }

    async fn file_info(&self, path: &str) -> Result<Option<i64>, EndpointError> {
        if !self.is_connected() {
            return Err(EndpointError::NotConnected(self.code.clone()));
        }
        let (dir, base) = split_remote(path);
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
        let remote_owned = remote.to_string();
        let bytes = self
            .with_session("download", move |sess| sess.retr(&remote_owned))
            .await
            .map_err(|reason| EndpointError::Download {
                path: remote.to_string(),
                reason,
            })?;
        let digest = format!("{:x}", md5::compute(&bytes));
        tokio::fs::write(local, &bytes)
            .await
            .map_err(|e| EndpointError::Download {
                path: remote.to_string(),
                reason: e.to_string(),
            })?;
        Ok(digest)
    }

    async fn upload(&self, files: &[PathBuf]) -> Result<Vec<String>, EndpointError> {
        match self.upload_strategy {
            UploadStrategy::Bkg => {
                let mut uploaded = Vec::new();
                for path in files {
                    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                        continue;
                    };
                    let data = match tokio::fs::read(path).await {
                        Ok(data) => data,
                        Err(e) => {
                            self.push_warning(format!("cannot read {} [{e}]", path.display()));
                            continue;
                        }
                    };
                    let name_owned = name.to_string();
                    match self
                        .with_session("upload", move |sess| sess.put(&name_owned, data))
                        .await
                    {
                        Ok(()) => uploaded.push(name.to_string()),
                        Err(reason) => {
                            self.push_warning(format!("upload {name} failed [{reason}]"))
                        }
                    }
                }
                Ok(uploaded)
            }
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

fn split_remote(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((dir, base)) => (dir.to_string(), base.to_string()),
        None => (String::new(), path.to_string()),
    }
}

/// Decode whitespace-split `LIST` output into folders and timestamped files.
fn parse_list_lines(lines: &[String], utc_offset_minutes: i32, now: DateTime<Utc>) -> Listing {
    let mut listing = Listing::default();
    for line in lines {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 4 {
            continue;
        }
        let name = tokens[tokens.len() - 1].to_string();
        if tokens[0].starts_with('d') {
            listing.folders.push(name);
        } else {
            let text = tokens[tokens.len() - 4..tokens.len() - 1].join(" ");
            listing.files.push(RemoteFile {
                name,
                timestamp: decode_ftp_time(&text, utc_offset_minutes, now),
            });
        }
    }
    listing
}

/// Decode a `LIST` timestamp. Modern form carries no year; the current year
/// is assumed and rolled back one year for future-dated entries, with a
/// two-minute allowance for unsynchronized server clocks.
fn decode_ftp_time(text: &str, utc_offset_minutes: i32, now: DateTime<Utc>) -> i64 {
    let local_now =
        now.naive_utc() + chrono::Duration::seconds(120 + utc_offset_minutes as i64 * 60);
    let year = local_now.year();
    let parse_year =
        |y: i32| NaiveDateTime::parse_from_str(&format!("{y} {text}"), "%Y %b %d %H:%M").ok();

    if let Some(mut naive) = parse_year(year) {
        if naive > local_now {
            if let Some(previous) = parse_year(year - 1) {
                naive = previous;
            }
        }
        return local_to_timestamp(naive, utc_offset_minutes);
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%b %d %Y") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return local_to_timestamp(naive, utc_offset_minutes);
        }
    }
    T0_TIMESTAMP
}
