//! Injected platform adapter.
//!
//! The core never touches the filesystem, secure storage, the network, or a
//! clock directly; every such operation goes through a set of callbacks the
//! embedder injects once at startup. Mobile hosts wire these to platform
//! APIs; the bundled server binary installs [`PlatformAdapter::native`].
//!
//! The adapter is set-once. Installing a second adapter is an error, and
//! operations that need a callback the embedder did not provide fail with
//! `PlatformNotConfigured`.

use crate::error::{Result, RuntimeError};
use once_cell::sync::{Lazy, OnceCell};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Log levels forwarded to the host's `log` callback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MemoryInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Download progress: (bytes_downloaded, bytes_total).
pub type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;

type FileExistsFn = Box<dyn Fn(&str) -> bool + Send + Sync>;
type FileReadFn = Box<dyn Fn(&str) -> std::result::Result<Vec<u8>, String> + Send + Sync>;
type FileWriteFn = Box<dyn Fn(&str, &[u8]) -> std::result::Result<(), String> + Send + Sync>;
type FileDeleteFn = Box<dyn Fn(&str) -> std::result::Result<(), String> + Send + Sync>;
type ListDirFn = Box<dyn Fn(&str) -> std::result::Result<Vec<String>, String> + Send + Sync>;
type SecureGetFn = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;
type SecureSetFn = Box<dyn Fn(&str, &str) -> std::result::Result<(), String> + Send + Sync>;
type SecureDeleteFn = Box<dyn Fn(&str) -> std::result::Result<(), String> + Send + Sync>;
type LogFn = Box<dyn Fn(LogLevel, &str, &str) + Send + Sync>;
type NowMsFn = Box<dyn Fn() -> i64 + Send + Sync>;
type HttpDownloadFn =
    Box<dyn Fn(&str, &str, ProgressFn) -> std::result::Result<u64, String> + Send + Sync>;
type HttpCancelFn = Box<dyn Fn(u64) + Send + Sync>;
type ExtractArchiveFn = Box<dyn Fn(&str, &str) -> std::result::Result<(), String> + Send + Sync>;
type TrackErrorFn = Box<dyn Fn(&str, &str) + Send + Sync>;
type MemoryInfoFn = Box<dyn Fn() -> MemoryInfo + Send + Sync>;

/// The injected callback set. Optional callbacks may be left `None`; calls
/// that require them fail with `PlatformNotConfigured`.
#[derive(Default)]
pub struct PlatformAdapter {
    pub file_exists: Option<FileExistsFn>,
    pub file_read: Option<FileReadFn>,
    pub file_write: Option<FileWriteFn>,
    pub file_delete: Option<FileDeleteFn>,
    pub list_dir: Option<ListDirFn>,
    pub secure_get: Option<SecureGetFn>,
    pub secure_set: Option<SecureSetFn>,
    pub secure_delete: Option<SecureDeleteFn>,
    pub log: Option<LogFn>,
    pub now_ms: Option<NowMsFn>,
    pub http_download: Option<HttpDownloadFn>,
    pub http_cancel: Option<HttpCancelFn>,
    pub extract_archive: Option<ExtractArchiveFn>,
    pub track_error: Option<TrackErrorFn>,
    pub get_memory_info: Option<MemoryInfoFn>,
}

impl PlatformAdapter {
    /// A std-backed adapter for desktop hosts (server binary, tests).
    /// `http_download` and `extract_archive` stay unset; downloads are
    /// disabled unless the host provides them.
    pub fn native() -> Self {
        Self {
            file_exists: Some(Box::new(|path| std::path::Path::new(path).exists())),
            file_read: Some(Box::new(|path| {
                std::fs::read(path).map_err(|e| e.to_string())
            })),
            file_write: Some(Box::new(|path, data| {
                std::fs::write(path, data).map_err(|e| e.to_string())
            })),
            file_delete: Some(Box::new(|path| {
                std::fs::remove_file(path).map_err(|e| e.to_string())
            })),
            list_dir: Some(Box::new(|path| {
                let entries = std::fs::read_dir(path).map_err(|e| e.to_string())?;
                let mut names = Vec::new();
                for entry in entries {
                    let entry = entry.map_err(|e| e.to_string())?;
                    names.push(entry.path().to_string_lossy().into_owned());
                }
                Ok(names)
            })),
            now_ms: Some(Box::new(|| {
                static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
                EPOCH.elapsed().as_millis() as i64
            })),
            ..Default::default()
        }
    }
}

static ADAPTER: OnceCell<PlatformAdapter> = OnceCell::new();

/// Install the adapter. Set-once: replacing an installed adapter is an error.
pub fn install(adapter: PlatformAdapter) -> Result<()> {
    ADAPTER
        .set(adapter)
        .map_err(|_| RuntimeError::InvalidState("platform adapter already installed".into()))
}

/// Install the native adapter if none is installed yet. Idempotent; used by
/// the server binary and integration tests.
pub fn ensure_native() {
    let _ = ADAPTER.set(PlatformAdapter::native());
}

pub fn adapter() -> Option<&'static PlatformAdapter> {
    ADAPTER.get()
}

fn required<'a, T>(slot: &'a Option<T>, name: &'static str) -> Result<&'a T> {
    slot.as_ref()
        .ok_or(RuntimeError::PlatformNotConfigured(name))
}

// ─── Convenience wrappers ─────────────────────────────────────────────────────

pub fn file_exists(path: &str) -> Result<bool> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("file_exists"))?;
    Ok(required(&adapter.file_exists, "file_exists")?(path))
}

pub fn file_read(path: &str) -> Result<Vec<u8>> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("file_read"))?;
    required(&adapter.file_read, "file_read")?(path).map_err(RuntimeError::Io)
}

pub fn file_write(path: &str, data: &[u8]) -> Result<()> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("file_write"))?;
    required(&adapter.file_write, "file_write")?(path, data).map_err(RuntimeError::Io)
}

pub fn file_delete(path: &str) -> Result<()> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("file_delete"))?;
    required(&adapter.file_delete, "file_delete")?(path).map_err(RuntimeError::Io)
}

pub fn list_dir(path: &str) -> Result<Vec<String>> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("list_dir"))?;
    required(&adapter.list_dir, "list_dir")?(path).map_err(RuntimeError::Io)
}

pub fn secure_get(key: &str) -> Result<Option<String>> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("secure_get"))?;
    Ok(required(&adapter.secure_get, "secure_get")?(key))
}

pub fn secure_set(key: &str, value: &str) -> Result<()> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("secure_set"))?;
    required(&adapter.secure_set, "secure_set")?(key, value).map_err(RuntimeError::Io)
}

pub fn secure_delete(key: &str) -> Result<()> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("secure_delete"))?;
    required(&adapter.secure_delete, "secure_delete")?(key).map_err(RuntimeError::Io)
}

/// Monotonic milliseconds. Falls back to a process-local epoch when no
/// adapter clock is installed, so events and timings always have timestamps.
pub fn now_ms() -> i64 {
    static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);
    if let Some(adapter) = adapter() {
        if let Some(now) = &adapter.now_ms {
            return now();
        }
    }
    EPOCH.elapsed().as_millis() as i64
}

/// Route a log line to the host. Falls back to `tracing` when the host did
/// not provide a `log` callback. Must be cheap: the host contract requires a
/// non-blocking sink.
pub fn log(level: LogLevel, category: &str, message: &str) {
    if let Some(adapter) = adapter() {
        if let Some(log) = &adapter.log {
            log(level, category, message);
            return;
        }
    }
    match level {
        LogLevel::Debug => tracing::debug!(target: "edgerun", "[{category}] {message}"),
        LogLevel::Info => tracing::info!(target: "edgerun", "[{category}] {message}"),
        LogLevel::Warn => tracing::warn!(target: "edgerun", "[{category}] {message}"),
        LogLevel::Error => tracing::error!(target: "edgerun", "[{category}] {message}"),
    }
}

/// Start a model download through the host. Returns a task id usable with
/// [`http_cancel`]. Fails `PlatformNotConfigured` when the host did not
/// provide a downloader; downloads are optional by contract.
pub fn http_download(url: &str, dest_path: &str, progress: ProgressFn) -> Result<u64> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("http_download"))?;
    required(&adapter.http_download, "http_download")?(url, dest_path, progress)
        .map_err(RuntimeError::Io)
}

pub fn http_cancel(task_id: u64) -> Result<()> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("http_cancel"))?;
    required(&adapter.http_cancel, "http_cancel")?(task_id);
    Ok(())
}

pub fn get_memory_info() -> Result<MemoryInfo> {
    let adapter = adapter().ok_or(RuntimeError::PlatformNotConfigured("get_memory_info"))?;
    Ok(required(&adapter.get_memory_info, "get_memory_info")?())
}
