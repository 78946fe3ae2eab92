//! High-level facade over the remote file transfer module.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ftm_protocol::codec;
use ftm_protocol::{Command, DirectoryEntry, FileInfo, OBJECT_INDEX, ProtocolVersion};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::config::EngineConfig;
use crate::listing::DirectoryLister;
use crate::progress::{EventCallback, ProgressTracker};
use crate::session::TransferSession;
use crate::transport::Transport;
use crate::types::{TransferOptions, TransferSummary};

/// Protocol version this engine speaks.
pub const LOCAL_VERSION: ProtocolVersion = ProtocolVersion::new(1, 0, 0);

/// Remote file system operations and chunked transfers over one transport.
///
/// Operations are strictly sequential: each one awaits its response (and any
/// retries) before returning. Independent engines share nothing.
pub struct FileTransferEngine<T: Transport> {
    transport: T,
    config: EngineConfig,
    tracker: ProgressTracker,
    local_version: ProtocolVersion,
    cancel: CancellationToken,
    /// Token of the transfer in progress, if any.
    active: Mutex<Option<CancellationToken>>,
}

impl<T: Transport> FileTransferEngine<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: EngineConfig::default(),
            tracker: ProgressTracker::new(),
            local_version: LOCAL_VERSION,
            cancel: CancellationToken::new(),
            active: Mutex::new(None),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the version used by [`check_version`](Self::check_version).
    pub fn with_local_version(mut self, version: ProtocolVersion) -> Self {
        self.local_version = version;
        self
    }

    /// Uses `token` to stop running transfers at their next chunk boundary.
    ///
    /// Each transfer listens on a child token, so a fired token also stops
    /// every later transfer of this engine.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Registers an observer for progress, retry and completion events.
    pub fn on_event(&mut self, callback: EventCallback) {
        self.tracker.on_event(callback);
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn local_version(&self) -> ProtocolVersion {
        self.local_version
    }

    /// Token that cancels transfers of this engine.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // -----------------------------------------------------------------------
    // File system operations
    // -----------------------------------------------------------------------

    /// Formats the remote file system.
    pub async fn format(&self) -> Result<(), TransferError> {
        debug!("formatting remote file system");
        self.exchange(Command::Format, None).await?;
        Ok(())
    }

    pub async fn exists(&self, path: &str) -> Result<bool, TransferError> {
        let payload = self.encode_path(path)?;
        let response = self.exchange(Command::Exists, Some(&payload)).await?;
        let exists = codec::decode_exists(&response)?;
        debug!(path = %path, exists, "exists");
        Ok(exists)
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), TransferError> {
        let payload = codec::encode_rename(from, to, self.transport.max_frame_length())?;
        self.exchange(Command::Rename, Some(&payload)).await?;
        debug!(from = %from, to = %to, "renamed");
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<(), TransferError> {
        let payload = self.encode_path(path)?;
        self.exchange(Command::FileDelete, Some(&payload)).await?;
        debug!(path = %path, "file deleted");
        Ok(())
    }

    /// Size and checksum of a remote file.
    pub async fn info(&self, path: &str) -> Result<FileInfo, TransferError> {
        let payload = self.encode_path(path)?;
        let response = self.exchange(Command::FileInfo, Some(&payload)).await?;
        let info = codec::decode_file_info(&response)?;
        info!(path = %path, size = info.size, crc = %info.crc_hex(), "file info");
        Ok(info)
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), TransferError> {
        let payload = self.encode_path(path)?;
        self.exchange(Command::DirCreate, Some(&payload)).await?;
        debug!(path = %path, "directory created");
        Ok(())
    }

    pub async fn rmdir(&self, path: &str) -> Result<(), TransferError> {
        let payload = self.encode_path(path)?;
        self.exchange(Command::DirDelete, Some(&payload)).await?;
        debug!(path = %path, "directory deleted");
        Ok(())
    }

    pub async fn list(&self, path: &str) -> Result<Vec<DirectoryEntry>, TransferError> {
        DirectoryLister::new(&self.transport).list(path).await
    }

    /// Aborts the open transfer.
    ///
    /// While a transfer of this engine is running, its session is stopped at
    /// the next chunk boundary and sends the cancel to the device itself; the
    /// transfer then fails with [`TransferError::Cancelled`]. Otherwise the
    /// cancel command is sent right away.
    pub async fn cancel(&self) -> Result<(), TransferError> {
        let running = lock(&self.active).clone();
        if let Some(token) = running {
            debug!("cancelling running transfer");
            token.cancel();
            return Ok(());
        }
        self.exchange(Command::Cancel, None).await?;
        debug!("remote transfer cancelled");
        Ok(())
    }

    /// Queries the version of the remote module.
    pub async fn get_version(&self) -> Result<ProtocolVersion, TransferError> {
        let response = self
            .transport
            .invoke(OBJECT_INDEX, Command::GetVersion.code(), None, true)
            .await?;
        let version = codec::decode_version(&response)?;
        debug!(version = %version, "remote version");
        Ok(version)
    }

    /// Fails with [`TransferError::IncompatibleVersion`] when the remote major
    /// version differs from the local one.
    pub async fn check_version(&self) -> Result<ProtocolVersion, TransferError> {
        let remote = self.get_version().await?;
        if !remote.is_compatible_with(&self.local_version) {
            warn!(remote = %remote, local = %self.local_version, "incompatible remote version");
            return Err(TransferError::IncompatibleVersion {
                remote,
                local: self.local_version,
            });
        }
        Ok(remote)
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    /// Uploads `length` bytes read from `source` to `path`.
    pub async fn upload<R>(
        &self,
        path: &str,
        source: R,
        length: u64,
        options: &TransferOptions,
    ) -> Result<TransferSummary, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let options = self.config.apply(options);
        let active = self.begin_transfer();
        self.session(active.token())
            .upload(path, source, length, &options)
            .await
    }

    /// Downloads `path` into `sink`.
    pub async fn download<W>(
        &self,
        path: &str,
        sink: W,
        options: &TransferOptions,
    ) -> Result<TransferSummary, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let options = self.config.apply(options);
        let active = self.begin_transfer();
        self.session(active.token())
            .download(path, sink, &options)
            .await
    }

    pub async fn upload_bytes(
        &self,
        path: &str,
        data: &[u8],
        options: &TransferOptions,
    ) -> Result<TransferSummary, TransferError> {
        self.upload(path, data, data.len() as u64, options).await
    }

    pub async fn download_to_vec(
        &self,
        path: &str,
        options: &TransferOptions,
    ) -> Result<Vec<u8>, TransferError> {
        let mut data = Vec::new();
        self.download(path, &mut data, options).await?;
        Ok(data)
    }

    /// Uploads the local file at `local` to `remote`.
    pub async fn upload_file(
        &self,
        local: &Path,
        remote: &str,
        options: &TransferOptions,
    ) -> Result<TransferSummary, TransferError> {
        let file = tokio::fs::File::open(local).await?;
        let length = file.metadata().await?.len();
        debug!(local = %local.display(), remote = %remote, length, "uploading file");
        self.upload(remote, file, length, options).await
    }

    /// Downloads `remote` into a local file.
    ///
    /// Data lands in a `.part` file next to `local`, which replaces `local`
    /// only once the download completed. On failure `local` is untouched.
    pub async fn download_file(
        &self,
        remote: &str,
        local: &Path,
        options: &TransferOptions,
    ) -> Result<TransferSummary, TransferError> {
        let partial = partial_path(local);
        let file = tokio::fs::File::create(&partial).await?;
        debug!(local = %local.display(), remote = %remote, "downloading file");
        let result = self.download(remote, file, options).await;
        match result {
            Ok(summary) => {
                tokio::fs::rename(&partial, local).await?;
                Ok(summary)
            }
            Err(e) => {
                if let Err(io) = tokio::fs::remove_file(&partial).await {
                    warn!(
                        partial = %partial.display(),
                        error = %io,
                        "failed to remove partial download"
                    );
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn session(&self, cancel: CancellationToken) -> TransferSession<'_, T> {
        TransferSession::new(&self.transport, self.config.retry_policy(), &self.tracker)
            .with_cancel(cancel)
            .with_speed_samples(self.config.speed_samples)
    }

    /// Registers a fresh child token as the running transfer's token.
    fn begin_transfer(&self) -> ActiveTransfer<'_> {
        let token = self.cancel.child_token();
        *lock(&self.active) = Some(token.clone());
        ActiveTransfer {
            slot: &self.active,
            token,
        }
    }

    fn encode_path(&self, path: &str) -> Result<Vec<u8>, TransferError> {
        Ok(codec::encode_path(path, self.transport.max_frame_length())?)
    }

    /// One exchange with a status check. Not retried.
    async fn exchange(
        &self,
        command: Command,
        payload: Option<&[u8]>,
    ) -> Result<Vec<u8>, TransferError> {
        let response = self
            .transport
            .invoke(OBJECT_INDEX, command.code(), payload, true)
            .await?;
        codec::check_status(&response)?;
        Ok(response)
    }
}

/// Clears the engine's running-transfer slot when the transfer ends or its
/// future is dropped.
struct ActiveTransfer<'a> {
    slot: &'a Mutex<Option<CancellationToken>>,
    token: CancellationToken,
}

impl ActiveTransfer<'_> {
    fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for ActiveTransfer<'_> {
    fn drop(&mut self) {
        *lock(self.slot) = None;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `<local>.part`, next to `local`.
fn partial_path(local: &Path) -> PathBuf {
    let mut name = OsString::from(local.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}
