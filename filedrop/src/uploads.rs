//! Writing attachments into the upload directory.
//!
//! [`UploadDir`] owns the destination directory and the [`CollisionPolicy`]. It is built once
//! from configuration and cloned into every request; it holds no mutable state, so concurrent
//! requests only share the directory on disk.
//!
//! Destinations are `upload_dir.join(filename)` with the client-supplied name used verbatim.
//!
//! While the form is still being read, each attachment's bytes go into a [`Spool`]: memory up to
//! [`SPOOL_MEMORY_LIMIT`], a temporary file outside the upload directory beyond that. Attachments
//! are copied into the upload directory only once the whole form has been accepted.

use bytes::{Bytes, BytesMut};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use crate::config::{CollisionPolicy, Config};
use crate::errors::{Error, Result};

/// Upper bound on `name (n)` candidates tried under [`CollisionPolicy::Rename`].
const MAX_RENAME_ATTEMPTS: u32 = 10_000;

/// Attachments larger than this are moved from memory to a temporary file.
pub const SPOOL_MEMORY_LIMIT: usize = 1024 * 1024;

/// One file part of an upload: the client's filename and the bytes it sent.
#[derive(Debug)]
pub struct Attachment {
    pub filename: String,
    pub data: AttachmentData,
}

impl Attachment {
    pub fn from_bytes(filename: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            data: AttachmentData::Memory(data.into()),
        }
    }
}

/// Where an attachment's bytes are held until they are written out.
#[derive(Debug)]
pub enum AttachmentData {
    Memory(Bytes),
    /// Removed from disk when dropped
    Spooled { path: TempPath, len: u64 },
}

impl AttachmentData {
    pub fn len(&self) -> u64 {
        match self {
            AttachmentData::Memory(bytes) => bytes.len() as u64,
            AttachmentData::Spooled { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Accumulates one attachment as its chunks arrive.
///
/// Bytes stay in memory until `memory_limit` would be exceeded. From then on everything, including
/// what was buffered so far, goes to a temporary file in `dir` (the system temp directory if unset).
#[derive(Debug)]
pub struct Spool {
    dir: Option<PathBuf>,
    memory_limit: usize,
    buffer: BytesMut,
    file: Option<(File, TempPath)>,
    len: u64,
}

impl Spool {
    pub fn new(dir: Option<PathBuf>, memory_limit: usize) -> Self {
        Self {
            dir,
            memory_limit,
            buffer: BytesMut::new(),
            file: None,
            len: 0,
        }
    }

    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.len += chunk.len() as u64;

        if self.file.is_none() {
            if self.buffer.len() + chunk.len() <= self.memory_limit {
                self.buffer.extend_from_slice(chunk);
                return Ok(());
            }
            self.spill().await?;
        }

        if let Some((file, path)) = self.file.as_mut() {
            file.write_all(chunk)
                .await
                .map_err(|e| Error::io(format!("write spool file {}", path.display()), e))?;
        }
        Ok(())
    }

    pub async fn finish(self) -> Result<AttachmentData> {
        match self.file {
            None => Ok(AttachmentData::Memory(self.buffer.freeze())),
            Some((mut file, path)) => {
                file.flush()
                    .await
                    .map_err(|e| Error::io(format!("flush spool file {}", path.display()), e))?;
                Ok(AttachmentData::Spooled { path, len: self.len })
            }
        }
    }

    async fn spill(&mut self) -> Result<()> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".filedrop-spool-");
        let temp = match &self.dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| Error::io("create spool file", e))?;

        let (std_file, path) = temp.into_parts();
        let mut file = File::from_std(std_file);
        file.write_all(&self.buffer)
            .await
            .map_err(|e| Error::io(format!("write spool file {}", path.display()), e))?;

        debug!(path = %path.display(), buffered = self.buffer.len(), "Attachment spooled to disk");

        self.buffer = BytesMut::new();
        self.file = Some((file, path));
        Ok(())
    }
}

/// A file that finished writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    /// Filename as the client supplied it
    pub filename: String,
    /// Where the bytes were written
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UploadResult {
    pub message: String,
    pub files: Vec<SavedFile>,
}

#[derive(Debug, Clone)]
pub struct UploadDir {
    root: PathBuf,
    on_collision: CollisionPolicy,
    spool_dir: Option<PathBuf>,
}

impl UploadDir {
    pub fn new(root: impl Into<PathBuf>, on_collision: CollisionPolicy) -> Self {
        Self {
            root: root.into(),
            on_collision,
            spool_dir: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.upload_dir.clone(), config.on_collision).with_spool_dir(config.spool_dir.clone())
    }

    pub fn with_spool_dir(mut self, spool_dir: Option<PathBuf>) -> Self {
        self.spool_dir = spool_dir;
        self
    }

    /// A fresh spool for one incoming attachment
    pub fn spool(&self) -> Spool {
        Spool::new(self.spool_dir.clone(), SPOOL_MEMORY_LIMIT)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn on_collision(&self) -> CollisionPolicy {
        self.on_collision
    }

    /// Create the directory and any missing parents. Succeeds if it already exists.
    pub async fn ensure_exists(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::io(format!("create upload directory {}", self.root.display()), e))
    }

    /// Store every attachment in submission order and echo the message back.
    ///
    /// The directory is created first on every call. A failing write aborts the request;
    /// attachments written before it stay on disk.
    #[instrument(skip_all, fields(upload_dir = %self.root.display(), attachments = attachments.len()))]
    pub async fn handle_upload(&self, message: String, attachments: Vec<Attachment>) -> Result<UploadResult> {
        self.ensure_exists().await?;

        if self.on_collision == CollisionPolicy::Reject {
            self.check_no_collisions(&attachments).await?;
        }

        let mut files = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            files.push(self.save(attachment).await?);
        }

        info!(saved = files.len(), "Upload stored");

        Ok(UploadResult { message, files })
    }

    /// Fail before anything is written if a destination is taken or named twice.
    ///
    /// Names are compared after resolving their parent directory, so `sub/../a.txt` and `a.txt`
    /// count as the same destination.
    async fn check_no_collisions(&self, attachments: &[Attachment]) -> Result<()> {
        let mut seen = HashSet::with_capacity(attachments.len());
        for attachment in attachments {
            let destination = self.root.join(&attachment.filename);
            if !seen.insert(resolved_destination(&destination).await) {
                return Err(Error::Conflict {
                    message: format!("{} was submitted more than once", attachment.filename),
                });
            }
            let exists = fs::try_exists(&destination)
                .await
                .map_err(|e| Error::io(format!("check {}", destination.display()), e))?;
            if exists {
                return Err(Error::Conflict {
                    message: format!("{} already exists", destination.display()),
                });
            }
        }
        Ok(())
    }

    async fn save(&self, attachment: Attachment) -> Result<SavedFile> {
        let Attachment { filename, data } = attachment;
        let destination = self.root.join(&filename);

        let (path, mut file) = match self.on_collision {
            CollisionPolicy::Overwrite => {
                let file = File::create(&destination)
                    .await
                    .map_err(|e| Error::io(format!("open {} for writing", destination.display()), e))?;
                (destination, file)
            }
            CollisionPolicy::Reject => match create_new(&destination).await {
                Ok(file) => (destination, file),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    return Err(Error::Conflict {
                        message: format!("{} already exists", destination.display()),
                    });
                }
                Err(e) => return Err(Error::io(format!("open {} for writing", destination.display()), e)),
            },
            CollisionPolicy::Rename => self.create_renamed(&filename).await?,
        };

        let bytes = data.len();
        match data {
            AttachmentData::Memory(content) => file
                .write_all(&content)
                .await
                .map_err(|e| Error::io(format!("write {}", path.display()), e))?,
            AttachmentData::Spooled { path: spooled, .. } => {
                let mut source = File::open(&spooled)
                    .await
                    .map_err(|e| Error::io(format!("open spool file {}", spooled.display()), e))?;
                tokio::io::copy(&mut source, &mut file)
                    .await
                    .map_err(|e| Error::io(format!("copy into {}", path.display()), e))?;
            }
        }
        file.flush().await.map_err(|e| Error::io(format!("flush {}", path.display()), e))?;

        debug!(filename = %filename, path = %path.display(), bytes, "Attachment written");

        Ok(SavedFile { filename, path })
    }

    /// Claim the first free name among `filename`, `filename (1)`, `filename (2)`, ...
    async fn create_renamed(&self, filename: &str) -> Result<(PathBuf, File)> {
        for n in 0..=MAX_RENAME_ATTEMPTS {
            let candidate = if n == 0 {
                self.root.join(filename)
            } else {
                self.root.join(numbered_name(filename, n))
            };
            match create_new(&candidate).await {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::io(format!("open {} for writing", candidate.display()), e)),
            }
        }
        Err(Error::Conflict {
            message: format!("no free name for {filename} after {MAX_RENAME_ATTEMPTS} attempts"),
        })
    }
}

/// `destination` with its parent directory canonicalized, or unchanged if the parent can't be resolved.
async fn resolved_destination(destination: &Path) -> PathBuf {
    if let (Some(parent), Some(name)) = (destination.parent(), destination.file_name()) {
        if let Ok(parent) = fs::canonicalize(parent).await {
            return parent.join(name);
        }
    }
    destination.to_path_buf()
}

async fn create_new(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path).await
}

/// `report.pdf` -> `report (n).pdf`. Leading dots and directory parts are left alone.
fn numbered_name(filename: &str, n: u32) -> String {
    let split = filename.rfind(['/', '\\']).map_or(0, |i| i + 1);
    let (dir, base) = filename.split_at(split);
    match base.rfind('.') {
        Some(dot) if dot > 0 => format!("{dir}{} ({n}){}", &base[..dot], &base[dot..]),
        _ => format!("{dir}{base} ({n})"),
    }
}
