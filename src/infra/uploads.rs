//! Filesystem storage for images attached to threads and profiles.

use std::error::Error as StdError;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut, stream};
use mime_guess::Mime;
use sha2::{Digest, Sha256};
use slug::slugify;
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

/// URL prefix under which stored files are served.
pub const PUBLIC_PREFIX: &str = "/uploads/";

/// The stored path behind a URL served from [`PUBLIC_PREFIX`], if it is one.
pub fn stored_path_of(url: &str) -> Option<&str> {
    url.strip_prefix(PUBLIC_PREFIX).filter(|path| !path.is_empty())
}

/// Bytes kept in memory for dimension sniffing.
const HEADER_SNIFF_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum UploadStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error("only image uploads are accepted, got `{0}`")]
    UnsupportedType(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("uploaded file exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },
    #[error("uploaded file stream failed")]
    PayloadStream {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("uploaded file is empty")]
    EmptyPayload,
}

impl UploadStorageError {
    pub fn stream(source: impl StdError + Send + Sync + 'static) -> Self {
        Self::PayloadStream {
            source: Box::new(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub stored_path: String,
    pub url: String,
    pub content_type: String,
    pub checksum: String,
    pub size_bytes: i64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug)]
pub struct UploadStorage {
    root: PathBuf,
    max_bytes: u64,
}

impl UploadStorage {
    /// Storage rooted at `root`, created when missing.
    pub fn new(root: PathBuf, max_bytes: u64) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, max_bytes })
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Stream an image to disk, hashing it and sniffing its dimensions on the way.
    /// Partial files are removed when anything goes wrong.
    pub async fn store_image<S>(
        &self,
        file_name: &str,
        declared_type: Option<&str>,
        body: S,
    ) -> Result<StoredImage, UploadStorageError>
    where
        S: Stream<Item = Result<Bytes, UploadStorageError>>,
    {
        let mime = image_mime(file_name, declared_type)?;
        let stored_path = stored_path_for(file_name, &mime);
        let absolute = self.resolve(&stored_path)?;
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&absolute).await?;
        let outcome = self.copy_body(&mut file, body).await;
        drop(file);

        let (checksum, size_bytes, header) = match outcome {
            Ok(done) => done,
            Err(err) => {
                let _ = fs::remove_file(&absolute).await;
                return Err(err);
            }
        };

        let (width, height) = match imagesize::blob_size(&header) {
            Ok(size) => (
                u32::try_from(size.width).ok(),
                u32::try_from(size.height).ok(),
            ),
            Err(_) => (None, None),
        };

        Ok(StoredImage {
            url: format!("{PUBLIC_PREFIX}{stored_path}"),
            stored_path,
            content_type: mime.essence_str().to_string(),
            checksum,
            size_bytes,
            width,
            height,
        })
    }

    async fn copy_body<S>(
        &self,
        file: &mut fs::File,
        body: S,
    ) -> Result<(String, i64, Vec<u8>), UploadStorageError>
    where
        S: Stream<Item = Result<Bytes, UploadStorageError>>,
    {
        let mut hasher = Sha256::new();
        let mut header = Vec::new();
        let mut total: u64 = 0;

        pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }
            total += chunk.len() as u64;
            if total > self.max_bytes {
                return Err(UploadStorageError::PayloadTooLarge {
                    limit: self.max_bytes,
                });
            }
            if header.len() < HEADER_SNIFF_BYTES {
                let take = (HEADER_SNIFF_BYTES - header.len()).min(chunk.len());
                header.extend_from_slice(&chunk[..take]);
            }
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        if total == 0 {
            return Err(UploadStorageError::EmptyPayload);
        }
        let size = i64::try_from(total).map_err(|_| UploadStorageError::PayloadTooLarge {
            limit: self.max_bytes,
        })?;
        Ok((hex::encode(hasher.finalize()), size, header))
    }

    /// Store an in-memory image. Used by tests and seeding.
    pub async fn store_bytes(
        &self,
        file_name: &str,
        data: Bytes,
    ) -> Result<StoredImage, UploadStorageError> {
        let body = stream::once(async move { Ok::<_, UploadStorageError>(data) });
        self.store_image(file_name, None, body).await
    }

    /// Read a stored file together with its content type. Anything that is not a
    /// known raster extension is served as an opaque download.
    pub async fn read(&self, stored_path: &str) -> Result<(Bytes, Mime), UploadStorageError> {
        let absolute = self.resolve(stored_path)?;
        let data = fs::read(&absolute).await?;
        let mime =
            raster_mime_for_path(&absolute).unwrap_or(mime_guess::mime::APPLICATION_OCTET_STREAM);
        Ok((Bytes::from(data), mime))
    }

    /// Remove a stored file; a missing file counts as removed.
    pub async fn delete(&self, stored_path: &str) -> Result<(), UploadStorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf, UploadStorageError> {
        let relative = Path::new(stored_path);
        let escapes = relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if stored_path.is_empty() || relative.is_absolute() || escapes {
            return Err(UploadStorageError::InvalidPath);
        }
        Ok(self.root.join(relative))
    }
}

/// Raster formats accepted for upload, with the extension each is stored under.
/// Vector formats are excluded since browsers execute scripts inside them.
const RASTER_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/avif", "avif"),
];

fn raster_extension(essence: &str) -> Option<&'static str> {
    RASTER_TYPES
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
}

fn raster_mime_for_path(path: &Path) -> Option<Mime> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let essence = mime_guess::from_ext(&extension)
        .iter()
        .map(|mime| mime.essence_str().to_string())
        .find(|essence| raster_extension(essence).is_some())?;
    essence.parse().ok()
}

fn image_mime(file_name: &str, declared: Option<&str>) -> Result<Mime, UploadStorageError> {
    let declared = declared.and_then(|value| value.parse::<Mime>().ok());
    let mime = match declared {
        Some(mime) if mime.type_() == mime_guess::mime::IMAGE => mime,
        _ => mime_guess::from_path(file_name).first_or_octet_stream(),
    };
    match raster_extension(mime.essence_str()) {
        Some(_) => Ok(mime),
        None => Err(UploadStorageError::UnsupportedType(
            mime.essence_str().to_string(),
        )),
    }
}

/// `{yyyy}/{mm}/{uuid}-{stem}.{ext}` where the extension follows the accepted type,
/// never the client's file name.
fn stored_path_for(file_name: &str, mime: &Mime) -> String {
    let (year, month, _) = time::OffsetDateTime::now_utc().to_calendar_date();
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|value| value.to_str())
        .map(slugify)
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "image".to_string());
    let extension = raster_extension(mime.essence_str()).unwrap_or("bin");
    format!(
        "{year}/{:02}/{}-{stem}.{extension}",
        month as u8,
        Uuid::new_v4()
    )
}
