use std::io;
use std::path::PathBuf;

use axum::body::Bytes;
use futures_util::{Stream, TryStreamExt};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::{debug, info};
use uuid::Uuid;

use parley_types::models::{MediaRef, MessageKind};

/// Upload limit per media message.
pub const MAX_MEDIA_BYTES: u64 = 20 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("upload exceeds size limit")]
    TooLarge,

    #[error("unsupported media type: {0}")]
    UnsupportedType(String),

    #[error("empty upload")]
    Empty,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Content-addressed media on local disk. Files are named by the SHA-256 of
/// their bytes, so identical uploads share one file.
pub struct MediaStore {
    dir: PathBuf,
    base_url: String,
    max_bytes: u64,
}

impl MediaStore {
    pub async fn new(dir: PathBuf, base_url: impl Into<String>) -> io::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Media directory: {}", dir.display());
        Ok(Self {
            dir,
            base_url: base_url.into(),
            max_bytes: MAX_MEDIA_BYTES,
        })
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Streams the body to disk, returning where it can be fetched from.
    pub async fn store<S, E>(&self, kind: MessageKind, mime: &str, body: S) -> Result<MediaRef, MediaError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mime = check_mime(kind, mime)?;

        let tmp = self.dir.join(format!(".upload-{}", Uuid::new_v4()));
        match self.write_temp(&tmp, body).await {
            Ok((hash, size)) => {
                let name = format!("{}.{}", hash, extension(&mime));
                let dest = self.dir.join(&name);
                if fs::try_exists(&dest).await? {
                    fs::remove_file(&tmp).await?;
                    debug!("Media {} already stored", name);
                } else {
                    fs::rename(&tmp, &dest).await?;
                }

                Ok(MediaRef {
                    url: format!("{}/{}", self.base_url.trim_end_matches('/'), name),
                    mime,
                    size: size as i64,
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp).await;
                Err(e)
            }
        }
    }

    async fn write_temp<S, E>(&self, tmp: &PathBuf, body: S) -> Result<(String, u64), MediaError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let reader = StreamReader::new(body.map_err(io::Error::other));
        tokio::pin!(reader);

        let mut file = fs::File::create(tmp).await?;
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let mut buf = vec![0u8; 64 * 1024];

        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            size += n as u64;
            if size > self.max_bytes {
                return Err(MediaError::TooLarge);
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;

        if size == 0 {
            return Err(MediaError::Empty);
        }
        Ok((hex::encode(hasher.finalize()), size))
    }
}

/// Normalizes the declared MIME type. Image messages must carry an image type.
fn check_mime(kind: MessageKind, declared: &str) -> Result<String, MediaError> {
    let mime = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match kind {
        MessageKind::Image if mime.starts_with("image/") => Ok(mime),
        MessageKind::File if mime.is_empty() => Ok("application/octet-stream".to_string()),
        MessageKind::File => Ok(mime),
        _ => Err(MediaError::UnsupportedType(mime)),
    }
}

fn extension(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "application/zip" => "zip",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    fn body(chunks: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, io::Error>> {
        stream::iter(chunks.iter().map(|c| Ok(Bytes::from_static(*c))).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn stores_by_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf(), "/media/").await.unwrap();

        let media = store
            .store(MessageKind::Image, "image/png", body(&[b"hello ", b"world"]))
            .await
            .unwrap();

        let expected = hex::encode(Sha256::digest(b"hello world"));
        assert_eq!(media.url, format!("/media/{expected}.png"));
        assert_eq!(media.size, 11);
        assert!(dir.path().join(format!("{expected}.png")).exists());

        // Same bytes again reuse the file
        let again = store
            .store(MessageKind::Image, "image/png", body(&[b"hello world"]))
            .await
            .unwrap();
        assert_eq!(again.url, media.url);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn rejects_oversized_and_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf(), "/media")
            .await
            .unwrap()
            .with_max_bytes(4);

        let err = store
            .store(MessageKind::File, "text/plain", body(&[b"abc", b"def"]))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::TooLarge));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn image_requires_image_mime() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path().to_path_buf(), "/media").await.unwrap();

        let err = store
            .store(MessageKind::Image, "application/pdf", body(&[b"%PDF"]))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedType(_)));
    }

    #[test]
    fn mime_parameters_are_dropped() {
        assert_eq!(check_mime(MessageKind::File, "Text/Plain; charset=utf-8").unwrap(), "text/plain");
        assert_eq!(check_mime(MessageKind::File, "").unwrap(), "application/octet-stream");
    }
}
