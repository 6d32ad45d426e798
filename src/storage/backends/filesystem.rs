use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use mime::Mime;

use crate::asset::BinaryAsset;
use crate::error::StoreError;
use crate::storage::template::BinaryBackend;
use crate::utils::{escape_key, unescape_key};

/// Stores each binary as its own file inside a single directory.
///
/// Files are framed as `u16 BE mime length | mime | payload` and are
/// written to a `~tmp` sibling first then renamed over the target, so a
/// crashed write never leaves a short frame behind under the real name.
pub struct FileSystemBackend {
    directory: PathBuf,
}

impl FileSystemBackend {
    pub fn new(dir: PathBuf) -> Self {
        Self { directory: dir }
    }

    #[inline]
    fn format_path(&self, key: &str) -> PathBuf {
        self.directory.join(escape_key(key))
    }

    /// `~` is never produced by `escape_key` so temp files can't
    /// collide with, or be listed as, a stored key.
    #[inline]
    fn format_tmp_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}~tmp", escape_key(key)))
    }

    async fn write_frame(&self, key: &str, frame: &[u8]) -> std::io::Result<()> {
        let tmp = self.format_tmp_path(key);
        tokio::fs::write(&tmp, frame).await?;

        if let Err(e) = tokio::fs::rename(&tmp, self.format_path(key)).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        Ok(())
    }
}

fn encode_frame(asset: &BinaryAsset) -> anyhow::Result<Bytes> {
    let mime = asset.mime().as_ref().as_bytes();
    let mime_len = u16::try_from(mime.len()).map_err(|_| StoreError::MimeTooLong {
        len: mime.len(),
        max: u16::MAX as usize,
    })?;

    let mut buff = BytesMut::with_capacity(2 + mime.len() + asset.size());
    buff.put_u16(mime_len);
    buff.put_slice(mime);
    buff.put_slice(asset.data());
    Ok(buff.freeze())
}

fn decode_frame(key: &str, mut data: Bytes) -> anyhow::Result<BinaryAsset> {
    let corrupt = || StoreError::CorruptFrame {
        key: key.to_string(),
    };

    if data.remaining() < 2 {
        return Err(corrupt().into());
    }

    let mime_len = data.get_u16() as usize;
    if data.remaining() < mime_len {
        return Err(corrupt().into());
    }

    let mime = std::str::from_utf8(&data[..mime_len])
        .ok()
        .and_then(|v| v.parse::<Mime>().ok())
        .ok_or_else(corrupt)?;
    data.advance(mime_len);

    Ok(BinaryAsset::new(mime, data))
}

#[async_trait]
impl BinaryBackend for FileSystemBackend {
    async fn open(&self) -> anyhow::Result<()> {
        info!("Preparing binary store directory @ {:?}", &self.directory);
        tokio::fs::create_dir_all(&self.directory).await?;
        Ok(())
    }

    async fn put(&self, key: &str, asset: BinaryAsset) -> anyhow::Result<()> {
        let frame = encode_frame(&asset)?;

        debug!("Storing image @ {:?}", self.format_path(key));
        match self.write_frame(key, &frame).await {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == ErrorKind::NotFound => {
                tokio::fs::create_dir_all(&self.directory).await?;
                self.write_frame(key, &frame).await?;
                Ok(())
            },
            Err(other) => Err(other.into()),
        }
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<BinaryAsset>> {
        let path = self.format_path(key);

        debug!("Retrieving image @ {:?}", &path);
        match tokio::fs::read(&path).await {
            Ok(data) => decode_frame(key, Bytes::from(data)).map(Some),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(other) => Err(other.into()),
        }
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let path = self.format_path(key);

        debug!("Purging image @ {:?}", &path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(ref e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(other) => Err(other.into()),
        }
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(ref e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(other) => return Err(other.into()),
        };

        let mut keys = vec![];
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }

            let name = entry.file_name();
            match name.to_str().and_then(unescape_key) {
                Some(key) => keys.push(key),
                None => debug!("Skipping foreign file {:?} in binary store", name),
            }
        }

        Ok(keys)
    }

    async fn all(&self) -> anyhow::Result<Vec<(String, BinaryAsset)>> {
        let mut assets = vec![];
        for key in self.keys().await? {
            if let Some(asset) = self.get(&key).await? {
                assets.push((key, asset));
            }
        }

        Ok(assets)
    }

    async fn clear(&self) -> anyhow::Result<()> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(data: &'static [u8]) -> BinaryAsset {
        BinaryAsset::new(mime::IMAGE_JPEG, data)
    }

    #[tokio::test]
    async fn test_store_and_fetch_keeps_mime() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileSystemBackend::new(dir.path().join("images"));
        backend.open().await?;

        let png = BinaryAsset::new(mime::IMAGE_PNG, &b"\x89PNG"[..]);
        backend.put("avatar.png", png.clone()).await?;

        assert_eq!(backend.get("avatar.png").await?, Some(png));
        assert_eq!(backend.get("missing.png").await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_put_recreates_missing_directory() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileSystemBackend::new(dir.path().join("nested").join("images"));

        backend.put("a.jpg", asset(b"abc")).await?;
        assert_eq!(backend.keys().await?, vec!["a.jpg".to_string()]);

        Ok(())
    }

    #[tokio::test]
    async fn test_keys_are_unescaped() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileSystemBackend::new(dir.path().to_path_buf());
        backend.open().await?;

        backend.put("hero bg/1.jpg", asset(b"1")).await?;
        backend.put("card_2.jpg", asset(b"22")).await?;

        let mut keys = backend.keys().await?;
        keys.sort();
        assert_eq!(keys, vec!["card_2.jpg".to_string(), "hero bg/1.jpg".to_string()]);

        let total: usize = backend.all().await?.iter().map(|(_, v)| v.size()).sum();
        assert_eq!(total, 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_and_clear() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileSystemBackend::new(dir.path().to_path_buf());
        backend.open().await?;

        backend.put("a.jpg", asset(b"a")).await?;
        backend.put("b.jpg", asset(b"b")).await?;

        backend.delete("a.jpg").await?;
        backend.delete("a.jpg").await?;
        assert_eq!(backend.get("a.jpg").await?, None);

        backend.clear().await?;
        assert!(backend.keys().await?.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_frame_is_an_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileSystemBackend::new(dir.path().to_path_buf());
        backend.open().await?;

        tokio::fs::write(dir.path().join("bad.jpg"), [0xFF, 0xFF, 0x01]).await?;

        let err = backend.get("bad.jpg").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::CorruptFrame { .. }),
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_put_replaces_file_without_leaving_temp_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileSystemBackend::new(dir.path().to_path_buf());
        backend.open().await?;

        backend.put("a.jpg", asset(b"first")).await?;
        backend.put("a.jpg", asset(b"second")).await?;
        assert_eq!(backend.get("a.jpg").await?, Some(asset(b"second")));

        let mut names = vec![];
        let mut entries = tokio::fs::read_dir(dir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["a.jpg".to_string()]);

        Ok(())
    }

    #[tokio::test]
    async fn test_leftover_temp_file_is_not_a_key() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileSystemBackend::new(dir.path().to_path_buf());
        backend.open().await?;

        backend.put("a.jpg", asset(b"abc")).await?;
        tokio::fs::write(dir.path().join("b.jpg~tmp"), [0x00]).await?;

        assert_eq!(backend.keys().await?, vec!["a.jpg".to_string()]);
        assert_eq!(backend.get("b.jpg").await?, None);

        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_mime_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend = FileSystemBackend::new(dir.path().to_path_buf());
        backend.open().await?;

        let long = format!("image/{}", "x".repeat(u16::MAX as usize));
        let mime: Mime = long.parse()?;

        let err = backend
            .put("long.jpg", BinaryAsset::new(mime, &b"abc"[..]))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::MimeTooLong { .. }),
        ));
        assert_eq!(backend.get("long.jpg").await?, None);

        Ok(())
    }
}
