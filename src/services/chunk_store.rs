//! Chunked-upload temp storage.
//!
//! Each upload id owns a directory under the temp dir holding one file per
//! chunk, named with a fixed-width zero-padded index so an ordered directory
//! listing reconstructs byte order without a manifest. Finalize streams the
//! chunks into one durable file under the storage dir.

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const MAX_UPLOAD_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum ChunkStoreError {
    #[error("invalid upload id")]
    InvalidUploadId,
    #[error("chunk index {index} out of range for {total} chunk(s)")]
    IndexOutOfRange { index: u32, total: u32 },
    #[error("no chunks found for upload `{0}`")]
    UploadNotFound(String),
    #[error("missing chunk {0}")]
    MissingChunk(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ChunkResult<T> = Result<T, ChunkStoreError>;

/// Disk-backed store for in-flight chunked uploads.
///
/// A per-upload-id async mutex serializes chunk writes against finalize, so a
/// finalize racing a late chunk write observes a consistent directory and
/// fails with `MissingChunk` instead of assembling torn output.
#[derive(Clone)]
pub struct ChunkStore {
    temp_dir: PathBuf,
    storage_dir: PathBuf,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ChunkStore {
    pub fn new(temp_dir: impl Into<PathBuf>, storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            storage_dir: storage_dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Upload ids become directory names, so they must not be able to escape
    /// the temp dir. Same discipline as object-key validation: no separators,
    /// no `..`, no control bytes.
    fn ensure_upload_id_safe(upload_id: &str) -> ChunkResult<()> {
        if upload_id.is_empty() || upload_id.len() > MAX_UPLOAD_ID_LEN {
            return Err(ChunkStoreError::InvalidUploadId);
        }
        if upload_id.contains("..") {
            return Err(ChunkStoreError::InvalidUploadId);
        }
        if upload_id
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\' || b == b'\0')
        {
            return Err(ChunkStoreError::InvalidUploadId);
        }
        Ok(())
    }

    fn upload_dir(&self, upload_id: &str) -> PathBuf {
        self.temp_dir.join(upload_id)
    }

    fn chunk_path(upload_dir: &Path, index: u32) -> PathBuf {
        upload_dir.join(format!("chunk_{:06}", index))
    }

    async fn lock_for(&self, upload_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(upload_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Prune the lock entry only when no other task still holds a handle to
    /// it. A concurrent `save_chunk` may have cloned the `Arc` out of the map
    /// but not yet acquired it; removing the entry under it would let a later
    /// caller mint a second lock for the same upload id.
    async fn forget_lock(&self, upload_id: &str) {
        let mut locks = self.locks.lock().await;
        if locks
            .get(upload_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(upload_id);
        }
    }

    /// Write one chunk, creating the upload directory on first use.
    /// Re-sending the same index overwrites — client retries are idempotent.
    pub async fn save_chunk<S>(
        &self,
        upload_id: &str,
        chunk_index: u32,
        total_chunks: u32,
        stream: S,
    ) -> ChunkResult<PathBuf>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        Self::ensure_upload_id_safe(upload_id)?;
        if total_chunks == 0 || chunk_index >= total_chunks {
            return Err(ChunkStoreError::IndexOutOfRange {
                index: chunk_index,
                total: total_chunks,
            });
        }

        let lock = self.lock_for(upload_id).await;
        let _guard = lock.lock().await;

        let upload_dir = self.upload_dir(upload_id);
        fs::create_dir_all(&upload_dir).await?;
        let chunk_path = Self::chunk_path(&upload_dir, chunk_index);

        let mut file = File::create(&chunk_path).await?;
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&chunk_path).await;
                    return Err(ChunkStoreError::Io(err));
                }
            };
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&chunk_path).await;
                return Err(ChunkStoreError::Io(err));
            }
        }
        file.flush().await?;

        Ok(chunk_path)
    }

    /// Verify every chunk is present and assemble them, in index order, into
    /// `storage_dir/{uuid}.{extension}`. Streams chunk by chunk; the whole
    /// upload is never held in memory. The temp dir is removed on success.
    pub async fn finalize(
        &self,
        upload_id: &str,
        total_chunks: u32,
        extension: &str,
    ) -> ChunkResult<PathBuf> {
        Self::ensure_upload_id_safe(upload_id)?;

        let lock = self.lock_for(upload_id).await;
        let _guard = lock.lock().await;

        let upload_dir = self.upload_dir(upload_id);
        if !fs::try_exists(&upload_dir).await? {
            return Err(ChunkStoreError::UploadNotFound(upload_id.to_string()));
        }
        for index in 0..total_chunks {
            if !fs::try_exists(Self::chunk_path(&upload_dir, index)).await? {
                return Err(ChunkStoreError::MissingChunk(index));
            }
        }

        // Durable write: assemble into a temp file, fsync, then rename.
        let final_path = self
            .storage_dir
            .join(format!("{}.{}", Uuid::new_v4(), extension));
        let tmp_path = self.storage_dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let assemble = async {
            let mut output = File::create(&tmp_path).await?;
            for index in 0..total_chunks {
                let mut chunk = File::open(Self::chunk_path(&upload_dir, index)).await?;
                tokio::io::copy(&mut chunk, &mut output).await?;
            }
            output.flush().await?;
            output.sync_all().await?;
            fs::rename(&tmp_path, &final_path).await?;
            Ok::<_, io::Error>(())
        };
        if let Err(err) = assemble.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ChunkStoreError::Io(err));
        }

        if let Err(err) = fs::remove_dir_all(&upload_dir).await {
            debug!(
                "failed to remove temp dir {} after finalize: {}",
                upload_dir.display(),
                err
            );
        }
        drop(_guard);
        drop(lock);
        self.forget_lock(upload_id).await;

        Ok(final_path)
    }

    /// Drop all temp state for an upload. Ok when nothing exists — cancelling
    /// an unknown upload is not an error.
    pub async fn cancel(&self, upload_id: &str) -> ChunkResult<()> {
        Self::ensure_upload_id_safe(upload_id)?;

        let lock = self.lock_for(upload_id).await;
        let _guard = lock.lock().await;

        let upload_dir = self.upload_dir(upload_id);
        match fs::remove_dir_all(&upload_dir).await {
            Ok(_) => debug!("cancelled upload {}", upload_id),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(ChunkStoreError::Io(err)),
        }
        drop(_guard);
        drop(lock);
        self.forget_lock(upload_id).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::tempdir;

    fn byte_stream(data: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    fn store(root: &Path) -> ChunkStore {
        ChunkStore::new(root.join("temp"), root.join("videos"))
    }

    async fn with_dirs() -> (tempfile::TempDir, ChunkStore) {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        fs::create_dir_all(dir.path().join("temp")).await.unwrap();
        fs::create_dir_all(dir.path().join("videos")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn out_of_order_chunks_reassemble_in_index_order() {
        let (_dir, store) = with_dirs().await;
        // Arrival order 2, 0, 1 must not matter.
        store.save_chunk("up1", 2, 3, byte_stream(b"cc")).await.unwrap();
        store.save_chunk("up1", 0, 3, byte_stream(b"aa")).await.unwrap();
        store.save_chunk("up1", 1, 3, byte_stream(b"bb")).await.unwrap();

        let path = store.finalize("up1", 3, "mp4").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"aabbcc");
    }

    #[tokio::test]
    async fn finalize_with_gap_reports_the_missing_index() {
        let (_dir, store) = with_dirs().await;
        store.save_chunk("up2", 0, 3, byte_stream(b"aa")).await.unwrap();
        store.save_chunk("up2", 2, 3, byte_stream(b"cc")).await.unwrap();

        let err = store.finalize("up2", 3, "mp4").await.unwrap_err();
        assert!(matches!(err, ChunkStoreError::MissingChunk(1)));
    }

    #[tokio::test]
    async fn finalize_removes_the_temp_directory() {
        let (dir, store) = with_dirs().await;
        store.save_chunk("up3", 0, 1, byte_stream(b"x")).await.unwrap();
        store.finalize("up3", 1, "mp4").await.unwrap();
        assert!(!dir.path().join("temp/up3").exists());
    }

    #[tokio::test]
    async fn resending_a_chunk_overwrites_it() {
        let (_dir, store) = with_dirs().await;
        store.save_chunk("up4", 0, 1, byte_stream(b"old")).await.unwrap();
        store.save_chunk("up4", 0, 1, byte_stream(b"new")).await.unwrap();
        let path = store.finalize("up4", 1, "mp4").await.unwrap();
        assert_eq!(fs::read(&path).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn cancel_is_a_no_op_for_unknown_uploads() {
        let (_dir, store) = with_dirs().await;
        store.cancel("never-seen").await.unwrap();
    }

    #[tokio::test]
    async fn cancel_discards_saved_chunks() {
        let (_dir, store) = with_dirs().await;
        store.save_chunk("up5", 0, 2, byte_stream(b"aa")).await.unwrap();
        store.cancel("up5").await.unwrap();
        let err = store.finalize("up5", 2, "mp4").await.unwrap_err();
        assert!(matches!(err, ChunkStoreError::UploadNotFound(_)));
    }

    #[tokio::test]
    async fn lock_entry_survives_finalize_while_another_handle_is_out() {
        let (_dir, store) = with_dirs().await;
        store.save_chunk("up7", 0, 1, byte_stream(b"aa")).await.unwrap();

        // A late writer has already resolved its lock handle but not yet
        // acquired it when finalize completes.
        let held = store.lock_for("up7").await;
        store.finalize("up7", 1, "mp4").await.unwrap();

        // Finalize must not have pruned the entry; a fresh lookup yields the
        // same lock the late writer holds, not a second one.
        let fresh = store.lock_for("up7").await;
        assert!(Arc::ptr_eq(&held, &fresh));

        // Once no handles remain, cancel prunes the entry for good.
        drop(held);
        drop(fresh);
        store.cancel("up7").await.unwrap();
        let minted = store.lock_for("up7").await;
        assert_eq!(Arc::strong_count(&minted), 2);
    }

    #[tokio::test]
    async fn traversal_upload_ids_are_rejected() {
        let (_dir, store) = with_dirs().await;
        for bad in ["../evil", "a/b", "a\\b", ""] {
            let err = store
                .save_chunk(bad, 0, 1, byte_stream(b"x"))
                .await
                .unwrap_err();
            assert!(matches!(err, ChunkStoreError::InvalidUploadId), "{bad}");
        }
    }

    #[tokio::test]
    async fn chunk_index_must_be_below_total() {
        let (_dir, store) = with_dirs().await;
        let err = store
            .save_chunk("up6", 3, 3, byte_stream(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChunkStoreError::IndexOutOfRange { index: 3, total: 3 }
        ));
    }
}
