//! Shared test helpers for map-store unit tests.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;

use crate::maps::{MapCoordinator, MapRepository};
use crate::object_store::{LocalStore, ObjectStore, ObjectStoreError};
use crate::storage::models::UserRecord;
use crate::storage::Database;

/// A 16x12 PNG whose pixels depend on `seed`.
pub fn png_bytes(seed: u8) -> Vec<u8> {
    encode(seed, image::ImageFormat::Png)
}

/// A 16x12 JPEG whose pixels depend on `seed`.
pub fn jpeg_bytes(seed: u8) -> Vec<u8> {
    encode(seed, image::ImageFormat::Jpeg)
}

/// A 1x1 GIF. Recognizable, but not an accepted map format.
pub fn gif_bytes() -> Vec<u8> {
    b"GIF89a\x01\x00\x01\x00\x80\x00\x00\xff\xff\xff\x00\x00\x00!\xf9\x04\x01\x00\x00\x00\x00,\x00\x00\x00\x00\x01\x00\x01\x00\x00\x02\x02D\x01\x00;".to_vec()
}

fn encode(seed: u8, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(16, 12, |x, y| {
        image::Rgb([
            seed.wrapping_mul(31).wrapping_add(x as u8 * 8),
            seed.wrapping_mul(17).wrapping_add(y as u8 * 8),
            seed,
        ])
    });
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format)
        .expect("encode test image");
    buf
}

/// Local store with switchable failures and latency.
pub struct TestStore {
    root: PathBuf,
    inner: LocalStore,
    pub fail_puts: AtomicBool,
    pub fail_deletes: AtomicBool,
    pub delay: Mutex<Option<Duration>>,
    /// Extra latency on reads only.
    pub get_delay: Mutex<Option<Duration>>,
    /// Latency after a put has already reached disk, before it returns.
    pub put_ack_delay: Mutex<Option<Duration>>,
}

impl TestStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            inner: LocalStore::new(root).expect("create test store"),
            fail_puts: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            delay: Mutex::new(None),
            get_delay: Mutex::new(None),
            put_ack_delay: Mutex::new(None),
        }
    }

    /// Blobs currently on disk, ignoring in-flight temp files.
    pub fn blob_count(&self) -> usize {
        count_files(&self.root, false)
    }

    /// Every file under the store root, temp files included.
    pub fn file_count(&self) -> usize {
        count_files(&self.root, true)
    }

    pub async fn contains(&self, key: &str) -> bool {
        match self.inner.get(key).await {
            Ok(_) => true,
            Err(ObjectStoreError::NotFound(_)) => false,
            Err(e) => panic!("read {key}: {e}"),
        }
    }

    async fn pause(&self) {
        sleep_for(&self.delay).await;
    }
}

async fn sleep_for(delay: &Mutex<Option<Duration>>) {
    let delay = *delay.lock().expect("delay lock");
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

fn count_files(root: &Path, include_temp: bool) -> usize {
    fn walk(dir: &Path, include_temp: bool) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        entries
            .flatten()
            .map(|entry| {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, include_temp)
                } else if !include_temp && path.extension().is_some_and(|ext| ext == "tmp") {
                    0
                } else {
                    1
                }
            })
            .sum()
    }
    walk(root, include_temp)
}

#[async_trait]
impl ObjectStore for TestStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        self.pause().await;
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Backend("injected put failure".to_string()));
        }
        self.inner.put(key, data).await?;
        sleep_for(&self.put_ack_delay).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.pause().await;
        sleep_for(&self.get_delay).await;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.pause().await;
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Backend(
                "injected delete failure".to_string(),
            ));
        }
        self.inner.delete(key).await
    }
}

/// A coordinator over a temporary database and a [`TestStore`], with
/// mission 1 and users `alpha`, `bravo` and `judge` (superuser) registered.
pub struct TestWorld {
    _dir: tempfile::TempDir,
    pub db: Database,
    pub store: Arc<TestStore>,
    pub maps: Arc<MapCoordinator>,
}

impl TestWorld {
    pub fn new(timeout: Duration) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::open(dir.path().join("data")).expect("open test database");
        let store = Arc::new(TestStore::new(&dir.path().join("files")));

        db.upsert_mission(1, "Test Mission").expect("register mission");
        for (username, is_superuser) in [("alpha", false), ("bravo", false), ("judge", true)] {
            db.create_user(&UserRecord {
                username: username.to_string(),
                is_superuser,
                token_hash: crate::identity::hash_token(username),
                created_at: Utc::now(),
            })
            .expect("create user");
        }

        let repo = MapRepository::new(
            db.clone(),
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            timeout,
        );

        Self {
            _dir: dir,
            db,
            store,
            maps: Arc::new(MapCoordinator::new(repo)),
        }
    }
}
