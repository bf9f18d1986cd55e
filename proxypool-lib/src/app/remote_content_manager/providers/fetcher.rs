use std::{
    io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::{ProviderVehicleType, ThreadSafeProviderVehicle};
use crate::{Error, common::utils};

const MAX_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// The bytes a fetch produced.
pub struct Fetched {
    pub content: Vec<u8>,
    /// Same bytes as the previous fetch.
    pub unchanged: bool,
    /// Read from the cache, which is older than the refresh interval.
    pub stale: bool,
    pub from_cache: bool,
}

/// Loads one subscription source and keeps its cache file.
pub struct Fetcher {
    name: String,
    interval: Duration,
    vehicle: ThreadSafeProviderVehicle,
    /// md5 of the last content seen. Never held across I/O.
    hash: Mutex<Option<[u8; 16]>>,
}

impl Fetcher {
    pub fn new(name: String, interval: Duration, vehicle: ThreadSafeProviderVehicle) -> Self {
        Self {
            name,
            interval,
            vehicle,
            hash: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn vehicle_type(&self) -> ProviderVehicleType {
        self.vehicle.typ()
    }

    pub fn path(&self) -> &Path {
        self.vehicle.path()
    }

    /// Cache first: an existing readable file at the vehicle path is used
    /// without touching the network.
    pub async fn initial(&self) -> crate::Result<Fetched> {
        let path = self.vehicle.path().to_path_buf();

        if self.vehicle_type() != ProviderVehicleType::File {
            match read_cache(&path).await {
                Ok((content, modified)) => {
                    let stale = SystemTime::now()
                        .duration_since(modified)
                        .map(|age| age > self.interval)
                        .unwrap_or(false);
                    debug!(
                        "{} loaded from cache {}, stale: {stale}",
                        self.name,
                        path.display()
                    );
                    *self.hash.lock().await = Some(hash(&content));
                    return Ok(Fetched {
                        content,
                        unchanged: false,
                        stale,
                        from_cache: true,
                    });
                }
                Err(e) => trace!("{} cache {} not usable: {e}", self.name, path.display()),
            }
        }

        let mut fetched = self.update().await?;
        fetched.unchanged = false;
        Ok(fetched)
    }

    /// Reads the vehicle and refreshes the cache. Unchanged bytes only touch
    /// the cache mtime.
    pub async fn update(&self) -> crate::Result<Fetched> {
        let timeout = self.interval.min(MAX_READ_TIMEOUT);
        let content = match tokio::time::timeout(timeout, self.vehicle.read()).await {
            Ok(Ok(content)) => content,
            Ok(Err(e)) => return Err(Error::Fetch(format!("{}: {e}", self.name))),
            Err(_) => {
                return Err(Error::Fetch(format!(
                    "{}: read timed out after {timeout:?}",
                    self.name
                )));
            }
        };

        let now = SystemTime::now();
        let hash = hash(&content);
        let remote = self.vehicle_type() != ProviderVehicleType::File;

        let unchanged = *self.hash.lock().await == Some(hash);
        if unchanged {
            if remote {
                let path = self.vehicle.path().to_path_buf();
                if let Err(e) = filetime::set_file_mtime(&path, now.into()) {
                    debug!("{} failed to touch cache {}: {e}", self.name, path.display());
                }
            }
            return Ok(Fetched {
                content,
                unchanged: true,
                stale: false,
                from_cache: false,
            });
        }

        if remote {
            write_cache(self.vehicle.path(), &content).await?;
        }

        *self.hash.lock().await = Some(hash);

        Ok(Fetched {
            content,
            unchanged: false,
            stale: false,
            from_cache: false,
        })
    }
}

fn hash(content: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&utils::md5(content)[..16]);
    out
}

async fn read_cache(path: &Path) -> io::Result<(Vec<u8>, SystemTime)> {
    let meta = tokio::fs::metadata(path).await?;
    if !meta.is_file() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "not a file"));
    }
    let content = tokio::fs::read(path).await?;
    Ok((content, meta.modified()?))
}

/// Writes `<path>.tmp` and renames it over `path`.
async fn write_cache(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(0o755);
        builder.create(parent).await?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    opts.mode(0o644);
    let mut file = opts.open(&tmp).await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, content).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::{Duration, SystemTime},
    };

    use async_trait::async_trait;
    use filetime::FileTime;
    use tokio::sync::Notify;

    use super::*;
    use crate::app::remote_content_manager::providers::{MockProviderVehicle, ProviderVehicle};

    /// A remote vehicle whose reads park until released.
    struct ParkedVehicle {
        path: PathBuf,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ProviderVehicle for ParkedVehicle {
        async fn read(&self) -> io::Result<Vec<u8>> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(b"remote".to_vec())
        }

        fn path(&self) -> &Path {
            &self.path
        }

        fn typ(&self) -> ProviderVehicleType {
            ProviderVehicleType::Http
        }
    }

    fn mock_http_vehicle(
        path: PathBuf,
        reads: Arc<AtomicUsize>,
        body: &'static [u8],
    ) -> MockProviderVehicle {
        let mut v = MockProviderVehicle::new();
        v.expect_path().return_const(path);
        v.expect_typ().return_const(ProviderVehicleType::Http);
        v.expect_read().returning(move || {
            reads.fetch_add(1, Ordering::SeqCst);
            Ok(body.to_vec())
        });
        v
    }

    #[tokio::test]
    async fn test_initial_prefers_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub");
        std::fs::write(&path, b"cached").unwrap();

        let reads = Arc::new(AtomicUsize::new(0));
        let f = Fetcher::new(
            "p".to_owned(),
            Duration::from_secs(3600),
            Arc::new(mock_http_vehicle(path, reads.clone(), b"remote")),
        );

        let fetched = f.initial().await.unwrap();
        assert_eq!(fetched.content, b"cached");
        assert!(fetched.from_cache);
        assert!(!fetched.stale);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_initial_flags_stale_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub");
        std::fs::write(&path, b"cached").unwrap();
        let old = SystemTime::now() - Duration::from_secs(7200);
        filetime::set_file_mtime(&path, FileTime::from_system_time(old)).unwrap();

        let reads = Arc::new(AtomicUsize::new(0));
        let f = Fetcher::new(
            "p".to_owned(),
            Duration::from_secs(3600),
            Arc::new(mock_http_vehicle(path, reads.clone(), b"remote")),
        );
        let fetched = f.initial().await.unwrap();
        assert!(fetched.stale);
        assert_eq!(reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_initial_fetches_and_writes_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sub");

        let reads = Arc::new(AtomicUsize::new(0));
        let f = Fetcher::new(
            "p".to_owned(),
            Duration::from_secs(3600),
            Arc::new(mock_http_vehicle(path.clone(), reads.clone(), b"remote")),
        );

        let fetched = f.initial().await.unwrap();
        assert_eq!(fetched.content, b"remote");
        assert!(!fetched.from_cache);
        assert_eq!(std::fs::read(&path).unwrap(), b"remote");
        assert!(!path.with_file_name("sub.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o644);
        }

        // same bytes again: reported unchanged, only the mtime moves
        let old = SystemTime::now() - Duration::from_secs(600);
        filetime::set_file_mtime(&path, FileTime::from_system_time(old)).unwrap();
        let again = f.update().await.unwrap();
        assert!(again.unchanged);
        let mtime = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(mtime > old + Duration::from_secs(300));
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_update_reports_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut v = MockProviderVehicle::new();
        v.expect_path().return_const(dir.path().join("sub"));
        v.expect_typ().return_const(ProviderVehicleType::Http);
        v.expect_read()
            .returning(|| Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")));

        let f = Fetcher::new("p".to_owned(), Duration::from_secs(60), Arc::new(v));
        match f.initial().await {
            Err(Error::Fetch(msg)) => assert!(msg.contains("refused")),
            Err(e) => panic!("unexpected error {e}"),
            Ok(_) => panic!("fetch should fail"),
        }
    }

    #[tokio::test]
    async fn test_file_vehicle_never_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local");
        std::fs::write(&path, b"v1").unwrap();

        let f = Fetcher::new(
            "p".to_owned(),
            Duration::from_secs(60),
            Arc::new(super::super::file_vehicle::Vehicle::new(&path)),
        );
        assert_eq!(f.initial().await.unwrap().content, b"v1");
        assert!(f.update().await.unwrap().unchanged);

        std::fs::write(&path, b"v2").unwrap();
        let fetched = f.update().await.unwrap();
        assert!(!fetched.unchanged);
        assert_eq!(fetched.content, b"v2");
        assert!(!dir.path().join("local.tmp").exists());
    }

    #[tokio::test]
    async fn test_cache_load_does_not_wait_for_inflight_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub");
        std::fs::write(&path, b"cached").unwrap();

        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let f = Arc::new(Fetcher::new(
            "p".to_owned(),
            Duration::from_secs(3600),
            Arc::new(ParkedVehicle {
                path: path.clone(),
                entered: entered.clone(),
                release: release.clone(),
            }),
        ));

        let update = {
            let f = f.clone();
            tokio::spawn(async move { f.update().await })
        };
        entered.notified().await;

        let cached = tokio::time::timeout(Duration::from_secs(5), f.initial())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.content, b"cached");
        assert!(!update.is_finished());

        release.notify_one();
        let fetched = update.await.unwrap().unwrap();
        assert_eq!(fetched.content, b"remote");
        assert!(!fetched.unchanged);
        assert_eq!(std::fs::read(&path).unwrap(), b"remote");
    }
}
