use std::env::{current_exe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use directories_next::{ProjectDirs};
use tokio::fs::{File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use serde_json;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use std::fs::OpenOptions;
use std::str;

use crate::config::types::Config;
use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "gobe-session.json";

// creates a path next to the executable, with the extension replaced by .json
// this could be useful for usb sticks
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
            // F:\gobe-session.exe => F:\gobe-session.json
            if !path.set_extension("json") {
                warn!("current exe has no filename: {}", path.to_string_lossy());
                return None
            }

            Some(path)
        },
        Err(err) => {
            warn!("failed to get current exe path: {:?}", err);
            None
        },
    }
}

// creates a path to CONFIG_FILE_NAME in an os dependent standard directory, such as %AppData% on
// windows.
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "gobe", "gobe-session").map(|dirs| {
        dirs.config_dir().join(CONFIG_FILE_NAME)
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) => {
                if attr.is_file() {
                    return Ok(path);
                }
            }
            Err(err) => {
                info!("No portable config at {} ({}), using the local path instead", path.to_string_lossy(), err);
            },
        }
    }

    match get_local_config_path() {
        None => Err(ConfigError::NoConfigPath),
        Some(path) => Ok(path),
    }
}

pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<std::fs::File>, ConfigError> {
        match self.rw_lock.try_write() {
            Ok(guard) => Ok(guard),
            Err(source) => Err(ConfigError::CanNotLock { source }),
        }
    }
}

struct ConfigIOInner {
    path: PathBuf,
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    /// Opens the config file at its default location.
    pub fn new_sync() -> Result<Self, ConfigError> {
        Self::open_sync(&get_config_path()?)
    }

    pub fn open_sync(path: &Path) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .append(false)
            .create(true)
            .open(path)?;

        let inner = ConfigIOInner {
            path: path.to_path_buf(),
            file,
        };
        Ok(ConfigIO { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn path(&self) -> PathBuf {
        self.inner.lock().expect("Failed to lock ConfigIO inner").path.clone()
    }

    // an exclusive file lock makes sure the config file (and the device) is used by only one
    // instance of this application.
    pub fn locker(&mut self) -> Result<ConfigIOLocker, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");

        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(inner.file.try_clone()?),
        })
    }

    // The File returned from here should never be closed!
    fn get_file(&self) -> Result<File, ConfigError> {
        let inner = self.inner.lock().expect("Failed to lock ConfigIO inner");
        let file = inner.file.try_clone()?; // std File
        Ok(File::from_std(file)) // tokio File
    }

    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        info!("Reading config file");

        let mut content = vec![];
        file.rewind().await?;
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;

        let mut config: Config = serde_json::from_str(content)?;
        config.normalize();
        Ok(config)
    }

    pub async fn save(&self, config: Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(&config)?;
        file.rewind().await?;
        file.set_len(0).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_config_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir()
            .join(format!("gobe-session-test-{}-{}-{}", name, std::process::id(), nanos))
            .join(CONFIG_FILE_NAME)
    }

    #[tokio::test]
    async fn an_empty_file_reads_as_default() {
        let path = temp_config_path("empty");
        let config_io = ConfigIO::open_sync(&path).unwrap();

        assert_eq!(config_io.read().await.unwrap(), Config::default());
        assert_eq!(config_io.path(), path);
    }

    #[tokio::test]
    async fn saved_config_is_read_back_normalized() {
        let path = temp_config_path("save");
        let config_io = ConfigIO::open_sync(&path).unwrap();

        let mut config = Config::default();
        config.device.target_name = "MyGobeName ".into();
        config.telemetry.poll_interval_secs = 0;
        config_io.save(config).await.unwrap();

        let read = config_io.read().await.unwrap();
        assert_eq!(read.device.target_name, "MyGobeName");
        assert_eq!(read.telemetry.poll_interval_secs, 1);

        // a shorter document must not leave the tail of the previous one behind
        config_io.save(Config::default()).await.unwrap();
        assert_eq!(config_io.read().await.unwrap(), Config::default());
    }

    #[test]
    fn a_second_lock_is_refused() {
        let path = temp_config_path("lock");
        let mut first = ConfigIO::open_sync(&path).unwrap();
        let mut second = ConfigIO::open_sync(&path).unwrap();

        let mut first_locker = first.locker().unwrap();
        let _guard = first_locker.lock().unwrap();

        let mut second_locker = second.locker().unwrap();
        assert!(matches!(second_locker.lock(), Err(ConfigError::CanNotLock { .. })));
    }
}
