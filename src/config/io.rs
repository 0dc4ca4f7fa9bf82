use std::env::current_exe;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str;
use std::sync::{Arc, Mutex};
use directories_next::ProjectDirs;
use fd_lock::{RwLock, RwLockWriteGuard};
use log::{info, warn};
use serde_json;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::config::types::Config;
use crate::error::ConfigError;

// <exe>.json next to the executable, for installs on removable media
fn get_portable_config_path() -> Option<PathBuf> {
    match current_exe() {
        Ok(mut path) => {
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

// sig-link.json in the os dependent config directory (e.g. %AppData% on windows)
fn get_local_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "wasatchphotonics", "sig-link").map(|dirs| {
        dirs.config_dir().join("sig-link.json")
    })
}

fn get_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = get_portable_config_path() {
        match std::fs::metadata(&path) {
            Ok(attr) if attr.is_file() => return Ok(path),
            Ok(_) => {},
            Err(err) => {
                info!("No portable config at {} ({}); using local path instead", path.to_string_lossy(), err);
            },
        }
    }

    get_local_config_path().ok_or(ConfigError::NoConfigPath)
}

/**
 * Holds the exclusive lock that keeps a second instance from driving the same adapter.
 */
pub struct ConfigIOLocker {
    rw_lock: RwLock<std::fs::File>,
}

impl ConfigIOLocker {
    pub fn lock(&mut self) -> Result<RwLockWriteGuard<'_, std::fs::File>, ConfigError> {
        self.rw_lock.try_write().map_err(|source| ConfigError::CanNotLock { source })
    }
}

struct ConfigIOInner {
    file: std::fs::File,
}

#[derive(Clone)]
pub struct ConfigIO {
    inner: Arc<Mutex<ConfigIOInner>>,
}

impl ConfigIO {
    pub fn new_sync() -> Result<Self, ConfigError> {
        let path = get_config_path()?;
        ConfigIO::open(path)
    }

    pub fn open(path: PathBuf) -> Result<Self, ConfigError> {
        info!("Using config file {}", path.to_string_lossy());

        if let Some(directory) = path.parent() {
            std::fs::create_dir_all(directory)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .create(true)
            .open(path)?;

        Ok(ConfigIO { inner: Arc::new(Mutex::new(ConfigIOInner { file })) })
    }

    pub fn locker(&self) -> Result<ConfigIOLocker, ConfigError> {
        Ok(ConfigIOLocker {
            rw_lock: RwLock::new(self.clone_file()?),
        })
    }

    fn clone_file(&self) -> Result<std::fs::File, ConfigError> {
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(inner.file.try_clone()?)
    }

    // The File returned from here shares its cursor with every other clone
    fn get_file(&self) -> Result<File, ConfigError> {
        Ok(File::from_std(self.clone_file()?))
    }

    /**
     * Reads the config; an empty file yields the defaults.
     */
    pub async fn read(&self) -> Result<Config, ConfigError> {
        let mut file = self.get_file()?;
        file.rewind().await?;

        let mut content = vec![];
        file.read_to_end(&mut content).await?;

        if content.is_empty() {
            return Ok(Config::default());
        }

        let content = str::from_utf8(&content)?;
        Ok(serde_json::from_str(content)?)
    }

    pub async fn save(&self, config: &Config) -> Result<(), ConfigError> {
        let mut file = self.get_file()?;
        info!("Saving config");

        let content = serde_json::to_string_pretty(config)?;
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

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sig-link-test-{}-{}.json", name, std::process::id()))
    }

    #[tokio::test]
    async fn empty_file_reads_as_defaults() {
        let path = temp_path("empty");
        let _ = std::fs::remove_file(&path);

        let io = ConfigIO::open(path.clone()).unwrap();
        assert_eq!(io.read().await.unwrap(), Config::default());

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn saved_config_is_read_back() {
        let path = temp_path("save");
        let _ = std::fs::remove_file(&path);
        let io = ConfigIO::open(path.clone()).unwrap();

        let mut config = Config::default();
        config.scan.name_filters = vec!["sig".to_string()];
        config.handshake.step_timeout_ms = Some(1500);
        io.save(&config).await.unwrap();

        assert_eq!(io.read().await.unwrap(), config);
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn garbage_is_a_json_error() {
        let path = temp_path("garbage");
        std::fs::write(&path, "{not json").unwrap();

        let io = ConfigIO::open(path.clone()).unwrap();
        assert!(matches!(io.read().await, Err(ConfigError::JsonError { .. })));
        std::fs::remove_file(&path).unwrap();
    }
}
