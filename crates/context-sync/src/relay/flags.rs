use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::Result;
use crate::config::RelayConfig;

/// 降级标记的持久化位置。
pub trait DegradedFlagStore: Send + Sync {
    fn is_set(&self) -> bool;
    fn set(&self) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// 以文件是否存在表示降级标记。
#[derive(Debug, Clone)]
pub struct FileFlagStore {
    path: PathBuf,
}

impl FileFlagStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DegradedFlagStore for FileFlagStore {
    fn is_set(&self) -> bool {
        self.path.exists()
    }

    fn set(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, b"degraded\n")?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryFlagStore {
    flag: AtomicBool,
}

impl MemoryFlagStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DegradedFlagStore for MemoryFlagStore {
    fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn set(&self) -> Result<()> {
        self.flag.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.flag.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// 配置了 `degraded_flag_path` 时持久化到文件，否则只保存在内存中。
pub fn flag_store(config: &RelayConfig) -> Arc<dyn DegradedFlagStore> {
    match &config.degraded_flag_path {
        Some(path) => Arc::new(FileFlagStore::new(path.clone())),
        None => Arc::new(MemoryFlagStore::new()),
    }
}
