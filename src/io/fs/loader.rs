use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use log::{trace, warn};

use crate::io::common::loader::RawAssetLoader;
use crate::resources::registry::{normalize_path, path_to_key};

/// Loads assets from a data folder on disk. Relative asset paths are resolved against that folder.
#[derive(Debug)]
pub struct FsLoader {
    data_folder: PathBuf,
}

impl FsLoader {
    pub fn new(data_folder: impl AsRef<Path>) -> anyhow::Result<Self> {
        let data_folder = data_folder.as_ref();
        if !data_folder.is_dir() {
            bail!("FsLoader: data folder {} is not a directory", data_folder.display());
        }

        let absolute = std::path::absolute(data_folder)
            .with_context(|| format!("FsLoader: cannot resolve data folder {}", data_folder.display()))?;
        Ok(FsLoader {
            data_folder: normalize_path(&absolute),
        })
    }

    pub fn data_folder(&self) -> &Path {
        &self.data_folder
    }

    fn resolve(&self, path: &str) -> PathBuf {
        // joining an absolute path replaces the data folder, which is what canonical keys are
        normalize_path(&self.data_folder.join(path.replace('\\', "/")))
    }
}

impl RawAssetLoader for FsLoader {
    fn load_raw_owned(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let resolved = self.resolve(path);
        if !resolved.is_file() {
            warn!("Could not locate {}!", resolved.display());
        }

        let buf = fs::read(&resolved).with_context(|| format!("Failed to read {}", resolved.display()))?;
        trace!("Loaded {} ({} bytes)", resolved.display(), buf.len());
        Ok(buf)
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn canonicalize(&self, path: &str) -> String {
        path_to_key(&self.resolve(path))
    }
}
