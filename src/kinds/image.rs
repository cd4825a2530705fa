use crate::io::common::loader::RawAssetLoader;
use crate::resources::kind::{Dependencies, ResourceKind};
use crate::resources::registry::{ResourceGenerator, ResourceRegistry};
use crate::resources::tier::Tier;
use anyhow::bail;
use arc_swap::ArcSwapOption;
use log::info;
use std::sync::Arc;

pub type ImageRegistry = ResourceRegistry<ImageGenerator, Image>;

/// The in-memory representation. No codec is involved, these are the file's bytes.
#[derive(Debug)]
pub struct ImageData {
    pub bytes: Vec<u8>,
}

/// Decoded pixels in RAM. An image never goes to the device itself, a
/// [`crate::kinds::texture::Texture`] uploads it.
pub struct Image {
    loader: Arc<dyn RawAssetLoader>,
    data: ArcSwapOption<ImageData>,
}

impl Image {
    /// The bytes, if the image is at Ram.
    pub fn data(&self) -> Option<Arc<ImageData>> {
        self.data.load_full()
    }
}

impl ResourceKind for Image {
    fn supports_state(&self, tier: Tier) -> bool {
        tier != Tier::Gpu
    }

    fn load_to_ram(&self, path: &str, _dependencies: &mut Dependencies<'_>) -> anyhow::Result<()> {
        let bytes = self.loader.load_raw_owned(path)?;
        if bytes.is_empty() {
            bail!("image {} is empty", path);
        }

        info!(target: "image", "Loaded image to RAM '{}' ({} bytes)", path, bytes.len());
        self.data.store(Some(Arc::new(ImageData { bytes })));
        Ok(())
    }

    fn unload_from_ram(&self, path: &str) {
        if self.data.swap(None).is_some() {
            info!(target: "image", "Released RAM data for '{}'", path);
        }
    }
}

pub struct ImageGenerator {
    loader: Arc<dyn RawAssetLoader>,
}

impl ImageGenerator {
    pub fn new(loader: Arc<dyn RawAssetLoader>) -> Self {
        Self { loader }
    }
}

impl ResourceGenerator<Image> for ImageGenerator {
    fn generate(&self, _path: &str) -> Image {
        Image {
            loader: self.loader.clone(),
            data: ArcSwapOption::empty(),
        }
    }

    fn canonicalize(&self, key: &str) -> String {
        self.loader.canonicalize(key)
    }
}
