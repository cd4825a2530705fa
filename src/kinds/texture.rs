use crate::io::common::loader::RawAssetLoader;
use crate::kinds::device::{GpuDevice, GpuHandle};
use crate::kinds::image::{Image, ImageData, ImageRegistry};
use crate::resources::kind::{Dependencies, ResourceKind};
use crate::resources::registry::{ResourceGenerator, ResourceRegistry};
use crate::resources::resource::Resource;
use crate::resources::tier::Tier;
use anyhow::Context;
use arc_swap::ArcSwapOption;
use log::{debug, info, warn};
use std::sync::Arc;

pub type TextureRegistry = ResourceRegistry<TextureGenerator, Texture>;

/// The device copy of an [`Image`]. Both its Ram and its Gpu tier need the image in RAM, which is
/// declared as soon as the texture is created.
pub struct Texture {
    image: Arc<Resource<Image>>,
    device: Arc<dyn GpuDevice>,
    data: ArcSwapOption<ImageData>,
    handle: ArcSwapOption<GpuHandle>,
}

impl Texture {
    pub fn image(&self) -> &Arc<Resource<Image>> {
        &self.image
    }

    /// The image bytes, if the texture is at least at Ram.
    pub fn data(&self) -> Option<Arc<ImageData>> {
        self.data.load_full()
    }

    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.handle.load().as_deref().copied()
    }
}

impl ResourceKind for Texture {
    fn load_to_ram(&self, path: &str, _dependencies: &mut Dependencies<'_>) -> anyhow::Result<()> {
        let data = self
            .image
            .kind()
            .data()
            .with_context(|| format!("texture {}: image {} is not in RAM", path, self.image.path()))?;

        debug!(target: "texture", "Texture '{}' uses {} bytes of its image", path, data.bytes.len());
        self.data.store(Some(data));
        Ok(())
    }

    fn unload_from_ram(&self, path: &str) {
        if self.data.swap(None).is_some() {
            debug!(target: "texture", "Dropped the image data of '{}'", path);
        }
    }

    fn load_to_gpu(&self, path: &str) -> anyhow::Result<()> {
        let data = self
            .data
            .load_full()
            .with_context(|| format!("texture {} has no RAM data to upload", path))?;
        let handle = self.device.upload(path, &data.bytes)?;

        info!(target: "texture", "Uploaded texture to GPU '{}' as {}", path, handle);
        self.handle.store(Some(Arc::new(handle)));
        Ok(())
    }

    fn unload_from_gpu(&self, path: &str) {
        if let Some(handle) = self.handle.swap(None) {
            self.device.free(*handle);
            info!(target: "texture", "Released GPU data for '{}'", path);
        }
    }
}

pub struct TextureGenerator {
    loader: Arc<dyn RawAssetLoader>,
    device: Arc<dyn GpuDevice>,
    images: Arc<ImageRegistry>,
}

impl TextureGenerator {
    pub fn new(loader: Arc<dyn RawAssetLoader>, device: Arc<dyn GpuDevice>, images: Arc<ImageRegistry>) -> Self {
        Self { loader, device, images }
    }
}

impl ResourceGenerator<Texture> for TextureGenerator {
    fn generate(&self, path: &str) -> Texture {
        Texture {
            image: self.images.get_or_create(path),
            device: self.device.clone(),
            data: ArcSwapOption::empty(),
            handle: ArcSwapOption::empty(),
        }
    }

    fn declare(&self, resource: &Arc<Resource<Texture>>) {
        let image = resource.kind().image().as_dependency();
        let declared = resource.register_dependency(Tier::Ram, image.clone(), Tier::Ram)
            && resource.register_dependency(Tier::Gpu, image, Tier::Ram);
        if !declared {
            warn!(target: "texture", "{}: could not declare its image dependencies", resource.path());
        }
    }

    fn canonicalize(&self, key: &str) -> String {
        self.loader.canonicalize(key)
    }
}
