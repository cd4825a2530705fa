use crate::io::common::loader::RawAssetLoader;
use crate::kinds::device::{GpuDevice, GpuHandle};
use crate::kinds::resolve_relative;
use crate::kinds::texture::TextureRegistry;
use crate::resources::kind::{Dependencies, ResourceKind};
use crate::resources::registry::{ResourceGenerator, ResourceRegistry};
use crate::resources::tier::Tier;
use anyhow::{Context, bail};
use arc_swap::ArcSwapOption;
use itertools::Itertools;
use log::{debug, info};
use std::sync::Arc;

pub type MaterialRegistry = ResourceRegistry<MaterialGenerator, Material>;

const TEXTURE_SLOT_SIZE: usize = size_of::<u64>() + size_of::<u32>();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialData {
    /// Canonical texture keys, in slot order.
    pub textures: Vec<String>,
}

/// One texture path per line, relative to the material file. Blank lines and `#` comments are
/// ignored.
pub fn parse_material_manifest(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect_vec()
}

/// A material: a list of texture slots. Parsing it brings the textures into RAM alongside, and its
/// device block refers to the uploaded textures, so every texture is a dependency at Ram for Ram
/// and at Gpu for Gpu.
pub struct Material {
    loader: Arc<dyn RawAssetLoader>,
    device: Arc<dyn GpuDevice>,
    textures: Arc<TextureRegistry>,
    data: ArcSwapOption<MaterialData>,
    handle: ArcSwapOption<GpuHandle>,
}

impl Material {
    pub fn data(&self) -> Option<Arc<MaterialData>> {
        self.data.load_full()
    }

    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.handle.load().as_deref().copied()
    }
}

impl ResourceKind for Material {
    fn load_to_ram(&self, path: &str, dependencies: &mut Dependencies<'_>) -> anyhow::Result<()> {
        let buf = self.loader.load_raw_owned(path)?;
        let text = String::from_utf8(buf).with_context(|| format!("material {} is not UTF-8", path))?;

        let mut textures = Vec::new();
        for reference in parse_material_manifest(&text) {
            let texture = self.textures.get_or_create(&resolve_relative(path, &reference));
            dependencies.register_dependency(Tier::Ram, texture.as_dependency(), Tier::Ram);
            dependencies.register_dependency(Tier::Gpu, texture.as_dependency(), Tier::Gpu);
            textures.push(texture.path().to_string());
        }

        info!(target: "material", "Loaded material '{}' with {} textures", path, textures.len());
        self.data.store(Some(Arc::new(MaterialData { textures })));
        Ok(())
    }

    fn unload_from_ram(&self, path: &str) {
        if self.data.swap(None).is_some() {
            debug!(target: "material", "CPU release material '{}'", path);
        }
    }

    fn load_to_gpu(&self, path: &str) -> anyhow::Result<()> {
        let data = self
            .data
            .load_full()
            .with_context(|| format!("material {} has no RAM data", path))?;

        // per slot: the texture's device handle and its size
        let mut block = Vec::with_capacity(data.textures.len() * TEXTURE_SLOT_SIZE);
        for texture_path in &data.textures {
            let Some(texture) = self.textures.get(texture_path) else {
                bail!("material {}: texture {} is not registered", path, texture_path);
            };
            let (Some(handle), Some(pixels)) = (texture.kind().gpu_handle(), texture.kind().data()) else {
                bail!("material {}: texture {} is not on the GPU", path, texture_path);
            };
            let size = u32::try_from(pixels.bytes.len())
                .with_context(|| format!("material {}: texture {} is too large", path, texture_path))?;
            block.extend_from_slice(&handle.id().to_le_bytes());
            block.extend_from_slice(&size.to_le_bytes());
        }

        let handle = self.device.upload(path, &block)?;
        info!(target: "material", "GPU acquire material '{}' as {}", path, handle);
        self.handle.store(Some(Arc::new(handle)));
        Ok(())
    }

    fn unload_from_gpu(&self, path: &str) {
        if let Some(handle) = self.handle.swap(None) {
            self.device.free(*handle);
            info!(target: "material", "GPU release material '{}'", path);
        }
    }
}

pub struct MaterialGenerator {
    loader: Arc<dyn RawAssetLoader>,
    device: Arc<dyn GpuDevice>,
    textures: Arc<TextureRegistry>,
}

impl MaterialGenerator {
    pub fn new(loader: Arc<dyn RawAssetLoader>, device: Arc<dyn GpuDevice>, textures: Arc<TextureRegistry>) -> Self {
        Self {
            loader,
            device,
            textures,
        }
    }
}

impl ResourceGenerator<Material> for MaterialGenerator {
    fn generate(&self, _path: &str) -> Material {
        Material {
            loader: self.loader.clone(),
            device: self.device.clone(),
            textures: self.textures.clone(),
            data: ArcSwapOption::empty(),
            handle: ArcSwapOption::empty(),
        }
    }

    fn canonicalize(&self, key: &str) -> String {
        self.loader.canonicalize(key)
    }
}
