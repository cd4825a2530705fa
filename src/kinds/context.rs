use crate::io::common::loader::RawAssetLoader;
use crate::kinds::device::GpuDevice;
use crate::kinds::image::{ImageGenerator, ImageRegistry};
use crate::kinds::material::{MaterialGenerator, MaterialRegistry};
use crate::kinds::mesh::{MeshGenerator, MeshRegistry};
use crate::kinds::texture::{TextureGenerator, TextureRegistry};
use crate::resources::manager::ResourceManager;
use crate::resources::registry::ResourceSnapshot;
use std::sync::Arc;

/// Everything needed to create and stream resources, built once at startup and passed down.
pub struct ResourceContext {
    pub meshes: Arc<MeshRegistry>,
    pub materials: Arc<MaterialRegistry>,
    pub textures: Arc<TextureRegistry>,
    pub images: Arc<ImageRegistry>,
    pub loader: Arc<dyn RawAssetLoader>,
    pub device: Arc<dyn GpuDevice>,
    // dropped last, so the loading thread is joined after the registries are gone
    pub manager: Option<Arc<ResourceManager>>,
}

impl ResourceContext {
    pub fn new(
        loader: Arc<dyn RawAssetLoader>,
        device: Arc<dyn GpuDevice>,
        manager: Option<Arc<ResourceManager>>,
    ) -> Self {
        let image_generator = ImageGenerator::new(loader.clone());
        let images = Arc::new(match &manager {
            Some(manager) => ImageRegistry::with_manager("images", image_generator, manager),
            None => ImageRegistry::new("images", image_generator),
        });

        let texture_generator = TextureGenerator::new(loader.clone(), device.clone(), images.clone());
        let textures = Arc::new(match &manager {
            Some(manager) => TextureRegistry::with_manager("textures", texture_generator, manager),
            None => TextureRegistry::new("textures", texture_generator),
        });

        let material_generator = MaterialGenerator::new(loader.clone(), device.clone(), textures.clone());
        let materials = Arc::new(match &manager {
            Some(manager) => MaterialRegistry::with_manager("materials", material_generator, manager),
            None => MaterialRegistry::new("materials", material_generator),
        });

        let mesh_generator = MeshGenerator::new(loader.clone(), device.clone(), materials.clone());
        let meshes = Arc::new(match &manager {
            Some(manager) => MeshRegistry::with_manager("meshes", mesh_generator, manager),
            None => MeshRegistry::new("meshes", mesh_generator),
        });

        Self {
            meshes,
            materials,
            textures,
            images,
            loader,
            device,
            manager,
        }
    }

    /// Blocks until the background queue is drained. Without a manager there is nothing to wait for.
    pub fn wait_idle(&self) {
        if let Some(manager) = &self.manager {
            manager.wait_idle();
        }
    }

    /// Runs the owning-context operations, see [`ResourceManager::process_owning_queue`].
    pub fn process_owning_queue(&self) -> usize {
        self.manager
            .as_ref()
            .map(|manager| manager.process_owning_queue())
            .unwrap_or(0)
    }

    /// Every entry of every registry that is above Drive.
    pub fn resident(&self) -> Vec<ResourceSnapshot> {
        self.images
            .snapshot()
            .into_iter()
            .chain(self.textures.snapshot())
            .chain(self.materials.snapshot())
            .chain(self.meshes.snapshot())
            .filter(|entry| entry.tier > crate::resources::tier::Tier::Drive)
            .collect()
    }

    pub fn dump_state(&self) {
        self.images.dump_state();
        self.textures.dump_state();
        self.materials.dump_state();
        self.meshes.dump_state();
    }
}
