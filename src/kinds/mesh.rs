use crate::io::common::loader::RawAssetLoader;
use crate::kinds::device::{GpuDevice, GpuHandle};
use crate::kinds::resolve_relative;
use crate::kinds::material::MaterialRegistry;
use crate::resources::kind::{Dependencies, ResourceKind};
use crate::resources::registry::{ResourceGenerator, ResourceRegistry};
use crate::resources::tier::Tier;
use anyhow::{Context, anyhow, bail};
use arc_swap::ArcSwapOption;
use itertools::Itertools;
use log::info;
use std::sync::Arc;

pub type MeshRegistry = ResourceRegistry<MeshGenerator, Mesh>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    /// Material paths as written in the manifest, relative to the mesh file.
    pub materials: Vec<String>,
    pub positions: Vec<[f32; 3]>,
}

impl MeshData {
    /// Positions as tightly packed little endian f32 triples.
    pub fn vertex_bytes(&self) -> Vec<u8> {
        self.positions
            .iter()
            .flat_map(|position| position.iter().flat_map(|component| component.to_le_bytes()))
            .collect_vec()
    }
}

/// Parses `material <path>` and `v <x> <y> <z>` lines. Blank lines and `#` comments are ignored.
pub fn parse_mesh_manifest(text: &str) -> anyhow::Result<MeshData> {
    let mut mesh = MeshData::default();
    for (index, raw_line) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw_line.split('#').next().unwrap_or_default().trim();
        let mut tokens = line.split_whitespace();
        match tokens.next() {
            None => continue,
            Some("material") => {
                let path = tokens
                    .next()
                    .ok_or_else(|| anyhow!("line {}: material without a path", line_number))?;
                mesh.materials.push(path.to_string());
            }
            Some("v") => {
                let components = tokens
                    .map(|token| {
                        token
                            .parse::<f32>()
                            .with_context(|| format!("line {}: invalid coordinate '{}'", line_number, token))
                    })
                    .collect::<anyhow::Result<Vec<f32>>>()?;
                let [x, y, z] = components.as_slice() else {
                    bail!(
                        "line {}: expected 3 coordinates, got {}",
                        line_number,
                        components.len()
                    );
                };
                mesh.positions.push([*x, *y, *z]);
            }
            Some(other) => bail!("line {}: unknown directive '{}'", line_number, other),
        }
    }
    Ok(mesh)
}

/// A mesh: vertex positions plus the materials it is drawn with. Its materials are parsed together
/// with it and it is only drawable once every material is on the GPU, so each material is a
/// dependency at Ram for Ram and at Gpu for Gpu.
pub struct Mesh {
    loader: Arc<dyn RawAssetLoader>,
    device: Arc<dyn GpuDevice>,
    materials: Arc<MaterialRegistry>,
    data: ArcSwapOption<MeshData>,
    handle: ArcSwapOption<GpuHandle>,
}

impl Mesh {
    pub fn data(&self) -> Option<Arc<MeshData>> {
        self.data.load_full()
    }

    pub fn gpu_handle(&self) -> Option<GpuHandle> {
        self.handle.load().as_deref().copied()
    }
}

impl ResourceKind for Mesh {
    fn load_to_ram(&self, path: &str, dependencies: &mut Dependencies<'_>) -> anyhow::Result<()> {
        let buf = self.loader.load_raw_owned(path)?;
        let text = String::from_utf8(buf).with_context(|| format!("mesh {} is not UTF-8", path))?;
        let mesh = parse_mesh_manifest(&text).with_context(|| format!("failed to parse mesh {}", path))?;

        for reference in &mesh.materials {
            let material = self.materials.get_or_create(&resolve_relative(path, reference));
            dependencies.register_dependency(Tier::Ram, material.as_dependency(), Tier::Ram);
            dependencies.register_dependency(Tier::Gpu, material.as_dependency(), Tier::Gpu);
        }

        info!(
            target: "mesh",
            "Loaded mesh '{}' ({} vertices, {} materials)",
            path,
            mesh.positions.len(),
            mesh.materials.len()
        );
        self.data.store(Some(Arc::new(mesh)));
        Ok(())
    }

    fn unload_from_ram(&self, path: &str) {
        if self.data.swap(None).is_some() {
            info!(target: "mesh", "Released RAM data for '{}'", path);
        }
    }

    fn load_to_gpu(&self, path: &str) -> anyhow::Result<()> {
        let data = self
            .data
            .load_full()
            .with_context(|| format!("mesh {} has no RAM data", path))?;
        let handle = self.device.upload(path, &data.vertex_bytes())?;

        info!(target: "mesh", "GPU acquire mesh '{}': built vertex buffer {}", path, handle);
        self.handle.store(Some(Arc::new(handle)));
        Ok(())
    }

    fn unload_from_gpu(&self, path: &str) {
        if let Some(handle) = self.handle.swap(None) {
            self.device.free(*handle);
            info!(target: "mesh", "GPU release mesh '{}': destroyed vertex buffer", path);
        }
    }
}

pub struct MeshGenerator {
    loader: Arc<dyn RawAssetLoader>,
    device: Arc<dyn GpuDevice>,
    materials: Arc<MaterialRegistry>,
}

impl MeshGenerator {
    pub fn new(loader: Arc<dyn RawAssetLoader>, device: Arc<dyn GpuDevice>, materials: Arc<MaterialRegistry>) -> Self {
        Self {
            loader,
            device,
            materials,
        }
    }
}

impl ResourceGenerator<Mesh> for MeshGenerator {
    fn generate(&self, _path: &str) -> Mesh {
        Mesh {
            loader: self.loader.clone(),
            device: self.device.clone(),
            materials: self.materials.clone(),
            data: ArcSwapOption::empty(),
            handle: ArcSwapOption::empty(),
        }
    }

    fn canonicalize(&self, key: &str) -> String {
        self.loader.canonicalize(key)
    }
}
