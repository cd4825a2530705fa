use asset_tiers::io::fs::loader::FsLoader;
use asset_tiers::kinds::context::ResourceContext;
use asset_tiers::kinds::device::HeadlessDevice;
use asset_tiers::{PromotionError, ResourceManager, Tier, TierCounts};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, path: &str, contents: &str) -> std::io::Result<()> {
    let path = root.join(path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

fn data_dir() -> std::io::Result<TempDir> {
    let dir = tempfile::tempdir()?;
    write(dir.path(), "textures/brick.png", "brick-pixels")?;
    write(dir.path(), "textures/brick_n.png", "normal")?;
    write(dir.path(), "textures/empty.png", "")?;
    write(
        dir.path(),
        "materials/brick.mat",
        "# albedo, normal\n../textures/brick.png\n../textures/brick_n.png\n",
    )?;
    write(dir.path(), "materials/empty.mat", "../textures/empty.png\n")?;
    write(dir.path(), "materials/local.mat", "brick.png\n")?;
    write(dir.path(), "materials/brick.png", "local")?;
    write(
        dir.path(),
        "meshes/quad.mesh",
        "material ../materials/brick.mat\nv 0 0 0\nv 1 0 0\nv 1 1 0\n",
    )?;
    write(dir.path(), "meshes/wall.mesh", "material ../materials/brick.mat\nv 0 0 0\n")?;
    write(dir.path(), "meshes/missing.mesh", "material ../materials/missing.mat\nv 0 0 0\n")?;
    write(dir.path(), "meshes/empty.mesh", "material ../materials/empty.mat\nv 0 0 0\n")?;
    write(dir.path(), "meshes/local.mesh", "material ../materials/local.mat\nv 0 0 0\n")?;
    Ok(dir)
}

fn context(
    dir: &TempDir,
    device: &Arc<HeadlessDevice>,
    manager: Option<Arc<ResourceManager>>,
) -> anyhow::Result<ResourceContext> {
    let loader = Arc::new(FsLoader::new(dir.path())?);
    Ok(ResourceContext::new(loader, device.clone(), manager))
}

fn pump(context: &ResourceContext) {
    loop {
        context.wait_idle();
        if context.process_owning_queue() == 0 {
            context.wait_idle();
            if context.process_owning_queue() == 0 {
                break;
            }
        }
    }
}

// device bytes: 12 + 6 for the textures, two 12 byte slots for the material, 36 for the quad
const QUAD_BYTES: usize = 12 + 6 + 2 * 12 + 3 * 3 * 4;

#[test_log::test]
fn mesh_pulls_in_materials_and_textures() -> anyhow::Result<()> {
    let dir = data_dir()?;
    let device = Arc::new(HeadlessDevice::new());
    let context = context(&dir, &device, None)?;

    let mesh = context.meshes.get_or_create("meshes/quad.mesh");
    assert!(mesh.require(Tier::Gpu));

    let data = mesh.kind().data().unwrap();
    assert_eq!(data.positions.len(), 3);
    assert!(mesh.kind().gpu_handle().is_some());

    let material = context.materials.get("materials/brick.mat").unwrap();
    assert_eq!(material.current_tier(), Tier::Gpu);
    assert_eq!(material.request_counts(), TierCounts::new(0, 1, 1));
    assert_eq!(material.kind().data().unwrap().textures.len(), 2);

    let albedo = context.textures.get("textures/brick.png").unwrap();
    assert_eq!(albedo.current_tier(), Tier::Gpu);
    assert_eq!(albedo.kind().data().unwrap().bytes, b"brick-pixels");
    assert!(albedo.kind().gpu_handle().is_some());

    // the image never leaves RAM, the texture holds it for both of its tiers
    let image = context.images.get("textures/brick.png").unwrap();
    assert!(Arc::ptr_eq(&image, albedo.kind().image()));
    assert_eq!(image.current_tier(), Tier::Ram);
    assert_eq!(image.request_counts(), TierCounts::new(0, 2, 0));

    assert_eq!(device.live_allocations(), 4);
    assert_eq!(device.live_bytes(), QUAD_BYTES);
    let label = device.label_of(mesh.kind().gpu_handle().unwrap()).unwrap();
    assert_eq!(label, mesh.path());

    mesh.release(Tier::Gpu);
    assert!(context.resident().is_empty());
    assert_eq!(device.live_allocations(), 0);
    assert!(mesh.kind().data().is_none());
    assert!(albedo.kind().data().is_none());
    assert!(image.kind().data().is_none());
    Ok(())
}

#[test_log::test]
fn references_resolve_next_to_the_referencing_file() -> anyhow::Result<()> {
    let dir = data_dir()?;
    let device = Arc::new(HeadlessDevice::new());
    let context = context(&dir, &device, None)?;

    let mesh = context.meshes.get_or_create("meshes/local.mesh");
    assert!(mesh.require(Tier::Gpu));

    let material = context.materials.get("materials/local.mat").unwrap();
    let texture = context.textures.get("materials/brick.png").unwrap();
    assert_eq!(material.kind().data().unwrap().textures, vec![texture.path().to_string()]);
    assert_eq!(texture.kind().data().unwrap().bytes, b"local");
    assert!(context.textures.get("textures/brick.png").is_none());

    mesh.release(Tier::Gpu);
    assert!(context.resident().is_empty());
    Ok(())
}

#[test_log::test]
fn meshes_share_their_material() -> anyhow::Result<()> {
    let dir = data_dir()?;
    let device = Arc::new(HeadlessDevice::new());
    let context = context(&dir, &device, None)?;

    let quad = context.meshes.get_or_create("meshes/quad.mesh");
    let wall = context.meshes.get_or_create("./meshes/wall.mesh");
    assert!(quad.require(Tier::Gpu));
    assert!(wall.require(Tier::Gpu));

    assert_eq!(context.materials.len(), 1);
    let material = context.materials.get("materials/brick.mat").unwrap();
    assert_eq!(material.request_counts()[Tier::Gpu], 2);
    // two vertex buffers, one material block, two textures
    assert_eq!(device.live_allocations(), 5);

    quad.release(Tier::Gpu);
    assert_eq!(material.current_tier(), Tier::Gpu);
    wall.release(Tier::Gpu);
    assert_eq!(material.current_tier(), Tier::Drive);
    assert!(context.resident().is_empty());
    Ok(())
}

#[test_log::test]
fn ram_only_mesh_stays_off_the_device() -> anyhow::Result<()> {
    let dir = data_dir()?;
    let device = Arc::new(HeadlessDevice::new());
    let context = context(&dir, &device, None)?;

    let mesh = context.meshes.get_or_create("meshes/quad.mesh");
    assert!(mesh.require(Tier::Ram));

    // materials are parsed together with the mesh, nothing is uploaded
    let material = context.materials.get("materials/brick.mat").unwrap();
    assert_eq!(material.current_tier(), Tier::Ram);
    assert!(material.kind().data().is_some());
    let albedo = context.textures.get("textures/brick.png").unwrap();
    assert_eq!(albedo.current_tier(), Tier::Ram);
    assert_eq!(device.live_allocations(), 0);

    mesh.release(Tier::Ram);
    assert!(context.resident().is_empty());
    Ok(())
}

#[test_log::test]
fn missing_material_fails_the_mesh() -> anyhow::Result<()> {
    let dir = data_dir()?;
    let device = Arc::new(HeadlessDevice::new());
    let context = context(&dir, &device, None)?;

    let mesh = context.meshes.get_or_create("meshes/missing.mesh");
    let err = mesh.try_require(Tier::Gpu).unwrap_err();
    assert!(matches!(err, PromotionError::DependencyFailed { owning_tier: Tier::Ram, .. }), "{}", err);

    assert_eq!(mesh.current_tier(), Tier::Drive);
    assert!(mesh.kind().data().is_none());
    assert!(context.resident().is_empty());
    assert_eq!(device.live_allocations(), 0);
    Ok(())
}

#[test_log::test]
fn empty_image_fails_in_ram() -> anyhow::Result<()> {
    let dir = data_dir()?;
    let device = Arc::new(HeadlessDevice::new());
    let context = context(&dir, &device, None)?;

    let mesh = context.meshes.get_or_create("meshes/empty.mesh");
    assert!(!mesh.require(Tier::Gpu));

    let image = context.images.get("textures/empty.png").unwrap();
    let err = image.try_require(Tier::Ram).unwrap_err();
    assert!(matches!(err, PromotionError::HookFailed { tier: Tier::Ram, .. }));
    assert!(format!("{:#}", anyhow::Error::from(err)).contains("is empty"));

    let texture = context.textures.get("textures/empty.png").unwrap();
    let err = texture.try_require(Tier::Ram).unwrap_err();
    assert!(matches!(err, PromotionError::DependencyFailed { owning_tier: Tier::Ram, .. }), "{}", err);
    assert!(context.resident().is_empty());
    Ok(())
}

#[test_log::test]
fn exhausted_device_rolls_the_mesh_back() -> anyhow::Result<()> {
    let dir = data_dir()?;
    // enough for the textures and the material block, not for the vertex buffer
    let device = Arc::new(HeadlessDevice::with_budget(60));
    let context = context(&dir, &device, None)?;

    let mesh = context.meshes.get_or_create("meshes/quad.mesh");
    let err = mesh.try_require(Tier::Gpu).unwrap_err();
    assert!(matches!(err, PromotionError::HookFailed { tier: Tier::Gpu, .. }), "{}", err);

    assert_eq!(mesh.current_tier(), Tier::Drive);
    assert!(context.resident().is_empty());
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(device.live_bytes(), 0);

    // RAM doesn't need the device
    assert!(mesh.require(Tier::Ram));
    mesh.release(Tier::Ram);
    Ok(())
}

#[test_log::test]
fn streaming_through_the_manager() -> anyhow::Result<()> {
    let dir = data_dir()?;
    let device = Arc::new(HeadlessDevice::new());
    let manager = ResourceManager::new()?;
    let context = context(&dir, &device, Some(manager.clone()))?;

    let quad = context.meshes.get_or_create("meshes/quad.mesh");
    let wall = context.meshes.get_or_create("meshes/wall.mesh");
    quad.load(Tier::Gpu);
    wall.load(Tier::Ram);

    // parsing happens on the loading thread, the owning context only uploads
    context.wait_idle();
    assert_eq!(quad.current_tier(), Tier::Ram);
    assert!(quad.kind().data().is_some());
    let material = context.materials.get("materials/brick.mat").unwrap();
    assert_eq!(material.current_tier(), Tier::Ram);
    assert_eq!(manager.pending_owning(), 1);
    assert_eq!(device.live_allocations(), 0);

    pump(&context);
    assert_eq!(quad.current_tier(), Tier::Gpu);
    assert_eq!(wall.current_tier(), Tier::Ram);
    assert_eq!(device.live_allocations(), 4);
    assert_eq!(device.live_bytes(), QUAD_BYTES);

    quad.unload(Tier::Gpu);
    wall.unload(Tier::Ram);
    pump(&context);

    assert!(context.resident().is_empty());
    assert_eq!(device.live_allocations(), 0);
    assert_eq!(manager.pending_background() + manager.pending_owning(), 0);
    Ok(())
}
