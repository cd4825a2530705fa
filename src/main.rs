use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use asset_tiers::io::common::loader::RawAssetLoader;
use asset_tiers::io::fs::loader::FsLoader;
use asset_tiers::kinds::context::ResourceContext;
use asset_tiers::kinds::device::HeadlessDevice;
use asset_tiers::resources::manager::ResourceManager;
use asset_tiers::settings::CliArgs;
use clap::Parser;
use itertools::Itertools;
use log::{error, info, warn};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = CliArgs::parse();
    log::trace!("Starting with args: {:?}", args);

    let loader: Arc<dyn RawAssetLoader> = Arc::new(FsLoader::new(&args.data_dir)?);
    let device = Arc::new(HeadlessDevice::new());
    let manager = if args.no_worker {
        None
    } else {
        Some(ResourceManager::new()?)
    };
    let context = ResourceContext::new(loader.clone(), device.clone(), manager);

    let meshes = args
        .meshes
        .iter()
        .filter(|path| {
            let exists = loader.exists(path);
            if !exists {
                warn!("Skipping {}, it doesn't exist in {}", path, args.data_dir);
            }
            exists
        })
        .map(|path| context.meshes.get_or_create(path))
        .collect_vec();

    let now = Instant::now();
    for mesh in &meshes {
        mesh.load(args.tier);
    }
    pump(&context);
    info!("Loading took {}ms", now.elapsed().as_millis());

    let (ready, failed): (Vec<_>, Vec<_>) = meshes.into_iter().partition(|mesh| mesh.is_in_state(args.tier));
    for mesh in &failed {
        error!("{} did not reach {}", mesh.path(), args.tier);
    }
    context.dump_state();
    info!(
        "{} meshes at {}, {} device allocations ({} bytes)",
        ready.len(),
        args.tier,
        device.live_allocations(),
        device.live_bytes()
    );

    for mesh in &ready {
        mesh.unload(args.tier);
    }
    pump(&context);

    let resident = context.resident();
    if !resident.is_empty() {
        for entry in &resident {
            error!("{} is still at {} ({})", entry.path, entry.tier, entry.request_counts);
        }
        bail!("{} resources were not released", resident.len());
    }
    if device.live_allocations() != 0 {
        bail!("{} device allocations leaked", device.live_allocations());
    }

    if !failed.is_empty() {
        bail!("{} of {} meshes failed to load", failed.len(), failed.len() + ready.len());
    }
    Ok(())
}

/// Alternates between waiting for the loading thread and draining the owning queue on this thread
/// until neither has anything left.
fn pump(context: &ResourceContext) {
    loop {
        context.wait_idle();
        let processed = context.process_owning_queue();
        let pending = context
            .manager
            .as_ref()
            .map(|manager| manager.pending_background() + manager.pending_owning())
            .unwrap_or(0);
        if processed == 0 && pending == 0 {
            break;
        }
    }
}
