use crate::resources::tier::Tier;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "asset-tiers")]
#[command(version)]
#[command(about = "Streams meshes (and their materials and textures) through the RAM and GPU tiers")]
pub struct CliArgs {
    #[arg(long, env = "ASSET_TIERS_DATA_DIR", default_value_t = default_data_dir())]
    pub data_dir: String,

    /// The tier every mesh is loaded to: drive, ram or gpu.
    #[arg(long, env = "ASSET_TIERS_TIER", default_value = "gpu")]
    pub tier: Tier,

    /// Don't start the loading thread, run every transition synchronously instead.
    #[arg(long)]
    pub no_worker: bool,

    /// Mesh manifests, relative to the data dir.
    #[arg(required = true)]
    pub meshes: Vec<String>,
}

pub fn default_data_dir() -> String {
    std::env::current_dir()
        .map(|dir| dir.join("_data"))
        .unwrap_or_else(|_| "_data".into())
        .to_string_lossy()
        .to_string()
}
