use crate::resources::registry::canonicalize_path;

pub trait RawAssetLoader: Send + Sync {
    /// Reads the whole asset. In case of a caching implementation, this may need to clone the whole buffer!
    fn load_raw_owned(&self, path: &str) -> anyhow::Result<Vec<u8>>;

    /// Whether the asset exists on the backing storage, i.e. could reach the Drive tier.
    fn exists(&self, path: &str) -> bool;

    /// The key registries dedupe on. Has to be stable for every spelling of the same asset.
    fn canonicalize(&self, path: &str) -> String {
        canonicalize_path(path)
    }
}
