//! The concrete resource kinds: images, textures uploading them, materials referencing textures
//! and meshes referencing materials. Contrasting to the core in [`crate::resources`], these know
//! what their bytes mean.
use crate::resources::registry::{normalize_path, path_to_key};
use std::path::Path;

pub mod context;
pub mod device;
pub mod image;
pub mod material;
pub mod mesh;
pub mod texture;

/// Resolves a path written inside the asset `owner` against the directory `owner` lives in.
/// Absolute references are kept as they are.
pub fn resolve_relative(owner: &str, reference: &str) -> String {
    let base = Path::new(owner).parent().unwrap_or_else(|| Path::new(""));
    path_to_key(&normalize_path(&base.join(reference.replace('\\', "/"))))
}
