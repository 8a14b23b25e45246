// ── Session stores ──

mod registry;
mod version_cache;

pub use registry::EntityRegistry;
pub use version_cache::VersionCache;
