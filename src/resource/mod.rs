//! Resource Manager (L2): a process-wide, reference-counted cache of
//! named assets with asynchronous loading, quality-level refinement, and
//! reload propagation.

pub mod handle;
pub mod manager;

pub use handle::ResourceHandle;
pub use manager::{
    AcquireMode, LoadedContent, LoadingState, MemoryUsage, ResourceFlags, ResourceLoader, ResourceManager,
    ResourceManagerConfig, ResourcePriority,
};
