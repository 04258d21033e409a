//! Slab cache for sub-page PDs.
//!
//! This module packs PDs smaller than a page into shared backing pages, one
//! slab per page, with per size class partial and full lists.

pub mod bitmap;
pub mod mem_tree;
pub mod pd_cache;
pub mod pd_slab;
pub mod slab_list;

// Re-export public types
pub use pd_cache::{ClassSnapshot, PdCache, PdCacheSnapshot, PdCacheStats};
pub use pd_slab::{PdSlab, PdSlabState};
