//! Quantity resolution and caching engine for multifluid simulation
//! snapshot data.
//!
//! Callers request a named physical quantity under a context (snapshot
//! index, species/level fluid pair, sub-array slicing) and receive a
//! concrete array, without knowing which file, byte offset, or derived
//! formula produces it. The crate provides:
//!
//! - a resolution pipeline that tries producer stages in a fixed order —
//!   the raw-file stage first, then registered derived-quantity stages —
//!   until one claims the name;
//! - a bounded LRU pool of memory-mapped file regions, so repeated reads
//!   of the same file region reuse one mapping;
//! - a result cache keyed by variable name and context fingerprint, with
//!   byte- and count-based LRU eviction.
//!
//! Physics formulas, unit tables, and parameter-file parsing live outside
//! this crate; derived producers plug in through the
//! [`DerivedStage`] trait.
//!
//! ```no_run
//! use snapquant::{Fluid, GetVarRequest, SnapConfig, SnapData, SnapMeta};
//! use snapquant::{Dtype, SpeciesInfo};
//!
//! # fn main() -> snapquant::Result<()> {
//! let meta = SnapMeta {
//!     fdir: "/data/run".into(),
//!     snapname: "corona".into(),
//!     shape: [64, 64, 64],
//!     dtype: Dtype::F32,
//!     has_io_dir: true,
//!     with_mhd: true,
//!     aux_vars: vec![],
//!     coords: None,
//! };
//! let species = vec![SpeciesInfo { species: 1, nlevel: 2 }];
//! let mut data = SnapData::open(meta, species, vec![], SnapConfig::default())?;
//! let r = data.get_var("r", &GetVarRequest::new().snap(40).ifluid(Fluid::new(1, 1)))?;
//! assert_eq!(r.shape(), &[64, 64, 64]);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod context;
pub mod docs;
pub mod engine;
pub mod error;
pub mod mmap;
pub mod rawfile;
pub mod resolve;

pub use cache::{CacheStats, ResultCache};
pub use context::{
    AxisSlice, Context, ContextSave, Fingerprint, Fluid, MatchMode, NfluidSlots, SliceSpec,
};
pub use docs::{
    ErrorRing, HiddenError, QuantRecord, QuantTracker, VarDoc, VarDocBuilder, VarDocs,
    VarDocumenter,
};
pub use engine::{AXES, CollEntry, CollKind, SnapConfig, SnapData};
pub use error::{QuantError, Result};
pub use mmap::{
    Dtype, MapMode, MappedRegion, MmapCapacity, MmapKey, MmapPool, MmapPoolStats,
};
pub use rawfile::{
    FileDescriptor, FileGroup, FileLayout, FluidRoster, RawVarInfo, SnapMeta, SpeciesInfo,
};
pub use resolve::{DerivedStage, GetVarRequest, StageOutcome};

/// Array type carried through the pipeline: f64 elements, dynamic
/// dimensionality (3-D for field quantities, 1-D for axis coordinates).
pub type QuantArray = ndarray::ArrayD<f64>;
