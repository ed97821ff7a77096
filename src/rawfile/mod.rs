//! Raw-file stage: locating simple (file-resident) variables.
//!
//! A simple variable is read directly from a snapshot output file. The
//! classification table maps each recognized name to its file group and
//! ordinal index within the group; from those, the selected fluid, the
//! snapshot's on-disk string and the panic flag, the stage computes a
//! (path, offset, shape, dtype) descriptor deterministically, acquires the
//! mapping from the pool, and slices the decoded array with the active
//! sub-array ranges.
//!
//! The table is rebuilt whenever the snapshot's declared file layout
//! changes; parameter-file parsing itself happens outside this crate.

use std::path::PathBuf;

use ndarray::{Axis, Slice};
use rustc_hash::FxHashMap;
use smallvec::smallvec;

use crate::QuantArray;
use crate::context::{Context, Fluid, SliceSpec};
use crate::error::{QuantError, Result};
use crate::mmap::{Dtype, MapMode, MmapKey, MmapPool};
use crate::resolve::StageOutcome;

/// One species row of the fluid roster: a species identifier and how many
/// ionization levels it carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpeciesInfo {
    /// Species identifier (positive)
    pub species: i32,
    /// Number of ionization levels (1-based levels `1..=nlevel`)
    pub nlevel: i32,
}

/// The set of species/level pairs present in a dataset, in packing order.
///
/// The roster's row order is the species-major global order used by
/// pair-packed files.
#[derive(Clone, Debug)]
pub struct FluidRoster {
    species: Vec<SpeciesInfo>,
}

impl FluidRoster {
    /// Build a roster, validating it structurally. Invalid rows are fatal:
    /// construction of the data handle must abort.
    pub fn new(species: Vec<SpeciesInfo>) -> Result<Self> {
        if species.is_empty() {
            return Err(QuantError::inconsistent(
                "species roster",
                "no species declared",
            ));
        }
        for row in &species {
            if row.species <= 0 {
                return Err(QuantError::inconsistent(
                    format!("species {}", row.species),
                    "species identifiers must be positive",
                ));
            }
            if row.nlevel < 1 {
                return Err(QuantError::inconsistent(
                    format!("species {}", row.species),
                    "a species needs at least one level",
                ));
            }
        }
        let mut ids: Vec<i32> = species.iter().map(|r| r.species).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != species.len() {
            return Err(QuantError::inconsistent(
                "species roster",
                "duplicate species identifiers",
            ));
        }
        Ok(FluidRoster { species })
    }

    /// Number of species.
    pub fn nspecies(&self) -> usize {
        self.species.len()
    }

    /// Total number of (species, level) pairs across all species.
    pub fn total_levels(&self) -> usize {
        self.species.iter().map(|r| r.nlevel as usize).sum()
    }

    /// Whether a (non-electron) fluid selector names a pair in the roster.
    pub fn contains(&self, fluid: Fluid) -> bool {
        self.species
            .iter()
            .any(|r| r.species == fluid.species && fluid.level >= 1 && fluid.level <= r.nlevel)
    }

    /// Ordinal of `fluid` in the species-major packing order: the count of
    /// (species, level) pairs strictly preceding it.
    pub fn pair_ordinal(&self, fluid: Fluid) -> usize {
        let mut ordinal = 0;
        for row in &self.species {
            for level in 1..=row.nlevel {
                if row.species < fluid.species
                    || (row.species == fluid.species && level < fluid.level)
                {
                    ordinal += 1;
                }
            }
        }
        ordinal
    }
}

/// Logical file group a simple variable belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileGroup {
    /// Fields shared across fluids (magnetic field), in the common file.
    Common,
    /// Per-fluid mass density.
    FluidMass,
    /// Per-fluid momentum density components.
    FluidMomentum,
    /// Per-fluid energy density. Redirects to [`FileGroup::Electron`] when
    /// the selected fluid is the electron pseudo-fluid.
    FluidEnergy,
    /// Electron energy density, in its own file.
    Electron,
    /// Auxiliary fields shared across fluids.
    CommonAux,
    /// Per-fluid auxiliary fields.
    FluidAux,
    /// Two-fluid auxiliary fields, packed with every (species, level) pair
    /// interleaved in species-major order.
    PairPacked,
}

impl FileGroup {
    fn is_aux(&self) -> bool {
        matches!(
            self,
            FileGroup::CommonAux | FileGroup::FluidAux | FileGroup::PairPacked
        )
    }

    fn needs_ifluid(&self) -> bool {
        matches!(
            self,
            FileGroup::FluidMass
                | FileGroup::FluidMomentum
                | FileGroup::FluidEnergy
                | FileGroup::FluidAux
                | FileGroup::PairPacked
        )
    }

    fn tag(&self) -> &'static str {
        match self {
            FileGroup::Common | FileGroup::CommonAux => "mf_common",
            FileGroup::FluidMass => "mfr",
            FileGroup::FluidMomentum => "mfp",
            FileGroup::FluidEnergy => "mfe",
            FileGroup::Electron => "mf_e",
            FileGroup::FluidAux => "mfa",
            FileGroup::PairPacked => "mm",
        }
    }
}

/// Classification entry: which group a variable lives in and its ordinal
/// position within that group's file.
#[derive(Clone, Copy, Debug)]
pub struct RawVarInfo {
    /// File group
    pub group: FileGroup,
    /// Ordinal index of the variable within the group
    pub index: usize,
}

/// Static description of a snapshot dataset, supplied by the surrounding
/// file-layout discovery logic.
#[derive(Clone, Debug)]
pub struct SnapMeta {
    /// Directory holding the snapshot files
    pub fdir: PathBuf,
    /// Snapshot base name
    pub snapname: String,
    /// Grid shape (nx, ny, nz)
    pub shape: [usize; 3],
    /// On-disk element type
    pub dtype: Dtype,
    /// Whether files live under a `<snapname>.io` tree (else flat in fdir)
    pub has_io_dir: bool,
    /// Whether magnetic-field files are present
    pub with_mhd: bool,
    /// Declared auxiliary variable names, in file order
    pub aux_vars: Vec<String>,
    /// Axis coordinate arrays; index coordinates are generated when absent
    pub coords: Option<[Vec<f64>; 3]>,
}

/// Fully resolved location of a simple variable's data block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDescriptor {
    /// File holding the block
    pub path: PathBuf,
    /// Byte offset of the block
    pub offset: u64,
    /// Block shape (the full grid)
    pub shape: [usize; 3],
    /// Element type
    pub dtype: Dtype,
}

/// The classification table for one snapshot file layout.
pub struct FileLayout {
    table: FxHashMap<String, RawVarInfo>,
}

impl FileLayout {
    /// Build the table from the dataset description. Snap-file members are
    /// fixed; auxiliary names classify by prefix (`mm_` pair-packed, `mf`
    /// per-fluid, anything else common), each indexed within its own group.
    pub fn discover(meta: &SnapMeta) -> Self {
        let mut table = FxHashMap::default();
        let mut put = |name: &str, group: FileGroup, index: usize| {
            table.insert(name.to_string(), RawVarInfo { group, index });
        };

        if meta.with_mhd {
            for (i, name) in ["bx", "by", "bz"].iter().enumerate() {
                put(name, FileGroup::Common, i);
            }
        }
        put("r", FileGroup::FluidMass, 0);
        for (i, name) in ["px", "py", "pz"].iter().enumerate() {
            put(name, FileGroup::FluidMomentum, i);
        }
        put("e", FileGroup::FluidEnergy, 0);

        let mut n_common = 0;
        let mut n_fluid = 0;
        let mut n_pair = 0;
        for name in &meta.aux_vars {
            if name.starts_with("mm_") {
                put(name, FileGroup::PairPacked, n_pair);
                n_pair += 1;
            } else if name.starts_with("mf") {
                put(name, FileGroup::FluidAux, n_fluid);
                n_fluid += 1;
            } else {
                put(name, FileGroup::CommonAux, n_common);
                n_common += 1;
            }
        }

        FileLayout { table }
    }

    /// Look up a name in the classification table.
    pub fn classify(&self, var: &str) -> Option<RawVarInfo> {
        self.table.get(var).copied()
    }

    /// Whether a name is a simple (file-resident) variable.
    pub fn is_simple(&self, var: &str) -> bool {
        self.table.contains_key(var)
    }

    /// All simple variable names in this layout.
    pub fn simple_vars(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    /// Compute the file descriptor for a classified variable under the
    /// given context. Structural fluid problems surface as
    /// `ContextInconsistent`.
    pub fn locate(
        &self,
        var: &str,
        info: RawVarInfo,
        ctx: &Context,
        meta: &SnapMeta,
        roster: &FluidRoster,
    ) -> Result<FileDescriptor> {
        let mut group = info.group;

        let ifluid = if group.needs_ifluid() {
            let fluid = ctx.ifluid.ok_or_else(|| {
                QuantError::inconsistent(format!("variable '{var}'"), "no ifluid selected")
            })?;
            if fluid.is_electron() {
                if group == FileGroup::FluidEnergy {
                    group = FileGroup::Electron;
                } else {
                    return Err(QuantError::inconsistent(
                        format!("variable '{var}'"),
                        format!("fluid {fluid} is negative but a positive species is required"),
                    ));
                }
            } else if !roster.contains(fluid) {
                return Err(QuantError::inconsistent(
                    format!("fluid {fluid}"),
                    "not in the species roster",
                ));
            }
            Some(fluid)
        } else {
            None
        };

        let [nx, ny, nz] = meta.shape;
        let block = nx * ny * nz;
        let dsize = meta.dtype.size();

        let arr_size = if group == FileGroup::PairPacked {
            roster.total_levels()
        } else {
            1
        };
        let mut offset = (block * info.index * dsize * arr_size) as u64;
        if group == FileGroup::PairPacked {
            let jfluid = ctx.jfluid.ok_or_else(|| {
                QuantError::inconsistent(format!("variable '{var}'"), "no jfluid selected")
            })?;
            if jfluid.is_electron() || !roster.contains(jfluid) {
                return Err(QuantError::inconsistent(
                    format!("fluid {jfluid}"),
                    "not a valid second fluid for a pair-packed variable",
                ));
            }
            offset += (roster.pair_ordinal(jfluid) * block * dsize) as u64;
        }

        Ok(FileDescriptor {
            path: group_path(group, ifluid, ctx, meta),
            offset,
            shape: meta.shape,
            dtype: meta.dtype,
        })
    }
}

/// Assemble the file path for a group under the active context: directory
/// tree (when the dataset uses an `.io` layout), zero-padded species/level,
/// the snapshot's on-disk string, and the panic/scratch suffix.
fn group_path(group: FileGroup, ifluid: Option<Fluid>, ctx: &Context, meta: &SnapMeta) -> PathBuf {
    let fluid_dir = ifluid
        .filter(|f| !f.is_electron())
        .map(|f| format!("mf_{:02}_{:02}", f.species, f.level));

    let stem_tag = match (group, ifluid) {
        (FileGroup::Common | FileGroup::CommonAux | FileGroup::Electron, _) => {
            group.tag().to_string()
        }
        (_, Some(f)) if !f.is_electron() => {
            format!("{}_{:02}_{:02}", group.tag(), f.species, f.level)
        }
        _ => group.tag().to_string(),
    };

    let mut name = format!("{}_{}", meta.snapname, stem_tag);
    if ctx.panic {
        name.push_str(if group.is_aux() { ".aux.panic" } else { ".panic" });
    } else {
        if ctx.snap > 0 {
            name.push_str(&format!("_{:03}", ctx.snap));
        }
        name.push_str(if group.is_aux() { ".aux" } else { ".snap" });
        if ctx.snap < 0 {
            name.push_str(".scr");
        }
    }

    let mut path = meta.fdir.clone();
    if meta.has_io_dir {
        path.push(format!("{}.io", meta.snapname));
        match group {
            FileGroup::Common | FileGroup::CommonAux => path.push("mf_common"),
            FileGroup::Electron => path.push("mf_e"),
            _ => {
                if let Some(dir) = &fluid_dir {
                    path.push(dir);
                    path.push(group.tag());
                }
            }
        }
    }
    path.push(name);
    path
}

/// Try to read `var` as a simple variable: classify, locate, map, decode,
/// slice. A name absent from the table is not an error here; it means a
/// later producer stage may still claim it.
pub(crate) fn fetch_raw(
    layout: &FileLayout,
    meta: &SnapMeta,
    roster: &FluidRoster,
    pool: &mut MmapPool,
    ctx: &Context,
    var: &str,
) -> Result<StageOutcome> {
    let Some(info) = layout.classify(var) else {
        return Ok(StageOutcome::NotApplicable);
    };
    let desc = layout.locate(var, info, ctx, meta, roster)?;
    let key = MmapKey {
        path: desc.path,
        offset: desc.offset,
        shape: smallvec![desc.shape[0], desc.shape[1], desc.shape[2]],
        dtype: desc.dtype,
        mode: MapMode::Read,
    };
    let region = pool.acquire(&key, true)?;
    let full = region.to_array()?;
    Ok(StageOutcome::Produced(apply_slice(full, &ctx.slice)))
}

/// Apply the active sub-array slicing to a 3-D quantity. Identity slices
/// and non-3-D values pass through unchanged.
pub(crate) fn apply_slice(arr: QuantArray, spec: &SliceSpec) -> QuantArray {
    if spec.is_identity() || arr.ndim() != 3 {
        return arr;
    }
    let (nx, ny, nz) = (arr.shape()[0], arr.shape()[1], arr.shape()[2]);
    let mut view = arr.view();
    view.slice_axis_inplace(Axis(0), Slice::from(spec.x.resolve(nx)));
    view.slice_axis_inplace(Axis(1), Slice::from(spec.y.resolve(ny)));
    view.slice_axis_inplace(Axis(2), Slice::from(spec.z.resolve(nz)));
    view.to_owned()
}
