//! Shared on-disk fixtures for the integration tests.
//!
//! Datasets use the flat file layout with a 4x4x4 grid; values are written
//! column-major (first axis fastest), matching the on-disk convention.

use std::io::Write;
use std::path::Path;

use snapquant::{Dtype, SnapConfig, SnapData, SnapMeta, SpeciesInfo};

pub const N: usize = 4;

/// Write little-endian f32 values to `name` under `dir`.
pub fn write_f32(dir: &Path, name: &str, values: &[f32]) {
    let mut f = std::fs::File::create(dir.join(name)).unwrap();
    for v in values {
        f.write_all(&v.to_le_bytes()).unwrap();
    }
}

/// A full 4x4x4 block whose F-order value at (x, y, z) is
/// `x + 4*y + 16*z + base`.
pub fn grid_block(base: f32) -> Vec<f32> {
    (0..N * N * N).map(|i| base + i as f32).collect()
}

/// Dataset description for a flat-layout fixture named "sim".
pub fn meta_flat(dir: &Path) -> SnapMeta {
    SnapMeta {
        fdir: dir.to_path_buf(),
        snapname: "sim".into(),
        shape: [N, N, N],
        dtype: Dtype::F32,
        has_io_dir: false,
        with_mhd: false,
        aux_vars: vec![],
        coords: None,
    }
}

/// One species with two ionization levels.
pub fn species_1x2() -> Vec<SpeciesInfo> {
    vec![SpeciesInfo {
        species: 1,
        nlevel: 2,
    }]
}

/// Open a handle over the flat fixture with the given configuration.
pub fn open_flat(dir: &Path, config: SnapConfig) -> SnapData {
    SnapData::open(meta_flat(dir), species_1x2(), vec![], config).unwrap()
}
