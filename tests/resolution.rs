//! End-to-end resolution over on-disk fixtures: raw-file reads, slicing,
//! panic-file variants, axis bypass, and failure purity.

mod common;

use common::{N, grid_block, open_flat, write_f32};
use pretty_assertions::assert_eq;
use rstest::rstest;
use snapquant::{
    AxisSlice, Fluid, GetVarRequest, QuantError, SnapConfig, SnapData, SpeciesInfo,
};

#[test]
fn raw_field_reads_the_first_block() {
    let dir = tempfile::tempdir().unwrap();
    write_f32(dir.path(), "sim_mfr_01_01.snap", &grid_block(0.0));
    let mut data = open_flat(dir.path(), SnapConfig::default());

    let r = data
        .get_var("r", &GetVarRequest::new().snap(0).ifluid(Fluid::new(1, 1)))
        .unwrap();
    assert_eq!(r.shape(), &[N, N, N]);
    // F-order: value at (x, y, z) is x + 4y + 16z
    assert_eq!(r[[0, 0, 0]], 0.0);
    assert_eq!(r[[1, 0, 0]], 1.0);
    assert_eq!(r[[0, 1, 0]], 4.0);
    assert_eq!(r[[0, 0, 1]], 16.0);
    assert_eq!(r[[3, 3, 3]], 63.0);
}

#[test]
fn x_slice_returns_the_sub_block() {
    let dir = tempfile::tempdir().unwrap();
    write_f32(dir.path(), "sim_mfr_01_01.snap", &grid_block(0.0));
    let mut data = open_flat(dir.path(), SnapConfig::default());

    let full = data
        .get_var("r", &GetVarRequest::new().ifluid(Fluid::new(1, 1)))
        .unwrap();
    let sliced = data
        .get_var(
            "r",
            &GetVarRequest::new()
                .ifluid(Fluid::new(1, 1))
                .slice_x(AxisSlice::range(1, 3)),
        )
        .unwrap();
    assert_eq!(sliced.shape(), &[2, N, N]);
    for x in 0..2 {
        for y in 0..N {
            for z in 0..N {
                assert_eq!(sliced[[x, y, z]], full[[x + 1, y, z]]);
            }
        }
    }
}

#[rstest]
#[case(AxisSlice::All, N)]
#[case(AxisSlice::range(0, 1), 1)]
#[case(AxisSlice::range(1, 4), 3)]
fn z_slice_shapes(#[case] slice: AxisSlice, #[case] expected: usize) {
    let dir = tempfile::tempdir().unwrap();
    write_f32(dir.path(), "sim_mfr_01_01.snap", &grid_block(0.0));
    let mut data = open_flat(dir.path(), SnapConfig::default());

    let v = data
        .get_var(
            "r",
            &GetVarRequest::new().ifluid(Fluid::new(1, 1)).slice_z(slice),
        )
        .unwrap();
    assert_eq!(v.shape(), &[N, N, expected]);
}

#[test]
fn momentum_component_offsets_into_the_file() {
    let dir = tempfile::tempdir().unwrap();
    // one file holding px, py, pz blocks back to back
    let mut values = grid_block(100.0);
    values.extend(grid_block(200.0));
    values.extend(grid_block(300.0));
    write_f32(dir.path(), "sim_mfp_01_01.snap", &values);
    let mut data = open_flat(dir.path(), SnapConfig::default());

    let req = GetVarRequest::new().ifluid(Fluid::new(1, 1));
    assert_eq!(data.get_var("px", &req).unwrap()[[0, 0, 0]], 100.0);
    assert_eq!(data.get_var("py", &req).unwrap()[[0, 0, 0]], 200.0);
    assert_eq!(data.get_var("pz", &req).unwrap()[[0, 0, 0]], 300.0);
}

#[test]
fn panic_variant_reads_the_panic_file() {
    let dir = tempfile::tempdir().unwrap();
    write_f32(dir.path(), "sim_mfr_01_01.snap", &grid_block(0.0));
    write_f32(dir.path(), "sim_mfr_01_01.panic", &grid_block(1000.0));
    let mut data = open_flat(dir.path(), SnapConfig::default());

    let mut req = GetVarRequest::new().ifluid(Fluid::new(1, 1));
    req.panic = true;
    let r = data.get_var("r", &req).unwrap();
    assert_eq!(r[[0, 0, 0]], 1000.0);
}

#[test]
fn positive_snap_selects_the_numbered_file() {
    let dir = tempfile::tempdir().unwrap();
    write_f32(dir.path(), "sim_mfr_01_01_007.snap", &grid_block(7.0));
    let mut data = open_flat(dir.path(), SnapConfig::default());

    let r = data
        .get_var("r", &GetVarRequest::new().snap(7).ifluid(Fluid::new(1, 1)))
        .unwrap();
    assert_eq!(r[[0, 0, 0]], 7.0);
}

#[test]
fn axis_names_bypass_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = open_flat(dir.path(), SnapConfig::default());

    let x = data.get("x").unwrap();
    assert_eq!(x.shape(), &[N]);
    assert_eq!(x[[0]], 0.0);
    assert_eq!(x[[3]], 3.0);
    // no file was touched and nothing was cached
    assert_eq!(data.pool_stats().opens, 0);
    assert_eq!(data.cache_len(), 0);
}

#[test]
fn empty_name_short_circuits_into_documentation() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = open_flat(dir.path(), SnapConfig::default());

    match data.get("") {
        Err(QuantError::EmptyVariableName) => {}
        other => panic!("expected EmptyVariableName, got {other:?}"),
    }
    assert_eq!(data.cache_len(), 0);
    let docs = data.vardocs();
    assert!(docs.contains("SIMPLE_VARS"));
    assert!(docs.contains("mass density"));
}

#[test]
fn unknown_variable_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    write_f32(dir.path(), "sim_mfr_01_01.snap", &grid_block(0.0));
    let mut data = open_flat(dir.path(), SnapConfig::default());
    data.set_ifluid(Fluid::new(1, 1)).unwrap();

    match data.get("nonesuch") {
        Err(QuantError::UnknownVariable(name)) => assert_eq!(name, "nonesuch"),
        other => panic!("expected UnknownVariable, got {other:?}"),
    }
    assert_eq!(data.cache_len(), 0);
    assert_eq!(data.pool_len(), 0);
    assert_eq!(data.pool_stats().opens, 0);
}

#[test]
fn missing_fluid_probe_is_recorded_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    write_f32(dir.path(), "sim_mfr_01_01.snap", &grid_block(0.0));
    let mut data = open_flat(dir.path(), SnapConfig::default());

    // "r" needs an ifluid; with none selected the probe is recorded and
    // resolution falls through to UnknownVariable
    match data.get("r") {
        Err(QuantError::UnknownVariable(_)) => {}
        other => panic!("expected UnknownVariable, got {other:?}"),
    }
    assert_eq!(data.hidden_errors().len(), 1);
}

#[test]
fn missing_file_propagates_file_access() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = open_flat(dir.path(), SnapConfig::default());

    let req = GetVarRequest::new().ifluid(Fluid::new(1, 1));
    match data.get_var("r", &req) {
        Err(QuantError::FileAccess { path, .. }) => {
            assert!(path.to_string_lossy().ends_with("sim_mfr_01_01.snap"));
        }
        other => panic!("expected FileAccess, got {other:?}"),
    }
}

#[test]
fn invalid_roster_aborts_construction() {
    let dir = tempfile::tempdir().unwrap();
    let meta = common::meta_flat(dir.path());
    let bad = vec![SpeciesInfo {
        species: 1,
        nlevel: 0,
    }];
    match SnapData::open(meta, bad, vec![], SnapConfig::default()) {
        Err(QuantError::ContextInconsistent { .. }) => {}
        other => panic!("expected ContextInconsistent, got {:?}", other.err()),
    }
}

#[test]
fn tracker_names_the_raw_file_producer() {
    let dir = tempfile::tempdir().unwrap();
    write_f32(dir.path(), "sim_mfr_01_01.snap", &grid_block(0.0));
    let mut data = open_flat(dir.path(), SnapConfig::default());

    data.get_var("r", &GetVarRequest::new().ifluid(Fluid::new(1, 1)))
        .unwrap();
    let record = data.tracker().last_top_level().unwrap();
    assert_eq!(record.var, "r");
    assert_eq!(record.producer, "raw_file");
}
