//! The owning data handle: configuration, context state, resource pools,
//! and the resolution pipeline entry point.
//!
//! One [`SnapData`] owns everything a resolution touches — the memmap
//! pool, the result cache, the classification table, the producer stages —
//! and mutates it only through its own methods. The design is
//! single-threaded: no operation suspends, and nested resolutions
//! temporarily override shared fluid-selector state under scoped
//! save/restore.

use std::sync::Arc;

use ndarray::Array1;
use rustc_hash::FxHashMap;

use crate::QuantArray;
use crate::cache::{CacheStats, ResultCache};
use crate::context::{Context, Fingerprint, Fluid, NfluidSlots};
use crate::docs::{ErrorRing, QuantRecord, QuantTracker, VarDocBuilder, VarDocs};
use crate::error::{QuantError, Result};
use crate::mmap::{MmapCapacity, MmapPool, MmapPoolStats};
use crate::rawfile::{self, FileLayout, FluidRoster, SnapMeta, SpeciesInfo};
use crate::resolve::{DerivedStage, GetVarRequest, StageOutcome};

/// Axis coordinate names. These bypass the resolution pipeline entirely.
pub const AXES: [&str; 3] = ["x", "y", "z"];

/// Collision type declared between two species.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollKind {
    /// Coulomb collisions
    Coulomb,
    /// Elastic collisions
    Elastic,
    /// Maxwell collisions
    Maxwell,
}

/// One row of the collision-key table: species pair plus collision type.
#[derive(Clone, Copy, Debug)]
pub struct CollEntry {
    /// First species
    pub i: i32,
    /// Second species
    pub j: i32,
    /// Declared collision type
    pub kind: CollKind,
}

/// Constructor-time configuration.
#[derive(Clone, Debug)]
pub struct SnapConfig {
    /// Memmap pool capacity policy.
    pub mmap_capacity: MmapCapacity,
    /// Keep pooled mappings alive across snapshot changes.
    pub persist_mmaps_across_snap: bool,
    /// Whether the result cache starts enabled.
    pub cache_enabled: bool,
    /// Result cache byte budget, in MB.
    pub cache_max_mb: f64,
    /// Result cache entry-count budget.
    pub cache_max_entries: usize,
    /// Skip eager preloading of simple variables on snapshot load.
    pub fast: bool,
    /// Capacity of the hidden-error ring.
    pub hidden_errors_cap: usize,
}

impl Default for SnapConfig {
    fn default() -> Self {
        SnapConfig {
            mmap_capacity: MmapCapacity::Bounded(200),
            persist_mmaps_across_snap: false,
            cache_enabled: true,
            cache_max_mb: 10.0,
            cache_max_entries: 20,
            fast: true,
            hidden_errors_cap: 100,
        }
    }
}

/// Handle to one multifluid snapshot dataset.
pub struct SnapData {
    config: SnapConfig,
    meta: SnapMeta,
    roster: FluidRoster,
    layout: FileLayout,
    coll_keys: FxHashMap<(i32, i32), Vec<CollKind>>,
    coords: [Arc<QuantArray>; 3],
    ctx: Context,
    pool: MmapPool,
    cache: ResultCache,
    stages: Vec<Arc<dyn DerivedStage>>,
    docs: VarDocs,
    docs_built: bool,
    tracker: QuantTracker,
    hidden: ErrorRing,
    preloaded: FxHashMap<String, Arc<QuantArray>>,
    preloaded_fp: Option<Fingerprint>,
}

impl SnapData {
    /// Open a dataset handle. Roster and metadata validation failures here
    /// are fatal: an invalid species table must abort construction.
    pub fn open(
        meta: SnapMeta,
        species: Vec<SpeciesInfo>,
        coll_entries: Vec<CollEntry>,
        config: SnapConfig,
    ) -> Result<Self> {
        let roster = FluidRoster::new(species)?;
        let coords = build_coords(&meta)?;
        let layout = FileLayout::discover(&meta);
        let cache = if config.cache_enabled {
            ResultCache::new(config.cache_max_mb, config.cache_max_entries)
        } else {
            ResultCache::disabled()
        };

        // collision keys stay exactly as declared: no mirroring of (i, j)
        // onto (j, i)
        let mut coll_keys: FxHashMap<(i32, i32), Vec<CollKind>> = FxHashMap::default();
        for entry in coll_entries {
            coll_keys.entry((entry.i, entry.j)).or_default().push(entry.kind);
        }

        let mut data = SnapData {
            pool: MmapPool::new(config.mmap_capacity),
            cache,
            hidden: ErrorRing::new(config.hidden_errors_cap),
            config,
            meta,
            roster,
            layout,
            coll_keys,
            coords,
            ctx: Context::default(),
            stages: Vec::new(),
            docs: VarDocs::default(),
            docs_built: false,
            tracker: QuantTracker::new(),
            preloaded: FxHashMap::default(),
            preloaded_fp: None,
        };
        if !data.config.fast {
            data.preload_simple_vars();
        }
        Ok(data)
    }

    // ------------------------------------------------------------------
    // context state
    // ------------------------------------------------------------------

    /// The live context.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Static dataset description.
    pub fn meta(&self) -> &SnapMeta {
        &self.meta
    }

    /// The species roster.
    pub fn roster(&self) -> &FluidRoster {
        &self.roster
    }

    /// The raw-file classification table for the current layout.
    pub fn layout(&self) -> &FileLayout {
        &self.layout
    }

    /// Collision types declared for a species pair, in declaration order.
    /// The table is asymmetric: (i, j) says nothing about (j, i).
    pub fn coll_keys(&self, i: i32, j: i32) -> &[CollKind] {
        self.coll_keys.get(&(i, j)).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Select the active snapshot. Unless configured to persist, pooled
    /// mappings are dropped, and the classification table is rebuilt.
    pub fn set_snap(&mut self, snap: i32) {
        if self.ctx.snap == snap && self.ctx.snaps.is_none() {
            return;
        }
        self.ctx.snap = snap;
        self.ctx.snaps = None;
        self.after_snap_change();
    }

    /// Load a snapshot array and select one element of it.
    pub fn set_snaps(&mut self, snaps: Vec<i32>, index: usize) -> Result<()> {
        let snap = *snaps.get(index).ok_or_else(|| {
            QuantError::inconsistent(
                "snapshot selection",
                format!("index {index} out of range for {} snapshots", snaps.len()),
            )
        })?;
        self.ctx.snap = snap;
        self.ctx.snaps = Some(snaps);
        self.after_snap_change();
        Ok(())
    }

    fn after_snap_change(&mut self) {
        if !self.config.persist_mmaps_across_snap {
            self.pool.invalidate_all();
        }
        self.layout = FileLayout::discover(&self.meta);
        self.preloaded.clear();
        self.preloaded_fp = None;
        if !self.config.fast {
            self.preload_simple_vars();
        }
    }

    /// Set the default primary fluid selector.
    pub fn set_ifluid(&mut self, fluid: Fluid) -> Result<()> {
        self.validate_fluid(fluid)?;
        self.ctx.ifluid = Some(fluid);
        Ok(())
    }

    /// Set the default secondary fluid selector.
    pub fn set_jfluid(&mut self, fluid: Fluid) -> Result<()> {
        self.validate_fluid(fluid)?;
        self.ctx.jfluid = Some(fluid);
        Ok(())
    }

    /// Set both fluid selectors.
    pub fn set_fluids(&mut self, ifluid: Fluid, jfluid: Fluid) -> Result<()> {
        self.set_ifluid(ifluid)?;
        self.set_jfluid(jfluid)
    }

    fn validate_fluid(&self, fluid: Fluid) -> Result<()> {
        if fluid.is_electron() || self.roster.contains(fluid) {
            Ok(())
        } else {
            Err(QuantError::inconsistent(
                format!("fluid {fluid}"),
                "not in the species roster",
            ))
        }
    }

    /// Run `f` with temporarily overridden fluid selectors, restoring the
    /// previous selection on every exit path.
    pub fn with_fluids<T>(
        &mut self,
        ifluid: Option<Fluid>,
        jfluid: Option<Fluid>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = self.ctx.save();
        if let Some(fluid) = ifluid {
            if let Err(e) = self.set_ifluid(fluid) {
                self.ctx.restore(saved);
                return Err(e);
            }
        }
        if let Some(fluid) = jfluid {
            if let Err(e) = self.set_jfluid(fluid) {
                self.ctx.restore(saved);
                return Err(e);
            }
        }
        let out = f(self);
        self.ctx.restore(saved);
        out
    }

    /// Whether quantities should match the physical answer.
    pub fn match_physics(&self) -> bool {
        self.ctx.match_mode == crate::context::MatchMode::Physics
    }

    /// Whether quantities should match the aux-file data.
    pub fn match_aux(&self) -> bool {
        self.ctx.match_mode == crate::context::MatchMode::Aux
    }

    /// One-line summary of the active selection.
    pub fn quick_look(&self) -> String {
        let fluid = |f: Option<Fluid>| match f {
            Some(f) => f.to_string(),
            None => "(not set)".to_string(),
        };
        let mut s = format!(
            "ifluid={}, jfluid={}, snap={}",
            fluid(self.ctx.ifluid),
            fluid(self.ctx.jfluid),
            self.ctx.snap
        );
        if let Some(snaps) = &self.ctx.snaps {
            s.push_str(&format!(", snaps=<{} loaded>", snaps.len()));
        }
        s
    }

    // ------------------------------------------------------------------
    // stages, caching, diagnostics
    // ------------------------------------------------------------------

    /// Register a derived-quantity producer. Stages run in registration
    /// order; order is part of the contract, since two stages may claim
    /// the same name with different precedence.
    pub fn register_stage(&mut self, stage: Arc<dyn DerivedStage>) {
        self.stages.push(stage);
        self.docs = VarDocs::default();
        self.docs_built = false;
    }

    /// Turn result caching on or off. Turning it off drops every entry;
    /// re-enabling starts empty.
    pub fn set_caching(&mut self, enabled: bool) {
        match (enabled, self.cache.is_disabled()) {
            (true, true) => {
                self.cache =
                    ResultCache::new(self.config.cache_max_mb, self.config.cache_max_entries);
            }
            (false, false) => {
                self.cache = ResultCache::disabled();
                log::debug!("result caching disabled; entries dropped");
            }
            _ => {}
        }
    }

    /// Whether result caching is currently enabled.
    pub fn caching_enabled(&self) -> bool {
        !self.cache.is_disabled()
    }

    /// Result cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of resident result-cache entries.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Memmap pool counters.
    pub fn pool_stats(&self) -> MmapPoolStats {
        self.pool.stats()
    }

    /// Number of live pooled mappings.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Recoverable errors recorded during exploratory access.
    pub fn hidden_errors(&self) -> &ErrorRing {
        &self.hidden
    }

    /// Producer tracking for the most recent resolutions.
    pub fn tracker(&self) -> &QuantTracker {
        &self.tracker
    }

    /// Render the documentation registry, building it on first use.
    pub fn vardocs(&mut self) -> String {
        self.ensure_vardict();
        self.docs.render()
    }

    // ------------------------------------------------------------------
    // resolution
    // ------------------------------------------------------------------

    /// Resolve a variable under the handle's current defaults.
    pub fn get(&mut self, var: &str) -> Result<Arc<QuantArray>> {
        self.get_var(var, &GetVarRequest::default())
    }

    /// Resolve a variable, layering the request's overrides onto the
    /// handle's defaults first.
    ///
    /// The empty name is reserved: it triggers the documentation pass and
    /// fails with [`QuantError::EmptyVariableName`] without touching the
    /// caches. Axis names return the precomputed coordinate arrays
    /// directly.
    pub fn get_var(&mut self, var: &str, req: &GetVarRequest) -> Result<Arc<QuantArray>> {
        if var.is_empty() {
            self.ensure_vardict();
            return Err(QuantError::EmptyVariableName);
        }
        if let Some(axis) = AXES.iter().position(|a| *a == var) {
            return Ok(self.coords[axis].clone());
        }

        // apply the request to shared state, once per request
        if let Some(mode) = req.match_mode {
            self.ctx.match_mode = mode;
        }
        if let Some(fluid) = req.ifluid {
            self.set_ifluid(fluid)?;
        }
        if let Some(fluid) = req.jfluid {
            self.set_jfluid(fluid)?;
        }
        if let Some(snap) = req.snap {
            if snap != self.ctx.snap || self.ctx.snaps.is_some() {
                self.set_snap(snap);
            }
        }
        self.ctx.panic = req.panic;
        if let Some(slice) = req.slice_x {
            self.ctx.slice.x = slice;
        }
        if let Some(slice) = req.slice_y {
            self.ctx.slice.y = slice;
        }
        if let Some(slice) = req.slice_z {
            self.ctx.slice.z = slice;
        }

        let value = self.load_quantity(var, req)?;
        Ok(self.postprocess(value))
    }

    /// Resolve `var` only if it appears in the snapshot's declared aux
    /// variables; `Ok(None)` otherwise.
    pub fn get_var_if_in_aux(
        &mut self,
        var: &str,
        req: &GetVarRequest,
    ) -> Result<Option<Arc<QuantArray>>> {
        if self.meta.aux_vars.iter().any(|v| v == var) {
            self.get_var(var, req).map(Some)
        } else {
            Ok(None)
        }
    }

    fn load_quantity(&mut self, var: &str, req: &GetVarRequest) -> Result<Arc<QuantArray>> {
        let saved = self.ctx.save();
        self.tracker.enter();
        let out = self.load_quantity_inner(var, req);
        self.tracker.exit();
        self.ctx.restore(saved);
        out
    }

    fn load_quantity_inner(&mut self, var: &str, req: &GetVarRequest) -> Result<Arc<QuantArray>> {
        if req.check_cache {
            let live = self.ctx.clone();
            if let Some(value) = self.cache.get_where(var, |fp| fp.matches_exactly(&live)) {
                log::debug!("cache hit for '{var}'");
                return Ok(value);
            }
        }

        if let Some(fp) = &self.preloaded_fp {
            if fp.matches_fluid_agnostic(&self.ctx) {
                if let Some(value) = self.preloaded.get(var) {
                    return Ok(value.clone());
                }
            }
        }

        let value = self.run_stages(var)?;

        if req.writes_cache() {
            let slots = req.cache_with_nfluid.unwrap_or(NfluidSlots::Two);
            let fp = Fingerprint::capture(&self.ctx, slots);
            self.cache.put(var, fp, value.clone());
        }
        Ok(value)
    }

    fn run_stages(&mut self, var: &str) -> Result<Arc<QuantArray>> {
        match rawfile::fetch_raw(
            &self.layout,
            &self.meta,
            &self.roster,
            &mut self.pool,
            &self.ctx,
            var,
        ) {
            Ok(StageOutcome::Produced(arr)) => {
                self.record_producer(var, "raw_file");
                return Ok(Arc::new(arr));
            }
            Ok(StageOutcome::NotApplicable) => {}
            Err(e) if e.is_recoverable_probe() => {
                log::debug!("raw-file probe for '{var}': {e}");
                self.hidden.push(var, e.to_string());
            }
            Err(e) => return Err(e),
        }

        let stages = self.stages.clone();
        for stage in stages {
            match stage.produce(self, var) {
                Ok(StageOutcome::Produced(arr)) => {
                    self.record_producer(var, stage.label());
                    return Ok(Arc::new(arr));
                }
                Ok(StageOutcome::NotApplicable) => {}
                Err(e) if e.is_recoverable_probe() => {
                    log::debug!("stage '{}' probe for '{var}': {e}", stage.label());
                    self.hidden.push(var, e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        Err(QuantError::UnknownVariable(var.to_string()))
    }

    fn record_producer(&mut self, var: &str, producer: &str) {
        let fingerprint = Fingerprint::capture(&self.ctx, NfluidSlots::Two);
        self.tracker.record(QuantRecord {
            var: var.to_string(),
            producer: producer.to_string(),
            fingerprint,
        });
    }

    /// A full-grid 3-D value under a non-identity slice still needs the
    /// slice applied (derived stages may compute on the whole grid).
    fn postprocess(&self, value: Arc<QuantArray>) -> Arc<QuantArray> {
        if self.ctx.slice.is_identity() || value.ndim() != 3 {
            return value;
        }
        if value.shape() == &self.meta.shape[..] {
            return Arc::new(rawfile::apply_slice((*value).clone(), &self.ctx.slice));
        }
        value
    }

    fn preload_simple_vars(&mut self) {
        let vars: Vec<String> = self.layout.simple_vars().map(str::to_string).collect();
        let mut loaded = FxHashMap::default();
        for var in vars {
            match rawfile::fetch_raw(
                &self.layout,
                &self.meta,
                &self.roster,
                &mut self.pool,
                &self.ctx,
                &var,
            ) {
                Ok(StageOutcome::Produced(arr)) => {
                    loaded.insert(var, Arc::new(arr));
                }
                Ok(StageOutcome::NotApplicable) => {}
                Err(e) => self.hidden.push(var, e.to_string()),
            }
        }
        log::debug!("preloaded {} simple variables", loaded.len());
        self.preloaded = loaded;
        self.preloaded_fp = Some(Fingerprint::capture(&self.ctx, NfluidSlots::Two));
    }

    fn ensure_vardict(&mut self) {
        if self.docs_built {
            return;
        }
        let mut docs = std::mem::take(&mut self.docs);
        {
            let mut b = VarDocBuilder::new(&mut docs);
            b.meta_quant(
                "SIMPLE_VARS",
                "Quantities stored directly by the simulation, read from data files through the memmap pool.",
            );
            {
                let mut d = b.documenter("SNAP_VARS", "Snapshot fields.");
                d.var_with_nfluid("r", "mass density of ifluid [simu. units]", NfluidSlots::One);
                for x in AXES {
                    d.var_with_nfluid(
                        &format!("p{x}"),
                        &format!("{x}-component of momentum density of ifluid [simu. units]"),
                        NfluidSlots::One,
                    );
                }
                d.var_with_nfluid(
                    "e",
                    "energy density of ifluid [simu. units]; a negative species selects electrons",
                    NfluidSlots::One,
                );
                if self.meta.with_mhd {
                    for x in AXES {
                        d.var_with_nfluid(
                            &format!("b{x}"),
                            &format!("{x}-component of magnetic field [simu. units]"),
                            NfluidSlots::Zero,
                        );
                    }
                }
            }
            {
                let mut d = b.documenter("AUX_VARS", "Auxiliary fields declared by this snapshot.");
                for name in &self.meta.aux_vars {
                    d.var(name, "(auxiliary file field)");
                }
            }
            for stage in self.stages.clone() {
                stage.document(&mut b);
            }
        }
        self.docs = docs;
        self.docs_built = true;
    }
}

fn build_coords(meta: &SnapMeta) -> Result<[Arc<QuantArray>; 3]> {
    let axis = |idx: usize| -> Result<Arc<QuantArray>> {
        let n = meta.shape[idx];
        let values = match &meta.coords {
            Some(coords) => {
                if coords[idx].len() != n {
                    return Err(QuantError::inconsistent(
                        format!("{} coordinates", AXES[idx]),
                        format!("expected {n} values, got {}", coords[idx].len()),
                    ));
                }
                coords[idx].clone()
            }
            None => (0..n).map(|i| i as f64).collect(),
        };
        Ok(Arc::new(Array1::from_vec(values).into_dyn()))
    };
    Ok([axis(0)?, axis(1)?, axis(2)?])
}
