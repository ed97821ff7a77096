//! Producer stage seam and per-request resolution options.
//!
//! The pipeline tries producers in a fixed order: the raw-file stage
//! first, then every registered [`DerivedStage`] in registration order.
//! A stage answers with [`StageOutcome::Produced`] or
//! [`StageOutcome::NotApplicable`]; "not mine" is distinct from
//! "mine but failed", which is an error.

use crate::QuantArray;
use crate::context::{AxisSlice, Fluid, MatchMode, NfluidSlots};
use crate::docs::VarDocBuilder;
use crate::engine::SnapData;
use crate::error::Result;

/// What a producer stage said about a variable.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage produced the value.
    Produced(QuantArray),
    /// The stage does not recognize this name; try the next one.
    NotApplicable,
}

impl StageOutcome {
    /// Whether a value was produced.
    pub fn is_produced(&self) -> bool {
        matches!(self, StageOutcome::Produced(_))
    }
}

/// A derived-quantity producer.
///
/// Stages are pure functions of (name, context, on-disk data): resolving
/// the same name twice under an unchanged context must produce equal
/// values. A stage may call back into [`SnapData::get_var`] for its
/// ingredients; fluid overrides it makes through
/// [`SnapData::with_fluids`] are restored on every exit path.
pub trait DerivedStage {
    /// Short label used in logs and producer tracking.
    fn label(&self) -> &str;

    /// Describe the variables this stage might produce. Documentation
    /// only; dispatch always calls [`DerivedStage::produce`] and
    /// interprets [`StageOutcome::NotApplicable`] as "not mine".
    fn document(&self, _docs: &mut VarDocBuilder<'_>) {}

    /// Try to produce `var` under the handle's current context.
    fn produce(&self, data: &mut SnapData, var: &str) -> Result<StageOutcome>;
}

/// Per-request options layered onto the handle's defaults.
#[derive(Clone, Debug)]
pub struct GetVarRequest {
    /// Snapshot to read (switches the handle when it differs).
    pub snap: Option<i32>,
    /// Primary fluid selector override.
    pub ifluid: Option<Fluid>,
    /// Secondary fluid selector override.
    pub jfluid: Option<Fluid>,
    /// Slice override along x.
    pub slice_x: Option<AxisSlice>,
    /// Slice override along y.
    pub slice_y: Option<AxisSlice>,
    /// Slice override along z.
    pub slice_z: Option<AxisSlice>,
    /// Read the checkpoint-failure file variant.
    pub panic: bool,
    /// Matching-mode override.
    pub match_mode: Option<MatchMode>,
    /// Whether to consult the result cache before the stage loop.
    pub check_cache: bool,
    /// Whether to write a produced value into the cache.
    pub cache: bool,
    /// Cache with this many fluid slots in the key; implies `cache`.
    pub cache_with_nfluid: Option<NfluidSlots>,
}

impl Default for GetVarRequest {
    fn default() -> Self {
        GetVarRequest {
            snap: None,
            ifluid: None,
            jfluid: None,
            slice_x: None,
            slice_y: None,
            slice_z: None,
            panic: false,
            match_mode: None,
            check_cache: true,
            cache: false,
            cache_with_nfluid: None,
        }
    }
}

impl GetVarRequest {
    /// Request with the handle's defaults untouched.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the primary fluid.
    pub fn ifluid(mut self, fluid: Fluid) -> Self {
        self.ifluid = Some(fluid);
        self
    }

    /// Select the secondary fluid.
    pub fn jfluid(mut self, fluid: Fluid) -> Self {
        self.jfluid = Some(fluid);
        self
    }

    /// Select the snapshot.
    pub fn snap(mut self, snap: i32) -> Self {
        self.snap = Some(snap);
        self
    }

    /// Slice along x.
    pub fn slice_x(mut self, slice: AxisSlice) -> Self {
        self.slice_x = Some(slice);
        self
    }

    /// Slice along y.
    pub fn slice_y(mut self, slice: AxisSlice) -> Self {
        self.slice_y = Some(slice);
        self
    }

    /// Slice along z.
    pub fn slice_z(mut self, slice: AxisSlice) -> Self {
        self.slice_z = Some(slice);
        self
    }

    /// Cache the produced value (with both fluid slots in the key).
    pub fn cached(mut self) -> Self {
        self.cache = true;
        self
    }

    /// Cache the produced value with an explicit fluid-slot count.
    pub fn cached_with_nfluid(mut self, nfluid: NfluidSlots) -> Self {
        self.cache_with_nfluid = Some(nfluid);
        self
    }

    /// Skip the cache check for this request.
    pub fn skip_cache_check(mut self) -> Self {
        self.check_cache = false;
        self
    }

    /// Whether this request writes a produced value into the cache.
    pub fn writes_cache(&self) -> bool {
        self.cache || self.cache_with_nfluid.is_some()
    }
}
