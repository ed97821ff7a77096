//! Context fingerprints: comparable digests of a [`Context`] used as cache
//! and tracking keys.
//!
//! A fingerprint records the context fields a stored value depended on,
//! with a configurable number of fluid slots. Two comparison modes exist
//! and are not interchangeable:
//!
//! - [`Fingerprint::matches_exactly`] — every recorded field must equal the
//!   live context's field; unrecorded fluid slots are ignored. This is the
//!   cache-validity check.
//! - [`Fingerprint::matches_fluid_agnostic`] — non-fluid fields must match
//!   exactly, while recorded fluid selectors use fluid equality with unset
//!   acting as a wildcard. This is the check used for preloaded snapshot
//!   variables and quant tracking.

use super::{Context, Fluid, MatchMode, SliceSpec};

/// How many fluid slots participate in a fingerprint (and hence a cache
/// key): none, ifluid only, or both.
///
/// A quantity that does not depend on the selected fluid can be cached once
/// with [`NfluidSlots::Zero`] instead of once per fluid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NfluidSlots {
    /// Neither fluid participates in the key.
    Zero,
    /// Only the primary (ifluid) selector participates.
    One,
    /// Both fluid selectors participate.
    Two,
}

/// A captured digest of a [`Context`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    nfluid: NfluidSlots,
    snap: i32,
    snaps: Option<Vec<i32>>,
    ifluid: Option<Fluid>,
    jfluid: Option<Fluid>,
    slice: SliceSpec,
    match_mode: MatchMode,
    panic: bool,
}

impl Fingerprint {
    /// Capture a fingerprint from a live context, recording `nfluid` fluid
    /// slots. Slots beyond `nfluid` are not recorded and are ignored by
    /// every comparison.
    pub fn capture(ctx: &Context, nfluid: NfluidSlots) -> Self {
        Fingerprint {
            nfluid,
            snap: ctx.snap,
            snaps: ctx.snaps.clone(),
            ifluid: match nfluid {
                NfluidSlots::Zero => None,
                _ => ctx.ifluid,
            },
            jfluid: match nfluid {
                NfluidSlots::Two => ctx.jfluid,
                _ => None,
            },
            slice: ctx.slice,
            match_mode: ctx.match_mode,
            panic: ctx.panic,
        }
    }

    /// How many fluid slots were recorded at capture time.
    pub fn nfluid(&self) -> NfluidSlots {
        self.nfluid
    }

    /// Subset match: every recorded field must equal the live context.
    ///
    /// Fluid slots not recorded at capture time are ignored, as is a
    /// snapshot array that was not loaded when the fingerprint was taken.
    pub fn matches_exactly(&self, live: &Context) -> bool {
        if self.snap != live.snap {
            return false;
        }
        if let Some(snaps) = &self.snaps {
            if live.snaps.as_deref() != Some(snaps.as_slice()) {
                return false;
            }
        }
        let fluids_ok = match self.nfluid {
            NfluidSlots::Zero => true,
            NfluidSlots::One => self.ifluid == live.ifluid,
            NfluidSlots::Two => self.ifluid == live.ifluid && self.jfluid == live.jfluid,
        };
        fluids_ok
            && self.slice == live.slice
            && self.match_mode == live.match_mode
            && self.panic == live.panic
    }

    /// Fluid-agnostic match: non-fluid fields must be equal exactly;
    /// a recorded fluid selector must equal the live one, while an
    /// unrecorded or unset selector matches anything.
    pub fn matches_fluid_agnostic(&self, live: &Context) -> bool {
        let fluid_ok = |recorded: Option<Fluid>, live_fluid: Option<Fluid>| match recorded {
            None => true,
            Some(f) => live_fluid == Some(f),
        };
        self.snap == live.snap
            && self.snaps.as_deref() == live.snaps.as_deref()
            && fluid_ok(self.ifluid, live.ifluid)
            && fluid_ok(self.jfluid, live.jfluid)
            && self.slice == live.slice
            && self.match_mode == live.match_mode
            && self.panic == live.panic
    }
}
