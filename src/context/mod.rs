//! Resolution context: the tuple of snapshot / fluid / slice / mode state
//! that a computed quantity depends on.
//!
//! A [`Context`] is a plain value. It is constructed fresh per top-level
//! request by layering caller overrides onto the data handle's defaults,
//! and is consulted, never mutated, during one resolution call. Nested
//! calls that temporarily override fluid selectors save and restore the
//! prior values through [`ContextSave`].

mod fingerprint;
mod guard;

pub use fingerprint::{Fingerprint, NfluidSlots};
pub use guard::ContextSave;

use std::fmt;
use std::ops::Range;

/// A fluid selector: a (species, level) integer pair.
///
/// Species identifiers are positive for regular fluids; a negative species
/// denotes the electron pseudo-fluid, which lives in its own file group and
/// has no meaningful level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Fluid {
    /// Species identifier (1-based; negative selects the electron fluid)
    pub species: i32,
    /// Ionization level within the species (1-based)
    pub level: i32,
}

impl Fluid {
    /// Construct a fluid selector.
    pub const fn new(species: i32, level: i32) -> Self {
        Fluid { species, level }
    }

    /// Whether this selector addresses the electron pseudo-fluid.
    pub fn is_electron(&self) -> bool {
        self.species < 0
    }
}

impl fmt::Display for Fluid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.species, self.level)
    }
}

/// Whether quantities that can be computed two ways should match the
/// physical answer or the auxiliary file data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MatchMode {
    /// Match the physical result (terms included even when the simulation
    /// had them switched off).
    #[default]
    Physics,
    /// Match what the aux files contain.
    Aux,
}

/// A half-open index range along one axis, or the whole axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AxisSlice {
    /// The whole axis (identity slice).
    #[default]
    All,
    /// Half-open `[start, end)` index range.
    Range {
        /// First index included
        start: usize,
        /// First index excluded
        end: usize,
    },
}

impl AxisSlice {
    /// Construct a half-open range slice.
    pub const fn range(start: usize, end: usize) -> Self {
        AxisSlice::Range { start, end }
    }

    /// Whether this is the identity slice.
    pub fn is_all(&self) -> bool {
        matches!(self, AxisSlice::All)
    }

    /// The concrete index range for an axis of length `len`.
    pub fn resolve(&self, len: usize) -> Range<usize> {
        match *self {
            AxisSlice::All => 0..len,
            AxisSlice::Range { start, end } => start.min(len)..end.min(len),
        }
    }
}

/// Per-axis slicing applied to 3-D field quantities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SliceSpec {
    /// Slice along the first (x) axis
    pub x: AxisSlice,
    /// Slice along the second (y) axis
    pub y: AxisSlice,
    /// Slice along the third (z) axis
    pub z: AxisSlice,
}

impl SliceSpec {
    /// Whether all three axes are identity slices.
    pub fn is_identity(&self) -> bool {
        self.x.is_all() && self.y.is_all() && self.z.is_all()
    }
}

/// The state a computed quantity depends on.
///
/// Two contexts are equal iff every field compares equal; the snapshot
/// array, when present, is compared elementwise.
#[derive(Clone, Debug, PartialEq)]
pub struct Context {
    /// Active snapshot index. When [`Context::snaps`] is set, this is the
    /// element currently selected from it.
    pub snap: i32,
    /// The loaded snapshot array, if the handle has one.
    pub snaps: Option<Vec<i32>>,
    /// Primary fluid selector (`None` = unset).
    pub ifluid: Option<Fluid>,
    /// Secondary fluid selector for two-fluid quantities (`None` = unset).
    pub jfluid: Option<Fluid>,
    /// Active sub-array slicing.
    pub slice: SliceSpec,
    /// Physics/aux matching mode.
    pub match_mode: MatchMode,
    /// Whether reads address the checkpoint-failure ("panic") file variant.
    pub panic: bool,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            snap: 0,
            snaps: None,
            ifluid: None,
            jfluid: None,
            slice: SliceSpec::default(),
            match_mode: MatchMode::default(),
            panic: false,
        }
    }
}

impl Context {
    /// Save the fields a nested resolution call may override.
    pub fn save(&self) -> ContextSave {
        ContextSave::capture(self)
    }

    /// Restore previously saved fields.
    pub fn restore(&mut self, saved: ContextSave) {
        saved.restore_into(self);
    }
}
