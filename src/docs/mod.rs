//! Variable documentation registry, producer tracking, and the
//! hidden-error ring.
//!
//! Producer stages describe the variables they might provide through a
//! [`VarDocBuilder`] passed to their `document` hook; the registry is used
//! only for documentation, never for dispatch. Rendering preserves
//! registration order.

use std::collections::VecDeque;
use std::fmt::Write as _;

use indexmap::IndexMap;

use crate::context::{Fingerprint, NfluidSlots};

/// Documentation for one variable.
#[derive(Clone, Debug)]
pub struct VarDoc {
    /// One-line description
    pub doc: String,
    /// How many fluid slots the quantity depends on, when declared
    pub nfluid: Option<NfluidSlots>,
}

#[derive(Clone, Debug, Default)]
struct TypeQuantDocs {
    doc: String,
    vars: IndexMap<String, VarDoc>,
}

#[derive(Clone, Debug, Default)]
struct MetaQuantDocs {
    doc: String,
    types: IndexMap<String, TypeQuantDocs>,
}

/// Nested documentation registry: meta-quant → type-quant → variable.
#[derive(Clone, Debug, Default)]
pub struct VarDocs {
    metas: IndexMap<String, MetaQuantDocs>,
}

impl VarDocs {
    /// Whether nothing has been documented yet.
    pub fn is_empty(&self) -> bool {
        self.metas.is_empty()
    }

    /// Find a variable's documentation, returning the (meta-quant,
    /// type-quant) section names it was registered under.
    pub fn lookup(&self, var: &str) -> Option<(&str, &str, &VarDoc)> {
        for (meta_name, meta) in &self.metas {
            for (type_name, tq) in &meta.types {
                if let Some(doc) = tq.vars.get(var) {
                    return Some((meta_name, type_name, doc));
                }
            }
        }
        None
    }

    /// Render the registry in registration order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (meta_name, meta) in &self.metas {
            let _ = writeln!(out, "\n{meta_name}");
            let _ = writeln!(out, "{}", "=".repeat(meta_name.len().max(40)));
            if !meta.doc.is_empty() {
                let _ = writeln!(out, "{}", meta.doc);
            }
            for (type_name, tq) in &meta.types {
                let _ = writeln!(out, "\n   {type_name}");
                let _ = writeln!(out, "   {}", "-".repeat(type_name.len()));
                if !tq.doc.is_empty() {
                    let _ = writeln!(out, "   {}", tq.doc);
                }
                for (var, doc) in &tq.vars {
                    let _ = writeln!(out, "      {:10} : {}", var, doc.doc);
                }
            }
        }
        out
    }
}

/// Builder threaded through stage documentation hooks. Tracks the current
/// meta-quant explicitly, so no global state is involved.
pub struct VarDocBuilder<'a> {
    docs: &'a mut VarDocs,
    meta: Option<String>,
}

impl<'a> VarDocBuilder<'a> {
    /// Wrap a registry for one documentation pass.
    pub fn new(docs: &'a mut VarDocs) -> Self {
        VarDocBuilder { docs, meta: None }
    }

    /// Set the meta-quant all subsequent sections belong to. Must be
    /// called before [`VarDocBuilder::documenter`].
    pub fn meta_quant(&mut self, name: &str, doc: &str) {
        self.docs
            .metas
            .entry(name.to_string())
            .or_default()
            .doc = doc.to_string();
        self.meta = Some(name.to_string());
    }

    /// Open a type-quant section and return a documenter for it. If the
    /// section already exists, the documenter is a no-op (first
    /// registration wins, matching re-runs of the documentation pass).
    pub fn documenter(&mut self, type_quant: &str, doc: &str) -> VarDocumenter<'_> {
        let meta_name = match &self.meta {
            Some(m) => m.clone(),
            None => {
                log::warn!("documenter('{type_quant}') called before meta_quant; ignoring");
                return VarDocumenter { vars: None };
            }
        };
        let meta = self.docs.metas.entry(meta_name).or_default();
        if meta.types.contains_key(type_quant) {
            return VarDocumenter { vars: None };
        }
        let tq = meta.types.entry(type_quant.to_string()).or_default();
        tq.doc = doc.to_string();
        VarDocumenter {
            vars: Some(&mut tq.vars),
        }
    }
}

/// Writes documentation lines for one type-quant section.
pub struct VarDocumenter<'a> {
    vars: Option<&'a mut IndexMap<String, VarDoc>>,
}

impl VarDocumenter<'_> {
    /// Document a variable.
    pub fn var(&mut self, name: &str, doc: &str) {
        self.put(name, doc, None);
    }

    /// Document a variable and declare its fluid dependence.
    pub fn var_with_nfluid(&mut self, name: &str, doc: &str, nfluid: NfluidSlots) {
        self.put(name, doc, Some(nfluid));
    }

    fn put(&mut self, name: &str, doc: &str, nfluid: Option<NfluidSlots>) {
        if let Some(vars) = self.vars.as_deref_mut() {
            vars.insert(
                name.to_string(),
                VarDoc {
                    doc: doc.to_string(),
                    nfluid,
                },
            );
        }
    }
}

/// Which producer made the most recent value, and under what context.
#[derive(Clone, Debug)]
pub struct QuantRecord {
    /// Variable name
    pub var: String,
    /// Label of the producing stage
    pub producer: String,
    /// Fluid-agnostic context capture at production time
    pub fingerprint: Fingerprint,
}

/// Tracks resolution depth and the most recent producer records.
///
/// Depth starts at -1 (idle); a top-level resolution runs at depth 0 and
/// nested calls deeper. The top-level record only updates for depth-0
/// productions, so callers can tell the requested quantity apart from its
/// ingredients.
#[derive(Debug)]
pub struct QuantTracker {
    depth: i32,
    last: Option<QuantRecord>,
    last_top_level: Option<QuantRecord>,
}

impl QuantTracker {
    /// Create an idle tracker.
    pub fn new() -> Self {
        QuantTracker {
            depth: -1,
            last: None,
            last_top_level: None,
        }
    }

    /// Current resolution depth (-1 when idle).
    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub(crate) fn enter(&mut self) {
        self.depth += 1;
    }

    pub(crate) fn exit(&mut self) {
        self.depth -= 1;
    }

    pub(crate) fn record(&mut self, record: QuantRecord) {
        if self.depth <= 0 {
            self.last_top_level = Some(record.clone());
        }
        self.last = Some(record);
    }

    /// The most recent production at any depth.
    pub fn last(&self) -> Option<&QuantRecord> {
        self.last.as_ref()
    }

    /// The most recent top-level production.
    pub fn last_top_level(&self) -> Option<&QuantRecord> {
        self.last_top_level.as_ref()
    }
}

/// A recoverable error recorded instead of raised during exploratory
/// access.
#[derive(Clone, Debug)]
pub struct HiddenError {
    /// Variable being probed
    pub var: String,
    /// Rendered error message
    pub message: String,
}

/// Fixed-capacity ring of recent recoverable errors; the oldest entry is
/// overwritten once the capacity is reached.
#[derive(Debug)]
pub struct ErrorRing {
    buf: VecDeque<HiddenError>,
    cap: usize,
}

impl ErrorRing {
    /// Create a ring holding up to `cap` entries.
    pub fn new(cap: usize) -> Self {
        ErrorRing {
            buf: VecDeque::with_capacity(cap.min(64)),
            cap,
        }
    }

    /// Record an error, dropping the oldest entry past capacity.
    pub fn push(&mut self, var: impl Into<String>, message: impl Into<String>) {
        if self.cap == 0 {
            return;
        }
        if self.buf.len() == self.cap {
            self.buf.pop_front();
        }
        self.buf.push_back(HiddenError {
            var: var.into(),
            message: message.into(),
        });
    }

    /// Recorded errors, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HiddenError> {
        self.buf.iter()
    }

    /// Number of recorded errors.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Drop all recorded errors.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_overwrites_oldest_past_capacity() {
        let mut ring = ErrorRing::new(3);
        for i in 0..5 {
            ring.push(format!("v{i}"), "probe failed");
        }
        assert_eq!(ring.len(), 3);
        let vars: Vec<&str> = ring.iter().map(|e| e.var.as_str()).collect();
        assert_eq!(vars, ["v2", "v3", "v4"]);
    }

    #[test]
    fn zero_capacity_ring_stores_nothing() {
        let mut ring = ErrorRing::new(0);
        ring.push("v", "probe failed");
        assert!(ring.is_empty());
    }

    #[test]
    fn builder_threads_meta_quant_explicitly() {
        let mut docs = VarDocs::default();
        let mut b = VarDocBuilder::new(&mut docs);
        b.meta_quant("SIMPLE_VARS", "stored by the simulation");
        {
            let mut d = b.documenter("SNAP_VARS", "snapshot fields");
            d.var("r", "mass density of ifluid");
            d.var("e", "energy density of ifluid");
        }
        b.meta_quant("DERIVED", "computed on demand");
        {
            let mut d = b.documenter("VELOCITIES", "momentum over mass");
            d.var("ux", "x-velocity of ifluid");
        }

        let (meta, tq, doc) = docs.lookup("r").unwrap();
        assert_eq!((meta, tq), ("SIMPLE_VARS", "SNAP_VARS"));
        assert_eq!(doc.doc, "mass density of ifluid");
        assert!(docs.lookup("ux").is_some());
        assert!(docs.lookup("nonesuch").is_none());
    }

    #[test]
    fn repeated_section_registration_is_a_no_op() {
        let mut docs = VarDocs::default();
        let mut b = VarDocBuilder::new(&mut docs);
        b.meta_quant("SIMPLE_VARS", "first");
        b.documenter("SNAP_VARS", "snapshot fields").var("r", "one");
        b.documenter("SNAP_VARS", "changed").var("r", "two");
        let (_, _, doc) = docs.lookup("r").unwrap();
        assert_eq!(doc.doc, "one");
    }

    #[test]
    fn render_preserves_registration_order() {
        let mut docs = VarDocs::default();
        let mut b = VarDocBuilder::new(&mut docs);
        b.meta_quant("B_SECTION", "");
        b.documenter("T1", "").var("zeta", "last alphabetically");
        b.meta_quant("A_SECTION", "");
        b.documenter("T2", "").var("alpha", "first alphabetically");

        let rendered = docs.render();
        let b_pos = rendered.find("B_SECTION").unwrap();
        let a_pos = rendered.find("A_SECTION").unwrap();
        assert!(b_pos < a_pos);
        assert!(rendered.contains("zeta"));
    }

    #[test]
    fn tracker_separates_top_level_from_nested() {
        let mut t = QuantTracker::new();
        let ctx = crate::context::Context::default();
        let fp = Fingerprint::capture(&ctx, NfluidSlots::Two);

        t.enter(); // depth 0: top level
        t.enter(); // depth 1: nested
        t.record(QuantRecord {
            var: "inner".into(),
            producer: "stub".into(),
            fingerprint: fp.clone(),
        });
        t.exit();
        t.record(QuantRecord {
            var: "outer".into(),
            producer: "stub".into(),
            fingerprint: fp,
        });
        t.exit();

        assert_eq!(t.depth(), -1);
        assert_eq!(t.last().unwrap().var, "outer");
        assert_eq!(t.last_top_level().unwrap().var, "outer");
    }
}
