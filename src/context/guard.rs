//! Saved context state for scoped acquisition and release.
//!
//! A resolution call temporarily overrides the handle's fluid selectors and
//! matching mode; the prior values must come back on every exit path,
//! including errors. [`ContextSave`] is `#[must_use]`: capturing without
//! restoring is a bug.

use super::{Context, Fluid, MatchMode};

/// Snapshot of the context fields a nested resolution call may override.
#[derive(Clone, Copy, Debug)]
#[must_use = "captured context state must be restored on every exit path"]
pub struct ContextSave {
    ifluid: Option<Fluid>,
    jfluid: Option<Fluid>,
    match_mode: MatchMode,
    panic: bool,
}

impl ContextSave {
    pub(crate) fn capture(ctx: &Context) -> Self {
        ContextSave {
            ifluid: ctx.ifluid,
            jfluid: ctx.jfluid,
            match_mode: ctx.match_mode,
            panic: ctx.panic,
        }
    }

    pub(crate) fn restore_into(self, ctx: &mut Context) {
        ctx.ifluid = self.ifluid;
        ctx.jfluid = self.jfluid;
        ctx.match_mode = self.match_mode;
        ctx.panic = self.panic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_restore_round_trip() {
        let mut ctx = Context {
            ifluid: Some(Fluid::new(1, 1)),
            jfluid: None,
            match_mode: MatchMode::Aux,
            panic: true,
            ..Context::default()
        };
        let saved = ctx.save();

        ctx.ifluid = Some(Fluid::new(2, 2));
        ctx.jfluid = Some(Fluid::new(1, 2));
        ctx.match_mode = MatchMode::Physics;
        ctx.panic = false;

        ctx.restore(saved);
        assert_eq!(ctx.ifluid, Some(Fluid::new(1, 1)));
        assert_eq!(ctx.jfluid, None);
        assert_eq!(ctx.match_mode, MatchMode::Aux);
        assert!(ctx.panic);
    }
}
