//! Moves an agent's persisted skill bindings to a desired state with the
//! fewest single-binding writes.

mod apply;
mod plan;

pub use apply::{apply, ApplyReport, BindingFailure};
pub use plan::{
    desired_from_template, reconcile, reconcile_template, BindingOp, DesiredBinding,
    DesiredBindings, SkillTemplate,
};
