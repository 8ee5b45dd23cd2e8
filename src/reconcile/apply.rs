use chat_contract::{BindingStore, ChatError, SkillBinding};
use futures_util::future::join_all;
use tracing::{debug, warn};

use super::plan::BindingOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingFailure {
    pub op: BindingOp,
    pub error: ChatError,
}

/// Outcome of one batch. Failures never roll back applied siblings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: Vec<SkillBinding>,
    pub failed: Vec<BindingFailure>,
}

impl ApplyReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    #[must_use]
    pub fn failed_skill_ids(&self) -> Vec<&str> {
        self.failed
            .iter()
            .map(|failure| failure.op.skill_id())
            .collect()
    }

    /// Only the operations that failed, ready to be applied again.
    #[must_use]
    pub fn retry_operations(&self) -> Vec<BindingOp> {
        self.failed
            .iter()
            .map(|failure| failure.op.clone())
            .collect()
    }

    /// Folds applied bindings into a local copy of the agent's bindings.
    pub fn merge_into(&self, bindings: &mut Vec<SkillBinding>) {
        for applied in &self.applied {
            match bindings
                .iter_mut()
                .find(|binding| binding.binding_id == applied.binding_id)
            {
                Some(slot) => *slot = applied.clone(),
                None => bindings.push(applied.clone()),
            }
        }
    }
}

/// Runs every operation concurrently. Each touches a distinct binding, so no
/// ordering between them is required.
pub async fn apply(store: &dyn BindingStore, agent_id: &str, ops: Vec<BindingOp>) -> ApplyReport {
    let results = join_all(ops.into_iter().map(|op| async move {
        let result = apply_one(store, agent_id, &op).await;
        (op, result)
    }))
    .await;

    let mut report = ApplyReport::default();
    for (op, result) in results {
        match result {
            Ok(binding) => {
                debug!(agent_id, skill_id = op.skill_id(), "binding applied");
                report.applied.push(binding);
            }
            Err(error) => {
                warn!(agent_id, skill_id = op.skill_id(), %error, "binding operation failed");
                report.failed.push(BindingFailure { op, error });
            }
        }
    }
    report
}

async fn apply_one(
    store: &dyn BindingStore,
    agent_id: &str,
    op: &BindingOp,
) -> Result<SkillBinding, ChatError> {
    match op {
        BindingOp::Create {
            skill_id,
            enabled,
            prompt_override,
        } => {
            store
                .bind(agent_id, skill_id, *enabled, prompt_override.clone())
                .await
        }
        BindingOp::Update {
            binding_id, patch, ..
        } => store.update_binding(agent_id, binding_id, patch.clone()).await,
    }
}
