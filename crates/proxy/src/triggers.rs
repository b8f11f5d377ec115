//! Trigger hooks run by `mutate_with_triggers`.

use ringstore_common::Mutation;

#[derive(Debug, Clone, thiserror::Error)]
#[error("trigger {trigger} rejected mutation: {reason}")]
pub struct TriggerError {
    pub trigger: String,
    pub reason: String,
}

impl TriggerError {
    pub fn new(trigger: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            reason: reason.into(),
        }
    }
}

/// A hook that may reject a mutation or contribute extra ones.
pub trait Trigger: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn validate(&self, _mutation: &Mutation) -> Result<(), TriggerError> {
        Ok(())
    }

    /// Additional mutations to apply alongside `mutation`.
    fn augment(&self, mutation: &Mutation) -> Result<Vec<Mutation>, TriggerError>;
}

/// Run every trigger over `mutations`. Returns the extra mutations they
/// produced, in trigger order.
pub fn expand(
    triggers: &[std::sync::Arc<dyn Trigger>],
    mutations: &[Mutation],
) -> Result<Vec<Mutation>, TriggerError> {
    let mut extra = Vec::new();
    for mutation in mutations {
        for trigger in triggers {
            trigger.validate(mutation)?;
            extra.extend(trigger.augment(mutation)?);
        }
    }
    Ok(extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ringstore_common::DecoratedKey;
    use std::sync::Arc;

    struct Audit;

    impl Trigger for Audit {
        fn name(&self) -> &str {
            "audit"
        }

        fn augment(&self, mutation: &Mutation) -> Result<Vec<Mutation>, TriggerError> {
            Ok(vec![Mutation::new(
                "ks",
                "audit",
                DecoratedKey::new(mutation.key.key.clone()),
            )
            .with_row(b"seen".to_vec(), mutation.table.clone().into_bytes())])
        }
    }

    struct NoDeletes;

    impl Trigger for NoDeletes {
        fn name(&self) -> &str {
            "no_deletes"
        }

        fn validate(&self, mutation: &Mutation) -> Result<(), TriggerError> {
            if mutation.rows.iter().any(|r| !r.cell.is_live()) {
                return Err(TriggerError::new(self.name(), "deletions are not allowed"));
            }
            Ok(())
        }

        fn augment(&self, _mutation: &Mutation) -> Result<Vec<Mutation>, TriggerError> {
            Ok(Vec::new())
        }
    }

    fn put(key: &str) -> Mutation {
        Mutation::new("ks", "t", DecoratedKey::new(key.as_bytes().to_vec()))
            .with_row(b"c".to_vec(), b"v".to_vec())
    }

    #[test]
    fn test_expand_collects_augmentations() {
        let triggers: Vec<Arc<dyn Trigger>> = vec![Arc::new(Audit), Arc::new(NoDeletes)];
        let extra = expand(&triggers, &[put("a"), put("b")]).unwrap();
        assert_eq!(extra.len(), 2);
        assert!(extra.iter().all(|m| m.table == "audit"));
    }

    #[test]
    fn test_validation_rejects() {
        let triggers: Vec<Arc<dyn Trigger>> = vec![Arc::new(NoDeletes)];
        let delete = Mutation::new("ks", "t", DecoratedKey::new(b"a".to_vec()))
            .with_deletion(b"c".to_vec());
        let err = expand(&triggers, &[put("a"), delete]).unwrap_err();
        assert_eq!(err.trigger, "no_deletes");
        assert!(err.to_string().contains("deletions are not allowed"));
    }

    #[test]
    fn test_no_triggers_no_extras() {
        assert!(expand(&[], &[put("a")]).unwrap().is_empty());
    }
}
