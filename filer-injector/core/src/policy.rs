use crate::{ObjectMeta, INJECT_ANNOTATION, STATUS_ANNOTATION, STATUS_INJECTED};
use tracing::info;

/// Decides from a pod's metadata alone whether it should be mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutationPolicy {
    eligibility_label: String,
}

/// Inject-annotation values that opt a pod out of injection.
const OPT_OUT: [&str; 4] = ["n", "not", "false", "off"];

// === impl MutationPolicy ===

impl MutationPolicy {
    pub fn new(eligibility_label: impl Into<String>) -> Self {
        Self {
            eligibility_label: eligibility_label.into(),
        }
    }

    pub fn is_mutation_required(&self, metadata: &ObjectMeta) -> bool {
        let ns = metadata.namespace.as_deref().unwrap_or_default();
        let name = metadata
            .name
            .as_deref()
            .or(metadata.generate_name.as_deref())
            .unwrap_or_default();

        let eligible = metadata
            .labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(&self.eligibility_label));
        if !eligible {
            info!(%ns, %name, label = %self.eligibility_label, "Skipping pod without eligibility label");
            return false;
        }

        let annotation = |key: &str| {
            metadata
                .annotations
                .as_ref()
                .and_then(|annotations| annotations.get(key))
                .map(String::as_str)
                .unwrap_or_default()
        };

        let status = annotation(STATUS_ANNOTATION);
        let required = if status.eq_ignore_ascii_case(STATUS_INJECTED) {
            false
        } else {
            let inject = annotation(INJECT_ANNOTATION);
            !OPT_OUT.iter().any(|v| inject.eq_ignore_ascii_case(v))
        };

        info!(%ns, %name, %status, %required, "Mutation policy");
        required
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    fn meta(
        labels: Option<std::collections::BTreeMap<String, String>>,
        annotations: Option<std::collections::BTreeMap<String, String>>,
    ) -> ObjectMeta {
        ObjectMeta {
            namespace: Some("ns-0".to_string()),
            name: Some("notebook-0".to_string()),
            labels,
            annotations,
            ..Default::default()
        }
    }

    fn eligible() -> Option<std::collections::BTreeMap<String, String>> {
        Some(btreemap! { "notebook-name".to_string() => "notebook-0".to_string() })
    }

    #[test]
    fn requires_eligibility_label() {
        let policy = MutationPolicy::new("notebook-name");
        assert!(!policy.is_mutation_required(&meta(None, None)));
        assert!(!policy.is_mutation_required(&meta(
            Some(btreemap! { "app".to_string() => "web".to_string() }),
            None
        )));
        assert!(policy.is_mutation_required(&meta(eligible(), None)));
    }

    #[test]
    fn skips_injected_pods_in_any_case() {
        let policy = MutationPolicy::new("notebook-name");
        for status in ["injected", "INJECTED", "Injected"] {
            let annotations = btreemap! { STATUS_ANNOTATION.to_string() => status.to_string() };
            assert!(
                !policy.is_mutation_required(&meta(eligible(), Some(annotations))),
                "status {status:?} must not be mutated"
            );
        }
    }

    #[test]
    fn honors_opt_out() {
        let policy = MutationPolicy::new("notebook-name");
        for value in ["n", "not", "false", "off", "OFF", "False"] {
            let annotations = btreemap! { INJECT_ANNOTATION.to_string() => value.to_string() };
            assert!(
                !policy.is_mutation_required(&meta(eligible(), Some(annotations))),
                "inject={value:?} must opt out"
            );
        }
    }

    #[test]
    fn injects_by_default() {
        let policy = MutationPolicy::new("notebook-name");
        for value in ["", "y", "yes", "true", "on", "anything"] {
            let annotations = btreemap! {
                INJECT_ANNOTATION.to_string() => value.to_string(),
                STATUS_ANNOTATION.to_string() => "pending".to_string(),
            };
            assert!(
                policy.is_mutation_required(&meta(eligible(), Some(annotations))),
                "inject={value:?} must inject"
            );
        }
    }
}
