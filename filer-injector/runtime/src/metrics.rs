use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug)]
pub struct AdmissionMetrics {
    admissions: Family<OutcomeLabels, Counter>,
    sidecars: Counter,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OutcomeLabels {
    outcome: &'static str,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let admissions = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "admissions",
            "Total number of pod admission requests by outcome",
            admissions.clone(),
        );

        let sidecars = Counter::default();
        reg.register(
            "sidecars_injected",
            "Total number of filer sidecars injected into pods",
            sidecars.clone(),
        );

        Self {
            admissions,
            sidecars,
        }
    }

    pub(crate) fn injected(&self, sidecars: usize) {
        self.outcome("injected");
        self.sidecars.inc_by(sidecars as u64);
    }

    /// The pod was not eligible or was already injected.
    pub(crate) fn skipped(&self) {
        self.outcome("skipped");
    }

    /// The pod was eligible but its namespace held no valid credentials.
    pub(crate) fn empty(&self) {
        self.outcome("empty");
    }

    pub(crate) fn failed(&self) {
        self.outcome("failed");
    }

    fn outcome(&self, outcome: &'static str) {
        self.admissions
            .get_or_create(&OutcomeLabels { outcome })
            .inc();
    }
}
