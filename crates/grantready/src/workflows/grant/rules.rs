use super::budget::InstituteCatalog;
use super::overlay::OverlayPolicy;

/// Configuration every rule evaluation reads: institute caps and the overlay policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplianceRules {
    pub catalog: InstituteCatalog,
    pub overlay: OverlayPolicy,
}

impl ComplianceRules {
    pub fn new(catalog: InstituteCatalog, overlay: OverlayPolicy) -> Self {
        Self { catalog, overlay }
    }
}
