//! Phase overlays for modules that split into feasibility and full-development sections.
//!
//! Combined-phase projects keep a primary section (phase 1, or "shared" for the regulatory
//! module) and a phase 2 section per split module, next to the legacy single-phase block.
//! The resolver folds them into the one effective block the completion evaluator reads.

use serde::{Deserialize, Serialize};

use super::domain::{FieldValue, ModuleBlock, ModulePatch, PhaseSlot};
use super::error::ProjectError;
use super::project::Project;
use super::registry::{ModuleKind, SplitModule};

/// One phase section plus the completeness flag its module predicate last produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseBlock {
    #[serde(default)]
    data: ModuleBlock,
    #[serde(default)]
    complete: bool,
}

impl PhaseBlock {
    pub fn data(&self) -> &ModuleBlock {
        &self.data
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn replace(&mut self, module: SplitModule, slot: PhaseSlot, data: ModuleBlock) {
        self.complete = module.section_complete(slot, &data);
        self.data = data;
    }
}

/// Primary and phase 2 sections of a split module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SplitSections {
    #[serde(default)]
    primary: PhaseBlock,
    #[serde(default)]
    phase2: PhaseBlock,
}

impl SplitSections {
    pub fn primary(&self) -> &PhaseBlock {
        &self.primary
    }

    pub fn phase2(&self) -> &PhaseBlock {
        &self.phase2
    }
}

/// Phase sections of every split module, reachable only through typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseOverlays {
    #[serde(default)]
    aims: SplitSections,
    #[serde(default)]
    approach: SplitSections,
    #[serde(default)]
    budget: SplitSections,
    #[serde(default)]
    regulatory: SplitSections,
}

impl PhaseOverlays {
    pub fn sections(&self, module: SplitModule) -> &SplitSections {
        match module {
            SplitModule::Aims => &self.aims,
            SplitModule::Approach => &self.approach,
            SplitModule::Budget => &self.budget,
            SplitModule::Regulatory => &self.regulatory,
        }
    }

    fn sections_mut(&mut self, module: SplitModule) -> &mut SplitSections {
        match module {
            SplitModule::Aims => &mut self.aims,
            SplitModule::Approach => &mut self.approach,
            SplitModule::Budget => &mut self.budget,
            SplitModule::Regulatory => &mut self.regulatory,
        }
    }

    /// Section addressed by `slot`; `None` when the slot does not exist for the module.
    pub fn block(&self, module: SplitModule, slot: PhaseSlot) -> Option<&PhaseBlock> {
        let sections = self.sections(module);
        if slot == PhaseSlot::Phase2 {
            Some(&sections.phase2)
        } else if slot == module.primary_slot() {
            Some(&sections.primary)
        } else {
            None
        }
    }

    /// Phase 2 stays locked until the primary section passes its module predicate.
    pub fn phase2_locked(&self, module: SplitModule) -> bool {
        !self.sections(module).primary.complete
    }

    pub(crate) fn apply_patch(
        &mut self,
        module: SplitModule,
        slot: PhaseSlot,
        patch: &ModulePatch,
    ) -> Result<&PhaseBlock, ProjectError> {
        if self.block(module, slot).is_none() {
            return Err(ProjectError::SlotMismatch {
                module: module.module().id(),
                slot,
            });
        }
        if slot == PhaseSlot::Phase2 && self.phase2_locked(module) {
            return Err(ProjectError::PhaseLocked {
                module: module.module().id(),
            });
        }

        let mut data = self.section_data(module, slot).clone();
        data.apply(patch);
        Ok(self.replace_section(module, slot, data))
    }

    /// Overwrite a section and recompute its flag; used by derived write-backs.
    pub(crate) fn replace_section(
        &mut self,
        module: SplitModule,
        slot: PhaseSlot,
        data: ModuleBlock,
    ) -> &PhaseBlock {
        let sections = self.sections_mut(module);
        let block = if slot == PhaseSlot::Phase2 {
            &mut sections.phase2
        } else {
            &mut sections.primary
        };
        block.replace(module, slot, data);
        block
    }

    pub(crate) fn section_data(&self, module: SplitModule, slot: PhaseSlot) -> &ModuleBlock {
        let sections = self.sections(module);
        if slot == PhaseSlot::Phase2 {
            &sections.phase2.data
        } else {
            &sections.primary.data
        }
    }
}

impl SplitModule {
    pub const fn primary_slot(self) -> PhaseSlot {
        match self {
            SplitModule::Regulatory => PhaseSlot::Shared,
            _ => PhaseSlot::Phase1,
        }
    }

    /// Module-specific completeness predicate for one phase section.
    pub fn section_complete(self, slot: PhaseSlot, block: &ModuleBlock) -> bool {
        let phase2 = slot == PhaseSlot::Phase2;
        match self {
            SplitModule::Aims => {
                let aims = block.get("aims").and_then(FieldValue::as_list).unwrap_or(&[]);
                let statements_present = !aims.is_empty() && aims.iter().all(aim_has_statement);
                if phase2 {
                    statements_present
                } else {
                    statements_present && block.is_populated("milestones")
                }
            }
            SplitModule::Approach => {
                let gate = if phase2 { "timeline" } else { "go_no_go_criteria" };
                block.is_populated("methods") && block.is_populated(gate)
            }
            SplitModule::Budget => {
                block
                    .get("total_direct_costs")
                    .and_then(FieldValue::as_number)
                    .map(|value| value > 0.0)
                    .unwrap_or(false)
                    && block.is_populated("justification")
            }
            SplitModule::Regulatory => {
                if phase2 {
                    block.is_populated("data_management_plan")
                        && block.is_populated("data_safety_monitoring")
                } else {
                    block.is_populated("human_subjects") && block.is_populated("vertebrate_animals")
                }
            }
        }
    }
}

fn aim_has_statement(aim: &FieldValue) -> bool {
    match aim {
        FieldValue::Record(fields) => fields
            .get("statement")
            .map(FieldValue::is_populated)
            .unwrap_or(false),
        FieldValue::Text(_) => aim.is_populated(),
        _ => false,
    }
}

/// Governs whether the legacy single-phase aims block may stand in for empty phase aims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayPolicy {
    /// Off by default: a combined-phase project must populate its own phase aims.
    pub legacy_aims_fallback: bool,
}

/// Where the effective aims content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AimsSource {
    PhaseOverlay,
    Legacy,
    /// Phase aims were empty and the populated legacy block was not allowed to substitute.
    LegacyIgnored,
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModule {
    pub block: ModuleBlock,
    pub aims_source: Option<AimsSource>,
}

/// Resolve the block the completion evaluator should read for `kind`.
pub fn resolve_effective_block(
    project: &Project,
    kind: ModuleKind,
    policy: &OverlayPolicy,
) -> ResolvedModule {
    let legacy = project.module(kind.id()).cloned().unwrap_or_default();
    let split_phase = project
        .grant_type()
        .map(|grant_type| grant_type.is_split_phase())
        .unwrap_or(false);

    let module = match kind.split() {
        Some(module) if split_phase => module,
        _ => {
            return ResolvedModule {
                block: legacy,
                aims_source: None,
            }
        }
    };

    let sections = project.overlays().sections(module);
    if module == SplitModule::Aims {
        return resolve_aims(sections, legacy, policy);
    }

    ResolvedModule {
        block: first_populated(&[sections.primary.data(), &legacy]),
        aims_source: None,
    }
}

fn resolve_aims(
    sections: &SplitSections,
    legacy: ModuleBlock,
    policy: &OverlayPolicy,
) -> ResolvedModule {
    let phase1 = sections.primary.data();
    let phase2 = sections.phase2.data();
    let phase_aims: Vec<FieldValue> = [phase1, phase2]
        .iter()
        .filter_map(|block| block.get("aims").and_then(FieldValue::as_list))
        .flat_map(|aims| aims.iter().cloned())
        .collect();

    let mut merged = first_populated(&[phase1, phase2]);
    merged.insert("aims", FieldValue::List(phase_aims.clone()));

    if phase_aims.iter().any(aim_has_statement) {
        return ResolvedModule {
            block: merged,
            aims_source: Some(AimsSource::PhaseOverlay),
        };
    }

    if legacy.has_content() {
        if policy.legacy_aims_fallback {
            return ResolvedModule {
                block: legacy,
                aims_source: Some(AimsSource::Legacy),
            };
        }
        return ResolvedModule {
            block: merged,
            aims_source: Some(AimsSource::LegacyIgnored),
        };
    }

    ResolvedModule {
        block: merged,
        aims_source: Some(AimsSource::Empty),
    }
}

/// Per field, the first populated value across `blocks` in order.
fn first_populated(blocks: &[&ModuleBlock]) -> ModuleBlock {
    let mut merged = ModuleBlock::new();
    for block in blocks {
        for (field, value) in block.fields() {
            let replace = match merged.get(field) {
                None => true,
                Some(existing) => !existing.is_populated() && value.is_populated(),
            };
            if replace {
                merged.insert(field.clone(), value.clone());
            }
        }
    }
    merged
}
