//! Approval presets and their per-adapter translation.

use tether_proto::{ApprovalPreset, PresetConfig, PresetInfo};

use crate::registry::AdapterRegistry;

/// All presets, least to most permissive.
pub fn list_presets() -> Vec<PresetInfo> {
    ApprovalPreset::ALL.iter().map(|p| p.info()).collect()
}

/// How `agent_type` realizes `preset`, or `None` for an unknown adapter.
pub fn get_preset_config(
    registry: &AdapterRegistry,
    preset: ApprovalPreset,
    agent_type: &str,
) -> Option<PresetConfig> {
    registry.get(agent_type).map(|a| a.preset_config(preset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAdapter;
    use std::sync::Arc;

    #[test]
    fn test_presets_in_order() {
        let presets = list_presets();
        assert_eq!(presets.len(), 4);
        assert_eq!(presets[0].preset, ApprovalPreset::Readonly);
        assert_eq!(presets[3].preset, ApprovalPreset::Autonomous);
        assert!(presets.iter().all(|p| !p.description.is_empty()));
    }

    #[test]
    fn test_unknown_adapter_has_no_config() {
        let registry = AdapterRegistry::new().with(Arc::new(FakeAdapter::new("fake")));
        assert!(get_preset_config(&registry, ApprovalPreset::Standard, "nope").is_none());
        assert_eq!(
            get_preset_config(&registry, ApprovalPreset::Standard, "fake"),
            Some(PresetConfig::default())
        );
    }
}
