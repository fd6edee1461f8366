//! Preference tree types mirrored from the collector.
//!
//! The tree is populated wholesale by a full fetch and mutated in place by
//! the preference engine. Keys are unique per namespace: `category` within a
//! tree, `channel` within a category's channel list and within the top-level
//! channel-preference list.

use serde::{Deserialize, Serialize};

/// Aggregate opt-in/opt-out preference of a category or category channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceOptions {
    OptIn,
    OptOut,
}

/// Top-level channel preference level: `All` delivers everything, `Required`
/// restricts the channel to mandatory sends only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLevelPreferenceOptions {
    All,
    Required,
}

/// Root of the mirrored preference tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreferenceData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<Section>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_preferences: Option<Vec<ChannelPreference>>,
}

/// Display grouping of categories.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategories: Option<Vec<Category>>,
}

/// A notification topic with an aggregate preference and optional per-channel
/// overrides.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub category: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub preference: PreferenceOptions,
    #[serde(default)]
    pub is_editable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<CategoryChannel>>,
}

impl Category {
    /// Channels of this category currently opted out.
    pub fn opt_out_channels(&self) -> Vec<String> {
        self.channels
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter(|c| c.preference == PreferenceOptions::OptOut)
            .map(|c| c.channel.clone())
            .collect()
    }
}

/// Per-channel preference override inside a category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CategoryChannel {
    pub channel: String,
    pub preference: PreferenceOptions,
    #[serde(default)]
    pub is_editable: bool,
}

/// Top-level restriction entry for a delivery channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelPreference {
    pub channel: String,
    pub is_restricted: bool,
}

/// Partial category returned by the collector after an update.
///
/// Only fields the server actually returned overwrite the live node, so a
/// reconciliation pass never clobbers newer local state with absent fields.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub preference: Option<PreferenceOptions>,
    pub is_editable: Option<bool>,
    pub channels: Option<Vec<CategoryChannel>>,
}

impl CategoryPatch {
    /// Field-level merge into the live node; last write wins per field.
    pub fn apply(self, target: &mut Category) {
        if let Some(name) = self.name {
            target.name = name;
        }
        if let Some(description) = self.description {
            target.description = Some(description);
        }
        if let Some(preference) = self.preference {
            target.preference = preference;
        }
        if let Some(is_editable) = self.is_editable {
            target.is_editable = is_editable;
        }
        if let Some(channels) = self.channels {
            target.channels = Some(channels);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_category() -> Category {
        Category {
            category: "promotions".into(),
            name: "Promotions".into(),
            description: None,
            preference: PreferenceOptions::OptIn,
            is_editable: true,
            channels: Some(vec![
                CategoryChannel {
                    channel: "email".into(),
                    preference: PreferenceOptions::OptIn,
                    is_editable: true,
                },
                CategoryChannel {
                    channel: "push".into(),
                    preference: PreferenceOptions::OptOut,
                    is_editable: true,
                },
            ]),
        }
    }

    // ========== Wire Format Tests ==========

    #[test]
    fn test_preference_options_wire_values() {
        assert_eq!(
            serde_json::to_string(&PreferenceOptions::OptIn).unwrap(),
            "\"opt_in\""
        );
        assert_eq!(
            serde_json::to_string(&PreferenceOptions::OptOut).unwrap(),
            "\"opt_out\""
        );
    }

    #[test]
    fn test_channel_level_wire_values() {
        assert_eq!(
            serde_json::to_string(&ChannelLevelPreferenceOptions::Required).unwrap(),
            "\"required\""
        );
        assert_eq!(
            serde_json::to_string(&ChannelLevelPreferenceOptions::All).unwrap(),
            "\"all\""
        );
    }

    #[test]
    fn test_tree_round_trip() {
        let raw = json!({
            "sections": [{
                "name": "Updates",
                "subcategories": [{
                    "category": "promotions",
                    "name": "Promotions",
                    "preference": "opt_in",
                    "is_editable": true,
                    "channels": [
                        {"channel": "email", "preference": "opt_in", "is_editable": true}
                    ]
                }]
            }],
            "channel_preferences": [
                {"channel": "email", "is_restricted": false}
            ]
        });

        let tree: PreferenceData = serde_json::from_value(raw).unwrap();
        let sections = tree.sections.as_ref().unwrap();
        assert_eq!(sections.len(), 1);
        let category = &sections[0].subcategories.as_ref().unwrap()[0];
        assert_eq!(category.category, "promotions");
        assert_eq!(category.preference, PreferenceOptions::OptIn);
        assert!(!tree.channel_preferences.as_ref().unwrap()[0].is_restricted);
    }

    #[test]
    fn test_tree_without_sections() {
        let tree: PreferenceData = serde_json::from_value(json!({})).unwrap();
        assert!(tree.sections.is_none());
        assert!(tree.channel_preferences.is_none());
    }

    // ========== Opt-out Channel Tests ==========

    #[test]
    fn test_opt_out_channels() {
        let category = sample_category();
        assert_eq!(category.opt_out_channels(), vec!["push".to_string()]);
    }

    #[test]
    fn test_opt_out_channels_empty_without_channel_list() {
        let mut category = sample_category();
        category.channels = None;
        assert!(category.opt_out_channels().is_empty());
    }

    // ========== Patch Merge Tests ==========

    #[test]
    fn test_patch_applies_only_present_fields() {
        let mut category = sample_category();
        let patch: CategoryPatch =
            serde_json::from_value(json!({"preference": "opt_out"})).unwrap();
        patch.apply(&mut category);

        assert_eq!(category.preference, PreferenceOptions::OptOut);
        // untouched fields survive
        assert_eq!(category.name, "Promotions");
        assert_eq!(category.channels.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_patch_replaces_channel_list() {
        let mut category = sample_category();
        let patch: CategoryPatch = serde_json::from_value(json!({
            "channels": [{"channel": "sms", "preference": "opt_in", "is_editable": false}]
        }))
        .unwrap();
        patch.apply(&mut category);

        let channels = category.channels.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].channel, "sms");
        assert!(!channels[0].is_editable);
    }
}
