//! Static configuration: the city tier lookup, the categorical allow-lists,
//! the interaction mapping and the column sets in `pipeline.json`.
//!
//! Everything is loaded once from the data directory and validated before
//! an engine is built. Stages receive owned copies of the parts they use.

use crate::{
    error::{PipelineError, PipelineResult},
    schema::{APP_COMPLETE_FLAG, FIRST_MEDIUM, FIRST_PLATFORM, FIRST_SOURCE, INTERACTION_MAPPING,
             INTERACTION_TYPE, REFERRED_LEAD, TOTAL_LEADS_DROPPED},
    types::RunMode,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Tier assigned to any city missing from the lookup.
pub const DEFAULT_CITY_TIER: f64 = 3.0;

/// Sentinel level replacing values outside an allow-list.
pub const OTHERS_LEVEL: &str = "others";

/// Number of canonical interaction categories, hence feature columns.
pub const INTERACTION_CATEGORY_COUNT: usize = 5;

#[derive(Debug, Clone, Default, Deserialize)]
struct CityTierFile {
    city_tier_mapping: BTreeMap<String, f64>,
}

/// Closed vocabularies for the three nominal columns.
/// Derived offline from the top 90th percentile of levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignificantLevels {
    pub platform: BTreeSet<String>,
    pub medium:   BTreeSet<String>,
    pub source:   BTreeSet<String>,
}

impl SignificantLevels {
    /// Allow-list per designated column, in collapse order.
    pub fn by_column(&self) -> [(&'static str, &BTreeSet<String>); 3] {
        [
            (FIRST_PLATFORM, &self.platform),
            (FIRST_MEDIUM,   &self.medium),
            (FIRST_SOURCE,   &self.source),
        ]
    }
}

/// Raw interaction type → canonical interaction category.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionMapping {
    entries: BTreeMap<String, String>,
}

impl InteractionMapping {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Parse `interaction_type,interaction_mapping` CSV. Extra columns
    /// (such as a leading index column) are ignored.
    pub fn from_csv_reader<R: std::io::Read>(reader: R) -> PipelineResult<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers = rdr.headers()?.clone();
        let find = |name: &str| {
            headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
                PipelineError::InvalidConfig(format!("interaction mapping has no '{name}' column"))
            })
        };
        let type_idx = find(INTERACTION_TYPE)?;
        let category_idx = find(INTERACTION_MAPPING)?;

        let mut entries = BTreeMap::new();
        for record in rdr.records() {
            let record = record?;
            let raw = record.get(type_idx).unwrap_or("").trim();
            let category = record.get(category_idx).unwrap_or("").trim();
            if raw.is_empty() || category.is_empty() {
                continue;
            }
            if let Some(previous) = entries.insert(raw.to_string(), category.to_string()) {
                if previous != category {
                    return Err(PipelineError::InvalidConfig(format!(
                        "interaction type '{raw}' mapped to both '{previous}' and '{category}'"
                    )));
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn category(&self, interaction_type: &str) -> Option<&str> {
        self.entries.get(interaction_type).map(String::as_str)
    }

    /// Every canonical category, sorted by name.
    pub fn categories(&self) -> BTreeSet<&str> {
        self.entries.values().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

/// `pipeline.json`: column sets that drive the stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Counter columns whose missing values become 0 on ingestion.
    pub zero_fill_columns:       Vec<String>,
    pub index_columns_training:  Vec<String>,
    pub index_columns_inference: Vec<String>,
    /// Administrative columns dropped from the model input.
    pub not_features:            Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub city_tiers:          BTreeMap<String, f64>,
    pub significant_levels:  SignificantLevels,
    pub interaction_mapping: InteractionMapping,
    pub settings:            PipelineSettings,
}

impl PipelineConfig {
    /// Load from the data/ directory.
    /// In tests, use PipelineConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let tier_path = format!("{data_dir}/mappings/city_tier_mapping.json");
        let tier_content = std::fs::read_to_string(&tier_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {tier_path}: {e}"))?;
        let tier_file: CityTierFile = serde_json::from_str(&tier_content)?;

        let levels_path = format!("{data_dir}/mappings/significant_categorical_level.json");
        let levels_content = std::fs::read_to_string(&levels_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {levels_path}: {e}"))?;
        let significant_levels: SignificantLevels = serde_json::from_str(&levels_content)?;

        let mapping_path = format!("{data_dir}/mappings/interaction_mapping.csv");
        let mapping_file = std::fs::File::open(&mapping_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {mapping_path}: {e}"))?;
        let interaction_mapping = InteractionMapping::from_csv_reader(mapping_file)?;

        let settings_path = format!("{data_dir}/pipeline.json");
        let settings_content = std::fs::read_to_string(&settings_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {settings_path}: {e}"))?;
        let settings: PipelineSettings = serde_json::from_str(&settings_content)?;

        let config = Self {
            city_tiers: tier_file.city_tier_mapping,
            significant_levels,
            interaction_mapping,
            settings,
        };
        config.validate()?;
        log::info!(
            "Loaded config from {data_dir}: {} cities, {} interaction types, {} categories",
            config.city_tiers.len(),
            config.interaction_mapping.len(),
            config.interaction_mapping.categories().len()
        );
        Ok(config)
    }

    /// Check the invariants the stages rely on.
    pub fn validate(&self) -> PipelineResult<()> {
        for (column, levels) in self.significant_levels.by_column() {
            if levels.contains(OTHERS_LEVEL) {
                return Err(PipelineError::InvalidConfig(format!(
                    "allow-list for '{column}' contains the sentinel '{OTHERS_LEVEL}'"
                )));
            }
        }

        if let Some((city, tier)) = self.city_tiers.iter().find(|(_, t)| !t.is_finite()) {
            return Err(PipelineError::InvalidConfig(format!(
                "city '{city}' has non-finite tier {tier}"
            )));
        }

        let settings = &self.settings;
        if !settings.index_columns_training.iter().any(|c| c == APP_COMPLETE_FLAG) {
            return Err(PipelineError::InvalidConfig(format!(
                "training index columns must include '{APP_COMPLETE_FLAG}'"
            )));
        }
        if settings.index_columns_inference.iter().any(|c| c == APP_COMPLETE_FLAG) {
            return Err(PipelineError::InvalidConfig(format!(
                "inference index columns must not include '{APP_COMPLETE_FLAG}'"
            )));
        }

        let categories = self.interaction_mapping.categories();
        if categories.len() != INTERACTION_CATEGORY_COUNT {
            return Err(PipelineError::InvalidConfig(format!(
                "interaction mapping names {} categories, expected {INTERACTION_CATEGORY_COUNT}",
                categories.len()
            )));
        }
        for (mode, index) in [
            (RunMode::Training,  &settings.index_columns_training),
            (RunMode::Inference, &settings.index_columns_inference),
        ] {
            let mut seen = BTreeSet::new();
            for column in index {
                if !seen.insert(column.as_str()) {
                    return Err(PipelineError::InvalidConfig(format!(
                        "{mode} index columns list '{column}' twice"
                    )));
                }
                if categories.contains(column.as_str()) {
                    return Err(PipelineError::InvalidConfig(format!(
                        "{mode} index column '{column}' collides with an interaction category"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn index_columns(&self, mode: RunMode) -> &[String] {
        match mode {
            RunMode::Training  => &self.settings.index_columns_training,
            RunMode::Inference => &self.settings.index_columns_inference,
        }
    }

    /// Small synthetic configuration for tests: two known cities, two
    /// interaction columns per category and a handful of levels.
    pub fn default_test() -> Self {
        let index_inference: Vec<String> = [
            "created_date",
            "city_tier",
            FIRST_PLATFORM,
            FIRST_MEDIUM,
            FIRST_SOURCE,
            TOTAL_LEADS_DROPPED,
            REFERRED_LEAD,
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let mut index_training = index_inference.clone();
        index_training.push(APP_COMPLETE_FLAG.to_string());

        Self {
            city_tiers: [
                ("mumbai".to_string(), 1.0),
                ("pune".to_string(), 2.0),
            ]
            .into(),
            significant_levels: SignificantLevels {
                platform: ["Level0", "Level3"].into_iter().map(String::from).collect(),
                medium:   ["Level0", "Level2"].into_iter().map(String::from).collect(),
                source:   ["Level2", "Level0"].into_iter().map(String::from).collect(),
            },
            interaction_mapping: InteractionMapping::new([
                ("call_us_button_clicked",   "assistance_interaction"),
                ("live_chat_button_clicked", "assistance_interaction"),
                ("careers",                  "career_interaction"),
                ("placement_support",        "career_interaction"),
                ("fee_component_click",      "payment_interaction"),
                ("emi_plans_clicked",        "payment_interaction"),
                ("social_referral_click",    "social_interaction"),
                ("whatsapp_chat_click",      "social_interaction"),
                ("syllabus",                 "syllabus_interaction"),
                ("syllabus_expand",          "syllabus_interaction"),
            ]),
            settings: PipelineSettings {
                zero_fill_columns: vec![TOTAL_LEADS_DROPPED.to_string(), REFERRED_LEAD.to_string()],
                index_columns_training: index_training,
                index_columns_inference: index_inference,
                not_features: vec!["created_date".to_string()],
            },
        }
    }
}
