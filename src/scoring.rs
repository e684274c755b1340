//! Rule-weighted lead scoring.
//!
//! The engine is pure: the same lead attributes and weight table always give the
//! same score, tag and dossier. Weight tables are supplied per organization so
//! business policy can change without touching code.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::errors::AppError;
use crate::models::{EnrichmentRecord, Lead, PriorityTag, ScoreResult};

/// One step of a scoring dimension: values strictly above `above` earn `points`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub above: f64,
    pub points: i32,
}

impl Band {
    pub fn new(above: f64, points: i32) -> Self {
        Self { above, points }
    }
}

/// Weight table driving [`ScoringEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub base_score: i32,
    pub property_value_bands: Vec<Band>,
    pub household_income_bands: Vec<Band>,
    pub social_quality_bands: Vec<Band>,
    /// Scores strictly above this are `HOT_LEAD`.
    pub hot_lead_above: i32,
    /// Scores strictly above this (and not hot) are `WARM`.
    pub warm_above: i32,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base_score: 50,
            property_value_bands: vec![Band::new(1_000_000.0, 25), Band::new(500_000.0, 15)],
            household_income_bands: vec![Band::new(150_000.0, 20), Band::new(80_000.0, 10)],
            social_quality_bands: vec![Band::new(80.0, 10)],
            hot_lead_above: 80,
            warm_above: 60,
        }
    }
}

impl ScoringWeights {
    pub fn validate(&self) -> Result<(), AppError> {
        let bands = self
            .property_value_bands
            .iter()
            .chain(&self.household_income_bands)
            .chain(&self.social_quality_bands);
        for band in bands {
            if !band.above.is_finite() {
                return Err(AppError::BadRequest(format!(
                    "Scoring band threshold must be finite, got {}",
                    band.above
                )));
            }
        }
        if self.hot_lead_above < self.warm_above {
            return Err(AppError::BadRequest(format!(
                "hot_lead_above ({}) must not be below warm_above ({})",
                self.hot_lead_above, self.warm_above
            )));
        }
        Ok(())
    }

    /// Maps a clamped score to its tier.
    pub fn priority_for(&self, score: i32) -> PriorityTag {
        if score > self.hot_lead_above {
            PriorityTag::HotLead
        } else if score > self.warm_above {
            PriorityTag::Warm
        } else {
            PriorityTag::Low
        }
    }
}

/// Points for `value`: the highest band it strictly exceeds, or zero.
fn band_points(bands: &[Band], value: f64) -> i32 {
    bands
        .iter()
        .filter(|band| value > band.above)
        .max_by(|a, b| a.above.total_cmp(&b.above))
        .map(|band| band.points)
        .unwrap_or(0)
}

/// Attributes the engine reads. Missing values count as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoringInput {
    pub property_value: Option<f64>,
    pub household_income: Option<f64>,
    pub social_quality_score: Option<f64>,
    pub job_title: Option<String>,
}

impl ScoringInput {
    /// Lead attributes take precedence; the enrichment estimate fills a missing
    /// property value.
    pub fn from_records(lead: &Lead, enrichment: Option<&EnrichmentRecord>) -> Self {
        let property_value = lead.property_value.or_else(|| {
            enrichment
                .and_then(|e| e.property.estimated_value)
                .map(|v| v as f64)
        });
        Self {
            property_value,
            household_income: lead.household_income,
            social_quality_score: enrichment.and_then(|e| e.identity.social_quality_score),
            job_title: enrichment.and_then(|e| e.identity.job_title.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    weights: ScoringWeights,
}

impl ScoringEngine {
    pub fn new(weights: ScoringWeights) -> Result<Self, AppError> {
        weights.validate()?;
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    pub fn score(&self, input: &ScoringInput) -> Result<ScoreResult, AppError> {
        let property_value = finite("property_value", input.property_value)?;
        let income = finite("household_income", input.household_income)?;
        let social = finite("social_quality_score", input.social_quality_score)?;

        let w = &self.weights;
        let property_points = band_points(&w.property_value_bands, property_value);
        let income_points = band_points(&w.household_income_bands, income);
        let social_points = band_points(&w.social_quality_bands, social);

        let raw = w.base_score as i64
            + property_points as i64
            + income_points as i64
            + social_points as i64;
        let score = raw.clamp(0, 100) as i32;
        let priority_tag = w.priority_for(score);

        let dossier = render_dossier(
            input,
            [property_points, income_points, social_points],
            score,
            priority_tag,
        );

        Ok(ScoreResult {
            score,
            priority_tag,
            dossier,
        })
    }
}

fn finite(field: &str, value: Option<f64>) -> Result<f64, AppError> {
    let value = value.unwrap_or(0.0);
    if value.is_finite() {
        Ok(value)
    } else {
        Err(AppError::ScoringFailed(format!(
            "{} is not a finite number",
            field
        )))
    }
}

fn render_dossier(
    input: &ScoringInput,
    [property_points, income_points, social_points]: [i32; 3],
    score: i32,
    tag: PriorityTag,
) -> String {
    let mut lines = vec!["AI ANALYSIS:".to_string()];
    lines.push(match input.property_value {
        Some(v) => format!("- Property value: ${:.0}k (+{}).", v / 1000.0, property_points),
        None => format!("- Property value: unknown (+{}).", property_points),
    });
    lines.push(match input.household_income {
        Some(v) => format!("- Household income: ${:.0}k (+{}).", v / 1000.0, income_points),
        None => format!("- Household income: unknown (+{}).", income_points),
    });
    lines.push(match input.social_quality_score {
        Some(v) => format!("- Social quality score: {:.0} (+{}).", v, social_points),
        None => format!("- Social quality score: unknown (+{}).", social_points),
    });
    if let Some(title) = input.job_title.as_deref() {
        lines.push(format!("- Social footprint suggests {}.", title));
    }
    let action = match tag {
        PriorityTag::HotLead => "Immediate call",
        PriorityTag::Warm => "Enroll in nurture sequence",
        PriorityTag::Low => "Monitor",
    };
    lines.push(format!(
        "- Score {}/100 ({}). RECOMMENDED ACTION: {}.",
        score, tag, action
    ));
    lines.join("\n")
}

/// Weight tables per organization, with a default for everyone else.
#[derive(Debug, Clone, Default)]
pub struct ScoringPolicy {
    default: ScoringEngine,
    organizations: HashMap<i64, ScoringEngine>,
}

#[derive(Debug, Deserialize)]
struct ScoringPolicyFile {
    #[serde(default)]
    default: ScoringWeights,
    #[serde(default)]
    organizations: HashMap<String, ScoringWeights>,
}

impl ScoringPolicy {
    pub fn new(default: ScoringWeights) -> Result<Self, AppError> {
        Ok(Self {
            default: ScoringEngine::new(default)?,
            organizations: HashMap::new(),
        })
    }

    pub fn with_organization(
        mut self,
        organization_id: i64,
        weights: ScoringWeights,
    ) -> Result<Self, AppError> {
        self.organizations
            .insert(organization_id, ScoringEngine::new(weights)?);
        Ok(self)
    }

    /// Parses `{"default": {...}, "organizations": {"<org id>": {...}}}`.
    pub fn from_json(raw: &str) -> Result<Self, AppError> {
        let file: ScoringPolicyFile = serde_json::from_str(raw)
            .map_err(|e| AppError::BadRequest(format!("Invalid scoring policy: {}", e)))?;
        let mut policy = Self::new(file.default)?;
        for (org, weights) in file.organizations {
            let organization_id = org.parse::<i64>().map_err(|_| {
                AppError::BadRequest(format!("Invalid organization id '{}' in scoring policy", org))
            })?;
            policy = policy.with_organization(organization_id, weights)?;
        }
        Ok(policy)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let policy = Self::from_json(&raw).map_err(|e| anyhow::anyhow!(e.to_string()))?;
        tracing::info!(
            "Scoring policy loaded from {} ({} organization override(s))",
            path.display(),
            policy.organizations.len()
        );
        Ok(policy)
    }

    pub fn engine_for(&self, organization_id: i64) -> &ScoringEngine {
        self.organizations
            .get(&organization_id)
            .unwrap_or(&self.default)
    }
}
