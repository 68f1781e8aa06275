//! Skill configuration and call admission.
//!
//! Agents enable skills per category. Known categories deserialize into a typed
//! configuration; anything else is kept as raw JSON so newer plugins survive a round trip
//! through this service.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{LedgerError, Result};
use crate::rate_limit::RateLimiter;

/// Visibility of a single skill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillState {
    /// Not callable.
    Disabled,
    /// Callable by everyone.
    Public,
    /// Callable only by the agent owner.
    Private,
}

/// Settings shared by every skill category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Whether the category is enabled at all.
    pub enabled: bool,

    /// State of each skill in the category.
    #[serde(default)]
    pub states: BTreeMap<String, SkillState>,

    /// Who supplies the API key (`platform` or `agent_owner`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_provider: Option<String>,

    /// Calls allowed per user per window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_number: Option<u32>,

    /// Window length in minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_minutes: Option<u32>,
}

/// Configuration of a known skill category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum KnownSkill {
    /// Price feeds and news.
    Cryptocompare(CategoryConfig),
    /// Social metrics.
    Cookiefun(CategoryConfig),
    /// Trading signals.
    Aixbt(CategoryConfig),
    /// Wallet portfolio lookups.
    Portfolio(CategoryConfig),
    /// On-chain wallet actions.
    Cdp(CategoryConfig),
}

const KNOWN_CATEGORIES: [&str; 5] = ["cryptocompare", "cookiefun", "aixbt", "portfolio", "cdp"];

impl KnownSkill {
    fn config(&self) -> &CategoryConfig {
        match self {
            Self::Cryptocompare(c)
            | Self::Cookiefun(c)
            | Self::Aixbt(c)
            | Self::Portfolio(c)
            | Self::Cdp(c) => c,
        }
    }

    fn category(&self) -> &'static str {
        match self {
            Self::Cryptocompare(_) => "cryptocompare",
            Self::Cookiefun(_) => "cookiefun",
            Self::Aixbt(_) => "aixbt",
            Self::Portfolio(_) => "portfolio",
            Self::Cdp(_) => "cdp",
        }
    }
}

/// Configuration of a category this service does not know about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueSkill {
    /// Category name.
    pub category: String,

    /// Remaining fields, untouched.
    #[serde(flatten)]
    pub raw: serde_json::Map<String, serde_json::Value>,
}

/// Configuration of one skill category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SkillConfig {
    /// A category with a typed configuration.
    Known(KnownSkill),
    /// Any other category.
    Opaque(OpaqueSkill),
}

impl<'de> Deserialize<'de> for SkillConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let known = value
            .get("category")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|c| KNOWN_CATEGORIES.contains(&c));

        // Known categories must match their schema; only unknown ones fall back to raw JSON.
        if known {
            KnownSkill::deserialize(value)
                .map(Self::Known)
                .map_err(serde::de::Error::custom)
        } else {
            OpaqueSkill::deserialize(value)
                .map(Self::Opaque)
                .map_err(serde::de::Error::custom)
        }
    }
}

impl SkillConfig {
    /// Category name.
    #[must_use]
    pub fn category(&self) -> &str {
        match self {
            Self::Known(known) => known.category(),
            Self::Opaque(opaque) => &opaque.category,
        }
    }

    /// The shared settings, if they can be read.
    ///
    /// Opaque configurations are read leniently; `None` means the shared fields are
    /// missing or malformed.
    #[must_use]
    pub fn common(&self) -> Option<CategoryConfig> {
        match self {
            Self::Known(known) => Some(known.config().clone()),
            Self::Opaque(opaque) => {
                serde_json::from_value(serde_json::Value::Object(opaque.raw.clone())).ok()
            }
        }
    }
}

/// A request to call one skill.
#[derive(Debug, Clone, Copy)]
pub struct SkillCall<'a> {
    /// Skill name inside the category.
    pub skill: &'a str,
    /// Calling user, if known.
    pub user_id: Option<&'a str>,
    /// Whether the caller is the agent owner.
    pub is_private: bool,
}

/// Decide whether a skill call may proceed.
///
/// # Errors
///
/// Returns `Forbidden` when this caller may not use the skill, and `RateLimited` when the
/// category limit is exhausted.
pub fn admit(config: &SkillConfig, call: SkillCall<'_>, limiter: &RateLimiter) -> Result<()> {
    let category = config.category();
    let Some(common) = config.common() else {
        return Err(LedgerError::Forbidden(format!(
            "skill category {category} has no readable configuration"
        )));
    };

    if !common.enabled {
        return Err(LedgerError::Forbidden(format!(
            "skill category {category} is disabled"
        )));
    }

    match common.states.get(call.skill) {
        None | Some(SkillState::Disabled) => {
            return Err(LedgerError::Forbidden(format!(
                "skill {category}/{} is disabled",
                call.skill
            )))
        }
        Some(SkillState::Private) if !call.is_private => {
            return Err(LedgerError::Forbidden(format!(
                "skill {category}/{} is only available to the agent owner",
                call.skill
            )))
        }
        Some(_) => {}
    }

    if let (Some(limit), Some(minutes)) = (common.rate_limit_number, common.rate_limit_minutes) {
        limiter.check(category, call.user_id, limit, minutes)?;
    }
    Ok(())
}
