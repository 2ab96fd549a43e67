use super::RecordId;
use crate::error::{ServiceError, ServiceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SETTINGS_ROW_ID: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Percent(u8);

impl Percent {
    pub const MIDPOINT: Percent = Percent(50);

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for Percent {
    type Error = ServiceError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match u8::try_from(value) {
            Ok(v) if v <= 100 => Ok(Self(v)),
            _ => Err(ServiceError::Invalid(format!(
                "slider value {} outside 0..=100",
                value
            ))),
        }
    }
}

impl From<Percent> for u8 {
    fn from(p: Percent) -> Self {
        p.0
    }
}

impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.get())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slider {
    Empathy,
    Humor,
    Formality,
}

impl Slider {
    pub const ALL: [Slider; 3] = [Slider::Empathy, Slider::Humor, Slider::Formality];

    pub fn label(self) -> &'static str {
        match self {
            Slider::Empathy => "Empathy",
            Slider::Humor => "Humor",
            Slider::Formality => "Formality",
        }
    }
}

impl FromStr for Slider {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "empathy" => Ok(Slider::Empathy),
            "humor" | "humour" => Ok(Slider::Humor),
            "formality" => Ok(Slider::Formality),
            other => Err(ServiceError::Invalid(format!("unknown slider '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonalitySettings {
    pub id: RecordId,
    pub empathy: Percent,
    pub humor: Percent,
    pub formality: Percent,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PersonalitySettings {
    pub fn slider(&self, slider: Slider) -> Percent {
        match slider {
            Slider::Empathy => self.empathy,
            Slider::Humor => self.humor,
            Slider::Formality => self.formality,
        }
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or_default()
    }

    pub fn apply(&mut self, patch: &SettingsPatch, now: DateTime<Utc>) {
        if let Some(v) = patch.empathy {
            self.empathy = v;
        }
        if let Some(v) = patch.humor {
            self.humor = v;
        }
        if let Some(v) = patch.formality {
            self.formality = v;
        }
        if let Some(ref prompt) = patch.system_prompt {
            self.system_prompt = Some(prompt.clone());
        }
        self.updated_at = Some(now);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettingsPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub empathy: Option<Percent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humor: Option<Percent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formality: Option<Percent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl SettingsPatch {
    pub fn slider(slider: Slider, value: i64) -> ServiceResult<Self> {
        let value = Percent::try_from(value)?;
        let mut patch = Self::default();
        match slider {
            Slider::Empathy => patch.empathy = Some(value),
            Slider::Humor => patch.humor = Some(value),
            Slider::Formality => patch.formality = Some(value),
        }
        Ok(patch)
    }

    pub fn system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.empathy.is_none()
            && self.humor.is_none()
            && self.formality.is_none()
            && self.system_prompt.is_none()
    }
}
