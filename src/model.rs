//! Application data: tasks, habits, check-ins and mentor insights
//!
//! Field names serialize in camelCase so the persisted blob keeps the shape
//! the rest of the application reads.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Language the mentor speaks and writes in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Pt,
}

impl Language {
    /// Name used inside prompts ("Respond in ...")
    pub fn prompt_name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Pt => "Portuguese (Brazil)",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Pt => "pt",
        }
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "en" | "english" => Ok(Language::En),
            "pt" | "pt-br" | "portuguese" => Ok(Language::Pt),
            other => Err(format!("unsupported language '{}' (expected en or pt)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

/// Time block of the day a task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutineBlock {
    Morning,
    Afternoon,
    Evening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub completed: bool,
    pub block: RoutineBlock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_recurrent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    pub id: String,
    pub name: String,
    pub streak: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_completed: Option<String>,
    pub color: String,
    pub frequency: Frequency,
    /// Task this habit is stacked onto
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_task_id: Option<String>,
}

/// Mood/energy check-in. Levels are 1 (low) to 3 (high).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyCheckIn {
    pub date: NaiveDate,
    pub energy: u8,
    pub mood: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DailyCheckIn {
    /// Build a check-in, clamping levels into 1..=3
    pub fn new(date: NaiveDate, energy: u8, mood: u8, note: Option<String>) -> Self {
        Self {
            date,
            energy: energy.clamp(1, 3),
            mood: mood.clamp(1, 3),
            note,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Motivational,
    Adjustment,
    Progress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiInsight {
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub insight_type: InsightType,
}

/// The whole client-side state, persisted as one blob
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppState {
    pub tasks: Vec<Task>,
    pub habits: Vec<Habit>,
    pub check_ins: Vec<DailyCheckIn>,
    pub ai_insights: Vec<AiInsight>,
    pub language: Language,
    pub theme: Theme,
}

impl AppState {
    /// Append a check-in to the history
    pub fn record_check_in(&mut self, check_in: DailyCheckIn) {
        self.check_ins.push(check_in);
    }

    /// Most recent check-in, if any. Among several on the same date the one
    /// recorded last wins.
    pub fn latest_check_in(&self) -> Option<&DailyCheckIn> {
        self.check_ins.iter().max_by_key(|c| c.date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[test]
    fn test_state_uses_camel_case_keys() {
        let mut state = AppState::default();
        state.record_check_in(DailyCheckIn::new(date(1), 2, 3, None));
        state.tasks.push(Task {
            id: "t1".to_string(),
            title: "Read".to_string(),
            description: None,
            notes: None,
            completed: false,
            block: RoutineBlock::Morning,
            is_recurrent: Some(true),
            priority: Some(Priority::High),
        });

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["checkIns"][0]["date"], "2026-10-01");
        assert_eq!(json["tasks"][0]["block"], "Morning");
        assert_eq!(json["tasks"][0]["isRecurrent"], true);
        assert_eq!(json["tasks"][0]["priority"], "high");
        assert_eq!(json["language"], "en");
    }

    #[test]
    fn test_partial_blob_fills_defaults() {
        let state: AppState = serde_json::from_str(r#"{"language": "pt"}"#).unwrap();
        assert_eq!(state.language, Language::Pt);
        assert!(state.tasks.is_empty());
        assert_eq!(state.theme, Theme::Dark);
    }

    #[test]
    fn test_record_check_in_keeps_history() {
        let mut state = AppState::default();
        state.record_check_in(DailyCheckIn::new(date(2), 1, 1, None));
        state.record_check_in(DailyCheckIn::new(date(1), 2, 2, None));
        state.record_check_in(DailyCheckIn::new(date(2), 3, 3, Some("better".to_string())));

        // Appended in recording order, same-day entries included
        assert_eq!(state.check_ins.len(), 3);
        assert_eq!(state.check_ins[1].date, date(1));
        let latest = state.latest_check_in().unwrap();
        assert_eq!(latest.date, date(2));
        assert_eq!(latest.energy, 3);
    }

    #[test]
    fn test_check_in_levels_are_clamped() {
        let c = DailyCheckIn::new(date(1), 0, 9, None);
        assert_eq!((c.energy, c.mood), (1, 3));
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("PT".parse::<Language>(), Ok(Language::Pt));
        assert_eq!("english".parse::<Language>(), Ok(Language::En));
        assert!("fr".parse::<Language>().is_err());
        assert_eq!(Language::Pt.prompt_name(), "Portuguese (Brazil)");
    }

    #[test]
    fn test_insight_type_field() {
        let insight: AiInsight = serde_json::from_str(
            r#"{"title": "Win", "content": "Three days in a row", "type": "progress"}"#,
        )
        .unwrap();
        assert_eq!(insight.insight_type, InsightType::Progress);
    }
}
