use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(anyhow!("unknown theme: {other} (expected light or dark)")),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Light => f.write_str("light"),
            Self::Dark => f.write_str("dark"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SemesterDates {
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    #[serde(default)]
    pub theme: Theme,
    pub semester_dates: SemesterDates,
}

impl AppSettings {
    /// Fresh settings: light theme and an empty semester anchored at `now`.
    pub fn initial(now: DateTime<Utc>) -> Self {
        Self {
            theme: Theme::Light,
            semester_dates: SemesterDates {
                start_date: now,
                end_date: now,
            },
        }
    }

    /// Shallow merge. A supplied `semester_dates` replaces the pair whole.
    pub fn merge(&mut self, patch: SettingsPatch) {
        if let Some(theme) = patch.theme {
            self.theme = theme;
        }
        if let Some(dates) = patch.semester_dates {
            self.semester_dates = dates;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub theme: Option<Theme>,
    pub semester_dates: Option<SemesterDates>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.theme.is_none() && self.semester_dates.is_none()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{AppSettings, SemesterDates, SettingsPatch, Theme};

    #[test]
    fn merge_keeps_fields_not_in_patch() {
        let now = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .expect("valid now");
        let mut settings = AppSettings::initial(now);

        settings.merge(SettingsPatch {
            theme: Some(Theme::Dark),
            ..SettingsPatch::default()
        });
        assert_eq!(settings.theme, Theme::Dark);
        assert_eq!(settings.semester_dates.start_date, now);

        let dates = SemesterDates {
            start_date: now,
            end_date: now + Duration::days(120),
        };
        settings.merge(SettingsPatch {
            semester_dates: Some(dates),
            ..SettingsPatch::default()
        });
        assert_eq!(settings.theme, Theme::Dark);
        assert_eq!(settings.semester_dates, dates);
    }

    #[test]
    fn theme_parses_case_insensitively() {
        assert_eq!("Dark".parse::<Theme>().expect("dark"), Theme::Dark);
        assert_eq!(" light ".parse::<Theme>().expect("light"), Theme::Light);
        assert!("sepia".parse::<Theme>().is_err());
    }
}
