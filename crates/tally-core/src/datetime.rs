use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::sync::OnceLock;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  NaiveTime,
  TimeZone,
  Utc,
  Weekday
};
use chrono::format::{
  Item,
  StrftimeItems
};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;

const TIMEZONE_CONFIG_FILE: &str =
  "tally-time.toml";
const TIMEZONE_ENV_VAR: &str =
  "TALLY_TIMEZONE";
const TIMEZONE_CONFIG_ENV_VAR: &str =
  "TALLY_TIME_CONFIG";

/// Which end of a calendar day a bare
/// date resolves to.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum DayBoundary {
  Start,
  End
}

impl DayBoundary {
  fn time(self) -> NaiveTime {
    match self {
      | DayBoundary::Start => {
        NaiveTime::MIN
      }
      | DayBoundary::End => {
        NaiveTime::from_hms_opt(
          23, 59, 0
        )
        .unwrap_or(NaiveTime::MIN)
      }
    }
  }
}

#[derive(Debug, Deserialize)]
struct TimezoneConfig {
  timezone: Option<String>,
  time:     Option<TimezoneSection>
}

#[derive(Debug, Deserialize)]
struct TimezoneSection {
  timezone: Option<String>
}

pub fn app_timezone() -> &'static Tz {
  static APP_TZ: OnceLock<Tz> =
    OnceLock::new();
  APP_TZ.get_or_init(
    resolve_app_timezone
  )
}

#[must_use]
pub fn to_local_date(
  dt: DateTime<Utc>
) -> NaiveDate {
  dt.with_timezone(app_timezone())
    .date_naive()
}

#[must_use]
pub fn format_local(
  dt: DateTime<Utc>,
  fmt: &str
) -> String {
  dt.with_timezone(app_timezone())
    .format(fmt)
    .to_string()
}

/// Rejects strftime strings chrono
/// cannot render, so `format_local`
/// never hits a formatting error.
pub fn check_display_format(
  fmt: &str
) -> anyhow::Result<()> {
  if fmt.trim().is_empty() {
    return Err(anyhow!(
      "date format cannot be empty"
    ));
  }
  if StrftimeItems::new(fmt)
    .any(|item| {
      matches!(item, Item::Error)
    })
  {
    return Err(anyhow!(
      "invalid date format: {fmt}"
    ));
  }
  Ok(())
}

/// Signed number of calendar days from
/// `from` to `to` in the app timezone.
#[must_use]
pub fn days_between(
  from: DateTime<Utc>,
  to: DateTime<Utc>
) -> i64 {
  days_between_in(
    app_timezone(),
    from,
    to
  )
}

#[must_use]
pub fn days_between_in(
  tz: &Tz,
  from: DateTime<Utc>,
  to: DateTime<Utc>
) -> i64 {
  let from =
    from.with_timezone(tz).date_naive();
  let to =
    to.with_timezone(tz).date_naive();
  to.signed_duration_since(from)
    .num_days()
}

/// `TALLY_TIMEZONE` wins, then the
/// `tally-time.toml` file, then UTC.
fn resolve_app_timezone() -> Tz {
  let from_env = std::env::var(
    TIMEZONE_ENV_VAR
  )
  .ok()
  .and_then(|raw| {
    parse_timezone(
      &raw,
      TIMEZONE_ENV_VAR
    )
  });

  from_env
    .or_else(|| {
      timezone_config_path().and_then(
        |path| {
          load_timezone_from_file(
            &path
          )
        }
      )
    })
    .unwrap_or_else(|| {
      tracing::debug!(
        "no app timezone set; \
         falling back to UTC"
      );
      chrono_tz::UTC
    })
}

fn timezone_config_path()
-> Option<PathBuf> {
  match std::env::var(
    TIMEZONE_CONFIG_ENV_VAR
  ) {
    | Ok(raw)
      if !raw.trim().is_empty() =>
    {
      Some(PathBuf::from(raw.trim()))
    }
    | _ => {
      std::env::current_dir()
        .ok()
        .map(|dir| {
          dir.join(
            TIMEZONE_CONFIG_FILE
          )
        })
    }
  }
}

/// Reads `timezone = "..."` (top level
/// or under `[time]`). Any failure is
/// logged and treated as unset.
fn load_timezone_from_file(
  path: &Path
) -> Option<Tz> {
  if !path.is_file() {
    return None;
  }

  let parsed = fs::read_to_string(path)
    .context("read failed")
    .and_then(|raw| {
      toml::from_str::<TimezoneConfig>(
        &raw
      )
      .context("invalid toml")
    });
  let cfg = match parsed {
    | Ok(cfg) => cfg,
    | Err(err) => {
      tracing::error!(
        file = %path.display(),
        error = %format!("{err:#}"),
        "ignoring timezone file"
      );
      return None;
    }
  };

  let name = cfg.timezone.or_else(|| {
    cfg.time.and_then(|t| t.timezone)
  });
  match name {
    | Some(name) => {
      parse_timezone(
        &name,
        &format!(
          "file:{}",
          path.display()
        )
      )
    }
    | None => {
      tracing::warn!(
        file = %path.display(),
        "timezone file names no \
         timezone"
      );
      None
    }
  }
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let name = raw.trim();
  if name.is_empty() {
    return None;
  }

  name
    .parse::<Tz>()
    .inspect(|_| {
      tracing::info!(
        source,
        timezone = name,
        "using app timezone"
      );
    })
    .map_err(|err| {
      tracing::error!(
        source,
        timezone = name,
        error = %err,
        "unknown timezone id"
      );
    })
    .ok()
}

fn to_utc_from_local(
  tz: &Tz,
  local_naive: NaiveDateTime,
  context: &str
) -> anyhow::Result<DateTime<Utc>> {
  match tz
    .from_local_datetime(&local_naive)
  {
    | LocalResult::Single(local_dt) => {
      Ok(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      tracing::warn!(
        context,
        first = %first,
        second = %second,
        "ambiguous local datetime; using earliest"
      );
      Ok(
        first
          .min(second)
          .with_timezone(&Utc)
      )
    }
    | LocalResult::None => {
      Err(anyhow!(
        "local datetime does not \
         exist in configured \
         timezone: {context}"
      ))
    }
  }
}

/// Parses a deadline. Bare dates mean
/// the end of that day.
pub fn parse_deadline(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  parse_date_in(
    app_timezone(),
    input,
    now,
    DayBoundary::End
  )
}

/// Parses a calendar day such as a
/// semester bound. Bare dates mean the
/// start of that day.
pub fn parse_day(
  input: &str,
  now: DateTime<Utc>
) -> anyhow::Result<DateTime<Utc>> {
  parse_date_in(
    app_timezone(),
    input,
    now,
    DayBoundary::Start
  )
}

#[tracing::instrument(skip(tz, now), fields(input = input))]
pub fn parse_date_in(
  tz: &Tz,
  input: &str,
  now: DateTime<Utc>,
  boundary: DayBoundary
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower =
    token.to_ascii_lowercase();
  let local_now = now.with_timezone(tz);
  let today = local_now.date_naive();

  let day_at = |date: NaiveDate,
                context: &str| {
    to_utc_from_local(
      tz,
      date.and_time(boundary.time()),
      context
    )
  };

  match lower.as_str() {
    | "now" => return Ok(now),
    | "today" => {
      return day_at(today, "today");
    }
    | "tomorrow" => {
      let date = today
        .succ_opt()
        .ok_or_else(|| {
          anyhow!(
            "date out of range"
          )
        })?;
      return day_at(date, "tomorrow");
    }
    | "yesterday" => {
      let date = today
        .pred_opt()
        .ok_or_else(|| {
          anyhow!(
            "date out of range"
          )
        })?;
      return day_at(date, "yesterday");
    }
    | _ => {}
  }

  if let Some(weekday) =
    parse_weekday_name(&lower)
  {
    return day_at(
      next_weekday_date(today, weekday),
      "weekday-name"
    );
  }

  if let Some(time) =
    parse_clock_time(token)
  {
    let mut day = today;
    if day.and_time(time)
      <= local_now.naive_local()
    {
      day =
        day.succ_opt().ok_or_else(
          || {
            anyhow!(
              "failed to advance to \
               next day"
            )
          }
        )?;
    }
    return to_utc_from_local(
      tz,
      day.and_time(time),
      "clock-time"
    );
  }

  if let Some(offset) =
    parse_relative_offset(token)?
  {
    return now
      .checked_add_signed(offset)
      .ok_or_else(|| {
        anyhow!(
          "date out of range: {token}"
        )
      });
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return day_at(date, "date");
  }

  for fmt in
    ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
  {
    if let Ok(ndt) =
      NaiveDateTime::parse_from_str(
        token, fmt
      )
    {
      return to_utc_from_local(
        tz, ndt, fmt
      );
    }
  }

  Err(anyhow!(
    "unrecognized date expression: \
     {input}"
  ))
  .with_context(|| {
    "supported formats: \
     now/today/tomorrow/yesterday, \
     weekday names (e.g. friday), \
     clock times (e.g. 3:30pm or \
     15:30), +Nd/+Nh/+Nm/+Nw, RFC3339, \
     YYYY-MM-DD, YYYY-MM-DDTHH:MM, \
     YYYY-MM-DD HH:MM"
  })
}

fn parse_relative_offset(
  token: &str
) -> anyhow::Result<Option<Duration>> {
  let rel_re = Regex::new(r"^(?P<sign>[+-])(?P<num>\d+)(?P<unit>[wdhm])$")
    .map_err(|e| anyhow!("internal regex compile failure: {e}"))?;
  let Some(caps) = rel_re.captures(token)
  else {
    return Ok(None);
  };

  let num: i64 = caps["num"]
    .parse()
    .context(
      "invalid relative number"
    )?;
  let duration = match &caps["unit"] {
    | "w" => Duration::try_weeks(num),
    | "d" => Duration::try_days(num),
    | "h" => Duration::try_hours(num),
    | "m" => Duration::try_minutes(num),
    | unit => {
      return Err(anyhow!(
        "unknown relative unit: \
         {unit}"
      ));
    }
  }
  .ok_or_else(|| {
    anyhow!(
      "relative offset out of range: \
       {token}"
    )
  })?;

  Ok(Some(
    if &caps["sign"] == "-" {
      -duration
    } else {
      duration
    }
  ))
}

fn parse_weekday_name(
  token: &str
) -> Option<Weekday> {
  match token.trim() {
    | "monday" | "mon" => {
      Some(Weekday::Mon)
    }
    | "tuesday" | "tue" | "tues" => {
      Some(Weekday::Tue)
    }
    | "wednesday" | "wed" => {
      Some(Weekday::Wed)
    }
    | "thursday" | "thu" | "thur"
    | "thurs" => Some(Weekday::Thu),
    | "friday" | "fri" => {
      Some(Weekday::Fri)
    }
    | "saturday" | "sat" => {
      Some(Weekday::Sat)
    }
    | "sunday" | "sun" => {
      Some(Weekday::Sun)
    }
    | _ => None
  }
}

fn next_weekday_date(
  from: NaiveDate,
  target: Weekday
) -> NaiveDate {
  let from_idx = i64::from(
    from.weekday().num_days_from_monday()
  );
  let target_idx = i64::from(
    target.num_days_from_monday()
  );
  let mut delta =
    (7 + target_idx - from_idx) % 7;
  if delta == 0 {
    delta = 7;
  }
  from
    .checked_add_signed(Duration::days(
      delta
    ))
    .unwrap_or(from)
}

fn parse_clock_time(
  token: &str
) -> Option<NaiveTime> {
  let clock_re = Regex::new(
    r"(?i)^(?P<hour>\d{1,2}):(?P<minute>\d{2})\s*(?P<ampm>[ap]m)?$",
  )
  .ok()?;
  let captures =
    clock_re.captures(token.trim())?;

  let raw_hour = captures["hour"]
    .parse::<u32>()
    .ok()?;
  let minute = captures["minute"]
    .parse::<u32>()
    .ok()?;

  let hour = match captures
    .name("ampm")
    .map(|m| {
      m.as_str().to_ascii_lowercase()
    }) {
    | None => raw_hour,
    | Some(_)
      if raw_hour == 0
        || raw_hour > 12 =>
    {
      return None;
    }
    | Some(ampm) if ampm == "am" => {
      raw_hour % 12
    }
    | Some(_) => raw_hour % 12 + 12
  };

  NaiveTime::from_hms_opt(
    hour, minute, 0
  )
}
