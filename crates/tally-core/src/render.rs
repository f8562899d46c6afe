use std::io::{self, IsTerminal, Write};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{check_display_format, format_local};
use crate::filter::{StatusCounts, TaskStatus};
use crate::settings::{AppSettings, Theme};
use crate::task::Task;

const PROGRESS_BAR_WIDTH: usize = 30;

#[derive(Debug, Clone, Copy)]
struct Palette {
    id: &'static str,
    overdue: &'static str,
    completed: &'static str,
    missed: &'static str,
    accent: &'static str,
}

impl Palette {
    fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Light => Self {
                id: "34",
                overdue: "31",
                completed: "32",
                missed: "35",
                accent: "36",
            },
            Theme::Dark => Self {
                id: "94",
                overdue: "91",
                completed: "92",
                missed: "95",
                accent: "96",
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    palette: Palette,
    date_format: String,
}

impl Renderer {
    pub fn new(cfg: &Config, theme: Theme) -> anyhow::Result<Self> {
        let color_cfg = cfg
            .get_bool("color")?
            .ok_or_else(|| anyhow!("color setting missing"))?;
        let date_format = cfg.get_or("date.format", "%Y-%m-%d %H:%M");
        check_display_format(&date_format).context("bad date.format setting")?;

        Ok(Self {
            color: color_cfg && io::stdout().is_terminal(),
            palette: Palette::for_theme(theme),
            date_format,
        })
    }

    /// Renderer that never emits ANSI escapes.
    pub fn plain(date_format: &str) -> Self {
        Self {
            color: false,
            palette: Palette::for_theme(Theme::Light),
            date_format: date_format.to_string(),
        }
    }

    #[tracing::instrument(skip(self, out, tasks, now), fields(rows = tasks.len()))]
    pub fn write_task_table<W: Write>(
        &self,
        out: &mut W,
        tasks: &[&Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }

        let headers = vec![
            "ID".to_string(),
            "Status".to_string(),
            "Due".to_string(),
            "Title".to_string(),
            "Tags".to_string(),
        ];

        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(&task.short_id(), self.palette.id),
                    self.status_cell(task),
                    self.deadline_cell(task, now),
                    task.title.clone(),
                    task.tags
                        .iter()
                        .map(|tag| format!("+{tag}"))
                        .collect::<Vec<_>>()
                        .join(" "),
                ]
            })
            .collect();

        write_table(out, headers, rows)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, out, task, now), fields(id = %task.id))]
    pub fn write_task_info<W: Write>(
        &self,
        out: &mut W,
        task: &Task,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        if !task.description.is_empty() {
            writeln!(out, "description {}", task.description)?;
        }
        writeln!(out, "status      {}", self.status_cell(task))?;
        writeln!(out, "tags        {}", task.tags.join(", "))?;
        writeln!(out, "deadline    {}", self.deadline_cell(task, now))?;
        writeln!(out, "created     {}", format_local(task.created_at, &self.date_format))?;
        Ok(())
    }

    pub fn write_summary<W: Write>(
        &self,
        out: &mut W,
        settings: &AppSettings,
        progress: f64,
        counts: StatusCounts,
    ) -> anyhow::Result<()> {
        let filled = ((progress / 100.0) * PROGRESS_BAR_WIDTH as f64).round() as usize;
        let filled = filled.min(PROGRESS_BAR_WIDTH);
        let bar = format!(
            "[{}{}]",
            "#".repeat(filled),
            "-".repeat(PROGRESS_BAR_WIDTH - filled)
        );

        writeln!(
            out,
            "Semester {} .. {}",
            format_local(settings.semester_dates.start_date, "%Y-%m-%d"),
            format_local(settings.semester_dates.end_date, "%Y-%m-%d"),
        )?;
        writeln!(
            out,
            "{} {}% complete",
            self.paint(&bar, self.palette.accent),
            progress.round() as i64
        )?;
        writeln!(out)?;
        writeln!(
            out,
            "{}{}",
            self.paint(&format!("{:<10}", "Completed"), self.palette.completed),
            counts.completed
        )?;
        writeln!(out, "{:<10}{}", "Pending", counts.pending)?;
        writeln!(
            out,
            "{}{}",
            self.paint(&format!("{:<10}", "Missed"), self.palette.missed),
            counts.missed
        )?;
        Ok(())
    }

    pub fn write_settings<W: Write>(
        &self,
        out: &mut W,
        settings: &AppSettings,
    ) -> anyhow::Result<()> {
        writeln!(out, "theme           {}", settings.theme)?;
        writeln!(
            out,
            "semester start  {}",
            format_local(settings.semester_dates.start_date, "%Y-%m-%d")
        )?;
        writeln!(
            out,
            "semester end    {}",
            format_local(settings.semester_dates.end_date, "%Y-%m-%d")
        )?;
        Ok(())
    }

    pub fn write_tag_counts<W: Write>(
        &self,
        out: &mut W,
        counts: &[(String, usize)],
    ) -> anyhow::Result<()> {
        if counts.is_empty() {
            writeln!(out, "No tags.")?;
            return Ok(());
        }
        let rows = counts
            .iter()
            .map(|(tag, n)| vec![tag.clone(), n.to_string()])
            .collect();
        write_table(out, vec!["Tag".to_string(), "Tasks".to_string()], rows)
    }

    fn status_cell(&self, task: &Task) -> String {
        let status = TaskStatus::of(task);
        match status {
            TaskStatus::Completed => self.paint(status.as_str(), self.palette.completed),
            TaskStatus::Missed => self.paint(status.as_str(), self.palette.missed),
            TaskStatus::Pending => status.as_str().to_string(),
        }
    }

    fn deadline_cell(&self, task: &Task, now: DateTime<Utc>) -> String {
        let due = format_local(task.deadline, &self.date_format);
        if task.is_overdue(now) {
            self.paint(&due, self.palette.overdue)
        } else {
            due
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers
        .iter()
        .map(|header| UnicodeWidthStr::width(header.as_str()))
        .collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let write_row = |writer: &mut W, cells: &[String]| -> io::Result<()> {
        let line = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| {
                let visible = UnicodeWidthStr::width(strip_ansi(cell).as_str());
                format!("{cell}{}", " ".repeat(width.saturating_sub(visible)))
            })
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(writer, "{}", line.trim_end())
    };

    write_row(writer, &headers)?;
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    write_row(writer, &rule)?;
    for row in &rows {
        write_row(writer, row)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{Renderer, strip_ansi, write_table};
    use crate::config::Config;
    use crate::settings::Theme;
    use crate::filter::StatusCounts;
    use crate::settings::AppSettings;
    use crate::task::{NewTask, Task};

    #[test]
    fn table_columns_align_on_display_width() {
        let mut out = Vec::new();
        write_table(
            &mut out,
            vec!["A".to_string(), "B".to_string()],
            vec![
                vec!["数学".to_string(), "x".to_string()],
                vec!["\x1b[31mab\x1b[0m".to_string(), "y".to_string()],
            ],
        )
        .expect("write table");

        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "A    B");
        assert_eq!(lines[1], "---- -");
        assert_eq!(lines[2], "数学 x");
        assert_eq!(strip_ansi(lines[3]), "ab   y");
    }

    #[test]
    fn unrenderable_date_format_is_rejected_up_front() {
        let mut cfg = Config::default();
        cfg.apply_overrides([("rc.date.format".to_string(), "%Y %Q".to_string())]);
        assert!(Renderer::new(&cfg, Theme::Light).is_err());

        cfg.apply_overrides([("date.format".to_string(), "%d/%m %H:%M".to_string())]);
        assert!(Renderer::new(&cfg, Theme::Dark).is_ok());
    }

    #[test]
    fn task_table_shows_status_and_tags() {
        let now = Utc
            .with_ymd_and_hms(2026, 4, 1, 8, 0, 0)
            .single()
            .expect("valid now");
        let task = Task::from_input(
            NewTask {
                title: "Lab report".to_string(),
                tags: vec!["chem".to_string(), "lab".to_string()],
                deadline: now - Duration::hours(2),
                ..NewTask::default()
            },
            now,
        );

        let renderer = Renderer::plain("%Y-%m-%d");
        let mut out = Vec::new();
        renderer
            .write_task_table(&mut out, &[&task], now)
            .expect("write");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("missed"));
        assert!(text.contains("+chem +lab"));
        assert!(text.contains(&task.short_id()));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn summary_reports_rounded_progress() {
        let now = Utc
            .with_ymd_and_hms(2026, 4, 1, 8, 0, 0)
            .single()
            .expect("valid now");
        let renderer = Renderer::plain("%Y-%m-%d");
        let mut out = Vec::new();
        renderer
            .write_summary(
                &mut out,
                &AppSettings::initial(now),
                49.6,
                StatusCounts {
                    completed: 3,
                    pending: 2,
                    missed: 1,
                },
            )
            .expect("write");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("50% complete"));
        assert!(text.contains(&format!("[{}{}]", "#".repeat(15), "-".repeat(15))));
        assert!(text.contains("Missed    1"));
    }
}
