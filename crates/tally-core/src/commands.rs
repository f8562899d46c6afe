use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::cli::{Command, TaskFields};
use crate::datastore::{Storage, encode_state};
use crate::datetime::{parse_day, parse_deadline};
use crate::filter::{Filter, count_by_status};
use crate::progress::semester_progress;
use crate::render::Renderer;
use crate::settings::{SemesterDates, SettingsPatch, Theme};
use crate::store::TaskStore;
use crate::task::{NewTask, TaskId, parse_tag_list, short_task_id};

#[instrument(skip(store, renderer, command, now, out))]
pub fn dispatch<S: Storage, W: Write>(
    store: &mut TaskStore<S>,
    renderer: &Renderer,
    command: Command,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Summary => cmd_summary(store, renderer, now, out),
        Command::List { terms } => cmd_list(store, renderer, &terms, now, out),
        Command::Add { title, fields } => cmd_add(store, &title, fields, now, out),
        Command::Edit { id, title, fields } => cmd_edit(store, &id, title, fields, now, out),
        Command::Done { id } => cmd_done(store, &id, out),
        Command::Delete { id } => cmd_delete(store, &id, out),
        Command::Info { id } => cmd_info(store, renderer, &id, now, out),
        Command::Tags => cmd_tags(store, renderer, out),
        Command::Settings { theme, start, end } => {
            cmd_settings(store, renderer, theme, start, end, now, out)
        }
        Command::Export => cmd_export(store, out),
    }
}

fn cmd_summary<S: Storage, W: Write>(
    store: &TaskStore<S>,
    renderer: &Renderer,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command summary");
    let settings = store.settings();
    let progress = semester_progress(&settings.semester_dates, now);
    let counts = count_by_status(store.tasks());
    renderer.write_summary(out, settings, progress, counts)
}

fn cmd_list<S: Storage, W: Write>(
    store: &TaskStore<S>,
    renderer: &Renderer,
    terms: &[String],
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command list");
    let filter = Filter::parse(terms)?;
    let rows = filter.select(store.tasks());
    debug!(rows = rows.len(), status = ?filter.status, "selected tasks");
    renderer.write_task_table(out, &rows, now)
}

fn cmd_add<S: Storage, W: Write>(
    store: &mut TaskStore<S>,
    title_words: &[String],
    fields: TaskFields,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command add");

    let title = title_words.join(" ").trim().to_string();
    if title.is_empty() {
        return Err(anyhow!("add requires a non-empty title"));
    }

    let deadline = match fields.due.as_deref() {
        Some(expr) => parse_deadline(expr, now).context("invalid --due")?,
        None => now,
    };
    let input = NewTask {
        title,
        description: fields.description,
        tags: fields.tags.as_deref().map(parse_tag_list).unwrap_or_default(),
        deadline,
    };

    let task = store.add_task(input, now);
    if task.missed {
        writeln!(out, "Created task {} (deadline already passed).", task.short_id())?;
    } else {
        writeln!(out, "Created task {}.", task.short_id())?;
    }
    Ok(())
}

fn cmd_edit<S: Storage, W: Write>(
    store: &mut TaskStore<S>,
    id_prefix: &str,
    title: Option<String>,
    fields: TaskFields,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command edit");

    let id = resolve_task_id(store, id_prefix)?;
    let mut task = store
        .get(id)
        .cloned()
        .ok_or_else(|| anyhow!("task disappeared: {id}"))?;

    if let Some(title) = title {
        let title = title.trim().to_string();
        if title.is_empty() {
            return Err(anyhow!("title cannot be empty"));
        }
        task.title = title;
    }
    if let Some(description) = fields.description {
        task.description = description;
    }
    if let Some(tags) = fields.tags.as_deref() {
        task.tags = parse_tag_list(tags);
    }
    if let Some(expr) = fields.due.as_deref() {
        task.deadline = parse_deadline(expr, now).context("invalid --due")?;
    }

    let short = task.short_id();
    store.update_task(task, now);
    writeln!(out, "Updated task {short}.")?;
    Ok(())
}

fn cmd_done<S: Storage, W: Write>(
    store: &mut TaskStore<S>,
    id_prefix: &str,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command done");

    let id = resolve_task_id(store, id_prefix)?;
    store.complete_task(id);
    let completed = store.get(id).is_some_and(|t| t.completed);
    let verb = if completed { "Completed" } else { "Reopened" };
    writeln!(out, "{verb} task {}.", short_task_id(id))?;
    Ok(())
}

fn cmd_delete<S: Storage, W: Write>(
    store: &mut TaskStore<S>,
    id_prefix: &str,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command delete");

    let id = resolve_task_id(store, id_prefix)?;
    store.delete_task(id);
    writeln!(out, "Deleted task {}.", short_task_id(id))?;
    Ok(())
}

fn cmd_info<S: Storage, W: Write>(
    store: &TaskStore<S>,
    renderer: &Renderer,
    id_prefix: &str,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command info");

    let id = resolve_task_id(store, id_prefix)?;
    let task = store
        .get(id)
        .ok_or_else(|| anyhow!("task disappeared: {id}"))?;
    renderer.write_task_info(out, task, now)
}

fn cmd_tags<S: Storage, W: Write>(
    store: &TaskStore<S>,
    renderer: &Renderer,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command tags");

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for task in store.tasks() {
        for tag in &task.tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    let rows: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(tag, n)| (tag.to_string(), n))
        .collect();
    renderer.write_tag_counts(out, &rows)
}

fn cmd_settings<S: Storage, W: Write>(
    store: &mut TaskStore<S>,
    renderer: &Renderer,
    theme: Option<String>,
    start: Option<String>,
    end: Option<String>,
    now: DateTime<Utc>,
    out: &mut W,
) -> anyhow::Result<()> {
    info!("command settings");

    let mut patch = SettingsPatch {
        theme: theme.as_deref().map(str::parse::<Theme>).transpose()?,
        ..SettingsPatch::default()
    };

    if start.is_some() || end.is_some() {
        let current = store.settings().semester_dates;
        let start_date = match start.as_deref() {
            Some(expr) => parse_day(expr, now).context("invalid --start")?,
            None => current.start_date,
        };
        let end_date = match end.as_deref() {
            Some(expr) => parse_day(expr, now).context("invalid --end")?,
            None => current.end_date,
        };
        if end_date < start_date {
            warn!(%start_date, %end_date, "semester ends before it starts");
        }
        patch.semester_dates = Some(SemesterDates {
            start_date,
            end_date,
        });
    }

    store.update_settings(patch);
    renderer.write_settings(out, store.settings())
}

fn cmd_export<S: Storage, W: Write>(store: &TaskStore<S>, out: &mut W) -> anyhow::Result<()> {
    info!("command export");
    let payload = encode_state(store.state())?;
    writeln!(out, "{payload}")?;
    Ok(())
}

/// Resolves a full id or a unique id prefix to a stored task id.
pub fn resolve_task_id<S: Storage>(store: &TaskStore<S>, prefix: &str) -> anyhow::Result<TaskId> {
    let needle: String = prefix
        .trim()
        .chars()
        .filter(|c| *c != '-')
        .collect::<String>()
        .to_ascii_lowercase();
    if needle.is_empty() {
        return Err(anyhow!("task id cannot be empty"));
    }

    let mut matches = store
        .tasks()
        .iter()
        .filter(|task| task.id.simple().to_string().starts_with(&needle));

    let first = matches
        .next()
        .ok_or_else(|| anyhow!("no task matches id: {prefix}"))?;
    if matches.next().is_some() {
        return Err(anyhow!("task id is ambiguous: {prefix}"));
    }
    Ok(first.id)
}
