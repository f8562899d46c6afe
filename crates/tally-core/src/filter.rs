use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::trace;

use crate::task::Task;

/// Display bucket of a task. Exactly one
/// applies to every task.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash,
)]
pub enum TaskStatus {
  Pending,
  Completed,
  Missed
}

impl TaskStatus {
  #[must_use]
  pub fn of(task: &Task) -> Self {
    if task.completed {
      TaskStatus::Completed
    } else if task.missed {
      TaskStatus::Missed
    } else {
      TaskStatus::Pending
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      | TaskStatus::Pending => "pending",
      | TaskStatus::Completed => {
        "completed"
      }
      | TaskStatus::Missed => "missed"
    }
  }
}

impl fmt::Display for TaskStatus {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub enum StatusFilter {
  #[default]
  All,
  Completed,
  Pending,
  Missed
}

impl StatusFilter {
  #[must_use]
  pub fn admits(
    self,
    task: &Task
  ) -> bool {
    match self {
      | StatusFilter::All => true,
      | StatusFilter::Completed => {
        TaskStatus::of(task)
          == TaskStatus::Completed
      }
      | StatusFilter::Pending => {
        TaskStatus::of(task)
          == TaskStatus::Pending
      }
      | StatusFilter::Missed => {
        TaskStatus::of(task)
          == TaskStatus::Missed
      }
    }
  }
}

impl FromStr for StatusFilter {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(StatusFilter::All),
      | "completed" | "done" => {
        Ok(StatusFilter::Completed)
      }
      | "pending" | "incomplete" => {
        Ok(StatusFilter::Pending)
      }
      | "missed" => {
        Ok(StatusFilter::Missed)
      }
      | other => {
        Err(anyhow!(
          "unknown status filter: \
           {other}"
        ))
      }
    }
  }
}

/// Tasks split by status, each bucket in
/// collection order.
#[derive(Debug, Default)]
pub struct Buckets<'a> {
  pub completed: Vec<&'a Task>,
  pub pending:   Vec<&'a Task>,
  pub missed:    Vec<&'a Task>
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
)]
pub struct StatusCounts {
  pub completed: usize,
  pub pending:   usize,
  pub missed:    usize
}

impl StatusCounts {
  pub fn total(&self) -> usize {
    self.completed
      + self.pending
      + self.missed
  }
}

#[must_use]
pub fn partition(
  tasks: &[Task]
) -> Buckets<'_> {
  let mut out = Buckets::default();
  for task in tasks {
    match TaskStatus::of(task) {
      | TaskStatus::Completed => {
        out.completed.push(task)
      }
      | TaskStatus::Pending => {
        out.pending.push(task)
      }
      | TaskStatus::Missed => {
        out.missed.push(task)
      }
    }
  }
  out
}

#[must_use]
pub fn count_by_status(
  tasks: &[Task]
) -> StatusCounts {
  tasks.iter().fold(
    StatusCounts::default(),
    |mut acc, task| {
      match TaskStatus::of(task) {
        | TaskStatus::Completed => {
          acc.completed += 1
        }
        | TaskStatus::Pending => {
          acc.pending += 1
        }
        | TaskStatus::Missed => {
          acc.missed += 1
        }
      }
      acc
    }
  )
}

/// Earliest deadline first; equal
/// deadlines keep their relative order.
pub fn sort_by_deadline(
  tasks: &mut [&Task]
) {
  tasks.sort_by_key(|task| task.deadline);
}

/// List-view selection: a status bucket
/// plus `+tag` / `-tag` terms.
#[derive(Debug, Clone, Default)]
pub struct Filter {
  pub status:       StatusFilter,
  pub include_tags: Vec<String>,
  pub exclude_tags: Vec<String>
}

impl Filter {
  #[tracing::instrument(skip(terms))]
  pub fn parse(
    terms: &[String]
  ) -> anyhow::Result<Self> {
    let mut filter = Filter::default();
    let mut status_seen = false;

    for term in terms {
      let term = term.trim();
      if term.is_empty() {
        continue;
      }

      if let Some(tag) =
        term.strip_prefix('+')
      {
        filter
          .include_tags
          .push(non_empty_tag(tag)?);
      } else if let Some(tag) =
        term.strip_prefix('-')
      {
        filter
          .exclude_tags
          .push(non_empty_tag(tag)?);
      } else {
        if status_seen {
          return Err(anyhow!(
            "only one status filter \
             may be given, got \
             another: {term}"
          ));
        }
        filter.status = term.parse()?;
        status_seen = true;
      }
    }

    trace!(?filter, "parsed list filter");
    Ok(filter)
  }

  #[must_use]
  pub fn matches(
    &self,
    task: &Task
  ) -> bool {
    self.status.admits(task)
      && self
        .include_tags
        .iter()
        .all(|tag| task.has_tag(tag))
      && !self
        .exclude_tags
        .iter()
        .any(|tag| task.has_tag(tag))
  }

  /// Matching tasks in deadline order.
  #[must_use]
  pub fn select<'a>(
    &self,
    tasks: &'a [Task]
  ) -> Vec<&'a Task> {
    let mut rows: Vec<&Task> = tasks
      .iter()
      .filter(|task| self.matches(task))
      .collect();
    sort_by_deadline(&mut rows);
    rows
  }
}

fn non_empty_tag(
  raw: &str
) -> anyhow::Result<String> {
  let tag = raw.trim();
  if tag.is_empty() {
    return Err(anyhow!(
      "tag filter needs a tag name"
    ));
  }
  Ok(tag.to_string())
}
