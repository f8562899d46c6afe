use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "tally",
    version,
    about = "Tally: semester task and deadline tracker",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "tallyrc", global = true)]
    pub tallyrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Semester progress and task counts.
    Summary,

    /// List tasks in deadline order.
    List {
        /// Status bucket (all, completed, pending, missed) and +tag / -tag terms.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        terms: Vec<String>,
    },

    /// Record a new task.
    Add {
        title: Vec<String>,

        #[command(flatten)]
        fields: TaskFields,
    },

    /// Change fields of an existing task.
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[command(flatten)]
        fields: TaskFields,
    },

    /// Toggle completion of a task.
    Done { id: String },

    /// Remove a task.
    Delete { id: String },

    /// Show every field of a task.
    Info { id: String },

    /// Tags in use with task counts.
    Tags,

    /// Show or change settings.
    Settings {
        #[arg(long)]
        theme: Option<String>,

        /// Semester start day.
        #[arg(long)]
        start: Option<String>,

        /// Semester end day.
        #[arg(long)]
        end: Option<String>,
    },

    /// Print the stored state as JSON.
    Export,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFields {
    #[arg(short = 'd', long)]
    pub description: Option<String>,

    /// Comma-separated tags.
    #[arg(short = 't', long)]
    pub tags: Option<String>,

    /// Deadline expression (e.g. tomorrow, friday, 2026-05-01 17:00, +3d).
    #[arg(long)]
    pub due: Option<String>,
}

impl Command {
    /// Maps the `default.view` setting to a command.
    pub fn from_default_view(name: &str) -> anyhow::Result<Self> {
        match name.trim() {
            "summary" => Ok(Command::Summary),
            "tags" => Ok(Command::Tags),
            "settings" => Ok(Command::Settings {
                theme: None,
                start: None,
                end: None,
            }),
            other => {
                let terms = if other == "list" {
                    vec![]
                } else {
                    let rest = other.strip_prefix("list ").ok_or_else(|| {
                        anyhow!("invalid default.view: {other}")
                    })?;
                    rest.split_whitespace().map(str::to_string).collect()
                };
                Ok(Command::List { terms })
            }
        }
    }
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = match (quiet, verbose) {
        (q, _) if q >= 2 => "error",
        (1, _) => "warn",
        (_, v) if v >= 3 => "trace",
        (_, 2) => "debug",
        (_, 1) => "info",
        _ => "warn",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of argv.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> PreprocessedArgs {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let parsed = arg.to_str().and_then(|s| {
            let rest = s.strip_prefix("rc.")?;
            rest.split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()))
        });

        match parsed {
            Some((k, v)) => {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
            }
            None => cleaned.push(arg),
        }
    }

    PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, preprocess_args};

    fn os_args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&os_args(&[
            "tally",
            "rc.color=off",
            "list",
            "rc.date.format:%d",
            "pending",
        ]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.date.format".to_string(), "%d".to_string()),
            ]
        );
        assert_eq!(pre.cleaned_args, os_args(&["tally", "list", "pending"]));
    }

    #[test]
    fn list_accepts_negative_tag_terms() {
        let cli = GlobalCli::parse_from(["tally", "list", "pending", "-lab", "+math"]);
        assert_eq!(
            cli.command,
            Some(Command::List {
                terms: vec![
                    "pending".to_string(),
                    "-lab".to_string(),
                    "+math".to_string()
                ],
            })
        );
    }

    #[test]
    fn add_collects_title_words_and_fields() {
        let cli = GlobalCli::parse_from([
            "tally", "-v", "add", "Lab", "report", "--tags", "chem,lab", "--due", "friday",
        ]);
        assert_eq!(cli.verbose, 1);
        let Some(Command::Add { title, fields }) = cli.command else {
            panic!("expected add command");
        };
        assert_eq!(title, vec!["Lab".to_string(), "report".to_string()]);
        assert_eq!(fields.tags.as_deref(), Some("chem,lab"));
        assert_eq!(fields.due.as_deref(), Some("friday"));
    }

    #[test]
    fn default_view_names() {
        assert_eq!(
            Command::from_default_view("summary").expect("summary"),
            Command::Summary
        );
        assert_eq!(
            Command::from_default_view("list missed").expect("list"),
            Command::List {
                terms: vec!["missed".to_string()]
            }
        );
        assert!(Command::from_default_view("calendar").is_err());
    }
}
