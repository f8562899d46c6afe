pub mod cli;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod datetime;
pub mod filter;
pub mod progress;
pub mod render;
pub mod settings;
pub mod store;
pub mod task;

use std::ffi::OsString;
use std::io;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use tracing::{
  debug,
  info,
  warn
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args);
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting tally"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.tallyrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let storage =
    datastore::FileStorage::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open storage at \
         {}",
        data_dir.display()
      )
    })?;

  let now = Utc::now();
  let mut store =
    store::TaskStore::hydrate(
      storage, now
    );

  let renderer = render::Renderer::new(
    &cfg,
    store.settings().theme
  )?;
  let command = match cli.command {
    | Some(command) => command,
    | None => {
      cli::Command::from_default_view(
        &cfg.get_or(
          "default.view",
          "summary"
        )
      )?
    }
  };

  let mut out = io::stdout().lock();
  commands::dispatch(
    &mut store,
    &renderer,
    command,
    now,
    &mut out
  )?;

  if store.has_unsaved_changes()
    && let Err(err) = store.flush()
  {
    warn!(
      error = %format!("{err:#}"),
      "failed to write state on exit"
    );
  }

  info!("done");
  Ok(())
}
