use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

const RC_ENV_VAR: &str = "TALLYRC";
const RC_FILE_NAME: &str = ".tallyrc";

const DEFAULTS: &[(&str, &str)] = &[
  ("data.location", "~/.tally"),
  ("color", "on"),
  ("date.format", "%Y-%m-%d %H:%M"),
  ("default.view", "summary")
];

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    Config {
      map:          DEFAULTS
        .iter()
        .map(|(k, v)| {
          (k.to_string(), v.to_string())
        })
        .collect(),
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    match resolve_rc_path(rc_override)? {
      | Some(path) => {
        info!(rc = %path.display(), "loading rc file");
        cfg.load_file(&path)?;
      }
      | None => {
        debug!(
          "no rc file found; using \
           defaults"
        );
      }
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_or(
    &self,
    key: &str,
    fallback: &str
  ) -> String {
    self
      .get(key)
      .unwrap_or_else(|| {
        fallback.to_string()
      })
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(key, v))
      .transpose()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if self.loaded_files.contains(&path)
    {
      warn!(file = %path.display(), "rc file already loaded; skipping include cycle");
      return Ok(());
    }

    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(Path::to_path_buf)
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (idx, raw_line) in
      text.lines().enumerate()
    {
      let at = format!(
        "{}:{}",
        path.display(),
        idx + 1
      );
      match parse_rc_line(raw_line)
        .with_context(|| {
          format!("invalid rc line {at}")
        })? {
        | RcLine::Blank => {}
        | RcLine::Include(target) => {
          let target =
            resolve_include_path(
              &base_dir, &target
            )?;
          if target.exists() {
            debug!(at = %at, include = %target.display(), "following include");
            self.load_file(&target)?;
          } else {
            warn!(include = %target.display(), "missing include; skipped");
          }
        }
        | RcLine::Set(key, value) => {
          trace!(key = %key, value = %value, "rc value");
          self.map.insert(key, value);
        }
      }
    }

    Ok(())
  }
}

enum RcLine {
  Blank,
  Include(String),
  Set(String, String)
}

/// One rc line. `#` starts a comment
/// anywhere on the line.
fn parse_rc_line(
  raw: &str
) -> anyhow::Result<RcLine> {
  let line = raw
    .split('#')
    .next()
    .unwrap_or_default()
    .trim();
  if line.is_empty() {
    return Ok(RcLine::Blank);
  }
  if let Some(rest) =
    line.strip_prefix("include ")
  {
    return Ok(RcLine::Include(
      rest.trim().to_string()
    ));
  }

  let (key, value) =
    line.split_once('=').ok_or_else(
      || anyhow!("expected key=value: {line}")
    )?;
  let key = key.trim();
  if key.is_empty() {
    return Err(anyhow!(
      "missing key before '='"
    ));
  }
  Ok(RcLine::Set(
    key.to_string(),
    value.trim().to_string()
  ))
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  if let Some(path) = override_dir {
    return Ok(path.to_path_buf());
  }

  match cfg.get("data.location") {
    | Some(value)
      if !value.trim().is_empty() =>
    {
      Ok(expand_tilde(Path::new(
        value.trim()
      )))
    }
    | _ => {
      let home = dirs::home_dir()
        .ok_or_else(|| {
          anyhow!(
            "cannot determine home \
             directory"
          )
        })?;
      Ok(home.join(".tally"))
    }
  }
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping rc file"
    );
    return Ok(None);
  };
  let candidate =
    home.join(RC_FILE_NAME);
  Ok(candidate.exists().then_some(
    candidate
  ))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let expanded =
    expand_tilde(Path::new(include));
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(
  key: &str,
  s: &str
) -> anyhow::Result<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Ok(true),
    | "0" | "n" | "no" | "off"
    | "false" => Ok(false),
    | other => {
      Err(anyhow!(
        "invalid boolean for \
         {key}: {other}"
      ))
    }
  }
}

#[cfg(test)]
mod tests {
  use std::fs;
  use std::path::Path;

  use tempfile::tempdir;

  use super::{
    Config,
    resolve_data_dir
  };

  #[test]
  fn rc_file_with_include_and_comments()
  {
    let temp =
      tempdir().expect("tempdir");
    let extra =
      temp.path().join("extra.rc");
    fs::write(
      &extra,
      "date.format = %d/%m %H:%M\n"
    )
    .expect("write include");
    let rc = temp.path().join("main.rc");
    fs::write(
      &rc,
      "# tally settings\ncolor=off  # \
       no ansi\ninclude extra.rc\n\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load config");
    assert_eq!(
      cfg.get_bool("color")
        .expect("bool"),
      Some(false)
    );
    assert_eq!(
      cfg.get("date.format").as_deref(),
      Some("%d/%m %H:%M")
    );
    assert_eq!(
      cfg.get("default.view").as_deref(),
      Some("summary")
    );
    assert_eq!(cfg.loaded_files.len(), 2);
  }

  #[test]
  fn self_include_does_not_recurse() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("loop.rc");
    fs::write(
      &rc,
      "include loop.rc\ncolor=on\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load config");
    assert_eq!(cfg.loaded_files.len(), 1);
  }

  #[test]
  fn malformed_line_is_an_error() {
    let temp =
      tempdir().expect("tempdir");
    let rc = temp.path().join("bad.rc");
    fs::write(&rc, "color on\n")
      .expect("write rc");
    assert!(
      Config::load(Some(&rc)).is_err()
    );
  }

  #[test]
  fn overrides_and_data_dir() {
    let mut cfg = Config::default();
    cfg.apply_overrides([(
      "rc.data.location".to_string(),
      "/srv/tally".to_string()
    )]);
    assert_eq!(
      resolve_data_dir(&cfg, None)
        .expect("data dir"),
      Path::new("/srv/tally")
    );
    assert_eq!(
      resolve_data_dir(
        &cfg,
        Some(Path::new("/tmp/x"))
      )
      .expect("data dir"),
      Path::new("/tmp/x")
    );

    cfg.apply_overrides([(
      "color".to_string(),
      "maybe".to_string()
    )]);
    assert!(cfg.get_bool("color").is_err());
  }
}
