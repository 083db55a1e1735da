use anyhow::{Context as _, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Characters that would break a markdown link destination or a URL path segment.
const LINK_SEGMENT: &AsciiSet = &CONTROLS
  .add(b' ')
  .add(b'"')
  .add(b'#')
  .add(b'%')
  .add(b'(')
  .add(b')')
  .add(b'<')
  .add(b'>')
  .add(b'?')
  .add(b'[')
  .add(b']')
  .add(b'`')
  .add(b'{')
  .add(b'}');

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn to_posix_path(path: &Path) -> Result<String> {
  let s = path
    .to_str()
    .ok_or_else(|| anyhow::anyhow!("path is not valid UTF-8"))?;
  Ok(s.replace('\\', "/"))
}

/// Splits `0001. Two Sum` into `("0001", "Two Sum")`.
///
/// The id is exactly four ASCII digits; a fifth digit disqualifies the folder.
pub fn parse_note_folder(name: &str) -> Option<(&str, &str)> {
  let id = name.get(..4)?;
  if !id.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  let rest = &name[4..];
  if rest.starts_with(|c: char| c.is_ascii_digit()) {
    return None;
  }
  let title = rest.trim_start_matches(['.', '-', '_', ' ']).trim();
  Some((id, title))
}

pub fn note_folder_name(id: &str, title: &str) -> String {
  let title = title.trim();
  if title.is_empty() {
    id.to_string()
  } else {
    format!("{id}. {title}")
  }
}

/// Relative link from the knowledge-base root to a note document.
pub fn note_link(notes_dir: &str, folder_name: &str, doc_file: &str) -> String {
  let notes_dir = notes_dir.trim_matches('/');
  let folder = utf8_percent_encode(folder_name, LINK_SEGMENT);
  if notes_dir.is_empty() {
    format!("{folder}/{doc_file}")
  } else {
    format!("{notes_dir}/{folder}/{doc_file}")
  }
}

/// Replaces the folder component of `<notes>/<folder>/<file>`.
pub fn rebase_note_path(path: &Path, folder_name: &str) -> PathBuf {
  match (path.parent().and_then(Path::parent), path.file_name()) {
    (Some(notes_root), Some(file)) => notes_root.join(folder_name).join(file),
    _ => path.to_path_buf(),
  }
}

/// Writes `content` to a temporary sibling and renames it over `path`.
///
/// A failed write leaves the previous content of `path` untouched.
pub fn write_atomic(path: &Path, content: &str) -> Result<()> {
  let parent = match path.parent() {
    Some(p) if !p.as_os_str().is_empty() => p,
    _ => Path::new("."),
  };
  fs::create_dir_all(parent).with_context(|| format!("create dir: {}", parent.display()))?;

  let file_name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| "out".to_string());
  let tmp_path = parent.join(format!(
    ".{file_name}.{}.{}.tmp",
    std::process::id(),
    TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
  ));

  let write_result = (|| -> std::io::Result<()> {
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()
  })();
  if let Err(err) = write_result {
    if let Err(remove_err) = fs::remove_file(&tmp_path) {
      if remove_err.kind() != std::io::ErrorKind::NotFound {
        tracing::debug!(
          path = %tmp_path.display(),
          error = %remove_err,
          "failed to remove temporary file after write failure"
        );
      }
    }
    return Err(err).with_context(|| format!("write temp file for {}", path.display()));
  }

  if let Err(err) = fs::rename(&tmp_path, path) {
    let _ = fs::remove_file(&tmp_path);
    return Err(err).with_context(|| format!("replace {}", path.display()));
  }
  Ok(())
}

/// Atomic write that is skipped when the file already holds `content`.
/// Returns whether a write happened.
pub fn write_if_changed(path: &Path, content: &str) -> Result<bool> {
  match fs::read_to_string(path) {
    Ok(existing) if existing == content => return Ok(false),
    Ok(_) => {}
    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
    Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
  }
  write_atomic(path, content)?;
  Ok(true)
}
