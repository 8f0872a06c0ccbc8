//! On-disk console state.
//!
//! Layout under the console directory:
//!
//! ```text
//! INDEX            JSON array of ConsoleProcessInfo
//! <handle>         terminal output log
//! <handle>.env     captured shell environment (JSON object)
//! <handle>.envdump raw `env` output written by the shell, removed once read
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the process table index file.
pub const INDEX_FILE: &str = "INDEX";

const ENV_EXTENSION: &str = "env";
const ENV_DUMP_EXTENSION: &str = "envdump";

/// Reads and writes console logs, environment files and the table index.
#[derive(Debug, Clone)]
pub struct ConsoleStorage {
    dir: PathBuf,
    buffer_lines: usize,
    chunk_size: usize,
}

impl ConsoleStorage {
    /// Storage rooted at `dir`. Logs are trimmed to `buffer_lines` lines when
    /// read and chunked into pieces of at most `chunk_size` bytes.
    pub fn new(dir: impl Into<PathBuf>, buffer_lines: usize, chunk_size: usize) -> Self {
        Self {
            dir: dir.into(),
            buffer_lines,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the root directory if needed.
    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir)
    }

    /// Path of a terminal's output log.
    pub fn log_path(&self, handle: &str) -> PathBuf {
        self.dir.join(handle)
    }

    /// Path of a terminal's saved environment.
    pub fn env_path(&self, handle: &str) -> PathBuf {
        self.dir.join(format!("{handle}.{ENV_EXTENSION}"))
    }

    /// Path the shell dumps its environment into while it is captured.
    pub fn env_dump_path(&self, handle: &str) -> PathBuf {
        self.dir.join(format!("{handle}.{ENV_DUMP_EXTENSION}"))
    }

    /// Writes the table index atomically.
    pub fn save_index(&self, contents: &str) -> io::Result<()> {
        self.ensure_dir()?;
        let tmp = self.dir.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, self.dir.join(INDEX_FILE))
    }

    /// Reads the table index; `None` when it was never written.
    pub fn load_index(&self) -> io::Result<Option<String>> {
        match fs::read_to_string(self.dir.join(INDEX_FILE)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Appends output to a terminal log.
    pub fn append_log(&self, handle: &str, text: &str) -> io::Result<()> {
        self.ensure_dir()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(handle))?;
        file.write_all(text.as_bytes())
    }

    /// Saved output, trimmed to the configured number of trailing lines.
    pub fn read_log(&self, handle: &str) -> io::Result<String> {
        let contents = match fs::read(self.log_path(handle)) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(e),
        };
        Ok(trim_leading_lines(self.buffer_lines, &contents).to_string())
    }

    /// Number of lines in the trimmed saved output.
    pub fn log_line_count(&self, handle: &str) -> io::Result<usize> {
        Ok(self.read_log(handle)?.lines().count())
    }

    /// Chunk `chunk` of the trimmed saved output and whether more follow.
    pub fn log_chunk(&self, handle: &str, chunk: usize) -> io::Result<(String, bool)> {
        let contents = self.read_log(handle)?;
        Ok(chunk_at(&contents, self.chunk_size, chunk))
    }

    /// Deletes a terminal log, or keeps only its last line.
    pub fn delete_log(&self, handle: &str, last_line_only: bool) -> io::Result<()> {
        let path = self.log_path(handle);
        if last_line_only {
            let contents = match fs::read(&path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => return Err(e),
            };
            return fs::write(&path, last_line(&contents));
        }
        remove_if_exists(&path)
    }

    /// Saves a captured shell environment.
    pub fn save_env(&self, handle: &str, env: &[(String, String)]) -> io::Result<()> {
        self.ensure_dir()?;
        let map: BTreeMap<&str, &str> = env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        let json = serde_json::to_string(&map).map_err(io::Error::other)?;
        fs::write(self.env_path(handle), json)
    }

    /// Loads a saved shell environment; empty when none was saved.
    pub fn load_env(&self, handle: &str) -> io::Result<Vec<(String, String)>> {
        let contents = match fs::read_to_string(self.env_path(handle)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let map: BTreeMap<String, String> = serde_json::from_str(&contents)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(map.into_iter().collect())
    }

    /// Deletes a saved shell environment and any unread dump.
    pub fn delete_env(&self, handle: &str) -> io::Result<()> {
        remove_if_exists(&self.env_dump_path(handle))?;
        remove_if_exists(&self.env_path(handle))
    }

    /// Deletes logs and environment files whose handle is not in `known`.
    /// Returns the number of files removed.
    pub fn delete_orphaned_logs(&self, known: &HashSet<String>) -> io::Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(INDEX_FILE) {
                continue;
            }
            let handle = name
                .strip_suffix(&format!(".{ENV_EXTENSION}"))
                .or_else(|| name.strip_suffix(&format!(".{ENV_DUMP_EXTENSION}")))
                .unwrap_or(&name);
            if !known.contains(handle) {
                tracing::debug!(file = %name, "Removing orphaned console file");
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// The last `max_lines` lines of `text`.
pub fn trim_leading_lines(max_lines: usize, text: &str) -> &str {
    if max_lines == 0 {
        return "";
    }
    let body = text.strip_suffix('\n').unwrap_or(text);
    let mut count = 0;
    for (pos, c) in body.char_indices().rev() {
        if c == '\n' {
            count += 1;
            if count == max_lines {
                return &text[pos + 1..];
            }
        }
    }
    text
}

/// The last line of `text`, including its newline.
fn last_line(text: &str) -> &str {
    trim_leading_lines(1, text)
}

/// Splits `text` into chunks of at most `chunk_size` bytes at char
/// boundaries and returns chunk `index` and whether more follow.
fn chunk_at(text: &str, chunk_size: usize, index: usize) -> (String, bool) {
    let mut start = 0;
    let mut current = 0;
    while start < text.len() {
        let mut end = (start + chunk_size).min(text.len());
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // a single char wider than the chunk size
            end = start + text[start..].chars().next().map_or(1, char::len_utf8);
        }
        if current == index {
            return (text[start..end].to_string(), end < text.len());
        }
        start = end;
        current += 1;
    }
    (String::new(), false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> ConsoleStorage {
        ConsoleStorage::new(dir.path().join("console"), 1000, 8192)
    }

    #[test]
    fn test_index_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        assert_eq!(storage.load_index().unwrap(), None);

        storage.save_index("[]").unwrap();
        assert_eq!(storage.load_index().unwrap().as_deref(), Some("[]"));
        assert!(!storage.dir().join("INDEX.tmp").exists());
    }

    #[test]
    fn test_log_append_and_read() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        assert_eq!(storage.read_log("h1").unwrap(), "");

        storage.append_log("h1", "hello ").unwrap();
        storage.append_log("h1", "world\n").unwrap();
        assert_eq!(storage.read_log("h1").unwrap(), "hello world\n");
        assert_eq!(storage.log_line_count("h1").unwrap(), 1);
    }

    #[test]
    fn test_read_log_trims_to_buffer_lines() {
        let dir = TempDir::new().unwrap();
        let storage = ConsoleStorage::new(dir.path(), 2, 8192);
        storage.append_log("h1", "a\nb\nc\nd\n").unwrap();
        assert_eq!(storage.read_log("h1").unwrap(), "c\nd\n");
    }

    #[test]
    fn test_delete_log_variants() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage.append_log("h1", "one\ntwo\n$ ").unwrap();

        storage.delete_log("h1", true).unwrap();
        assert_eq!(storage.read_log("h1").unwrap(), "$ ");

        storage.delete_log("h1", false).unwrap();
        assert!(!storage.log_path("h1").exists());
        // deleting a missing log is fine
        storage.delete_log("h1", false).unwrap();
        storage.delete_log("h1", true).unwrap();
    }

    #[test]
    fn test_chunks() {
        let dir = TempDir::new().unwrap();
        let storage = ConsoleStorage::new(dir.path(), 1000, 4);
        storage.append_log("h1", "abcdefghij").unwrap();

        assert_eq!(storage.log_chunk("h1", 0).unwrap(), ("abcd".to_string(), true));
        assert_eq!(storage.log_chunk("h1", 2).unwrap(), ("ij".to_string(), false));
        assert_eq!(storage.log_chunk("h1", 3).unwrap(), (String::new(), false));
    }

    #[test]
    fn test_chunks_respect_char_boundaries() {
        let (first, more) = chunk_at("ééé", 3, 0);
        assert_eq!(first, "é");
        assert!(more);
        let (last, more) = chunk_at("ééé", 3, 2);
        assert_eq!(last, "é");
        assert!(!more);
    }

    #[test]
    fn test_env_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        assert!(storage.load_env("h1").unwrap().is_empty());

        let env = vec![
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("FOO".to_string(), "bar".to_string()),
        ];
        storage.save_env("h1", &env).unwrap();
        let loaded = storage.load_env("h1").unwrap();
        assert!(loaded.contains(&("FOO".to_string(), "bar".to_string())));
        assert_eq!(loaded.len(), 2);

        fs::write(storage.env_dump_path("h1"), "FOO=bar\n").unwrap();
        storage.delete_env("h1").unwrap();
        assert!(storage.load_env("h1").unwrap().is_empty());
        assert!(!storage.env_dump_path("h1").exists());
    }

    #[test]
    fn test_delete_orphaned_logs() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage.save_index("[]").unwrap();
        storage.append_log("keep", "x").unwrap();
        storage.append_log("gone", "y").unwrap();
        storage.save_env("gone", &[]).unwrap();
        fs::write(storage.env_dump_path("gone"), "A=1\n").unwrap();
        fs::write(storage.env_dump_path("keep"), "A=1\n").unwrap();

        let known: HashSet<String> = ["keep".to_string()].into_iter().collect();
        assert_eq!(storage.delete_orphaned_logs(&known).unwrap(), 3);
        assert!(storage.log_path("keep").exists());
        assert!(storage.env_dump_path("keep").exists());
        assert!(!storage.env_dump_path("gone").exists());
        assert!(!storage.log_path("gone").exists());
        assert!(!storage.env_path("gone").exists());
        assert!(storage.dir().join(INDEX_FILE).exists());
    }

    #[test]
    fn test_trim_leading_lines() {
        assert_eq!(trim_leading_lines(2, "a\nb\nc\n"), "b\nc\n");
        assert_eq!(trim_leading_lines(2, "a\nb\nc"), "b\nc");
        assert_eq!(trim_leading_lines(5, "a\nb\n"), "a\nb\n");
        assert_eq!(trim_leading_lines(1, "prompt $ "), "prompt $ ");
    }
}
