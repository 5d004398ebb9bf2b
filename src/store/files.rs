use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StoreError;
use crate::store::{KvStore, Write};

const VALUE_SUFFIX: &str = ".json";
const STAGING_PREFIX: &str = ".womb.staged.";

static STAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One `<key>.json` file per key in a directory. Key bytes other than ASCII
/// letters, digits, `_` and `-` are written as `%XX`, so every key names
/// exactly one file inside the directory.
///
/// A batch is staged before anything visible changes: each put is written
/// and synced to a hidden sibling file, then the staged files are renamed
/// over their targets in batch order. A failure while staging leaves the
/// directory as it was.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn open(root: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(file_name_for(key)?))
    }

    fn stage(&self, value: &str) -> io::Result<PathBuf> {
        let path = self.root.join(format!(
            "{STAGING_PREFIX}{}.{}",
            std::process::id(),
            STAGE_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let mut file = OpenOptions::new().create_new(true).write(true).open(&path)?;
        let written = file.write_all(value.as_bytes()).and_then(|()| file.sync_all());
        if let Err(err) = written {
            let _ = fs::remove_file(&path);
            return Err(err);
        }
        Ok(path)
    }
}

impl KvStore for JsonDirStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn apply(&mut self, writes: &[Write]) -> Result<(), StoreError> {
        let targets = writes
            .iter()
            .map(|write| self.path_for(write.key()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut staged: Vec<Option<PathBuf>> = Vec::with_capacity(writes.len());
        for write in writes {
            let Write::Put { value, .. } = write else {
                staged.push(None);
                continue;
            };
            match self.stage(value) {
                Ok(path) => staged.push(Some(path)),
                Err(err) => {
                    discard(staged.iter().flatten());
                    return Err(err.into());
                }
            }
        }

        for (index, target) in targets.iter().enumerate() {
            let result = match &staged[index] {
                Some(temp) => fs::rename(temp, target),
                None => match fs::remove_file(target) {
                    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
                    other => other,
                },
            };
            if let Err(err) = result {
                discard(staged[index..].iter().flatten());
                return Err(err.into());
            }
        }
        sync_dir(&self.root)?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(key) = key_from_file_name(&name)
                && key.starts_with(prefix)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn discard<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        let _ = fs::remove_file(path);
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-')
}

fn file_name_for(key: &str) -> Result<String, StoreError> {
    if key.is_empty() {
        return Err(StoreError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty key cannot be stored as a file name",
        )));
    }
    let mut name = String::with_capacity(key.len() + VALUE_SUFFIX.len());
    for byte in key.bytes() {
        if is_plain(byte) {
            name.push(char::from(byte));
        } else {
            name.push_str(&format!("%{byte:02X}"));
        }
    }
    name.push_str(VALUE_SUFFIX);
    Ok(name)
}

/// Inverse of `file_name_for`. Names it could not have produced, staged
/// files included, yield `None`.
fn key_from_file_name(name: &str) -> Option<String> {
    let mut rest = name.strip_suffix(VALUE_SUFFIX)?.as_bytes();
    if rest.is_empty() {
        return None;
    }
    let mut bytes = Vec::with_capacity(rest.len());
    while let Some((&first, tail)) = rest.split_first() {
        if is_plain(first) {
            bytes.push(first);
            rest = tail;
            continue;
        }
        if first != b'%' {
            return None;
        }
        let (hi, lo) = match tail {
            [hi, lo, ..] => (hex_value(*hi)?, hex_value(*lo)?),
            _ => return None,
        };
        bytes.push((hi << 4) | lo);
        rest = &tail[2..];
    }
    String::from_utf8(bytes).ok()
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("list dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn stores_each_key_as_a_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonDirStore::open(dir.path()).expect("open");

        store.set("womb_stories", "[]").expect("set");
        assert_eq!(
            fs::read_to_string(dir.path().join("womb_stories.json")).expect("read file"),
            "[]"
        );
        assert_eq!(store.get("womb_stories").expect("get").as_deref(), Some("[]"));
        assert_eq!(store.get("missing").expect("get missing"), None);

        store.set("womb_stories", r#"[{"id":"1"}]"#).expect("overwrite");
        assert_eq!(
            store.get("womb_stories").expect("get").as_deref(),
            Some(r#"[{"id":"1"}]"#)
        );
    }

    #[test]
    fn remove_is_idempotent_and_prefix_listing_is_sorted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonDirStore::open(dir.path()).expect("open");
        store.set("womb_chat_2", "[]").expect("set 2");
        store.set("womb_chat_1", "[]").expect("set 1");
        store.set("womb_stories", "[]").expect("set stories");

        assert_eq!(
            store.keys_with_prefix("womb_chat_").expect("list"),
            vec!["womb_chat_1".to_string(), "womb_chat_2".to_string()]
        );

        store.remove("womb_chat_1").expect("remove");
        store.remove("womb_chat_1").expect("remove again");
        assert_eq!(store.get("womb_chat_1").expect("get"), None);
    }

    #[test]
    fn any_key_maps_to_a_file_inside_the_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("kv");
        let mut store = JsonDirStore::open(&root).expect("open");

        for key in ["womb_chat_my story", "../outside", "womb_chat_é/x.y%"] {
            store.set(key, "[1]").expect("set");
            assert_eq!(store.get(key).expect("get").as_deref(), Some("[1]"));
        }
        assert!(root.join("%2E%2E%2Foutside.json").exists());
        assert!(!dir.path().join("outside.json").exists());
        assert_eq!(
            store.keys_with_prefix("womb_chat_").expect("list"),
            vec![
                "womb_chat_my story".to_string(),
                "womb_chat_é/x.y%".to_string()
            ]
        );

        store.remove("womb_chat_my story").expect("remove");
        assert_eq!(store.get("womb_chat_my story").expect("get"), None);
    }

    #[test]
    fn foreign_files_are_not_listed_as_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonDirStore::open(dir.path()).expect("open");
        fs::write(dir.path().join("womb_chat_a.b.json"), "[]").expect("seed");
        fs::write(dir.path().join("womb_chat_%2f.json"), "[]").expect("seed");
        fs::write(dir.path().join(format!("{STAGING_PREFIX}1.2")), "[]").expect("seed");
        assert!(store.keys_with_prefix("").expect("list").is_empty());
    }

    #[test]
    fn a_batch_with_an_unusable_key_writes_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonDirStore::open(dir.path()).expect("open");
        store.set("womb_chat_s", "[]").expect("seed");

        let writes = vec![
            Write::Put {
                key: "womb_stories".to_string(),
                value: "[]".to_string(),
            },
            Write::Remove {
                key: "womb_chat_s".to_string(),
            },
            Write::Put {
                key: String::new(),
                value: "[]".to_string(),
            },
        ];
        assert!(store.apply(&writes).is_err());
        assert_eq!(file_names(dir.path()), vec!["womb_chat_s.json".to_string()]);
    }

    #[test]
    fn batches_leave_no_staged_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = JsonDirStore::open(dir.path()).expect("open");
        let writes = vec![
            Write::Put {
                key: "deborah_history_logs_v1".to_string(),
                value: "[]".to_string(),
            },
            Write::Put {
                key: "womb_stories".to_string(),
                value: "[]".to_string(),
            },
        ];
        store.apply(&writes).expect("first batch");
        store.apply(&writes).expect("second batch");
        assert_eq!(
            file_names(dir.path()),
            vec![
                "deborah_history_logs_v1.json".to_string(),
                "womb_stories.json".to_string()
            ]
        );
    }
}
