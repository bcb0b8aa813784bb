use std::{
    env, io,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Result};

pub const APPLICATION_NAME: &str = "keytally";
pub const SHARED_FILE_NAME: &str = "typing-stats.json";

pub fn create_application_default_path() -> Result<PathBuf> {
    let path = {
        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                let mut path = env::var("APPDATA")
                    .map(PathBuf::from)
                    .map_err(|_| anyhow!("APPDATA should be present on Windows"))?;
                path.push(APPLICATION_NAME);
                path
            } else {
                let mut path = env::var("XDG_STATE_HOME")
                    .map(PathBuf::from)
                    .or_else(|_| {
                        env::var("HOME").map(|home| {
                            let mut path = PathBuf::from(home);
                            path.push(".local/state");
                            path
                        })
                    })
                    .map_err(|_| anyhow!("Couldn't find neither XDG_STATE_HOME nor HOME"))?;
                path.push(APPLICATION_NAME);
                path
            }
        }
    };

    create_dir(path)
}

pub fn create_dir(path: PathBuf) -> Result<PathBuf> {
    match std::fs::create_dir_all(&path) {
        Ok(_) => Ok(path),
        Err(v) if v.kind() == io::ErrorKind::AlreadyExists => Ok(path),
        Err(v) => Err(v.into()),
    }
}

/// Picks the shared file location. iCloud Drive is preferred when it is present, because that is
/// what makes the counters travel between machines. Otherwise the file lives in the application
/// directory and any folder sync tool can be pointed at it with `--shared-file`.
pub fn default_shared_file(app_dir: &Path) -> PathBuf {
    let cloud_docs = env::var("HOME")
        .map(|home| PathBuf::from(home).join("Library/Mobile Documents/com~apple~CloudDocs"));
    match cloud_docs {
        Ok(cloud_docs) if cloud_docs.is_dir() => {
            cloud_docs.join("TypingStats").join(SHARED_FILE_NAME)
        }
        _ => app_dir.join(SHARED_FILE_NAME),
    }
}
