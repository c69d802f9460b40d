//! Broadcaster registry loading.
//!
//! The registry is a plain text file, one broadcaster per line:
//! `url|user|password`. It is re-read for every job (and every scanner
//! tick) so endpoints can be rotated without a restart.
//!
//! Parsing is forgiving: lines whose URL does not parse are skipped with a
//! warning, lines with fewer than three `|`-separated fields are ignored
//! outright. Order in the file is dispatch order.

use std::path::Path;
use thiserror::Error;
use tracing::warn;
use url::Url;

/// File name inside the data directory.
pub const BROADCASTERS_FILE: &str = "broadcasters.list";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A remote transcoder endpoint.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    pub url: Url,
    pub auth: Option<BasicAuth>,
}

/// HTTP Basic credentials for a broadcaster.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("reading broadcaster list '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load the ordered broadcaster list from `path`.
pub fn load_broadcasters(path: &Path) -> Result<Vec<Broadcaster>, RegistryError> {
    let text = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let mut broadcasters = Vec::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('|').collect();
        let url = match Url::parse(fields[0]) {
            Ok(url) => url,
            Err(err) => {
                warn!(line, error = %err, "broadcaster list - could not parse url");
                continue;
            }
        };
        if fields.len() < 3 {
            continue;
        }
        let auth = if fields[1].is_empty() {
            None
        } else {
            Some(BasicAuth {
                user: fields[1].to_owned(),
                password: fields[2].to_owned(),
            })
        };
        broadcasters.push(Broadcaster { url, auth });
    }

    Ok(broadcasters)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
