use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;

use crate::http::http_core::types::HeaderMap;

/// Name used when `Content-Disposition` is sent without a usable `filename`.
pub const NO_FILENAME_FALLBACK: &str = "output_file";

/// Picks the destination name for an upload.
///
/// With no `Content-Disposition` header the name is `video_<unix seconds>.mp4`,
/// so two uploads within the same second share a name and the later one wins.
/// A supplied `filename` is used verbatim unless sanitizing was requested, in
/// which case only its final path component survives.
#[derive(Clone, Copy, Debug)]
pub struct FilenameResolver {
    sanitize: bool,
}

impl FilenameResolver {
    pub fn new(sanitize: bool) -> FilenameResolver { FilenameResolver { sanitize } }

    pub fn resolve(&self, headers: &HeaderMap, now: DateTime<Utc>) -> String {
        let disposition = match headers.get("content-disposition") {
            Some(value) => value,
            None => return timestamped_name(now),
        };

        let supplied = disposition_params(disposition)
            .into_iter()
            .filter(|(key, _)| key == "filename")
            .map(|(_, value)| value)
            .last()
            .filter(|name| !name.is_empty());

        let name = match supplied {
            Some(name) => name,
            None => return NO_FILENAME_FALLBACK.to_string(),
        };

        if !self.sanitize {
            if name.contains('/') || name.contains('\\') {
                warn!(filename = %name, "client-supplied filename contains a path separator");
            }
            return name;
        }

        match final_component(&name) {
            Some(base) => base.to_string(),
            None => NO_FILENAME_FALLBACK.to_string(),
        }
    }
}

pub fn timestamped_name(now: DateTime<Utc>) -> String {
    format!("video_{}.mp4", now.timestamp())
}

/// Parameters of a header such as `form-data; name="f"; filename="a.mp4"`.
/// The leading disposition type is skipped, keys are lowercased and quoted
/// values unescaped. Semicolons inside quotes do not split parameters.
pub fn disposition_params(value: &str) -> Vec<(String, String)> {
    lazy_static! {
        static ref PARAM: Regex =
            Regex::new(r#";\s*([^=;\s]+)\s*=\s*("(?:[^"\\]|\\.)*"|[^;]*)"#).unwrap();
    }

    PARAM
        .captures_iter(value)
        .map(|caps| (caps[1].to_lowercase(), unquote(caps[2].trim())))
        .collect()
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1]
            .replace("\\\\", "\\")
            .replace("\\\"", "\"")
    } else {
        value.to_string()
    }
}

fn final_component(name: &str) -> Option<&str> {
    let base = name.rsplit(|c| c == '/' || c == '\\').next()?;
    match base {
        "" | "." | ".." => None,
        _ => Some(base),
    }
}
