// tc-protocol: Broadcaster wire contract types and serialization.
//
// Everything a broadcaster sees on the wire is defined here: the request
// value types clients submit, the per-dispatch transcode configuration
// carried in a request header, and the custom header names themselves.
// JSON field names are frozen — renaming any of them breaks deployed
// broadcasters and stored request blobs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Header names
// ---------------------------------------------------------------------------

/// Media type a segment dispatch asks for (`Accept`) and expects back
/// (`Content-Type`) on a successful response.
pub const MULTIPART_MIXED: &str = "multipart/mixed";

/// Segment duration in integer milliseconds.
pub const CONTENT_DURATION: &str = "Content-Duration";

/// Source resolution advertised to the broadcaster.
pub const CONTENT_RESOLUTION: &str = "Content-Resolution";

/// The JSON-serialized [`TranscodeConfig`] rides on this header.
pub const TRANSCODE_CONFIGURATION: &str = "Livepeer-Transcode-Configuration";

/// Advertised resolution is fixed; broadcasters parse it but it does not
/// feed into the work performed.
pub const SOURCE_RESOLUTION: &str = "1920x1080";

// ---------------------------------------------------------------------------
// Request value types
// ---------------------------------------------------------------------------

/// An input or storage descriptor on a transcode request.
///
/// `kind` is `"s3"` for object-store inputs (the remaining fields locate
/// the object); for previously uploaded files only `path` is meaningful
/// and carries the upload's original filename.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeSource {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(rename = "accessKeyId", default)]
    pub access_key_id: String,
    #[serde(rename = "secretAccessKey", default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub path: String,
}

/// One requested output destination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeOutput {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub path: String,
}

/// One rendition the broadcaster is asked to produce.
///
/// Optional fields are omitted from the JSON entirely when unset; the
/// broadcaster applies its own defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub width: i32,
    pub height: i32,
    pub encoder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<i32>,
    #[serde(rename = "fpsDen", default, skip_serializing_if = "Option::is_none")]
    pub fps_den: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gop: Option<String>,
    #[serde(rename = "colorDepth", default, skip_serializing_if = "Option::is_none")]
    pub color_depth: Option<i32>,
    #[serde(rename = "chromaFormat", default, skip_serializing_if = "Option::is_none")]
    pub chroma_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<i32>,
}

/// A user-submitted transcode request.
///
/// Stored verbatim (serialized) on the job record so a queued job can be
/// re-entered later with exactly the request it was submitted with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    #[serde(default)]
    pub input: TranscodeSource,
    #[serde(default)]
    pub storage: TranscodeSource,
    #[serde(default)]
    pub outputs: Vec<TranscodeOutput>,
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub parallel_transcoding: bool,
}

// ---------------------------------------------------------------------------
// Per-dispatch transcode configuration
// ---------------------------------------------------------------------------

/// The payload carried on [`TRANSCODE_CONFIGURATION`] with every segment
/// dispatch.
///
/// `manifest_id` here is a fresh UUID per dispatch and is deliberately NOT
/// the job-level manifest id that appears in the dispatch URL — the two
/// identify different things (a billing/session handle vs. a job).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeConfig {
    #[serde(rename = "manifestID")]
    pub manifest_id: String,
    #[serde(rename = "timeoutMultiplier")]
    pub timeout_multiplier: i64,
    pub profiles: Vec<Profile>,
}

impl TranscodeConfig {
    /// Build the configuration for one dispatch of a job whose target
    /// segment duration is `target_seg_dur` seconds.
    pub fn new(target_seg_dur: u64, profiles: Vec<Profile>) -> Self {
        TranscodeConfig {
            manifest_id: Uuid::new_v4().to_string(),
            timeout_multiplier: (target_seg_dur * 100) as i64,
            profiles,
        }
    }

    /// Serialize for the request header.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
