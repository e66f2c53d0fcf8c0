use std::fmt;
use std::str::FromStr;

/// Container extensions accepted at upload.
pub const UPLOAD_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv"];

const UPLOAD_MIME_TYPES: &[&str] = &[
    "video/mp4",
    "video/x-matroska",
    "video/x-msvideo",
    "video/avi",
    "video/quicktime",
    "video/x-ms-wmv",
];

/// Containers the worker knows how to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Mp4,
    Mov,
    Avi,
    Webm,
    Flv,
    Mpeg,
}

/// Codec selection and extra engine flags for one target container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeProfile {
    pub video_codec: &'static str,
    pub audio_codec: &'static str,
    pub muxer: &'static str,
    pub extra_args: &'static [&'static str],
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 6] = [
        TargetFormat::Mp4,
        TargetFormat::Mov,
        TargetFormat::Avi,
        TargetFormat::Webm,
        TargetFormat::Flv,
        TargetFormat::Mpeg,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Mp4 => "mp4",
            TargetFormat::Mov => "mov",
            TargetFormat::Avi => "avi",
            TargetFormat::Webm => "webm",
            TargetFormat::Flv => "flv",
            TargetFormat::Mpeg => "mpeg",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            TargetFormat::Mp4 => "video/mp4",
            TargetFormat::Mov => "video/quicktime",
            TargetFormat::Avi => "video/x-msvideo",
            TargetFormat::Webm => "video/webm",
            TargetFormat::Flv => "video/x-flv",
            TargetFormat::Mpeg => "video/mpeg",
        }
    }

    pub fn profile(self) -> EncodeProfile {
        match self {
            TargetFormat::Mp4 | TargetFormat::Mov => EncodeProfile {
                video_codec: "libx264",
                audio_codec: "aac",
                muxer: self.extension(),
                extra_args: &["-movflags", "faststart"],
            },
            TargetFormat::Flv => EncodeProfile {
                video_codec: "libx264",
                audio_codec: "aac",
                muxer: "flv",
                extra_args: &["-preset", "veryfast", "-tune", "zerolatency"],
            },
            TargetFormat::Webm => EncodeProfile {
                video_codec: "libvpx",
                audio_codec: "libvorbis",
                muxer: "webm",
                extra_args: &["-deadline", "realtime", "-cpu-used", "5"],
            },
            TargetFormat::Avi => EncodeProfile {
                video_codec: "mpeg4",
                audio_codec: "ac3",
                muxer: "avi",
                extra_args: &["-q:v", "3"],
            },
            TargetFormat::Mpeg => EncodeProfile {
                video_codec: "mpeg2video",
                audio_codec: "mp2",
                muxer: "mpeg",
                extra_args: &["-q:v", "3"],
            },
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported target format '{0}'")]
pub struct UnsupportedFormat(pub String);

impl FromStr for TargetFormat {
    type Err = UnsupportedFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches('.').to_ascii_lowercase();
        TargetFormat::ALL
            .into_iter()
            .find(|f| f.extension() == normalized)
            .ok_or_else(|| UnsupportedFormat(s.to_string()))
    }
}

/// Content type for a stored original, by extension.
pub fn content_type_for_extension(extension: &str) -> String {
    match extension.parse::<TargetFormat>() {
        Ok(format) => format.content_type().to_string(),
        Err(_) => mime_guess::from_ext(extension)
            .first_or_octet_stream()
            .to_string(),
    }
}

/// Checks an uploaded file name and declared MIME type against the allow-list.
/// Returns the normalized extension on success.
///
/// A generic `application/octet-stream` declaration defers to the extension.
pub fn validate_upload(file_name: &str, content_type: Option<&str>) -> Result<String, String> {
    let extension = std::path::Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .ok_or_else(|| format!("File '{}' has no extension", file_name))?;

    if !UPLOAD_EXTENSIONS.contains(&extension.as_str()) {
        return Err(format!(
            "Only video files are allowed ({}), got '.{}'",
            UPLOAD_EXTENSIONS.join(", "),
            extension
        ));
    }

    let declared = content_type
        .and_then(|ct| ct.parse::<mime::Mime>().ok())
        .unwrap_or(mime::APPLICATION_OCTET_STREAM);

    let essence = declared.essence_str().to_ascii_lowercase();
    if essence == mime::APPLICATION_OCTET_STREAM.essence_str()
        || UPLOAD_MIME_TYPES.contains(&essence.as_str())
    {
        Ok(extension)
    } else {
        Err(format!("Unsupported media type '{}'", essence))
    }
}
