//! Codec candidates and negotiation
//!
//! Candidates are listed in priority order per channel. The first one the
//! backend supports wins; if none is supported the backend falls back to its
//! own default encoder.

use crate::protocol::Channel;

/// One selectable encoder configuration
#[derive(Debug, PartialEq, Eq)]
pub struct CodecProfile {
    /// Codec string sent as `mimeType`
    pub mime_type: &'static str,
    /// ffmpeg encoder that must be present
    pub encoder: &'static str,
    /// ffmpeg output arguments (codec, tuning, container)
    pub output_args: &'static [&'static str],
}

pub const VIDEO_CANDIDATES: &[CodecProfile] = &[
    CodecProfile {
        mime_type: "video/webm;codecs=vp9",
        encoder: "libvpx-vp9",
        output_args: &[
            "-c:v", "libvpx-vp9", "-deadline", "realtime", "-cpu-used", "8", "-row-mt", "1",
            "-b:v", "1500k", "-f", "webm",
        ],
    },
    CodecProfile {
        mime_type: "video/webm;codecs=vp8",
        encoder: "libvpx",
        output_args: &[
            "-c:v", "libvpx", "-deadline", "realtime", "-cpu-used", "8", "-b:v", "1500k", "-f",
            "webm",
        ],
    },
    CodecProfile {
        mime_type: "video/mp4;codecs=avc1",
        encoder: "libx264",
        output_args: &[
            "-c:v", "libx264", "-preset", "ultrafast", "-tune", "zerolatency", "-pix_fmt",
            "yuv420p", "-movflags", "frag_keyframe+empty_moov+default_base_moof", "-f", "mp4",
        ],
    },
];

pub const AUDIO_CANDIDATES: &[CodecProfile] = &[
    CodecProfile {
        mime_type: "audio/webm;codecs=opus",
        encoder: "libopus",
        output_args: &["-c:a", "libopus", "-b:a", "128k", "-f", "webm"],
    },
    CodecProfile {
        mime_type: "audio/ogg;codecs=opus",
        encoder: "libopus",
        output_args: &["-c:a", "libopus", "-b:a", "128k", "-f", "ogg"],
    },
    CodecProfile {
        mime_type: "audio/mp4;codecs=mp4a.40.2",
        encoder: "aac",
        output_args: &[
            "-c:a", "aac", "-b:a", "128k", "-movflags", "frag_keyframe+empty_moov", "-f", "mp4",
        ],
    },
];

/// Backend default when no candidate is supported: let ffmpeg pick codecs
pub const VIDEO_FALLBACK_MIME: &str = "video/x-matroska";
pub const AUDIO_FALLBACK_MIME: &str = "audio/x-matroska";

pub fn candidates(channel: Channel) -> &'static [CodecProfile] {
    match channel {
        Channel::Audio => AUDIO_CANDIDATES,
        Channel::Video => VIDEO_CANDIDATES,
    }
}

pub fn fallback_mime(channel: Channel) -> &'static str {
    match channel {
        Channel::Audio => AUDIO_FALLBACK_MIME,
        Channel::Video => VIDEO_FALLBACK_MIME,
    }
}

/// Look up a profile by its codec string
pub fn profile_for(mime_type: &str) -> Option<&'static CodecProfile> {
    AUDIO_CANDIDATES
        .iter()
        .chain(VIDEO_CANDIDATES.iter())
        .find(|p| p.mime_type == mime_type)
}

/// First supported candidate for `channel`, in priority order
pub fn select_profile<F>(channel: Channel, is_supported: F) -> Option<&'static CodecProfile>
where
    F: Fn(&str) -> bool,
{
    candidates(channel).iter().find(|p| is_supported(p.mime_type))
}

/// File extension for a chunk log holding `mime_type` data
pub fn extension_for(mime_type: &str) -> &'static str {
    let base = mime_type.split(';').next().unwrap_or("").trim();
    match base {
        "video/webm" | "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "video/mp4" | "audio/mp4" => "mp4",
        "video/x-matroska" | "audio/x-matroska" => "mkv",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let chosen = select_profile(Channel::Video, |_| true).unwrap();
        assert_eq!(chosen.mime_type, "video/webm;codecs=vp9");

        let chosen = select_profile(Channel::Video, |m| !m.contains("vp9")).unwrap();
        assert_eq!(chosen.mime_type, "video/webm;codecs=vp8");

        let chosen = select_profile(Channel::Audio, |m| m.starts_with("audio/ogg")).unwrap();
        assert_eq!(chosen.mime_type, "audio/ogg;codecs=opus");
    }

    #[test]
    fn test_no_supported_candidate() {
        assert!(select_profile(Channel::Audio, |_| false).is_none());
        assert_eq!(fallback_mime(Channel::Audio), "audio/x-matroska");
    }

    #[test]
    fn test_candidates_stay_on_their_channel() {
        assert!(AUDIO_CANDIDATES.iter().all(|p| p.mime_type.starts_with("audio/")));
        assert!(VIDEO_CANDIDATES.iter().all(|p| p.mime_type.starts_with("video/")));
    }

    #[test]
    fn test_extensions() {
        assert_eq!(extension_for("video/webm;codecs=vp8"), "webm");
        assert_eq!(extension_for("audio/ogg;codecs=opus"), "ogg");
        assert_eq!(extension_for("audio/x-matroska"), "mkv");
        assert_eq!(extension_for("application/octet-stream"), "bin");
        assert_eq!(profile_for("audio/webm;codecs=opus").unwrap().encoder, "libopus");
    }
}
