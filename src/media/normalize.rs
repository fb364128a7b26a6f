use super::types::{FormatOption, QualityClass, RawFormat};
use std::collections::{btree_map::Entry, BTreeMap, HashSet};

pub const DEFAULT_MIN_HEIGHT: u32 = 360;
pub const DEFAULT_SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

const AUDIO_LABEL: &str = "Audio (Best)";
const AUDIO_EXT: &str = "mp3";
const VIDEO_EXT: &str = "mp4";

/// Turns a backend's raw format list into the ranked, de-duplicated option
/// list callers see.
#[derive(Debug, Clone)]
pub struct FormatNormalizer {
    min_height: u32,
    size_units: Vec<String>,
}

impl Default for FormatNormalizer {
    fn default() -> Self {
        Self::new(
            DEFAULT_MIN_HEIGHT,
            DEFAULT_SIZE_UNITS.iter().map(|u| u.to_string()).collect(),
        )
    }
}

impl FormatNormalizer {
    pub fn new(min_height: u32, size_units: Vec<String>) -> Self {
        let size_units = if size_units.is_empty() {
            DEFAULT_SIZE_UNITS.iter().map(|u| u.to_string()).collect()
        } else {
            size_units
        };

        Self {
            min_height,
            size_units,
        }
    }

    /// Audio first (when any audio-only stream exists), then one video option
    /// per height, strictly descending, nothing below `min_height`.
    pub fn normalize(&self, raw: &[RawFormat], duration_secs: Option<f64>) -> Vec<FormatOption> {
        let mut options = Vec::new();
        let mut seen_labels = HashSet::new();

        let best_audio = best_audio(raw);
        let audio_size = best_audio.and_then(|audio| estimate_size(audio, duration_secs));

        if let Some(audio) = best_audio {
            seen_labels.insert(AUDIO_LABEL.to_string());
            options.push(FormatOption {
                label: AUDIO_LABEL.to_string(),
                quality_class: QualityClass::Audio,
                file_size_human: audio_size.map(|size| self.format_size(size)),
                url: audio.stream_url.clone(),
                extension: AUDIO_EXT.to_string(),
            });
        }

        let mut buckets: BTreeMap<u32, (&RawFormat, Option<f64>)> = BTreeMap::new();
        for format in raw {
            let Some(height) = format.height.filter(|h| *h > 0) else {
                continue;
            };
            let size = estimate_size(format, duration_secs);

            match buckets.entry(height) {
                Entry::Vacant(entry) => {
                    entry.insert((format, size));
                }
                Entry::Occupied(mut entry) => {
                    // strictly larger only, so the first-seen entry keeps ties
                    if size > entry.get().1 {
                        entry.insert((format, size));
                    }
                }
            }
        }

        for (&height, &(format, video_size)) in buckets.iter().rev() {
            if height < self.min_height {
                continue;
            }

            let (quality_class, suffix) = quality_for_height(height);
            let label = format!("{height}p {suffix}");
            if !seen_labels.insert(label.clone()) {
                continue;
            }

            let total_size = match (video_size, audio_size) {
                (Some(video), Some(audio)) if !format.has_audio() => Some(video + audio),
                (video, _) => video,
            };

            options.push(FormatOption {
                label,
                quality_class,
                file_size_human: total_size.map(|size| self.format_size(size)),
                url: format.stream_url.clone(),
                extension: VIDEO_EXT.to_string(),
            });
        }

        options
    }

    pub fn format_size(&self, bytes: f64) -> String {
        format_size_with(bytes, &self.size_units)
    }
}

/// Highest-bitrate audio-only stream; the first one wins a tie.
fn best_audio(raw: &[RawFormat]) -> Option<&RawFormat> {
    raw.iter()
        .filter(|format| format.is_audio_only())
        .fold(None, |best: Option<&RawFormat>, format| match best {
            Some(current)
                if format.bitrate_kbps.unwrap_or(0.0) <= current.bitrate_kbps.unwrap_or(0.0) =>
            {
                Some(current)
            }
            _ => Some(format),
        })
}

/// Declared size, or `kbps * 1024 * seconds / 8` when both are known.
pub fn estimate_size(format: &RawFormat, duration_secs: Option<f64>) -> Option<f64> {
    if let Some(size) = format.file_size_bytes {
        return Some(size as f64);
    }

    match (format.bitrate_kbps, duration_secs) {
        (Some(kbps), Some(secs)) if kbps > 0.0 && secs > 0.0 => Some(kbps * 1024.0 * secs / 8.0),
        _ => None,
    }
}

pub fn quality_for_height(height: u32) -> (QualityClass, &'static str) {
    if height >= 2160 {
        (QualityClass::FourK, "4K")
    } else if height >= 1440 {
        (QualityClass::TwoK, "2K")
    } else if height >= 1080 {
        (QualityClass::Hd, "Full HD")
    } else if height >= 720 {
        (QualityClass::Hd, "HD")
    } else {
        (QualityClass::Sd, "SD")
    }
}

/// Binary units, one decimal place.
pub fn format_size_with(bytes: f64, units: &[String]) -> String {
    let Some((largest, smaller)) = units.split_last() else {
        return format!("{bytes:.1}");
    };

    let mut value = bytes;
    for unit in smaller {
        if value < 1024.0 {
            return format!("{value:.1} {unit}");
        }
        value /= 1024.0;
    }

    format!("{value:.1} {largest}")
}
