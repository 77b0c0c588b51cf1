use serde::{Deserialize, Serialize};

/// Available conversion presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionPreset {
    #[serde(rename = "dnxhd_1080p")]
    Dnxhd1080p,
    #[serde(rename = "dnxhd_4k")]
    Dnxhd4k,
    ProresProxy,
    ProresLt,
    #[serde(rename = "prores_422")]
    Prores422,
    ProresHq,
    #[serde(rename = "h264_high")]
    H264High,
    #[serde(rename = "h264_medium")]
    H264Medium,
    #[serde(rename = "h265_high")]
    H265High,
    #[serde(rename = "h265_medium")]
    H265Medium,
    /// Remux only
    Copy,
}

/// Transcoder profile behind a preset
#[derive(Debug, Clone, Serialize)]
pub struct PresetSettings {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    /// Output container extension including the dot
    pub extension: &'static str,
    pub ffmpeg_args: &'static [&'static str],
    /// Output size relative to the source
    pub size_multiplier: f64,
}

impl ConversionPreset {
    pub const ALL: [ConversionPreset; 11] = [
        ConversionPreset::Dnxhd1080p,
        ConversionPreset::Dnxhd4k,
        ConversionPreset::ProresProxy,
        ConversionPreset::ProresLt,
        ConversionPreset::Prores422,
        ConversionPreset::ProresHq,
        ConversionPreset::H264High,
        ConversionPreset::H264Medium,
        ConversionPreset::H265High,
        ConversionPreset::H265Medium,
        ConversionPreset::Copy,
    ];

    /// Exact lookup by preset id
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.settings().id == name)
    }

    /// Lookup that treats an unknown id as a plain remux
    pub fn resolve(name: &str) -> Self {
        Self::from_name(name).unwrap_or_else(|| {
            log::warn!("Unknown conversion preset {:?}, using copy", name);
            ConversionPreset::Copy
        })
    }

    pub fn id(&self) -> &'static str {
        self.settings().id
    }

    pub fn size_multiplier(&self) -> f64 {
        self.settings().size_multiplier
    }

    pub fn settings(&self) -> PresetSettings {
        match self {
            ConversionPreset::Dnxhd1080p => PresetSettings {
                id: "dnxhd_1080p",
                name: "DNxHD 1080p",
                description: "Avid DNxHD for 1080p editing (DaVinci Resolve compatible)",
                extension: ".mov",
                ffmpeg_args: &["-c:v", "dnxhd", "-profile:v", "dnxhr_hq", "-pix_fmt", "yuv422p", "-c:a", "pcm_s16le"],
                size_multiplier: 17.0,
            },
            ConversionPreset::Dnxhd4k => PresetSettings {
                id: "dnxhd_4k",
                name: "DNxHR 4K",
                description: "Avid DNxHR for 4K editing (DaVinci Resolve compatible)",
                extension: ".mov",
                ffmpeg_args: &["-c:v", "dnxhd", "-profile:v", "dnxhr_hqx", "-pix_fmt", "yuv422p10le", "-c:a", "pcm_s16le"],
                size_multiplier: 20.0,
            },
            ConversionPreset::ProresProxy => PresetSettings {
                id: "prores_proxy",
                name: "ProRes Proxy",
                description: "Apple ProRes Proxy, smallest ProRes for offline editing",
                extension: ".mov",
                ffmpeg_args: &["-c:v", "prores_ks", "-profile:v", "0", "-pix_fmt", "yuv422p10le", "-c:a", "pcm_s16le"],
                size_multiplier: 3.0,
            },
            ConversionPreset::ProresLt => PresetSettings {
                id: "prores_lt",
                name: "ProRes LT",
                description: "Apple ProRes LT, balance of quality and size",
                extension: ".mov",
                ffmpeg_args: &["-c:v", "prores_ks", "-profile:v", "1", "-pix_fmt", "yuv422p10le", "-c:a", "pcm_s16le"],
                size_multiplier: 6.0,
            },
            ConversionPreset::Prores422 => PresetSettings {
                id: "prores_422",
                name: "ProRes 422",
                description: "Apple ProRes 422, standard editing quality",
                extension: ".mov",
                ffmpeg_args: &["-c:v", "prores_ks", "-profile:v", "2", "-pix_fmt", "yuv422p10le", "-c:a", "pcm_s16le"],
                size_multiplier: 10.0,
            },
            ConversionPreset::ProresHq => PresetSettings {
                id: "prores_hq",
                name: "ProRes 422 HQ",
                description: "Apple ProRes 422 HQ for mastering",
                extension: ".mov",
                ffmpeg_args: &["-c:v", "prores_ks", "-profile:v", "3", "-pix_fmt", "yuv422p10le", "-c:a", "pcm_s16le"],
                size_multiplier: 15.0,
            },
            ConversionPreset::H264High => PresetSettings {
                id: "h264_high",
                name: "H.264 High Quality",
                description: "H.264/AVC for sharing, smaller files",
                extension: ".mp4",
                ffmpeg_args: &["-c:v", "libx264", "-preset", "slow", "-crf", "18", "-c:a", "aac", "-b:a", "192k"],
                size_multiplier: 0.8,
            },
            ConversionPreset::H264Medium => PresetSettings {
                id: "h264_medium",
                name: "H.264 Medium",
                description: "H.264/AVC, balanced quality and size",
                extension: ".mp4",
                ffmpeg_args: &["-c:v", "libx264", "-preset", "medium", "-crf", "23", "-c:a", "aac", "-b:a", "128k"],
                size_multiplier: 0.5,
            },
            ConversionPreset::H265High => PresetSettings {
                id: "h265_high",
                name: "H.265 High Quality",
                description: "H.265/HEVC, best compression",
                extension: ".mp4",
                ffmpeg_args: &["-c:v", "libx265", "-preset", "slow", "-crf", "20", "-c:a", "aac", "-b:a", "192k"],
                size_multiplier: 0.5,
            },
            ConversionPreset::H265Medium => PresetSettings {
                id: "h265_medium",
                name: "H.265 Medium",
                description: "H.265/HEVC, fast encode",
                extension: ".mp4",
                ffmpeg_args: &["-c:v", "libx265", "-preset", "medium", "-crf", "25", "-c:a", "aac", "-b:a", "128k"],
                size_multiplier: 0.3,
            },
            ConversionPreset::Copy => PresetSettings {
                id: "copy",
                name: "Copy (Remux)",
                description: "Copy streams into a new container without re-encoding",
                extension: ".mov",
                ffmpeg_args: &["-c:v", "copy", "-c:a", "copy"],
                size_multiplier: 1.0,
            },
        }
    }
}

/// The whole preset table, in display order
pub fn presets() -> Vec<PresetSettings> {
    ConversionPreset::ALL.iter().map(|p| p.settings()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_round_trip_and_match_serde() {
        for preset in ConversionPreset::ALL {
            assert_eq!(ConversionPreset::from_name(preset.id()), Some(preset));
            let json = serde_json::to_string(&preset).unwrap();
            assert_eq!(json, format!("\"{}\"", preset.id()));
        }
    }

    #[test]
    fn test_unknown_preset_resolves_to_copy() {
        assert_eq!(ConversionPreset::from_name("av1_ultra"), None);
        assert_eq!(ConversionPreset::resolve("av1_ultra"), ConversionPreset::Copy);
        assert_eq!(ConversionPreset::resolve("av1_ultra").size_multiplier(), 1.0);
    }

    #[test]
    fn test_dnxhd_multiplier() {
        assert_eq!(ConversionPreset::resolve("dnxhd_1080p").size_multiplier(), 17.0);
        assert_eq!(presets().len(), 11);
    }
}
