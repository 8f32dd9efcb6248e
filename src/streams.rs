use crate::config::Settings;
use crate::types::{AacPreference, MetadataPayload, QualityPick, Tier, UnavailableReason};

/// Result of resolving one metadata payload against the configured options.
#[derive(Debug, PartialEq, Eq)]
pub enum Selection {
    /// At least one viable stream. Share mode always lands here with the
    /// combined stream in the video slot and no audio.
    Streams {
        video: Option<String>,
        audio: Option<String>,
    },
    Unavailable(UnavailableReason),
}

/// Pick the video/audio stream URLs for one item.
///
/// Pure function of the payload and the immutable options; all the API's
/// irregularities (absent tiers, zero or null sizes, the `"{}"` share
/// placeholder, sizeless mobile audio) are normalized here and nowhere else.
pub fn select_streams(payload: &MetadataPayload, settings: &Settings) -> Selection {
    if payload.error.is_some() {
        return Selection::Unavailable(UnavailableReason::Gone);
    }

    if settings.share {
        return match payload.file_versions.share.url() {
            Some(url) => Selection::Streams {
                video: Some(url.to_string()),
                audio: None,
            },
            None => Selection::Unavailable(UnavailableReason::NoStreams),
        };
    }

    let video = if settings.video {
        pick(video_candidates(payload, settings), settings.v_quality)
    } else {
        None
    };
    let audio = if settings.audio {
        pick(audio_candidates(payload, settings), settings.a_quality)
    } else {
        None
    };

    match (&video, &audio) {
        (None, None) => Selection::Unavailable(UnavailableReason::NoStreams),
        // Audio alone only carries the item when audio is all that was
        // asked for; a video-enabled run with no video stream is a miss.
        (None, Some(_)) if !settings.audio_only() => {
            Selection::Unavailable(UnavailableReason::NoStreams)
        }
        _ => Selection::Streams { video, audio },
    }
}

/// Ascending-quality video candidates within the configured tier window.
fn video_candidates(payload: &MetadataPayload, settings: &Settings) -> Vec<String> {
    let versions = &payload.file_versions.html5.video;

    Tier::ALL
        .iter()
        .copied()
        .filter(|tier| (settings.v_min..=settings.v_max).contains(tier))
        .filter_map(|tier| versions.get(tier.api_key()))
        .filter(|version| version.usable())
        .filter_map(|version| version.url.clone())
        .collect()
}

/// Ascending-preference audio candidates.
///
/// html5 carries MP3 in two qualities with reported sizes; mobile carries a
/// single (usually AAC) entry without a size, trusted to exist when the
/// policy admits it. The AAC bias decides whether mobile ranks above or
/// below html5 high.
fn audio_candidates(payload: &MetadataPayload, settings: &Settings) -> Vec<String> {
    enum Source {
        Html5(&'static str),
        Mobile,
    }

    let order = if settings.aac >= AacPreference::PreferAac {
        [Source::Html5("med"), Source::Html5("high"), Source::Mobile]
    } else {
        [Source::Html5("med"), Source::Mobile, Source::Html5("high")]
    };

    let mut audio = Vec::new();
    for source in order {
        match source {
            Source::Html5(key) => {
                if settings.aac == AacPreference::AacOnly {
                    continue;
                }
                if let Some(version) = payload.file_versions.html5.audio.get(key) {
                    if version.usable() {
                        audio.extend(version.url.clone());
                    }
                }
            }
            Source::Mobile => {
                if settings.aac == AacPreference::Mp3Only {
                    continue;
                }
                audio.extend(payload.file_versions.mobile.audio.first().cloned());
            }
        }
    }

    audio
}

fn pick(candidates: Vec<String>, quality: QualityPick) -> Option<String> {
    match quality {
        QualityPick::Worst => candidates.into_iter().next(),
        QualityPick::Best => candidates.into_iter().last(),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn payload(json: &str) -> MetadataPayload {
        serde_json::from_str(json).unwrap()
    }

    fn full_payload() -> MetadataPayload {
        payload(indoc! {r#"
            {
                "title": "some loop",
                "created_at": "2020-05-01T12:00:00Z",
                "channel": {"title": "someone"},
                "tags": [{"title": "cat"}],
                "communities": [],
                "file_versions": {
                    "html5": {
                        "video": {
                            "med": {"url": "v-med", "size": 100},
                            "high": {"url": "v-high", "size": 200},
                            "higher": {"url": "v-higher", "size": 300}
                        },
                        "audio": {
                            "med": {"url": "a-med", "size": 50},
                            "high": {"url": "a-high", "size": 80}
                        }
                    },
                    "mobile": {"audio": ["a-mobile"]},
                    "share": {"default": "share-url"}
                }
            }
        "#})
    }

    fn select(payload: &MetadataPayload, settings: &Settings) -> (Option<String>, Option<String>) {
        match select_streams(payload, settings) {
            Selection::Streams { video, audio } => (video, audio),
            sel => panic!("expected streams, got {sel:?}"),
        }
    }

    #[test]
    fn error_marker_is_unavailable() {
        let p = payload(r#"{"error": "Coub not found"}"#);
        assert_eq!(
            select_streams(&p, &Settings::default()),
            Selection::Unavailable(UnavailableReason::Gone)
        );
    }

    #[test]
    fn best_picks_the_last_candidate() {
        let (video, audio) = select(&full_payload(), &Settings::default());
        assert_eq!(video.as_deref(), Some("v-higher"));
        // Default bias is no-bias: med, mobile, high.
        assert_eq!(audio.as_deref(), Some("a-high"));
    }

    #[test]
    fn worst_picks_the_first_candidate() {
        let settings = Settings {
            v_quality: QualityPick::Worst,
            a_quality: QualityPick::Worst,
            ..Default::default()
        };
        let (video, audio) = select(&full_payload(), &settings);
        assert_eq!(video.as_deref(), Some("v-med"));
        assert_eq!(audio.as_deref(), Some("a-med"));
    }

    #[test]
    fn tier_window_excludes_higher_regardless_of_preference() {
        let settings = Settings {
            v_min: Tier::Med,
            v_max: Tier::High,
            ..Default::default()
        };
        let (video, _) = select(&full_payload(), &settings);
        assert_eq!(video.as_deref(), Some("v-high"));
    }

    #[test]
    fn zero_and_null_sizes_never_become_candidates() {
        let p = payload(indoc! {r#"
            {
                "file_versions": {
                    "html5": {
                        "video": {
                            "med": {"url": "v-med", "size": 100},
                            "high": {"url": "v-high", "size": 0},
                            "higher": {"url": "v-higher", "size": null}
                        },
                        "audio": {}
                    },
                    "mobile": {"audio": []},
                    "share": {"default": null}
                }
            }
        "#});
        let (video, audio) = select(&p, &Settings::default());
        assert_eq!(video.as_deref(), Some("v-med"));
        assert_eq!(audio, None);
    }

    #[test]
    fn aac_preference_ranks_mobile_last_vs_middle() {
        let prefer = Settings {
            aac: AacPreference::PreferAac,
            ..Default::default()
        };
        let (_, audio) = select(&full_payload(), &prefer);
        assert_eq!(audio.as_deref(), Some("a-mobile"));

        let no_bias = Settings {
            aac: AacPreference::NoBias,
            ..Default::default()
        };
        let (_, audio) = select(&full_payload(), &no_bias);
        assert_eq!(audio.as_deref(), Some("a-high"));
    }

    #[test]
    fn mp3_only_excludes_mobile_and_aac_only_excludes_html5() {
        let mp3 = Settings {
            aac: AacPreference::Mp3Only,
            a_quality: QualityPick::Best,
            ..Default::default()
        };
        let (_, audio) = select(&full_payload(), &mp3);
        assert_eq!(audio.as_deref(), Some("a-high"));

        let aac = Settings {
            aac: AacPreference::AacOnly,
            ..Default::default()
        };
        let (_, audio) = select(&full_payload(), &aac);
        assert_eq!(audio.as_deref(), Some("a-mobile"));
    }

    #[test]
    fn share_mode_returns_single_combined_stream() {
        let settings = Settings {
            share: true,
            ..Default::default()
        };
        let (video, audio) = select(&full_payload(), &settings);
        assert_eq!(video.as_deref(), Some("share-url"));
        assert_eq!(audio, None);
    }

    #[test]
    fn share_placeholder_object_is_unavailable() {
        let p = payload(indoc! {r#"
            {"file_versions": {"share": {"default": "{}"}}}
        "#});
        let settings = Settings {
            share: true,
            ..Default::default()
        };
        assert_eq!(
            select_streams(&p, &settings),
            Selection::Unavailable(UnavailableReason::NoStreams)
        );
    }

    #[test]
    fn video_without_audio_is_viable() {
        let p = payload(indoc! {r#"
            {
                "file_versions": {
                    "html5": {
                        "video": {"med": {"url": "v-med", "size": 100}},
                        "audio": {}
                    }
                }
            }
        "#});
        let (video, audio) = select(&p, &Settings::default());
        assert_eq!(video.as_deref(), Some("v-med"));
        assert_eq!(audio, None);
    }

    #[test]
    fn audio_without_video_needs_audio_only_mode() {
        let p = payload(indoc! {r#"
            {
                "file_versions": {
                    "html5": {
                        "video": {},
                        "audio": {"med": {"url": "a-med", "size": 50}}
                    }
                }
            }
        "#});

        assert_eq!(
            select_streams(&p, &Settings::default()),
            Selection::Unavailable(UnavailableReason::NoStreams)
        );

        let audio_only = Settings {
            video: false,
            ..Default::default()
        };
        let (video, audio) = select(&p, &audio_only);
        assert_eq!(video, None);
        assert_eq!(audio.as_deref(), Some("a-med"));
    }

    #[test]
    fn nothing_at_all_is_unavailable() {
        let p = payload(r#"{"file_versions": {}}"#);
        assert_eq!(
            select_streams(&p, &Settings::default()),
            Selection::Unavailable(UnavailableReason::NoStreams)
        );
    }
}
