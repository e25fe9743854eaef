//! The static quality-label table and the user preference parser.
//!
//! Labels are ordered worst to best; `best` resolves to the highest entry
//! available on the stream at selection time.

/// The audio track is always this itag.
pub const AUDIO_ITAG: u32 = 140;

/// Pseudo-itag recorded as the chosen quality for audio-only captures.
pub const AUDIO_ONLY_ITAG: u32 = 0;

pub const AUDIO_ONLY_LABEL: &str = "audio_only";
pub const BEST_LABEL: &str = "best";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityEntry {
    pub label: &'static str,
    pub h264: u32,
    pub vp9: u32,
}

/// Video quality labels with their itags, worst to best.
pub const VIDEO_QUALITIES: &[QualityEntry] = &[
    QualityEntry {
        label: "144p",
        h264: 160,
        vp9: 278,
    },
    QualityEntry {
        label: "240p",
        h264: 133,
        vp9: 242,
    },
    QualityEntry {
        label: "360p",
        h264: 134,
        vp9: 243,
    },
    QualityEntry {
        label: "480p",
        h264: 135,
        vp9: 244,
    },
    QualityEntry {
        label: "720p",
        h264: 136,
        vp9: 247,
    },
    QualityEntry {
        label: "720p60",
        h264: 298,
        vp9: 302,
    },
    QualityEntry {
        label: "1080p",
        h264: 137,
        vp9: 248,
    },
    QualityEntry {
        label: "1080p60",
        h264: 299,
        vp9: 303,
    },
];

/// All selectable labels (`audio_only` first, then video labels worst to
/// best). `best` is accepted by the parser but is not itself a label.
pub fn known_labels() -> Vec<&'static str> {
    let mut labels = Vec::with_capacity(VIDEO_QUALITIES.len() + 1);
    labels.push(AUDIO_ONLY_LABEL);
    labels.extend(VIDEO_QUALITIES.iter().map(|q| q.label));
    labels
}

pub fn entry_for_label(label: &str) -> Option<&'static QualityEntry> {
    VIDEO_QUALITIES.iter().find(|q| q.label == label)
}

/// Position of a label in the worst-to-best ordering, for sorting the
/// availability list. `audio_only` sorts below every video label.
pub fn label_priority(label: &str) -> Option<usize> {
    if label == AUDIO_ONLY_LABEL {
        return Some(0);
    }
    VIDEO_QUALITIES
        .iter()
        .position(|q| q.label == label)
        .map(|i| i + 1)
}

/// Parse a slash-delimited preference list, keeping entries that appear in
/// `known` (case-insensitive) plus the pseudo-label `best`, in the order
/// given. An empty result means nothing valid was selected.
pub fn parse_quality_list(known: &[&str], input: &str) -> Vec<String> {
    input
        .to_lowercase()
        .split('/')
        .map(str::trim)
        .filter(|q| q == &BEST_LABEL || known.contains(q))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_known_labels_in_order() {
        let known = known_labels();
        let parsed = parse_quality_list(&known, "1080p60/720p/best");
        assert_eq!(parsed, vec!["1080p60", "720p", "best"]);
    }

    #[test]
    fn parse_filters_unknown_labels() {
        let known = known_labels();
        let parsed = parse_quality_list(&known, "4k/1080p/8k");
        assert_eq!(parsed, vec!["1080p"]);
    }

    #[test]
    fn parse_is_case_insensitive_and_trims() {
        let known = known_labels();
        let parsed = parse_quality_list(&known, " 1080P60 / Best ");
        assert_eq!(parsed, vec!["1080p60", "best"]);
    }

    #[test]
    fn parse_round_trips_known_subset() {
        let known = known_labels();
        let qs = ["audio_only", "240p", "nonsense", "720p60", "best"];
        let joined = qs.join("/");
        let parsed = parse_quality_list(&known, &joined);
        let expected: Vec<String> = qs
            .iter()
            .filter(|q| **q == BEST_LABEL || known.contains(q))
            .map(|q| q.to_string())
            .collect();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn labels_are_ordered_worst_to_best() {
        assert!(label_priority("144p").unwrap() < label_priority("1080p60").unwrap());
        assert!(label_priority(AUDIO_ONLY_LABEL).unwrap() < label_priority("144p").unwrap());
        assert_eq!(label_priority("4k"), None);
    }

    #[test]
    fn entry_lookup() {
        let entry = entry_for_label("1080p60").unwrap();
        assert_eq!(entry.h264, 299);
        assert_eq!(entry.vp9, 303);
        assert!(entry_for_label("best").is_none());
    }
}
