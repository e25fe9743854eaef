//! Resolution of itag → fragment URL templates.
//!
//! The DASH manifest, when present, is the preferred source: one entry per
//! `Representation` with a numeric id and a `BaseURL` child. Otherwise the
//! templates are synthesized from the adaptive formats. Only fragmented
//! URLs (query contains `noclen`) are usable; anything else is dropped.

use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, warn};

use crate::probe::{AdaptiveFormat, InfoProbe};

pub const SEQ_PLACEHOLDER: &str = "{sq}";

/// A download URL parameterized by fragment sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentUrl {
    template: String,
}

impl FragmentUrl {
    /// Template from a DASH `BaseURL`: `<base>sq/{sq}`.
    pub fn from_dash_base(base: &str) -> Self {
        Self {
            template: format!("{base}sq/{SEQ_PLACEHOLDER}"),
        }
    }

    /// Template from an adaptive-format or direct URL: `<url>&sq={sq}`.
    /// Any pre-existing `&sq=` parameter and everything after it is cut.
    pub fn from_query_url(url: &str) -> Self {
        let cut = url.find("&sq=").unwrap_or(url.len());
        Self {
            template: format!("{}&sq={SEQ_PLACEHOLDER}", &url[..cut]),
        }
    }

    pub fn for_seq(&self, seq: u64) -> String {
        self.template.replace(SEQ_PLACEHOLDER, &seq.to_string())
    }

    pub fn template(&self) -> &str {
        &self.template
    }
}

/// Fragmented URLs carry a `noclen` query marker instead of a fixed
/// content length; only those support sequence-addressed retrieval.
pub fn is_fragmented(url: &str) -> bool {
    url.to_ascii_lowercase().contains("noclen")
}

/// Parse a DASH manifest into `{itag → URL template}`.
///
/// Matching is namespace-agnostic; `Representation` elements without a
/// numeric id or without a fragmented `BaseURL` are skipped. Parse errors
/// end the scan with whatever was collected so far.
pub fn parse_dash_manifest(xml: &str) -> BTreeMap<u32, FragmentUrl> {
    let mut urls = BTreeMap::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut current_itag: Option<u32> = None;
    let mut in_base_url = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Representation" => {
                    current_itag = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.local_name().as_ref() == b"id")
                        .and_then(|a| a.unescape_value().ok())
                        .and_then(|v| v.parse().ok());
                }
                b"BaseURL" => in_base_url = current_itag.is_some(),
                _ => {}
            },
            Ok(Event::Text(t)) if in_base_url => {
                if let (Some(itag), Ok(base)) = (current_itag, t.unescape()) {
                    let base = base.trim();
                    if is_fragmented(base) {
                        urls.insert(itag, FragmentUrl::from_dash_base(base));
                    } else {
                        debug!(itag, "skipping non-fragmented base URL in manifest");
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"Representation" => current_itag = None,
                b"BaseURL" => in_base_url = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "error parsing DASH manifest");
                break;
            }
        }
    }

    urls
}

/// Synthesize templates directly from the adaptive formats.
pub fn synthesize_from_formats(formats: &[AdaptiveFormat]) -> BTreeMap<u32, FragmentUrl> {
    formats
        .iter()
        .filter_map(|fmt| {
            let url = fmt.url.as_deref()?;
            if !is_fragmented(url) {
                debug!(itag = fmt.itag, "skipping non-fragmented format URL");
                return None;
            }
            Some((fmt.itag, FragmentUrl::from_query_url(url)))
        })
        .collect()
}

/// The DASH result wins whenever it is non-empty, even if it is missing a
/// given itag; adaptive synthesis is the fallback only when the manifest
/// yields nothing at all.
fn choose(
    dash: Option<BTreeMap<u32, FragmentUrl>>,
    formats: &[AdaptiveFormat],
) -> BTreeMap<u32, FragmentUrl> {
    match dash {
        Some(urls) if !urls.is_empty() => urls,
        _ => synthesize_from_formats(formats),
    }
}

/// Resolve download URL templates from streaming data.
pub async fn resolve_download_urls(
    probe: &InfoProbe,
    dash_manifest_url: Option<&str>,
    formats: &[AdaptiveFormat],
) -> BTreeMap<u32, FragmentUrl> {
    let dash = match dash_manifest_url {
        Some(url) => match probe.fetch_text(url).await {
            Ok(xml) => Some(parse_dash_manifest(&xml)),
            Err(err) => {
                warn!(error = %err, "failed to fetch DASH manifest");
                None
            }
        },
        None => None,
    };

    choose(dash, formats)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic">
  <Period>
    <AdaptationSet mimeType="audio/mp4">
      <Representation id="140" bandwidth="144000">
        <BaseURL>https://r4---sn.example.com/videoplayback/id/abc/noclen/1/itag/140/</BaseURL>
      </Representation>
    </AdaptationSet>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="299" bandwidth="4400000">
        <BaseURL>https://r4---sn.example.com/videoplayback/id/abc/noclen/1/itag/299/</BaseURL>
      </Representation>
      <Representation id="not-numeric">
        <BaseURL>https://r4---sn.example.com/videoplayback/id/abc/noclen/1/itag/0/</BaseURL>
      </Representation>
      <Representation id="18">
        <BaseURL>https://r4---sn.example.com/videoplayback/id/abc/clen/123/itag/18/</BaseURL>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    fn format(itag: u32, url: Option<&str>) -> AdaptiveFormat {
        AdaptiveFormat {
            itag,
            url: url.map(str::to_string),
            mime_type: String::new(),
            quality_label: None,
            target_duration_sec: None,
        }
    }

    #[test]
    fn dash_parse_collects_numeric_fragmented_representations() {
        let urls = parse_dash_manifest(MANIFEST);
        assert_eq!(urls.len(), 2);
        assert!(urls.contains_key(&140));
        assert!(urls.contains_key(&299));
    }

    #[test]
    fn dash_template_substitution_keeps_noclen() {
        let urls = parse_dash_manifest(MANIFEST);
        let substituted = urls[&299].for_seq(5);
        assert!(substituted.contains("noclen"));
        assert!(substituted.ends_with("sq/5"));
    }

    #[test]
    fn synthesis_appends_sq_query() {
        let formats = [
            format(140, Some("https://example.com/videoplayback?noclen=1&itag=140")),
            format(299, None),
            format(18, Some("https://example.com/videoplayback?clen=123&itag=18")),
        ];
        let urls = synthesize_from_formats(&formats);
        assert_eq!(urls.len(), 1);
        assert_eq!(
            urls[&140].for_seq(0),
            "https://example.com/videoplayback?noclen=1&itag=140&sq=0"
        );
    }

    #[test]
    fn query_template_cuts_existing_sq_parameter() {
        let url = FragmentUrl::from_query_url("https://example.com/vp?noclen=1&sq=123&extra=x");
        assert_eq!(url.for_seq(7), "https://example.com/vp?noclen=1&sq=7");
    }

    #[test]
    fn dash_takes_precedence_when_non_empty() {
        let mut dash = BTreeMap::new();
        dash.insert(140, FragmentUrl::from_dash_base("https://d/noclen/"));
        let formats = [format(
            299,
            Some("https://example.com/videoplayback?noclen=1&itag=299"),
        )];

        let chosen = choose(Some(dash), &formats);
        // Missing itag 299 does not fall through; the DASH mapping wins.
        assert!(chosen.contains_key(&140));
        assert!(!chosen.contains_key(&299));
    }

    #[test]
    fn empty_dash_mapping_falls_through_to_synthesis() {
        let formats = [format(
            299,
            Some("https://example.com/videoplayback?noclen=1&itag=299"),
        )];
        let chosen = choose(Some(BTreeMap::new()), &formats);
        assert!(chosen.contains_key(&299));
    }

    #[test]
    fn fragmented_marker_detection() {
        assert!(is_fragmented("https://x/videoplayback?noclen=1"));
        assert!(is_fragmented("https://x/videoplayback/NOCLEN/1"));
        assert!(!is_fragmented("https://x/videoplayback?clen=12345"));
    }
}
