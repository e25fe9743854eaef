//! Output file naming: sanitization and `%(key)s` template expansion.

use crate::context::FormatInfo;
use crate::error::CaptureError;

const BAD_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace characters that are invalid in filenames with `_`.
///
/// Not exhaustive, but the combination of title and video id keeps the
/// result unique enough in practice. A leading `-` is prefixed with `_` so
/// downstream tools never mistake the name for a flag.
pub fn sanitize_filename(input: &str) -> String {
    let mut result: String = input
        .chars()
        .map(|c| if BAD_CHARS.contains(&c) { '_' } else { c })
        .collect();

    if result.starts_with('-') {
        result.insert(0, '_');
    }

    result
}

/// Expand a `%(key)s` output template against the captured format info.
///
/// Supported keys: `id`, `title`, `channel`, `channel_id`, `upload_date`.
/// An unknown key is a fatal configuration error, reported with the
/// offending key name.
pub fn expand_template(template: &str, info: &FormatInfo) -> Result<String, CaptureError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find(')') else {
            return Err(CaptureError::configuration(format!(
                "unterminated template key in `{template}`"
            )));
        };
        let key = &after[..end];
        if !after[end + 1..].starts_with('s') {
            return Err(CaptureError::configuration(format!(
                "template key `{key}` must be written as %({key})s"
            )));
        }

        let value = info
            .get(key)
            .ok_or_else(|| CaptureError::Template {
                key: key.to_string(),
            })?;
        out.push_str(value);
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> FormatInfo {
        FormatInfo {
            id: "abc123".into(),
            title: "A Stream".into(),
            channel_id: "UCxyz".into(),
            channel: "Someone".into(),
            upload_date: "20260801".into(),
        }
    }

    #[test]
    fn sanitize_replaces_forbidden_set_only() {
        let input = "a<b>c:d\"e/f\\g|h?i*j and spaces";
        let out = sanitize_filename(input);
        assert_eq!(out, "a_b_c_d_e_f_g_h_i_j and spaces");
        // Every byte outside the forbidden set is preserved.
        assert_eq!(out.len(), input.len());
    }

    #[test]
    fn sanitize_prefixes_leading_dash() {
        assert_eq!(sanitize_filename("-title"), "_-title");
        assert_eq!(sanitize_filename("title-"), "title-");
    }

    #[test]
    fn expand_substitutes_known_keys() {
        let out = expand_template("%(title)s-%(id)s", &info()).unwrap();
        assert_eq!(out, "A Stream-abc123");
    }

    #[test]
    fn expand_with_directories() {
        let out = expand_template("%(channel)s/%(upload_date)s_%(title)s", &info()).unwrap();
        assert_eq!(out, "Someone/20260801_A Stream");
    }

    #[test]
    fn expand_rejects_unknown_key() {
        let err = expand_template("%(resolution)s", &info()).unwrap_err();
        match err {
            CaptureError::Template { key } => assert_eq!(key, "resolution"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expand_rejects_unterminated_key() {
        assert!(expand_template("%(title", &info()).is_err());
    }

    #[test]
    fn expand_passes_through_plain_text() {
        let out = expand_template("no keys here", &info()).unwrap();
        assert_eq!(out, "no keys here");
    }
}
