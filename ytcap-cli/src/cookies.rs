//! Netscape cookies.txt loading.
//!
//! The engine takes cookies as one pre-rendered `Cookie` header value,
//! supplied once at startup.

use std::path::Path;

use anyhow::{Context, bail};

/// Parse a Netscape-format cookies file into a `Cookie` header value.
///
/// Lines prefixed with `#HttpOnly_` (as some browser exporters write) are
/// real cookies and are kept. Only cookies scoped to the service's domains
/// are included.
pub fn load_cookie_header(path: &Path) -> anyhow::Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read cookies file {}", path.display()))?;

    let mut pairs = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let line = match line.strip_prefix("#HttpOnly_") {
            Some(rest) => rest,
            None if line.is_empty() || line.starts_with('#') => continue,
            None => line,
        };

        // domain, include-subdomains, path, secure, expiry, name, value
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            continue;
        }
        let domain = fields[0].trim_start_matches('.');
        if !domain.ends_with("youtube.com") && !domain.ends_with("google.com") {
            continue;
        }
        pairs.push(format!("{}={}", fields[5], fields[6]));
    }

    if pairs.is_empty() {
        bail!("no usable cookies found in {}", path.display());
    }
    Ok(pairs.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_cookie_lines() {
        let file = write_file(
            "# Netscape HTTP Cookie File\n\
             .youtube.com\tTRUE\t/\tTRUE\t1999999999\tSID\tabc123\n\
             #HttpOnly_.youtube.com\tTRUE\t/\tTRUE\t1999999999\tHSID\tdef456\n\
             .example.com\tTRUE\t/\tFALSE\t1999999999\ttheme\tdark\n",
        );
        let header = load_cookie_header(file.path()).unwrap();
        assert_eq!(header, "SID=abc123; HSID=def456");
    }

    #[test]
    fn empty_file_is_an_error() {
        let file = write_file("# nothing here\n");
        assert!(load_cookie_header(file.path()).is_err());
    }
}
