//! Link names for virtual folders.
//!
//! Recently-opened links carry a fixed-width inverted timestamp prefix, so a
//! plain name sort lists the most recently opened file first:
//!
//! ```text
//! 8264233599-[2024][Attention_Is_All_You_Need].pdf
//! ```

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::Path;

const PREFIX_WIDTH: usize = 10;
const PREFIX_CEILING: i64 = 9_999_999_999;

/// Byte budget for the part of a name between the prefix and the extension.
/// Leaves room for the prefix, a `__N` suffix and the extension under the
/// usual 255-byte file name limit.
const CORE_MAX_BYTES: usize = 180;
const YEAR_MAX_BYTES: usize = 16;
/// Longer "extensions" are kept as part of the stem.
const EXT_MAX_BYTES: usize = 32;

/// Cut `value` to at most `max` bytes on a char boundary.
fn truncate_bytes(mut value: String, max: usize) -> String {
    if value.len() > max {
        let mut cut = max;
        while !value.is_char_boundary(cut) {
            cut -= 1;
        }
        value.truncate(cut);
    }
    value
}

/// Replace path separators, whitespace and control characters with `_`.
pub fn sanitize(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_whitespace() || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// `[year][title].ext` when the record has a title, otherwise the sanitized
/// file stem. The original extension is kept, and long titles or stems are
/// truncated so the link name stays a valid file name.
pub fn link_base(file_name: &str, title: &str, year: &str) -> String {
    let path = Path::new(file_name);
    let (stem, ext) = match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) if ext.len() < EXT_MAX_BYTES => (
            stem.to_string_lossy().into_owned(),
            format!(".{}", ext.to_string_lossy()),
        ),
        _ => (file_name.to_string(), String::new()),
    };

    let title = sanitize(title);
    let core = if title.is_empty() {
        let stem = truncate_bytes(sanitize(&stem), CORE_MAX_BYTES);
        if stem.is_empty() {
            "_".to_string()
        } else {
            stem
        }
    } else {
        let year = truncate_bytes(sanitize(year), YEAR_MAX_BYTES);
        let year = if year.is_empty() { "-".to_string() } else { year };
        let title = truncate_bytes(title, CORE_MAX_BYTES - year.len() - 4);
        format!("[{year}][{title}]")
    };
    format!("{core}{ext}")
}

/// Name of a recently-opened link.
pub fn recent_link_name(file_name: &str, title: &str, year: &str, opened_at: DateTime<Utc>) -> String {
    let inverted = (PREFIX_CEILING - opened_at.timestamp()).clamp(0, PREFIX_CEILING);
    format!(
        "{inverted:0width$}-{}",
        link_base(file_name, title, year),
        width = PREFIX_WIDTH
    )
}

/// Open time encoded in a recently-opened link name.
pub fn link_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let (prefix, _) = name.split_once('-')?;
    if prefix.len() != PREFIX_WIDTH || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let inverted: i64 = prefix.parse().ok()?;
    DateTime::from_timestamp(PREFIX_CEILING - inverted, 0)
}

/// The display part of a recently-opened link name. Names without a valid
/// prefix are returned unchanged.
pub fn strip_link_prefix(name: &str) -> &str {
    if link_timestamp(name).is_none() {
        return name;
    }
    match name.split_once('-') {
        Some((_, rest)) if !rest.is_empty() => rest,
        _ => name,
    }
}

/// `core__N.ext`
pub fn append_numeric_suffix(name: &str, suffix: usize) -> String {
    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{}__{suffix}.{}",
            stem.to_string_lossy(),
            ext.to_string_lossy()
        ),
        _ => format!("{name}__{suffix}"),
    }
}

/// Hands out unique names within one folder.
#[derive(Debug, Default)]
pub(crate) struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    pub(crate) fn claim(&mut self, name: String) -> String {
        let mut candidate = name.clone();
        let mut suffix = 2;
        while self.used.contains(&candidate) {
            candidate = append_numeric_suffix(&name, suffix);
            suffix += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("  a/b\\c d\te\u{7}f  "), "a_b_c_d_e_f");
        assert_eq!(sanitize("   "), "");
    }

    #[test]
    fn test_link_base() {
        assert_eq!(link_base("paper.pdf", "Deep Learning", "2016"), "[2016][Deep_Learning].pdf");
        assert_eq!(link_base("paper.pdf", "Deep Learning", ""), "[-][Deep_Learning].pdf");
        assert_eq!(link_base("my paper.epub", "", "2016"), "my_paper.epub");
        assert_eq!(link_base("noext", "A/B", "1999"), "[1999][A_B]");
        assert_eq!(link_base(" .pdf", "", ""), "_.pdf");
    }

    #[test]
    fn test_long_titles_fit_file_name_limit() {
        let long_ascii = "a".repeat(300);
        let hangul = "가".repeat(90);
        for title in [long_ascii.as_str(), hangul.as_str()] {
            let mut names = NameAllocator::default();
            let base = recent_link_name("paper.pdf", title, "2020", at(1_700_000_000));
            names.claim(base.clone());
            let second = names.claim(base);
            assert!(second.len() <= 255, "{} bytes", second.len());
            assert!(second.ends_with("]__2.pdf"), "{second}");
            assert_eq!(link_timestamp(&second), Some(at(1_700_000_000)));
        }

        let cut = link_base("x.pdf", &"가".repeat(90), "");
        assert!(cut.starts_with("[-][가"));
        assert!(cut.len() <= CORE_MAX_BYTES + ".pdf".len());

        let stem = link_base(&format!("{}.epub", "b".repeat(400)), "", "");
        assert_eq!(stem, format!("{}.epub", "b".repeat(CORE_MAX_BYTES)));
    }

    #[test]
    fn test_long_extension_stays_in_stem() {
        let name = format!("report.{}", "x".repeat(40));
        assert_eq!(link_base(&name, "", ""), name);
    }

    #[test]
    fn test_recent_names_sort_most_recent_first() {
        let older = recent_link_name("a.pdf", "", "", at(1000));
        let newer = recent_link_name("b.pdf", "", "", at(2000));
        assert!(newer < older, "{newer} should sort before {older}");
        assert_eq!(newer, "9999997999-b.pdf");
    }

    #[test]
    fn test_prefix_decoding() {
        let name = recent_link_name("x.pdf", "Graph Theory", "1976", at(1_700_000_000));
        assert_eq!(link_timestamp(&name), Some(at(1_700_000_000)));
        assert_eq!(strip_link_prefix(&name), "[1976][Graph_Theory].pdf");

        assert_eq!(link_timestamp("plain-name.pdf"), None);
        assert_eq!(strip_link_prefix("plain-name.pdf"), "plain-name.pdf");
        assert_eq!(strip_link_prefix("9999999999-"), "9999999999-");
    }

    #[test]
    fn test_allocator_suffixes_duplicates() {
        let mut names = NameAllocator::default();
        assert_eq!(names.claim("[2020][T].pdf".into()), "[2020][T].pdf");
        assert_eq!(names.claim("[2020][T].pdf".into()), "[2020][T]__2.pdf");
        assert_eq!(names.claim("[2020][T].pdf".into()), "[2020][T]__3.pdf");
        assert_eq!(names.claim("noext".into()), "noext");
        assert_eq!(names.claim("noext".into()), "noext__2");
    }
}
