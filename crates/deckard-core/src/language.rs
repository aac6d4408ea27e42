//! Language tags: catalog header detection, normalization and host locales.

use std::collections::HashSet;
use std::io::{self, BufRead};

/// Language used when a catalog declares none, or an unavailable one.
pub const DEFAULT_LANGUAGE: &str = "en_US";

/// The untranslated pseudo-language.
pub const POSIX_LANGUAGE: &str = "POSIX";

/// Only this many leading lines of a catalog are searched for its header.
pub const HEADER_SCAN_LINES: usize = 50;

const HEADER_PREFIX: &str = "\"Language: ";
const HEADER_SUFFIX: &str = "\\n\"";

/// Territories for bare language codes whose default is not `xx_XX`.
const TERRITORY_ALIASES: &[(&str, &str)] = &[
    ("ar", "AE"),
    ("ast", "ES"),
    ("ca", "ES"),
    ("cs", "CZ"),
    ("da", "DK"),
    ("el", "GR"),
    ("en", "US"),
    ("et", "EE"),
    ("eu", "ES"),
    ("fa", "IR"),
    ("ga", "IE"),
    ("gl", "ES"),
    ("he", "IL"),
    ("hi", "IN"),
    ("ja", "JP"),
    ("ko", "KR"),
    ("nb", "NO"),
    ("nn", "NO"),
    ("sl", "SI"),
    ("sq", "AL"),
    ("sr", "RS"),
    ("sv", "SE"),
    ("uk", "UA"),
    ("vi", "VN"),
    ("zh", "CN"),
];

/// Extracts the tag from a catalog header line of the exact form
/// `"Language: <tag>\n"` (the `\n` being a literal backslash-n).
pub fn parse_language_header(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    let tag = line.strip_prefix(HEADER_PREFIX)?.strip_suffix(HEADER_SUFFIX)?;
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

/// Normalizes a free-form language tag to `ll_TT`.
///
/// Encoding and modifier suffixes are dropped (translators often get the
/// encoding wrong), `-` separators become `_`, and a bare language code
/// gets its usual territory. Returns `None` for anything that does not
/// look like a language tag.
pub fn normalize_language_tag(raw: &str) -> Option<String> {
    let base = raw
        .trim()
        .split(['.', '@'])
        .next()
        .unwrap_or_default()
        .replace('-', "_");

    let mut parts = base.split('_');
    let language = parts.next().unwrap_or_default().to_ascii_lowercase();
    let territory = parts.next().map(|t| t.to_ascii_uppercase());

    let valid_language =
        (2..=3).contains(&language.len()) && language.chars().all(|c| c.is_ascii_alphabetic());
    if !valid_language {
        return None;
    }

    let territory = match territory {
        Some(t) if !t.is_empty() && t.chars().all(|c| c.is_ascii_alphanumeric()) => t,
        Some(_) => return None,
        None => TERRITORY_ALIASES
            .iter()
            .find(|(lang, _)| *lang == language)
            .map(|(_, territory)| (*territory).to_string())
            .unwrap_or_else(|| language.to_ascii_uppercase()),
    };

    Some(format!("{language}_{territory}"))
}

/// Language string handed to the worker (`LANG` and argv).
///
/// `POSIX` is passed verbatim, every other tag is pinned to UTF-8.
pub fn effective_language(tag: &str) -> String {
    if tag == POSIX_LANGUAGE {
        tag.to_string()
    } else {
        format!("{tag}.UTF-8")
    }
}

/// UTF-8 locales installed on the host.
///
/// A permissive set (probe unavailable) accepts every tag.
#[derive(Debug, Clone, Default)]
pub struct LocaleSet {
    available: Option<HashSet<String>>,
}

impl LocaleSet {
    /// A set that accepts every tag.
    pub fn permissive() -> Self {
        Self { available: None }
    }

    /// Builds the set from explicit `ll_TT` tags.
    pub fn from_tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: Some(tags.into_iter().map(Into::into).collect()),
        }
    }

    /// Parses `locale -a` output, keeping only UTF-8 locales.
    pub fn from_listing(listing: &str) -> Self {
        let tags = listing.lines().filter_map(|line| {
            let line = line.trim();
            let (base, codeset) = line.split_once('.')?;
            let codeset = codeset.split('@').next().unwrap_or_default();
            let is_utf8 = codeset.replace('-', "").eq_ignore_ascii_case("utf8");
            (is_utf8 && !base.is_empty()).then(|| base.to_string())
        });
        Self::from_tags(tags)
    }

    pub fn is_permissive(&self) -> bool {
        self.available.is_none()
    }

    pub fn contains(&self, tag: &str) -> bool {
        match &self.available {
            Some(set) => set.contains(tag),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.available.as_ref().map_or(0, HashSet::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Detects the language of a catalog from its header.
///
/// Scans at most [`HEADER_SCAN_LINES`] lines. A header naming a locale that
/// is not installed falls back to `default`, as does a missing header.
pub fn detect_language<R: BufRead>(
    mut reader: R,
    locales: &LocaleSet,
    default: &str,
) -> io::Result<String> {
    let mut buf = Vec::new();
    for _ in 0..HEADER_SCAN_LINES {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(raw) = parse_language_header(&line) {
            let detected = normalize_language_tag(raw)
                .filter(|tag| locales.contains(tag))
                .unwrap_or_else(|| default.to_string());
            return Ok(detected);
        }
    }
    Ok(default.to_string())
}
