use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use tracing::debug;

/// A key-ring entry as reported by the encryption tool. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub name: String,
    pub email: String,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl Key {
    pub fn new(name: impl Into<String>, email: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            fingerprint: fingerprint.into(),
            created_at: DateTime::default(),
        }
    }

    /// Case-insensitive match on fingerprint, name or email. Empty matches all.
    pub fn matches(&self, search: &str) -> bool {
        let search = search.trim();
        if search.is_empty() {
            return true;
        }
        let needle = search.to_lowercase();
        self.fingerprint.eq_ignore_ascii_case(search)
            || self.name.to_lowercase().contains(&needle)
            || self.email.to_lowercase().contains(&needle)
    }
}

// `pub   2048R/B44966D6 2015-01-24` (gpg 1) or `pub   rsa3072/B44966D6 2021-03-02 [SC]` (gpg 2)
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(sec|pub)\s+(\S*)/(\S+)\s+(\d{4}-\d{2}-\d{2})").unwrap()
});

// `uid                  Tester <tester@example.com>`, validity tag optional
static IDENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^uid\s+(?:\[[^\]]*\]\s*)?(.*?)\s*<([^<>\s]+@[^<>\s]+)>").unwrap()
});

// gpg 2 prints the full fingerprint on its own line under the header
static FINGERPRINT_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s+[0-9A-Fa-f]{16,40}\s*$").unwrap());

/// How the key listing from the tool is requested and parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ListingFormat {
    /// `--with-colons` records. Carries full fingerprints.
    #[default]
    Colons,
    /// The indented human-readable listing with short key ids, for tools
    /// that lack a structured mode.
    Human,
}

impl ListingFormat {
    pub fn parse(self, output: &str) -> Vec<Key> {
        match self {
            Self::Colons => parse_colon_listing(output),
            Self::Human => parse_key_listing(output),
        }
    }
}

impl std::str::FromStr for ListingFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "colons" | "colon" => Ok(Self::Colons),
            "human" | "text" => Ok(Self::Human),
            other => Err(format!("unknown listing format {:?}", other)),
        }
    }
}

// `Tom Tester (work) <tom@example.com>` as found in a colon-mode uid record
static USER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\s*<([^<>\s]+@[^<>\s]+)>").unwrap());

/// Parse a `--with-colons` key listing.
///
/// Same policy as the human-readable form: a primary key record must be
/// followed by a user id before the next primary key, or it is dropped.
pub fn parse_colon_listing(output: &str) -> Vec<Key> {
    struct Pending {
        key_id: String,
        fingerprint: Option<String>,
        created_at: DateTime<Utc>,
        in_subkey: bool,
    }

    let mut keys = Vec::new();
    let mut pending: Option<Pending> = None;

    for line in output.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        let field = |i: usize| fields.get(i).copied().unwrap_or("");

        match field(0) {
            "pub" | "sec" => {
                if let Some(p) = pending.take() {
                    debug!("Dropping key {} with no identity record", p.key_id);
                }
                pending = Some(Pending {
                    key_id: field(4).to_string(),
                    fingerprint: None,
                    created_at: parse_colon_date(field(5)),
                    in_subkey: false,
                });
            }
            "sub" | "ssb" => {
                if let Some(p) = pending.as_mut() {
                    p.in_subkey = true;
                }
            }
            "fpr" => {
                if let Some(p) = pending.as_mut().filter(|p| !p.in_subkey && p.fingerprint.is_none()) {
                    p.fingerprint = Some(field(9).to_string());
                }
            }
            "uid" => {
                let user_id = unescape_colon_field(field(9));
                let Some(uid) = USER_ID_RE.captures(&user_id) else {
                    debug!("Skipping user id without an email: {:?}", user_id);
                    continue;
                };
                if let Some(p) = pending.take() {
                    keys.push(Key {
                        name: uid[1].trim().to_string(),
                        email: uid[2].trim().to_string(),
                        fingerprint: p.fingerprint.unwrap_or(p.key_id),
                        created_at: p.created_at,
                    });
                }
            }
            _ => {}
        }
    }

    if let Some(p) = pending {
        debug!("Dropping key {} with no identity record", p.key_id);
    }
    keys
}

/// Creation dates are epoch seconds in current gpg, ISO dates in older ones.
fn parse_colon_date(raw: &str) -> DateTime<Utc> {
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0).unwrap_or_default();
    }
    parse_listing_date(raw.get(..10).unwrap_or(raw))
}

fn parse_listing_date(raw: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_default()
}

// colon records escape `:` and `\` as `\x3a` and `\x5c`
fn unescape_colon_field(raw: &str) -> String {
    raw.replace("\\x3a", ":").replace("\\x5c", "\\")
}

/// Parse a human-readable key listing.
///
/// Each key is a header line followed immediately by an identity line. A
/// header whose next line is not an identity is dropped.
pub fn parse_key_listing(output: &str) -> Vec<Key> {
    let mut keys = Vec::new();
    let mut lines = output.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(header) = HEADER_RE.captures(line) else {
            continue;
        };
        let fingerprint = header[3].trim().to_string();
        let created_at = parse_listing_date(&header[4]);

        if lines.peek().is_some_and(|next| FINGERPRINT_LINE_RE.is_match(next)) {
            lines.next();
        }

        match lines.peek().and_then(|next| IDENTITY_RE.captures(next)) {
            Some(uid) => {
                keys.push(Key {
                    name: uid[1].trim().to_string(),
                    email: uid[2].trim().to_string(),
                    fingerprint,
                    created_at,
                });
                lines.next();
            }
            None => debug!("Dropping key {} with no identity line", fingerprint),
        }
    }

    keys
}
