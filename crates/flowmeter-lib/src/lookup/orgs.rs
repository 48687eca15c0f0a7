//! Curated organization → category mapping
//!
//! Matching is deterministic: entries are tried in order, first by
//! substring of the lower-cased organization, then by the pattern's
//! distinctive (first non-generic) token appearing as a whole word.

use serde::{Deserialize, Serialize};

/// How an organization matched a table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgMatch {
    Substring,
    Token,
}

/// Ordered (pattern, category) table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgCategoryTable {
    entries: Vec<(String, String)>,
}

/// Tokens shorter than this never match on their own
const MIN_TOKEN_LEN: usize = 3;

/// Corporate filler that says nothing about who owns a network
const GENERIC_TOKENS: &[&str] = &[
    "platforms", "platform", "video", "cloud", "services", "service", "inc",
    "llc", "ltd", "corp", "corporation", "communications", "networks",
    "network", "holdings", "group", "technologies", "the",
];

impl OrgCategoryTable {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(pattern, category)| (pattern.to_lowercase(), category))
                .collect(),
        }
    }

    fn from_static(entries: &[(&str, &str)]) -> Self {
        Self::new(
            entries
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        )
    }

    /// Table used for `Unknown` labels
    pub fn default_organizations() -> Self {
        Self::from_static(&[
            ("google", "Google"),
            ("youtube", "YouTube"),
            ("facebook", "Facebook"),
            ("meta platforms", "Facebook"),
            ("instagram", "Instagram"),
            ("whatsapp", "WhatsApp"),
            ("apple", "Apple"),
            ("microsoft", "Microsoft"),
            ("netflix", "Netflix"),
            ("amazon", "Amazon"),
            ("twitter", "Twitter"),
            ("bytedance", "TikTok"),
            ("tiktok", "TikTok"),
            ("zoom video", "Zoom"),
            ("spotify", "Spotify"),
            ("discord", "Discord"),
            ("telegram", "Telegram"),
            ("valve", "Steam"),
            ("cloudflare", "Cloudflare"),
        ])
    }

    /// Narrower table used to re-label `QUIC` traffic
    pub fn default_quic() -> Self {
        Self::from_static(&[
            ("google", "Google"),
            ("youtube", "YouTube"),
            ("facebook", "Facebook"),
            ("meta platforms", "Facebook"),
            ("instagram", "Instagram"),
            ("whatsapp", "WhatsApp"),
        ])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Category for an organization name, if any entry matches
    pub fn resolve(&self, organization: &str) -> Option<(&str, OrgMatch)> {
        let org = organization.to_lowercase();

        if let Some((_, category)) = self
            .entries
            .iter()
            .find(|(pattern, _)| org.contains(pattern.as_str()))
        {
            return Some((category.as_str(), OrgMatch::Substring));
        }

        let org_tokens: Vec<&str> = tokenize(&org).collect();
        self.entries
            .iter()
            .find(|(pattern, _)| {
                distinctive_token(pattern).map_or(false, |pt| org_tokens.contains(&pt))
            })
            .map(|(_, category)| (category.as_str(), OrgMatch::Token))
    }
}

fn distinctive_token(pattern: &str) -> Option<&str> {
    tokenize(pattern)
        .find(|t| !GENERIC_TOKENS.contains(t))
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
}

fn tokenize(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| c.is_whitespace() || c == ',' || c == '-' || c == '.')
        .filter(|t| !t.is_empty())
}
