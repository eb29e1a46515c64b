use std::collections::HashSet;

/// Outcome of the authorization guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

/// Telegram user ids allowed to use the bot. Built once at startup, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizedUsers {
    ids: HashSet<u64>,
}

impl AuthorizedUsers {
    /// Parse a comma-separated id list. Tokens that are not purely numeric are skipped,
    /// so an empty or malformed value authorizes nobody.
    pub fn parse(raw: &str) -> Self {
        let ids = raw
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()))
            .filter_map(|token| token.parse::<u64>().ok())
            .collect();
        Self { ids }
    }

    pub fn check(&self, user_id: u64) -> Access {
        if self.ids.contains(&user_id) {
            Access::Allow
        } else {
            Access::Deny
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in ascending order, for logging.
    pub fn sorted_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.ids.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl FromIterator<u64> for AuthorizedUsers {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
