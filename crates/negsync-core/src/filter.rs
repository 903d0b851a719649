//! Filters: declarative predicates over records.
//!
//! A [`Filter`] serialises to the relay filter object understood by peers
//! (`ids`, `authors`, `kinds`, `since`, `until`, `limit`, `#<tag>`). A
//! [`FilterSet`] groups the named components queried locally for one sync
//! attempt and folds them into the single canonical filter sent with OPEN.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::record::Record;
use crate::types::{AuthorKey, RecordId, Timestamp};

/// Record kinds reconciled for a wallet owner.
pub mod kinds {
    /// Deletion requests.
    pub const DELETION: u32 = 5;
    /// Unspent token records.
    pub const TOKEN: u32 = 7375;
    /// Spending history.
    pub const HISTORY: u32 = 7376;
    /// Replaceable wallet metadata.
    pub const WALLET: u32 = 17375;
}

/// A predicate over records. Absent fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<RecordId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<AuthorKey>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Tag constraints keyed by `#<name>`.
    #[serde(flatten)]
    pub tags: BTreeMap<String, Vec<String>>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(mut self, ids: impl IntoIterator<Item = RecordId>) -> Self {
        self.ids = Some(ids.into_iter().collect());
        self
    }

    pub fn author(mut self, author: AuthorKey) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(author);
        self
    }

    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    /// Require a tag `name` with one of `values`.
    pub fn tag(mut self, name: &str, values: impl IntoIterator<Item = String>) -> Self {
        self.tags
            .entry(format!("#{name}"))
            .or_default()
            .extend(values);
        self
    }

    /// Check whether `record` satisfies every constraint.
    ///
    /// `limit` is a result-size hint and does not take part in matching.
    pub fn matches(&self, record: &Record) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&record.id) {
                return false;
            }
        }
        if let Some(authors) = &self.authors {
            if !authors.contains(&record.author) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&record.kind) {
                return false;
            }
        }
        if self.since.is_some_and(|since| record.created_at < since) {
            return false;
        }
        if self.until.is_some_and(|until| record.created_at > until) {
            return false;
        }
        self.tags.iter().all(|(key, values)| {
            let name = key.trim_start_matches('#');
            record
                .tag_values(name)
                .any(|v| values.iter().any(|want| want == v))
        })
    }
}

/// A named filter, queried against the local store on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterComponent {
    pub name: String,
    pub filter: Filter,
}

/// The filter components for one sync attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    components: Vec<FilterComponent>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, filter: Filter) -> Self {
        self.components.push(FilterComponent {
            name: name.to_string(),
            filter,
        });
        self
    }

    /// Token, deletion, wallet and history records authored by `author`.
    pub fn wallet(author: AuthorKey) -> Self {
        Self::new()
            .with("tokens", Filter::new().author(author).kind(kinds::TOKEN))
            .with("deletions", Filter::new().author(author).kind(kinds::DELETION))
            .with("wallet", Filter::new().author(author).kind(kinds::WALLET))
            .with("history", Filter::new().author(author).kind(kinds::HISTORY))
    }

    pub fn components(&self) -> &[FilterComponent] {
        &self.components
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Fold the components into the single filter sent with OPEN.
    ///
    /// Authors and kinds are unioned (sorted, deduplicated); an unconstrained
    /// field in any component leaves that field unconstrained. The time
    /// window widens to cover every component. Tag constraints are dropped:
    /// a peer evaluates one filter, and a tag bound on one component would
    /// wrongly narrow the others.
    pub fn combined(&self) -> Filter {
        if self.components.is_empty() {
            return Filter::default();
        }

        fn union<T: Ord + Clone>(
            parts: impl Iterator<Item = Option<Vec<T>>>,
        ) -> Option<Vec<T>> {
            let mut acc = BTreeSet::new();
            for part in parts {
                acc.extend(part?);
            }
            Some(acc.into_iter().collect())
        }

        let filters = || self.components.iter().map(|c| &c.filter);

        let since = filters()
            .map(|f| f.since)
            .collect::<Option<Vec<_>>>()
            .and_then(|all| all.into_iter().min());
        let until = filters()
            .map(|f| f.until)
            .collect::<Option<Vec<_>>>()
            .and_then(|all| all.into_iter().max());

        Filter {
            ids: union(filters().map(|f| f.ids.clone())),
            authors: union(filters().map(|f| f.authors.clone())),
            kinds: union(filters().map(|f| f.kinds.clone())),
            since,
            until,
            limit: None,
            tags: BTreeMap::new(),
        }
    }
}
