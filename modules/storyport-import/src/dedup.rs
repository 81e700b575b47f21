use std::collections::HashSet;

/// Set of external story ids already imported, pre-loaded from the store and
/// extended as records are queued, so duplicates inside one file are caught
/// too. Membership is a hash lookup; no per-record query.
#[derive(Debug, Default)]
pub struct DedupGuard {
    seen: HashSet<String>,
}

impl DedupGuard {
    pub fn from_ids(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            seen: ids.into_iter().filter(|id| !id.is_empty()).collect(),
        }
    }

    /// Empty ids are never considered imported; they fail later as a
    /// transformation error instead of masking each other.
    pub fn contains(&self, id: &str) -> bool {
        !id.is_empty() && self.seen.contains(id)
    }

    /// Returns false if the id was already present.
    pub fn record(&mut self, id: &str) -> bool {
        if id.is_empty() {
            return true;
        }
        self.seen.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
