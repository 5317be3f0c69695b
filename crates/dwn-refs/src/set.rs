use std::collections::BTreeSet;

/// The message CIDs that reference one payload of one tenant.
///
/// A payload with a non-empty reference set must be retained; an empty set
/// means the payload may be collected.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    messages: BTreeSet<String>,
}

impl ReferenceSet {
    pub fn insert(&mut self, message_cid: impl Into<String>) -> bool {
        self.messages.insert(message_cid.into())
    }

    pub fn contains(&self, message_cid: &str) -> bool {
        self.messages.contains(message_cid)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the referenced payload must be kept.
    pub fn retains(&self) -> bool {
        !self.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.messages.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ReferenceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            messages: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_retains() {
        let mut set = ReferenceSet::default();
        assert!(!set.retains());
        assert!(set.insert("m1"));
        assert!(!set.insert("m1"));
        assert!(set.retains());
        assert!(set.contains("m1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn iterates_in_order() {
        let set: ReferenceSet = ["m2", "m1", "m3"].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["m1", "m2", "m3"]);
    }
}
