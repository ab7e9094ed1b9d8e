//! Consumer position snapshots

use std::collections::{BTreeMap, BTreeSet};

use crate::records::TopicPartition;

/// The consumer's assignment and next-offset-to-read per partition.
///
/// A position is captured fresh from the live consumer every cycle and is
/// the exact value committed through the transaction. Partitions that have
/// not been read from yet are part of the assignment but carry no offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerPosition {
    /// Partitions assigned to this group member
    pub assignment: BTreeSet<TopicPartition>,
    /// Next offset to read, per partition
    pub offsets: BTreeMap<TopicPartition, i64>,
}

impl ConsumerPosition {
    pub fn new(assignment: BTreeSet<TopicPartition>) -> Self {
        Self {
            assignment,
            offsets: BTreeMap::new(),
        }
    }

    /// Record the next offset for an assigned partition.
    ///
    /// Offsets for partitions outside the assignment are ignored.
    pub fn set_offset(&mut self, partition: TopicPartition, offset: i64) {
        if self.assignment.contains(&partition) {
            self.offsets.insert(partition, offset);
        }
    }

    pub fn offset(&self, partition: &TopicPartition) -> Option<i64> {
        self.offsets.get(partition).copied()
    }

    /// True when no partition has a committable offset
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Assigned partitions that have not been read from yet
    pub fn unpositioned(&self) -> impl Iterator<Item = &TopicPartition> {
        self.assignment
            .iter()
            .filter(move |tp| !self.offsets.contains_key(*tp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment() -> BTreeSet<TopicPartition> {
        [TopicPartition::new("in", 0), TopicPartition::new("in", 1)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_offsets_limited_to_assignment() {
        let mut position = ConsumerPosition::new(assignment());
        position.set_offset(TopicPartition::new("in", 0), 42);
        position.set_offset(TopicPartition::new("other", 0), 7);

        assert_eq!(position.offset(&TopicPartition::new("in", 0)), Some(42));
        assert_eq!(position.offset(&TopicPartition::new("other", 0)), None);
        assert_eq!(position.offsets.len(), 1);
    }

    #[test]
    fn test_unpositioned_partitions() {
        let mut position = ConsumerPosition::new(assignment());
        assert!(position.is_empty());
        position.set_offset(TopicPartition::new("in", 1), 3);

        let missing: Vec<_> = position.unpositioned().cloned().collect();
        assert_eq!(missing, vec![TopicPartition::new("in", 0)]);
    }
}
