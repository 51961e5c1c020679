use serde::{Deserialize, Serialize};

use crate::Map;

pub type BunchId = u32;

/// A single spectrum (or other astronomical object) to be processed, identified by an
/// opaque id, together with its per-item arguments.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    id: String,
    args: Map<String, String>,
}

impl WorkItem {
    pub fn new(id: impl Into<String>) -> WorkItem {
        WorkItem {
            id: id.into(),
            args: Map::new(),
        }
    }

    pub fn with_args(id: impl Into<String>, args: Map<String, String>) -> WorkItem {
        WorkItem {
            id: id.into(),
            args,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn args(&self) -> &Map<String, String> {
        &self.args
    }
}

/// An ordered, non-empty group of work items, processed as one schedulable unit.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Bunch {
    id: BunchId,
    items: Vec<WorkItem>,
}

impl Bunch {
    pub fn id(&self) -> BunchId {
        self.id
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Splits `items` into bunches of at most `bunch_size` items, preserving order.
///
/// Every bunch except possibly the last has exactly `bunch_size` items; the
/// concatenation of all bunches reproduces the input. Empty input yields no bunches.
pub fn partition_bunches(items: Vec<WorkItem>, bunch_size: usize) -> Vec<Bunch> {
    assert!(bunch_size >= 1, "bunch_size has to be positive");

    let mut bunches = Vec::with_capacity(items.len().div_ceil(bunch_size));
    let mut current = Vec::with_capacity(bunch_size.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == bunch_size {
            bunches.push(Bunch {
                id: bunches.len() as BunchId,
                items: std::mem::replace(&mut current, Vec::with_capacity(bunch_size)),
            });
        }
    }
    if !current.is_empty() {
        bunches.push(Bunch {
            id: bunches.len() as BunchId,
            items: current,
        });
    }
    bunches
}

#[cfg(test)]
mod tests {
    use super::{WorkItem, partition_bunches};

    fn items(count: usize) -> Vec<WorkItem> {
        (0..count).map(|id| WorkItem::new(format!("obj-{id}"))).collect()
    }

    #[test]
    fn partition_empty() {
        assert!(partition_bunches(Vec::new(), 4).is_empty());
    }

    #[test]
    fn partition_exact_multiple() {
        let bunches = partition_bunches(items(12), 4);
        assert_eq!(bunches.len(), 3);
        assert!(bunches.iter().all(|b| b.len() == 4));
    }

    #[test]
    fn partition_with_remainder() {
        let bunches = partition_bunches(items(17), 5);
        assert_eq!(
            bunches.iter().map(|b| b.len()).collect::<Vec<_>>(),
            vec![5, 5, 5, 2]
        );
        assert_eq!(
            bunches.iter().map(|b| b.id()).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn partition_bunch_size_one() {
        let bunches = partition_bunches(items(3), 1);
        assert_eq!(bunches.len(), 3);
        assert!(bunches.iter().all(|b| b.len() == 1));
    }

    #[test]
    fn partition_bunch_larger_than_input() {
        let bunches = partition_bunches(items(3), 10);
        assert_eq!(bunches.len(), 1);
        assert_eq!(bunches[0].len(), 3);
    }

    #[test]
    fn partition_preserves_order() {
        let bunches = partition_bunches(items(11), 4);
        let flattened: Vec<_> = bunches
            .iter()
            .flat_map(|b| b.items())
            .map(|item| item.id().to_string())
            .collect();
        let expected: Vec<_> = (0..11).map(|id| format!("obj-{id}")).collect();
        assert_eq!(flattened, expected);
    }

    #[test]
    #[should_panic]
    fn partition_zero_bunch_size() {
        partition_bunches(items(2), 0);
    }
}
