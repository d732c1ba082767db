use super::message::ProcessId;

/// The fixed membership `P`, kept sorted and free of duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peers {
    pub members: Vec<ProcessId>,
}

impl Peers {
    pub fn new(mut members: Vec<ProcessId>) -> Self {
        members.sort_unstable();
        members.dedup();
        Peers { members }
    }

    pub fn is_member(&self, id: ProcessId) -> bool {
        self.members.binary_search(&id).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.members.iter().copied()
    }

    /// Every member except `id`.
    pub fn others(&self, id: ProcessId) -> impl Iterator<Item = ProcessId> + '_ {
        self.iter().filter(move |&k| k != id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
