//! Outstanding-request bookkeeping: which xids await a reply, of what kind,
//! and until when.

use fnv::FnvHashMap;

use message::MsgKind;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Fail)]
pub enum XidError {
    #[fail(display = "xid {} already has an outstanding request", xid)]
    Duplicate { xid: u32 },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct XidEntry {
    pub kind: MsgKind,
    pub sub_type: u16,
    pub deadline: u64,
}

/// Per-kind map of outstanding transactions, with a flat index enforcing
/// that no two live requests share an xid regardless of kind.
#[derive(Debug, Default)]
pub struct XidStore {
    by_kind: FnvHashMap<MsgKind, FnvHashMap<u32, XidEntry>>,
    live: FnvHashMap<u32, MsgKind>,
}

impl XidStore {
    pub fn new() -> Self {
        XidStore::default()
    }

    pub fn contains(&self, xid: u32) -> bool {
        self.live.contains_key(&xid)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn insert(
        &mut self,
        xid: u32,
        kind: MsgKind,
        sub_type: u16,
        now: u64,
        deadline: u64,
    ) -> Result<(), XidError> {
        debug_assert!(deadline > now, "xid deadline must be strictly future");
        if self.live.contains_key(&xid) {
            return Err(XidError::Duplicate { xid });
        }
        self.live.insert(xid, kind);
        self.by_kind.entry(kind).or_insert_with(FnvHashMap::default).insert(
            xid,
            XidEntry {
                kind,
                sub_type,
                deadline,
            },
        );
        Ok(())
    }

    /// Remove by kind + xid, as on reply receipt.
    pub fn remove(&mut self, kind: MsgKind, xid: u32) -> Option<XidEntry> {
        let entry = self.by_kind.get_mut(&kind).and_then(|m| m.remove(&xid));
        if entry.is_some() {
            self.live.remove(&xid);
        }
        entry
    }

    /// Remove by xid alone, as on `release_sync_xid`.
    pub fn release(&mut self, xid: u32) -> Option<XidEntry> {
        let kind = self.live.remove(&xid)?;
        self.by_kind.get_mut(&kind).and_then(|m| m.remove(&xid))
    }

    /// Collect-then-remove scan of one kind: returns the expired entries
    /// after deleting them, so callbacks can run without aliasing the maps.
    pub fn take_expired(&mut self, kind: MsgKind, now: u64) -> Vec<(u32, XidEntry)> {
        let expired: Vec<u32> = match self.by_kind.get(&kind) {
            Some(map) => map
                .iter()
                .filter(|&(_, e)| e.deadline <= now)
                .map(|(&xid, _)| xid)
                .collect(),
            None => return Vec::new(),
        };
        expired
            .into_iter()
            .filter_map(|xid| self.remove(kind, xid).map(|e| (xid, e)))
            .collect()
    }

    /// Earliest deadline still outstanding for `kind`, for timer rearming.
    pub fn next_deadline(&self, kind: MsgKind) -> Option<u64> {
        self.by_kind
            .get(&kind)
            .and_then(|m| m.values().map(|e| e.deadline).min())
    }

    pub fn outstanding(&self, kind: MsgKind) -> usize {
        self.by_kind.get(&kind).map_or(0, FnvHashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_xid_rejected_across_kinds() {
        let mut store = XidStore::new();
        store
            .insert(7, MsgKind::MultipartRequest, 3, 0, 100)
            .unwrap();
        assert_eq!(
            store.insert(7, MsgKind::BarrierRequest, 0, 0, 100),
            Err(XidError::Duplicate { xid: 7 })
        );
        assert!(store.contains(7));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_and_release() {
        let mut store = XidStore::new();
        store.insert(1, MsgKind::EchoRequest, 0, 0, 10).unwrap();
        store.insert(2, MsgKind::BarrierRequest, 0, 0, 10).unwrap();
        assert!(store.remove(MsgKind::EchoRequest, 1).is_some());
        assert!(store.remove(MsgKind::EchoRequest, 1).is_none());
        assert!(!store.contains(1));
        assert!(store.release(2).is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn staged_scan_takes_exactly_the_expired() {
        let mut store = XidStore::new();
        for (xid, deadline) in &[(1u32, 50u64), (2, 150), (3, 100), (4, 99)] {
            store
                .insert(*xid, MsgKind::MultipartRequest, 3, 0, *deadline)
                .unwrap();
        }
        store.insert(5, MsgKind::BarrierRequest, 0, 0, 10).unwrap();

        let mut expired = store.take_expired(MsgKind::MultipartRequest, 100);
        expired.sort_by_key(|&(xid, _)| xid);
        let xids: Vec<u32> = expired.iter().map(|&(xid, _)| xid).collect();
        assert_eq!(xids, vec![1, 3, 4]);
        // survivors: xid 2 of the same kind, xid 5 of the other
        assert_eq!(store.outstanding(MsgKind::MultipartRequest), 1);
        assert_eq!(store.next_deadline(MsgKind::MultipartRequest), Some(150));
        assert!(store.contains(5));
    }

    #[test]
    fn scan_of_absent_kind_is_empty() {
        let mut store = XidStore::new();
        assert!(store.take_expired(MsgKind::RoleRequest, 1000).is_empty());
        assert_eq!(store.next_deadline(MsgKind::RoleRequest), None);
    }
}
