//! Sorted table index: an ordered sequence of
//! `(first_chunk_id, table_meta, entries)` tuples supporting "find the
//! largest entry whose key <= q". Appended in order during open, so a
//! binary search over the already-sorted keys serves lookups.

use crate::ewf::records::TableHeaderMeta;

/// Everything the reader needs to resolve chunks within one `table` section.
pub struct TableRecord {
    /// Chunk id of the first chunk this table covers.
    pub first_chunk_id: usize,
    /// Decoded table header (`base_offset`, checksum, etc).
    pub meta: TableHeaderMeta,
    /// Raw 32-bit entries, with a synthetic sentinel appended so that
    /// `next - current` sizes even the table's last chunk (the
    /// "sentinel entry" trick).
    pub entries: Vec<u32>,
}

#[derive(Default)]
pub struct TableIndex {
    tables: Vec<TableRecord>,
}

impl TableIndex {
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    /// Registers a table. Callers must append in increasing
    /// `first_chunk_id` order, which open-time traversal naturally does.
    pub fn push(&mut self, table: TableRecord) {
        debug_assert!(
            self.tables
                .last()
                .map(|t| t.first_chunk_id < table.first_chunk_id)
                .unwrap_or(true),
            "tables must be registered in increasing first_chunk_id order"
        );
        self.tables.push(table);
    }

    /// Returns the table with the largest `first_chunk_id <= chunk_id`, or
    /// `None` if `chunk_id` precedes every registered table.
    pub fn find_le(&self, chunk_id: usize) -> Option<&TableRecord> {
        match self
            .tables
            .binary_search_by_key(&chunk_id, |t| t.first_chunk_id)
        {
            Ok(idx) => Some(&self.tables[idx]),
            Err(0) => None,
            Err(idx) => Some(&self.tables[idx - 1]),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ewf::records::TableHeaderMeta;

    fn table(first_chunk_id: usize, entries: Vec<u32>) -> TableRecord {
        TableRecord {
            first_chunk_id,
            meta: TableHeaderMeta {
                base_offset: 0,
                number_of_entries: entries.len() as u64,
                checksum: 0,
            },
            entries,
        }
    }

    #[test]
    fn find_le_picks_largest_key_not_exceeding_query() {
        let mut idx = TableIndex::new();
        idx.push(table(0, vec![0, 1]));
        idx.push(table(2, vec![0, 1, 2]));
        idx.push(table(5, vec![0]));

        assert_eq!(idx.find_le(0).unwrap().first_chunk_id, 0);
        assert_eq!(idx.find_le(1).unwrap().first_chunk_id, 0);
        assert_eq!(idx.find_le(2).unwrap().first_chunk_id, 2);
        assert_eq!(idx.find_le(4).unwrap().first_chunk_id, 2);
        assert_eq!(idx.find_le(5).unwrap().first_chunk_id, 5);
        assert_eq!(idx.find_le(100).unwrap().first_chunk_id, 5);
    }

    #[test]
    fn find_le_below_first_table_is_none() {
        let mut idx = TableIndex::new();
        idx.push(table(3, vec![0]));
        assert!(idx.find_le(0).is_none());
        assert!(idx.find_le(2).is_none());
    }
}
