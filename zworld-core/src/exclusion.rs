use std::collections::HashSet;

/// Decides which actor/overlay identifiers must be purged from actor lists.
///
/// An identifier is excluded when it indexes past the overlay table, or when
/// it is listed in the profile's exclusion set.
#[derive(Debug, Clone)]
pub struct ExclusionPolicy {
    table_length: u16,
    excluded: HashSet<u16>,
}

impl ExclusionPolicy {
    pub fn new(table_length: u16, excluded: impl IntoIterator<Item = u16>) -> Self {
        ExclusionPolicy {
            table_length,
            excluded: excluded.into_iter().collect(),
        }
    }

    pub fn table_length(&self) -> u16 {
        self.table_length
    }

    pub fn is_excluded(&self, id: u16) -> bool {
        id >= self.table_length || self.excluded.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excludes_listed_and_out_of_range_ids() {
        let policy = ExclusionPolicy::new(471, [0x0001, 0x0017]);
        assert!(policy.is_excluded(0x0001));
        assert!(policy.is_excluded(0x0017));
        assert!(policy.is_excluded(471));
        assert!(policy.is_excluded(0xFFFF));
        assert!(!policy.is_excluded(0x0000));
        assert!(!policy.is_excluded(0x0003));
        assert!(!policy.is_excluded(470));
    }
}
