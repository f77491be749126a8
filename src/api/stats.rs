//! Memory statistics and the dumper interface that receives them.

use crate::util::size::format_bytes;

/// Totals for a whole partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionMemoryStats {
    /// Address space reserved, super pages plus direct maps.
    pub total_mmapped_bytes: usize,

    /// Bytes committed.
    pub total_committed_bytes: usize,

    /// Committed bytes that have been touched.
    pub total_resident_bytes: usize,

    /// Bytes in live slots.
    pub total_active_bytes: usize,

    /// Bytes a `DECOMMIT_EMPTY_SPANS` purge would give back.
    pub total_decommittable_bytes: usize,

    /// Bytes a `DISCARD_UNUSED_SYSTEM_PAGES` purge would give back.
    pub total_discardable_bytes: usize,

    /// Committed bytes of direct maps.
    pub total_direct_mapped_bytes: usize,

    /// Number of live direct maps.
    pub num_direct_mappings: usize,
}

/// Usage of one bucket, or of one direct map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionBucketMemoryStats {
    /// This record describes a single direct map.
    pub is_direct_map: bool,

    /// Slot size of the bucket (committed size for a direct map).
    pub bucket_slot_size: usize,

    /// Bytes per slot span.
    pub allocated_span_size: usize,

    /// Bytes in live slots.
    pub active_bytes: usize,

    /// Touched bytes.
    pub resident_bytes: usize,

    /// Resident bytes of empty spans.
    pub decommittable_bytes: usize,

    /// Unused whole system pages inside active spans.
    pub discardable_bytes: usize,

    pub num_full_spans: usize,
    pub num_active_spans: usize,
    pub num_empty_spans: usize,
    pub num_decommitted_spans: usize,
}

/// Receives the output of `dump_stats`.
///
/// Per-bucket records come first (full dumps only), then the totals.
pub trait PartitionStatsDumper {
    /// Totals for the partition called `partition_name`.
    fn partition_dump_totals(&mut self, partition_name: &str, stats: &PartitionMemoryStats);

    /// One bucket (or direct map) of the partition called `partition_name`.
    fn partitions_dump_bucket_stats(
        &mut self,
        partition_name: &str,
        stats: &PartitionBucketMemoryStats,
    );
}

/// A dumper that keeps everything it is handed.
#[derive(Debug, Clone, Default)]
pub struct CollectingStatsDumper {
    /// Partition name and totals, one entry per dump.
    pub totals: Vec<(String, PartitionMemoryStats)>,

    /// Partition name and bucket record, in dump order.
    pub buckets: Vec<(String, PartitionBucketMemoryStats)>,
}

impl CollectingStatsDumper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals of the most recent dump.
    pub fn last_totals(&self) -> Option<&PartitionMemoryStats> {
        self.totals.last().map(|(_, stats)| stats)
    }
}

impl PartitionStatsDumper for CollectingStatsDumper {
    fn partition_dump_totals(&mut self, partition_name: &str, stats: &PartitionMemoryStats) {
        self.totals.push((partition_name.to_owned(), stats.clone()));
    }

    fn partitions_dump_bucket_stats(
        &mut self,
        partition_name: &str,
        stats: &PartitionBucketMemoryStats,
    ) {
        self.buckets.push((partition_name.to_owned(), stats.clone()));
    }
}

impl std::fmt::Display for PartitionMemoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Partition Memory:")?;
        writeln!(f, "  Mapped:         {}", format_bytes(self.total_mmapped_bytes))?;
        writeln!(f, "  Committed:      {}", format_bytes(self.total_committed_bytes))?;
        writeln!(f, "  Resident:       {}", format_bytes(self.total_resident_bytes))?;
        writeln!(f, "  Active:         {}", format_bytes(self.total_active_bytes))?;
        writeln!(f, "  Decommittable:  {}", format_bytes(self.total_decommittable_bytes))?;
        writeln!(f, "  Discardable:    {}", format_bytes(self.total_discardable_bytes))?;
        writeln!(
            f,
            "  Direct mapped:  {} in {} mappings",
            format_bytes(self.total_direct_mapped_bytes),
            self.num_direct_mappings
        )?;
        Ok(())
    }
}

impl std::fmt::Display for PartitionBucketMemoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_direct_map {
            return writeln!(f, "  direct map {:>10}", format_bytes(self.bucket_slot_size));
        }
        writeln!(
            f,
            "  bucket {:>10}: active {}, resident {}, spans {} full / {} active / {} empty / {} decommitted",
            format_bytes(self.bucket_slot_size),
            format_bytes(self.active_bytes),
            format_bytes(self.resident_bytes),
            self.num_full_spans,
            self.num_active_spans,
            self.num_empty_spans,
            self.num_decommitted_spans
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_dumper() {
        let mut dumper = CollectingStatsDumper::new();
        let bucket = PartitionBucketMemoryStats {
            bucket_slot_size: 64,
            num_active_spans: 1,
            ..Default::default()
        };
        dumper.partitions_dump_bucket_stats("test", &bucket);
        dumper.partition_dump_totals("test", &PartitionMemoryStats::default());

        assert_eq!(dumper.buckets.len(), 1);
        assert_eq!(dumper.buckets[0].1.bucket_slot_size, 64);
        assert_eq!(dumper.last_totals(), Some(&PartitionMemoryStats::default()));
    }

    #[test]
    fn test_display() {
        let stats = PartitionMemoryStats {
            total_committed_bytes: 2048,
            num_direct_mappings: 1,
            ..Default::default()
        };
        let text = stats.to_string();
        assert!(text.contains("Committed"));
        assert!(text.contains("1 mappings"));
    }
}
