//! # Cluster-aware sizing.
//!
//! Splits the oracle's total into contiguous, fixed-size slices. Slice `c`
//! owns ids `[c × S, min((c + 1) × S, total))` where `S` is
//! `shards_per_cluster`, so every id maps to exactly one cluster `id / S`.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ShardError;
use crate::sizing::strategy::clamp;
use crate::sizing::{SizingOracle, SizingStrategy};

/// Contiguous shard range owned by one cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterSlice {
    /// Cluster id.
    pub cluster: u32,
    /// Shard ids, ascending.
    pub shards: Vec<u32>,
}

/// Observed load of one cluster, `0.0..=1.0`.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterLoad {
    /// Cluster id.
    pub cluster: u32,
    /// Fraction of capacity in use.
    pub load: f64,
    /// Shard ids in the cluster.
    pub shards: Vec<u32>,
}

/// Suggested action for a cluster at a given load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadRecommendation {
    /// Load above 0.8.
    Split,
    /// Load below 0.3.
    Merge,
    /// Anything in between.
    Optimal,
}

impl LoadRecommendation {
    /// Classifies `load`.
    pub fn for_load(load: f64) -> Self {
        if load > 0.8 {
            LoadRecommendation::Split
        } else if load < 0.3 {
            LoadRecommendation::Merge
        } else {
            LoadRecommendation::Optimal
        }
    }

    /// Stable label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadRecommendation::Split => "high_load_consider_splitting",
            LoadRecommendation::Merge => "low_load_consider_merging",
            LoadRecommendation::Optimal => "optimal",
        }
    }
}

/// A [`ClusterLoad`] with its recommendation attached.
#[derive(Clone, Debug, PartialEq)]
pub struct BalancedCluster {
    /// Cluster id.
    pub cluster: u32,
    /// Fraction of capacity in use.
    pub load: f64,
    /// Shard ids in the cluster.
    pub shards: Vec<u32>,
    /// Suggested action.
    pub recommendation: LoadRecommendation,
}

/// Oracle-sized strategy that partitions the fleet into clusters.
#[derive(Clone)]
pub struct ClusterStrategy {
    /// Shards per cluster (values below 1 count as 1).
    pub shards_per_cluster: u32,
    /// Lower bound for [`cluster_count`](Self::cluster_count).
    pub min_clusters: u32,
    /// Upper bound for [`cluster_count`](Self::cluster_count).
    pub max_clusters: u32,
    oracle: Option<Arc<dyn SizingOracle>>,
}

impl Default for ClusterStrategy {
    /// Two shards per cluster, one to eight clusters, no oracle.
    fn default() -> Self {
        Self {
            shards_per_cluster: 2,
            min_clusters: 1,
            max_clusters: 8,
            oracle: None,
        }
    }
}

impl ClusterStrategy {
    /// Strategy with `shards_per_cluster` and default cluster bounds.
    pub fn new(shards_per_cluster: u32) -> Self {
        Self {
            shards_per_cluster,
            ..Default::default()
        }
    }

    /// Oracle consulted by [`SizingStrategy::target_count`].
    pub fn with_oracle(mut self, oracle: Arc<dyn SizingOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Cluster bounds.
    pub fn with_bounds(mut self, min_clusters: u32, max_clusters: u32) -> Self {
        self.min_clusters = min_clusters;
        self.max_clusters = max_clusters;
        self
    }

    fn per(&self) -> u32 {
        self.shards_per_cluster.max(1)
    }

    /// Clusters needed for `total` shards, clamped to `[min_clusters, max_clusters]`.
    pub fn cluster_count(&self, total: u32) -> u32 {
        clamp(total.div_ceil(self.per()), self.min_clusters, self.max_clusters)
    }

    /// Cluster owning shard `id`.
    pub fn cluster_for_shard(&self, id: u32) -> u32 {
        id / self.per()
    }

    /// Shards of `cluster` in a fleet of `total`; empty past the last cluster.
    pub fn shards_for_cluster(&self, cluster: u32, total: u32) -> Vec<u32> {
        let start = cluster.saturating_mul(self.per());
        let end = start.saturating_add(self.per()).min(total);
        (start..end).collect()
    }

    /// Splits `[0, total)` into consecutive slices of `shards_per_cluster`.
    pub fn partition(&self, total: u32) -> Vec<ClusterSlice> {
        (0..total.div_ceil(self.per()))
            .map(|cluster| ClusterSlice {
                cluster,
                shards: self.shards_for_cluster(cluster, total),
            })
            .collect()
    }

    /// Sorts clusters by load (highest first) and attaches a recommendation.
    pub fn balance_load(&self, loads: &[ClusterLoad]) -> Vec<BalancedCluster> {
        let mut out: Vec<BalancedCluster> = loads
            .iter()
            .map(|l| BalancedCluster {
                cluster: l.cluster,
                load: l.load,
                shards: l.shards.clone(),
                recommendation: LoadRecommendation::for_load(l.load),
            })
            .collect();
        out.sort_by(|a, b| b.load.total_cmp(&a.load));
        out
    }

    /// Regroups `ids` (in order) into `clusters` slices of equal size, the last
    /// one possibly shorter.
    pub fn redistribute(&self, ids: &[u32], clusters: u32) -> Vec<ClusterSlice> {
        let clusters = clusters.max(1);
        let per = ids.len().div_ceil(clusters as usize).max(1);
        (0..clusters)
            .map(|cluster| {
                let start = (cluster as usize * per).min(ids.len());
                let end = (start + per).min(ids.len());
                ClusterSlice {
                    cluster,
                    shards: ids[start..end].to_vec(),
                }
            })
            .collect()
    }
}

#[async_trait]
impl SizingStrategy for ClusterStrategy {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn target_count(&self) -> Result<u32, ShardError> {
        let Some(oracle) = self.oracle.as_ref() else {
            return Err(ShardError::Config {
                reason: "cluster strategy needs a sizing oracle".into(),
            });
        };
        let total = oracle.recommended_shards().await?;
        tracing::info!(
            clusters = self.cluster_count(total),
            total,
            "cluster strategy calculated shard count"
        );
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sizing::StaticOracle;
    use std::collections::HashSet;

    #[test]
    fn partition_covers_range_without_overlap() {
        let s = ClusterStrategy::new(3);
        for total in [1u32, 2, 6, 7, 20] {
            let slices = s.partition(total);
            let mut seen = HashSet::new();
            for slice in &slices {
                for &id in &slice.shards {
                    assert_eq!(s.cluster_for_shard(id), slice.cluster);
                    assert!(seen.insert(id));
                }
            }
            assert_eq!(seen.len() as u32, total);
        }
        assert_eq!(s.partition(7).last().unwrap().shards, vec![6]);
    }

    #[test]
    fn cluster_queries() {
        let s = ClusterStrategy::new(2);
        assert_eq!(s.shards_for_cluster(1, 5), vec![2, 3]);
        assert_eq!(s.shards_for_cluster(2, 5), vec![4]);
        assert!(s.shards_for_cluster(9, 5).is_empty());
        assert_eq!(s.cluster_count(40), 8);
        assert_eq!(s.cluster_count(0), 1);
    }

    #[test]
    fn balance_sorts_and_recommends() {
        let s = ClusterStrategy::default();
        let out = s.balance_load(&[
            ClusterLoad { cluster: 0, load: 0.2, shards: vec![0, 1] },
            ClusterLoad { cluster: 1, load: 0.9, shards: vec![2, 3] },
            ClusterLoad { cluster: 2, load: 0.5, shards: vec![4] },
        ]);
        let order: Vec<_> = out.iter().map(|c| (c.cluster, c.recommendation)).collect();
        assert_eq!(
            order,
            vec![
                (1, LoadRecommendation::Split),
                (2, LoadRecommendation::Optimal),
                (0, LoadRecommendation::Merge),
            ]
        );
    }

    #[test]
    fn redistribute_regroups_in_order() {
        let s = ClusterStrategy::default();
        let slices = s.redistribute(&[0, 1, 2, 3, 4], 2);
        assert_eq!(slices[0].shards, vec![0, 1, 2]);
        assert_eq!(slices[1].shards, vec![3, 4]);
    }

    #[tokio::test]
    async fn target_count_requires_an_oracle() {
        let err = ClusterStrategy::default().target_count().await.unwrap_err();
        assert_eq!(err.as_label(), "shard_invalid_config");

        let s = ClusterStrategy::new(2).with_oracle(Arc::new(StaticOracle::new(5)));
        assert_eq!(s.target_count().await.unwrap(), 5);
    }
}
