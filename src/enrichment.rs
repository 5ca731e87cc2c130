//! Human-readable segment names, descriptions and interaction strategies
//!
//! Heuristics operate on per-cluster averages of the core attributes in
//! original units, so they apply unchanged to the output of any clusterer.

use crate::data::numeric_column;
use crate::error::{Result, SegmentError};
use ndarray::Array1;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const HIGH_VALUE_REVENUE: f64 = 15_000.0;
const MEDIUM_VALUE_REVENUE: f64 = 5_000.0;
const HIGH_RETURN_RATE: f64 = 0.15;

/// Average core attributes of one cluster, rounded for presentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCharacteristics {
    pub size: usize,
    pub percentage: f64,
    pub avg_total_revenue: f64,
    pub avg_total_purchases: f64,
    pub avg_order_value: f64,
    pub avg_recency_days: f64,
    pub avg_frequency: f64,
    pub avg_lifetime_months: f64,
    pub avg_return_rate: f64,
}

/// A cluster with its name, description and recommended actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedCluster {
    pub segment_name: String,
    pub description: String,
    pub characteristics: ClusterCharacteristics,
    pub interaction_strategies: Vec<String>,
    pub cluster_id: usize,
}

#[derive(Debug, Serialize)]
struct AgentExport<'a> {
    cluster_profiles: &'a BTreeMap<usize, EnrichedCluster>,
    metadata: AgentExportMetadata,
}

#[derive(Debug, Serialize)]
struct AgentExportMetadata {
    n_clusters: usize,
    total_customers: usize,
}

/// Accumulates enriched clusters for export
#[derive(Debug, Clone, Default)]
pub struct ClusterEnrichment {
    cluster_profiles: BTreeMap<usize, EnrichedCluster>,
}

impl ClusterEnrichment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cluster_profiles(&self) -> &BTreeMap<usize, EnrichedCluster> {
        &self.cluster_profiles
    }

    /// Characteristics, names, descriptions and strategies for every present cluster
    ///
    /// # Arguments
    /// * `table` - Customer table holding the core columns in original units
    /// * `labels` - One cluster id per table row
    ///
    /// # Returns
    /// * Enriched clusters keyed by cluster id, also kept for export
    pub fn enrich_clusters(
        &mut self,
        table: &DataFrame,
        labels: &Array1<usize>,
    ) -> Result<&BTreeMap<usize, EnrichedCluster>> {
        let characteristics = analyze_characteristics(table, labels)?;
        let names = segment_names(&characteristics);

        for (&cluster_id, stats) in &characteristics {
            let segment_name = names
                .get(&cluster_id)
                .cloned()
                .unwrap_or_else(|| format!("Segment {cluster_id}"));
            self.cluster_profiles.insert(
                cluster_id,
                EnrichedCluster {
                    segment_name,
                    description: describe(stats),
                    characteristics: stats.clone(),
                    interaction_strategies: interaction_strategies(stats),
                    cluster_id,
                },
            );
        }
        Ok(&self.cluster_profiles)
    }

    /// Write `{cluster_profiles, metadata}` as pretty JSON
    pub fn export_for_ai_agent(&self, output_path: impl AsRef<Path>) -> Result<()> {
        let output_path = output_path.as_ref();
        if self.cluster_profiles.is_empty() {
            return Err(SegmentError::config(
                "no cluster profiles to export; run enrich_clusters first",
            ));
        }

        let export = AgentExport {
            cluster_profiles: &self.cluster_profiles,
            metadata: AgentExportMetadata {
                n_clusters: self.cluster_profiles.len(),
                total_customers: self
                    .cluster_profiles
                    .values()
                    .map(|p| p.characteristics.size)
                    .sum(),
            },
        };

        let io_error = |source| SegmentError::Serialization {
            path: output_path.to_path_buf(),
            source,
        };
        let file = File::create(output_path).map_err(io_error)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &export)?;
        writer.flush().map_err(io_error)?;

        log::info!("Enriched cluster data exported to {}", output_path.display());
        Ok(())
    }
}

/// Per-cluster averages of the core columns, keyed by cluster id
pub fn analyze_characteristics(
    table: &DataFrame,
    labels: &Array1<usize>,
) -> Result<BTreeMap<usize, ClusterCharacteristics>> {
    if labels.len() != table.height() {
        return Err(SegmentError::config(format!(
            "{} labels for {} rows",
            labels.len(),
            table.height()
        )));
    }

    let revenue = numeric_column(table, "total_revenue")?;
    let purchases = numeric_column(table, "total_purchases")?;
    let order_value = numeric_column(table, "avg_order_value")?;
    let recency = numeric_column(table, "recency_days")?;
    let frequency = numeric_column(table, "frequency_per_month")?;
    let lifetime = numeric_column(table, "customer_lifetime_months")?;
    let return_rate = numeric_column(table, "return_rate")?;

    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        members.entry(label).or_default().push(row);
    }

    let n_samples = labels.len() as f64;
    let mean_of = |column: &Array1<f64>, rows: &[usize]| {
        rows.iter().map(|&r| column[r]).sum::<f64>() / rows.len() as f64
    };

    Ok(members
        .into_iter()
        .map(|(cluster_id, rows)| {
            let stats = ClusterCharacteristics {
                size: rows.len(),
                percentage: round_to(rows.len() as f64 / n_samples * 100.0, 2),
                avg_total_revenue: round_to(mean_of(&revenue, &rows), 2),
                avg_total_purchases: round_to(mean_of(&purchases, &rows), 2),
                avg_order_value: round_to(mean_of(&order_value, &rows), 2),
                avg_recency_days: round_to(mean_of(&recency, &rows), 2),
                avg_frequency: round_to(mean_of(&frequency, &rows), 2),
                avg_lifetime_months: round_to(mean_of(&lifetime, &rows), 2),
                avg_return_rate: round_to(mean_of(&return_rate, &rows), 3),
            };
            (cluster_id, stats)
        })
        .collect())
}

/// One-paragraph summary built from value tier, engagement and recency
pub fn describe(stats: &ClusterCharacteristics) -> String {
    let value_tier = if stats.avg_total_revenue > HIGH_VALUE_REVENUE {
        "High-Value"
    } else if stats.avg_total_revenue > MEDIUM_VALUE_REVENUE {
        "Medium-Value"
    } else {
        "Low-Value"
    };
    let engagement = if stats.avg_frequency > 3.0 {
        "Highly Engaged"
    } else if stats.avg_frequency > 1.0 {
        "Regularly Engaged"
    } else {
        "Occasionally Engaged"
    };
    let recency_status = if stats.avg_recency_days < 30.0 {
        "Recent"
    } else if stats.avg_recency_days < 90.0 {
        "Moderately Recent"
    } else {
        "At-Risk"
    };

    format!(
        "{value_tier} {engagement} Customers ({recency_status}): \
         This segment represents {}% of the customer base with average revenue of ${}. \
         They purchase approximately {:.1} times per month with an average order value of ${:.2}. \
         Last purchase was {:.0} days ago on average.",
        stats.percentage,
        format_currency(stats.avg_total_revenue),
        stats.avg_frequency,
        stats.avg_order_value,
        stats.avg_recency_days,
    )
}

/// Short names assigned by descending average revenue
pub fn segment_names(
    characteristics: &BTreeMap<usize, ClusterCharacteristics>,
) -> BTreeMap<usize, String> {
    let mut ranked: Vec<(&usize, &ClusterCharacteristics)> = characteristics.iter().collect();
    // Stable sort keeps lower cluster ids first on equal revenue
    ranked.sort_by(|a, b| b.1.avg_total_revenue.total_cmp(&a.1.avg_total_revenue));

    ranked
        .into_iter()
        .enumerate()
        .map(|(rank, (&cluster_id, stats))| {
            let name = match rank {
                0 if stats.avg_recency_days < 30.0 => "VIP Champions",
                0 => "High-Value At-Risk",
                1 if stats.avg_frequency > 2.0 => "Loyal Regulars",
                1 => "Potential Loyalists",
                2 if stats.avg_recency_days < 60.0 => "Promising Customers",
                2 => "Need Attention",
                _ if stats.avg_recency_days > 120.0 => "Hibernating",
                _ => "Price Sensitive",
            };
            (cluster_id, name.to_string())
        })
        .collect()
}

/// Recommended actions from revenue, frequency, recency and return rate
pub fn interaction_strategies(stats: &ClusterCharacteristics) -> Vec<String> {
    let mut strategies: Vec<&str> = if stats.avg_total_revenue > HIGH_VALUE_REVENUE {
        vec![
            "Provide premium customer service and dedicated account manager",
            "Offer exclusive early access to new products",
            "Create personalized shopping experiences",
        ]
    } else if stats.avg_total_revenue > MEDIUM_VALUE_REVENUE {
        vec![
            "Implement loyalty program with tiered rewards",
            "Send personalized product recommendations",
            "Offer bundle deals to increase order value",
        ]
    } else {
        vec![
            "Provide special discounts and promotions",
            "Send educational content about product value",
            "Create entry-level product bundles",
        ]
    };

    if stats.avg_frequency < 1.0 {
        strategies.push("Increase engagement through regular newsletters and updates");
    }
    if stats.avg_recency_days > 90.0 {
        strategies.extend([
            "Launch win-back campaign with special offers",
            "Send re-engagement email sequence",
            "Conduct customer feedback survey to understand concerns",
        ]);
    }
    if stats.avg_return_rate > HIGH_RETURN_RATE {
        strategies.extend([
            "Improve product descriptions and sizing guides",
            "Offer virtual try-on or consultation services",
            "Review product quality and customer expectations",
        ]);
    }

    strategies.into_iter().map(String::from).collect()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// `12345.6` -> `12,345.60`
fn format_currency(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{fraction}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use polars::prelude::*;
    use tempfile::TempDir;

    fn customer_table() -> DataFrame {
        df!(
            "customer_id" => ["C1", "C2", "C3", "C4", "C5"],
            "total_purchases" => [120.0, 110.0, 8.0, 6.0, 30.0],
            "total_revenue" => [24000.0, 22000.0, 800.0, 600.0, 7000.0],
            "avg_order_value" => [200.0, 200.0, 100.0, 100.0, 233.33],
            "recency_days" => [5.0, 15.0, 200.0, 160.0, 45.0],
            "frequency_per_month" => [4.0, 5.0, 0.5, 0.3, 1.5],
            "customer_lifetime_months" => [30.0, 22.0, 16.0, 20.0, 20.0],
            "return_rate" => [0.05, 0.07, 0.3, 0.2, 0.1]
        )
        .unwrap()
    }

    #[test]
    fn test_analyze_characteristics() {
        let characteristics =
            analyze_characteristics(&customer_table(), &array![0, 0, 1, 1, 2]).unwrap();
        assert_eq!(characteristics.len(), 3);

        let top = &characteristics[&0];
        assert_eq!(top.size, 2);
        assert_eq!(top.percentage, 40.0);
        assert_eq!(top.avg_total_revenue, 23000.0);
        assert_eq!(top.avg_recency_days, 10.0);
        assert_eq!(characteristics[&1].avg_return_rate, 0.25);
    }

    #[test]
    fn test_label_count_mismatch() {
        let err = analyze_characteristics(&customer_table(), &array![0, 1]).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_segment_names_ranked_by_revenue() {
        let characteristics =
            analyze_characteristics(&customer_table(), &array![0, 0, 1, 1, 2]).unwrap();
        let names = segment_names(&characteristics);
        assert_eq!(names[&0], "VIP Champions");
        // Second by revenue is cluster 2 with frequency 1.5
        assert_eq!(names[&2], "Potential Loyalists");
        // Third by revenue with recency 180
        assert_eq!(names[&1], "Need Attention");
    }

    #[test]
    fn test_description_and_strategies() {
        let characteristics =
            analyze_characteristics(&customer_table(), &array![0, 0, 1, 1, 2]).unwrap();

        let top = describe(&characteristics[&0]);
        assert!(top.starts_with("High-Value Highly Engaged Customers (Recent)"));
        assert!(top.contains("$23,000.00"));

        let lapsed = interaction_strategies(&characteristics[&1]);
        assert_eq!(lapsed[0], "Provide special discounts and promotions");
        assert!(lapsed.iter().any(|s| s.starts_with("Launch win-back")));
        assert!(lapsed.iter().any(|s| s.starts_with("Improve product descriptions")));
        assert!(lapsed.iter().any(|s| s.starts_with("Increase engagement")));
        assert_eq!(lapsed.len(), 10);
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(1234567.891), "1,234,567.89");
        assert_eq!(format_currency(999.5), "999.50");
        assert_eq!(format_currency(0.0), "0.00");
    }

    #[test]
    fn test_export_for_ai_agent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("enriched.json");

        let empty = ClusterEnrichment::new();
        assert!(empty.export_for_ai_agent(&path).is_err());

        let mut enrichment = ClusterEnrichment::new();
        enrichment
            .enrich_clusters(&customer_table(), &array![0, 0, 1, 1, 2])
            .unwrap();
        enrichment.export_for_ai_agent(&path).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["metadata"]["n_clusters"], 3);
        assert_eq!(written["metadata"]["total_customers"], 5);
        assert_eq!(
            written["cluster_profiles"]["0"]["segment_name"],
            "VIP Champions"
        );
    }
}
