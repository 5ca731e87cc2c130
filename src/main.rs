//! SegmentForge: customer segmentation CLI
//!
//! Loads a customer table, runs the requested clustering methods, exports one
//! profile per method and prints a comparison of their silhouette scores.

use anyhow::{Context, Result};
use clap::Parser;
use polars::prelude::DataFrame;
use segmentforge::{
    build_clusterer, export_profile, feature_config, load_customer_table, select_features, Args,
    ClusterEnrichment, ClusteringMethod, SegmentationConfig,
};
use std::time::Instant;

fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if args.verbose {
        println!("SegmentForge - Customer Segmentation");
        println!("====================================\n");
    }

    let config = args.resolve_config().context("invalid configuration")?;
    let start_time = Instant::now();

    let table = load_customer_table(&args.input)
        .with_context(|| format!("failed to load {}", args.input.display()))?;
    println!("✓ Data loaded: {} customers", table.height());

    let methods = args.method.methods();
    let mut scores = Vec::new();
    let mut failures = Vec::new();
    for &method in &methods {
        match run_method(method, &table, &config, args.verbose) {
            Ok(silhouette) => scores.push((method, silhouette)),
            Err(err) => {
                log::error!("{} clustering failed: {:#}", method, err);
                failures.push((method, err));
            }
        }
    }

    if scores.len() > 1 {
        println!("\n=== Method Comparison (silhouette, higher is better) ===");
        for (method, score) in &scores {
            println!("{:<32} {:.4}", method.display_name(), score);
        }
        if let Some((best, score)) = scores.iter().max_by(|a, b| a.1.total_cmp(&b.1)) {
            println!("Best separation: {} ({:.4})", best, score);
        }
    }

    println!("\n=== Pipeline Complete ===");
    println!(
        "Total processing time: {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    println!("Profiles saved to: {}", config.paths.output_dir.display());

    if !failures.is_empty() {
        println!("\n=== Failed Methods ===");
        for (method, err) in &failures {
            println!("{}: {:#}", method.display_name(), err);
        }
        anyhow::bail!("{} of {} methods failed", failures.len(), methods.len());
    }

    Ok(())
}

/// Fit, evaluate, profile, export and enrich one method; returns its silhouette
fn run_method(
    method: ClusteringMethod,
    table: &DataFrame,
    config: &SegmentationConfig,
    verbose: bool,
) -> Result<f64> {
    println!("\n=== {} ===", method.display_name());

    let data = select_features(table, feature_config(method, config), &config.columns)?;
    if verbose {
        println!("  Features ({}): {}", data.n_features(), data.columns.join(", "));
    }

    let mut clusterer = build_clusterer(method, config);
    let model_start = Instant::now();
    let assignment = clusterer.fit_predict(&data)?;
    println!(
        "✓ Model fitted with {} clusters in {:.2}s",
        clusterer.n_clusters(),
        model_start.elapsed().as_secs_f64()
    );

    for (cluster, size) in assignment
        .cluster_sizes(clusterer.n_clusters())
        .iter()
        .enumerate()
    {
        let percentage = *size as f64 / data.n_samples() as f64 * 100.0;
        println!("Cluster {}: {} customers ({:.1}%)", cluster, size, percentage);
    }

    let profile = clusterer.generate_profile(&data)?;
    let silhouette = profile.metrics.silhouette_score();
    println!("Silhouette score: {:.4}", silhouette);
    if let Some(uncertainty) = &profile.uncertainty_metrics {
        println!(
            "Low-confidence assignments: {} ({:.1}%)",
            uncertainty.low_confidence_count, uncertainty.low_confidence_pct
        );
    }

    let exported = export_profile(&profile, &config.paths.output_dir)?;
    println!("✓ Profile exported to {}", exported.json_path.display());

    let mut enrichment = ClusterEnrichment::new();
    let enriched = enrichment.enrich_clusters(table, &assignment.labels)?;
    for cluster in enriched.values() {
        println!(
            "  [{}] {} ({} customers)",
            cluster.cluster_id, cluster.segment_name, cluster.characteristics.size
        );
    }
    let enriched_path = config
        .paths
        .output_dir
        .join(format!("{}_enriched_clusters.json", method.slug()));
    enrichment.export_for_ai_agent(&enriched_path)?;

    Ok(silhouette)
}
