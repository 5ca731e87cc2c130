//! Customer table loading and feature selection using Polars

use crate::config::{ColumnsConfig, FeatureConfig};
use crate::error::{Result, SegmentError};
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use std::collections::HashSet;
use std::path::Path;

/// Core RFM attributes every customer table must carry
pub const CORE_FEATURES: [&str; 7] = [
    "total_purchases",
    "total_revenue",
    "avg_order_value",
    "recency_days",
    "frequency_per_month",
    "customer_lifetime_months",
    "return_rate",
];

/// Identifier column; never part of the numeric matrix
pub const CUSTOMER_ID_COLUMN: &str = "customer_id";

/// Per-column standardization parameters retained for inverse transforms
#[derive(Debug, Clone, PartialEq)]
pub struct ScalerState {
    /// Column means of the fitted data
    pub mean: Array1<f64>,
    /// Column population standard deviations, with 1.0 substituted for constant columns
    pub scale: Array1<f64>,
}

impl ScalerState {
    /// Fit zero-mean / unit-variance scaling on raw values
    pub fn fit(raw: &Array2<f64>) -> Self {
        let n_features = raw.ncols();
        let mean = raw
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let std = raw.std_axis(Axis(0), 0.0);
        let scale = std
            .iter()
            .zip(mean.iter())
            .map(|(&s, &m)| {
                // Float noise on a constant column must not blow up into ±1 values
                if s <= 10.0 * f64::EPSILON * m.abs().max(1.0) || !s.is_finite() {
                    1.0
                } else {
                    s
                }
            })
            .collect::<Array1<f64>>();
        Self { mean, scale }
    }

    pub fn transform(&self, raw: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_width(raw.ncols())?;
        Ok((raw - &self.mean) / &self.scale)
    }

    /// Map standardized rows (e.g. cluster centers) back to original units
    pub fn inverse_transform(&self, scaled: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_width(scaled.ncols())?;
        Ok(scaled * &self.scale + &self.mean)
    }

    fn check_width(&self, n_cols: usize) -> Result<()> {
        if n_cols != self.mean.len() {
            return Err(SegmentError::config(format!(
                "expected {} feature columns, got {}",
                self.mean.len(),
                n_cols
            )));
        }
        Ok(())
    }
}

/// Selected and standardized features for one clustering run
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    /// Standardized features (n_customers, n_features)
    pub features: Array2<f64>,
    /// The same columns in original units
    pub raw_features: Array2<f64>,
    /// Contributing column names, in matrix order
    pub columns: Vec<String>,
    pub scaler: ScalerState,
    /// Customer identifiers, when the table carries them
    pub customer_ids: Option<Vec<String>>,
}

impl FeatureMatrix {
    /// Build from an already numeric matrix, fitting a fresh scaler
    pub fn from_raw(raw_features: Array2<f64>, columns: Vec<String>) -> Result<Self> {
        if raw_features.nrows() == 0 {
            return Err(SegmentError::config("feature matrix has no rows"));
        }
        if raw_features.ncols() != columns.len() {
            return Err(SegmentError::config(format!(
                "{} column names for a matrix with {} columns",
                columns.len(),
                raw_features.ncols()
            )));
        }
        if raw_features.iter().any(|v| !v.is_finite()) {
            return Err(SegmentError::config("feature matrix contains non-finite values"));
        }
        let scaler = ScalerState::fit(&raw_features);
        let features = scaler.transform(&raw_features)?;
        Ok(Self {
            features,
            raw_features,
            columns,
            scaler,
            customer_ids: None,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.features.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }
}

/// Load a customer table from a CSV file with a header row
///
/// # Arguments
/// * `path` - CSV file with one row per customer
///
/// # Returns
/// * The table as read; an empty table is a configuration error
pub fn load_customer_table(path: impl AsRef<Path>) -> Result<DataFrame> {
    let path = path.as_ref();
    let table = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    if table.height() == 0 {
        return Err(SegmentError::config(format!(
            "no customer rows found in {}",
            path.display()
        )));
    }

    log::info!(
        "Loaded {} customers with {} columns from {}",
        table.height(),
        table.width(),
        path.display()
    );
    Ok(table)
}

/// Resolve the participating columns and standardize them
///
/// Missing core columns are fatal. Enriched columns, when `use_enriched` is
/// set, are appended after the core ones; any that the table lacks are skipped
/// with a warning.
///
/// # Arguments
/// * `table` - Customer table
/// * `core_columns` - Required feature columns, in matrix order
/// * `enriched_columns` - Optional extra columns
/// * `use_enriched` - Whether the extra columns participate at all
///
/// # Returns
/// * `FeatureMatrix` with standardized and raw values plus the fitted scaler
pub fn select_and_scale(
    table: &DataFrame,
    core_columns: &[String],
    enriched_columns: Option<&[String]>,
    use_enriched: bool,
) -> Result<FeatureMatrix> {
    if table.height() == 0 {
        return Err(SegmentError::config("customer table is empty"));
    }

    let missing: Vec<&str> = core_columns
        .iter()
        .filter(|name| table.column(name.as_str()).is_err())
        .map(|name| name.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(SegmentError::config(format!(
            "missing required feature columns: {}",
            missing.join(", ")
        )));
    }

    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for name in core_columns {
        push_column(&mut columns, &mut seen, name);
    }

    if use_enriched {
        let mut skipped = 0usize;
        for name in enriched_columns.unwrap_or_default() {
            if table.column(name.as_str()).is_err() {
                log::warn!("Enriched feature '{}' not present in table, skipping", name);
                skipped += 1;
                continue;
            }
            push_column(&mut columns, &mut seen, name);
        }
        log::debug!(
            "Enriched mode: {} columns selected, {} skipped",
            columns.len(),
            skipped
        );
    }

    if columns.is_empty() {
        return Err(SegmentError::config("no feature columns selected"));
    }

    let n_samples = table.height();
    let mut raw = Array2::zeros((n_samples, columns.len()));
    for (j, name) in columns.iter().enumerate() {
        let values = numeric_column(table, name)?;
        raw.column_mut(j).assign(&values);
    }

    let mut matrix = FeatureMatrix::from_raw(raw, columns)?;
    matrix.customer_ids = customer_ids(table)?;
    Ok(matrix)
}

/// Convenience wrapper resolving lists from a method's configuration
pub fn select_features(
    table: &DataFrame,
    features: &FeatureConfig,
    hierarchy: &ColumnsConfig,
) -> Result<FeatureMatrix> {
    let mut enriched = features.enriched_features_to_use.clone();
    enriched.extend(hierarchy.hierarchy_columns());
    select_and_scale(
        table,
        &features.features_to_use,
        Some(&enriched),
        features.use_enriched_features,
    )
}

/// Extract one column as f64, failing on nulls or non-numeric content
pub fn numeric_column(table: &DataFrame, name: &str) -> Result<Array1<f64>> {
    let column = table.column(name)?;
    let casted = column.cast(&DataType::Float64)?;
    let values = casted.f64()?;

    let mut out = Vec::with_capacity(values.len());
    for value in values.into_iter() {
        match value {
            Some(v) if v.is_finite() => out.push(v),
            _ => {
                return Err(SegmentError::config(format!(
                    "column '{name}' contains null or non-numeric values"
                )))
            }
        }
    }
    Ok(Array1::from(out))
}

/// Number of distinct rows in a matrix
pub fn distinct_row_count(features: &Array2<f64>) -> usize {
    features
        .outer_iter()
        .map(|row| row.iter().map(|v| (v + 0.0).to_bits()).collect::<Vec<u64>>())
        .collect::<HashSet<_>>()
        .len()
}

fn push_column(columns: &mut Vec<String>, seen: &mut HashSet<String>, name: &str) {
    if name == CUSTOMER_ID_COLUMN {
        log::warn!("'{}' is an identifier and is never clustered on", name);
        return;
    }
    if seen.insert(name.to_string()) {
        columns.push(name.to_string());
    }
}

fn customer_ids(table: &DataFrame) -> Result<Option<Vec<String>>> {
    let Ok(column) = table.column(CUSTOMER_ID_COLUMN) else {
        return Ok(None);
    };
    let casted = column.cast(&DataType::String)?;
    let ids = casted
        .str()?
        .into_iter()
        .enumerate()
        .map(|(row, id)| id.map(str::to_string).unwrap_or_else(|| format!("row_{row}")))
        .collect();
    Ok(Some(ids))
}

/// Core feature names as owned strings
pub fn core_feature_names() -> Vec<String> {
    CORE_FEATURES.iter().map(|s| s.to_string()).collect()
}
