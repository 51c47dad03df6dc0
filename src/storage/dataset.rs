//! Hive-partitioned parquet datasets over a [`Platform`].
//!
//! Layout: `root/col1=value1/col2=value2/.../file.parquet`, spaces in
//! partition values replaced by `_`. Partition columns are dropped from the
//! file payload and reconstituted from the directory names on read, so the
//! cheap "is this production registered" check is a directory listing, never
//! a file read.

use anyhow::{anyhow, Context, Result};
use arrow_array::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::collections::HashMap;

use super::Platform;

/// Partition values recovered from a file's directory path, keyed by column.
pub type PartitionValues = HashMap<String, String>;

/// A row type persistable as a partitioned parquet dataset.
pub trait DatasetRecord: Sized + Clone {
    /// Partition columns, outermost first. Empty means a single file.
    fn partition_cols() -> &'static [&'static str];
    /// This row's value for a partition column, as it appears in the path.
    fn partition_value(&self, col: &str) -> String;
    /// Encode the non-partition columns of `rows` as one record batch.
    fn payload_batch(rows: &[Self]) -> Result<RecordBatch>;
    /// Decode rows from a payload batch plus the partition values of the file
    /// it came from.
    fn from_payload(batch: &RecordBatch, partition: &PartitionValues) -> Result<Vec<Self>>;
    /// String view of any column, partition or payload, for post-read
    /// filtering. `None` for null.
    fn column_value(&self, col: &str) -> Option<String>;
}

/// Simple comparison filter; partition columns prune directories, payload
/// columns filter rows after the read.
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(&'static str, String),
    Ne(&'static str, String),
    In(&'static str, Vec<String>),
}

impl Filter {
    fn col(&self) -> &'static str {
        match self {
            Filter::Eq(c, _) | Filter::Ne(c, _) | Filter::In(c, _) => c,
        }
    }

    fn accepts(&self, value: Option<&str>) -> bool {
        match (self, value) {
            (Filter::Eq(_, want), Some(v)) => sanitize(want) == sanitize(v),
            (Filter::Ne(_, want), Some(v)) => sanitize(want) != sanitize(v),
            (Filter::In(_, wants), Some(v)) => {
                let v = sanitize(v);
                wants.iter().any(|w| sanitize(w) == v)
            }
            // Null never matches a positive filter; it does pass a Ne.
            (Filter::Ne(..), None) => true,
            _ => false,
        }
    }
}

/// Partition path components use `_` for spaces, matching the layout the
/// Python-era datasets were written with.
pub fn sanitize(value: &str) -> String {
    value.replace(' ', "_")
}

pub struct Dataset<'a> {
    platform: &'a dyn Platform,
    root: String,
}

impl<'a> Dataset<'a> {
    pub fn new(platform: &'a dyn Platform, root: impl Into<String>) -> Self {
        Self {
            platform,
            root: root.into(),
        }
    }

    /// Write rows, one file per distinct partition tuple. Rewriting the same
    /// partition overwrites its file, so repeated saves of the same rows are
    /// idempotent.
    pub fn write<T: DatasetRecord>(&self, rows: &[T]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let cols = T::partition_cols();
        if cols.is_empty() {
            let batch = T::payload_batch(rows)?;
            let path = format!("{}/data.parquet", self.root);
            return self.write_file(&path, &batch);
        }

        let mut groups: indexmap::IndexMap<Vec<String>, Vec<T>> = indexmap::IndexMap::new();
        for row in rows {
            let key: Vec<String> = cols
                .iter()
                .map(|c| sanitize(&row.partition_value(c)))
                .collect();
            groups.entry(key).or_default().push(row.clone());
        }
        for (values, group) in groups {
            let dir = cols
                .iter()
                .zip(&values)
                .map(|(c, v)| format!("{c}={v}"))
                .collect::<Vec<_>>()
                .join("/");
            let filename = format!("{}.parquet", values.join("_"));
            let path = format!("{}/{dir}/{filename}", self.root);
            let batch = T::payload_batch(&group)?;
            self.write_file(&path, &batch)?;
        }
        Ok(())
    }

    /// Read every row matching the filters. Partition-column filters prune
    /// whole directories before any file is opened.
    pub fn read<T: DatasetRecord>(&self, filters: &[Filter]) -> Result<Vec<T>> {
        let cols = T::partition_cols();
        let mut rows = Vec::new();
        for (path, partition) in self.data_files(cols, filters)? {
            let bytes = self.platform.read(&path)?;
            let reader = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))
                .with_context(|| format!("opening parquet reader for {path}"))?
                .build()
                .with_context(|| format!("reading {path}"))?;
            for batch in reader {
                let batch = batch.with_context(|| format!("decoding {path}"))?;
                rows.extend(T::from_payload(&batch, &partition)?);
            }
        }
        let payload_filters: Vec<&Filter> = filters
            .iter()
            .filter(|f| !cols.contains(&f.col()))
            .collect();
        if !payload_filters.is_empty() {
            rows.retain(|row| {
                payload_filters
                    .iter()
                    .all(|f| f.accepts(row.column_value(f.col()).as_deref()))
            });
        }
        Ok(rows)
    }

    /// `true` when the dataset has at least one file.
    pub fn exists(&self) -> bool {
        self.platform.exists(&self.root)
    }

    /// Distinct values of a partition column, recovered from directory names
    /// alone. Used by incremental discovery as its registry-membership check.
    pub fn partition_values(&self, col: &str, cols: &[&str]) -> Result<Vec<String>> {
        let depth = cols
            .iter()
            .position(|c| *c == col)
            .ok_or_else(|| anyhow!("{col} is not a partition column"))?;
        let mut dirs = vec![self.root.clone()];
        for _ in 0..depth {
            let mut next = Vec::new();
            for dir in &dirs {
                for name in self.platform.list_dir(dir)? {
                    next.push(format!("{dir}/{name}"));
                }
            }
            dirs = next;
        }
        let mut values = Vec::new();
        for dir in &dirs {
            for name in self.platform.list_dir(dir)? {
                if let Some(value) = name.strip_prefix(&format!("{col}=")) {
                    values.push(value.to_string());
                }
            }
        }
        values.sort();
        values.dedup();
        Ok(values)
    }

    fn write_file(&self, path: &str, batch: &RecordBatch) -> Result<()> {
        let mut buf = Vec::new();
        {
            let mut writer = ArrowWriter::try_new(&mut buf, batch.schema(), None)
                .with_context(|| format!("opening parquet writer for {path}"))?;
            writer
                .write(batch)
                .with_context(|| format!("writing record batch to {path}"))?;
            writer
                .close()
                .with_context(|| format!("closing parquet writer for {path}"))?;
        }
        self.platform.write(path, &buf)
    }

    /// Walk the partition tree, pruning directories that a partition filter
    /// rejects, and return `(file path, partition values)` pairs.
    fn data_files(
        &self,
        cols: &[&str],
        filters: &[Filter],
    ) -> Result<Vec<(String, PartitionValues)>> {
        let mut frontier: Vec<(String, PartitionValues)> =
            vec![(self.root.clone(), PartitionValues::new())];
        for col in cols {
            let mut next = Vec::new();
            for (dir, partition) in &frontier {
                for name in self.platform.list_dir(dir)? {
                    let Some(value) = name.strip_prefix(&format!("{col}=")) else {
                        continue;
                    };
                    let keep = filters
                        .iter()
                        .filter(|f| f.col() == *col)
                        .all(|f| f.accepts(Some(value)));
                    if !keep {
                        continue;
                    }
                    let mut partition = partition.clone();
                    partition.insert(col.to_string(), value.to_string());
                    next.push((format!("{dir}/{name}"), partition));
                }
            }
            frontier = next;
        }

        let mut files = Vec::new();
        for (dir, partition) in frontier {
            for name in self.platform.list_dir(&dir)? {
                if name.ends_with(".parquet") {
                    files.push((format!("{dir}/{name}"), partition.clone()));
                }
            }
        }
        Ok(files)
    }
}

/// Column accessor helpers shared by the record impls.
pub mod columns {
    use super::*;
    use arrow_array::{Array, BooleanArray, Float64Array, Int64Array, StringArray};

    pub fn string_col<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b StringArray> {
        batch
            .column_by_name(name)
            .ok_or_else(|| anyhow!("parquet payload missing column {name}"))?
            .as_any()
            .downcast_ref::<StringArray>()
            .ok_or_else(|| anyhow!("column {name} is not utf8"))
    }

    pub fn int_col<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b Int64Array> {
        batch
            .column_by_name(name)
            .ok_or_else(|| anyhow!("parquet payload missing column {name}"))?
            .as_any()
            .downcast_ref::<Int64Array>()
            .ok_or_else(|| anyhow!("column {name} is not int64"))
    }

    pub fn float_col<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b Float64Array> {
        batch
            .column_by_name(name)
            .ok_or_else(|| anyhow!("parquet payload missing column {name}"))?
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| anyhow!("column {name} is not float64"))
    }

    pub fn bool_col<'b>(batch: &'b RecordBatch, name: &str) -> Result<&'b BooleanArray> {
        batch
            .column_by_name(name)
            .ok_or_else(|| anyhow!("parquet payload missing column {name}"))?
            .as_any()
            .downcast_ref::<BooleanArray>()
            .ok_or_else(|| anyhow!("column {name} is not boolean"))
    }

    pub fn opt_string(arr: &StringArray, i: usize) -> Option<String> {
        if arr.is_null(i) {
            None
        } else {
            Some(arr.value(i).to_string())
        }
    }
}
