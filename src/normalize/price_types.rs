use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::coerce::{coerce_i64, coerce_string};

/// Reference row describing a price type (standard, concession, ...).
/// Carried through the bundle untouched for the dashboard's benefit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTypeRecord {
    pub price_type_id: i64,
    pub description: String,
}

pub fn normalize_price_types(payload: &Value) -> Result<Vec<PriceTypeRecord>> {
    let rows = payload
        .as_array()
        .ok_or_else(|| anyhow!("price types payload is not an array"))?;

    rows.iter()
        .map(|row| {
            Ok(PriceTypeRecord {
                price_type_id: coerce_i64(
                    "Id",
                    row.get("Id")
                        .ok_or_else(|| anyhow!("price type missing expected key Id"))?,
                )?,
                description: coerce_string(
                    "Description",
                    row.get("Description")
                        .ok_or_else(|| anyhow!("price type missing expected key Description"))?,
                )?,
            })
        })
        .collect::<Result<Vec<_>>>()
        .context("normalizing price types")
}
