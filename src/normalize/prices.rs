use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::coerce::{coerce_bool, coerce_i64, coerce_opt_f64};

/// One price band for one zone of one performance. Disabled bands keep their
/// row but carry no price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub zone_id: i64,
    pub performance_id: i64,
    pub price: Option<f64>,
    pub enabled: bool,
}

/// A performance with zero price rows cannot have its seats priced at all,
/// so an empty payload aborts the task rather than producing an empty table.
pub fn normalize_prices(payload: &Value) -> Result<Vec<PriceRecord>> {
    let rows = payload
        .as_array()
        .ok_or_else(|| anyhow!("prices payload is not an array"))?;
    if rows.is_empty() {
        bail!("no prices available for this performance");
    }

    rows.iter()
        .map(|row| {
            let enabled = coerce_bool(
                "Enabled",
                row.get("Enabled")
                    .ok_or_else(|| anyhow!("price row missing expected key Enabled"))?,
            )?;
            let price = if enabled {
                coerce_opt_f64("Price", row.get("Price"))?
            } else {
                None
            };
            Ok(PriceRecord {
                zone_id: coerce_i64(
                    "ZoneId",
                    row.get("ZoneId")
                        .ok_or_else(|| anyhow!("price row missing expected key ZoneId"))?,
                )?,
                performance_id: coerce_i64(
                    "PerformanceId",
                    row.get("PerformanceId")
                        .ok_or_else(|| anyhow!("price row missing expected key PerformanceId"))?,
                )?,
                price,
                enabled,
            })
        })
        .collect::<Result<Vec<_>>>()
        .context("normalizing prices")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_price_list_is_a_hard_error() {
        let err = normalize_prices(&json!([])).unwrap_err();
        assert!(err.to_string().contains("no prices available"));
    }

    #[test]
    fn disabled_rows_lose_their_price() {
        let rows = normalize_prices(&json!([
            {"ZoneId": 10, "PerformanceId": 99, "Price": 50.0, "Enabled": true},
            {"ZoneId": 11, "PerformanceId": 99, "Price": 65.0, "Enabled": false},
        ]))
        .unwrap();
        assert_eq!(rows[0].price, Some(50.0));
        assert_eq!(rows[1].price, None);
        assert!(!rows[1].enabled);
    }

    #[test]
    fn quoted_prices_coerce() {
        let rows = normalize_prices(&json!([
            {"ZoneId": 10, "PerformanceId": 99, "Price": "12.50", "Enabled": "true"},
        ]))
        .unwrap();
        assert_eq!(rows[0].price, Some(12.5));
    }
}
