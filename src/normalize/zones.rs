use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::coerce::{coerce_i64, coerce_string};

/// A venue sub-area. The API nests the zone group inside each availability
/// row; this is the flattened form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneRecord {
    pub zone_id: i64,
    pub zone_group_id: i64,
    pub zone_name: String,
}

/// Unnest `Zone` -> `ZoneGroup` into flat zone rows. The group's alias
/// description is the human-facing zone name; the zone's own `Description`
/// is internal and dropped.
pub fn normalize_zones(payload: &Value) -> Result<Vec<ZoneRecord>> {
    let rows = payload
        .as_array()
        .ok_or_else(|| anyhow!("zone availabilities payload is not an array"))?;

    rows.iter()
        .map(|row| {
            let zone = row
                .get("Zone")
                .ok_or_else(|| anyhow!("zone row missing expected key Zone"))?;
            let group = zone
                .get("ZoneGroup")
                .ok_or_else(|| anyhow!("zone row missing expected key ZoneGroup"))?;
            Ok(ZoneRecord {
                zone_id: coerce_i64(
                    "Zone.Id",
                    zone.get("Id")
                        .ok_or_else(|| anyhow!("zone missing expected key Id"))?,
                )?,
                zone_group_id: coerce_i64(
                    "ZoneGroup.Id",
                    group
                        .get("Id")
                        .ok_or_else(|| anyhow!("zone group missing expected key Id"))?,
                )?,
                zone_name: coerce_string(
                    "ZoneGroup.AliasDescription",
                    group.get("AliasDescription").ok_or_else(|| {
                        anyhow!("zone group missing expected key AliasDescription")
                    })?,
                )?,
            })
        })
        .collect::<Result<Vec<_>>>()
        .context("normalizing zone availabilities")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unnests_zone_group() {
        let rows = normalize_zones(&json!([
            {
                "Zone": {
                    "Id": 10,
                    "Description": "internal",
                    "ZoneGroup": {"Id": 2, "AliasDescription": "Balcony"}
                },
                "AvailableCount": 14
            }
        ]))
        .unwrap();
        assert_eq!(
            rows,
            vec![ZoneRecord {
                zone_id: 10,
                zone_group_id: 2,
                zone_name: "Balcony".into()
            }]
        );
    }
}
