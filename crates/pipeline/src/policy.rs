//! Deserialization of the catalog's `policy` column into domain configs.

use serde::Deserialize;

use cryoflow_core::error::DomainError;
use cryoflow_core::triggering::{ConditionConfig, NrtRule, PredecessorRule, TriggerPolicy};
use cryoflow_db::models::catalog::ConditionWithRoutine;

/// Shape of the `triggering_condition.policy` JSONB column.
#[derive(Debug, Deserialize)]
struct PolicySpec {
    policy: TriggerPolicy,
    nrt: NrtRule,
    #[serde(default)]
    artificial_day_offset: Option<i64>,
    #[serde(default)]
    predecessor: Option<PredecessorRule>,
}

/// Parse and validate one catalog condition.
///
/// A malformed policy is a configuration error scoped to that condition;
/// callers log it and keep evaluating the others.
pub fn parse_condition(condition: &ConditionWithRoutine) -> Result<ConditionConfig, DomainError> {
    let spec: PolicySpec =
        serde_json::from_value(condition.policy.clone()).map_err(|e| DomainError::Configuration {
            condition: condition.condition_name.clone(),
            reason: e.to_string(),
        })?;

    let config = ConditionConfig {
        name: condition.condition_name.clone(),
        policy: spec.policy,
        nrt: spec.nrt,
        artificial_day_offset: spec.artificial_day_offset,
        predecessor: spec.predecessor,
    };
    config.check()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn condition(policy: serde_json::Value) -> ConditionWithRoutine {
        ConditionWithRoutine {
            condition_id: 1,
            condition_name: "CC_TC".to_string(),
            raster_type_fk_id: 1,
            policy,
            routine_name: "cc".to_string(),
            product_type_code: "CC".to_string(),
            cpu_mhz: 2000,
            ram_mb: 8192,
            storage_gb: 20,
            duration_secs: 600,
            docker_image: "registry/cc:1.0".to_string(),
            flavour: "eo1.large".to_string(),
        }
    }

    #[test]
    fn parses_freshness_policy() {
        let config = parse_condition(&condition(serde_json::json!({
            "policy": {
                "Freshness": {
                    "tiles": ["32TLS"],
                    "window": {
                        "max_day_since_publication": 3,
                        "max_day_since_measurement": 7
                    },
                    "tile_orbits": { "32TLS": [15, 66] }
                }
            },
            "nrt": { "max_harvest_lag_hours": 3, "backfill_start_day": null },
            "predecessor": {
                "PriorOfType": { "raster_type": "L2A", "lookback_days": 90 }
            }
        })))
        .expect("valid policy");

        assert_eq!(config.name, "CC_TC");
        match &config.policy {
            TriggerPolicy::Freshness { tile_orbits, .. } => {
                assert_eq!(tile_orbits.get("32TLS"), Some(&vec![15, 66]));
            }
            other => panic!("unexpected policy {other:?}"),
        }
        assert!(matches!(
            config.predecessor,
            Some(PredecessorRule::PriorOfType { .. })
        ));
    }

    #[test]
    fn parses_chain_policy_with_day_offset() {
        let config = parse_condition(&condition(serde_json::json!({
            "policy": {
                "ChainContinuity": { "max_gap_seconds": 5, "orphan_grace_seconds": 7200 }
            },
            "nrt": { "max_harvest_lag_hours": 3 },
            "artificial_day_offset": 1
        })))
        .expect("valid policy");

        assert_eq!(config.artificial_day_offset, Some(1));
        assert!(config.predecessor.is_none());
    }

    #[test]
    fn malformed_policy_is_a_configuration_error() {
        let err = parse_condition(&condition(serde_json::json!({"policy": "bogus"})))
            .expect_err("must fail");
        assert!(matches!(err, DomainError::Configuration { .. }));
    }

    #[test]
    fn invalid_bounds_are_a_configuration_error() {
        let err = parse_condition(&condition(serde_json::json!({
            "policy": {
                "ChainContinuity": { "max_gap_seconds": 0, "orphan_grace_seconds": 7200 }
            },
            "nrt": { "max_harvest_lag_hours": 3 }
        })))
        .expect_err("must fail");
        assert!(matches!(err, DomainError::Configuration { .. }));
    }
}
