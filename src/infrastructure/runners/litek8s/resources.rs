//! Resource requests and limits
//!
//! cpu is requested but never limited, so bursty steps are not throttled;
//! memory is both requested and limited to protect the node.

use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

use crate::error::{AppError, Result};

const BINARY_SI_SUFFIXES: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];
const DECIMAL_SI_SUFFIXES: [&str; 7] = ["m", "k", "M", "G", "T", "P", "E"];

/// Parse a Kubernetes quantity string (`500m`, `1.5`, `2Gi`, `1e3`).
///
/// Negative quantities are rejected since they are never valid resources.
pub fn parse_quantity(value: &str) -> Result<Quantity> {
    let invalid = || {
        AppError::ConfigurationError(format!("Invalid resource quantity: '{}'", value))
    };

    let (number, suffix) = split_number(value).ok_or_else(invalid)?;
    if number.starts_with('-') {
        return Err(invalid());
    }
    if !is_valid_number(number.trim_start_matches('+')) {
        return Err(invalid());
    }

    let suffix_ok = suffix.is_empty()
        || BINARY_SI_SUFFIXES.contains(&suffix)
        || DECIMAL_SI_SUFFIXES.contains(&suffix)
        || is_decimal_exponent(suffix);
    if !suffix_ok {
        return Err(invalid());
    }

    Ok(Quantity(value.to_string()))
}

/// Split into the signed number and whatever follows it.
fn split_number(value: &str) -> Option<(&str, &str)> {
    let end = value
        .char_indices()
        .find(|(i, c)| !(c.is_ascii_digit() || *c == '.' || (*i == 0 && (*c == '+' || *c == '-'))))
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    if end == 0 {
        return None;
    }
    Some(value.split_at(end))
}

fn is_valid_number(number: &str) -> bool {
    let mut parts = number.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let fraction = parts.next();

    let digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    match fraction {
        None => !whole.is_empty() && digits(whole),
        Some(fraction) => {
            digits(whole) && digits(fraction) && !(whole.is_empty() && fraction.is_empty())
        }
    }
}

fn is_decimal_exponent(suffix: &str) -> bool {
    let Some(exponent) = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E')) else {
        return false;
    };
    let exponent = exponent
        .strip_prefix('+')
        .or_else(|| exponent.strip_prefix('-'))
        .unwrap_or(exponent);
    !exponent.is_empty() && exponent.chars().all(|c| c.is_ascii_digit())
}

/// Map symbolic cpu/memory strings to requests and limits. Empty strings are
/// skipped; empty maps are left unset.
pub fn resource_requirements(cpu: &str, memory: &str) -> Result<ResourceRequirements> {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();

    if !cpu.is_empty() {
        requests.insert("cpu".to_string(), parse_quantity(cpu)?);
    }

    if !memory.is_empty() {
        let quantity = parse_quantity(memory)?;
        requests.insert("memory".to_string(), quantity.clone());
        limits.insert("memory".to_string(), quantity);
    }

    Ok(ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        ..Default::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_memory_only_sets_request_and_limit() {
        let resources = resource_requirements("", "512Mi").unwrap();
        let requests = resources.requests.unwrap();
        let limits = resources.limits.unwrap();

        assert_eq!(requests.get("memory"), Some(&Quantity("512Mi".to_string())));
        assert_eq!(limits.get("memory"), Some(&Quantity("512Mi".to_string())));
        assert!(!requests.contains_key("cpu"));
        assert!(!limits.contains_key("cpu"));
    }

    #[test]
    fn test_cpu_only_sets_request_without_limits() {
        let resources = resource_requirements("250m", "").unwrap();
        assert_eq!(
            resources.requests.unwrap().get("cpu"),
            Some(&Quantity("250m".to_string()))
        );
        assert!(resources.limits.is_none());
    }

    #[test]
    fn test_cpu_is_never_limited() {
        let resources = resource_requirements("2", "4Gi").unwrap();
        let limits = resources.limits.unwrap();
        assert_eq!(limits.len(), 1);
        assert!(limits.contains_key("memory"));
        assert_eq!(resources.requests.unwrap().len(), 2);
    }

    #[test]
    fn test_empty_inputs_produce_empty_requirements() {
        let resources = resource_requirements("", "").unwrap();
        assert!(resources.requests.is_none());
        assert!(resources.limits.is_none());
    }

    #[test]
    fn test_valid_quantities() {
        for value in ["1", "0.5", ".5", "1.", "100m", "1Gi", "128974848", "129e6", "1E3", "+1", "5k"] {
            assert!(parse_quantity(value).is_ok(), "expected '{}' to parse", value);
        }
    }

    #[test]
    fn test_malformed_quantities_are_configuration_errors() {
        for value in ["", "abc", "1GB", "1.2.3", "-1", "Mi", "1 Gi", "1e", ".", "1ki"] {
            let result = parse_quantity(value);
            assert!(
                matches!(result, Err(AppError::ConfigurationError(_))),
                "expected '{}' to be rejected",
                value
            );
        }

        assert!(matches!(
            resource_requirements("lots", ""),
            Err(AppError::ConfigurationError(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_limits_never_contain_cpu(
            cpu in prop::option::of(1u32..64_000u32),
            memory in prop::option::of(1u32..65_536u32),
        ) {
            let cpu = cpu.map(|c| format!("{}m", c)).unwrap_or_default();
            let memory = memory.map(|m| format!("{}Mi", m)).unwrap_or_default();
            let resources = resource_requirements(&cpu, &memory).unwrap();

            let limits = resources.limits.unwrap_or_default();
            prop_assert!(!limits.contains_key("cpu"));
            prop_assert_eq!(limits.contains_key("memory"), !memory.is_empty());

            let requests = resources.requests.unwrap_or_default();
            prop_assert_eq!(requests.contains_key("cpu"), !cpu.is_empty());
            prop_assert_eq!(requests.contains_key("memory"), !memory.is_empty());
        }
    }
}
