//! Node selector matching
//!
//! A network applies to a node when any of its selectors matches the node's
//! labels. A network without selectors applies everywhere.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};

use crate::{CoreError, Result};

/// Evaluate a selector set against a node's labels
///
/// Every selector is validated before any is evaluated so a malformed
/// selector is reported even when an earlier one would have matched.
pub fn matches_any(selectors: &[LabelSelector], labels: &BTreeMap<String, String>) -> Result<bool> {
    if selectors.is_empty() {
        return Ok(true);
    }

    for selector in selectors {
        validate(selector)?;
    }

    for selector in selectors {
        if selector_matches(selector, labels)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Evaluate a single label selector; all of its requirements must hold
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> Result<bool> {
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return Ok(false);
            }
        }
    }

    for requirement in selector.match_expressions.iter().flatten() {
        if !requirement_matches(requirement, labels)? {
            return Ok(false);
        }
    }

    Ok(true)
}

fn requirement_matches(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> Result<bool> {
    let values = requirement.values.as_deref().unwrap_or_default();
    let current = labels.get(&requirement.key);

    match Operator::parse(requirement)? {
        Operator::In => Ok(current.is_some_and(|v| values.contains(v))),
        Operator::NotIn => Ok(!current.is_some_and(|v| values.contains(v))),
        Operator::Exists => Ok(current.is_some()),
        Operator::DoesNotExist => Ok(current.is_none()),
    }
}

fn validate(selector: &LabelSelector) -> Result<()> {
    for requirement in selector.match_expressions.iter().flatten() {
        Operator::parse(requirement)?;
    }
    Ok(())
}

enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl Operator {
    fn parse(requirement: &LabelSelectorRequirement) -> Result<Self> {
        if requirement.key.is_empty() {
            return Err(CoreError::InvalidSelector(
                "match expression with empty key".to_string(),
            ));
        }

        let has_values = requirement.values.as_ref().is_some_and(|v| !v.is_empty());
        let op = match requirement.operator.as_str() {
            "In" => Operator::In,
            "NotIn" => Operator::NotIn,
            "Exists" => Operator::Exists,
            "DoesNotExist" => Operator::DoesNotExist,
            other => {
                return Err(CoreError::InvalidSelector(format!(
                    "unknown operator {:?} for key {}",
                    other, requirement.key
                )))
            }
        };

        match op {
            Operator::In | Operator::NotIn if !has_values => Err(CoreError::InvalidSelector(format!(
                "operator {} for key {} requires values",
                requirement.operator, requirement.key
            ))),
            Operator::Exists | Operator::DoesNotExist if has_values => {
                Err(CoreError::InvalidSelector(format!(
                    "operator {} for key {} takes no values",
                    requirement.operator, requirement.key
                )))
            }
            op => Ok(op),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn expr(key: &str, op: &str, values: &[&str]) -> LabelSelector {
        LabelSelector {
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: key.to_string(),
                operator: op.to_string(),
                values: if values.is_empty() {
                    None
                } else {
                    Some(values.iter().map(|v| v.to_string()).collect())
                },
            }]),
            match_labels: None,
        }
    }

    #[test]
    fn test_no_selectors_match_every_node() {
        assert!(matches_any(&[], &labels(&[])).unwrap());
        assert!(matches_any(&[], &labels(&[("zone", "b")])).unwrap());
    }

    #[test]
    fn test_zone_in_selector() {
        let selectors = vec![expr("zone", "In", &["a"])];
        assert!(matches_any(&selectors, &labels(&[("zone", "a")])).unwrap());
        assert!(!matches_any(&selectors, &labels(&[("zone", "b")])).unwrap());
        assert!(!matches_any(&selectors, &labels(&[])).unwrap());
    }

    #[test]
    fn test_selectors_are_ored() {
        let selectors = vec![expr("zone", "In", &["a"]), expr("gpu", "Exists", &[])];
        assert!(matches_any(&selectors, &labels(&[("gpu", "true")])).unwrap());
        assert!(matches_any(&selectors, &labels(&[("zone", "a")])).unwrap());
        assert!(!matches_any(&selectors, &labels(&[("zone", "c")])).unwrap());
    }

    #[test]
    fn test_match_labels_and_expressions_are_anded() {
        let mut selector = expr("rack", "NotIn", &["r1"]);
        selector.match_labels = Some(labels(&[("zone", "a")]));

        assert!(selector_matches(&selector, &labels(&[("zone", "a"), ("rack", "r2")])).unwrap());
        assert!(!selector_matches(&selector, &labels(&[("zone", "a"), ("rack", "r1")])).unwrap());
        assert!(!selector_matches(&selector, &labels(&[("zone", "b")])).unwrap());
    }

    #[test]
    fn test_does_not_exist() {
        let selector = expr("maintenance", "DoesNotExist", &[]);
        assert!(selector_matches(&selector, &labels(&[])).unwrap());
        assert!(!selector_matches(&selector, &labels(&[("maintenance", "")])).unwrap());
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        assert!(selector_matches(&LabelSelector::default(), &labels(&[("a", "b")])).unwrap());
    }

    #[test]
    fn test_malformed_selectors_are_errors() {
        let unknown = vec![expr("zone", "Near", &["a"])];
        assert!(matches!(
            matches_any(&unknown, &labels(&[])),
            Err(CoreError::InvalidSelector(_))
        ));

        let in_without_values = vec![expr("zone", "In", &[])];
        assert!(matches_any(&in_without_values, &labels(&[])).is_err());

        let exists_with_values = vec![expr("zone", "Exists", &["a"])];
        assert!(matches_any(&exists_with_values, &labels(&[])).is_err());
    }

    #[test]
    fn test_malformed_selector_reported_even_after_a_match() {
        let selectors = vec![LabelSelector::default(), expr("zone", "Near", &["a"])];
        assert!(matches_any(&selectors, &labels(&[])).is_err());
    }
}
