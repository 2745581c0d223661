//! Folding one chunk's fields into the accumulated result.
//!
//! Merging is a pure function of (existing, incoming, strategy). A chunk whose
//! response could not be parsed never erases good data gathered earlier.

use serde_json::{Number, Value};

use crate::catalog::{LedgerRules, MergeStrategy, ReportRules};
use crate::extraction::{is_parse_error, FieldMap, RAW_TEXT_KEY};

/// Merge `incoming` into `existing` under `strategy`.
pub fn merge(existing: &FieldMap, incoming: &FieldMap, strategy: &MergeStrategy) -> FieldMap {
    if is_parse_error(incoming) {
        if existing.is_empty() {
            return incoming.clone();
        }
        if is_parse_error(existing) {
            return join_raw_text(existing, incoming);
        }
        return existing.clone();
    }
    if existing.is_empty() || is_parse_error(existing) {
        return incoming.clone();
    }

    let mut merged = existing.clone();
    for (key, value) in incoming {
        match strategy {
            MergeStrategy::Ledger(rules) => merge_ledger_field(&mut merged, key, value, rules),
            MergeStrategy::Report(rules) => merge_report_field(&mut merged, key, value, rules),
            MergeStrategy::SingleStatement => keep_first(&mut merged, key, value),
            MergeStrategy::Generic => merge_default(&mut merged, key, value),
        }
    }
    merged
}

/// Null, blank strings, zero, and empty containers carry no information.
///
/// Used by the single-statement and generic rules, where a zero is a
/// placeholder the model emits for a field it did not find.
pub fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64() == Some(0.0),
        other => is_missing(other),
    }
}

/// Null, blank strings, and empty containers. A zero is a real value here:
/// balances and scores named by ledger or report rules can legitimately be 0.
pub fn is_missing(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Number(_) | Value::Bool(_) => false,
    }
}

fn merge_ledger_field(merged: &mut FieldMap, key: &str, value: &Value, rules: &LedgerRules) {
    if contains(&rules.list_fields, key) {
        concat(merged, key, value);
    } else if contains(&rules.latest_fields, key) {
        take_latest(merged, key, value);
    } else if contains(&rules.first_fields, key) {
        keep_first_by(merged, key, value, is_missing);
    } else {
        merge_default(merged, key, value);
    }
}

fn merge_report_field(merged: &mut FieldMap, key: &str, value: &Value, rules: &ReportRules) {
    if contains(&rules.primary_fields, key) {
        keep_first_by(merged, key, value, is_missing);
    } else if contains(&rules.list_fields, key) {
        concat(merged, key, value);
    } else if contains(&rules.sum_fields, key) {
        combine_numeric(merged, key, value, |a, b| a + b);
    } else if contains(&rules.max_fields, key) {
        combine_numeric(merged, key, value, f64::max);
    } else if contains(&rules.text_fields, key) {
        join_text(merged, key, value, &rules.separator);
    } else {
        merge_default(merged, key, value);
    }
}

fn contains(fields: &[String], key: &str) -> bool {
    fields.iter().any(|f| f == key)
}

/// Arrays concatenate; other fields keep the first non-empty value.
fn merge_default(merged: &mut FieldMap, key: &str, value: &Value) {
    if let (Some(Value::Array(current)), Value::Array(items)) = (merged.get_mut(key), value) {
        current.extend(items.iter().cloned());
        return;
    }
    keep_first(merged, key, value);
}

fn keep_first(merged: &mut FieldMap, key: &str, value: &Value) {
    keep_first_by(merged, key, value, is_empty_value);
}

fn keep_first_by(merged: &mut FieldMap, key: &str, value: &Value, empty: fn(&Value) -> bool) {
    match merged.get(key) {
        Some(current) if !empty(current) => {}
        Some(_) if empty(value) => {}
        _ => {
            merged.insert(key.to_string(), value.clone());
        }
    }
}

fn take_latest(merged: &mut FieldMap, key: &str, value: &Value) {
    if !is_missing(value) || !merged.contains_key(key) {
        merged.insert(key.to_string(), value.clone());
    }
}

fn concat(merged: &mut FieldMap, key: &str, value: &Value) {
    let items = match value {
        Value::Array(items) => items.clone(),
        v if is_empty_value(v) => {
            merged.entry(key.to_string()).or_insert_with(|| Value::Array(Vec::new()));
            return;
        }
        v => vec![v.clone()],
    };

    match merged.get_mut(key) {
        Some(Value::Array(current)) => current.extend(items),
        Some(current) if !is_empty_value(current) => {
            let mut joined = vec![current.clone()];
            joined.extend(items);
            *current = Value::Array(joined);
        }
        _ => {
            merged.insert(key.to_string(), Value::Array(items));
        }
    }
}

fn combine_numeric(merged: &mut FieldMap, key: &str, value: &Value, op: fn(f64, f64) -> f64) {
    let Some(incoming) = as_number(value) else {
        keep_first(merged, key, value);
        return;
    };
    let combined = match merged.get(key).and_then(as_number) {
        Some(current) => op(current, incoming),
        None => incoming,
    };
    merged.insert(key.to_string(), number_value(combined));
}

fn join_text(merged: &mut FieldMap, key: &str, value: &Value, separator: &str) {
    let Some(incoming) = value.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
        keep_first(merged, key, value);
        return;
    };
    match merged.get(key).and_then(Value::as_str).map(str::trim) {
        Some(current) if !current.is_empty() => {
            // Only an exact repeat of an earlier segment is skipped
            if !current.split(separator).any(|segment| segment.trim() == incoming) {
                let joined = format!("{}{}{}", current, separator, incoming);
                merged.insert(key.to_string(), Value::String(joined));
            }
        }
        _ => {
            merged.insert(key.to_string(), Value::String(incoming.to_string()));
        }
    }
}

/// Numbers, or strings like "1,20,000.50" or "Rs. 500".
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            let cleaned = cleaned.trim_start_matches('.');
            if cleaned.is_empty() || cleaned == "-" {
                None
            } else {
                cleaned.parse().ok()
            }
        }
        _ => None,
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn join_raw_text(existing: &FieldMap, incoming: &FieldMap) -> FieldMap {
    let raw = |fields: &FieldMap| {
        fields
            .get(RAW_TEXT_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let mut merged = existing.clone();
    let joined = [raw(existing), raw(incoming)]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");
    merged.insert(RAW_TEXT_KEY.to_string(), Value::String(joined));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DocumentCatalog;
    use crate::catalog::DocumentType;
    use crate::extraction::ExtractionResult;
    use serde_json::json;

    fn fields(value: Value) -> FieldMap {
        value.as_object().cloned().unwrap()
    }

    fn strategy(document_type: DocumentType) -> MergeStrategy {
        DocumentCatalog::builtin().profile(&document_type).merge.clone()
    }

    #[test]
    fn test_ledger_concatenates_transactions_and_tracks_balances() {
        let strategy = strategy(DocumentType::BankStatement);
        let first = fields(json!({
            "account_number": "XX1234",
            "opening_balance": 1000,
            "closing_balance": 800,
            "transactions": [{"amount": -200}],
        }));
        let second = fields(json!({
            "account_number": null,
            "opening_balance": 800,
            "closing_balance": 650,
            "transactions": [{"amount": -100}, {"amount": -50}],
        }));

        let merged = merge(&first, &second, &strategy);

        assert_eq!(merged["account_number"], json!("XX1234"));
        assert_eq!(merged["opening_balance"], json!(1000));
        assert_eq!(merged["closing_balance"], json!(650));
        assert_eq!(merged["transactions"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_latest_ignores_empty_newer_value() {
        let strategy = strategy(DocumentType::BankStatement);
        let merged = merge(
            &fields(json!({"closing_balance": 650})),
            &fields(json!({"closing_balance": null})),
            &strategy,
        );
        assert_eq!(merged["closing_balance"], json!(650));
    }

    #[test]
    fn test_list_concatenation_is_associative() {
        let strategy = strategy(DocumentType::BankStatement);
        let a = fields(json!({"transactions": [1, 2]}));
        let b = fields(json!({"transactions": [3]}));
        let c = fields(json!({"transactions": [4, 5]}));

        let left = merge(&merge(&a, &b, &strategy), &c, &strategy);
        let right = merge(&a, &merge(&b, &c, &strategy), &strategy);

        assert_eq!(left, right);
        assert_eq!(left["transactions"], json!([1, 2, 3, 4, 5]));
    }

    #[test]
    fn test_report_sums_maxes_and_joins_text() {
        let strategy = strategy(DocumentType::CreditReport);
        let first = fields(json!({
            "credit_score": 742,
            "accounts": [{"lender": "A"}],
            "total_accounts": 3,
            "total_outstanding": "1,20,000",
            "max_days_past_due": 30,
            "remarks": "Two late payments",
        }));
        let second = fields(json!({
            "credit_score": 0,
            "accounts": [{"lender": "B"}],
            "total_accounts": 2,
            "total_outstanding": 5000.5,
            "max_days_past_due": 15,
            "remarks": "Settled account in 2021",
        }));

        let merged = merge(&first, &second, &strategy);

        assert_eq!(merged["credit_score"], json!(742));
        assert_eq!(merged["accounts"].as_array().unwrap().len(), 2);
        assert_eq!(merged["total_accounts"], json!(5));
        assert_eq!(merged["total_outstanding"], json!(125000.5));
        assert_eq!(merged["max_days_past_due"], json!(30));
        assert_eq!(
            merged["remarks"],
            json!("Two late payments\nSettled account in 2021")
        );
    }

    #[test]
    fn test_ledger_zero_balances_are_real_values() {
        let strategy = strategy(DocumentType::BankStatement);
        let merged = merge(
            &fields(json!({"closing_balance": 5000, "opening_balance": 0})),
            &fields(json!({"closing_balance": 0, "opening_balance": 5000})),
            &strategy,
        );
        assert_eq!(merged["closing_balance"], json!(0));
        assert_eq!(merged["opening_balance"], json!(0));
    }

    #[test]
    fn test_ledger_first_zero_opening_balance_is_kept() {
        let strategy = strategy(DocumentType::BankStatement);
        let merged = merge(
            &fields(json!({"opening_balance": 0})),
            &fields(json!({"opening_balance": 4200})),
            &strategy,
        );
        assert_eq!(merged["opening_balance"], json!(0));
    }

    #[test]
    fn test_report_primary_zero_score_is_kept() {
        let strategy = strategy(DocumentType::CreditReport);
        let merged = merge(
            &fields(json!({"credit_score": 0})),
            &fields(json!({"credit_score": 742})),
            &strategy,
        );
        assert_eq!(merged["credit_score"], json!(0));
    }

    #[test]
    fn test_report_text_keeps_remark_contained_in_earlier_text() {
        let strategy = strategy(DocumentType::CreditReport);
        let merged = merge(
            &fields(json!({"remarks": "Account written off, later Settled"})),
            &fields(json!({"remarks": "Settled"})),
            &strategy,
        );
        assert_eq!(
            merged["remarks"],
            json!("Account written off, later Settled\nSettled")
        );

        // A later exact repeat of either segment is still skipped
        let again = merge(&merged, &fields(json!({"remarks": "Settled"})), &strategy);
        assert_eq!(again, merged);
    }

    #[test]
    fn test_report_text_is_not_duplicated() {
        let strategy = strategy(DocumentType::CreditReport);
        let existing = fields(json!({"remarks": "No adverse remarks"}));
        let merged = merge(&existing, &existing.clone(), &strategy);
        assert_eq!(merged["remarks"], json!("No adverse remarks"));
    }

    #[test]
    fn test_single_statement_first_non_empty_wins_in_any_order() {
        let strategy = MergeStrategy::SingleStatement;
        let a = fields(json!({"pan": "ABCDE1234F", "name": "", "gross_income": 0}));
        let b = fields(json!({"pan": null, "name": "Asha Rao", "gross_income": 850000}));

        let ab = merge(&a, &b, &strategy);
        let ba = merge(&b, &a, &strategy);

        assert_eq!(ab, ba);
        assert_eq!(ab["pan"], json!("ABCDE1234F"));
        assert_eq!(ab["name"], json!("Asha Rao"));
        assert_eq!(ab["gross_income"], json!(850000));
    }

    #[test]
    fn test_generic_concatenates_arrays_and_keeps_first_scalars() {
        let merged = merge(
            &fields(json!({"items": ["a"], "title": "Lease"})),
            &fields(json!({"items": ["b"], "title": "Annex", "extra": true})),
            &MergeStrategy::Generic,
        );
        assert_eq!(merged["items"], json!(["a", "b"]));
        assert_eq!(merged["title"], json!("Lease"));
        assert_eq!(merged["extra"], json!(true));
    }

    #[test]
    fn test_parse_error_never_shrinks_good_data() {
        let good = fields(json!({"transactions": [1, 2, 3], "closing_balance": 10}));
        let broken = ExtractionResult::unparsed("garbled").into_fields();

        for strategy in [
            strategy(DocumentType::BankStatement),
            strategy(DocumentType::CreditReport),
            MergeStrategy::SingleStatement,
            MergeStrategy::Generic,
        ] {
            assert_eq!(merge(&good, &broken, &strategy), good);
        }
    }

    #[test]
    fn test_good_data_replaces_parse_error() {
        let broken = ExtractionResult::unparsed("garbled").into_fields();
        let good = fields(json!({"name": "Asha"}));
        assert_eq!(merge(&broken, &good, &MergeStrategy::Generic), good);
    }

    #[test]
    fn test_parse_error_into_empty_is_kept() {
        let broken = ExtractionResult::unparsed("garbled").into_fields();
        let merged = merge(&FieldMap::new(), &broken, &MergeStrategy::Generic);
        assert!(is_parse_error(&merged));
    }

    #[test]
    fn test_consecutive_parse_errors_join_raw_text() {
        let first = ExtractionResult::unparsed("page one text").into_fields();
        let second = ExtractionResult::unparsed("page two text").into_fields();
        let merged = merge(&first, &second, &MergeStrategy::Generic);

        assert!(is_parse_error(&merged));
        assert_eq!(merged[RAW_TEXT_KEY], json!("page one text\n\npage two text"));
    }

    #[test]
    fn test_empty_value_detection() {
        assert!(is_empty_value(&json!(null)));
        assert!(is_empty_value(&json!("  ")));
        assert!(is_empty_value(&json!(0)));
        assert!(is_empty_value(&json!(0.0)));
        assert!(is_empty_value(&json!([])));
        assert!(is_empty_value(&json!({})));
        assert!(!is_empty_value(&json!(false)));
        assert!(!is_empty_value(&json!("x")));

        assert!(is_missing(&json!(null)));
        assert!(is_missing(&json!(" ")));
        assert!(is_missing(&json!([])));
        assert!(!is_missing(&json!(0)));
        assert!(!is_missing(&json!(false)));
    }
}
