// Property-based tests for the parameterized statement builders

use common::db::statements::{
    build_delete, build_find_one, build_insert, build_update, ensure_identifier,
};
use proptest::prelude::*;
use serde_json::{Map, Value};

fn identifier() -> impl Strategy<Value = String> {
    "[a-zA-Z_][a-zA-Z0-9_]{0,15}"
}

/// Bound values carry a `val-` marker with a `-`, which no identifier may
/// contain, so any leakage into statement text is detectable.
fn bound_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-z0-9]{1,12}".prop_map(|s| Value::String(format!("val-{}", s))),
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::Bool),
    ]
}

fn value_map() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(identifier(), bound_value(), 1..6)
        .prop_map(|m| m.into_iter().collect())
}

fn assert_no_value_leak(statement: &str, values: &[Value]) {
    assert!(
        !statement.contains("val-"),
        "bound value leaked into statement: {}",
        statement
    );
    for value in values {
        if let Value::String(s) = value {
            assert!(!statement.contains(s.as_str()));
        }
    }
}

/// *For any* table and condition set, `find_one` statements carry one
/// densely numbered placeholder per condition and never the values.
#[test]
fn property_find_one_binds_every_value() {
    proptest!(|(table in identifier(), conditions in value_map())| {
        let (statement, values) = build_find_one(&table, &conditions).expect("valid input builds");

        prop_assert_eq!(values.len(), conditions.len());
        prop_assert_eq!(statement.matches('$').count(), conditions.len());
        for i in 1..=conditions.len() {
            let placeholder = format!("${}", i);
            prop_assert!(statement.contains(&placeholder));
        }
        assert_no_value_leak(&statement, &values);
    });
}

/// *For any* field set, insert statements bind all values and keep the
/// placeholder count equal to the column count.
#[test]
fn property_insert_binds_every_value() {
    proptest!(|(table in identifier(), fields in value_map())| {
        let (statement, values) = build_insert(&table, &fields, &[]).expect("valid input builds");

        prop_assert_eq!(values.len(), fields.len());
        prop_assert_eq!(statement.matches('$').count(), fields.len());
        prop_assert!(statement.ends_with("RETURNING *"));
        assert_no_value_leak(&statement, &values);
    });
}

/// *For any* field and condition sets, update statements number the
/// condition placeholders after the field placeholders, and the bound
/// values follow the same order.
#[test]
fn property_update_orders_fields_before_conditions() {
    proptest!(|(table in identifier(), fields in value_map(), conditions in value_map())| {
        let (statement, values) =
            build_update(&table, &conditions, &fields, &[]).expect("valid input builds");

        let total = fields.len() + conditions.len();
        prop_assert_eq!(values.len(), total);
        prop_assert_eq!(statement.matches('$').count(), total);

        // Values are field values first, then condition values
        let field_values: Vec<&Value> = fields.values().collect();
        for (i, expected) in field_values.iter().enumerate() {
            prop_assert_eq!(&&values[i], expected);
        }
        assert_no_value_leak(&statement, &values);
    });
}

/// *For any* condition set, delete statements bind every value.
#[test]
fn property_delete_binds_every_value() {
    proptest!(|(table in identifier(), conditions in value_map())| {
        let (statement, values) =
            build_delete(&table, &conditions, &["id"]).expect("valid input builds");

        prop_assert_eq!(values.len(), conditions.len());
        prop_assert_eq!(statement.matches('$').count(), conditions.len());
        assert_no_value_leak(&statement, &values);
    });
}

/// *For any* name containing a character outside `[A-Za-z0-9_]`, every
/// builder rejects it before producing a statement.
#[test]
fn property_invalid_identifiers_are_rejected() {
    proptest!(|(
        prefix in "[a-zA-Z_]{0,5}",
        bad in prop_oneof![Just(' '), Just(';'), Just('\''), Just('"'), Just('-'), Just('$')],
        suffix in "[a-zA-Z_]{0,5}",
        value in bound_value(),
    )| {
        let name = format!("{}{}{}", prefix, bad, suffix);
        prop_assert!(ensure_identifier(&name).is_err());

        let mut conditions = Map::new();
        conditions.insert("id".to_string(), value.clone());

        prop_assert!(build_find_one(&name, &conditions).is_err());

        let mut poisoned = Map::new();
        poisoned.insert(name.clone(), value);
        prop_assert!(build_insert("orders", &poisoned, &[]).is_err());
        prop_assert!(build_delete("orders", &conditions, &[&name]).is_err());
    });
}

/// *For any* valid identifier, validation accepts it.
#[test]
fn property_valid_identifiers_are_accepted() {
    proptest!(|(name in identifier())| {
        prop_assert!(ensure_identifier(&name).is_ok());
    });
}
