use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use super::model::{Delivery, Item, Order, Payment};

// ============================================================================
// Order Validation - declarative constraint schema
// ============================================================================
//
// Each part of the aggregate declares its fields as (name, value, rules).
// `validate` walks every declaration and collects one violation per failing
// field; the first failing rule of a field wins, so a missing phone number is
// reported as "is required" rather than "must be an E.164 phone number".
//
// Numeric "required" fields treat zero as absent, matching how the feed
// producers fill in defaults. Text lengths are capped at the width of the
// column the field is stored in.
//
// ============================================================================

static E164: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("E.164 pattern is valid"));

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
        .expect("email pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Required,
    Min(i64),
    MaxLen(usize),
    Digits(usize),
    E164,
    Email,
    Rfc3339,
    NonEmpty,
    MatchesOrderTrack,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Required => write!(f, "is required"),
            Rule::Min(min) => write!(f, "must be >= {}", min),
            Rule::MaxLen(max) => write!(f, "must be at most {} characters", max),
            Rule::Digits(len) => write!(f, "must be exactly {} digits", len),
            Rule::E164 => write!(f, "must be an E.164 phone number"),
            Rule::Email => write!(f, "must be a valid email address"),
            Rule::Rfc3339 => write!(f, "must be an RFC3339 timestamp"),
            Rule::NonEmpty => write!(f, "must contain at least one element"),
            Rule::MatchesOrderTrack => write!(f, "must match the order track_number"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Value<'a> {
    Text(&'a str),
    Int(i64),
}

impl Rule {
    fn holds(&self, value: Value<'_>) -> bool {
        match (self, value) {
            (Rule::Required, Value::Text(s)) => !s.is_empty(),
            (Rule::Required, Value::Int(n)) => n != 0,
            (Rule::Min(min), Value::Int(n)) => n >= *min,
            (Rule::MaxLen(max), Value::Text(s)) => s.chars().count() <= *max,
            (Rule::Digits(len), Value::Text(s)) => {
                s.len() == *len && s.bytes().all(|b| b.is_ascii_digit())
            }
            (Rule::E164, Value::Text(s)) => E164.is_match(s),
            (Rule::Email, Value::Text(s)) => EMAIL.is_match(s),
            (Rule::Rfc3339, Value::Text(s)) => DateTime::parse_from_rfc3339(s).is_ok(),
            // Rule declared against the wrong kind of field
            _ => false,
        }
    }
}

/// A single failed constraint, addressed by its field path (`items[0].price`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub rule: Rule,
}

impl Violation {
    pub fn new(field: impl Into<String>, rule: Rule) -> Self {
        Self {
            field: field.into(),
            rule,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.rule)
    }
}

/// Every violation found in one order; never empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(Vec<Violation>);

impl ValidationErrors {
    pub fn violations(&self) -> &[Violation] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, field: &str, rule: Rule) -> bool {
        self.0.iter().any(|v| v.field == field && v.rule == rule)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", violation)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl From<Vec<Violation>> for ValidationErrors {
    fn from(violations: Vec<Violation>) -> Self {
        Self(violations)
    }
}

// ============================================================================
// Schema
// ============================================================================

type Field<'a> = (&'static str, Value<'a>, &'static [Rule]);

const REQUIRED: &[Rule] = &[Rule::Required];
const TEXT: &[Rule] = &[Rule::Required, Rule::MaxLen(255)];
const OPTIONAL_TEXT: &[Rule] = &[Rule::MaxLen(255)];
const CODE: &[Rule] = &[Rule::Required, Rule::MaxLen(10)];
const LABEL: &[Rule] = &[Rule::Required, Rule::MaxLen(50)];
const REQUIRED_NON_NEGATIVE: &[Rule] = &[Rule::Required, Rule::Min(0)];
const NON_NEGATIVE: &[Rule] = &[Rule::Min(0)];
const SHARD_MANAGER: &[Rule] = &[Rule::Required, Rule::Min(1)];
const TIMESTAMP: &[Rule] = &[Rule::Required, Rule::Rfc3339];
const PHONE: &[Rule] = &[Rule::Required, Rule::E164];
const ZIP: &[Rule] = &[Rule::Required, Rule::Digits(7)];
const EMAIL_ADDRESS: &[Rule] = &[Rule::Required, Rule::MaxLen(255), Rule::Email];

fn order_fields(order: &Order) -> Vec<Field<'_>> {
    vec![
        ("order_uid", Value::Text(&order.order_uid), TEXT),
        ("track_number", Value::Text(&order.track_number), TEXT),
        ("entry", Value::Text(&order.entry), TEXT),
        ("locale", Value::Text(&order.locale), CODE),
        ("internal_signature", Value::Text(&order.internal_signature), OPTIONAL_TEXT),
        ("customer_id", Value::Text(&order.customer_id), TEXT),
        ("delivery_service", Value::Text(&order.delivery_service), TEXT),
        ("shardkey", Value::Text(&order.shardkey), TEXT),
        ("sm_id", Value::Int(order.sm_id.into()), SHARD_MANAGER),
        ("date_created", Value::Text(&order.date_created), TIMESTAMP),
        ("oof_shard", Value::Text(&order.oof_shard), TEXT),
    ]
}

fn delivery_fields(delivery: &Delivery) -> Vec<Field<'_>> {
    vec![
        ("name", Value::Text(&delivery.name), TEXT),
        ("phone", Value::Text(&delivery.phone), PHONE),
        ("zip", Value::Text(&delivery.zip), ZIP),
        ("city", Value::Text(&delivery.city), TEXT),
        ("address", Value::Text(&delivery.address), TEXT),
        ("region", Value::Text(&delivery.region), TEXT),
        ("email", Value::Text(&delivery.email), EMAIL_ADDRESS),
    ]
}

fn payment_fields(payment: &Payment) -> Vec<Field<'_>> {
    vec![
        ("transaction", Value::Text(&payment.transaction), TEXT),
        ("request_id", Value::Text(&payment.request_id), OPTIONAL_TEXT),
        ("currency", Value::Text(&payment.currency), CODE),
        ("provider", Value::Text(&payment.provider), LABEL),
        ("amount", Value::Int(payment.amount.into()), REQUIRED_NON_NEGATIVE),
        ("payment_dt", Value::Int(payment.payment_dt), REQUIRED),
        ("bank", Value::Text(&payment.bank), TEXT),
        ("delivery_cost", Value::Int(payment.delivery_cost.into()), NON_NEGATIVE),
        ("goods_total", Value::Int(payment.goods_total.into()), NON_NEGATIVE),
        ("custom_fee", Value::Int(payment.custom_fee.into()), NON_NEGATIVE),
    ]
}

fn item_fields(item: &Item) -> Vec<Field<'_>> {
    vec![
        ("chrt_id", Value::Int(item.chrt_id.into()), REQUIRED),
        ("track_number", Value::Text(&item.track_number), TEXT),
        ("price", Value::Int(item.price.into()), REQUIRED_NON_NEGATIVE),
        ("rid", Value::Text(&item.rid), TEXT),
        ("name", Value::Text(&item.name), TEXT),
        ("sale", Value::Int(item.sale.into()), NON_NEGATIVE),
        ("size", Value::Text(&item.size), LABEL),
        ("total_price", Value::Int(item.total_price.into()), REQUIRED_NON_NEGATIVE),
        ("nm_id", Value::Int(item.nm_id.into()), REQUIRED),
        ("brand", Value::Text(&item.brand), TEXT),
        ("status", Value::Int(item.status.into()), REQUIRED),
    ]
}

fn check(prefix: &str, fields: Vec<Field<'_>>, violations: &mut Vec<Violation>) {
    for (name, value, rules) in fields {
        if let Some(rule) = rules.iter().find(|rule| !rule.holds(value)) {
            let path = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", prefix, name)
            };
            violations.push(Violation::new(path, *rule));
        }
    }
}

/// Check every structural and format invariant of an order.
/// Pure: no I/O, never panics, reports all violations at once.
pub fn validate(order: &Order) -> Result<(), ValidationErrors> {
    let mut violations = Vec::new();

    check("", order_fields(order), &mut violations);
    check("delivery", delivery_fields(&order.delivery), &mut violations);
    check("payment", payment_fields(&order.payment), &mut violations);

    if order.items.is_empty() {
        violations.push(Violation::new("items", Rule::NonEmpty));
    }

    for (index, item) in order.items.iter().enumerate() {
        let prefix = format!("items[{}]", index);
        check(&prefix, item_fields(item), &mut violations);

        // Items are attached to their order through the track number
        if !item.track_number.is_empty() && item.track_number != order.track_number {
            violations.push(Violation::new(
                format!("{}.track_number", prefix),
                Rule::MatchesOrderTrack,
            ));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationErrors(violations))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
