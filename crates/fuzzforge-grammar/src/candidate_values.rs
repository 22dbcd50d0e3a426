//! Candidate value pool
//!
//! For each fuzzable primitive the pool supplies the ordered list of concrete
//! string values to enumerate. Sources compose in a fixed order: explicit
//! values on the primitive (groups), dictionary entries (by kind or by custom
//! payload tag), registered value generators, and finally the primitive's
//! baked-in default. An empty composition is a fatal dictionary error.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::dictionary::MutationsDictionary;
use crate::error::{GrammarError, Result};
use crate::primitives::{Primitive, PrimitiveKind};

/// Supplies values on demand for a primitive kind or custom payload tag.
///
/// Generators may be finite (return `None` past the end) or infinite; the
/// pool imposes a per-request budget either way.
pub trait ValueGenerator: Send + Sync {
    /// Returns the value at `index`, or `None` when the generator is exhausted.
    fn nth_value(&self, index: usize) -> Option<String>;
}

impl<F> ValueGenerator for F
where
    F: Fn(usize) -> Option<String> + Send + Sync,
{
    fn nth_value(&self, index: usize) -> Option<String> {
        self(index)
    }
}

/// Key under which a value generator is registered
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GeneratorKey {
    /// Applies to every primitive of this kind
    Kind(PrimitiveKind),
    /// Applies to a specific custom payload tag
    Tag(String),
}

/// Ordered candidate values for every fuzzable primitive
pub struct CandidateValuesPool {
    kind_values: HashMap<PrimitiveKind, Vec<String>>,
    custom_payloads: HashMap<String, Vec<String>>,
    uuid4_suffix_payloads: HashMap<String, String>,
    shadow_payloads: HashMap<String, String>,
    generators: HashMap<GeneratorKey, Arc<dyn ValueGenerator>>,
    generator_budget: usize,
    today: NaiveDate,
}

impl std::fmt::Debug for CandidateValuesPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandidateValuesPool")
            .field("kind_values", &self.kind_values)
            .field("custom_payloads", &self.custom_payloads)
            .field("generators", &self.generators.len())
            .finish()
    }
}

impl CandidateValuesPool {
    /// Build a pool from a mutations dictionary.
    pub fn from_dictionary(dict: &MutationsDictionary) -> Self {
        let mut kind_values = HashMap::new();
        kind_values.insert(PrimitiveKind::String, dict.fuzzable_string.clone());
        kind_values.insert(PrimitiveKind::Int, dict.fuzzable_int.clone());
        kind_values.insert(PrimitiveKind::Number, dict.fuzzable_number.clone());
        kind_values.insert(PrimitiveKind::Bool, dict.fuzzable_bool.clone());
        kind_values.insert(PrimitiveKind::Date, dict.fuzzable_date.clone());
        kind_values.insert(PrimitiveKind::DateTime, dict.fuzzable_datetime.clone());
        kind_values.insert(PrimitiveKind::Object, dict.fuzzable_object.clone());

        let custom_payloads =
            dict.custom_payload.iter().map(|(k, v)| (k.clone(), v.as_vec())).collect();

        Self {
            kind_values,
            custom_payloads,
            uuid4_suffix_payloads: dict.custom_payload_uuid4_suffix.clone(),
            shadow_payloads: dict.shadow_values.clone(),
            generators: HashMap::new(),
            generator_budget: 10,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Pin "today" for deterministic date normalization in tests.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Cap how many values are drawn from a generator per primitive.
    pub fn with_generator_budget(mut self, budget: usize) -> Self {
        self.generator_budget = budget;
        self
    }

    /// Register a value generator for a kind or custom payload tag.
    pub fn register_generator(&mut self, key: GeneratorKey, generator: Arc<dyn ValueGenerator>) {
        self.generators.insert(key, generator);
    }

    /// Whether shadow values exist for the multi-tenant namespace checker.
    pub fn has_shadow_values(&self) -> bool {
        !self.shadow_payloads.is_empty()
    }

    /// The shadow (attacker identity) value for a custom payload tag.
    pub fn shadow_value(&self, tag: &str) -> Option<&str> {
        self.shadow_payloads.get(tag).map(String::as_str)
    }

    /// The primary value for a custom payload tag, if present.
    pub fn custom_payload_value(&self, tag: &str) -> Option<&str> {
        self.custom_payloads.get(tag).and_then(|v| v.first()).map(String::as_str)
    }

    /// All shadow tag/value pairs.
    pub fn shadow_values(&self) -> impl Iterator<Item = (&str, &str)> {
        self.shadow_payloads.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn generated_values(&self, key: &GeneratorKey) -> Vec<String> {
        let Some(generator) = self.generators.get(key) else {
            return Vec::new();
        };
        let mut out = Vec::with_capacity(self.generator_budget);
        for i in 0..self.generator_budget {
            match generator.nth_value(i) {
                Some(v) => out.push(v),
                None => break,
            }
        }
        out
    }

    /// The ordered candidate values for a fuzzable primitive.
    ///
    /// Quoting is not applied here; the request renderer quotes the chosen
    /// value when the primitive asks for it.
    pub fn candidate_values(&self, primitive: &Primitive) -> Result<Vec<String>> {
        match primitive {
            Primitive::FuzzableGroup { tag, values, .. } => {
                if values.is_empty() {
                    Err(GrammarError::InvalidDictionary(format!("group '{tag}'")))
                } else {
                    Ok(values.clone())
                }
            }
            Primitive::CustomPayload { tag, .. } => {
                let mut values =
                    self.custom_payloads.get(tag).cloned().unwrap_or_default();
                values.extend(self.generated_values(&GeneratorKey::Tag(tag.clone())));
                if values.is_empty() {
                    Err(GrammarError::InvalidDictionary(format!("custom payload '{tag}'")))
                } else {
                    Ok(values)
                }
            }
            Primitive::CustomPayloadUuid4Suffix { tag, .. } => self
                .uuid4_suffix_payloads
                .get(tag)
                .map(|prefix| vec![prefix.clone()])
                .ok_or_else(|| {
                    GrammarError::InvalidDictionary(format!("uuid4 suffix payload '{tag}'"))
                }),
            // The placeholder is replaced with a fresh uuid4 per rendering.
            Primitive::FuzzableUuid4 { .. } => Ok(vec!["uuid4".to_string()]),
            _ => {
                let Some(kind) = primitive.kind() else {
                    return Ok(Vec::new());
                };
                let mut values =
                    self.kind_values.get(&kind).cloned().unwrap_or_default();
                values.extend(self.examples_for(primitive, kind));
                values.extend(self.generated_values(&GeneratorKey::Kind(kind)));
                if values.is_empty() {
                    if let Some(default) = primitive_default(primitive) {
                        if !default.is_empty() {
                            return Ok(vec![default.to_string()]);
                        }
                    }
                    Err(GrammarError::InvalidDictionary(kind.to_string()))
                } else {
                    Ok(values)
                }
            }
        }
    }

    fn examples_for(&self, primitive: &Primitive, kind: PrimitiveKind) -> Vec<String> {
        let examples = match primitive {
            Primitive::FuzzableString { examples, .. }
            | Primitive::FuzzableInt { examples, .. }
            | Primitive::FuzzableNumber { examples, .. }
            | Primitive::FuzzableDate { examples, .. }
            | Primitive::FuzzableDatetime { examples, .. }
            | Primitive::FuzzableObject { examples, .. } => examples.clone(),
            _ => Vec::new(),
        };
        if matches!(kind, PrimitiveKind::Date | PrimitiveKind::DateTime) {
            examples
                .iter()
                .enumerate()
                .map(|(i, e)| normalize_date_example(e, i, self.today))
                .collect()
        } else {
            examples
        }
    }
}

fn primitive_default(primitive: &Primitive) -> Option<&str> {
    match primitive {
        Primitive::FuzzableString { default, .. }
        | Primitive::FuzzableInt { default, .. }
        | Primitive::FuzzableNumber { default, .. }
        | Primitive::FuzzableBool { default }
        | Primitive::FuzzableDate { default, .. }
        | Primitive::FuzzableDatetime { default, .. }
        | Primitive::FuzzableObject { default, .. } => Some(default.as_str()),
        _ => None,
    }
}

/// Shift a stale date example into the near future, keeping its format
/// family.
///
/// An example older than `today` is replaced with `today + min(position, 7)`
/// days, so each example of a set keeps a distinct slot in `[today, today+7]`.
/// Recognized formats: ISO-8601 date, ISO-8601 datetime with or without
/// offset, and `MM/DD/YYYY` / `M/D/YYYY` with an optional clock component and
/// trailing zone tag; slash dates always come back zero-padded. Unrecognized
/// examples pass through unchanged.
pub fn normalize_date_example(example: &str, position: usize, today: NaiveDate) -> String {
    let shifted = today + Duration::days(position.min(7) as i64);

    // ISO-8601 with offset, e.g. 2019-06-26T20:20:39+00:00
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(example) {
        if dt.date_naive() < today {
            let new_dt = dt
                .with_year(shifted.year())
                .and_then(|d| d.with_month(shifted.month()))
                .and_then(|d| d.with_day(shifted.day()));
            if let Some(new_dt) = new_dt {
                return new_dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string();
            }
        }
        return example.to_string();
    }

    // ISO-8601 without offset
    if let Ok(dt) = NaiveDateTime::parse_from_str(example, "%Y-%m-%dT%H:%M:%S") {
        if dt.date() < today {
            let new_dt = shifted.and_time(dt.time());
            return new_dt.format("%Y-%m-%dT%H:%M:%S").to_string();
        }
        return example.to_string();
    }

    // Plain ISO-8601 date
    if let Ok(date) = NaiveDate::parse_from_str(example, "%Y-%m-%d") {
        if date < today {
            return shifted.format("%Y-%m-%d").to_string();
        }
        return example.to_string();
    }

    // MM/DD/YYYY or M/D/YYYY, optional clock and trailing zone tag
    if let Some(normalized) = normalize_slash_date(example, shifted, today) {
        return normalized;
    }

    example.to_string()
}

fn normalize_slash_date(example: &str, shifted: NaiveDate, today: NaiveDate) -> Option<String> {
    let mut parts = example.splitn(2, ' ');
    let date_part = parts.next()?;
    let tail = parts.next();

    let date = NaiveDate::parse_from_str(date_part, "%m/%d/%Y").ok()?;
    if let Some(tail) = tail {
        // Validate the clock component when present (a trailing zone tag such
        // as GMT or UTC is passed through untouched).
        let clock = tail.split_whitespace().next()?;
        let clock_ok = NaiveTime::parse_from_str(clock, "%H:%M:%S").is_ok()
            || NaiveTime::parse_from_str(&format!("{clock} {}", second_token(tail)), "%I:%M:%S %p")
                .is_ok();
        if !clock_ok {
            return None;
        }
    }

    if date >= today {
        return Some(example.to_string());
    }

    // Shifted dates always come out zero-padded, whatever the input style.
    let new_date = format!("{:02}/{:02}/{}", shifted.month(), shifted.day(), shifted.year());
    match tail {
        Some(tail) => Some(format!("{new_date} {tail}")),
        None => Some(new_date),
    }
}

fn second_token(s: &str) -> &str {
    s.split_whitespace().nth(1).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::MutationsDictionary;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, 15).expect("valid date")
    }

    fn pool_with(dict_json: &str) -> CandidateValuesPool {
        let dict: MutationsDictionary = serde_json::from_str(dict_json).expect("dict");
        CandidateValuesPool::from_dictionary(&dict).with_today(today())
    }

    #[test]
    fn test_group_values_win() {
        let pool = pool_with("{}");
        let group = Primitive::FuzzableGroup {
            tag: "mode".into(),
            values: vec!["a".into(), "b".into()],
            quoted: false,
        };
        assert_eq!(pool.candidate_values(&group).expect("values"), vec!["a", "b"]);
    }

    #[test]
    fn test_dictionary_then_examples_order() {
        let pool = pool_with(r#"{"fuzzable_string": ["fuzzstring"]}"#);
        let p = Primitive::FuzzableString {
            default: "d".into(),
            quoted: false,
            examples: vec!["example-1".into()],
        };
        assert_eq!(
            pool.candidate_values(&p).expect("values"),
            vec!["fuzzstring", "example-1"]
        );
    }

    #[test]
    fn test_default_used_when_all_sources_empty() {
        let pool = pool_with("{}");
        let p = Primitive::FuzzableInt { default: "1".into(), examples: vec![] };
        assert_eq!(pool.candidate_values(&p).expect("values"), vec!["1"]);
    }

    #[test]
    fn test_invalid_dictionary_when_nothing_available() {
        let pool = pool_with("{}");
        let p = Primitive::CustomPayload { tag: "missing".into(), quoted: false, writer: None };
        assert!(matches!(
            pool.candidate_values(&p),
            Err(GrammarError::InvalidDictionary(_))
        ));
    }

    #[test]
    fn test_generator_values_respect_budget() {
        let mut pool = pool_with("{}");
        pool = pool.with_generator_budget(3);
        pool.register_generator(
            GeneratorKey::Kind(PrimitiveKind::String),
            Arc::new(|i: usize| Some(format!("gen-{i}"))),
        );
        let p = Primitive::FuzzableString { default: "d".into(), quoted: false, examples: vec![] };
        assert_eq!(
            pool.candidate_values(&p).expect("values"),
            vec!["gen-0", "gen-1", "gen-2"]
        );
    }

    #[test]
    fn test_stale_iso_date_shifts_by_position() {
        assert_eq!(normalize_date_example("2019-06-26", 0, today()), "2021-03-15");
        assert_eq!(normalize_date_example("2019-06-26", 2, today()), "2021-03-17");
        // Position past the window clamps to seven days out.
        assert_eq!(normalize_date_example("2019-06-26", 12, today()), "2021-03-22");
    }

    #[test]
    fn test_future_date_unchanged() {
        assert_eq!(normalize_date_example("2031-01-01", 0, today()), "2031-01-01");
    }

    #[test]
    fn test_stale_datetime_keeps_clock_and_offset() {
        assert_eq!(
            normalize_date_example("2019-06-26T20:20:39+00:00", 1, today()),
            "2021-03-16T20:20:39+00:00"
        );
        assert_eq!(
            normalize_date_example("2019-06-26T20:20:39", 0, today()),
            "2021-03-15T20:20:39"
        );
    }

    #[test]
    fn test_slash_dates_zero_pad_and_keep_tail() {
        assert_eq!(normalize_date_example("06/26/2019", 0, today()), "03/15/2021");
        // Unpadded stale input still shifts to a zero-padded date.
        assert_eq!(normalize_date_example("6/26/2019", 0, today()), "03/15/2021");
        assert_eq!(normalize_date_example("1/8/2019", 1, today()), "03/16/2021");
        assert_eq!(
            normalize_date_example("06/26/2019 12:00:00 GMT", 0, today()),
            "03/15/2021 12:00:00 GMT"
        );
    }

    #[test]
    fn test_unrecognized_example_passes_through() {
        assert_eq!(normalize_date_example("not-a-date", 0, today()), "not-a-date");
    }
}
