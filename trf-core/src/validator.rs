use chrono::NaiveDate;
use regex::Regex;
use std::sync::Arc;

use crate::record::{CanonicalRecord, ExtractedField, FieldValue, ValidationViolation, ViolationKind};
use crate::schema::{FieldSpec, FieldType, TrfSchema};

/// Date formats observed on scanned requisition forms.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y"];

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Parse a raw textual value into the typed form a spec calls for.
/// Returns a human-readable reason on failure; never panics.
pub fn parse_value(spec: &FieldSpec, raw: &str) -> Result<FieldValue, String> {
    let raw = raw.trim();
    match spec.field_type {
        FieldType::Number => raw
            .parse::<f64>()
            .map(FieldValue::Number)
            .map_err(|_| format!("'{}' is not a number", raw)),
        FieldType::Date => parse_date(raw)
            .map(FieldValue::Date)
            .ok_or_else(|| format!("'{}' is not a recognizable date", raw)),
        FieldType::Text | FieldType::Enum => Ok(FieldValue::Text(raw.to_string())),
    }
}

/// Check one present field against its spec. `None` means the value is
/// acceptable.
pub fn check_field(spec: &FieldSpec, field: &ExtractedField) -> Option<ValidationViolation> {
    match spec.field_type {
        FieldType::Number => {
            let number = match &field.value {
                FieldValue::Number(n) => *n,
                FieldValue::Text(s) => match s.trim().parse::<f64>() {
                    Ok(n) => n,
                    Err(_) => {
                        return Some(ValidationViolation::new(
                            &spec.name,
                            ViolationKind::TypeMismatch,
                            format!("expected a number, got '{}'", s),
                        ));
                    }
                },
                FieldValue::Date(d) => {
                    return Some(ValidationViolation::new(
                        &spec.name,
                        ViolationKind::TypeMismatch,
                        format!("expected a number, got date '{}'", d),
                    ));
                }
            };
            if let Some((min, max)) = spec.range {
                if number < min || number > max {
                    return Some(ValidationViolation::new(
                        &spec.name,
                        ViolationKind::OutOfRange,
                        format!("{} is outside [{}, {}]", number, min, max),
                    ));
                }
            }
            None
        }
        FieldType::Date => match &field.value {
            FieldValue::Date(_) => None,
            FieldValue::Text(s) => {
                if parse_date(s).is_some() {
                    None
                } else {
                    Some(ValidationViolation::new(
                        &spec.name,
                        ViolationKind::TypeMismatch,
                        format!("expected a date, got '{}'", s),
                    ))
                }
            }
            FieldValue::Number(n) => Some(ValidationViolation::new(
                &spec.name,
                ViolationKind::TypeMismatch,
                format!("expected a date, got number {}", n),
            )),
        },
        FieldType::Enum => match &field.value {
            FieldValue::Text(s) => {
                if spec.valid_values.iter().any(|v| v == s) {
                    None
                } else {
                    Some(ValidationViolation::new(
                        &spec.name,
                        ViolationKind::InvalidEnum,
                        format!(
                            "'{}' is not one of [{}]",
                            s,
                            spec.valid_values.join(", ")
                        ),
                    ))
                }
            }
            other => Some(ValidationViolation::new(
                &spec.name,
                ViolationKind::TypeMismatch,
                format!("expected one of [{}], got '{}'", spec.valid_values.join(", "), other),
            )),
        },
        FieldType::Text => {
            if let Some(pattern) = &spec.pattern {
                // An uncompilable pattern is a schema authoring bug; the
                // validator stays total and skips the check.
                if let Ok(re) = Regex::new(pattern) {
                    let rendered = field.value.to_string();
                    if !re.is_match(&rendered) {
                        return Some(ValidationViolation::new(
                            &spec.name,
                            ViolationKind::TypeMismatch,
                            format!("'{}' does not match the expected format", rendered),
                        ));
                    }
                }
            }
            None
        }
    }
}

/// Checks a canonical record against the schema. Pure and total: any input
/// terminates with a violation list, never an error.
pub struct SchemaValidator {
    schema: Arc<TrfSchema>,
}

impl SchemaValidator {
    pub fn new(schema: Arc<TrfSchema>) -> Self {
        Self { schema }
    }

    /// Violations in schema declaration order, conditional requirements
    /// last. Deterministic: the same record always yields the same sequence.
    pub fn validate(&self, record: &CanonicalRecord) -> Vec<ValidationViolation> {
        let mut violations = Vec::new();

        for spec in self.schema.fields() {
            match record.get(&spec.name) {
                None => {
                    if spec.required {
                        violations.push(ValidationViolation::new(
                            &spec.name,
                            ViolationKind::MissingRequired,
                            format!("required field '{}' is missing", spec.name),
                        ));
                    }
                }
                Some(field) => {
                    if let Some(violation) = check_field(spec, field) {
                        violations.push(violation);
                    }
                }
            }
        }

        for relationship in self.schema.relationships() {
            let triggered = record
                .get(&relationship.if_field)
                .map(|f| f.value.to_string() == relationship.equals)
                .unwrap_or(false);
            if !triggered {
                continue;
            }
            for target in &relationship.then_require {
                let already_reported = violations
                    .iter()
                    .any(|v| v.field_name == *target && v.kind == ViolationKind::MissingRequired);
                if record.get(target).is_none() && !already_reported {
                    violations.push(ValidationViolation::new(
                        target,
                        ViolationKind::MissingRequired,
                        format!(
                            "'{}' is required when '{}' is '{}'",
                            target, relationship.if_field, relationship.equals
                        ),
                    ));
                }
            }
        }

        violations
    }

    /// Fraction of required fields present in the record.
    pub fn completion(&self, record: &CanonicalRecord) -> f64 {
        let required: Vec<_> = self.schema.required_fields().collect();
        if required.is_empty() {
            return 1.0;
        }
        let present = required
            .iter()
            .filter(|spec| record.get(&spec.name).is_some())
            .count();
        present as f64 / required.len() as f64
    }

    pub fn schema(&self) -> &Arc<TrfSchema> {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldRelationship, TrfSchema};

    fn validator() -> SchemaValidator {
        SchemaValidator::new(Arc::new(TrfSchema::trf()))
    }

    fn record_with(fields: &[(&str, FieldValue)]) -> CanonicalRecord {
        let mut record = CanonicalRecord::new("case-1");
        for (name, value) in fields {
            record.insert(ExtractedField::new(*name, value.clone(), 0.9, "doc-1"));
        }
        record
    }

    #[test]
    fn empty_record_yields_exactly_one_missing_required_per_required_field() {
        let validator = validator();
        let violations = validator.validate(&CanonicalRecord::new("case-1"));

        let required: Vec<String> = validator
            .schema()
            .required_fields()
            .map(|f| f.name.clone())
            .collect();
        assert_eq!(violations.len(), required.len());
        for (violation, name) in violations.iter().zip(&required) {
            assert_eq!(violation.kind, ViolationKind::MissingRequired);
            assert_eq!(&violation.field_name, name);
        }
    }

    #[test]
    fn missing_required_number_field() {
        let spec = vec![crate::schema::FieldSpec {
            name: "patient_age".to_string(),
            field_type: FieldType::Number,
            required: true,
            valid_values: Vec::new(),
            pattern: None,
            range: Some((0.0, 130.0)),
            description: String::new(),
        }];
        let validator = SchemaValidator::new(Arc::new(TrfSchema::new(spec, Vec::new())));
        let violations = validator.validate(&CanonicalRecord::new("case-1"));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field_name, "patient_age");
        assert_eq!(violations[0].kind, ViolationKind::MissingRequired);
    }

    #[test]
    fn validation_is_idempotent() {
        let validator = validator();
        let record = record_with(&[
            ("patient_id", FieldValue::Text("MRN-1".into())),
            ("gender", FieldValue::Text("Unsure".into())),
            ("patient_age", FieldValue::Text("not a number".into())),
        ]);
        let first = validator.validate(&record);
        let second = validator.validate(&record);
        assert_eq!(first, second);
    }

    #[test]
    fn unparseable_number_is_type_mismatch_not_coerced() {
        let validator = validator();
        let record = record_with(&[("patient_age", FieldValue::Text("forty".into()))]);
        let violation = validator
            .validate(&record)
            .into_iter()
            .find(|v| v.field_name == "patient_age")
            .unwrap();
        assert_eq!(violation.kind, ViolationKind::TypeMismatch);
    }

    #[test]
    fn number_out_of_range() {
        let validator = validator();
        let record = record_with(&[("patient_age", FieldValue::Number(212.0))]);
        let violation = validator
            .validate(&record)
            .into_iter()
            .find(|v| v.field_name == "patient_age")
            .unwrap();
        assert_eq!(violation.kind, ViolationKind::OutOfRange);
    }

    #[test]
    fn enum_membership_is_checked() {
        let validator = validator();
        let record = record_with(&[("gender", FieldValue::Text("Unknown".into()))]);
        let violation = validator
            .validate(&record)
            .into_iter()
            .find(|v| v.field_name == "gender")
            .unwrap();
        assert_eq!(violation.kind, ViolationKind::InvalidEnum);
    }

    #[test]
    fn textual_dates_in_known_formats_are_accepted() {
        let validator = validator();
        for raw in ["1990-02-17", "17/02/1990", "02/17/1990", "17-02-1990", "17.02.1990"] {
            let record = record_with(&[("dob", FieldValue::Text(raw.into()))]);
            assert!(
                !validator.validate(&record).iter().any(|v| v.field_name == "dob"),
                "rejected {}",
                raw
            );
        }
        let record = record_with(&[("dob", FieldValue::Text("February sometime".into()))]);
        let violation = validator
            .validate(&record)
            .into_iter()
            .find(|v| v.field_name == "dob")
            .unwrap();
        assert_eq!(violation.kind, ViolationKind::TypeMismatch);
    }

    #[test]
    fn pattern_constraint_failures_are_type_mismatch() {
        let validator = validator();
        let record = record_with(&[("email", FieldValue::Text("not-an-email".into()))]);
        let violation = validator
            .validate(&record)
            .into_iter()
            .find(|v| v.field_name == "email")
            .unwrap();
        assert_eq!(violation.kind, ViolationKind::TypeMismatch);
    }

    #[test]
    fn conditional_requirement_triggers_without_duplicates() {
        let validator = validator();

        // Not triggered: prior_treatment is No.
        let record = record_with(&[("prior_treatment", FieldValue::Text("No".into()))]);
        assert!(
            !validator.validate(&record).iter().any(|v| v.field_name == "past_therapy")
        );

        // Triggered: past_therapy becomes required.
        let record = record_with(&[("prior_treatment", FieldValue::Text("Yes".into()))]);
        let missing: Vec<_> = validator
            .validate(&record)
            .into_iter()
            .filter(|v| v.field_name == "past_therapy")
            .collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].kind, ViolationKind::MissingRequired);
    }

    #[test]
    fn conditional_requirement_never_duplicates_an_unconditional_one() {
        let fields = vec![
            crate::schema::FieldSpec {
                name: "trigger".to_string(),
                field_type: FieldType::Text,
                required: false,
                valid_values: Vec::new(),
                pattern: None,
                range: None,
                description: String::new(),
            },
            crate::schema::FieldSpec {
                name: "target".to_string(),
                field_type: FieldType::Text,
                required: true,
                valid_values: Vec::new(),
                pattern: None,
                range: None,
                description: String::new(),
            },
        ];
        let relationships = vec![FieldRelationship {
            if_field: "trigger".to_string(),
            equals: "Yes".to_string(),
            then_require: vec!["target".to_string()],
        }];
        let validator = SchemaValidator::new(Arc::new(TrfSchema::new(fields, relationships)));

        let record = record_with(&[("trigger", FieldValue::Text("Yes".into()))]);
        let missing: Vec<_> = validator
            .validate(&record)
            .into_iter()
            .filter(|v| v.field_name == "target")
            .collect();
        assert_eq!(missing.len(), 1);
    }

    #[test]
    fn completion_counts_required_fields_only() {
        let validator = validator();
        let required_total = validator.schema().required_fields().count();

        let record = record_with(&[
            ("patient_id", FieldValue::Text("MRN-1".into())),
            ("email", FieldValue::Text("a@b.com".into())),
        ]);
        let completion = validator.completion(&record);
        assert!((completion - 1.0 / required_total as f64).abs() < 1e-9);
    }
}
