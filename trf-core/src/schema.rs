use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Value type of a TRF field. Drives parsing and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Date,
    Enum,
    Number,
}

/// Static description of one TRF field. Loaded once at process start and
/// shared read-only across the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    /// Allowed members for `FieldType::Enum`; empty otherwise.
    #[serde(default)]
    pub valid_values: Vec<String>,
    /// Anchored regex the textual form must match, when present.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Inclusive numeric bounds for `FieldType::Number`.
    #[serde(default)]
    pub range: Option<(f64, f64)>,
    /// Short human description, used when prompting the inference collaborator.
    #[serde(default)]
    pub description: String,
}

impl FieldSpec {
    fn text(name: &str, required: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Text,
            required,
            valid_values: Vec::new(),
            pattern: None,
            range: None,
            description: description.to_string(),
        }
    }

    fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    fn date(name: &str, required: bool, description: &str) -> Self {
        Self {
            field_type: FieldType::Date,
            ..Self::text(name, required, description)
        }
    }

    fn number(name: &str, required: bool, range: (f64, f64), description: &str) -> Self {
        Self {
            field_type: FieldType::Number,
            range: Some(range),
            ..Self::text(name, required, description)
        }
    }

    fn enumeration(name: &str, required: bool, values: &[&str], description: &str) -> Self {
        Self {
            field_type: FieldType::Enum,
            valid_values: values.iter().map(|v| v.to_string()).collect(),
            ..Self::text(name, required, description)
        }
    }
}

/// A conditional requirement: when `if_field` holds `equals`, every field in
/// `then_require` must be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldRelationship {
    pub if_field: String,
    pub equals: String,
    pub then_require: Vec<String>,
}

/// The full TRF schema: field specs in declaration order plus conditional
/// relationships. Declaration order is load-bearing: the validator reports
/// violations in this order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrfSchema {
    fields: Vec<FieldSpec>,
    #[serde(default)]
    relationships: Vec<FieldRelationship>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl TrfSchema {
    pub fn new(fields: Vec<FieldSpec>, relationships: Vec<FieldRelationship>) -> Self {
        let index = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            fields,
            relationships,
            index,
        }
    }

    /// Field specs in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn relationships(&self) -> &[FieldRelationship] {
        &self.relationships
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.required)
    }

    /// The standard Test Requisition Form schema.
    pub fn trf() -> Self {
        let fields = vec![
            FieldSpec::text("patient_id", true, "Unique patient identifier (MRN/UHID)"),
            FieldSpec::text("first_name", true, "Patient given name"),
            FieldSpec::text("last_name", true, "Patient family name"),
            FieldSpec::enumeration(
                "gender",
                true,
                &["Male", "Female", "Other"],
                "Patient gender as recorded on the form",
            ),
            FieldSpec::date("dob", true, "Patient date of birth"),
            FieldSpec::number("patient_age", false, (0.0, 130.0), "Patient age in years"),
            FieldSpec::text("phone", true, "Patient contact phone number")
                .with_pattern(r"^\+?[0-9\-\(\)\s\.]{7,}$"),
            FieldSpec::text("email", false, "Patient email address")
                .with_pattern(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$"),
            FieldSpec::text("primary_diagnosis", true, "Primary clinical diagnosis"),
            FieldSpec::date("diagnosis_date", false, "Date the diagnosis was made"),
            FieldSpec::enumeration(
                "prior_treatment",
                false,
                &["Yes", "No"],
                "Whether the patient failed prior treatment",
            ),
            FieldSpec::text("past_therapy", false, "Description of past therapy received"),
            FieldSpec::text("physician_name", false, "Referring or treating physician"),
            FieldSpec::text("physician_email", false, "Physician email address")
                .with_pattern(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$"),
            FieldSpec::text("hospital_name", false, "Hospital or facility name"),
            FieldSpec::enumeration(
                "sample_type",
                false,
                &[
                    "Blood",
                    "Tissue",
                    "Bone Marrow",
                    "Swab",
                    "Saliva",
                    "Urine",
                    "Plasma",
                    "Serum",
                ],
                "Type of specimen collected",
            ),
            FieldSpec::text("sample_id", false, "Sample or specimen identifier")
                .with_pattern(r"^[A-Za-z0-9\-/]+$"),
            FieldSpec::date("collection_date", false, "Sample collection date"),
        ];

        let relationships = vec![FieldRelationship {
            if_field: "prior_treatment".to_string(),
            equals: "Yes".to_string(),
            then_require: vec!["past_therapy".to_string()],
        }];

        Self::new(fields, relationships)
    }
}
