//! Installation-parameter schema artifact.
//!
//! The spectrum-coordinator harness validates sensor installation parameters
//! against a JSON Schema document. This crate ships that document verbatim
//! and wraps a generic validator around it; nothing here interprets the
//! fields beyond what the schema itself states.

use serde_json::Value;

/// The installation-parameter schema document, verbatim.
pub const INSTALLATION_PARAM_SCHEMA: &str =
    include_str!("../schema/installation_param.schema.json");

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("embedded schema is not valid JSON: {0}")]
    MalformedDocument(#[from] serde_json::Error),

    #[error("embedded schema failed to compile: {0}")]
    InvalidSchema(String),

    #[error("document rejected: {0}")]
    Rejected(String),
}

/// Compiled validator for the installation-parameter schema.
///
/// Compile once, validate many: construction parses and compiles the embedded
/// document, each call to [`validate`](Self::validate) reuses the compiled
/// form.
pub struct InstallationParamValidator {
    validator: jsonschema::Validator,
}

impl InstallationParamValidator {
    /// Compiles the embedded schema document.
    pub fn new() -> Result<Self, SchemaError> {
        let schema: Value = serde_json::from_str(INSTALLATION_PARAM_SCHEMA)?;
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .build(&schema)
            .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
        Ok(Self { validator })
    }

    /// Validates a document, reporting the first violation.
    pub fn validate(&self, document: &Value) -> Result<(), SchemaError> {
        self.validator
            .validate(document)
            .map_err(|e| SchemaError::Rejected(e.to_string()))
    }

    /// True when the document conforms to the schema.
    pub fn is_valid(&self, document: &Value) -> bool {
        self.validator.is_valid(document)
    }
}

/// Parses and returns the schema document for callers that re-serve it.
pub fn schema_document() -> Result<Value, SchemaError> {
    Ok(serde_json::from_str(INSTALLATION_PARAM_SCHEMA)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> InstallationParamValidator {
        InstallationParamValidator::new().unwrap()
    }

    fn complete_document() -> Value {
        json!({
            "latitude": 37.425056,
            "longitude": -122.98026,
            "height": 9.3,
            "heightType": "AGL",
            "antennaGain": vec![0.0f64; 360],
        })
    }

    #[test]
    fn schema_document_is_well_formed_and_strict() {
        let doc = schema_document().unwrap();
        assert_eq!(doc["additionalProperties"], json!(false));
        assert_eq!(doc["properties"]["antennaGain"]["minItems"], json!(360));
        assert_eq!(doc["properties"]["antennaGain"]["maxItems"], json!(360));
    }

    #[test]
    fn accepts_a_complete_in_range_document() {
        let v = validator();
        assert!(v.validate(&complete_document()).is_ok());
    }

    #[test]
    fn accepts_boundary_values() {
        let v = validator();
        let mut doc = complete_document();
        doc["latitude"] = json!(90);
        doc["longitude"] = json!(-180);
        doc["heightType"] = json!("AMSL");
        doc["antennaGain"] = json!(
            std::iter::repeat(128.0)
                .take(180)
                .chain(std::iter::repeat(-127.0).take(180))
                .collect::<Vec<f64>>()
        );
        assert!(v.validate(&doc).is_ok());
    }

    #[test]
    fn rejects_359_gain_entries() {
        let v = validator();
        let mut doc = complete_document();
        doc["antennaGain"].as_array_mut().unwrap().pop();
        assert!(v.validate(&doc).is_err());
    }

    #[test]
    fn rejects_361_gain_entries() {
        let v = validator();
        let mut doc = complete_document();
        doc["antennaGain"].as_array_mut().unwrap().push(json!(0.0));
        assert!(v.validate(&doc).is_err());
    }

    #[test]
    fn rejects_gain_entries_outside_the_dbi_range() {
        let v = validator();
        let mut doc = complete_document();
        doc["antennaGain"].as_array_mut().unwrap()[42] = json!(128.5);
        assert!(v.validate(&doc).is_err());

        let mut doc = complete_document();
        doc["antennaGain"].as_array_mut().unwrap()[42] = json!(-127.5);
        assert!(v.validate(&doc).is_err());
    }

    #[test]
    fn rejects_non_numeric_gain_entries() {
        let v = validator();
        let mut doc = complete_document();
        doc["antennaGain"].as_array_mut().unwrap()[0] = json!("high");
        assert!(v.validate(&doc).is_err());
    }

    #[test]
    fn rejects_undeclared_fields() {
        let v = validator();
        let mut doc = complete_document();
        doc["cbsdCategory"] = json!("A");
        let err = v.validate(&doc).unwrap_err();
        assert!(matches!(err, SchemaError::Rejected(_)));
        assert!(!v.is_valid(&doc));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let v = validator();
        let mut doc = complete_document();
        doc["latitude"] = json!(90.1);
        assert!(v.validate(&doc).is_err());

        let mut doc = complete_document();
        doc["longitude"] = json!(-180.1);
        assert!(v.validate(&doc).is_err());
    }

    #[test]
    fn rejects_unknown_height_type() {
        let v = validator();
        let mut doc = complete_document();
        doc["heightType"] = json!("MSL");
        assert!(v.validate(&doc).is_err());
    }

    #[test]
    fn rejects_missing_required_fields() {
        let v = validator();
        for field in ["latitude", "longitude", "height", "heightType", "antennaGain"] {
            let mut doc = complete_document();
            doc.as_object_mut().unwrap().remove(field);
            assert!(v.validate(&doc).is_err(), "{field} should be required");
        }
    }
}
