use serde::{Deserialize, Serialize};

/// Request to commit an investment into a cooperative project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateInvestmentRequest {
    pub project_id: String,
    pub investor_id: String,
    /// Amount in minor currency units.
    pub amount_cents: i64,
    pub currency: String,
    pub note: Option<String>,
}

impl CreateInvestmentRequest {
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.project_id.trim().is_empty() {
            errors.push(ValidationError::new("project_id", "project_id cannot be empty"));
        }
        if self.investor_id.trim().is_empty() {
            errors.push(ValidationError::new("investor_id", "investor_id cannot be empty"));
        }
        if self.amount_cents <= 0 {
            errors.push(ValidationError::new("amount_cents", "amount must be positive"));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            errors.push(ValidationError::new(
                "currency",
                "currency must be a 3-letter ISO 4217 code",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

/// Joins validation errors into a single message.
pub fn describe_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateInvestmentRequest {
        CreateInvestmentRequest {
            project_id: "solar-farm-7".to_string(),
            investor_id: "member-12".to_string(),
            amount_cents: 250_000,
            currency: "KES".to_string(),
            note: None,
        }
    }

    #[test]
    fn test_create_investment_request_validation() {
        assert!(request().validate().is_ok());

        let mut invalid = request();
        invalid.amount_cents = 0;
        invalid.currency = "kes".to_string();
        let errors = invalid.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(
            describe_errors(&errors),
            "amount_cents: amount must be positive; currency: currency must be a 3-letter ISO 4217 code"
        );
    }

    #[test]
    fn test_blank_identifiers_rejected() {
        let mut invalid = request();
        invalid.project_id = "  ".to_string();
        invalid.investor_id = String::new();
        assert_eq!(invalid.validate().unwrap_err().len(), 2);
    }
}
