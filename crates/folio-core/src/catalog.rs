//! Document-type catalog: prompt instructions, chunk sizing and merge rules.
//!
//! The catalog is a plain value handed to the planner, the prompt builder and the
//! merge engine. A built-in table covers the loan documents we see in practice;
//! deployments can replace it with a JSON file (`FOLIO_CATALOG_FILE`).

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Kind of document being parsed. Selects prompt, chunk size and merge strategy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DocumentType {
    BankStatement,
    CreditReport,
    IncomeTaxReturn,
    Form16,
    SalarySlip,
    PanCard,
    AadhaarCard,
    /// Anything the catalog has no dedicated entry for.
    Other(String),
}

impl DocumentType {
    /// Canonical catalog key.
    pub fn as_str(&self) -> &str {
        match self {
            DocumentType::BankStatement => "bank_statement",
            DocumentType::CreditReport => "credit_report",
            DocumentType::IncomeTaxReturn => "itr",
            DocumentType::Form16 => "form16",
            DocumentType::SalarySlip => "salary_slip",
            DocumentType::PanCard => "pan_card",
            DocumentType::AadhaarCard => "aadhaar_card",
            DocumentType::Other(name) => name,
        }
    }
}

impl From<String> for DocumentType {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "bank_statement" | "bank-statement" => DocumentType::BankStatement,
            "credit_report" | "cibil_report" | "credit_bureau_report" => {
                DocumentType::CreditReport
            }
            "itr" | "income_tax_return" => DocumentType::IncomeTaxReturn,
            "form16" | "form_16" => DocumentType::Form16,
            "salary_slip" | "payslip" => DocumentType::SalarySlip,
            "pan" | "pan_card" => DocumentType::PanCard,
            "aadhaar" | "aadhaar_card" => DocumentType::AadhaarCard,
            other => DocumentType::Other(other.to_string()),
        }
    }
}

impl From<&str> for DocumentType {
    fn from(value: &str) -> Self {
        DocumentType::from(value.to_string())
    }
}

impl From<DocumentType> for String {
    fn from(value: DocumentType) -> Self {
        value.as_str().to_string()
    }
}

impl Default for DocumentType {
    fn default() -> Self {
        DocumentType::Other("unknown".to_string())
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rules for statements whose line items accumulate across pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerRules {
    /// Concatenated in chunk order.
    pub list_fields: Vec<String>,
    /// Overwritten by the newest non-empty value.
    pub latest_fields: Vec<String>,
    /// Kept from the first chunk that supplied them.
    pub first_fields: Vec<String>,
}

/// Rules for reports split into sections (bureau reports).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportRules {
    /// Usually only on the first page; never overwritten once set.
    pub primary_fields: Vec<String>,
    pub list_fields: Vec<String>,
    pub sum_fields: Vec<String>,
    /// High-water marks.
    pub max_fields: Vec<String>,
    /// Free text joined with `separator`.
    pub text_fields: Vec<String>,
    pub separator: String,
}

impl Default for ReportRules {
    fn default() -> Self {
        Self {
            primary_fields: Vec::new(),
            list_fields: Vec::new(),
            sum_fields: Vec::new(),
            max_fields: Vec::new(),
            text_fields: Vec::new(),
            separator: "\n".to_string(),
        }
    }
}

/// How a chunk's fields fold into the accumulated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeStrategy {
    Ledger(LedgerRules),
    Report(ReportRules),
    /// Fields appear once; first non-empty value wins.
    SingleStatement,
    /// Arrays concatenate, scalars keep the first non-empty value.
    Generic,
}

/// Everything the pipeline needs to know about one document type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentProfile {
    pub pages_per_chunk: u32,
    pub max_output_tokens: u32,
    pub merge: MergeStrategy,
    pub instructions: String,
}

/// Lookup table from document type to profile, with a default for unknown types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCatalog {
    pub default: DocumentProfile,
    #[serde(default)]
    pub profiles: HashMap<String, DocumentProfile>,
}

impl Default for DocumentCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DocumentCatalog {
    /// Load a catalog from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read catalog {:?}: {}", path, e)))?;
        let catalog: DocumentCatalog = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse catalog {:?}: {}", path, e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load from `path` when given, otherwise use the built-in table.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let catalog = Self::load(path)?;
                tracing::info!(
                    profiles = catalog.profiles.len(),
                    "Loaded document catalog from {:?}",
                    path
                );
                Ok(catalog)
            }
            None => Ok(Self::builtin()),
        }
    }

    /// Profile for a document type, falling back to the default.
    pub fn profile(&self, document_type: &DocumentType) -> &DocumentProfile {
        self.profiles
            .get(document_type.as_str())
            .unwrap_or(&self.default)
    }

    /// Reject profiles that would make chunking or extraction impossible.
    pub fn validate(&self) -> Result<()> {
        let entries = std::iter::once(("default", &self.default))
            .chain(self.profiles.iter().map(|(k, v)| (k.as_str(), v)));

        for (name, profile) in entries {
            if profile.pages_per_chunk == 0 {
                return Err(Error::Config(format!(
                    "profile '{}' has pagesPerChunk = 0",
                    name
                )));
            }
            if profile.max_output_tokens == 0 {
                return Err(Error::Config(format!(
                    "profile '{}' has maxOutputTokens = 0",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Built-in table for the loan-origination document set.
    pub fn builtin() -> Self {
        let mut profiles = HashMap::new();

        profiles.insert(
            DocumentType::BankStatement.as_str().to_string(),
            DocumentProfile {
                pages_per_chunk: 5,
                max_output_tokens: 16_384,
                merge: MergeStrategy::Ledger(LedgerRules {
                    list_fields: strings(&["transactions"]),
                    latest_fields: strings(&[
                        "closing_balance",
                        "average_monthly_balance",
                        "statement_period_to",
                    ]),
                    first_fields: strings(&["opening_balance", "statement_period_from"]),
                }),
                instructions: BANK_STATEMENT_INSTRUCTIONS.to_string(),
            },
        );

        profiles.insert(
            DocumentType::CreditReport.as_str().to_string(),
            DocumentProfile {
                pages_per_chunk: 4,
                max_output_tokens: 16_384,
                merge: MergeStrategy::Report(ReportRules {
                    primary_fields: strings(&["credit_score", "report_date", "name"]),
                    list_fields: strings(&["accounts", "enquiries"]),
                    sum_fields: strings(&[
                        "total_accounts",
                        "active_accounts",
                        "total_outstanding",
                        "overdue_amount",
                    ]),
                    max_fields: strings(&["max_days_past_due"]),
                    text_fields: strings(&["remarks"]),
                    separator: "\n".to_string(),
                }),
                instructions: CREDIT_REPORT_INSTRUCTIONS.to_string(),
            },
        );

        for (document_type, instructions) in [
            (DocumentType::IncomeTaxReturn, ITR_INSTRUCTIONS),
            (DocumentType::Form16, FORM16_INSTRUCTIONS),
            (DocumentType::SalarySlip, SALARY_SLIP_INSTRUCTIONS),
        ] {
            profiles.insert(
                document_type.as_str().to_string(),
                DocumentProfile {
                    pages_per_chunk: 8,
                    max_output_tokens: 8_192,
                    merge: MergeStrategy::SingleStatement,
                    instructions: instructions.to_string(),
                },
            );
        }

        for (document_type, instructions) in [
            (DocumentType::PanCard, PAN_INSTRUCTIONS),
            (DocumentType::AadhaarCard, AADHAAR_INSTRUCTIONS),
        ] {
            profiles.insert(
                document_type.as_str().to_string(),
                DocumentProfile {
                    pages_per_chunk: 2,
                    max_output_tokens: 2_048,
                    merge: MergeStrategy::SingleStatement,
                    instructions: instructions.to_string(),
                },
            );
        }

        Self {
            default: DocumentProfile {
                pages_per_chunk: 10,
                max_output_tokens: 8_192,
                merge: MergeStrategy::Generic,
                instructions: GENERIC_INSTRUCTIONS.to_string(),
            },
            profiles,
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

const BANK_STATEMENT_INSTRUCTIONS: &str = "Extract data from this bank statement. \
Fields: account_holder_name, account_number, bank_name, ifsc_code, statement_period_from, \
statement_period_to, opening_balance, closing_balance, average_monthly_balance, and \
transactions (array of {date, description, debit, credit, balance}). \
Amounts are plain numbers without currency symbols or thousands separators.";

const CREDIT_REPORT_INSTRUCTIONS: &str = "Extract data from this credit bureau report. \
Fields: name, report_date, credit_score, total_accounts, active_accounts, total_outstanding, \
overdue_amount, max_days_past_due, accounts (array of {lender, account_type, sanctioned_amount, \
current_balance, overdue, status, opened_on}), enquiries (array of {date, lender, purpose, amount}) \
and remarks (free text). Counts and amounts cover only the pages shown.";

const ITR_INSTRUCTIONS: &str = "Extract data from this income tax return. \
Fields: name, pan, assessment_year, gross_total_income, total_deductions, taxable_income, \
tax_paid, filing_date, acknowledgement_number.";

const FORM16_INSTRUCTIONS: &str = "Extract data from this Form 16. \
Fields: employee_name, employee_pan, employer_name, employer_tan, assessment_year, \
gross_salary, standard_deduction, taxable_income, tax_deducted.";

const SALARY_SLIP_INSTRUCTIONS: &str = "Extract data from this salary slip. \
Fields: employee_name, employer_name, pay_period, gross_earnings, total_deductions, net_pay, \
basic_salary.";

const PAN_INSTRUCTIONS: &str = "Extract data from this PAN card. \
Fields: name, father_name, date_of_birth, pan_number.";

const AADHAAR_INSTRUCTIONS: &str = "Extract data from this Aadhaar card. \
Fields: name, date_of_birth, gender, aadhaar_number (last four digits only), address.";

const GENERIC_INSTRUCTIONS: &str = "Extract all identifiable structured information \
from this document as key/value pairs. Use snake_case field names and arrays for repeated \
entries such as table rows.";
