//! PAIN.001 Export
//!
//! Turns executed payments into a pain.001.001.09 customer credit transfer
//! initiation. Payments are grouped into one payment-information block per
//! debit account and requested execution date.

pub mod pain001;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{PaymentError, PaymentRequest, PaymentStatus};
use crate::screening::normalize_text;
use pain001::*;

/// XML declaration written ahead of the document
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// ISO 20022 text fields are capped at 140 characters
const MAX_TEXT_LEN: usize = 140;

/// Message-level settings for generated documents
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub initiating_party_name: String,
    pub debtor_agent_bic: String,
    pub message_id_prefix: String,
    pub service_level: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            initiating_party_name: "Treasury Operations".to_string(),
            debtor_agent_bic: "NWBKGB2LXXX".to_string(),
            message_id_prefix: "TRSY".to_string(),
            service_level: "SEPA".to_string(),
        }
    }
}

/// A generated pain.001 message
#[derive(Debug, Clone, PartialEq)]
pub struct Pain001Export {
    pub message_id: String,
    pub created_at: DateTime<Utc>,
    pub number_of_transactions: usize,
    pub control_sum: Decimal,
    pub payment_ids: Vec<Uuid>,
    pub xml: String,
}

/// Builds pain.001 documents from executed payments.
#[derive(Debug, Clone, Default)]
pub struct ExportFormatter {
    config: ExportConfig,
}

impl ExportFormatter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    /// Format one or more executed payments into a single message.
    ///
    /// Any payment not in `Executed` refuses the whole batch.
    pub fn format(
        &self,
        payments: &[PaymentRequest],
        now: DateTime<Utc>,
    ) -> Result<Pain001Export, PaymentError> {
        if let Some(payment) = payments.iter().find(|p| p.status != PaymentStatus::Executed) {
            return Err(PaymentError::ExportNotAllowed {
                payment_id: payment.id,
                status: payment.status,
            });
        }
        if payments.is_empty() {
            return Err(PaymentError::validation(None, "payments", "nothing to export"));
        }

        let message_id = self.message_id(now);

        // Group by (debit account, execution date) in first-seen order
        let mut groups: Vec<((Uuid, NaiveDate), Vec<&PaymentRequest>)> = Vec::new();
        for payment in payments {
            let key = (payment.debit_account_id(), payment.instruction.value_date);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(payment),
                None => groups.push((key, vec![payment])),
            }
        }

        let payment_information: Vec<PaymentInformation> = groups
            .iter()
            .enumerate()
            .map(|(index, ((_, date), members))| {
                self.payment_information(&message_id, index + 1, *date, members)
            })
            .collect();

        let control_sum = minor_units(payments.iter().map(|p| p.amount()).sum());

        let document = Pain001Document {
            xmlns: PAIN001_NAMESPACE.to_string(),
            customer_credit_transfer_initiation: CustomerCreditTransferInitiation {
                group_header: GroupHeader {
                    message_id: message_id.clone(),
                    creation_date_time: now.format("%Y-%m-%dT%H:%M:%S").to_string(),
                    number_of_transactions: payments.len().to_string(),
                    control_sum: control_sum.to_string(),
                    initiating_party: PartyIdentification {
                        name: text(&self.config.initiating_party_name),
                    },
                },
                payment_information,
            },
        };

        let body = quick_xml::se::to_string_with_root("Document", &document).map_err(|e| {
            PaymentError::Storage(format!("PAIN.001 serialization failed: {e}"))
        })?;

        tracing::info!(
            message_id = %message_id,
            transactions = payments.len(),
            control_sum = %control_sum,
            "PAIN.001 message generated"
        );

        Ok(Pain001Export {
            message_id,
            created_at: now,
            number_of_transactions: payments.len(),
            control_sum,
            payment_ids: payments.iter().map(|p| p.id).collect(),
            xml: format!("{XML_DECLARATION}\n{body}"),
        })
    }

    fn payment_information(
        &self,
        message_id: &str,
        index: usize,
        date: NaiveDate,
        members: &[&PaymentRequest],
    ) -> PaymentInformation {
        let control_sum = minor_units(members.iter().map(|p| p.amount()).sum());
        let debtor_iban = members
            .first()
            .map(|p| p.instruction.debtor_iban.clone())
            .unwrap_or_default();

        PaymentInformation {
            payment_information_id: format!("{message_id}-{index}"),
            payment_method: "TRF".to_string(),
            number_of_transactions: members.len().to_string(),
            control_sum: control_sum.to_string(),
            payment_type_information: PaymentTypeInformation {
                service_level: ServiceLevel {
                    code: self.config.service_level.clone(),
                },
            },
            requested_execution_date: DateChoice {
                date: date.format("%Y-%m-%d").to_string(),
            },
            debtor: PartyIdentification {
                name: text(&self.config.initiating_party_name),
            },
            debtor_account: CashAccount {
                id: AccountIdentification { iban: debtor_iban },
            },
            debtor_agent: Agent {
                financial_institution_identification: FinancialInstitutionIdentification {
                    bic: self.config.debtor_agent_bic.clone(),
                },
            },
            credit_transfer_transactions: members.iter().map(|p| transaction(p)).collect(),
        }
    }

    /// `{prefix}-{yyyymmddHHMMSS}-{8 hex}`, within the 35 character limit
    fn message_id(&self, now: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string().to_uppercase();
        let id = format!(
            "{}-{}-{}",
            self.config.message_id_prefix,
            now.format("%Y%m%d%H%M%S"),
            &suffix[..8]
        );
        id.chars().take(35).collect()
    }
}

fn transaction(payment: &PaymentRequest) -> CreditTransferTransaction {
    let instruction = &payment.instruction;

    CreditTransferTransaction {
        payment_identification: PaymentIdentification {
            end_to_end_id: payment.end_to_end_id.clone(),
        },
        amount: AmountType {
            instructed_amount: CurrencyAndAmount {
                currency: instruction.currency.clone(),
                value: minor_units(instruction.amount).to_string(),
            },
        },
        creditor_agent: Agent {
            financial_institution_identification: FinancialInstitutionIdentification {
                bic: instruction.beneficiary_bic.clone(),
            },
        },
        creditor: PartyIdentification {
            name: text(&instruction.beneficiary_name),
        },
        creditor_account: CashAccount {
            id: AccountIdentification {
                iban: instruction.beneficiary_iban.clone(),
            },
        },
        remittance_information: instruction
            .remittance_info
            .as_deref()
            .map(text)
            .filter(|t| !t.is_empty())
            .map(|unstructured| RemittanceInformation { unstructured }),
    }
}

fn minor_units(value: Decimal) -> Decimal {
    let mut value = value;
    value.rescale(2);
    value
}

/// NFC-normalized and cut to the ISO 20022 text limit
fn text(value: &str) -> String {
    normalize_text(value).chars().take(MAX_TEXT_LEN).collect()
}
