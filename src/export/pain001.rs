//! ISO 20022 pain.001.001.09 document model
//!
//! Only the elements this pipeline emits are modelled. Field names follow the
//! XML tags; `@` marks attributes and `$text` element content.

use serde::Serialize;

pub const PAIN001_NAMESPACE: &str = "urn:iso:std:iso:20022:tech:xsd:pain.001.001.09";

/// pain.001 Document
#[derive(Debug, Clone, Serialize)]
pub struct Pain001Document {
    #[serde(rename = "@xmlns")]
    pub xmlns: String,
    #[serde(rename = "CstmrCdtTrfInitn")]
    pub customer_credit_transfer_initiation: CustomerCreditTransferInitiation,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerCreditTransferInitiation {
    #[serde(rename = "GrpHdr")]
    pub group_header: GroupHeader,
    #[serde(rename = "PmtInf")]
    pub payment_information: Vec<PaymentInformation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupHeader {
    #[serde(rename = "MsgId")]
    pub message_id: String,
    #[serde(rename = "CreDtTm")]
    pub creation_date_time: String,
    #[serde(rename = "NbOfTxs")]
    pub number_of_transactions: String,
    #[serde(rename = "CtrlSum")]
    pub control_sum: String,
    #[serde(rename = "InitgPty")]
    pub initiating_party: PartyIdentification,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentInformation {
    #[serde(rename = "PmtInfId")]
    pub payment_information_id: String,
    #[serde(rename = "PmtMtd")]
    pub payment_method: String,
    #[serde(rename = "NbOfTxs")]
    pub number_of_transactions: String,
    #[serde(rename = "CtrlSum")]
    pub control_sum: String,
    #[serde(rename = "PmtTpInf")]
    pub payment_type_information: PaymentTypeInformation,
    #[serde(rename = "ReqdExctnDt")]
    pub requested_execution_date: DateChoice,
    #[serde(rename = "Dbtr")]
    pub debtor: PartyIdentification,
    #[serde(rename = "DbtrAcct")]
    pub debtor_account: CashAccount,
    #[serde(rename = "DbtrAgt")]
    pub debtor_agent: Agent,
    #[serde(rename = "CdtTrfTxInf")]
    pub credit_transfer_transactions: Vec<CreditTransferTransaction>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentTypeInformation {
    #[serde(rename = "SvcLvl")]
    pub service_level: ServiceLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceLevel {
    #[serde(rename = "Cd")]
    pub code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DateChoice {
    #[serde(rename = "Dt")]
    pub date: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartyIdentification {
    #[serde(rename = "Nm")]
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CashAccount {
    #[serde(rename = "Id")]
    pub id: AccountIdentification,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountIdentification {
    #[serde(rename = "IBAN")]
    pub iban: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Agent {
    #[serde(rename = "FinInstnId")]
    pub financial_institution_identification: FinancialInstitutionIdentification,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinancialInstitutionIdentification {
    #[serde(rename = "BICFI")]
    pub bic: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreditTransferTransaction {
    #[serde(rename = "PmtId")]
    pub payment_identification: PaymentIdentification,
    #[serde(rename = "Amt")]
    pub amount: AmountType,
    #[serde(rename = "CdtrAgt")]
    pub creditor_agent: Agent,
    #[serde(rename = "Cdtr")]
    pub creditor: PartyIdentification,
    #[serde(rename = "CdtrAcct")]
    pub creditor_account: CashAccount,
    #[serde(rename = "RmtInf", skip_serializing_if = "Option::is_none")]
    pub remittance_information: Option<RemittanceInformation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentIdentification {
    #[serde(rename = "EndToEndId")]
    pub end_to_end_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AmountType {
    #[serde(rename = "InstdAmt")]
    pub instructed_amount: CurrencyAndAmount,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrencyAndAmount {
    #[serde(rename = "@Ccy")]
    pub currency: String,
    #[serde(rename = "$text")]
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemittanceInformation {
    #[serde(rename = "Ustrd")]
    pub unstructured: String,
}
