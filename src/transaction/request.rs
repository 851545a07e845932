//! The requests accepted by the transaction service.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    account::AccountId, category::CategoryId, database_id::TransactionId, tag::TagId,
    transaction::TransactionType,
};

/// The data needed to create a transaction.
///
/// Either side may be left out when the transaction type has a default account for it, and
/// either amount may be left out, in which case it is converted from the other side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    /// The kind of movement.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Where the money came from.
    #[serde(default)]
    pub source_account_id: Option<AccountId>,
    /// How much left the source.
    #[serde(default)]
    pub source_amount: Option<Decimal>,
    /// The currency of `source_amount`, defaults to the source account's currency.
    #[serde(default)]
    pub source_currency: Option<String>,
    /// Where the money went.
    #[serde(default)]
    pub destination_account_id: Option<AccountId>,
    /// How much arrived at the destination.
    #[serde(default)]
    pub destination_amount: Option<Decimal>,
    /// The currency of `destination_amount`, defaults to the destination account's currency.
    #[serde(default)]
    pub destination_currency: Option<String>,
    /// A short description.
    #[serde(default)]
    pub title: String,
    /// Free form notes.
    #[serde(default)]
    pub notes: String,
    /// The category the transaction belongs to.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// The tags on the transaction.
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    /// When the money moved.
    #[serde(with = "time::serde::rfc3339")]
    pub transaction_date: OffsetDateTime,
    /// The hash of the statement row the transaction was imported from.
    #[serde(default)]
    pub import_id: Option<i64>,
    /// Whether the rule engine is bypassed.
    #[serde(default)]
    pub skip_rules: bool,
}

impl CreateTransactionRequest {
    /// A request with no accounts, amounts or metadata.
    pub fn new(transaction_type: TransactionType, transaction_date: OffsetDateTime) -> Self {
        Self {
            transaction_type,
            source_account_id: None,
            source_amount: None,
            source_currency: None,
            destination_account_id: None,
            destination_amount: None,
            destination_currency: None,
            title: String::new(),
            notes: String::new(),
            category_id: None,
            tag_ids: Vec::new(),
            transaction_date,
            import_id: None,
            skip_rules: false,
        }
    }

    /// Set the source account.
    pub fn source(mut self, account_id: AccountId) -> Self {
        self.source_account_id = Some(account_id);
        self
    }

    /// Set the amount leaving the source and its currency.
    pub fn source_amount(mut self, amount: Decimal, currency: &str) -> Self {
        self.source_amount = Some(amount);
        self.source_currency = Some(currency.to_owned());
        self
    }

    /// Set the destination account.
    pub fn destination(mut self, account_id: AccountId) -> Self {
        self.destination_account_id = Some(account_id);
        self
    }

    /// Set the amount arriving at the destination and its currency.
    pub fn destination_amount(mut self, amount: Decimal, currency: &str) -> Self {
        self.destination_amount = Some(amount);
        self.destination_currency = Some(currency.to_owned());
        self
    }

    /// Set the title.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_owned();
        self
    }

    /// Set the notes.
    pub fn notes(mut self, notes: &str) -> Self {
        self.notes = notes.to_owned();
        self
    }

    /// Set the category.
    pub fn category(mut self, category_id: CategoryId) -> Self {
        self.category_id = Some(category_id);
        self
    }

    /// Set the tags.
    pub fn tags(mut self, tag_ids: Vec<TagId>) -> Self {
        self.tag_ids = tag_ids;
        self
    }

    /// Set the statement row hash.
    pub fn import_id(mut self, import_id: i64) -> Self {
        self.import_id = Some(import_id);
        self
    }

    /// Bypass the rule engine.
    pub fn skip_rules(mut self) -> Self {
        self.skip_rules = true;
        self
    }
}

/// The data needed to update a transaction.
///
/// Every field replaces the stored value, except `transaction_date`, which is kept when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateTransactionRequest {
    /// The transaction to update.
    pub id: TransactionId,
    /// The `updated_at` the caller last saw. A mismatch is reported as a conflict.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expected_updated_at: Option<OffsetDateTime>,
    /// The kind of movement.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Where the money came from.
    #[serde(default)]
    pub source_account_id: Option<AccountId>,
    /// How much left the source.
    #[serde(default)]
    pub source_amount: Option<Decimal>,
    /// The currency of `source_amount`.
    #[serde(default)]
    pub source_currency: Option<String>,
    /// Where the money went.
    #[serde(default)]
    pub destination_account_id: Option<AccountId>,
    /// How much arrived at the destination.
    #[serde(default)]
    pub destination_amount: Option<Decimal>,
    /// The currency of `destination_amount`.
    #[serde(default)]
    pub destination_currency: Option<String>,
    /// A short description.
    #[serde(default)]
    pub title: String,
    /// Free form notes.
    #[serde(default)]
    pub notes: String,
    /// The category the transaction belongs to.
    #[serde(default)]
    pub category_id: Option<CategoryId>,
    /// The tags on the transaction.
    #[serde(default)]
    pub tag_ids: Vec<TagId>,
    /// When the money moved, unchanged when absent.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub transaction_date: Option<OffsetDateTime>,
    /// Whether the rule engine is bypassed.
    #[serde(default)]
    pub skip_rules: bool,
}

impl UpdateTransactionRequest {
    /// An update that replaces transaction `id` with the contents of `request`.
    pub fn replacing(id: TransactionId, request: CreateTransactionRequest) -> Self {
        Self {
            id,
            expected_updated_at: None,
            transaction_type: request.transaction_type,
            source_account_id: request.source_account_id,
            source_amount: request.source_amount,
            source_currency: request.source_currency,
            destination_account_id: request.destination_account_id,
            destination_amount: request.destination_amount,
            destination_currency: request.destination_currency,
            title: request.title,
            notes: request.notes,
            category_id: request.category_id,
            tag_ids: request.tag_ids,
            transaction_date: Some(request.transaction_date),
            skip_rules: request.skip_rules,
        }
    }

    /// The create request equivalent to this update, using `current_date` when no date is given.
    pub(crate) fn to_create_request(
        &self,
        current_date: OffsetDateTime,
        import_id: Option<i64>,
    ) -> CreateTransactionRequest {
        CreateTransactionRequest {
            transaction_type: self.transaction_type,
            source_account_id: self.source_account_id,
            source_amount: self.source_amount,
            source_currency: self.source_currency.clone(),
            destination_account_id: self.destination_account_id,
            destination_amount: self.destination_amount,
            destination_currency: self.destination_currency.clone(),
            title: self.title.clone(),
            notes: self.notes.clone(),
            category_id: self.category_id,
            tag_ids: self.tag_ids.clone(),
            transaction_date: self.transaction_date.unwrap_or(current_date),
            import_id,
            skip_rules: self.skip_rules,
        }
    }
}

#[cfg(test)]
mod request_tests {
    use time::macros::datetime;

    use crate::{test_utils::dec, transaction::TransactionType};

    use super::{CreateTransactionRequest, UpdateTransactionRequest};

    #[test]
    fn deserializes_with_defaults() {
        let request: CreateTransactionRequest = serde_json::from_str(
            r#"{"type": "withdrawal", "source_account_id": 4, "source_amount": "12.50",
                "transaction_date": "2025-04-01T10:00:00Z"}"#,
        )
        .unwrap();

        assert_eq!(request.transaction_type, TransactionType::Withdrawal);
        assert_eq!(request.source_amount, Some(dec("12.50")));
        assert_eq!(request.destination_account_id, None);
        assert!(request.tag_ids.is_empty());
        assert!(!request.skip_rules);
    }

    #[test]
    fn update_without_date_keeps_current_date() {
        let request = CreateTransactionRequest::new(
            TransactionType::Deposit,
            datetime!(2025-04-01 10:00 UTC),
        );
        let mut update = UpdateTransactionRequest::replacing(3, request);
        update.transaction_date = None;

        let converted = update.to_create_request(datetime!(2024-12-25 8:00 UTC), Some(9));

        assert_eq!(converted.transaction_date, datetime!(2024-12-25 8:00 UTC));
        assert_eq!(converted.import_id, Some(9));
    }
}
