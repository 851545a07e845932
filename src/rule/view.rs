use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    account::AccountId,
    category::CategoryId,
    tag::TagId,
    transaction::{PostingDraft, Transaction, TransactionType},
};

/// The parts of a transaction a rule script can see.
///
/// Only `title`, `notes`, `category_id` and `tag_ids` can be changed by scripts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionView {
    /// The kind of movement.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Where the money came from.
    pub source_account_id: Option<AccountId>,
    /// How much left the source.
    pub source_amount: Option<Decimal>,
    /// The currency of the source.
    pub source_currency: Option<String>,
    /// Where the money went.
    pub destination_account_id: Option<AccountId>,
    /// How much arrived at the destination.
    pub destination_amount: Option<Decimal>,
    /// The currency of the destination.
    pub destination_currency: Option<String>,
    /// A short description.
    pub title: String,
    /// Free form notes.
    pub notes: String,
    /// The category of the transaction.
    pub category_id: Option<CategoryId>,
    /// The tags on the transaction in ascending order.
    pub tag_ids: Vec<TagId>,
    /// When the money moved.
    #[serde(with = "time::serde::rfc3339")]
    pub transaction_date: OffsetDateTime,
}

impl From<&PostingDraft> for TransactionView {
    fn from(draft: &PostingDraft) -> Self {
        Self {
            transaction_type: draft.transaction_type,
            source_account_id: Some(draft.source.account.id),
            source_amount: Some(draft.source.amount),
            source_currency: Some(draft.source.currency.id.clone()),
            destination_account_id: Some(draft.destination.account.id),
            destination_amount: Some(draft.destination.amount),
            destination_currency: Some(draft.destination.currency.id.clone()),
            title: draft.title.clone(),
            notes: draft.notes.clone(),
            category_id: draft.category_id,
            tag_ids: draft.tag_ids.clone(),
            transaction_date: draft.transaction_date,
        }
    }
}

impl From<&Transaction> for TransactionView {
    fn from(transaction: &Transaction) -> Self {
        Self {
            transaction_type: transaction.transaction_type,
            source_account_id: transaction.source_account_id,
            source_amount: transaction.source_amount,
            source_currency: transaction.source_currency.clone(),
            destination_account_id: transaction.destination_account_id,
            destination_amount: transaction.destination_amount,
            destination_currency: transaction.destination_currency.clone(),
            title: transaction.title.clone(),
            notes: transaction.notes.clone(),
            category_id: transaction.category_id,
            tag_ids: transaction.tag_ids.clone(),
            transaction_date: transaction.transaction_date,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_view() -> TransactionView {
    use time::macros::datetime;

    TransactionView {
        transaction_type: TransactionType::Withdrawal,
        source_account_id: Some(4),
        source_amount: Some(Decimal::new(1599, 2)),
        source_currency: Some("USD".to_owned()),
        destination_account_id: Some(1),
        destination_amount: Some(Decimal::new(1599, 2)),
        destination_currency: Some("USD".to_owned()),
        title: "Netflix April".to_owned(),
        notes: String::new(),
        category_id: None,
        tag_ids: vec![3],
        transaction_date: datetime!(2025-04-02 08:30 UTC),
    }
}
