//! Transactions and their double-entry projection.
//!
//! This module contains everything related to transactions:
//! - The [Transaction] model and its table
//! - The ledger rows written alongside every transaction
//! - The service that validates, runs rules and writes transactions atomically
//! - Listing, searching and title suggestions
//! - The JSON handlers

mod core;
mod double_entry;
mod endpoints;
mod query;
mod request;
mod service;
mod validate;

pub use core::{
    TRANSACTION_COLUMNS, Transaction, TransactionType, create_transaction_table, get_transaction,
    import_id_exists, map_transaction_row,
};
pub use double_entry::{
    DoubleEntry, NewDoubleEntry, build_entry_pair, create_double_entry_table,
    delete_double_entries, get_double_entries, insert_double_entries, tombstone_double_entries,
};
pub use endpoints::{
    create_transaction_endpoint, create_transactions_bulk_endpoint, delete_transactions_endpoint,
    get_title_suggestions_endpoint, get_transaction_endpoint, list_transactions_endpoint,
    update_transaction_endpoint,
};
pub use query::{
    DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, TransactionFilter, TransactionPage, get_title_suggestions,
    list_transactions,
};
pub use request::{CreateTransactionRequest, UpdateTransactionRequest};
pub use service::{
    PostingContext, create_transaction, create_transactions_bulk, delete_transactions,
    post_transaction, update_transaction,
};
pub use validate::{PostingDraft, ResolvedSide, compute_base_amounts};

#[cfg(test)]
pub use core::count_transactions;
