//! Accounts and the rules for which accounts a transaction may use.

mod applicability;
mod core;
mod endpoints;

pub use applicability::{ApplicableAccounts, Applicability, applicability, get_applicable_accounts};
pub use core::{
    ARCHIVED_FLAG, Account, AccountId, AccountType, AccountUpdate, DefaultAccount, NewAccount,
    create_account, create_account_table, create_accounts_bulk, delete_account, get_account,
    get_default_account, list_accounts, map_account_row, reorder_accounts, seed_default_accounts,
    update_account,
};
pub use endpoints::{
    create_account_endpoint, create_accounts_bulk_endpoint, delete_account_endpoint,
    get_applicable_accounts_endpoint, list_accounts_endpoint, reorder_accounts_endpoint,
    update_account_endpoint,
};
