//! Which account types may appear on each side of each transaction type.

use rusqlite::Connection;
use serde::Serialize;

use crate::{
    Error,
    account::{Account, AccountType, list_accounts},
    transaction::TransactionType,
};

/// The account types allowed on the source and destination sides of a transaction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applicability {
    /// Types allowed as the source of money.
    pub source: &'static [AccountType],
    /// Types allowed as the destination of money.
    pub destination: &'static [AccountType],
}

impl Applicability {
    /// Whether an account of `account_type` may be the source.
    pub fn allows_source(&self, account_type: AccountType) -> bool {
        self.source.contains(&account_type)
    }

    /// Whether an account of `account_type` may be the destination.
    pub fn allows_destination(&self, account_type: AccountType) -> bool {
        self.destination.contains(&account_type)
    }
}

const ASSET_OR_LIABILITY: &[AccountType] = &[AccountType::Asset, AccountType::Liability];

/// The applicability rules for `transaction_type`.
///
/// Transfers additionally need two different accounts, which is checked when the transaction is
/// validated.
pub fn applicability(transaction_type: TransactionType) -> Applicability {
    match transaction_type {
        TransactionType::Withdrawal => Applicability {
            source: ASSET_OR_LIABILITY,
            destination: &[AccountType::Expense],
        },
        TransactionType::Deposit => Applicability {
            source: &[AccountType::Income],
            destination: ASSET_OR_LIABILITY,
        },
        TransactionType::TransferBetweenAccounts => Applicability {
            source: ASSET_OR_LIABILITY,
            destination: ASSET_OR_LIABILITY,
        },
        TransactionType::Reconciliation => Applicability {
            source: &[AccountType::Reconciliation],
            destination: ASSET_OR_LIABILITY,
        },
        TransactionType::Adjustment => Applicability {
            source: &[AccountType::Adjustment],
            destination: &AccountType::ALL,
        },
    }
}

/// The live, unarchived accounts that may be picked for each side of a transaction type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicableAccounts {
    /// Accounts allowed as the source.
    pub source: Vec<Account>,
    /// Accounts allowed as the destination.
    pub destination: Vec<Account>,
}

/// Split the live, unarchived accounts by the side of `transaction_type` they may appear on.
pub fn get_applicable_accounts(
    transaction_type: TransactionType,
    connection: &Connection,
) -> Result<ApplicableAccounts, Error> {
    let rules = applicability(transaction_type);
    let accounts: Vec<Account> = list_accounts(false, connection)?
        .into_iter()
        .filter(|account| !account.is_archived())
        .collect();

    Ok(ApplicableAccounts {
        source: accounts
            .iter()
            .filter(|account| rules.allows_source(account.account_type))
            .cloned()
            .collect(),
        destination: accounts
            .into_iter()
            .filter(|account| rules.allows_destination(account.account_type))
            .collect(),
    })
}
