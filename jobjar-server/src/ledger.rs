//! Payment allocation and balance bookkeeping.
//!
//! Everything here is pure arithmetic over [`Decimal`] values; the storage
//! layer calls into it inside its transactions so that every check runs
//! before the first write.

use jobjar_shared::domain::{AccountKind, AccountSet, Percentages, Split, round_money};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

/// Allowed gap between a custom split total and the job amount.
pub fn tolerance() -> Decimal {
    Decimal::new(1, 2)
}

/// Largest amount a single job may pay out (1,000,000.00).
pub fn max_job_amount() -> Decimal {
    Decimal::new(100_000_000, 2)
}

/// Allocation assigned to a new child when the family has no account types.
pub const NEW_CHILD_PERCENTAGES: Percentages = Percentages::new(25, 35, 20, 20);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("allocation total {total} must equal job amount {expected}")]
    AllocationMismatch { total: Decimal, expected: Decimal },

    #[error("{0} amount cannot be negative")]
    NegativeAmount(AccountKind),

    #[error("percentages must sum to 100, got {total}")]
    PercentageSum { total: i32 },

    #[error("{kind} percentage {value} is outside 0..=100")]
    PercentageRange { kind: AccountKind, value: i32 },

    #[error("{0} account is disabled and must be 0%")]
    DisabledAccount(AccountKind),

    #[error("at least one account type must be enabled")]
    NoAccountsEnabled,

    #[error("amount {0} is out of range")]
    OutOfRange(Decimal),
}

impl LedgerError {
    /// Machine readable code returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::AllocationMismatch { .. } | LedgerError::NegativeAmount(_) => {
                "INVALID_ALLOCATION"
            }
            LedgerError::PercentageSum { .. }
            | LedgerError::PercentageRange { .. }
            | LedgerError::DisabledAccount(_) => "INVALID_PERCENTAGES",
            LedgerError::NoAccountsEnabled => "NO_ACCOUNTS_ENABLED",
            LedgerError::OutOfRange(_) => "INVALID_AMOUNT",
        }
    }
}

/// Splits `amount` by percentage in whole cents.
///
/// Each share is floored to the cent and the cents left over go, one at a
/// time, to the accounts with the largest fractional remainders (ties in
/// fixed order). No share is negative and the split always totals `amount`.
/// When rounding every share to the nearest cent already adds up, the result
/// is the same as that rounding.
pub fn split_by_percentages(amount: Decimal, pct: &Percentages) -> Result<Split, LedgerError> {
    validate_percentages(pct, None)?;
    let amount = round_money(amount);
    let cents = amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|c| c.to_i64())
        .ok_or(LedgerError::OutOfRange(amount))?;

    let mut shares = [0i64; 4];
    let mut remainders = [0i64; 4];
    for (i, kind) in AccountKind::ALL.into_iter().enumerate() {
        let raw = cents
            .checked_mul(i64::from(pct.get(kind)))
            .ok_or(LedgerError::OutOfRange(amount))?;
        shares[i] = raw.div_euclid(100);
        remainders[i] = raw.rem_euclid(100);
    }

    // Stable sort keeps the fixed account order among equal remainders
    let mut order = [0usize, 1, 2, 3];
    order.sort_by(|a, b| remainders[*b].cmp(&remainders[*a]));
    let leftover = cents - shares.iter().sum::<i64>();
    for i in order.into_iter().take(leftover.max(0) as usize) {
        shares[i] += 1;
    }

    let mut split = Split::default();
    for (i, kind) in AccountKind::ALL.into_iter().enumerate() {
        *split.get_mut(kind) = round_money(Decimal::new(shares[i], 2));
    }
    Ok(split)
}

/// Checks a caller supplied split against the job amount and returns it
/// rounded to cents.
pub fn validate_custom_split(amount: Decimal, split: &Split) -> Result<Split, LedgerError> {
    for kind in AccountKind::ALL {
        if split.get(kind).is_sign_negative() && !split.get(kind).is_zero() {
            return Err(LedgerError::NegativeAmount(kind));
        }
    }
    let rounded = split.rounded();
    let total = checked_total(&rounded)?;
    if (total - amount).abs() > tolerance() {
        return Err(LedgerError::AllocationMismatch {
            total: round_money(total),
            expected: round_money(amount),
        });
    }
    Ok(rounded)
}

fn checked_total(split: &Split) -> Result<Decimal, LedgerError> {
    AccountKind::ALL.into_iter().try_fold(Decimal::ZERO, |acc, kind| {
        acc.checked_add(split.get(kind))
            .ok_or(LedgerError::OutOfRange(split.get(kind)))
    })
}

fn checked_money(value: Option<Decimal>, operand: Decimal) -> Result<Decimal, LedgerError> {
    value
        .map(round_money)
        .ok_or(LedgerError::OutOfRange(operand))
}

/// Equal percentages over the enabled accounts; the first enabled account
/// absorbs the remainder and disabled accounts get 0.
pub fn redistribute(accounts: &AccountSet) -> Result<Percentages, LedgerError> {
    let enabled = accounts.enabled();
    let Some(first) = enabled.first().copied() else {
        return Err(LedgerError::NoAccountsEnabled);
    };
    let count = enabled.len() as i32;
    let equal = 100 / count;
    let remainder = 100 - equal * count;
    let mut pct = Percentages::new(0, 0, 0, 0);
    for kind in enabled {
        pct.set(kind, equal);
    }
    pct.set(first, equal + remainder);
    Ok(pct)
}

pub fn ensure_any_enabled(accounts: &AccountSet) -> Result<(), LedgerError> {
    if accounts.enabled().is_empty() {
        Err(LedgerError::NoAccountsEnabled)
    } else {
        Ok(())
    }
}

/// Validates a manual allocation update.
///
/// With account types the enabled accounts must total 100 and disabled ones
/// must be 0; without them all four must total 100.
pub fn validate_percentages(
    pct: &Percentages,
    accounts: Option<&AccountSet>,
) -> Result<(), LedgerError> {
    for kind in AccountKind::ALL {
        let value = pct.get(kind);
        if !(0..=100).contains(&value) {
            return Err(LedgerError::PercentageRange { kind, value });
        }
    }
    let total = match accounts {
        Some(set) => {
            let mut total = 0;
            for kind in AccountKind::ALL {
                if set.is_enabled(kind) {
                    total += pct.get(kind);
                } else if pct.get(kind) != 0 {
                    return Err(LedgerError::DisabledAccount(kind));
                }
            }
            total
        }
        None => pct.total(),
    };
    if total != 100 {
        return Err(LedgerError::PercentageSum { total });
    }
    Ok(())
}

/// Running totals kept on a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balances {
    pub total_earned: Decimal,
    pub completed_jobs: i32,
    pub accounts: Split,
}

impl Balances {
    /// Applies an approved payment.
    pub fn credit(&mut self, amount: Decimal, split: &Split) -> Result<(), LedgerError> {
        let mut next = *self;
        next.total_earned = checked_money(self.total_earned.checked_add(amount), amount)?;
        next.completed_jobs = self.completed_jobs.saturating_add(1);
        next.shift(split)?;
        *self = next;
        Ok(())
    }

    /// Reverses a payment; the job counter never drops below zero.
    pub fn debit(&mut self, amount: Decimal, split: &Split) -> Result<(), LedgerError> {
        let mut next = *self;
        next.total_earned = checked_money(self.total_earned.checked_sub(amount), amount)?;
        next.completed_jobs = (self.completed_jobs - 1).max(0);
        for kind in AccountKind::ALL {
            let v = self.accounts.get(kind).checked_sub(split.get(kind));
            *next.accounts.get_mut(kind) = checked_money(v, split.get(kind))?;
        }
        *self = next;
        Ok(())
    }

    /// Adds per-account deltas without touching `total_earned`.
    pub fn shift(&mut self, delta: &Split) -> Result<(), LedgerError> {
        let mut accounts = self.accounts;
        for kind in AccountKind::ALL {
            let v = self.accounts.get(kind).checked_add(delta.get(kind));
            *accounts.get_mut(kind) = checked_money(v, delta.get(kind))?;
        }
        self.accounts = accounts;
        Ok(())
    }
}
