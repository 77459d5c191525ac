use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of fractional digits carried by every money value.
pub const MONEY_SCALE: u32 = 2;

/// Rounds to cents (midpoint away from zero) and pins the scale so that
/// serialized values always carry two fractional digits.
pub fn round_money(value: Decimal) -> Decimal {
    let mut v = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    v.rescale(MONEY_SCALE);
    if v.is_zero() {
        v.set_sign_positive(true);
    }
    v
}

/// One of the four sub-accounts a payment is split across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountKind {
    Spending,
    Savings,
    RothIra,
    Brokerage,
}

impl AccountKind {
    /// Fixed order used for redistribution and residual assignment.
    pub const ALL: [AccountKind; 4] = [
        AccountKind::Spending,
        AccountKind::Savings,
        AccountKind::RothIra,
        AccountKind::Brokerage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::Spending => "spending",
            AccountKind::Savings => "savings",
            AccountKind::RothIra => "rothIra",
            AccountKind::Brokerage => "brokerage",
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-child percentage split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Percentages {
    pub spending_percentage: i32,
    pub savings_percentage: i32,
    pub roth_ira_percentage: i32,
    pub brokerage_percentage: i32,
}

impl Percentages {
    pub const fn new(spending: i32, savings: i32, roth_ira: i32, brokerage: i32) -> Self {
        Self {
            spending_percentage: spending,
            savings_percentage: savings,
            roth_ira_percentage: roth_ira,
            brokerage_percentage: brokerage,
        }
    }

    pub fn get(&self, kind: AccountKind) -> i32 {
        match kind {
            AccountKind::Spending => self.spending_percentage,
            AccountKind::Savings => self.savings_percentage,
            AccountKind::RothIra => self.roth_ira_percentage,
            AccountKind::Brokerage => self.brokerage_percentage,
        }
    }

    pub fn set(&mut self, kind: AccountKind, value: i32) {
        match kind {
            AccountKind::Spending => self.spending_percentage = value,
            AccountKind::Savings => self.savings_percentage = value,
            AccountKind::RothIra => self.roth_ira_percentage = value,
            AccountKind::Brokerage => self.brokerage_percentage = value,
        }
    }

    pub fn total(&self) -> i32 {
        AccountKind::ALL.iter().map(|k| self.get(*k)).sum()
    }
}

/// Family-level toggles for which sub-accounts exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSet {
    pub spending_enabled: bool,
    pub savings_enabled: bool,
    pub roth_ira_enabled: bool,
    pub brokerage_enabled: bool,
}

impl AccountSet {
    pub const ALL_ENABLED: AccountSet = AccountSet {
        spending_enabled: true,
        savings_enabled: true,
        roth_ira_enabled: true,
        brokerage_enabled: true,
    };

    pub fn is_enabled(&self, kind: AccountKind) -> bool {
        match kind {
            AccountKind::Spending => self.spending_enabled,
            AccountKind::Savings => self.savings_enabled,
            AccountKind::RothIra => self.roth_ira_enabled,
            AccountKind::Brokerage => self.brokerage_enabled,
        }
    }

    /// Enabled accounts in fixed order.
    pub fn enabled(&self) -> Vec<AccountKind> {
        AccountKind::ALL
            .into_iter()
            .filter(|k| self.is_enabled(*k))
            .collect()
    }
}

/// Dollar amounts of one payment, per sub-account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    pub spending_amount: Decimal,
    pub savings_amount: Decimal,
    pub roth_ira_amount: Decimal,
    pub brokerage_amount: Decimal,
}

impl Split {
    pub fn new(spending: Decimal, savings: Decimal, roth_ira: Decimal, brokerage: Decimal) -> Self {
        Self {
            spending_amount: spending,
            savings_amount: savings,
            roth_ira_amount: roth_ira,
            brokerage_amount: brokerage,
        }
    }

    pub fn get(&self, kind: AccountKind) -> Decimal {
        match kind {
            AccountKind::Spending => self.spending_amount,
            AccountKind::Savings => self.savings_amount,
            AccountKind::RothIra => self.roth_ira_amount,
            AccountKind::Brokerage => self.brokerage_amount,
        }
    }

    pub fn get_mut(&mut self, kind: AccountKind) -> &mut Decimal {
        match kind {
            AccountKind::Spending => &mut self.spending_amount,
            AccountKind::Savings => &mut self.savings_amount,
            AccountKind::RothIra => &mut self.roth_ira_amount,
            AccountKind::Brokerage => &mut self.brokerage_amount,
        }
    }

    pub fn total(&self) -> Decimal {
        AccountKind::ALL.iter().map(|k| self.get(*k)).sum()
    }

    /// Per-account `self - other`.
    pub fn minus(&self, other: &Split) -> Split {
        let mut out = *self;
        for kind in AccountKind::ALL {
            *out.get_mut(kind) -= other.get(kind);
        }
        out
    }

    pub fn rounded(&self) -> Split {
        let mut out = *self;
        for kind in AccountKind::ALL {
            *out.get_mut(kind) = round_money(self.get(kind));
        }
        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! text_enum {
    ($name:ident, $label:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $label,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

text_enum!(JobStatus, "job status", {
    Assigned => "assigned",
    InProgress => "in_progress",
    Completed => "completed",
    Approved => "approved",
});

impl JobStatus {
    /// Position in the forward-only lifecycle.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Assigned => 0,
            JobStatus::InProgress => 1,
            JobStatus::Completed => 2,
            JobStatus::Approved => 3,
        }
    }

    pub fn can_move_to(&self, next: JobStatus) -> bool {
        next.rank() >= self.rank()
    }
}

text_enum!(Recurrence, "recurrence", {
    Once => "once",
    Daily => "daily",
    Weekly => "weekly",
    Monthly => "monthly",
});

text_enum!(LessonCategory, "lesson category", {
    Earning => "earning",
    Saving => "saving",
    Spending => "spending",
    Investing => "investing",
    Donating => "donating",
});

impl LessonCategory {
    pub const ALL: [LessonCategory; 5] = [
        LessonCategory::Earning,
        LessonCategory::Saving,
        LessonCategory::Spending,
        LessonCategory::Investing,
        LessonCategory::Donating,
    ];
}
