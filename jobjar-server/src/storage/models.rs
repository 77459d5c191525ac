use crate::ledger::Balances;
use crate::storage::schema::{
    account_types, achievements, allocation_settings, children, families, jobs, learning_progress,
    lessons, payments, quizzes, users,
};
use chrono::NaiveDateTime;
use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;
use jobjar_shared::domain::{AccountSet, Percentages, Split, round_money};
use rust_decimal::Decimal;

/// Decimal money stored as 2dp text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow)]
#[diesel(sql_type = Text)]
pub struct Money(pub Decimal);

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Money(round_money(value))
    }
}

impl ToSql<Text, Sqlite> for Money {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(round_money(self.0).to_string());
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Sqlite> for Money {
    fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let text = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
        let value = text.trim().parse::<Decimal>()?;
        Ok(Money(round_money(value)))
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = families)]
pub struct Family {
    pub id: i32,
    pub name: String,
}

#[derive(Insertable)]
#[diesel(table_name = families)]
pub struct NewFamily<'a> {
    pub name: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub password_hash: String,
    pub role: String,
    pub family_id: i32,
    pub name: String,
    pub age: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub password_hash: &'a str,
    pub role: &'a str,
    pub family_id: i32,
    pub name: &'a str,
    pub age: Option<i32>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = children)]
#[diesel(belongs_to(User, foreign_key = user_id))]
pub struct Child {
    pub id: i32,
    pub user_id: i32,
    pub family_id: i32,
    pub name: String,
    pub age: i32,
    pub total_earned: Money,
    pub completed_jobs: i32,
    pub learning_streak: i32,
    pub spending_balance: Money,
    pub savings_balance: Money,
    pub roth_ira_balance: Money,
    pub brokerage_balance: Money,
}

impl Child {
    pub fn balances(&self) -> Balances {
        Balances {
            total_earned: self.total_earned.0,
            completed_jobs: self.completed_jobs,
            accounts: Split::new(
                self.spending_balance.0,
                self.savings_balance.0,
                self.roth_ira_balance.0,
                self.brokerage_balance.0,
            ),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = children)]
pub struct NewChild<'a> {
    pub user_id: i32,
    pub family_id: i32,
    pub name: &'a str,
    pub age: i32,
}

/// Balance columns written back after a bookkeeping step.
#[derive(AsChangeset)]
#[diesel(table_name = children)]
pub struct BalanceChanges {
    pub total_earned: Money,
    pub completed_jobs: i32,
    pub spending_balance: Money,
    pub savings_balance: Money,
    pub roth_ira_balance: Money,
    pub brokerage_balance: Money,
}

impl From<&Balances> for BalanceChanges {
    fn from(b: &Balances) -> Self {
        Self {
            total_earned: b.total_earned.into(),
            completed_jobs: b.completed_jobs,
            spending_balance: b.accounts.spending_amount.into(),
            savings_balance: b.accounts.savings_amount.into(),
            roth_ira_balance: b.accounts.roth_ira_amount.into(),
            brokerage_balance: b.accounts.brokerage_amount.into(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = allocation_settings)]
#[diesel(belongs_to(Child, foreign_key = child_id))]
pub struct AllocationSettings {
    pub id: i32,
    pub child_id: i32,
    pub spending_percentage: i32,
    pub savings_percentage: i32,
    pub roth_ira_percentage: i32,
    pub brokerage_percentage: i32,
}

impl AllocationSettings {
    pub fn percentages(&self) -> Percentages {
        Percentages::new(
            self.spending_percentage,
            self.savings_percentage,
            self.roth_ira_percentage,
            self.brokerage_percentage,
        )
    }
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = allocation_settings)]
pub struct AllocationValues {
    pub child_id: i32,
    pub spending_percentage: i32,
    pub savings_percentage: i32,
    pub roth_ira_percentage: i32,
    pub brokerage_percentage: i32,
}

impl AllocationValues {
    pub fn new(child_id: i32, p: &Percentages) -> Self {
        Self {
            child_id,
            spending_percentage: p.spending_percentage,
            savings_percentage: p.savings_percentage,
            roth_ira_percentage: p.roth_ira_percentage,
            brokerage_percentage: p.brokerage_percentage,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = account_types)]
pub struct AccountTypes {
    pub id: i32,
    pub family_id: i32,
    pub spending_enabled: bool,
    pub savings_enabled: bool,
    pub roth_ira_enabled: bool,
    pub brokerage_enabled: bool,
}

impl AccountTypes {
    pub fn accounts(&self) -> AccountSet {
        AccountSet {
            spending_enabled: self.spending_enabled,
            savings_enabled: self.savings_enabled,
            roth_ira_enabled: self.roth_ira_enabled,
            brokerage_enabled: self.brokerage_enabled,
        }
    }
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = account_types)]
pub struct AccountTypeValues {
    pub family_id: i32,
    pub spending_enabled: bool,
    pub savings_enabled: bool,
    pub roth_ira_enabled: bool,
    pub brokerage_enabled: bool,
}

impl AccountTypeValues {
    pub fn new(family_id: i32, set: &AccountSet) -> Self {
        Self {
            family_id,
            spending_enabled: set.spending_enabled,
            savings_enabled: set.savings_enabled,
            roth_ira_enabled: set.roth_ira_enabled,
            brokerage_enabled: set.brokerage_enabled,
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = jobs)]
#[diesel(belongs_to(Child, foreign_key = assigned_to_id))]
pub struct Job {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub amount: Money,
    pub status: String,
    pub recurrence: String,
    pub assigned_to_id: i32,
    pub family_id: i32,
    pub icon: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob<'a> {
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub amount: Money,
    pub status: &'a str,
    pub recurrence: &'a str,
    pub assigned_to_id: i32,
    pub family_id: i32,
    pub icon: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = payments)]
#[diesel(belongs_to(Job, foreign_key = job_id))]
pub struct Payment {
    pub id: i32,
    pub job_id: i32,
    pub child_id: i32,
    pub amount: Money,
    pub spending_amount: Money,
    pub savings_amount: Money,
    pub roth_ira_amount: Money,
    pub brokerage_amount: Money,
    pub created_at: NaiveDateTime,
}

impl Payment {
    pub fn split(&self) -> Split {
        Split::new(
            self.spending_amount.0,
            self.savings_amount.0,
            self.roth_ira_amount.0,
            self.brokerage_amount.0,
        )
    }
}

#[derive(Insertable)]
#[diesel(table_name = payments)]
pub struct NewPayment {
    pub job_id: i32,
    pub child_id: i32,
    pub amount: Money,
    pub spending_amount: Money,
    pub savings_amount: Money,
    pub roth_ira_amount: Money,
    pub brokerage_amount: Money,
}

#[derive(AsChangeset)]
#[diesel(table_name = payments)]
pub struct SplitChanges {
    pub spending_amount: Money,
    pub savings_amount: Money,
    pub roth_ira_amount: Money,
    pub brokerage_amount: Money,
}

impl From<&Split> for SplitChanges {
    fn from(s: &Split) -> Self {
        Self {
            spending_amount: s.spending_amount.into(),
            savings_amount: s.savings_amount.into(),
            roth_ira_amount: s.roth_ira_amount.into(),
            brokerage_amount: s.brokerage_amount.into(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = lessons)]
pub struct Lesson {
    pub id: i32,
    pub category: String,
    pub title: String,
    pub content: String,
    pub video_url: Option<String>,
    pub is_custom: bool,
    pub family_id: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = lessons)]
pub struct NewLesson<'a> {
    pub category: &'a str,
    pub title: &'a str,
    pub content: &'a str,
    pub video_url: Option<&'a str>,
    pub is_custom: bool,
    pub family_id: Option<i32>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = quizzes)]
#[diesel(belongs_to(Lesson, foreign_key = lesson_id))]
pub struct Quiz {
    pub id: i32,
    pub lesson_id: i32,
    pub question: String,
    /// JSON array of answer strings.
    pub options: String,
    pub correct_answer: i32,
}

#[derive(Insertable)]
#[diesel(table_name = quizzes)]
pub struct NewQuiz<'a> {
    pub lesson_id: i32,
    pub question: &'a str,
    pub options: String,
    pub correct_answer: i32,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = learning_progress)]
pub struct LearningProgress {
    pub id: i32,
    pub child_id: i32,
    pub lesson_id: i32,
    pub completed: bool,
    pub quiz_score: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = learning_progress)]
pub struct NewLearningProgress {
    pub child_id: i32,
    pub lesson_id: i32,
    pub completed: bool,
    pub quiz_score: Option<i32>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = achievements)]
pub struct Achievement {
    pub id: i32,
    pub child_id: i32,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub earned_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = achievements)]
pub struct NewAchievement<'a> {
    pub child_id: i32,
    pub title: &'a str,
    pub description: &'a str,
    pub icon: &'a str,
}
