pub mod models;
pub mod schema;
mod seed;

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use jobjar_shared::auth::Role;
use jobjar_shared::domain::{
    AccountSet, JobStatus, LessonCategory, Percentages, Recurrence, Split, round_money,
};
use models::{
    AccountTypeValues, AccountTypes, Achievement, AllocationSettings, AllocationValues,
    BalanceChanges, Child, Job, LearningProgress, Lesson, Money, NewAchievement, NewChild,
    NewFamily, NewJob, NewLearningProgress, NewLesson, NewPayment, NewQuiz, NewUser, Payment,
    Quiz, SplitChanges, User,
};
use rust_decimal::Decimal;
pub use seed::{SeedChild, SeedConfig, SeedLesson, SeedParent, SeedQuiz};
use tracing::{debug, info, trace, warn};

use crate::ledger::{self, LedgerError};

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced row does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Bookkeeping validation failed; nothing was written.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A business rule rejected the request; nothing was written.
    #[error("{message}")]
    Rejected { code: &'static str, message: String },

    /// A stored value could not be interpreted.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StorageError {
    fn rejected(code: &'static str, message: impl Into<String>) -> Self {
        StorageError::Rejected {
            code,
            message: message.into(),
        }
    }
}

/// Input for [`Store::create_child`].
#[derive(Debug, Clone)]
pub struct NewChildInput {
    pub family_id: i32,
    pub name: String,
    pub age: i32,
    pub username: String,
    pub password_hash: String,
}

/// Input for [`Store::create_job`].
#[derive(Debug, Clone)]
pub struct NewJobInput {
    pub family_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub recurrence: Recurrence,
    pub assigned_to_id: i32,
    pub icon: Option<String>,
}

/// Changes applied by [`Store::patch_job`] in one transaction.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub recurrence: Option<Recurrence>,
    pub icon: Option<String>,
    pub status: Option<JobStatus>,
    pub custom_allocation: Option<Split>,
}

#[derive(AsChangeset)]
#[diesel(table_name = schema::jobs)]
struct JobChanges {
    title: Option<String>,
    description: Option<String>,
    amount: Option<Money>,
    recurrence: Option<String>,
    icon: Option<String>,
    status: Option<String>,
}

impl JobChanges {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.amount.is_none()
            && self.recurrence.is_none()
            && self.icon.is_none()
            && self.status.is_none()
    }
}

pub const DEFAULT_JOB_ICON: &str = "briefcase";

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            f(&mut conn)
        })
        .await?
    }

    /// Writes the configured family, users, children and lessons into an
    /// empty database. Does nothing once any family exists.
    pub async fn seed_from_config(&self, seed: &SeedConfig) -> Result<bool, StorageError> {
        use schema::{account_types, children, families, lessons, quizzes, users};

        let seed = seed.clone();
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                let existing: i64 = families::table.count().get_result(conn)?;
                if existing > 0 {
                    debug!(existing, "seed: database already initialized");
                    return Ok(false);
                }
                let family_id: i32 = diesel::insert_into(families::table)
                    .values(&NewFamily {
                        name: &seed.family_name,
                    })
                    .returning(families::id)
                    .get_result(conn)?;

                if let Some(set) = &seed.account_types {
                    ledger::ensure_any_enabled(set)?;
                    diesel::insert_into(account_types::table)
                        .values(&AccountTypeValues::new(family_id, set))
                        .execute(conn)?;
                }

                for p in &seed.parents {
                    diesel::insert_into(users::table)
                        .values(&NewUser {
                            username: &p.username,
                            password_hash: &p.password_hash,
                            role: Role::Parent.as_str(),
                            family_id,
                            name: &p.name,
                            age: None,
                        })
                        .execute(conn)?;
                }

                for c in &seed.children {
                    let pct = match &c.allocation {
                        Some(pct) => {
                            ledger::validate_percentages(pct, seed.account_types.as_ref())?;
                            *pct
                        }
                        None => default_percentages(seed.account_types.as_ref())?,
                    };
                    let user_id: i32 = diesel::insert_into(users::table)
                        .values(&NewUser {
                            username: &c.username,
                            password_hash: &c.password_hash,
                            role: Role::Child.as_str(),
                            family_id,
                            name: &c.name,
                            age: Some(c.age),
                        })
                        .returning(users::id)
                        .get_result(conn)?;
                    let child_id: i32 = diesel::insert_into(children::table)
                        .values(&NewChild {
                            user_id,
                            family_id,
                            name: &c.name,
                            age: c.age,
                        })
                        .returning(children::id)
                        .get_result(conn)?;
                    upsert_allocation(conn, child_id, &pct)?;
                }

                for l in &seed.lessons {
                    let lesson_id: i32 = diesel::insert_into(lessons::table)
                        .values(&NewLesson {
                            category: l.category.as_str(),
                            title: &l.title,
                            content: &l.content,
                            video_url: l.video_url.as_deref(),
                            is_custom: false,
                            family_id: None,
                        })
                        .returning(lessons::id)
                        .get_result(conn)?;
                    for q in &l.quizzes {
                        if q.correct_answer < 0 || q.correct_answer as usize >= q.options.len() {
                            return Err(StorageError::InvalidInput(format!(
                                "quiz '{}' correct_answer out of range",
                                q.question
                            )));
                        }
                        let options = serde_json::to_string(&q.options)
                            .map_err(|e| StorageError::InvalidInput(e.to_string()))?;
                        diesel::insert_into(quizzes::table)
                            .values(&NewQuiz {
                                lesson_id,
                                question: &q.question,
                                options,
                                correct_answer: q.correct_answer,
                            })
                            .execute(conn)?;
                    }
                }

                info!(
                    family_id,
                    parents = seed.parents.len(),
                    children = seed.children.len(),
                    lessons = seed.lessons.len(),
                    "seed: database initialized"
                );
                Ok(true)
            })
        })
        .await
    }

    // Users

    pub async fn find_user_by_username(&self, login: &str) -> Result<Option<User>, StorageError> {
        use schema::users::dsl::*;
        let login = login.to_string();
        self.with_conn(move |conn| {
            Ok(users
                .filter(username.eq(&login))
                .first::<User>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn get_user(&self, user_id: i32) -> Result<Option<User>, StorageError> {
        use schema::users::dsl::*;
        self.with_conn(move |conn| Ok(users.find(user_id).first::<User>(conn).optional()?))
            .await
    }

    // Children

    pub async fn list_children(&self, family: i32) -> Result<Vec<Child>, StorageError> {
        use schema::children::dsl::*;
        self.with_conn(move |conn| {
            Ok(children
                .filter(family_id.eq(family))
                .order(id.asc())
                .load::<Child>(conn)?)
        })
        .await
    }

    pub async fn get_child(&self, child: i32) -> Result<Option<Child>, StorageError> {
        use schema::children::dsl::*;
        self.with_conn(move |conn| Ok(children.find(child).first::<Child>(conn).optional()?))
            .await
    }

    pub async fn get_child_by_user(&self, user: i32) -> Result<Option<Child>, StorageError> {
        use schema::children::dsl::*;
        self.with_conn(move |conn| {
            Ok(children
                .filter(user_id.eq(user))
                .first::<Child>(conn)
                .optional()?)
        })
        .await
    }

    /// Creates the child profile, its login and its allocation settings.
    pub async fn create_child(&self, input: NewChildInput) -> Result<Child, StorageError> {
        use schema::{children, users};
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                let taken: i64 = users::table
                    .filter(users::username.eq(&input.username))
                    .count()
                    .get_result(conn)?;
                if taken > 0 {
                    return Err(StorageError::InvalidInput(format!(
                        "username already taken: {}",
                        input.username
                    )));
                }
                let pct = default_percentages(
                    family_account_set(conn, input.family_id)?.as_ref(),
                )?;
                let user_id: i32 = diesel::insert_into(users::table)
                    .values(&NewUser {
                        username: &input.username,
                        password_hash: &input.password_hash,
                        role: Role::Child.as_str(),
                        family_id: input.family_id,
                        name: &input.name,
                        age: Some(input.age),
                    })
                    .returning(users::id)
                    .get_result(conn)?;
                let child = diesel::insert_into(children::table)
                    .values(&NewChild {
                        user_id,
                        family_id: input.family_id,
                        name: &input.name,
                        age: input.age,
                    })
                    .returning(Child::as_returning())
                    .get_result(conn)?;
                upsert_allocation(conn, child.id, &pct)?;
                info!(child_id = child.id, family_id = child.family_id, ?pct, "child created");
                Ok(child)
            })
        })
        .await
    }

    pub async fn update_child(
        &self,
        child: i32,
        new_name: Option<String>,
        new_age: Option<i32>,
    ) -> Result<Child, StorageError> {
        use schema::children::dsl::*;
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                load_child(conn, child)?;
                if let Some(n) = &new_name {
                    diesel::update(children.find(child))
                        .set(name.eq(n))
                        .execute(conn)?;
                }
                if let Some(a) = new_age {
                    diesel::update(children.find(child))
                        .set(age.eq(a))
                        .execute(conn)?;
                }
                load_child(conn, child)
            })
        })
        .await
    }

    /// Removes a child together with everything that references it.
    pub async fn delete_child(&self, child: i32) -> Result<bool, StorageError> {
        use schema::{
            achievements, allocation_settings, children, jobs, learning_progress, payments, users,
        };
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                let Some(row) = children::table
                    .find(child)
                    .first::<Child>(conn)
                    .optional()?
                else {
                    return Ok(false);
                };
                let job_ids = jobs::table
                    .filter(jobs::assigned_to_id.eq(child))
                    .select(jobs::id);
                diesel::delete(payments::table.filter(payments::job_id.eq_any(job_ids)))
                    .execute(conn)?;
                diesel::delete(payments::table.filter(payments::child_id.eq(child)))
                    .execute(conn)?;
                diesel::delete(jobs::table.filter(jobs::assigned_to_id.eq(child))).execute(conn)?;
                diesel::delete(
                    allocation_settings::table.filter(allocation_settings::child_id.eq(child)),
                )
                .execute(conn)?;
                diesel::delete(
                    learning_progress::table.filter(learning_progress::child_id.eq(child)),
                )
                .execute(conn)?;
                diesel::delete(achievements::table.filter(achievements::child_id.eq(child)))
                    .execute(conn)?;
                diesel::delete(children::table.find(child)).execute(conn)?;
                diesel::delete(users::table.find(row.user_id)).execute(conn)?;
                info!(child_id = child, "child deleted");
                Ok(true)
            })
        })
        .await
    }

    // Jobs

    pub async fn list_jobs_for_family(&self, family: i32) -> Result<Vec<Job>, StorageError> {
        use schema::jobs::dsl::*;
        self.with_conn(move |conn| {
            Ok(jobs
                .filter(family_id.eq(family))
                .order((created_at.desc(), id.desc()))
                .load::<Job>(conn)?)
        })
        .await
    }

    pub async fn list_jobs_for_child(&self, child: i32) -> Result<Vec<Job>, StorageError> {
        use schema::jobs::dsl::*;
        self.with_conn(move |conn| {
            Ok(jobs
                .filter(assigned_to_id.eq(child))
                .order((created_at.desc(), id.desc()))
                .load::<Job>(conn)?)
        })
        .await
    }

    pub async fn get_job(&self, job: i32) -> Result<Option<Job>, StorageError> {
        use schema::jobs::dsl::*;
        self.with_conn(move |conn| Ok(jobs.find(job).first::<Job>(conn).optional()?))
            .await
    }

    pub async fn create_job(&self, input: NewJobInput) -> Result<Job, StorageError> {
        use schema::jobs;
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                let child = load_child(conn, input.assigned_to_id)?;
                if child.family_id != input.family_id {
                    return Err(StorageError::NotFound(format!(
                        "child {}",
                        input.assigned_to_id
                    )));
                }
                let amount = check_amount(input.amount)?;
                let job = diesel::insert_into(jobs::table)
                    .values(&NewJob {
                        title: &input.title,
                        description: input.description.as_deref(),
                        amount: amount.into(),
                        status: JobStatus::Assigned.as_str(),
                        recurrence: input.recurrence.as_str(),
                        assigned_to_id: input.assigned_to_id,
                        family_id: input.family_id,
                        icon: input.icon.as_deref().unwrap_or(DEFAULT_JOB_ICON),
                    })
                    .returning(Job::as_returning())
                    .get_result(conn)?;
                debug!(job_id = job.id, child_id = job.assigned_to_id, amount = %amount, "job created");
                Ok(job)
            })
        })
        .await
    }

    /// Applies field edits and a forward status move; moving to `approved`
    /// also creates the payment and credits the child's balances.
    ///
    /// Every check runs before the first write and the whole patch commits
    /// or rolls back together.
    pub async fn patch_job(
        &self,
        job_id: i32,
        patch: JobPatch,
    ) -> Result<(Job, Option<Payment>), StorageError> {
        use schema::{children, jobs, payments};
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                let job = load_job(conn, job_id)?;
                let current = job_status(&job)?;
                let next = patch.status.unwrap_or(current);
                let approving = next == JobStatus::Approved && current != JobStatus::Approved;

                if !current.can_move_to(next) {
                    return Err(StorageError::rejected(
                        "INVALID_STATUS_TRANSITION",
                        format!("cannot move job from {current} to {next}"),
                    ));
                }
                if patch.status == Some(JobStatus::Approved) && current == JobStatus::Approved {
                    return Err(StorageError::rejected(
                        "ALREADY_APPROVED",
                        format!("job {job_id} is already approved"),
                    ));
                }
                if patch.custom_allocation.is_some() && !approving {
                    return Err(StorageError::InvalidInput(
                        "customAllocation is only accepted when approving".into(),
                    ));
                }
                let amount = match patch.amount {
                    Some(_) if current == JobStatus::Approved => {
                        return Err(StorageError::rejected(
                            "ALREADY_APPROVED",
                            "amount of an approved job cannot change",
                        ));
                    }
                    Some(a) => check_amount(a)?,
                    None => job.amount.0,
                };

                // Work out the payment before anything is written
                let approval = if approving {
                    let existing: i64 = payments::table
                        .filter(payments::job_id.eq(job_id))
                        .count()
                        .get_result(conn)?;
                    if existing > 0 {
                        return Err(StorageError::rejected(
                            "ALREADY_APPROVED",
                            format!("job {job_id} already has a payment"),
                        ));
                    }
                    let split = match &patch.custom_allocation {
                        Some(custom) => ledger::validate_custom_split(amount, custom)?,
                        None => {
                            let settings = load_allocation(conn, job.assigned_to_id)?;
                            ledger::split_by_percentages(amount, &settings.percentages())?
                        }
                    };
                    let child = load_child(conn, job.assigned_to_id)?;
                    let mut balances = child.balances();
                    balances.credit(amount, &split)?;
                    Some((child, split, balances))
                } else {
                    None
                };

                let changes = JobChanges {
                    title: patch.title.clone(),
                    description: patch.description.clone(),
                    amount: patch.amount.map(|_| amount.into()),
                    recurrence: patch.recurrence.map(|r| r.as_str().to_string()),
                    icon: patch.icon.clone(),
                    status: (next != current).then(|| next.as_str().to_string()),
                };
                if !changes.is_empty() {
                    diesel::update(jobs::table.find(job_id))
                        .set(&changes)
                        .execute(conn)?;
                }

                let payment = match approval {
                    Some((child, split, balances)) => {
                        let payment = diesel::insert_into(payments::table)
                            .values(&NewPayment {
                                job_id,
                                child_id: child.id,
                                amount: amount.into(),
                                spending_amount: split.spending_amount.into(),
                                savings_amount: split.savings_amount.into(),
                                roth_ira_amount: split.roth_ira_amount.into(),
                                brokerage_amount: split.brokerage_amount.into(),
                            })
                            .returning(Payment::as_returning())
                            .get_result(conn)?;
                        diesel::update(children::table.find(child.id))
                            .set(&BalanceChanges::from(&balances))
                            .execute(conn)?;
                        info!(
                            job_id,
                            child_id = child.id,
                            amount = %amount,
                            custom = patch.custom_allocation.is_some(),
                            spending = %split.spending_amount,
                            savings = %split.savings_amount,
                            roth_ira = %split.roth_ira_amount,
                            brokerage = %split.brokerage_amount,
                            "job approved, payment recorded"
                        );
                        Some(payment)
                    }
                    None => None,
                };

                Ok((load_job(conn, job_id)?, payment))
            })
        })
        .await
    }

    /// Deletes a job; an approved job's payment is reversed out of the
    /// child's balances first.
    pub async fn delete_job(&self, job_id: i32) -> Result<bool, StorageError> {
        use schema::{children, jobs, payments};
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                let Some(job) = jobs::table.find(job_id).first::<Job>(conn).optional()? else {
                    return Ok(false);
                };
                if job_status(&job)? == JobStatus::Approved {
                    let payment = payments::table
                        .filter(payments::job_id.eq(job_id))
                        .first::<Payment>(conn)
                        .optional()?;
                    match payment {
                        Some(p) => {
                            let child = children::table
                                .find(p.child_id)
                                .first::<Child>(conn)
                                .optional()?;
                            match child {
                                Some(child) => {
                                    let mut balances = child.balances();
                                    balances.debit(p.amount.0, &p.split())?;
                                    diesel::update(children::table.find(child.id))
                                        .set(&BalanceChanges::from(&balances))
                                        .execute(conn)?;
                                    info!(
                                        job_id,
                                        child_id = child.id,
                                        amount = %p.amount.0,
                                        "payment reversed"
                                    );
                                }
                                None => warn!(
                                    job_id,
                                    child_id = p.child_id,
                                    "delete_job: payment child missing; skipping reversal"
                                ),
                            }
                        }
                        None => warn!(
                            job_id,
                            "delete_job: approved job has no payment; deleting without reversal"
                        ),
                    }
                }
                diesel::delete(payments::table.filter(payments::job_id.eq(job_id)))
                    .execute(conn)?;
                diesel::delete(jobs::table.find(job_id)).execute(conn)?;
                Ok(true)
            })
        })
        .await
    }

    // Payments

    pub async fn get_payment_for_job(&self, job: i32) -> Result<Option<Payment>, StorageError> {
        use schema::payments::dsl::*;
        self.with_conn(move |conn| {
            Ok(payments
                .filter(job_id.eq(job))
                .first::<Payment>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn list_payments_for_family(&self, family: i32) -> Result<Vec<Payment>, StorageError> {
        use schema::{jobs, payments};
        self.with_conn(move |conn| {
            Ok(payments::table
                .inner_join(jobs::table)
                .filter(jobs::family_id.eq(family))
                .order((payments::created_at.desc(), payments::id.desc()))
                .select(Payment::as_select())
                .load::<Payment>(conn)?)
        })
        .await
    }

    pub async fn list_payments_for_child(&self, child: i32) -> Result<Vec<Payment>, StorageError> {
        use schema::payments::dsl::*;
        self.with_conn(move |conn| {
            Ok(payments
                .filter(child_id.eq(child))
                .order((created_at.desc(), id.desc()))
                .load::<Payment>(conn)?)
        })
        .await
    }

    /// Rewrites a payment's split and moves the child's balances by the
    /// per-account difference. `total_earned` is left alone.
    pub async fn update_payment_split(
        &self,
        job_id: i32,
        split: Split,
    ) -> Result<Payment, StorageError> {
        use schema::{children, payments};
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                let job = load_job(conn, job_id)?;
                let payment = payments::table
                    .filter(payments::job_id.eq(job_id))
                    .first::<Payment>(conn)
                    .optional()?
                    .ok_or_else(|| StorageError::NotFound(format!("payment for job {job_id}")))?;
                let new_split = ledger::validate_custom_split(job.amount.0, &split)?;
                let old_split = payment.split();
                let delta = new_split.minus(&old_split);

                let child = load_child(conn, payment.child_id)?;
                let mut balances = child.balances();
                balances.shift(&delta)?;
                diesel::update(children::table.find(child.id))
                    .set(&BalanceChanges::from(&balances))
                    .execute(conn)?;
                diesel::update(payments::table.find(payment.id))
                    .set(&SplitChanges::from(&new_split))
                    .execute(conn)?;
                info!(
                    job_id,
                    payment_id = payment.id,
                    child_id = child.id,
                    spending_delta = %delta.spending_amount,
                    savings_delta = %delta.savings_amount,
                    roth_ira_delta = %delta.roth_ira_amount,
                    brokerage_delta = %delta.brokerage_amount,
                    "payment allocation edited"
                );
                Ok(payments::table.find(payment.id).first::<Payment>(conn)?)
            })
        })
        .await
    }

    // Account types & allocation

    pub async fn get_account_types(&self, family: i32) -> Result<Option<AccountTypes>, StorageError> {
        self.with_conn(move |conn| find_account_types(conn, family))
            .await
    }

    /// Returns the family's account types, creating an all-enabled row when
    /// none exists yet.
    ///
    /// All four accounts start enabled (not only spending and savings) so the
    /// new row agrees with allocations that already span all four accounts.
    pub async fn get_or_create_account_types(
        &self,
        family: i32,
    ) -> Result<AccountTypes, StorageError> {
        use schema::account_types;
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                if let Some(row) = find_account_types(conn, family)? {
                    return Ok(row);
                }
                let row = diesel::insert_into(account_types::table)
                    .values(&AccountTypeValues::new(family, &AccountSet::ALL_ENABLED))
                    .returning(AccountTypes::as_returning())
                    .get_result(conn)?;
                debug!(family_id = family, "account types created with defaults");
                Ok(row)
            })
        })
        .await
    }

    /// Stores new account toggles and resets every child's allocation to an
    /// equal split over the enabled accounts.
    pub async fn put_account_types(
        &self,
        family: i32,
        set: AccountSet,
    ) -> Result<AccountTypes, StorageError> {
        use schema::{account_types, children};
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                let pct = ledger::redistribute(&set)?;
                let child_ids: Vec<i32> = children::table
                    .filter(children::family_id.eq(family))
                    .select(children::id)
                    .load(conn)?;
                for cid in &child_ids {
                    upsert_allocation(conn, *cid, &pct)?;
                }
                let values = AccountTypeValues::new(family, &set);
                diesel::insert_into(account_types::table)
                    .values(&values)
                    .on_conflict(account_types::family_id)
                    .do_update()
                    .set(&values)
                    .execute(conn)?;
                info!(
                    family_id = family,
                    children = child_ids.len(),
                    ?pct,
                    "account types updated, allocations redistributed"
                );
                find_account_types(conn, family)?
                    .ok_or_else(|| StorageError::NotFound(format!("account types for family {family}")))
            })
        })
        .await
    }

    pub async fn get_allocation(
        &self,
        child: i32,
    ) -> Result<Option<AllocationSettings>, StorageError> {
        use schema::allocation_settings::dsl::*;
        self.with_conn(move |conn| {
            Ok(allocation_settings
                .filter(child_id.eq(child))
                .first::<AllocationSettings>(conn)
                .optional()?)
        })
        .await
    }

    /// Validates and stores a manual allocation. Families with account
    /// types use the enabled-accounts rule, others the four-way total.
    pub async fn update_allocation(
        &self,
        child: i32,
        pct: Percentages,
    ) -> Result<AllocationSettings, StorageError> {
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                let row = load_child(conn, child)?;
                let set = family_account_set(conn, row.family_id)?;
                ledger::validate_percentages(&pct, set.as_ref())?;
                let saved = upsert_allocation(conn, child, &pct)?;
                debug!(child_id = child, ?pct, "allocation updated");
                Ok(saved)
            })
        })
        .await
    }

    // Learning

    /// Built-in lessons plus the family's custom ones, optionally filtered
    /// by category.
    pub async fn list_lessons(
        &self,
        family: i32,
        category: Option<LessonCategory>,
    ) -> Result<Vec<Lesson>, StorageError> {
        use schema::lessons::dsl as l;
        self.with_conn(move |conn| {
            let mut query = l::lessons
                .filter(l::family_id.is_null().or(l::family_id.eq(family)))
                .into_boxed();
            if let Some(c) = category {
                query = query.filter(l::category.eq(c.as_str()));
            }
            Ok(query.order(l::id.asc()).load::<Lesson>(conn)?)
        })
        .await
    }

    pub async fn get_lesson(&self, lesson: i32) -> Result<Option<Lesson>, StorageError> {
        use schema::lessons::dsl::*;
        self.with_conn(move |conn| Ok(lessons.find(lesson).first::<Lesson>(conn).optional()?))
            .await
    }

    pub async fn create_lesson(
        &self,
        family: i32,
        category: LessonCategory,
        title: String,
        content: String,
        video_url: Option<String>,
    ) -> Result<Lesson, StorageError> {
        use schema::lessons;
        self.with_conn(move |conn| {
            Ok(diesel::insert_into(lessons::table)
                .values(&NewLesson {
                    category: category.as_str(),
                    title: &title,
                    content: &content,
                    video_url: video_url.as_deref(),
                    is_custom: true,
                    family_id: Some(family),
                })
                .returning(Lesson::as_returning())
                .get_result(conn)?)
        })
        .await
    }

    pub async fn list_quizzes(&self, lesson: i32) -> Result<Vec<Quiz>, StorageError> {
        use schema::quizzes::dsl::*;
        self.with_conn(move |conn| {
            Ok(quizzes
                .filter(lesson_id.eq(lesson))
                .order(id.asc())
                .load::<Quiz>(conn)?)
        })
        .await
    }

    /// Marks a lesson completed for a child. The first completion of a
    /// lesson bumps the child's learning streak.
    pub async fn record_lesson_completion(
        &self,
        child: i32,
        lesson: i32,
        score: Option<i32>,
    ) -> Result<LearningProgress, StorageError> {
        use schema::{children, learning_progress as lp};
        self.with_conn(move |conn| {
            conn.immediate_transaction::<_, StorageError, _>(|conn| {
                let row = load_child(conn, child)?;
                let existing = lp::table
                    .filter(lp::child_id.eq(child))
                    .filter(lp::lesson_id.eq(lesson))
                    .first::<LearningProgress>(conn)
                    .optional()?;
                let first_completion = match &existing {
                    Some(p) => {
                        diesel::update(lp::table.find(p.id))
                            .set((
                                lp::completed.eq(true),
                                lp::quiz_score.eq(score.or(p.quiz_score)),
                            ))
                            .execute(conn)?;
                        !p.completed
                    }
                    None => {
                        diesel::insert_into(lp::table)
                            .values(&NewLearningProgress {
                                child_id: child,
                                lesson_id: lesson,
                                completed: true,
                                quiz_score: score,
                            })
                            .execute(conn)?;
                        true
                    }
                };
                if first_completion {
                    diesel::update(children::table.find(child))
                        .set(children::learning_streak.eq(row.learning_streak + 1))
                        .execute(conn)?;
                }
                trace!(child_id = child, lesson_id = lesson, first_completion, "lesson completed");
                Ok(lp::table
                    .filter(lp::child_id.eq(child))
                    .filter(lp::lesson_id.eq(lesson))
                    .first::<LearningProgress>(conn)?)
            })
        })
        .await
    }

    pub async fn list_learning_progress(
        &self,
        child: i32,
    ) -> Result<Vec<LearningProgress>, StorageError> {
        use schema::learning_progress::dsl::*;
        self.with_conn(move |conn| {
            Ok(learning_progress
                .filter(child_id.eq(child))
                .order(id.asc())
                .load::<LearningProgress>(conn)?)
        })
        .await
    }

    pub async fn list_achievements(&self, child: i32) -> Result<Vec<Achievement>, StorageError> {
        use schema::achievements::dsl::*;
        self.with_conn(move |conn| {
            Ok(achievements
                .filter(child_id.eq(child))
                .order((earned_at.desc(), id.desc()))
                .load::<Achievement>(conn)?)
        })
        .await
    }

    pub async fn create_achievement(
        &self,
        child: i32,
        title: String,
        description: String,
        icon: String,
    ) -> Result<Achievement, StorageError> {
        use schema::achievements;
        self.with_conn(move |conn| {
            load_child(conn, child)?;
            Ok(diesel::insert_into(achievements::table)
                .values(&NewAchievement {
                    child_id: child,
                    title: &title,
                    description: &description,
                    icon: &icon,
                })
                .returning(Achievement::as_returning())
                .get_result(conn)?)
        })
        .await
    }
}

fn load_child(conn: &mut SqliteConnection, child: i32) -> Result<Child, StorageError> {
    use schema::children::dsl::*;
    children
        .find(child)
        .first::<Child>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("child {child}")))
}

fn load_job(conn: &mut SqliteConnection, job: i32) -> Result<Job, StorageError> {
    use schema::jobs::dsl::*;
    jobs.find(job)
        .first::<Job>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("job {job}")))
}

fn load_allocation(
    conn: &mut SqliteConnection,
    child: i32,
) -> Result<AllocationSettings, StorageError> {
    use schema::allocation_settings::dsl::*;
    allocation_settings
        .filter(child_id.eq(child))
        .first::<AllocationSettings>(conn)
        .optional()?
        .ok_or_else(|| StorageError::NotFound(format!("allocation settings for child {child}")))
}

fn find_account_types(
    conn: &mut SqliteConnection,
    family: i32,
) -> Result<Option<AccountTypes>, StorageError> {
    use schema::account_types::dsl::*;
    Ok(account_types
        .filter(family_id.eq(family))
        .first::<AccountTypes>(conn)
        .optional()?)
}

fn family_account_set(
    conn: &mut SqliteConnection,
    family: i32,
) -> Result<Option<AccountSet>, StorageError> {
    Ok(find_account_types(conn, family)?.map(|row| row.accounts()))
}

/// Starting allocation for a new child.
fn default_percentages(set: Option<&AccountSet>) -> Result<Percentages, LedgerError> {
    match set {
        Some(set) => ledger::redistribute(set),
        None => Ok(ledger::NEW_CHILD_PERCENTAGES),
    }
}

fn upsert_allocation(
    conn: &mut SqliteConnection,
    child: i32,
    pct: &Percentages,
) -> Result<AllocationSettings, StorageError> {
    use schema::allocation_settings::dsl::*;
    let values = AllocationValues::new(child, pct);
    diesel::insert_into(allocation_settings)
        .values(&values)
        .on_conflict(child_id)
        .do_update()
        .set(&values)
        .execute(conn)?;
    Ok(allocation_settings
        .filter(child_id.eq(child))
        .first::<AllocationSettings>(conn)?)
}

fn job_status(job: &Job) -> Result<JobStatus, StorageError> {
    job.status
        .parse::<JobStatus>()
        .map_err(|e| StorageError::Corrupt(format!("job {}: {e}", job.id)))
}

/// Job amounts are rounded to cents and must lie in `(0, max_job_amount]`.
fn check_amount(amount: Decimal) -> Result<Decimal, StorageError> {
    if amount > ledger::max_job_amount() {
        return Err(StorageError::rejected(
            "INVALID_AMOUNT",
            format!("job amount cannot exceed {}", ledger::max_job_amount()),
        ));
    }
    let amount = round_money(amount);
    if amount <= Decimal::ZERO {
        return Err(StorageError::rejected(
            "INVALID_AMOUNT",
            format!("job amount must be positive, got {amount}"),
        ));
    }
    Ok(amount)
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}
