//! The background task that creates scheduled transactions and runs the nightly jobs.

use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Duration, MissedTickBehavior, interval},
};

use crate::{
    Config, Database, Error, ErrorContext, RuleEngine,
    auth::purge_expired_revocations,
    clock::now_utc,
    currency::sync_rates,
    db::with_write_transaction,
    maintenance::fix_daily_gaps,
    schedule::{
        CronSchedule, ScheduleRule, advance_schedule_rule, get_due_schedule_rules,
    },
    transaction::{PostingContext, Transaction, post_transaction},
};

/// When the exchange rates are synced.
pub const RATE_SYNC_SCHEDULE: &str = "20 0 * * *";

/// When missing balance snapshots are filled and expired revocations are purged.
pub const DAILY_GAP_SCHEDULE: &str = "30 0 * * *";

const TICK: Duration = Duration::from_secs(60);
const COMMAND_BUFFER: usize = 16;

/// The result of one pass over the due schedule rules.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleRunSummary {
    /// Rules that created a transaction.
    pub created: usize,
    /// Rules that were advanced by another run before this one got to them.
    pub skipped: usize,
    /// Rules whose transaction could not be created. They stay due.
    pub failed: usize,
}

/// Create the transactions of every schedule rule due at `context.now`.
///
/// Each rule runs in its own savepoint: the rule is first moved to its next tick, guarded by
/// its current `next_execute_at`, and then its template is posted. If posting fails the savepoint
/// is rolled back so the rule stays due and is retried on the next pass.
///
/// # Errors
/// Returns an error if the due rules could not be read or a savepoint could not be managed.
/// Errors from individual rules are logged and counted in [ScheduleRunSummary::failed].
pub fn process_due_schedule_rules(
    context: PostingContext,
    connection: &mut Connection,
) -> Result<ScheduleRunSummary, Error> {
    let summary = with_write_transaction(connection, |transaction| {
        let mut summary = ScheduleRunSummary::default();

        for rule in get_due_schedule_rules(context.now, transaction)? {
            transaction.execute_batch("SAVEPOINT schedule_rule")?;

            match run_schedule_rule(&rule, context, transaction) {
                Ok(Some(created)) => {
                    transaction.execute_batch("RELEASE schedule_rule")?;
                    tracing::info!(
                        "Schedule rule {} \"{}\" created transaction {}",
                        rule.id,
                        rule.title,
                        created.id
                    );
                    summary.created += 1;
                }
                Ok(None) => {
                    transaction.execute_batch("RELEASE schedule_rule")?;
                    summary.skipped += 1;
                }
                Err(error) => {
                    transaction
                        .execute_batch("ROLLBACK TO schedule_rule; RELEASE schedule_rule")?;
                    tracing::error!(
                        "Schedule rule {} \"{}\" failed: {error}",
                        rule.id,
                        rule.title
                    );
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    })
    .context("failed to run schedule rules")?;

    if summary != ScheduleRunSummary::default() {
        tracing::info!(
            "Processed schedule rules: {} created, {} skipped, {} failed",
            summary.created,
            summary.skipped,
            summary.failed
        );
    }

    Ok(summary)
}

fn run_schedule_rule(
    rule: &ScheduleRule,
    context: PostingContext,
    connection: &Connection,
) -> Result<Option<Transaction>, Error> {
    let schedule = CronSchedule::parse(&rule.cron_expression)?;
    let next_execute_at = schedule.next_after(context.now).ok_or_else(|| {
        Error::InvalidArgument(format!(
            "cron expression \"{}\" never fires again",
            rule.cron_expression
        ))
    })?;

    let advanced = advance_schedule_rule(
        rule.id,
        rule.next_execute_at,
        next_execute_at,
        context.now,
        connection,
    )?;

    if !advanced {
        tracing::debug!("Schedule rule {} was already advanced", rule.id);
        return Ok(None);
    }

    let request = rule.template.materialize(context.now.date(), context.now);

    post_transaction(&request, context, connection).map(Some)
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Requests that other parts of the application can send to the [Scheduler].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// Process the due schedule rules now.
    RunScheduleRules,
    /// Sync the exchange rates now.
    SyncRates,
    /// Fill missing balance snapshots now.
    FixDailyGaps,
    /// Stop the scheduler.
    Shutdown,
}

/// A cloneable sender for [SchedulerCommand]s.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    /// Queue a command for the scheduler.
    ///
    /// # Errors
    /// Returns [Error::InvalidArgument] if the scheduler has stopped.
    pub async fn send(&self, command: SchedulerCommand) -> Result<(), Error> {
        self.sender.send(command).await.map_err(|error| {
            Error::InvalidArgument(format!("the scheduler is not running: {error}"))
        })
    }
}

/// Fires schedule rules every minute and runs the nightly system jobs.
#[derive(Debug)]
pub struct Scheduler {
    database: Database,
    config: Arc<Config>,
    rules: Arc<RuleEngine>,
    http_client: reqwest::Client,
    receiver: mpsc::Receiver<SchedulerCommand>,
    rate_sync: CronSchedule,
    daily_gaps: CronSchedule,
}

impl Scheduler {
    /// Create a scheduler and the handle used to talk to it.
    ///
    /// # Errors
    /// Returns an error if one of the system job schedules fails to parse.
    pub fn new(
        database: Database,
        config: Arc<Config>,
        rules: Arc<RuleEngine>,
        http_client: reqwest::Client,
    ) -> Result<(Self, SchedulerHandle), Error> {
        let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);

        let scheduler = Self {
            database,
            config,
            rules,
            http_client,
            receiver,
            rate_sync: CronSchedule::parse(RATE_SYNC_SCHEDULE)?,
            daily_gaps: CronSchedule::parse(DAILY_GAP_SCHEDULE)?,
        };

        Ok((scheduler, SchedulerHandle { sender }))
    }

    /// Run the scheduler on the tokio runtime until it receives [SchedulerCommand::Shutdown] or
    /// every handle is dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// The scheduler loop.
    pub async fn run(mut self) {
        tracing::info!("Scheduler started");

        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let started_at = now_utc();
        let mut next_rate_sync = self.rate_sync.next_after(started_at);
        let mut next_gap_fill = self.daily_gaps.next_after(started_at);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = now_utc();
                    self.run_schedule_rules(now);

                    if is_due(next_rate_sync, now) {
                        self.sync_rates().await;
                        next_rate_sync = self.rate_sync.next_after(now);
                    }

                    if is_due(next_gap_fill, now) {
                        self.fix_daily_gaps(now);
                        next_gap_fill = self.daily_gaps.next_after(now);
                    }
                }
                command = self.receiver.recv() => {
                    let now = now_utc();

                    match command {
                        Some(SchedulerCommand::RunScheduleRules) => self.run_schedule_rules(now),
                        Some(SchedulerCommand::SyncRates) => self.sync_rates().await,
                        Some(SchedulerCommand::FixDailyGaps) => self.fix_daily_gaps(now),
                        Some(SchedulerCommand::Shutdown) | None => break,
                    }
                }
            }
        }

        tracing::info!("Scheduler stopped");
    }

    fn run_schedule_rules(&self, now: OffsetDateTime) {
        let context = PostingContext::new(&self.config, &self.rules, now);

        let result = self
            .database
            .write()
            .and_then(|mut connection| process_due_schedule_rules(context, &mut connection));

        if let Err(error) = result {
            tracing::error!("Could not process schedule rules: {error}");
        }
    }

    async fn sync_rates(&self) {
        let Some(url) = &self.config.exchange_rates_url else {
            tracing::debug!("Skipping rate sync, no feed URL is configured");
            return;
        };

        if let Err(error) = sync_rates(&self.http_client, url, &self.database, &self.config).await
        {
            tracing::error!("Rate sync failed: {error}");
        }
    }

    fn fix_daily_gaps(&self, now: OffsetDateTime) {
        let result = self.database.write().and_then(|mut connection| {
            let summary = fix_daily_gaps(&mut connection, now.date())?;
            let purged = purge_expired_revocations(now, &connection)?;
            Ok((summary, purged))
        });

        match result {
            Ok((summary, purged)) => tracing::info!(
                "Daily maintenance filled {} snapshots across {} accounts and purged {purged} revocations",
                summary.inserted,
                summary.accounts
            ),
            Err(error) => tracing::error!("Daily maintenance failed: {error}"),
        }
    }
}

fn is_due(next_run: Option<OffsetDateTime>, now: OffsetDateTime) -> bool {
    next_run.is_some_and(|next_run| next_run <= now)
}

#[cfg(test)]
mod process_due_tests {
    use rusqlite::Connection;
    use time::macros::datetime;

    use crate::{
        Config, RuleEngine,
        account::{DefaultAccount, get_default_account},
        schedule::{
            ScheduleRuleData, TransactionTemplate, create_schedule_rule, get_schedule_rule,
        },
        test_utils::{dec, get_test_connection},
        transaction::{PostingContext, TransactionType, count_transactions, get_transaction},
    };

    use super::{ScheduleRunSummary, process_due_schedule_rules};

    fn rent(source_account_id: i64) -> ScheduleRuleData {
        ScheduleRuleData {
            title: "Rent".to_owned(),
            cron_expression: "0 9 * * *".to_owned(),
            template: TransactionTemplate {
                transaction_type: TransactionType::Withdrawal,
                source_account_id: Some(source_account_id),
                source_amount: Some(dec("1200")),
                source_currency: Some("USD".to_owned()),
                destination_account_id: None,
                destination_amount: None,
                destination_currency: None,
                title: "Rent {today}".to_owned(),
                notes: String::new(),
                category_id: None,
                tag_ids: vec![],
                skip_rules: false,
            },
            enabled: true,
        }
    }

    fn cash(connection: &Connection) -> i64 {
        get_default_account(DefaultAccount::Cash, connection)
            .unwrap()
            .id
    }

    fn run_at(now: time::OffsetDateTime, connection: &mut Connection) -> ScheduleRunSummary {
        let config = Config::default();
        let engine = RuleEngine::new();

        process_due_schedule_rules(PostingContext::new(&config, &engine, now), connection)
            .unwrap()
    }

    #[test]
    fn due_rule_fires_once_and_advances() {
        let mut connection = get_test_connection();
        let rule = create_schedule_rule(
            rent(cash(&connection)),
            datetime!(2025-05-01 08:00 UTC),
            &connection,
        )
        .unwrap();

        let first = run_at(datetime!(2025-05-01 09:00 UTC), &mut connection);
        let second = run_at(datetime!(2025-05-01 09:05 UTC), &mut connection);

        assert_eq!(
            first,
            ScheduleRunSummary {
                created: 1,
                ..Default::default()
            }
        );
        assert_eq!(second, ScheduleRunSummary::default());
        assert_eq!(count_transactions(&connection), Ok(1));

        let rule = get_schedule_rule(rule.id, &connection).unwrap();
        assert_eq!(rule.next_execute_at, datetime!(2025-05-02 09:00 UTC));
        assert_eq!(
            rule.last_executed_at,
            Some(datetime!(2025-05-01 09:00 UTC))
        );
    }

    #[test]
    fn created_transaction_uses_template() {
        let mut connection = get_test_connection();
        create_schedule_rule(
            rent(cash(&connection)),
            datetime!(2025-05-01 08:00 UTC),
            &connection,
        )
        .unwrap();

        run_at(datetime!(2025-05-01 09:00 UTC), &mut connection);

        let transaction = get_transaction(1, &connection).unwrap();
        assert_eq!(transaction.title, "Rent 2025-05-01");
        assert_eq!(
            transaction.transaction_date,
            datetime!(2025-05-01 09:00 UTC)
        );
    }

    #[test]
    fn overdue_rule_fires_once_and_skips_missed_ticks() {
        let mut connection = get_test_connection();
        let rule = create_schedule_rule(
            rent(cash(&connection)),
            datetime!(2025-05-01 08:00 UTC),
            &connection,
        )
        .unwrap();

        let summary = run_at(datetime!(2025-05-04 12:00 UTC), &mut connection);

        assert_eq!(summary.created, 1);
        assert_eq!(count_transactions(&connection), Ok(1));
        assert_eq!(
            get_schedule_rule(rule.id, &connection)
                .unwrap()
                .next_execute_at,
            datetime!(2025-05-05 09:00 UTC)
        );
    }

    #[test]
    fn failing_rule_stays_due_and_others_still_run() {
        let mut connection = get_test_connection();
        let broken = create_schedule_rule(
            rent(999),
            datetime!(2025-05-01 08:00 UTC),
            &connection,
        )
        .unwrap();
        create_schedule_rule(
            rent(cash(&connection)),
            datetime!(2025-05-01 08:00 UTC),
            &connection,
        )
        .unwrap();

        let summary = run_at(datetime!(2025-05-01 09:00 UTC), &mut connection);

        assert_eq!(
            summary,
            ScheduleRunSummary {
                created: 1,
                skipped: 0,
                failed: 1,
            }
        );
        assert_eq!(count_transactions(&connection), Ok(1));

        let broken = get_schedule_rule(broken.id, &connection).unwrap();
        assert_eq!(broken.next_execute_at, datetime!(2025-05-01 09:00 UTC));
        assert_eq!(broken.last_executed_at, None);
    }
}
