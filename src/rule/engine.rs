//! Compiles, caches and runs rule scripts.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::{
    Error,
    rule::{
        DryRunResult, PipelineOutcome, Rule, RuleId, TransactionView,
        script::{CompileError, Completion, Limits, Program, compile, execute},
    },
};

type CacheKey = (RuleId, [u8; 32]);
type CompiledProgram = Arc<OnceLock<Result<Arc<Program>, CompileError>>>;

/// Runs rule scripts with a cache of compiled programs.
///
/// Programs are cached by rule ID and script hash, so an edited rule is recompiled the next time
/// it runs. Concurrent first runs of the same script compile it once.
#[derive(Debug, Default)]
pub struct RuleEngine {
    programs: DashMap<CacheKey, CompiledProgram>,
    limits: Limits,
}

impl RuleEngine {
    /// An engine with the default limits and an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine whose scripts run with `limits`.
    pub fn with_limits(limits: Limits) -> Self {
        Self {
            programs: DashMap::new(),
            limits,
        }
    }

    /// The number of cached programs.
    pub fn cached_programs(&self) -> usize {
        self.programs.len()
    }

    /// Check that `script` compiles without caching it.
    ///
    /// # Errors
    /// Returns [Error::RuleCompileError] with rule ID zero.
    pub fn check(&self, script: &str) -> Result<(), Error> {
        compile(script)
            .map(|_| ())
            .map_err(|error| compile_error(0, &error))
    }

    /// Drop the cached programs of a rule.
    pub fn forget(&self, rule_id: RuleId) {
        self.programs.retain(|(cached_id, _), _| *cached_id != rule_id);
    }

    fn program(&self, rule_id: RuleId, script: &str) -> Result<Arc<Program>, Error> {
        if rule_id == 0 {
            return compile(script)
                .map(Arc::new)
                .map_err(|error| compile_error(rule_id, &error));
        }

        let key: CacheKey = (rule_id, Sha256::digest(script.as_bytes()).into());
        let cell = self
            .programs
            .entry(key)
            .or_insert_with(|| Arc::new(OnceLock::new()))
            .clone();

        cell.get_or_init(|| {
            tracing::debug!("Compiling rule {rule_id}");
            compile(script).map(Arc::new)
        })
        .clone()
        .map_err(|error| compile_error(rule_id, &error))
    }

    /// Run one rule against `view`.
    ///
    /// The changes the script makes are applied to `view` whether or not the rule matched.
    /// Returns whether the rule matched.
    ///
    /// # Errors
    /// This function will return a:
    /// - [Error::RuleCompileError] if the stored script no longer compiles,
    /// - [Error::RuleExecutionError] if the script faults or exceeds its limits,
    /// - or [Error::RuleRejected] if the script calls `tx.reject`.
    pub fn evaluate(
        &self,
        rule_id: RuleId,
        script: &str,
        view: &mut TransactionView,
        now: OffsetDateTime,
    ) -> Result<bool, Error> {
        let program = self.program(rule_id, script)?;

        match execute(&program, view, now, &self.limits) {
            Ok(Completion::Returned(matched)) => Ok(matched),
            Ok(Completion::Rejected(reason)) => Err(Error::RuleRejected { rule_id, reason }),
            Err(fault) => {
                tracing::warn!(
                    "Rule {rule_id} failed at {}: {}",
                    fault.position,
                    fault.message
                );
                Err(Error::RuleExecutionError {
                    rule_id,
                    position: fault.position,
                    message: fault.message,
                })
            }
        }
    }

    /// Run `rules` in order over a copy of `view`.
    ///
    /// A matching rule keeps its changes and a rule that does not match has them discarded. The
    /// first matching final rule ends the pipeline.
    ///
    /// # Errors
    /// Returns the first error of any rule, see [RuleEngine::evaluate]. `view` is never changed.
    pub fn run_pipeline(
        &self,
        rules: &[Rule],
        view: &TransactionView,
        now: OffsetDateTime,
    ) -> Result<PipelineOutcome, Error> {
        let mut current = view.clone();
        let mut matched = Vec::new();

        for rule in rules {
            let mut candidate = current.clone();

            if self.evaluate(rule.id, &rule.script, &mut candidate, now)? {
                current = candidate;
                matched.push(rule.id);

                if rule.is_final_rule {
                    break;
                }
            }
        }

        Ok(PipelineOutcome {
            view: current,
            matched,
        })
    }

    /// Run a single script against `view` and report what it would change.
    ///
    /// # Errors
    /// Returns the same errors as [RuleEngine::evaluate].
    pub fn dry_run(
        &self,
        rule_id: RuleId,
        script: &str,
        view: &TransactionView,
        now: OffsetDateTime,
    ) -> Result<DryRunResult, Error> {
        let mut candidate = view.clone();
        let applied = self.evaluate(rule_id, script, &mut candidate, now)?;

        Ok(DryRunResult {
            applied,
            before: view.clone(),
            after: if applied { candidate } else { view.clone() },
        })
    }
}

fn compile_error(rule_id: RuleId, error: &CompileError) -> Error {
    Error::RuleCompileError {
        rule_id,
        message: error.to_string(),
    }
}
