//! Testing utilities for the provider.
//!
//! [`ProviderTester`] drives a `ProviderService` without spinning up a gRPC
//! server. [`RecordingClient`] stands in for the MySQL server: it answers
//! statements from a script and records everything it was asked to run.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hemmer_provider_mysql::provider::MysqlProvider;
//! use hemmer_provider_mysql::testing::{ProviderTester, RecordingClient, Reply};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create_database() {
//!     let client = Arc::new(RecordingClient::new().on(
//!         "SHOW CREATE DATABASE",
//!         Reply::row(&["app", "CREATE DATABASE `app` /*!40100 DEFAULT CHARACTER SET utf8 */"]),
//!     ));
//!     let tester = ProviderTester::new(MysqlProvider::with_client(client.clone()));
//!
//!     let state = tester.lifecycle_create("mysql_database", json!({"name": "app"})).await.unwrap();
//!     assert_eq!(state["default_charset"], "utf8");
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::SqlClient;
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// A test harness for provider implementations.
///
/// This wraps a `ProviderService` implementation and provides
/// simplified methods for testing without a gRPC server.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    // =========================================================================
    // Schema & Metadata
    // =========================================================================

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    // =========================================================================
    // Provider Lifecycle
    // =========================================================================

    /// Validate provider configuration.
    ///
    /// Returns `Err` with the error diagnostics if there are any.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    ///
    /// Returns `Err` with the error diagnostics if there are any.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, proposed_state.clone(), proposed_state)
            .await
    }

    /// Plan a resource update.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(
                resource_type,
                Some(prior_state),
                proposed_state.clone(),
                proposed_state,
            )
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    // =========================================================================
    // Lifecycle Helpers
    // =========================================================================

    /// Run a full create lifecycle: plan → create → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self.plan_create(resource_type, config).await?;
        let created_state = self
            .create(resource_type, plan_result.planned_state)
            .await?;
        self.read(resource_type, created_state).await
    }

    /// Run a full update lifecycle: plan → update → read.
    ///
    /// Returns the final state after read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        proposed_state: Value,
    ) -> Result<Value, ProviderError> {
        let plan_result = self
            .plan_update(resource_type, prior_state.clone(), proposed_state)
            .await?;
        let updated_state = self
            .update(resource_type, prior_state, plan_result.planned_state)
            .await?;
        self.read(resource_type, updated_state).await
    }

    /// Run a full delete lifecycle: plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

// =========================================================================
// Scripted SQL client
// =========================================================================

/// A scripted answer for statements starting with a given prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// One row of text columns.
    Row(Vec<String>),
    /// No rows.
    Empty,
    /// The server rejects the statement.
    ServerError {
        /// MySQL error code, e.g. 1049.
        code: u16,
        /// Error message.
        message: String,
    },
}

impl Reply {
    /// A single row.
    pub fn row(columns: &[&str]) -> Self {
        Self::Row(columns.iter().map(|c| c.to_string()).collect())
    }

    /// A server error with the given code.
    pub fn server_error(code: u16, message: &str) -> Self {
        Self::ServerError {
            code,
            message: message.to_string(),
        }
    }
}

fn server_error(code: u16, message: &str) -> ProviderError {
    ProviderError::Database(mysql_async::Error::Server(mysql_async::ServerError {
        code,
        message: message.to_string(),
        state: "42000".to_string(),
    }))
}

/// An in-memory [`SqlClient`] that answers from a script.
///
/// Rules match on statement prefix; when several match, the one added last
/// wins. Unmatched statements succeed, and unmatched queries return no row.
#[derive(Debug, Default)]
pub struct RecordingClient {
    rules: Mutex<Vec<(String, Reply)>>,
    log: Mutex<Vec<(String, Vec<String>)>>,
    ping_failures: AtomicU32,
    pings: AtomicU32,
    closed: AtomicBool,
}

impl RecordingClient {
    /// A client with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements starting with `prefix` with `reply`.
    pub fn on(self, prefix: &str, reply: Reply) -> Self {
        self.set(prefix, reply);
        self
    }

    /// Refuse the first `count` pings.
    pub fn failing_pings(self, count: u32) -> Self {
        self.ping_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Add a rule to a client that is already in use.
    pub fn set(&self, prefix: &str, reply: Reply) {
        lock(&self.rules).push((prefix.to_string(), reply));
    }

    /// Every statement run so far, in order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.log).iter().map(|(sql, _)| sql.clone()).collect()
    }

    /// Parameters of the most recent statement starting with `prefix`.
    pub fn params_for(&self, prefix: &str) -> Option<Vec<String>> {
        lock(&self.log)
            .iter()
            .rev()
            .find(|(sql, _)| sql.starts_with(prefix))
            .map(|(_, params)| params.clone())
    }

    /// Number of pings received.
    pub fn pings(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    /// Whether [`SqlClient::close`] was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, sql: &str, params: Vec<String>) -> Option<Reply> {
        lock(&self.log).push((sql.to_string(), params));
        lock(&self.rules)
            .iter()
            .rev()
            .find(|(prefix, _)| sql.starts_with(prefix.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SqlClient for RecordingClient {
    async fn exec(&self, sql: &str) -> Result<(), ProviderError> {
        match self.record(sql, Vec::new()) {
            Some(Reply::ServerError { code, message }) => Err(server_error(code, &message)),
            _ => Ok(()),
        }
    }

    async fn query_row(
        &self,
        sql: &str,
        params: Vec<String>,
    ) -> Result<Option<Vec<String>>, ProviderError> {
        match self.record(sql, params) {
            Some(Reply::Row(row)) => Ok(Some(row)),
            Some(Reply::ServerError { code, message }) => Err(server_error(code, &message)),
            Some(Reply::Empty) | None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        let n = self.pings.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.ping_failures.load(Ordering::SeqCst) {
            return Err(ProviderError::Connection(format!(
                "connection refused (attempt {})",
                n
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), ProviderError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that a plan result indicates the resource will be created.
///
/// # Panics
///
/// Panics if the plan has no changes or requires replacement.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(
        !plan.requires_replace,
        "Expected plan to create, not replace"
    );
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan does not have a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan has a change for the given path.
pub fn assert_plan_does_not_change_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        !has_change,
        "Expected plan to not change attribute '{}', but it was changed",
        path
    );
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}
