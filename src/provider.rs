//! The MySQL provider: wires configuration, the connection and the
//! `mysql_database` resource into [`ProviderService`].

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::client::SqlClient;
use crate::config::{self, ProviderConfig};
use crate::connector::{self, Connection};
use crate::database::{self, DatabaseSpec, RESOURCE_TYPE};
use crate::error::ProviderError;
use crate::schema::{has_errors, Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
};
use crate::validation;

/// Attributes compared when planning a `mysql_database`.
const DATABASE_ATTRIBUTES: [&str; 4] = ["id", "name", "default_charset", "default_collation"];

type EnvLookup = fn(&str) -> Option<String>;

/// Provider managing databases on a single MySQL server.
pub struct MysqlProvider {
    connection: RwLock<Option<Connection>>,
    env: EnvLookup,
}

impl Default for MysqlProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MysqlProvider {
    /// An unconfigured provider reading fallbacks from the process environment.
    pub fn new() -> Self {
        Self::with_env(config::process_env)
    }

    /// An unconfigured provider with a custom environment lookup.
    pub fn with_env(env: EnvLookup) -> Self {
        Self {
            connection: RwLock::new(None),
            env,
        }
    }

    /// A provider already connected through `client`.
    pub fn with_client(client: Arc<dyn SqlClient>) -> Self {
        Self {
            connection: RwLock::new(Some(Connection::from_client(client))),
            env: config::process_env,
        }
    }

    async fn client(&self) -> Result<Arc<dyn SqlClient>, ProviderError> {
        self.connection
            .read()
            .await
            .as_ref()
            .map(Connection::client)
            .ok_or_else(|| {
                ProviderError::FailedPrecondition("Provider is not configured".to_string())
            })
    }
}

fn check_resource_type(resource_type: &str) -> Result<(), ProviderError> {
    if resource_type == RESOURCE_TYPE {
        Ok(())
    } else {
        Err(ProviderError::UnknownResource(resource_type.to_string()))
    }
}

/// The database a state refers to: its `id`, or its `name` for states
/// written before the ID was set.
fn database_name(state: &Value) -> Result<&str, ProviderError> {
    ["id", "name"]
        .iter()
        .find_map(|key| state.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))
        .ok_or_else(|| ProviderError::InvalidRequest("State has no database name".to_string()))
}

fn plan_destroy(prior_state: Option<Value>) -> PlanResult {
    let Some(Value::Object(prior)) = prior_state else {
        return PlanResult::no_change(Value::Null);
    };
    let changes = prior
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(path, value)| AttributeChange::removed(path.as_str(), value.clone()))
        .collect();
    PlanResult::with_changes(Value::Null, changes, false)
}

#[async_trait::async_trait]
impl ProviderService for MysqlProvider {
    fn schema(&self) -> ProviderSchema {
        ProviderSchema::new()
            .with_provider_config(config::provider_config_schema())
            .with_resource(RESOURCE_TYPE, database::resource_schema())
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: vec![RESOURCE_TYPE.to_string()],
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(config::validate_config(&config, self.env))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = config::validate_config(&config, self.env);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }

        let resolved = ProviderConfig::resolve(&config, self.env)?;
        let connection = connector::connect_with_env(&resolved, self.env).await?;

        let previous = self.connection.write().await.replace(connection);
        if let Some(previous) = previous {
            if let Err(err) = previous.close().await {
                warn!(error = %err, "Failed to close previous connection");
            }
        }
        info!(endpoint = %resolved.endpoint, "Provider configured");
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        let connection = self.connection.write().await.take();
        match connection {
            Some(connection) => {
                info!("Closing MySQL connection");
                connection.close().await
            },
            None => Ok(()),
        }
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        check_resource_type(resource_type)?;
        let mut diagnostics = validation::validate(&database::resource_schema(), &config);
        diagnostics.extend(validation::string_not_empty(config.get("name"), "name"));
        Ok(diagnostics)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        check_resource_type(resource_type)?;
        if proposed_state.is_null() {
            return Ok(plan_destroy(prior_state));
        }

        let planned = DatabaseSpec::from_value(&proposed_state)?.planned_state();
        let prior = prior_state.filter(|p| !p.is_null());
        let changes: Vec<AttributeChange> = DATABASE_ATTRIBUTES
            .iter()
            .filter_map(|attr| {
                AttributeChange::between(
                    attr,
                    prior.as_ref().and_then(|p| p.get(*attr)),
                    planned.get(*attr),
                )
            })
            .collect();

        match prior {
            Some(prior) if changes.is_empty() => Ok(PlanResult::no_change(prior)),
            Some(_) => {
                let schema = database::resource_schema();
                let requires_replace = changes
                    .iter()
                    .any(|c| schema.force_new_attributes().any(|attr| attr == c.path));
                Ok(PlanResult::with_changes(planned, changes, requires_replace))
            },
            None => Ok(PlanResult::with_changes(planned, changes, false)),
        }
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        check_resource_type(resource_type)?;
        let spec = DatabaseSpec::from_value(&planned_state)?;
        let client = self.client().await?;
        database::create(client.as_ref(), &spec).await?.to_value()
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        check_resource_type(resource_type)?;
        let name = database_name(&current_state)?;
        let client = self.client().await?;
        match database::read(client.as_ref(), name).await? {
            Some(state) => state.to_value(),
            None => Ok(Value::Null),
        }
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        check_resource_type(resource_type)?;
        let spec = DatabaseSpec::from_value(&planned_state)?;
        let current = database_name(&prior_state)?;
        if current != spec.name {
            return Err(ProviderError::InvalidRequest(format!(
                "Database {} cannot be renamed to {}; it must be replaced",
                current, spec.name
            )));
        }
        let client = self.client().await?;
        database::update(client.as_ref(), &spec).await?.to_value()
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        check_resource_type(resource_type)?;
        let name = database_name(&current_state)?;
        let client = self.client().await?;
        database::delete(client.as_ref(), name).await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        check_resource_type(resource_type)?;
        let client = self.client().await?;
        let state = database::import(client.as_ref(), id).await?;
        Ok(vec![ImportedResource::new(RESOURCE_TYPE, state.to_value()?)])
    }
}
