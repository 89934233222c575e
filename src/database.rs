//! The `mysql_database` resource.
//!
//! A database is identified by its name. Its charset and collation are read
//! back by parsing `SHOW CREATE DATABASE`, which is the only place the
//! server reports them per database.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::SqlClient;
use crate::error::ProviderError;
use crate::schema::{Attribute, Schema};

/// Resource type name.
pub const RESOURCE_TYPE: &str = "mysql_database";

/// Marker preceding the charset in `SHOW CREATE DATABASE` output.
pub const CHARSET_KEY: &str = "CHARACTER SET ";
/// Marker preceding the collation in `SHOW CREATE DATABASE` output.
pub const COLLATE_KEY: &str = "COLLATE ";

/// Charset used when the configuration leaves it unset.
pub const DEFAULT_CHARSET: &str = "utf8";
/// Collation used when the configuration leaves it unset.
pub const DEFAULT_COLLATION: &str = "utf8_general_ci";

const DEFAULT_COLLATION_QUERY: &str =
    "SHOW COLLATION WHERE `Charset` = ? AND `Default` = 'Yes'";

/// Quote an identifier with backticks, doubling embedded backticks.
pub fn quote_identifier(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Statement verb for [`database_statement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// `CREATE DATABASE`
    Create,
    /// `ALTER DATABASE`
    Alter,
}

impl Verb {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
        }
    }
}

/// Build `<VERB> DATABASE <name> [CHARACTER SET <cs>] [COLLATE <col>]`.
///
/// Empty charset or collation omits its clause.
pub fn database_statement(verb: Verb, spec: &DatabaseSpec) -> String {
    let mut parts = vec![
        verb.as_str().to_string(),
        "DATABASE".to_string(),
        quote_identifier(&spec.name),
    ];
    if !spec.default_charset.is_empty() {
        parts.push(format!("{}{}", CHARSET_KEY, quote_identifier(&spec.default_charset)));
    }
    if !spec.default_collation.is_empty() {
        parts.push(format!("{}{}", COLLATE_KEY, quote_identifier(&spec.default_collation)));
    }
    parts.join(" ")
}

/// The token following `keyword`, up to the next space or the end of text.
///
/// Returns `None` when the keyword is absent or nothing follows it.
pub fn extract_ident_after<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let start = sql.find(keyword)? + keyword.len();
    let remain = &sql[start..];
    let token = match remain.find(' ') {
        Some(end) => &remain[..end],
        None => remain,
    };
    (!token.is_empty()).then_some(token)
}

/// Parse the charset and collation out of a `SHOW CREATE DATABASE` row.
///
/// The search starts after the quoted database name so a name containing
/// the markers cannot shadow the real clauses.
pub fn parse_create_statement<'a>(create_sql: &'a str, name: &str) -> (Option<&'a str>, Option<&'a str>) {
    let quoted = quote_identifier(name);
    let clauses = match create_sql.find(&quoted) {
        Some(pos) => &create_sql[pos + quoted.len()..],
        None => create_sql,
    };
    (
        extract_ident_after(clauses, CHARSET_KEY),
        extract_ident_after(clauses, COLLATE_KEY),
    )
}

/// Server flavour and version from `SELECT VERSION()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerVersion {
    /// Major, minor and patch.
    pub version: (u32, u32, u32),
    /// Whether the server is MariaDB.
    pub mariadb: bool,
}

impl ServerVersion {
    /// Parse strings like `8.0.36`, `5.7.44-log` or
    /// `5.5.5-10.11.6-MariaDB-0+deb12u1`.
    pub fn parse(raw: &str) -> Result<Self, ProviderError> {
        let mariadb = raw.contains("MariaDB");
        let raw = if mariadb {
            raw.strip_prefix("5.5.5-").unwrap_or(raw)
        } else {
            raw
        };
        let numeric = raw
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .next()
            .unwrap_or_default();

        let bad = || ProviderError::UnexpectedResponse(format!("Unparsable server version {:?}", raw));
        let mut parts = numeric.split('.').filter(|p| !p.is_empty());
        let mut component = |required: bool| match parts.next() {
            Some(part) => part.parse::<u32>().map_err(|_| bad()),
            None if required => Err(bad()),
            None => Ok(0),
        };
        let major = component(true)?;
        let minor = component(false)?;
        let patch = component(false)?;

        Ok(Self {
            version: (major, minor, patch),
            mariadb,
        })
    }

    /// Columns in a `SHOW COLLATION` row: MySQL after 8.0.0 adds
    /// `Pad_attribute`.
    pub fn collation_columns(&self) -> usize {
        if !self.mariadb && self.version > (8, 0, 0) {
            7
        } else {
            6
        }
    }
}

/// Desired state of a database, defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseSpec {
    /// Database name.
    pub name: String,
    /// Charset; empty means "server default".
    pub default_charset: String,
    /// Collation; empty means "default for the charset".
    pub default_collation: String,
}

#[derive(Debug, Deserialize)]
struct RawDatabaseSpec {
    name: Option<String>,
    #[serde(default)]
    default_charset: Option<String>,
    #[serde(default)]
    default_collation: Option<String>,
}

impl DatabaseSpec {
    /// Spec with default charset and collation.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_charset: DEFAULT_CHARSET.to_string(),
            default_collation: DEFAULT_COLLATION.to_string(),
        }
    }

    /// Set the charset.
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.default_charset = charset.into();
        self
    }

    /// Set the collation.
    pub fn with_collation(mut self, collation: impl Into<String>) -> Self {
        self.default_collation = collation.into();
        self
    }

    /// Read a spec from resource configuration; absent or `null` attributes
    /// take their defaults.
    pub fn from_value(value: &Value) -> Result<Self, ProviderError> {
        let raw: RawDatabaseSpec = serde_json::from_value(value.clone())?;
        let name = raw
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| ProviderError::Validation("name is required".to_string()))?;
        Ok(Self {
            name,
            default_charset: raw
                .default_charset
                .unwrap_or_else(|| DEFAULT_CHARSET.to_string()),
            default_collation: raw
                .default_collation
                .unwrap_or_else(|| DEFAULT_COLLATION.to_string()),
        })
    }

    /// The planned state for this spec.
    pub fn planned_state(&self) -> Value {
        json!({
            "id": self.name,
            "name": self.name,
            "default_charset": self.default_charset,
            "default_collation": self.default_collation,
        })
    }
}

/// State of a database as read from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseState {
    /// Resource ID, equal to the name.
    pub id: String,
    /// Database name.
    pub name: String,
    /// Charset, empty if the server reported none.
    pub default_charset: String,
    /// Collation, empty if the server reported none.
    pub default_collation: String,
}

impl DatabaseState {
    /// Serialize for the engine.
    pub fn to_value(&self) -> Result<Value, ProviderError> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Schema of `mysql_database`.
pub fn resource_schema() -> Schema {
    Schema::v0()
        .with_description("A database on the MySQL server")
        .with_attribute("id", Attribute::computed_string())
        .with_attribute(
            "name",
            Attribute::required_string()
                .with_force_new()
                .with_description("Name of the database"),
        )
        .with_attribute(
            "default_charset",
            Attribute::optional_string()
                .with_default(json!(DEFAULT_CHARSET))
                .with_description("Default character set"),
        )
        .with_attribute(
            "default_collation",
            Attribute::optional_string()
                .with_default(json!(DEFAULT_COLLATION))
                .with_description("Default collation"),
        )
}

/// Run `CREATE DATABASE` and read the result back.
pub async fn create(
    client: &dyn SqlClient,
    spec: &DatabaseSpec,
) -> Result<DatabaseState, ProviderError> {
    let statement = database_statement(Verb::Create, spec);
    client.exec(&statement).await?;
    info!(database = %spec.name, "Created database");
    read_existing(client, &spec.name).await
}

/// Run `ALTER DATABASE` and read the result back.
pub async fn update(
    client: &dyn SqlClient,
    spec: &DatabaseSpec,
) -> Result<DatabaseState, ProviderError> {
    let statement = database_statement(Verb::Alter, spec);
    client.exec(&statement).await?;
    info!(database = %spec.name, "Altered database");
    read_existing(client, &spec.name).await
}

/// Run `DROP DATABASE`.
pub async fn delete(client: &dyn SqlClient, name: &str) -> Result<(), ProviderError> {
    client
        .exec(&format!("DROP DATABASE {}", quote_identifier(name)))
        .await?;
    info!(database = %name, "Dropped database");
    Ok(())
}

/// Read an existing database for import.
pub async fn import(client: &dyn SqlClient, id: &str) -> Result<DatabaseState, ProviderError> {
    read_existing(client, id).await
}

async fn read_existing(client: &dyn SqlClient, name: &str) -> Result<DatabaseState, ProviderError> {
    read(client, name)
        .await?
        .ok_or_else(|| ProviderError::NotFound(format!("database {}", name)))
}

/// Read a database; `None` when the server does not know it.
pub async fn read(
    client: &dyn SqlClient,
    name: &str,
) -> Result<Option<DatabaseState>, ProviderError> {
    let statement = format!("SHOW CREATE DATABASE {}", quote_identifier(name));
    let row = match client.query_row(&statement, Vec::new()).await {
        Ok(row) => row,
        Err(err) if err.is_unknown_database() => {
            debug!(database = %name, "Database no longer exists");
            return Ok(None);
        },
        Err(err) => return Err(err),
    };
    let Some(row) = row else {
        return Ok(None);
    };
    let create_sql = row.get(1).ok_or_else(|| {
        ProviderError::UnexpectedResponse(format!(
            "SHOW CREATE DATABASE returned {} columns",
            row.len()
        ))
    })?;

    let (charset, collation) = parse_create_statement(create_sql, name);
    let default_charset = charset.unwrap_or_default().to_string();
    let default_collation = match collation {
        Some(collation) => collation.to_string(),
        // The server omits the collation when it is the charset's default.
        None if !default_charset.is_empty() => {
            lookup_default_collation(client, &default_charset).await?
        },
        None => String::new(),
    };

    Ok(Some(DatabaseState {
        id: name.to_string(),
        name: name.to_string(),
        default_charset,
        default_collation,
    }))
}

/// Detect the server flavour and version.
pub async fn server_version(client: &dyn SqlClient) -> Result<ServerVersion, ProviderError> {
    let row = client
        .query_row("SELECT VERSION()", Vec::new())
        .await?
        .ok_or_else(|| ProviderError::UnexpectedResponse("SELECT VERSION() returned no rows".into()))?;
    let raw = row
        .first()
        .ok_or_else(|| ProviderError::UnexpectedResponse("SELECT VERSION() returned no columns".into()))?;
    ServerVersion::parse(raw)
}

/// The collation marked `Default = 'Yes'` for `charset`.
pub async fn lookup_default_collation(
    client: &dyn SqlClient,
    charset: &str,
) -> Result<String, ProviderError> {
    let version = server_version(client).await?;
    let expected = version.collation_columns();

    let row = client
        .query_row(DEFAULT_COLLATION_QUERY, vec![charset.to_string()])
        .await?
        .ok_or_else(|| ProviderError::MissingDefaultCollation(charset.to_string()))?;
    if row.len() != expected {
        return Err(ProviderError::UnexpectedResponse(format!(
            "SHOW COLLATION returned {} columns, expected {} for server {:?}",
            row.len(),
            expected,
            version
        )));
    }
    row.into_iter()
        .next()
        .ok_or_else(|| ProviderError::MissingDefaultCollation(charset.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingClient, Reply};

    const MYSQL8_CREATE: &str = "CREATE DATABASE `app` /*!40100 DEFAULT CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci */ /*!80016 DEFAULT ENCRYPTION='N' */";

    fn collation_row(collation: &str, charset: &str, columns: usize) -> Reply {
        let mut row = vec![collation, charset, "45", "Yes", "Yes", "1", "PAD SPACE"];
        row.truncate(columns);
        Reply::row(&row)
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("app"), "`app`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
        assert_eq!(quote_identifier("``"), "``````");
    }

    #[test]
    fn test_database_statement() {
        let spec = DatabaseSpec::new("app")
            .with_charset("utf8mb4")
            .with_collation("utf8mb4_unicode_ci");
        assert_eq!(
            database_statement(Verb::Create, &spec),
            "CREATE DATABASE `app` CHARACTER SET `utf8mb4` COLLATE `utf8mb4_unicode_ci`"
        );
        assert_eq!(
            database_statement(Verb::Alter, &spec),
            "ALTER DATABASE `app` CHARACTER SET `utf8mb4` COLLATE `utf8mb4_unicode_ci`"
        );

        let bare = DatabaseSpec::new("odd`name").with_charset("").with_collation("");
        assert_eq!(database_statement(Verb::Create, &bare), "CREATE DATABASE `odd``name`");
    }

    #[test]
    fn test_statement_quotes_any_name() {
        for name in ["a", "a`b", "`", "x``y", "with space", "semi;colon"] {
            let stmt = database_statement(Verb::Create, &DatabaseSpec::new(name));
            let quoted = format!("`{}`", name.replace('`', "``"));
            assert!(stmt.starts_with(&format!("CREATE DATABASE {} ", quoted)), "{}", stmt);
        }
    }

    #[test]
    fn test_extract_ident_after() {
        let sql = "CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci";
        assert_eq!(extract_ident_after(sql, CHARSET_KEY), Some("utf8mb4"));
        assert_eq!(extract_ident_after(sql, COLLATE_KEY), Some("utf8mb4_unicode_ci"));
        assert_eq!(extract_ident_after("CREATE DATABASE `x`", COLLATE_KEY), None);
        assert_eq!(extract_ident_after("COLLATE ", COLLATE_KEY), None);
    }

    #[test]
    fn test_parse_create_statement() {
        assert_eq!(
            parse_create_statement(MYSQL8_CREATE, "app"),
            (Some("utf8mb4"), Some("utf8mb4_unicode_ci"))
        );
        assert_eq!(
            parse_create_statement(
                "CREATE DATABASE `legacy` /*!40100 DEFAULT CHARACTER SET latin1 */",
                "legacy"
            ),
            (Some("latin1"), None)
        );
        let tricky = "CREATE DATABASE `COLLATE x` /*!40100 DEFAULT CHARACTER SET utf8 */";
        assert_eq!(parse_create_statement(tricky, "COLLATE x"), (Some("utf8"), None));
    }

    #[test]
    fn test_server_version() {
        let v = ServerVersion::parse("8.0.36").unwrap();
        assert_eq!(v.version, (8, 0, 36));
        assert!(!v.mariadb);
        assert_eq!(v.collation_columns(), 7);

        assert_eq!(ServerVersion::parse("8.0.0").unwrap().collation_columns(), 6);
        assert_eq!(ServerVersion::parse("5.7.44-log").unwrap().collation_columns(), 6);
        assert_eq!(ServerVersion::parse("8.4").unwrap().version, (8, 4, 0));

        let maria = ServerVersion::parse("5.5.5-10.11.6-MariaDB-0+deb12u1").unwrap();
        assert!(maria.mariadb);
        assert_eq!(maria.version, (10, 11, 6));
        assert_eq!(maria.collation_columns(), 6);

        assert!(ServerVersion::parse("unknown").is_err());
    }

    #[test]
    fn test_spec_from_value() {
        let spec = DatabaseSpec::from_value(&json!({"name": "app"})).unwrap();
        assert_eq!(spec, DatabaseSpec::new("app"));

        let spec = DatabaseSpec::from_value(
            &json!({"name": "app", "default_charset": null, "default_collation": ""}),
        )
        .unwrap();
        assert_eq!(spec.default_charset, DEFAULT_CHARSET);
        assert_eq!(spec.default_collation, "");

        assert!(DatabaseSpec::from_value(&json!({})).is_err());
        assert!(DatabaseSpec::from_value(&json!({"name": ""})).is_err());
    }

    #[tokio::test]
    async fn test_create_then_read_round_trip() {
        let client = RecordingClient::new().on(
            "SHOW CREATE DATABASE `app`",
            Reply::row(&["app", MYSQL8_CREATE]),
        );
        let spec = DatabaseSpec::new("app")
            .with_charset("utf8mb4")
            .with_collation("utf8mb4_unicode_ci");

        let state = create(&client, &spec).await.unwrap();
        assert_eq!(state.id, "app");
        assert_eq!(state.default_charset, "utf8mb4");
        assert_eq!(state.default_collation, "utf8mb4_unicode_ci");
        assert_eq!(
            client.statements(),
            vec![
                "CREATE DATABASE `app` CHARACTER SET `utf8mb4` COLLATE `utf8mb4_unicode_ci`",
                "SHOW CREATE DATABASE `app`",
            ]
        );
    }

    #[tokio::test]
    async fn test_create_surfaces_server_error() {
        let client = RecordingClient::new().on(
            "CREATE DATABASE",
            Reply::server_error(1007, "Can't create database 'app'; database exists"),
        );
        let err = create(&client, &DatabaseSpec::new("app")).await.unwrap_err();
        assert_eq!(err.server_code(), Some(1007));
        assert_eq!(client.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_read_unknown_database_clears_state() {
        let client = RecordingClient::new().on(
            "SHOW CREATE DATABASE",
            Reply::server_error(1049, "Unknown database 'gone'"),
        );
        assert_eq!(read(&client, "gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_other_errors_propagate() {
        let client = RecordingClient::new()
            .on("SHOW CREATE DATABASE", Reply::server_error(1044, "Access denied"));
        let err = read(&client, "secret").await.unwrap_err();
        assert_eq!(err.server_code(), Some(1044));
    }

    #[tokio::test]
    async fn test_read_looks_up_default_collation_mysql8() {
        let client = RecordingClient::new()
            .on(
                "SHOW CREATE DATABASE",
                Reply::row(&["app", "CREATE DATABASE `app` /*!40100 DEFAULT CHARACTER SET utf8mb4 */"]),
            )
            .on("SELECT VERSION()", Reply::row(&["8.0.36"]))
            .on("SHOW COLLATION", collation_row("utf8mb4_0900_ai_ci", "utf8mb4", 7));

        let state = read(&client, "app").await.unwrap().unwrap();
        assert_eq!(state.default_collation, "utf8mb4_0900_ai_ci");
        assert_eq!(
            client.params_for("SHOW COLLATION"),
            Some(vec!["utf8mb4".to_string()])
        );
    }

    #[tokio::test]
    async fn test_read_looks_up_default_collation_mariadb() {
        let client = RecordingClient::new()
            .on(
                "SHOW CREATE DATABASE",
                Reply::row(&["app", "CREATE DATABASE `app` /*!40100 DEFAULT CHARACTER SET latin1 */"]),
            )
            .on("SELECT VERSION()", Reply::row(&["5.5.5-10.6.12-MariaDB"]))
            .on("SHOW COLLATION", collation_row("latin1_swedish_ci", "latin1", 6));

        let state = read(&client, "app").await.unwrap().unwrap();
        assert_eq!(state.default_collation, "latin1_swedish_ci");
    }

    #[tokio::test]
    async fn test_read_rejects_unexpected_collation_width() {
        let client = RecordingClient::new()
            .on(
                "SHOW CREATE DATABASE",
                Reply::row(&["app", "CREATE DATABASE `app` /*!40100 DEFAULT CHARACTER SET latin1 */"]),
            )
            .on("SELECT VERSION()", Reply::row(&["5.7.44"]))
            .on("SHOW COLLATION", collation_row("latin1_swedish_ci", "latin1", 7));

        let err = read(&client, "app").await.unwrap_err();
        assert!(matches!(err, ProviderError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn test_read_missing_default_collation() {
        let client = RecordingClient::new()
            .on(
                "SHOW CREATE DATABASE",
                Reply::row(&["app", "CREATE DATABASE `app` /*!40100 DEFAULT CHARACTER SET latin9 */"]),
            )
            .on("SELECT VERSION()", Reply::row(&["8.0.36"]))
            .on("SHOW COLLATION", Reply::Empty);

        let err = read(&client, "app").await.unwrap_err();
        assert_eq!(err.to_string(), "Charset latin9 has no default collation");
    }

    #[tokio::test]
    async fn test_update_alters_then_reads() {
        let client = RecordingClient::new().on(
            "SHOW CREATE DATABASE",
            Reply::row(&["app", MYSQL8_CREATE]),
        );
        let spec = DatabaseSpec::new("app")
            .with_charset("utf8mb4")
            .with_collation("utf8mb4_unicode_ci");
        update(&client, &spec).await.unwrap();
        assert!(client.statements()[0].starts_with("ALTER DATABASE `app`"));
    }

    #[tokio::test]
    async fn test_delete_and_import() {
        let client = RecordingClient::new()
            .on("SHOW CREATE DATABASE `gone`", Reply::server_error(1049, "Unknown database"));
        delete(&client, "old`db").await.unwrap();
        assert_eq!(client.statements(), vec!["DROP DATABASE `old``db`"]);

        let err = import(&client, "gone").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }
}
