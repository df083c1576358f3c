//! Connection configuration and connection-string assembly.

use crate::error::{MapperError, MapperResult};

/// Configuration for [`crate::Client`].
///
/// Either supply a full `connection_string` or the individual parts and the
/// string is assembled as `protocol://[user[:password]@]host:port/database`.
#[derive(Debug, Clone)]
pub struct MapperConfig {
    /// Full connection string; overrides the part-wise fields when set.
    pub connection_string: Option<String>,
    /// Host, defaults to `localhost`.
    pub host: String,
    /// Port, defaults to `5432`.
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    /// Protocol, defaults to `tcp` (assembled as a `postgres://` URL).
    pub protocol: String,
    /// Log each issued statement.
    pub verbose: bool,
    /// Turn unsafe/ambiguous operations into errors instead of best-effort.
    pub strict: bool,
    /// Connection pool size.
    pub pool_size: usize,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            host: "localhost".to_string(),
            port: 5432,
            user: None,
            password: None,
            database: None,
            protocol: "tcp".to_string(),
            verbose: false,
            strict: false,
            pool_size: 16,
        }
    }
}

impl MapperConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the full connection string.
    pub fn connection_string(mut self, s: impl Into<String>) -> Self {
        self.connection_string = Some(s.into());
        self
    }

    /// Set the host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the user.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the database name.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Log each issued statement.
    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Enable strict validation.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Set the pool size.
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// The database name, required by schema introspection.
    pub fn database_name(&self) -> MapperResult<&str> {
        self.database
            .as_deref()
            .ok_or_else(|| MapperError::configuration("database name required"))
    }

    /// Assemble the connection string, or return the one supplied.
    ///
    /// The `tcp` protocol maps to the `postgres` URL scheme the driver
    /// understands.
    pub fn build_connection_string(&self) -> MapperResult<String> {
        if let Some(s) = &self.connection_string {
            return Ok(s.clone());
        }

        let database = self.database_name()?;
        let scheme = if self.protocol == "tcp" {
            "postgres"
        } else {
            &self.protocol
        };

        let mut conn = format!("{scheme}://");
        if let Some(user) = &self.user {
            conn.push_str(user);
            if let Some(password) = &self.password {
                conn.push(':');
                conn.push_str(password);
            }
            conn.push('@');
        }
        conn.push_str(&self.host);
        conn.push(':');
        conn.push_str(&self.port.to_string());
        conn.push('/');
        conn.push_str(database);
        Ok(conn)
    }
}
