//! Hand-parsed CLI configuration, matching the broker's single-dash flag
//! convention (`-dbhost`, `-port`, ...) rather than `clap`'s `--long` style.

use std::fmt;

/// Listen port and database connection parameters for one broker run.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the broker listens on.
    pub port: u16,
    /// PostgreSQL host.
    pub db_host: String,
    /// PostgreSQL port.
    pub db_port: u16,
    /// PostgreSQL database name.
    pub db_database: String,
    /// Optional Unix socket directory, used instead of a TCP host/port when set.
    pub db_sockdir: Option<String>,
    /// PostgreSQL user.
    pub db_user: String,
    /// PostgreSQL password.
    pub db_password: Option<String>,
    /// Whether outgoing frames carry the optional trailing newline after the
    /// null terminator.
    pub newline_after_null: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 44444,
            db_host: "localhost".to_string(),
            db_port: 5432,
            db_database: "stomp".to_string(),
            db_sockdir: None,
            db_user: "stomp".to_string(),
            db_password: None,
            newline_after_null: true,
        }
    }
}

impl Config {
    /// Builds the PostgreSQL connection URL `sqlx` connects with.
    pub fn database_url(&self) -> String {
        let password = self.db_password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.db_user, password, self.db_host, self.db_port, self.db_database
        )
    }
}

/// A malformed invocation: an unrecognized flag, or one missing its value.
#[derive(Debug)]
pub struct UsageError(pub String);

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UsageError {}

const USAGE: &str = "usage: broker-server [-port PORT] [-dbhost HOST] [-dbport PORT] \
[-dbdatabase DATABASE] [-dbsockdir DIR] [-dbuser USER] [-dbpassword PASSWORD]";

/// Parses `args` (excluding the program name) into a `Config`, starting from
/// `Config::default()` and overriding each field its own flag populates.
///
/// An unknown flag or one missing its value is a `UsageError` carrying a
/// ready-to-print usage message; the caller is expected to print it to
/// stderr and exit non-zero rather than panic.
pub fn parse(args: impl IntoIterator<Item = String>) -> Result<Config, UsageError> {
    let mut config = Config::default();
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        let mut value = || args.next().ok_or_else(|| UsageError(USAGE.to_string()));

        match flag.as_str() {
            "-port" => config.port = parse_u16(&value()?, "-port")?,
            "-dbhost" => config.db_host = value()?,
            "-dbport" => config.db_port = parse_u16(&value()?, "-dbport")?,
            "-dbdatabase" => config.db_database = value()?,
            "-dbsockdir" => config.db_sockdir = Some(value()?),
            "-dbuser" => config.db_user = value()?,
            "-dbpassword" => config.db_password = Some(value()?),
            other => return Err(UsageError(format!("unknown argument: {other}\n{USAGE}"))),
        }
    }

    Ok(config)
}

fn parse_u16(raw: &str, flag: &str) -> Result<u16, UsageError> {
    raw.parse()
        .map_err(|_| UsageError(format!("{flag} expects a numeric value, got {raw:?}\n{USAGE}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_args() {
        let config = parse(Vec::<String>::new()).unwrap();
        assert_eq!(config.port, 44444);
    }

    #[test]
    fn each_flag_sets_its_own_field() {
        let args = [
            "-port", "5000", "-dbhost", "db.example.com", "-dbport", "5433", "-dbdatabase", "broker",
            "-dbsockdir", "/var/run/postgresql", "-dbuser", "alice", "-dbpassword", "secret",
        ]
        .map(str::to_string);
        let config = parse(args).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.db_host, "db.example.com");
        assert_eq!(config.db_port, 5433);
        assert_eq!(config.db_database, "broker");
        assert_eq!(config.db_sockdir.as_deref(), Some("/var/run/postgresql"));
        assert_eq!(config.db_user, "alice");
        assert_eq!(config.db_password.as_deref(), Some("secret"));
    }

    #[test]
    fn unknown_flag_is_a_usage_error() {
        let args = ["-bogus", "x"].map(str::to_string);
        assert!(parse(args).is_err());
    }

    #[test]
    fn flag_missing_its_value_is_a_usage_error() {
        let args = ["-port"].map(str::to_string);
        assert!(parse(args).is_err());
    }
}
