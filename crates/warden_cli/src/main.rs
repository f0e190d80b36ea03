//! Admin command-line tool over one SQLite access storage.
//!
//! # Responsibility
//! - Expose list, create, rename, batch remove and login checks.
//! - Print results on stdout; diagnostics go to stderr through the logger.

use clap::{Parser, Subcommand};
use flexi_logger::{Logger, LoggerHandle};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use warden_core::{
    AccessError, AccessStorage, AllowedClientHosts, Credentials, EntityType,
    ExternalAuthenticators, HostPatternError, Role, SqliteAccessStorage, User,
};

const STORAGE_NAME: &str = "local_directory";

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Inspect and edit an access entity database", long_about = None)]
struct Cli {
    /// SQLite database file
    #[arg(long)]
    db: PathBuf,

    /// Open the database without write access
    #[arg(long, global = true)]
    readonly: bool,

    /// Log level written to stderr
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List names and ids of one entity type
    List {
        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,
    },

    /// Create a user
    AddUser {
        name: String,

        /// Plaintext password; omitted means no password
        #[arg(long)]
        password: Option<String>,

        /// Allowed client host (`any`, `localhost`, address or CIDR); repeatable
        #[arg(long = "host")]
        hosts: Vec<String>,
    },

    /// Create a role
    AddRole { name: String },

    /// Rename one entity
    Rename {
        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,
        old_name: String,
        new_name: String,
    },

    /// Remove entities by name; failures are reported together
    Remove {
        #[arg(value_parser = parse_entity_type)]
        entity_type: EntityType,
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Check a login attempt
    Login {
        name: String,

        #[arg(long)]
        password: Option<String>,

        /// Client address
        #[arg(long = "from", default_value = "127.0.0.1")]
        address: IpAddr,
    },
}

/// Failures reported by one CLI invocation.
#[derive(Debug)]
enum CliError {
    Access(AccessError),
    HostPattern(HostPatternError),
}

impl Display for CliError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Access(err) => write!(f, "{err}"),
            Self::HostPattern(err) => write!(f, "bad --host value: {err}"),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Access(err) => Some(err),
            Self::HostPattern(err) => Some(err),
        }
    }
}

impl From<AccessError> for CliError {
    fn from(value: AccessError) -> Self {
        Self::Access(value)
    }
}

impl From<HostPatternError> for CliError {
    fn from(value: HostPatternError) -> Self {
        Self::HostPattern(value)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _logger = match start_logger(&cli.log_level) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn start_logger(level: &str) -> Result<LoggerHandle, String> {
    Logger::try_with_str(level)
        .map_err(|err| format!("invalid log level `{level}`: {err}"))?
        .log_to_stderr()
        .start()
        .map_err(|err| format!("failed to start logger: {err}"))
}

fn run(cli: Cli) -> Result<(), CliError> {
    let storage = if cli.readonly {
        SqliteAccessStorage::open_readonly(STORAGE_NAME, &cli.db)?
    } else {
        SqliteAccessStorage::open(STORAGE_NAME, &cli.db)?
    };

    match cli.command {
        Commands::List { entity_type } => {
            for id in storage.find_all(entity_type)? {
                if let Some(name) = storage.try_read_name(id) {
                    println!("{name}\t{id}");
                }
            }
        }
        Commands::AddUser {
            name,
            password,
            hosts,
        } => {
            let mut user = User::new(name);
            if let Some(password) = password {
                user = user.with_password(password);
            }
            if let Some(allowed) = parse_hosts(&hosts)? {
                user = user.with_allowed_hosts(allowed);
            }
            println!("{}", storage.insert(user.into())?);
        }
        Commands::AddRole { name } => {
            println!("{}", storage.insert(Role::new(name).into())?);
        }
        Commands::Rename {
            entity_type,
            old_name,
            new_name,
        } => {
            let id = storage.get_id(entity_type, &old_name)?;
            storage.update(id, &|entity| Ok(entity.with_name(new_name.as_str())))?;
        }
        Commands::Remove { entity_type, names } => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let ids = storage.get_ids(entity_type, &names)?;
            storage.remove_many(&ids)?;
        }
        Commands::Login {
            name,
            password,
            address,
        } => {
            let credentials = match password {
                Some(password) => Credentials::basic(name, password),
                None => Credentials::incomplete(name),
            };
            let id = storage.login(
                &credentials,
                address,
                &ExternalAuthenticators::new(),
                true,
            )?;
            println!("{id}");
        }
    }
    Ok(())
}

/// Builds an allow-list from `--host` values; `None` keeps the user default.
fn parse_hosts(patterns: &[String]) -> Result<Option<AllowedClientHosts>, HostPatternError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut allowed = AllowedClientHosts::none();
    for pattern in patterns {
        allowed.add_pattern(pattern)?;
    }
    Ok(Some(allowed))
}

fn parse_entity_type(value: &str) -> Result<EntityType, String> {
    EntityType::parse(value).ok_or_else(|| {
        let known: Vec<&str> = EntityType::ALL.iter().map(|t| t.as_str()).collect();
        format!("unknown entity type `{value}`; expected {}", known.join("|"))
    })
}
