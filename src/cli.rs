//! Command-line interface and process configuration.
//!
//! Every option can come from a flag or an environment variable; a `.env`
//! file in the working directory is loaded before parsing. Flags win.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::eligibility::EligibilityFilter;
use crate::error::ExtractError;
use crate::extract::{DEFAULT_AGE_PATTERN, DEFAULT_GENDER_PATTERN, RegexExtractor};
use crate::models::Gender;
use crate::outputs::mail::{DEFAULT_MAIL_API_URL, MailCredentials};
use crate::retry::RetryPolicy;
use crate::scheduler::ActiveWindow;
use crate::scrapers::sfspca::DEFAULT_LISTING_URL;
use crate::store::PoolSettings;

/// Command-line arguments for the adoption watcher.
///
/// # Examples
///
/// ```sh
/// # Scheduler + health endpoint (default)
/// adoption_watch --database-url sqlite://data/items.db
///
/// # One immediate check, ignoring the active window
/// adoption_watch --database-url sqlite://data/items.db run-once
///
/// # Items found in the last week
/// adoption_watch --database-url sqlite://data/items.db list --days 7
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Record store connection string (e.g. sqlite://data/items.db)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Listing page to watch
    #[arg(long, env = "LISTING_URL", default_value = DEFAULT_LISTING_URL)]
    pub listing_url: String,

    #[command(flatten)]
    pub mail: MailArgs,

    #[command(flatten)]
    pub filter: FilterArgs,

    #[command(flatten)]
    pub patterns: PatternArgs,

    #[command(flatten)]
    pub watch: WatchArgs,

    /// Timeout for each page fetch and mail request, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 15)]
    pub fetch_timeout_secs: u64,

    /// Maximum pooled store connections
    #[arg(long, env = "DB_POOL_SIZE", default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    pub pool_size: u32,

    /// Store initialization attempts at startup before giving up
    #[arg(long, env = "DB_INIT_ATTEMPTS", default_value_t = 5)]
    pub init_attempts: usize,

    /// Delay between store initialization attempts, in seconds
    #[arg(long, env = "DB_INIT_DELAY_SECS", default_value_t = 5)]
    pub init_delay_secs: u64,

    /// How the initialization delay grows between attempts
    #[arg(long, env = "DB_INIT_BACKOFF", value_enum, default_value_t = InitBackoff::Fixed)]
    pub init_backoff: InitBackoff,

    /// Upper bound for the exponential initialization delay, in seconds
    #[arg(long, env = "DB_INIT_MAX_DELAY_SECS", default_value_t = 60)]
    pub init_max_delay_secs: u64,

    /// Random extra delay of up to this many milliseconds per attempt
    #[arg(long, env = "DB_INIT_JITTER_MS", default_value_t = 0)]
    pub init_jitter_ms: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Args, Debug, Clone)]
pub struct MailArgs {
    /// Digest sender address
    #[arg(long, env = "KITTY_SENDER_EMAIL")]
    pub sender_email: Option<String>,

    /// API key for the HTTP mail API, sent as a bearer token.
    ///
    /// This is not an SMTP or Gmail app password; digests go through
    /// MAIL_API_URL, so the value must be a key issued by that service.
    #[arg(long, env = "KITTY_APP_PASSWORD", hide_env_values = true)]
    pub app_password: Option<String>,

    /// Digest recipient address
    #[arg(long, env = "KITTY_RECEIVER_EMAIL")]
    pub receiver_email: Option<String>,

    /// HTTP mail API endpoint
    #[arg(long, env = "MAIL_API_URL", default_value = DEFAULT_MAIL_API_URL)]
    pub mail_api_url: String,
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Oldest age, in months, that still gets notified
    #[arg(long, env = "MAX_AGE_MONTHS", default_value_t = 4)]
    pub max_age_months: u32,

    /// Accepted genders, comma separated (default: any)
    #[arg(long, env = "ACCEPTED_GENDERS", value_delimiter = ',')]
    pub genders: Vec<Gender>,
}

/// Overrides for the detail-page fact patterns.
#[derive(Args, Debug, Clone)]
pub struct PatternArgs {
    /// Age pattern; its first capture group is the age in months
    #[arg(long, env = "AGE_PATTERN")]
    pub age_pattern: Option<String>,

    /// Gender pattern; its first capture group is Male or Female
    #[arg(long, env = "GENDER_PATTERN")]
    pub gender_pattern: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitBackoff {
    /// Same delay before every attempt
    Fixed,
    /// Delay doubles per attempt up to the configured maximum
    Exponential,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Minutes between scheduled checks
    #[arg(long, env = "CHECK_INTERVAL_MINUTES", default_value_t = 15, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_minutes: u64,

    /// First local hour of the active window
    #[arg(long, env = "ACTIVE_WINDOW_START", default_value_t = 9, value_parser = clap::value_parser!(u32).range(0..24))]
    pub window_start_hour: u32,

    /// Local hour at which the active window closes
    #[arg(long, env = "ACTIVE_WINDOW_END", default_value_t = 18, value_parser = clap::value_parser!(u32).range(0..24))]
    pub window_end_hour: u32,

    /// Address for the health and manual-trigger endpoint
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    pub health_addr: SocketAddr,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run checks on a schedule and serve the health endpoint (default)
    Watch,
    /// Run a single check now, regardless of the active window
    RunOnce,
    /// Print stored items
    List {
        /// Only items discovered in the last N days
        #[arg(short, long, value_parser = clap::value_parser!(i64).range(0..))]
        days: Option<i64>,
    },
}

impl Cli {
    pub fn resolved_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Watch)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.pool_size,
            ..PoolSettings::default()
        }
    }

    /// Retry policy for store initialization at startup.
    pub fn init_policy(&self) -> RetryPolicy {
        let delay = Duration::from_secs(self.init_delay_secs);
        let policy = match self.init_backoff {
            InitBackoff::Fixed => RetryPolicy::fixed(self.init_attempts, delay),
            InitBackoff::Exponential => RetryPolicy::exponential(
                self.init_attempts,
                delay,
                Duration::from_secs(self.init_max_delay_secs),
            ),
        };
        policy.with_jitter(Duration::from_millis(self.init_jitter_ms))
    }

    /// Fact extractor, with any pattern overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Pattern`] when an override does not compile.
    pub fn extractor(&self) -> Result<RegexExtractor, ExtractError> {
        let p = &self.patterns;
        if p.age_pattern.is_none() && p.gender_pattern.is_none() {
            return Ok(RegexExtractor::default());
        }
        RegexExtractor::with_patterns(
            p.age_pattern.as_deref().unwrap_or(DEFAULT_AGE_PATTERN),
            p.gender_pattern.as_deref().unwrap_or(DEFAULT_GENDER_PATTERN),
        )
    }

    pub fn eligibility(&self) -> EligibilityFilter {
        let genders = Some(self.filter.genders.clone());
        EligibilityFilter::new(self.filter.max_age_months, genders)
    }

    pub fn mail_credentials(&self) -> Option<MailCredentials> {
        MailCredentials::from_parts(
            self.mail.sender_email.clone(),
            self.mail.app_password.clone(),
            self.mail.receiver_email.clone(),
        )
    }
}

impl WatchArgs {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }

    pub fn window(&self) -> ActiveWindow {
        ActiveWindow::new(self.window_start_hour, self.window_end_hour)
    }
}
