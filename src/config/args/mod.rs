use crate::Config;
use crate::config::args::value_parser::{
    extension_map, human_bytes, schedule_interval, storage_class, url,
};
use crate::config::{
    BackupConfig, CLITimeoutConfig, DEFAULT_AWS_MAX_ATTEMPTS, DEFAULT_BACKUP_DAYS,
    DEFAULT_INITIAL_BACKOFF_MILLISECONDS, DEFAULT_MAX_THREADS, DEFAULT_NFS_PATH,
    DEFAULT_PROBE_BATCH_SIZE, DEFAULT_REGION, DEFAULT_RETRY_DELAY_SECONDS,
    DEFAULT_UPLOAD_RETRIES, RetryConfig, ScheduleConfig, TracingConfig,
};
use crate::types::{AccessKeys, DEFAULT_STORAGE_CLASS, ScheduleType};
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{Verbosity, WarnLevel};
#[cfg(feature = "version")]
use shadow_rs::shadow;
use std::ffi::OsString;
use std::path::PathBuf;
use std::str::FromStr;

pub(crate) mod value_parser;

const DEFAULT_USER_ID: &str = "default";
const DEFAULT_FILE_CATEGORIES: &str = "full,incremental,metadata,logs";
const DEFAULT_EXTENSION_MAP: &str = ".vbk=full,.vib=incremental,.vbm=metadata,.log=logs";
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_AWS_SDK_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;
const DEFAULT_DRY_RUN: bool = false;
const DEFAULT_SHOW_PROGRESS: bool = false;
const DEFAULT_SKIP_TIME_FILTER: bool = false;
const DEFAULT_VIRTUAL_HOSTED_STYLE: bool = false;
const DEFAULT_PUT_LAST_MODIFIED_METADATA: bool = false;

const MIN_SIZE_OVER_MAX_SIZE: &str = "--min-size must be smaller than or equal to --max-size\n";

#[cfg(feature = "version")]
shadow!(build);

#[derive(Parser, Clone, Debug)]
#[cfg_attr(feature = "version", command(version=format!("{} ({} {}), {}", build::PKG_VERSION, build::SHORT_COMMIT, build::BUILD_TARGET, build::RUST_VERSION)))]
pub struct CLIArgs {
    /// user on whose behalf the upload runs. separates statistics and history
    #[arg(long, env = "S3BACKUP_USER", default_value = DEFAULT_USER_ID, value_parser = NonEmptyStringValueParser::new(), help_heading = "General")]
    user_id: String,

    /// scan the source and show the candidates. no objects will be uploaded
    #[arg(long, env, default_value_t = DEFAULT_DRY_RUN, help_heading = "General")]
    dry_run: bool,

    /// show a progress line
    #[arg(long, env, default_value_t = DEFAULT_SHOW_PROGRESS, help_heading = "General")]
    show_progress: bool,

    /// root directory of the backup files
    #[arg(long, env, default_value = DEFAULT_NFS_PATH, value_name = "DIR", help_heading = "Source")]
    nfs_path: PathBuf,

    /// only files modified within this many days are uploaded
    #[arg(long, env, default_value_t = DEFAULT_BACKUP_DAYS, value_parser = clap::value_parser!(i64).range(0..), help_heading = "Source")]
    backup_days: i64,

    /// upload regardless of the modification time
    #[arg(long, env, default_value_t = DEFAULT_SKIP_TIME_FILTER, help_heading = "Source")]
    skip_time_filter: bool,

    /// categories to upload, separated by commas
    #[arg(long, env, default_value = DEFAULT_FILE_CATEGORIES, help_heading = "Source")]
    file_categories: String,

    /// extension to category mapping. example: .vbk=full,.vib=incremental
    #[arg(long, env, default_value = DEFAULT_EXTENSION_MAP, value_parser = extension_map::check_extension_map, help_heading = "Source")]
    extension_map: String,

    /// accept only these extensions, separated by commas. overrides the category mapping
    #[arg(long, env, help_heading = "Source")]
    extensions: Option<String>,

    /// skip files smaller than this size. allow suffixes: KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, env, value_parser = human_bytes::check_file_size, help_heading = "Source")]
    min_size: Option<String>,

    /// skip files larger than this size. allow suffixes: KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, env, value_parser = human_bytes::check_file_size, help_heading = "Source")]
    max_size: Option<String>,

    /// endpoint URL of the S3-compatible server. example: http://minio.local:9000
    #[arg(long, env, value_parser = url::check_scheme, help_heading = "S3")]
    s3_endpoint: Option<String>,

    #[arg(long, env, help_heading = "S3")]
    s3_bucket: Option<String>,

    #[arg(long, env, hide_env_values = true, help_heading = "S3")]
    s3_access_key: Option<String>,

    #[arg(long, env, hide_env_values = true, help_heading = "S3")]
    s3_secret_key: Option<String>,

    #[arg(long, env = "S3_REGION", default_value = DEFAULT_REGION, help_heading = "S3")]
    region: String,

    /// use virtual hosted style requests instead of path style
    #[arg(long, env, default_value_t = DEFAULT_VIRTUAL_HOSTED_STYLE, help_heading = "S3")]
    virtual_hosted_style: bool,

    /// number of parallel uploads
    #[arg(long, env, default_value_t = DEFAULT_MAX_THREADS, value_parser = clap::value_parser!(u16).range(1..), help_heading = "Upload")]
    max_threads: u16,

    /// valid choices: STANDARD | REDUCED_REDUNDANCY | STANDARD_IA | ONEZONE_IA | INTELLIGENT_TIERING | GLACIER | DEEP_ARCHIVE | GLACIER_IR
    #[arg(long, env, default_value = DEFAULT_STORAGE_CLASS, value_parser = storage_class::parse_storage_class, help_heading = "Upload")]
    storage_class: String,

    /// retries of one file after the first failed attempt
    #[arg(long, env, default_value_t = DEFAULT_UPLOAD_RETRIES, help_heading = "Upload")]
    upload_retries: u32,

    /// seconds to wait between retries of one file
    #[arg(long, env, default_value_t = DEFAULT_RETRY_DELAY_SECONDS, value_name = "SECONDS", help_heading = "Upload")]
    retry_delay: u64,

    /// files uploaded first to check that the destination accepts uploads. 0 disables the check
    #[arg(long, env, default_value_t = DEFAULT_PROBE_BATCH_SIZE, help_heading = "Upload")]
    probe_batch_size: usize,

    /// put the last modified time of the file to user defined metadata
    #[arg(long, env, default_value_t = DEFAULT_PUT_LAST_MODIFIED_METADATA, help_heading = "Upload")]
    put_last_modified_metadata: bool,

    /// run resident and upload every N minutes
    #[arg(long, env, conflicts_with = "schedule_cron", value_name = "MINUTES", value_parser = schedule_interval::check_interval_minutes, help_heading = "Schedule")]
    schedule_interval: Option<String>,

    /// run resident and upload on a 5-field cron expression. example: "0 2 * * *"
    #[arg(long, env, value_name = "EXPRESSION", value_parser = schedule_interval::check_cron_expression, help_heading = "Schedule")]
    schedule_cron: Option<String>,

    /// trace verbosity(-v: show info, -vv: show debug, -vvv show trace)
    #[clap(flatten)]
    verbosity: Verbosity<WarnLevel>,

    /// show trace as json format
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Tracing/Logging")]
    json_tracing: bool,

    /// enable aws sdk tracing
    #[arg(long, env, default_value_t = DEFAULT_AWS_SDK_TRACING, help_heading = "Tracing/Logging")]
    aws_sdk_tracing: bool,

    /// show span event tracing
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Tracing/Logging")]
    span_events_tracing: bool,

    /// disable ANSI terminal colors
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Tracing/Logging")]
    disable_color_tracing: bool,

    /// maximum retry attempts of one S3 request in the AWS SDK
    #[arg(long, env, default_value_t = DEFAULT_AWS_MAX_ATTEMPTS, value_name = "max_attempts", help_heading = "Retry Options")]
    aws_max_attempts: u32,

    /// a multiplier value used when calculating backoff times as part of an exponential backoff with jitter strategy.
    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, value_name = "initial_backoff", help_heading = "Retry Options")]
    initial_backoff_milliseconds: u64,

    /// operation timeout (milliseconds). For details, see the AWS SDK for Rust TimeoutConfig documentation.
    /// The default has no timeout.
    #[arg(
        long,
        env,
        value_name = "operation_timeout",
        help_heading = "Timeout Options"
    )]
    operation_timeout_milliseconds: Option<u64>,

    /// connect timeout (milliseconds).
    /// The default has AWS SDK default timeout (Currently 3100 milliseconds).
    #[arg(
        long,
        env,
        value_name = "connect_timeout",
        help_heading = "Timeout Options"
    )]
    connect_timeout_milliseconds: Option<u64>,

    /// read timeout (milliseconds).
    /// The default has no timeout.
    #[arg(
        long,
        env,
        value_name = "read_timeout",
        help_heading = "Timeout Options"
    )]
    read_timeout_milliseconds: Option<u64>,

    /// generate a auto completions script. Valid values: bash, fish, zsh, powershell, elvish.
    #[arg(long, env, value_name = "SHELL", value_parser = clap_complete::shells::Shell::from_str, help_heading = "Advanced")]
    auto_complete_shell: Option<clap_complete::shells::Shell>,
}

pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let config_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    crate::Config::try_from(config_args)
}

impl CLIArgs {
    fn check_size_range(&self, min_size: Option<u64>, max_size: Option<u64>) -> Result<(), String> {
        if let (Some(min_size), Some(max_size)) = (min_size, max_size) {
            if max_size < min_size {
                return Err(MIN_SIZE_OVER_MAX_SIZE.to_string());
            }
        }
        Ok(())
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let tracing_config = self.verbosity.log_level().map(|log_level| TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            aws_sdk_tracing: self.aws_sdk_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        });

        if !self.dry_run {
            return tracing_config;
        }

        // dry-run reports through info level events.
        match tracing_config {
            None => Some(TracingConfig {
                tracing_level: log::Level::Info,
                json_tracing: DEFAULT_JSON_TRACING,
                aws_sdk_tracing: DEFAULT_AWS_SDK_TRACING,
                span_events_tracing: DEFAULT_SPAN_EVENTS_TRACING,
                disable_color_tracing: DEFAULT_DISABLE_COLOR_TRACING,
            }),
            Some(config) if config.tracing_level < log::Level::Info => Some(TracingConfig {
                tracing_level: log::Level::Info,
                ..config
            }),
            config => config,
        }
    }

    fn build_schedule_config(&self) -> Option<ScheduleConfig> {
        if let Some(interval) = &self.schedule_interval {
            return Some(ScheduleConfig {
                schedule_type: ScheduleType::Interval,
                interval: interval.clone(),
            });
        }

        self.schedule_cron.as_ref().map(|expression| ScheduleConfig {
            schedule_type: ScheduleType::Cron,
            interval: expression.clone(),
        })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(value: CLIArgs) -> Result<Self, Self::Error> {
        let min_size = value
            .min_size
            .as_deref()
            .map(human_bytes::parse_file_size)
            .transpose()?;
        let max_size = value
            .max_size
            .as_deref()
            .map(human_bytes::parse_file_size)
            .transpose()?;
        value.check_size_range(min_size, max_size)?;

        let extension_map = extension_map::parse_extension_map(&value.extension_map)?;
        let extensions = value
            .extensions
            .as_deref()
            .map(extension_map::parse_list)
            .filter(|extensions| !extensions.is_empty());

        let tracing_config = value.build_tracing_config();
        let schedule = value.build_schedule_config();

        let backup_config = BackupConfig {
            nfs_path: value.nfs_path,
            s3_endpoint: value.s3_endpoint.unwrap_or_default(),
            s3_bucket: value.s3_bucket.unwrap_or_default(),
            access_keys: AccessKeys {
                access_key: value.s3_access_key.unwrap_or_default(),
                secret_access_key: value.s3_secret_key.unwrap_or_default(),
            },
            region: value.region,
            force_path_style: !value.virtual_hosted_style,
            max_threads: value.max_threads,
            backup_days: value.backup_days,
            storage_class: value.storage_class,
            upload_retries: value.upload_retries,
            retry_delay_seconds: value.retry_delay,
            file_categories: extension_map::parse_list(&value.file_categories),
            extension_map,
            extensions,
            min_size,
            max_size,
            skip_time_filter: value.skip_time_filter,
            probe_batch_size: value.probe_batch_size,
            put_last_modified_metadata: value.put_last_modified_metadata,
            retry_config: RetryConfig {
                aws_max_attempts: value.aws_max_attempts,
                initial_backoff_milliseconds: value.initial_backoff_milliseconds,
            },
            cli_timeout_config: CLITimeoutConfig {
                operation_timeout_milliseconds: value.operation_timeout_milliseconds,
                connect_timeout_milliseconds: value.connect_timeout_milliseconds,
                read_timeout_milliseconds: value.read_timeout_milliseconds,
            },
        };

        Ok(Config {
            user_id: value.user_id,
            backup_config,
            schedule,
            tracing_config,
            dry_run: value.dry_run,
            show_progress: value.show_progress,
            auto_complete_shell: value.auto_complete_shell,
        })
    }
}
