use std::io::IsTerminal;

use s3backup::Config;

pub fn is_progress_indicator_needed(config: &Config) -> bool {
    if config.dry_run {
        return false;
    }
    if config.show_progress {
        return true;
    }

    is_quieter_than_info(config) && std::io::stdout().is_terminal()
}

fn is_quieter_than_info(config: &Config) -> bool {
    config.tracing_config.as_ref().is_none_or(|tracing_config| {
        tracing_config.tracing_level < log::Level::Info && !tracing_config.json_tracing
    })
}
