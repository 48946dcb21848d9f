use std::time::Duration;

use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, ConfigLoader};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::Builder;
use aws_smithy_types::timeout::TimeoutConfig;
use aws_types::SdkConfig;
use aws_types::region::Region;

use crate::config::ClientConfig;

impl ClientConfig {
    pub async fn create_client(&self) -> Client {
        let mut config_builder =
            Builder::from(&self.load_sdk_config().await).force_path_style(self.force_path_style);

        if let Some(timeout_config) = self.build_timeout_config() {
            config_builder = config_builder.timeout_config(timeout_config);
        }

        Client::from_conf(config_builder.build())
    }

    async fn load_sdk_config(&self) -> SdkConfig {
        let config_loader = self
            .load_config_credential(aws_config::defaults(BehaviorVersion::latest()))
            .region(RegionProviderChain::first_try(Region::new(self.region.clone())))
            .retry_config(self.build_retry_config())
            .endpoint_url(&self.endpoint_url);

        config_loader.load().await
    }

    fn load_config_credential(&self, config_loader: ConfigLoader) -> ConfigLoader {
        let credentials = aws_sdk_s3::config::Credentials::new(
            self.access_keys.access_key.to_string(),
            self.access_keys.secret_access_key.to_string(),
            None,
            None,
            "",
        );
        config_loader.credentials_provider(credentials)
    }

    fn build_retry_config(&self) -> RetryConfig {
        RetryConfig::standard()
            .with_max_attempts(self.retry_config.aws_max_attempts)
            .with_initial_backoff(Duration::from_millis(
                self.retry_config.initial_backoff_milliseconds,
            ))
    }

    fn build_timeout_config(&self) -> Option<TimeoutConfig> {
        // Setting each timeout to None does not make the SDK fall back to its defaults.
        let operation_timeout = self
            .cli_timeout_config
            .operation_timeout_milliseconds
            .map(Duration::from_millis);
        let connect_timeout = self
            .cli_timeout_config
            .connect_timeout_milliseconds
            .map(Duration::from_millis);
        let read_timeout = self
            .cli_timeout_config
            .read_timeout_milliseconds
            .map(Duration::from_millis);

        if operation_timeout.is_none() && connect_timeout.is_none() && read_timeout.is_none() {
            return None;
        }

        let mut builder = TimeoutConfig::builder();

        if let Some(operation_timeout) = operation_timeout {
            builder = builder.operation_timeout(operation_timeout);
        }
        if let Some(connect_timeout) = connect_timeout {
            builder = builder.connect_timeout(connect_timeout);
        }
        if let Some(read_timeout) = read_timeout {
            builder = builder.read_timeout(read_timeout);
        }

        Some(builder.build())
    }
}
