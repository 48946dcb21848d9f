use byte_unit::Byte;
use std::str::FromStr;

const OVER_MAX_VALUE: &str = "must be smaller than or equal to 16EiB";

/// File size bound such as `100MiB` or `1073741824`.
pub fn check_file_size(value: &str) -> Result<String, String> {
    parse_file_size(value)?;
    Ok(value.to_string())
}

pub fn parse_file_size(value: &str) -> Result<u64, String> {
    let result = Byte::from_str(value.trim()).map_err(|e| e.to_string())?;
    u64::try_from(result.as_u128()).map_err(|_| OVER_MAX_VALUE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_value() {
        init_dummy_tracing_subscriber();

        assert_eq!(parse_file_size("8MiB").unwrap(), 8 * 1024 * 1024);
        assert_eq!(parse_file_size("5242880").unwrap(), 5 * 1024 * 1024);
        assert_eq!(parse_file_size("1TiB").unwrap(), 1024 * 1024 * 1024 * 1024);
        assert_eq!(parse_file_size("0").unwrap(), 0);
        check_file_size("10GiB").unwrap();
    }

    #[test]
    fn parse_invalid_value() {
        init_dummy_tracing_subscriber();

        assert!(parse_file_size("524287a").is_err());
        assert!(parse_file_size("5Zib").is_err());
        assert!(check_file_size("").is_err());
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
