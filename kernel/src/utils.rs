//! Various utility functions/macros used throughout the kernel
use std::borrow::Cow;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use url::Url;

use crate::{Error, LayoutResult};

/// convenient way to return an error if a condition isn't true
macro_rules! require {
    ( $cond:expr, $err:expr ) => {
        if !($cond) {
            return Err($err);
        }
    };
}

pub(crate) use require;

/// Try to parse string uri into a URL for a table path. Tables live on the local filesystem, so
/// both `/local/paths` and `file:///` urls are accepted; any other scheme is rejected.
pub(crate) fn try_parse_table_uri(uri: impl AsRef<str>) -> LayoutResult<Url> {
    let uri = uri.as_ref();
    let path = resolve_local_path(uri)?;
    require!(
        path.exists(),
        Error::InvalidTableLocation(format!("Path does not exist: {path:?}"))
    );
    require!(
        path.is_dir(),
        Error::InvalidTableLocation(format!("{path:?} is not a directory"))
    );
    let path = std::fs::canonicalize(&path).map_err(|err| {
        Error::InvalidTableLocation(format!("Invalid table location: {uri} Error: {err:?}"))
    })?;
    Url::from_directory_path(&path).map_err(|_| {
        Error::InvalidTableLocation(format!(
            "Could not construct a URL from canonicalized path: {path:?}"
        ))
    })
}

/// Figure out whether the string is a local path or a `file://` url, returning the local path in
/// both cases.
fn resolve_local_path(table_uri: &str) -> LayoutResult<PathBuf> {
    let table_uri = if table_uri.ends_with('/') {
        Cow::Borrowed(table_uri)
    } else {
        Cow::Owned(format!("{table_uri}/"))
    };
    match Url::parse(&table_uri) {
        Ok(url) if url.scheme() == "file" => url
            .to_file_path()
            .map_err(|_| Error::invalid_table_location(table_uri)),
        // a single character scheme is a windows drive letter
        Ok(url) if url.scheme().len() == 1 => Ok(PathBuf::from(table_uri.as_ref())),
        Ok(url) => Err(Error::invalid_table_location(format!(
            "unsupported scheme '{}' in {table_uri}, tables must be local",
            url.scheme()
        ))),
        Err(_) => Ok(table_uri.trim_end_matches('/').into()),
    }
}

/// Returns the current time in milliseconds since Unix epoch.
pub(crate) fn current_time_ms() -> LayoutResult<i64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::generic(format!("System time before Unix epoch: {e}")))?;
    i64::try_from(duration.as_millis())
        .map_err(|_| Error::generic("Current timestamp exceeds i64 millisecond range"))
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::LayoutResult;

    /// Assert that `result` is an error whose message contains `message`.
    pub(crate) fn assert_result_error_with_message<T: std::fmt::Debug>(
        result: LayoutResult<T>,
        message: &str,
    ) {
        match result {
            Ok(value) => panic!("expected an error containing '{message}', got {value:?}"),
            Err(err) => assert!(
                err.to_string().contains(message),
                "expected an error containing '{message}', got '{err}'"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_path_is_a_directory_url() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("table");
        std::fs::create_dir(&table).unwrap();
        let url = try_parse_table_uri(table.to_str().unwrap()).unwrap();
        assert_eq!(url.scheme(), "file");
        assert!(url.path().ends_with("/table/"));
    }

    #[test]
    fn missing_path_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("nested").join("table");
        crate::utils::test_utils::assert_result_error_with_message(
            try_parse_table_uri(table.to_str().unwrap()),
            "Path does not exist",
        );
        assert!(!dir.path().join("nested").exists());
    }

    #[test]
    fn file_url_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let file_url = Url::from_directory_path(dir.path()).unwrap();
        let url = try_parse_table_uri(file_url.as_str()).unwrap();
        assert_eq!(url.to_file_path().unwrap(), dir.path().canonicalize().unwrap());
    }

    #[test]
    fn remote_scheme_is_rejected() {
        crate::utils::test_utils::assert_result_error_with_message(
            try_parse_table_uri("s3://bucket/table"),
            "tables must be local",
        );
    }

    #[test]
    fn file_is_not_a_table() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.parquet");
        std::fs::write(&file, b"not a table").unwrap();
        crate::utils::test_utils::assert_result_error_with_message(
            try_parse_table_uri(file.to_str().unwrap()),
            "is not a directory",
        );
    }
}
