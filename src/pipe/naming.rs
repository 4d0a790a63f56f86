//! Channel naming: unique name generation and namespace translation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ChannelError;

/// Prefix of a local named pipe in the user-facing path form.
pub const LOCAL_PIPE_PREFIX: &str = r"\\.\pipe\";

/// Prefix of a named pipe in the kernel object namespace.
pub const NT_PIPE_PREFIX: &str = r"\Device\NamedPipe\";

/// Process-wide counter for [`unique_name`].
///
/// Starts at zero when the process starts, only ever incremented, never reset.
/// Atomic so names stay unique when several threads launch at once.
static NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates a channel name of the form `<prefix>_<unix-nanos>_<counter>`.
///
/// The counter makes names unique within the process even when the clock
/// does not advance between calls; the timestamp separates processes.
#[must_use]
pub fn unique_name(prefix: &str) -> String {
    let count = NAME_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{prefix}_{nanos}_{count}")
}

/// Converts `\\.\pipe\<name>` into its kernel namespace form `\Device\NamedPipe\<name>`.
///
/// Used when granting a sandbox access to a (wildcarded) pipe prefix.
///
/// # Errors
///
/// Returns `ChannelError::InvalidName` if `name` does not start with `\\.\pipe\`.
pub fn local_to_nt_namespace(name: &str) -> Result<String, ChannelError> {
    name.strip_prefix(LOCAL_PIPE_PREFIX)
        .map(|rest| format!("{NT_PIPE_PREFIX}{rest}"))
        .ok_or_else(|| ChannelError::InvalidName {
            name: name.to_string(),
        })
}

/// NUL-terminated UTF-16 form of a pipe name, as the wide OS calls expect it.
#[cfg(windows)]
pub(crate) fn to_wide(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(std::iter::once(0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_name_has_prefix() {
        let name = unique_name(r"\\.\pipe\testpipe");
        assert!(name.starts_with(r"\\.\pipe\testpipe_"));
        assert_eq!(name.split('_').count(), 3);
    }

    #[test]
    fn test_unique_name_never_repeats() {
        let names: std::collections::HashSet<String> =
            (0..1000).map(|_| unique_name("p")).collect();
        assert_eq!(names.len(), 1000);
    }

    #[test]
    fn test_local_to_nt_namespace() {
        assert_eq!(
            local_to_nt_namespace(r"\\.\pipe\testname").unwrap(),
            r"\Device\NamedPipe\testname"
        );
    }

    #[test]
    fn test_local_to_nt_namespace_keeps_wildcards() {
        assert_eq!(
            local_to_nt_namespace(r"\\.\pipe\prefix_*").unwrap(),
            r"\Device\NamedPipe\prefix_*"
        );
    }

    #[test]
    fn test_local_to_nt_namespace_rejects_other_forms() {
        for name in [r"\\.\nonpipe\testname", r"\\server\pipe\x", "pipe", ""] {
            assert!(
                matches!(
                    local_to_nt_namespace(name),
                    Err(ChannelError::InvalidName { .. })
                ),
                "{name} should be rejected"
            );
        }
    }
}
