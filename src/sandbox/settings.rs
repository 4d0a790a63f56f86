//! Prescribed sandbox setting templates.

use crate::error::SandboxError;
use crate::pipe::local_to_nt_namespace;

/// A reasonable minimal sandbox. Sandboxie may add compatibility templates of
/// its own when the control UI restarts.
const DEFAULT_TEMPLATE: &[&str] = &[
    "Enabled=y",
    "ConfigLevel=7",
    "BlockNetworkFiles=y",
    "Template=WindowsFontCache",
    "Template=BlockPorts",
    "Template=LingerPrograms",
    "BorderColor=#00FFFF,ttl",
];

/// Names accepted by [`make_sandbox_setting`].
pub const TEMPLATE_NAMES: &[&str] = &["default", "piped_execution"];

/// Setting lines of one named template.
///
/// `piped_execution` grants the sandbox access to every pipe whose name starts
/// with `pipe_prefix`.
///
/// # Errors
///
/// Returns `SandboxError::UnknownTemplate` for unknown names, or a channel error
/// if `pipe_prefix` is not a local pipe name.
pub fn template(name: &str, pipe_prefix: &str) -> Result<Vec<String>, SandboxError> {
    match name {
        "default" => Ok(DEFAULT_TEMPLATE.iter().map(ToString::to_string).collect()),
        "piped_execution" => {
            let nt_prefix = local_to_nt_namespace(pipe_prefix)?;
            Ok(vec![format!("OpenPipePath={nt_prefix}*")])
        }
        other => Err(SandboxError::UnknownTemplate {
            name: other.to_string(),
        }),
    }
}

/// Composes sandbox settings from comma-separated `templates` followed by `extra` lines.
///
/// An empty `templates` string selects no template.
///
/// # Errors
///
/// See [`template`].
///
/// # Example
///
/// ```
/// use sandboxie_bridge::sandbox::make_sandbox_setting;
///
/// let lines = make_sandbox_setting(
///     "default,piped_execution",
///     &["Template=OpenSmartCard".to_string()],
///     r"\\.\pipe\sandboxie_bridge_pipe",
/// )
/// .unwrap();
///
/// assert_eq!(lines[0], "Enabled=y");
/// assert!(lines.contains(&r"OpenPipePath=\Device\NamedPipe\sandboxie_bridge_pipe*".to_string()));
/// assert_eq!(lines.last().unwrap(), "Template=OpenSmartCard");
/// ```
pub fn make_sandbox_setting(
    templates: &str,
    extra: &[String],
    pipe_prefix: &str,
) -> Result<Vec<String>, SandboxError> {
    let mut lines = Vec::new();
    for name in templates.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        lines.extend(template(name, pipe_prefix)?);
    }
    lines.extend(extra.iter().cloned());
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX: &str = r"\\.\pipe\sandboxie_bridge_pipe";

    #[test]
    fn test_default_template() {
        let lines = make_sandbox_setting("default", &[], PREFIX).unwrap();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "Enabled=y");
        assert_eq!(lines[6], "BorderColor=#00FFFF,ttl");
    }

    #[test]
    fn test_piped_execution_template() {
        let lines = make_sandbox_setting("piped_execution", &[], PREFIX).unwrap();
        assert_eq!(
            lines,
            [r"OpenPipePath=\Device\NamedPipe\sandboxie_bridge_pipe*"]
        );
    }

    #[test]
    fn test_no_templates_keeps_extra_only() {
        let extra = vec!["Enabled=y".to_string()];
        assert_eq!(make_sandbox_setting("", &extra, PREFIX).unwrap(), extra);
    }

    #[test]
    fn test_extra_lines_follow_templates() {
        let extra = vec!["OpenFilePath=C:\\data".to_string()];
        let lines = make_sandbox_setting("default, piped_execution", &extra, PREFIX).unwrap();
        assert_eq!(lines.len(), 9);
        assert!(lines[7].starts_with("OpenPipePath="));
        assert_eq!(lines[8], extra[0]);
    }

    #[test]
    fn test_unknown_template() {
        let result = make_sandbox_setting("default,nosuch", &[], PREFIX);
        assert!(matches!(
            result,
            Err(SandboxError::UnknownTemplate { name }) if name == "nosuch"
        ));
    }

    #[test]
    fn test_every_listed_template_resolves() {
        for name in TEMPLATE_NAMES {
            assert!(template(name, PREFIX).is_ok(), "{name}");
        }
    }
}
