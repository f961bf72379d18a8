//! Executable resolution and argument handling shared by the backends.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Flags that mean the user already chose an approval policy.
const APPROVAL_FLAGS: &[&str] = &[
    "--yolo",
    "--bypass-approvals-and-sandbox",
    "-a",
    "--ask-for-approval",
];

/// Resolve `bin` to a launch prefix: the program plus any wrapper arguments.
///
/// Names without a path separator are looked up on `PATH`. On Windows a
/// `.ps1` script is run through PowerShell and a `.cmd`/`.bat` file through
/// `cmd.exe`. An unresolvable name is returned unchanged so the spawn fails
/// with a not-found error.
pub fn launch_prefix(bin: &str) -> (PathBuf, Vec<String>) {
    match resolve_executable(bin, cfg!(windows)) {
        Some(resolved) => wrap_for_platform(resolved, cfg!(windows)),
        None => (PathBuf::from(bin), Vec::new()),
    }
}

/// Find `bin` on `PATH` (or check it directly when it contains a separator).
pub fn resolve_executable(bin: &str, windows: bool) -> Option<PathBuf> {
    let direct = Path::new(bin);
    if direct.components().count() > 1 || direct.is_absolute() {
        return direct.is_file().then(|| direct.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    let candidates = candidate_names(bin, windows);
    std::env::split_paths(&path_var)
        .flat_map(|dir| candidates.iter().map(move |name| dir.join(name)))
        .find(|p| p.is_file())
}

fn candidate_names(bin: &str, windows: bool) -> Vec<String> {
    let mut names = vec![bin.to_string()];
    if windows && Path::new(bin).extension().is_none() {
        for ext in ["exe", "cmd", "bat", "ps1"] {
            names.push(format!("{bin}.{ext}"));
        }
    }
    names
}

/// Wrap non-native executables so they can be spawned directly.
pub fn wrap_for_platform(resolved: PathBuf, windows: bool) -> (PathBuf, Vec<String>) {
    if !windows {
        return (resolved, Vec::new());
    }

    let ext = resolved
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let path = resolved.display().to_string();

    match ext.as_deref() {
        Some("ps1") => (
            PathBuf::from("powershell"),
            vec![
                "-NoProfile".into(),
                "-ExecutionPolicy".into(),
                "Bypass".into(),
                "-File".into(),
                path,
            ],
        ),
        Some("cmd") | Some("bat") => (PathBuf::from("cmd.exe"), vec!["/c".into(), path]),
        _ => (resolved, Vec::new()),
    }
}

/// User-supplied arguments: the pre-split list if non-empty, else the
/// shell-style string split with POSIX rules. A string that cannot be split
/// (unbalanced quotes) yields no arguments.
pub fn user_args(args: &[String], args_str: Option<&str>) -> Vec<String> {
    if !args.is_empty() {
        return args.to_vec();
    }
    let Some(raw) = args_str else {
        return Vec::new();
    };
    match shlex::split(raw) {
        Some(split) => split,
        None => {
            warn!(args = raw, "could not split backend arguments, ignoring them");
            Vec::new()
        }
    }
}

/// Whether `args` already carry an approval/sandbox override.
pub fn has_approval_override(args: &[String]) -> bool {
    args.iter().any(|a| APPROVAL_FLAGS.contains(&a.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_args_take_precedence() {
        let args = vec!["--profile".to_string(), "fast".to_string()];
        assert_eq!(user_args(&args, Some("--yolo")), args);
    }

    #[test]
    fn string_args_are_shell_split() {
        let split = user_args(&[], Some(r#"--profile "my profile" -c key=1"#));
        assert_eq!(split, vec!["--profile", "my profile", "-c", "key=1"]);
    }

    #[test]
    fn unbalanced_quotes_yield_nothing() {
        assert!(user_args(&[], Some(r#"--profile "oops"#)).is_empty());
        assert!(user_args(&[], None).is_empty());
    }

    #[test]
    fn approval_override_detection() {
        assert!(has_approval_override(&["--yolo".into()]));
        assert!(has_approval_override(&["-a".into(), "on-request".into()]));
        assert!(!has_approval_override(&["--profile".into(), "fast".into()]));
    }

    #[test]
    fn windows_wrappers() {
        let (program, args) = wrap_for_platform(PathBuf::from(r"C:\bin\codex.ps1"), true);
        assert_eq!(program, PathBuf::from("powershell"));
        assert_eq!(args[..4], ["-NoProfile", "-ExecutionPolicy", "Bypass", "-File"]);

        let (program, args) = wrap_for_platform(PathBuf::from(r"C:\bin\codex.CMD"), true);
        assert_eq!(program, PathBuf::from("cmd.exe"));
        assert_eq!(args[0], "/c");

        let (program, args) = wrap_for_platform(PathBuf::from(r"C:\bin\codex.exe"), true);
        assert_eq!(program, PathBuf::from(r"C:\bin\codex.exe"));
        assert!(args.is_empty());
    }

    #[test]
    fn native_executables_are_not_wrapped() {
        let (program, args) = wrap_for_platform(PathBuf::from("/usr/bin/codex.ps1"), false);
        assert_eq!(program, PathBuf::from("/usr/bin/codex.ps1"));
        assert!(args.is_empty());
    }

    #[test]
    fn windows_candidates_include_script_extensions() {
        let names = candidate_names("codex", true);
        assert!(names.contains(&"codex.ps1".to_string()));
        assert_eq!(candidate_names("codex", false), vec!["codex"]);
    }

    #[test]
    fn unresolvable_name_is_passed_through() {
        let (program, args) = launch_prefix("kanjigen-definitely-not-installed");
        assert_eq!(program, PathBuf::from("kanjigen-definitely-not-installed"));
        assert!(args.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn resolves_from_path() {
        assert!(resolve_executable("sh", false).is_some());
    }
}
