//! Exec argument validation: rejects shell metacharacters in the command and its arguments.
//!
//! Runs before policy evaluation and independently of how the process is spawned.

use tollgate_core::GatewayError;
use tracing::warn;

/// Literal substrings that are rejected anywhere in the command or any single argument.
pub const DANGEROUS_SEQUENCES: &[&str] = &[";", "|", "&&", "||", ">", "<", "$(", "`", "${"];

fn find_dangerous(value: &str) -> Option<&'static str> {
    DANGEROUS_SEQUENCES
        .iter()
        .copied()
        .find(|seq| value.contains(*seq))
}

/// Validate the raw command string and every argument.
pub fn validate_exec_arguments(command: &str, args: &[String]) -> Result<(), GatewayError> {
    if let Some(seq) = find_dangerous(command) {
        warn!(sequence = %seq, "Rejected command containing shell metacharacter");
        return Err(GatewayError::ValidationFailed(format!(
            "command contains forbidden sequence '{seq}'"
        )));
    }

    for (index, arg) in args.iter().enumerate() {
        if let Some(seq) = find_dangerous(arg) {
            warn!(sequence = %seq, index, "Rejected argument containing shell metacharacter");
            return Err(GatewayError::ValidationFailed(format!(
                "argument {index} contains forbidden sequence '{seq}'"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn rejects_chained_command_in_argument() {
        let err = validate_exec_arguments("echo", &args(&["a", "b; rm -rf /"])).unwrap_err();
        assert!(err.to_string().contains("argument 1"));
    }

    #[test]
    fn accepts_ordinary_download_arguments() {
        let ok = validate_exec_arguments(
            "yt-dlp",
            &args(&["--output", "video.mp4", "https://example.com/v"]),
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn rejects_every_sequence_in_command_and_args() {
        for seq in DANGEROUS_SEQUENCES {
            let cmd = format!("ls{seq}x");
            assert!(validate_exec_arguments(&cmd, &[]).is_err(), "command {seq}");
            let arg = format!("pre{seq}post");
            assert!(
                validate_exec_arguments("ls", &args(&[arg.as_str()])).is_err(),
                "argument {seq}"
            );
        }
    }

    #[test]
    fn single_ampersand_and_dollar_are_fine() {
        assert!(validate_exec_arguments("curl", &args(&["https://a.example/?x=1&y=2", "$HOME"])).is_ok());
    }
}
