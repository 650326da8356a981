//! Process table scanning
//!
//! Enumerates live processes and their argument vectors.

mod exe;
mod procfs;

pub use exe::{find_exe, which, ExeError};
pub use procfs::{ProcfsScanner, DEFAULT_PROC_ROOT};

/// Split a NUL-delimited cmdline buffer into arguments
///
/// Empty chunks (including the trailing terminator) are dropped.
pub fn parse_cmdline(content: &[u8]) -> Vec<String> {
    content
        .split(|b| *b == 0)
        .filter(|chunk| !chunk.is_empty())
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cmdline() {
        assert_eq!(
            parse_cmdline(b"sh\0app.sh\0--flag\0"),
            vec!["sh", "app.sh", "--flag"]
        );
    }

    #[test]
    fn test_parse_cmdline_empty() {
        assert!(parse_cmdline(b"").is_empty());
        assert!(parse_cmdline(b"\0\0").is_empty());
    }

    #[test]
    fn test_parse_cmdline_without_terminator() {
        assert_eq!(parse_cmdline(b"/usr/bin/python3\0-m\0http.server"), vec![
            "/usr/bin/python3",
            "-m",
            "http.server"
        ]);
    }
}
