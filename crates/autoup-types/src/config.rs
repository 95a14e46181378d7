//! Configuration types for autoup
//!
//! Small validated value types shared by the configuration layer and the sync core.

use std::fmt;
use std::str::FromStr;

/// Path convention of one side of a mirror
///
/// Decides which separator joins path components. Parsed case-insensitively from the operating
/// system names used in project configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "String", into = "String")
)]
pub enum PathStyle {
    /// Forward slash separated paths (Linux, macOS)
    Unix,
    /// Backslash separated paths
    Windows,
}

impl PathStyle {
    /// Separator character of this style
    pub fn separator(self) -> char {
        match self {
            Self::Unix => '/',
            Self::Windows => '\\',
        }
    }

    /// Style of the host this process runs on
    pub fn native() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    /// Canonical configuration name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unix => "linux",
            Self::Windows => "windows",
        }
    }
}

impl Default for PathStyle {
    fn default() -> Self {
        Self::native()
    }
}

impl fmt::Display for PathStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PathStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linux" | "unix" | "mac" | "macos" => Ok(Self::Unix),
            "windows" => Ok(Self::Windows),
            other => Err(format!("Unknown operating system '{}'", other)),
        }
    }
}

impl TryFrom<String> for PathStyle {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PathStyle> for String {
    fn from(style: PathStyle) -> Self {
        style.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("LINUX", PathStyle::Unix)]
    #[case("linux", PathStyle::Unix)]
    #[case("Mac", PathStyle::Unix)]
    #[case("macos", PathStyle::Unix)]
    #[case("unix", PathStyle::Unix)]
    #[case("WINDOWS", PathStyle::Windows)]
    #[case(" Windows ", PathStyle::Windows)]
    fn test_parse_path_style(#[case] input: &str, #[case] expected: PathStyle) {
        assert_eq!(input.parse::<PathStyle>(), Ok(expected));
    }

    #[test]
    fn test_unknown_path_style() {
        let err = "solaris".parse::<PathStyle>().unwrap_err();
        assert!(err.contains("solaris"));
    }

    #[test]
    fn test_separators() {
        assert_eq!(PathStyle::Unix.separator(), '/');
        assert_eq!(PathStyle::Windows.separator(), '\\');
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for style in [PathStyle::Unix, PathStyle::Windows] {
            assert_eq!(style.to_string().parse::<PathStyle>(), Ok(style));
        }
    }
}
