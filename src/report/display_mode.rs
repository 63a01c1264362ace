//! Output mode selection.

/// How results and progress are presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// Live progress lines and a coloured summary
    Text,
    /// No progress, plain summary at the end
    Silent,
    /// Structured JSON report only
    Json,
}

impl DisplayMode {
    /// Determine display mode from the `--json` flag and whether stdout is
    /// an interactive terminal.
    ///
    /// The JSON flag always wins. Otherwise a TTY gets [`DisplayMode::Text`]
    /// and anything else [`DisplayMode::Silent`].
    pub fn detect(json_flag: bool, is_tty: bool) -> Self {
        if json_flag {
            DisplayMode::Json
        } else if is_tty {
            DisplayMode::Text
        } else {
            DisplayMode::Silent
        }
    }

    pub fn shows_progress(&self) -> bool {
        matches!(self, DisplayMode::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_json_flag_returns_json_mode() {
        assert_eq!(DisplayMode::detect(true, true), DisplayMode::Json);
        assert_eq!(DisplayMode::detect(true, false), DisplayMode::Json);
    }

    #[test]
    fn test_tty_without_json_returns_text_mode() {
        assert_eq!(DisplayMode::detect(false, true), DisplayMode::Text);
        assert!(DisplayMode::Text.shows_progress());
    }

    #[test]
    fn test_non_tty_without_json_returns_silent_mode() {
        assert_eq!(DisplayMode::detect(false, false), DisplayMode::Silent);
        assert!(!DisplayMode::Silent.shows_progress());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn display_mode_selection_property(
            json_flag in any::<bool>(),
            is_tty in any::<bool>()
        ) {
            let result = DisplayMode::detect(json_flag, is_tty);

            if json_flag {
                prop_assert_eq!(result, DisplayMode::Json);
            } else if is_tty {
                prop_assert_eq!(result, DisplayMode::Text);
            } else {
                prop_assert_eq!(result, DisplayMode::Silent);
            }
        }
    }
}
