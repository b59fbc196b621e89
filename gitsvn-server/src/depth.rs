//! Working-copy depth policy
//!
//! A report entry declares how deep the client's knowledge of a directory
//! goes; the command declares how deep the operation should reach. The
//! combination decides, per child entry, whether to visit it, skip it, or
//! upgrade it (treat as absent on the client and send a full add).

/// Client-declared depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Empty,
    Files,
    Immediates,
    Infinity,
    Unknown,
}

/// Per-child traversal decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthAction {
    Normal,
    Skip,
    Upgrade,
}

impl Depth {
    pub fn parse(word: &str) -> Depth {
        match word {
            "empty" => Depth::Empty,
            "files" => Depth::Files,
            "immediates" => Depth::Immediates,
            "infinity" => Depth::Infinity,
            _ => Depth::Unknown,
        }
    }

    pub fn word(&self) -> &'static str {
        match self {
            Depth::Empty => "empty",
            Depth::Files => "files",
            Depth::Immediates => "immediates",
            Depth::Infinity => "infinity",
            Depth::Unknown => "unknown",
        }
    }

    /// Depth assumed for a child directory that was not explicitly reported.
    pub fn deepen(self) -> Depth {
        match self {
            Depth::Infinity => Depth::Infinity,
            Depth::Unknown => Depth::Unknown,
            _ => Depth::Empty,
        }
    }

    /// Decision for a child entry, given this working-copy depth and the
    /// requested operation depth.
    pub fn determine_action(self, requested: Depth, is_dir: bool) -> DepthAction {
        match self {
            // The client holds the full subtree; unknown reports date from
            // clients without depth support and mean the same.
            Depth::Infinity | Depth::Unknown => DepthAction::Normal,
            Depth::Empty => match requested {
                Depth::Empty | Depth::Unknown => DepthAction::Skip,
                Depth::Files => {
                    if is_dir {
                        DepthAction::Skip
                    } else {
                        DepthAction::Upgrade
                    }
                }
                Depth::Immediates | Depth::Infinity => DepthAction::Upgrade,
            },
            Depth::Files => {
                if !is_dir {
                    DepthAction::Normal
                } else {
                    match requested {
                        Depth::Immediates | Depth::Infinity => DepthAction::Upgrade,
                        _ => DepthAction::Skip,
                    }
                }
            }
            // Children themselves are known; grandchildren are governed by
            // the deepened per-child depth.
            Depth::Immediates => DepthAction::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_words() {
        assert_eq!(Depth::parse("files"), Depth::Files);
        assert_eq!(Depth::parse("infinity"), Depth::Infinity);
        assert_eq!(Depth::parse("bogus"), Depth::Unknown);
        assert_eq!(Depth::parse(Depth::Immediates.word()), Depth::Immediates);
    }

    #[test]
    fn test_infinity_visits_everything() {
        for requested in [Depth::Empty, Depth::Files, Depth::Infinity] {
            assert_eq!(
                Depth::Infinity.determine_action(requested, true),
                DepthAction::Normal
            );
            assert_eq!(
                Depth::Infinity.determine_action(requested, false),
                DepthAction::Normal
            );
        }
    }

    #[test]
    fn test_empty_upgrades_on_deepening() {
        assert_eq!(
            Depth::Empty.determine_action(Depth::Infinity, true),
            DepthAction::Upgrade
        );
        assert_eq!(
            Depth::Empty.determine_action(Depth::Files, false),
            DepthAction::Upgrade
        );
        assert_eq!(
            Depth::Empty.determine_action(Depth::Files, true),
            DepthAction::Skip
        );
        assert_eq!(
            Depth::Empty.determine_action(Depth::Empty, false),
            DepthAction::Skip
        );
    }

    #[test]
    fn test_files_skips_unrequested_dirs() {
        assert_eq!(
            Depth::Files.determine_action(Depth::Files, true),
            DepthAction::Skip
        );
        assert_eq!(
            Depth::Files.determine_action(Depth::Infinity, true),
            DepthAction::Upgrade
        );
        assert_eq!(
            Depth::Files.determine_action(Depth::Empty, false),
            DepthAction::Normal
        );
    }

    #[test]
    fn test_deepen() {
        assert_eq!(Depth::Infinity.deepen(), Depth::Infinity);
        assert_eq!(Depth::Immediates.deepen(), Depth::Empty);
        assert_eq!(Depth::Unknown.deepen(), Depth::Unknown);
    }
}
