//! Per-event pass/suppress classification
//!
//! Pure decision logic executed synchronously inside the tap callback for
//! every observed event. Must stay fast and non-blocking: no I/O, no locks
//! shared with the control thread. Side effects are limited to returning a
//! verdict; the caller posts any exit signal asynchronously.

use crate::keys::{KeyCombination, Modifiers};

use super::sequence::ExitSequenceDetector;

/// A keyboard-related event as observed by the tap, reduced to the fields
/// the classifier needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapEvent {
    KeyDown { key_code: u32, modifiers: Modifiers },
    KeyUp { key_code: u32, modifiers: Modifiers },
    FlagsChanged { modifiers: Modifiers },
    /// NX_SYSDEFINED event carrying media/function key presses
    SystemDefined,
}

/// Which trigger path requested the exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitSignal {
    /// The configured exit combination was pressed
    Combination,
    /// The consecutive-Escape fallback sequence completed
    FallbackSequence,
}

impl std::fmt::Display for ExitSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitSignal::Combination => write!(f, "exit combination"),
            ExitSignal::FallbackSequence => write!(f, "fallback sequence"),
        }
    }
}

/// Decision for a single observed event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the event is forwarded to the rest of the system
    pub pass: bool,
    /// Exit signal to post to the coordinator, if any
    pub signal: Option<ExitSignal>,
}

impl Verdict {
    fn suppress() -> Self {
        Self {
            pass: false,
            signal: None,
        }
    }
}

/// Event classifier for one interception run
///
/// Holds the combination snapshot taken at start time (read-only for the
/// duration of the run) and the fallback detector (touched only from the tap
/// thread, which receives events serially).
#[derive(Debug)]
pub struct Classifier {
    exit_combination: KeyCombination,
    sequence: ExitSequenceDetector,
}

impl Classifier {
    pub fn new(exit_combination: KeyCombination) -> Self {
        Self {
            exit_combination,
            sequence: ExitSequenceDetector::new(),
        }
    }

    /// Classify one observed event
    ///
    /// Rules, in order:
    /// 1. System-defined (media key) events are always suppressed.
    /// 2. A key-down matching the exit combination passes through and signals.
    /// 3. Any other key-down feeds the fallback detector and is suppressed;
    ///    the ninth consecutive Escape signals.
    /// 4. Everything else is suppressed.
    pub fn classify(&mut self, event: TapEvent) -> Verdict {
        match event {
            TapEvent::SystemDefined => Verdict::suppress(),
            TapEvent::KeyDown {
                key_code,
                modifiers,
            } => {
                if self.exit_combination.matches_event(key_code, modifiers) {
                    return Verdict {
                        pass: true,
                        signal: Some(ExitSignal::Combination),
                    };
                }

                if self.sequence.observe_key_down(key_code) {
                    return Verdict {
                        pass: false,
                        signal: Some(ExitSignal::FallbackSequence),
                    };
                }

                Verdict::suppress()
            }
            TapEvent::KeyUp { .. } | TapEvent::FlagsChanged { .. } => Verdict::suppress(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{ESCAPE_KEY_CODE, KEY_CODE_L};

    fn key_down(key_code: u32, modifiers: Modifiers) -> TapEvent {
        TapEvent::KeyDown {
            key_code,
            modifiers,
        }
    }

    fn default_classifier() -> Classifier {
        Classifier::new(KeyCombination::new(KEY_CODE_L, Modifiers::command_shift()))
    }

    #[test]
    fn test_media_key_always_suppressed() {
        let mut classifier = default_classifier();
        let verdict = classifier.classify(TapEvent::SystemDefined);
        assert!(!verdict.pass);
        assert!(verdict.signal.is_none());
    }

    #[test]
    fn test_media_key_does_not_disturb_sequence() {
        let mut classifier = default_classifier();

        for _ in 0..8 {
            classifier.classify(key_down(ESCAPE_KEY_CODE, Modifiers::default()));
        }
        classifier.classify(TapEvent::SystemDefined);

        let verdict = classifier.classify(key_down(ESCAPE_KEY_CODE, Modifiers::default()));
        assert_eq!(verdict.signal, Some(ExitSignal::FallbackSequence));
    }

    #[test]
    fn test_exit_combination_passes_and_signals() {
        let mut classifier = default_classifier();
        let verdict = classifier.classify(key_down(KEY_CODE_L, Modifiers::command_shift()));
        assert!(verdict.pass);
        assert_eq!(verdict.signal, Some(ExitSignal::Combination));
    }

    #[test]
    fn test_superset_modifiers_do_not_signal_combination() {
        let mut classifier = default_classifier();
        let superset = Modifiers {
            command: true,
            shift: true,
            option: true,
            control: false,
        };
        let verdict = classifier.classify(key_down(KEY_CODE_L, superset));
        assert!(!verdict.pass);
        assert!(verdict.signal.is_none());
    }

    #[test]
    fn test_ordinary_key_down_suppressed() {
        let mut classifier = default_classifier();
        let verdict = classifier.classify(key_down(0, Modifiers::default()));
        assert!(!verdict.pass);
        assert!(verdict.signal.is_none());
    }

    #[test]
    fn test_key_up_and_flags_changed_suppressed() {
        let mut classifier = default_classifier();

        let up = classifier.classify(TapEvent::KeyUp {
            key_code: KEY_CODE_L,
            modifiers: Modifiers::command_shift(),
        });
        assert!(!up.pass);
        assert!(up.signal.is_none());

        let flags = classifier.classify(TapEvent::FlagsChanged {
            modifiers: Modifiers::command_shift(),
        });
        assert!(!flags.pass);
        assert!(flags.signal.is_none());
    }

    #[test]
    fn test_fallback_with_modified_exit_combination() {
        // Exit combination is Cmd+Shift+Esc; bare Escape presses still count
        // toward the fallback because they do not match the combination.
        let mut classifier = Classifier::new(KeyCombination::new(
            ESCAPE_KEY_CODE,
            Modifiers::command_shift(),
        ));

        // A leading unrelated key-down must not affect the counter
        let verdict = classifier.classify(key_down(0, Modifiers::default()));
        assert!(verdict.signal.is_none());

        for i in 0..9 {
            let verdict = classifier.classify(key_down(ESCAPE_KEY_CODE, Modifiers::default()));
            assert!(!verdict.pass);
            if i < 8 {
                assert!(verdict.signal.is_none());
            } else {
                assert_eq!(verdict.signal, Some(ExitSignal::FallbackSequence));
            }
        }
    }

    #[test]
    fn test_key_up_does_not_interrupt_fallback_run() {
        let mut classifier = default_classifier();

        for _ in 0..8 {
            classifier.classify(key_down(ESCAPE_KEY_CODE, Modifiers::default()));
            classifier.classify(TapEvent::KeyUp {
                key_code: ESCAPE_KEY_CODE,
                modifiers: Modifiers::default(),
            });
        }
        let verdict = classifier.classify(key_down(ESCAPE_KEY_CODE, Modifiers::default()));
        assert_eq!(verdict.signal, Some(ExitSignal::FallbackSequence));
    }
}
