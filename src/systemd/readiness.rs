/// Outcome of inspecting a freshly started service's log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// A success phrase appeared and no error phrase did.
    Ready,
    /// An error phrase appeared; wins even when a success phrase is present.
    Failed { matched: String },
    /// Neither kind of phrase: started but unconfirmed, non-fatal.
    Unconfirmed,
}

/// How "did the service come up?" is decided from its output.
///
/// Process supervisors report "active" as soon as the process runs, which
/// says nothing about the app inside it. The connectivity probe is the
/// primary signal; this trait isolates the log-phrase fallback so the
/// matching rules stay swappable and testable.
pub trait ReadinessSignal: Send + Sync {
    fn classify(&self, logs: &str) -> Readiness;
}

pub struct PhraseHeuristic {
    success: &'static [&'static str],
    error: &'static [&'static str],
}

impl PhraseHeuristic {
    pub fn new(success: &'static [&'static str], error: &'static [&'static str]) -> Self {
        Self { success, error }
    }
}

impl Default for PhraseHeuristic {
    fn default() -> Self {
        Self {
            success: &["Ready in", "server started", "listening on", "Started", "✓"],
            error: &["Error:", "ERROR", "Failed", "Exception", "Cannot"],
        }
    }
}

impl ReadinessSignal for PhraseHeuristic {
    fn classify(&self, logs: &str) -> Readiness {
        if let Some(matched) = self.error.iter().find(|phrase| logs.contains(**phrase)) {
            return Readiness::Failed {
                matched: matched.to_string(),
            };
        }
        if self.success.iter().any(|phrase| logs.contains(*phrase)) {
            return Readiness::Ready;
        }
        Readiness::Unconfirmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_phrase_alone_is_ready() {
        let heuristic = PhraseHeuristic::default();
        assert_eq!(
            heuristic.classify("Jan 01 web[123]: Ready in 1.2s"),
            Readiness::Ready
        );
        assert_eq!(
            heuristic.classify("uvicorn running, listening on 0.0.0.0:8000"),
            Readiness::Ready
        );
    }

    #[test]
    fn error_phrase_wins_over_success() {
        let heuristic = PhraseHeuristic::default();
        let logs = "Ready in 0.8s\nError: connect ECONNREFUSED 127.0.0.1:5432";
        assert!(matches!(heuristic.classify(logs), Readiness::Failed { .. }));
    }

    #[test]
    fn silence_is_unconfirmed() {
        let heuristic = PhraseHeuristic::default();
        assert_eq!(
            heuristic.classify("Jan 01 systemd[1]: beginning startup"),
            Readiness::Unconfirmed
        );
        assert_eq!(heuristic.classify(""), Readiness::Unconfirmed);
    }

    #[test]
    fn custom_phrase_lists_are_honored() {
        let heuristic = PhraseHeuristic::new(&["booted"], &["panicked"]);
        assert_eq!(heuristic.classify("service booted"), Readiness::Ready);
        assert!(matches!(
            heuristic.classify("worker panicked"),
            Readiness::Failed { .. }
        ));
        assert_eq!(heuristic.classify("Ready in 2s"), Readiness::Unconfirmed);
    }
}
