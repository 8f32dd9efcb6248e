/// Terminal state of one item's pipeline run.
///
/// Stages return this instead of raising; the state machine branches on it
/// and each item reaches exactly one terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Downloaded, verified, and (when applicable) merged.
    Finished,
    /// Output already present and overwriting is disabled. Not an error.
    Exists,
    /// The upstream has no usable representation of the item.
    Unavailable(UnavailableReason),
    /// Downloaded bytes failed structural verification.
    Corrupted,
    /// The run was interrupted while this item was in flight.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnavailableReason {
    /// The API answered with an explicit error marker.
    Gone,
    /// Metadata arrived but no stream combination satisfies the options.
    NoStreams,
    /// The metadata fetch retry budget ran out.
    RetryExhausted,
}

impl Outcome {
    /// Whether the item counts towards `done` (success or benign skip).
    pub fn is_done(self) -> bool {
        matches!(self, Outcome::Finished | Outcome::Exists)
    }

    /// Whether the item counts towards `errors`.
    pub fn is_error(self) -> bool {
        matches!(self, Outcome::Unavailable(_) | Outcome::Corrupted)
    }

    /// The status word printed at the end of the progress line.
    pub fn label(self) -> &'static str {
        match self {
            Outcome::Finished => "finished",
            Outcome::Exists => "exists",
            Outcome::Unavailable(UnavailableReason::RetryExhausted) => {
                "unavailable (retries exhausted)"
            }
            Outcome::Unavailable(_) => "unavailable",
            Outcome::Corrupted => "failed to download",
            Outcome::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exists_is_done_but_not_error() {
        assert!(Outcome::Exists.is_done());
        assert!(!Outcome::Exists.is_error());
    }

    #[test]
    fn unavailable_is_error() {
        let o = Outcome::Unavailable(UnavailableReason::Gone);
        assert!(o.is_error());
        assert!(!o.is_done());
    }
}
