/// Outcome of queueing one message to every client of a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// No client took the message.
    Discarded,
    /// Every client took it.
    Enqueued,
    /// Some clients took it, others were full or closing.
    PartiallyEnqueued,
}

impl SendStatus {
    pub(crate) fn from_counts(hits: usize, misses: usize) -> Self {
        match (hits, misses) {
            (0, _) => Self::Discarded,
            (_, 0) => Self::Enqueued,
            _ => Self::PartiallyEnqueued,
        }
    }

    /// Counts `true` results as hits.
    pub(crate) fn collect(results: impl IntoIterator<Item = bool>) -> Self {
        let (hits, misses) = results.into_iter().fold((0, 0), |(hits, misses), ok| {
            if ok { (hits + 1, misses) } else { (hits, misses + 1) }
        });
        Self::from_counts(hits, misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_map_to_status() {
        assert_eq!(SendStatus::collect([]), SendStatus::Discarded);
        assert_eq!(SendStatus::collect([false, false]), SendStatus::Discarded);
        assert_eq!(SendStatus::collect([true, true]), SendStatus::Enqueued);
        assert_eq!(SendStatus::collect([true, false]), SendStatus::PartiallyEnqueued);
    }
}
