//! Read-only view of stored partial files, consulted when a bot makes an offer.

use crate::model::FileKey;

/// How an offer for a given file should proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Nothing usable is stored; start from byte zero.
    Fresh,
    /// Another transfer holds the file right now.
    InUse,
    /// Ask the bot to continue from this offset.
    Resume(u64),
}

/// Storage lookup the tracker uses to decide between fresh, resumed and
/// rejected offers.
pub trait ResumeCatalog: Send + Sync {
    /// Decide how an offer for `file` proceeds.
    fn resume_decision(&self, file: &FileKey) -> ResumeDecision;
}

impl<F> ResumeCatalog for F
where
    F: Fn(&FileKey) -> ResumeDecision + Send + Sync,
{
    fn resume_decision(&self, file: &FileKey) -> ResumeDecision {
        self(file)
    }
}
