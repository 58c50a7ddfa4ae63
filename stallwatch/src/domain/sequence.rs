//! Validated, capture-ordered sequence of dumps.

use super::errors::DiagnosticsError;
use stallwatch_common::DumpSnapshot;

/// Dumps of one process in capture order.
///
/// Construction rejects a sequence whose timestamps decrease. Equal
/// timestamps are allowed. The engine never reorders its input, so the
/// order given here is the order every analysis sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DumpSequence {
    dumps: Vec<DumpSnapshot>,
}

impl DumpSequence {
    /// Validate capture ordering.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError::UnsortedDumps`] naming the first dump whose
    /// timestamp precedes its predecessor.
    pub fn new(dumps: Vec<DumpSnapshot>) -> Result<Self, DiagnosticsError> {
        if let Some(index) = dumps
            .windows(2)
            .position(|pair| pair[1].timestamp < pair[0].timestamp)
            .map(|i| i + 1)
        {
            return Err(DiagnosticsError::UnsortedDumps {
                index,
                previous: dumps[index - 1].timestamp,
                current: dumps[index].timestamp,
            });
        }
        Ok(Self { dumps })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.dumps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dumps.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DumpSnapshot> {
        self.dumps.iter()
    }

    #[must_use]
    pub fn first(&self) -> Option<&DumpSnapshot> {
        self.dumps.first()
    }

    /// The most recent dump, used by single-dump analyses.
    #[must_use]
    pub fn latest(&self) -> Option<&DumpSnapshot> {
        self.dumps.last()
    }

    /// Seconds between the first and last capture; 0 with fewer than two dumps.
    #[must_use]
    pub fn elapsed_secs(&self) -> f64 {
        match (self.dumps.first(), self.dumps.last()) {
            (Some(first), Some(last)) if self.dumps.len() > 1 => {
                last.timestamp.as_seconds() - first.timestamp.as_seconds()
            }
            _ => 0.0,
        }
    }

    /// Give the dumps back to the caller.
    #[must_use]
    pub fn into_inner(self) -> Vec<DumpSnapshot> {
        self.dumps
    }
}

impl<'a> IntoIterator for &'a DumpSequence {
    type Item = &'a DumpSnapshot;
    type IntoIter = std::slice::Iter<'a, DumpSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.dumps.iter()
    }
}
