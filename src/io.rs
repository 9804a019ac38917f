//! The I/O status taxonomy shared by `process` callbacks and port operations.
//!
//! Every data-path operation — a `process` quantum, a port `read`, a port
//! `write` — reports its outcome through one closed enum. The worker loop
//! matches it exhaustively to drive state transitions; there is no numeric
//! error-code space and no silent fallthrough.

/// Outcome of a data-path operation.
///
/// `Bytes(n)` carries the number of bytes produced or consumed. The remaining
/// variants are terminal or transient conditions:
///
/// - [`Ok`](IoStatus::Ok): neutral "nothing to do"; classified together with
///   [`Done`](IoStatus::Done) on the process path.
/// - [`Done`](IoStatus::Done): graceful end of stream.
/// - [`Timeout`](IoStatus::Timeout): no data within the budget; the caller is
///   expected to retry on its next iteration.
/// - [`Abort`](IoStatus::Abort): forced cancellation (a port was aborted);
///   never retried.
/// - [`Fail`](IoStatus::Fail): an I/O failure.
/// - [`ProcessFail`](IoStatus::ProcessFail): a processing-logic failure,
///   handled like [`Fail`](IoStatus::Fail).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum IoStatus {
    /// Data was produced or consumed.
    Bytes(usize),
    /// Neutral success without data.
    Ok,
    /// Graceful end of stream.
    Done,
    /// No data within the configured budget.
    Timeout,
    /// Forced cancellation of a blocked or pending operation.
    Abort,
    /// I/O failure.
    Fail,
    /// Processing-logic failure.
    ProcessFail,
}

impl IoStatus {
    /// Check whether the operation moved any data.
    #[inline]
    pub fn is_data(&self) -> bool {
        matches!(self, IoStatus::Bytes(n) if *n > 0)
    }

    /// Check whether the status is a hard failure.
    #[inline]
    pub fn is_err(&self) -> bool {
        matches!(self, IoStatus::Fail | IoStatus::ProcessFail)
    }

    /// Number of bytes moved, zero for every non-data status.
    #[inline]
    pub fn bytes(&self) -> usize {
        match self {
            IoStatus::Bytes(n) => *n,
            _ => 0,
        }
    }
}
