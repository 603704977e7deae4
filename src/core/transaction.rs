use crate::core::header::TransactionType;

/// Where a read (or RMW pre-modification value) should land once the
/// validator copies it out of the response buffer.
///
/// The source stored raw pointers into both buffers inside a
/// transaction record; here that is replaced by word offsets plus an
/// owned or borrowed destination slice, so there is no lifetime tied
/// to buffer relocation.
#[derive(Debug)]
pub enum Destination<'a> {
    /// Caller-owned buffer, must have capacity >= the declared word
    /// count (an invariant the builder checks at `add_transaction`
    /// time).
    Borrowed(&'a mut [u32]),
    /// No caller buffer was supplied (fire-and-forget write, or an RMW
    /// whose pre-modification value the caller doesn't need); the
    /// validator still has somewhere to put the word so it can report
    /// `read_succeeded`.
    Owned(Vec<u32>),
}

impl Destination<'_> {
    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        match self {
            Destination::Borrowed(buf) => buf,
            Destination::Owned(buf) => buf.as_mut_slice(),
        }
    }

    pub fn as_slice(&self) -> &[u32] {
        match self {
            Destination::Borrowed(buf) => buf,
            Destination::Owned(buf) => buf.as_slice(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Destination::Borrowed(buf) => buf.len(),
            Destination::Owned(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One entry in a packet's transaction list, tracking where in the
/// request/response word buffers this transaction's header and
/// payload live, and where the validator should deliver read data.
#[derive(Debug)]
pub struct TransactionRecord<'a> {
    pub ty: TransactionType,
    pub request_header_offset: usize,
    pub response_header_offset: usize,
    pub response_first_payload_offset: usize,
    pub expected_response_words: u8,
    pub destination: Destination<'a>,
}

/// Outcome of one successfully-validated transaction, mirroring the
/// `read_succeeded`/`write_succeeded` signals of the wire spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    ReadSucceeded { index: usize, words: usize },
    WriteSucceeded { index: usize, words: usize },
}
