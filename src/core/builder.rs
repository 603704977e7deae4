use crate::core::error::Error;
use crate::core::header::{encode_packet_header, encode_transaction_header, PacketType, TransactionType};
use crate::core::transaction::{Destination, TransactionRecord};

/// Largest payload that fits an untagged Ethernet MTU of 1500 bytes
/// after the UDP/IP headers: 1472 bytes / 4 = 368 words.
pub const MTU_WORDS: usize = 368;

/// What `add_transaction` carries for a given transaction type; the
/// variant must match the type's shape (a `Write` transaction type
/// paired with `Payload::Read` is a caller error, not a protocol one).
pub enum Payload<'a> {
    /// Destination for `Read`/`NonIncrementingRead`/`ConfigurationRead`;
    /// its length is the declared word count.
    Read(Destination<'a>),
    /// Words to write for `Write`/`NonIncrementingWrite`/`ConfigurationWrite`.
    Write(&'a [u32]),
    /// AND mask, OR mask, and optional destination for the
    /// pre-modification value (`RmwBits`).
    RmwBits {
        and_mask: u32,
        or_mask: u32,
        destination: Option<Destination<'a>>,
    },
    /// Addend and optional destination for the pre-addition value
    /// (`RmwSum`).
    RmwSum {
        addend: u32,
        destination: Option<Destination<'a>>,
    },
}

/// Accumulates a well-formed IPbus request while tracking the response
/// layout the target is expected to echo back.
///
/// Two parallel, fixed-capacity word buffers back every packet: one
/// the builder writes the request into, and one the exchange engine
/// later fills from the wire and the validator walks against the
/// transaction list recorded here. Neither buffer grows past
/// [`MTU_WORDS`].
pub struct Packet<'a> {
    request: [u32; MTU_WORDS],
    response: [u32; MTU_WORDS],
    request_len: usize,
    /// Words the builder has reserved for the response so far; the
    /// validator's pre-walk check compares the datagram actually
    /// received against this ceiling.
    response_capacity: usize,
    /// Words actually present in `response`, set by the exchange
    /// engine once a datagram has been received. Equals
    /// `response_capacity` on a freshly built packet.
    response_len: usize,
    transactions: Vec<TransactionRecord<'a>>,
}

impl<'a> Packet<'a> {
    pub fn new() -> Self {
        let mut request = [0u32; MTU_WORDS];
        request[0] = encode_packet_header(PacketType::Control, 0);

        Packet {
            request,
            response: [0u32; MTU_WORDS],
            request_len: 1,
            response_capacity: 1,
            response_len: 1,
            transactions: Vec::new(),
        }
    }

    pub fn request_words(&self) -> &[u32] {
        &self.request[..self.request_len]
    }

    pub fn response_words(&self) -> &[u32] {
        &self.response[..self.response_len]
    }

    /// The response buffer, writable by the exchange engine as it
    /// copies in a received datagram.
    pub(crate) fn response_buffer_mut(&mut self) -> &mut [u32; MTU_WORDS] {
        &mut self.response
    }

    pub fn request_len(&self) -> usize {
        self.request_len
    }

    pub fn response_len(&self) -> usize {
        self.response_len
    }

    pub fn response_capacity(&self) -> usize {
        self.response_capacity
    }

    pub(crate) fn set_response_len(&mut self, len: usize) {
        self.response_len = len;
    }

    pub fn transactions(&self) -> &[TransactionRecord<'a>] {
        &self.transactions
    }

    pub fn transactions_mut(&mut self) -> &mut [TransactionRecord<'a>] {
        &mut self.transactions
    }

    fn check_capacity(&self, needed_req: usize, needed_resp: usize) -> Result<(), Error> {
        if self.request_len + needed_req > MTU_WORDS || self.response_capacity + needed_resp > MTU_WORDS {
            return Err(Error::ipbus(format!(
                "packet would overflow the {MTU_WORDS}-word MTU cap"
            )));
        }
        Ok(())
    }

    /// Appends one transaction, writing its header (and any request
    /// payload) into the request buffer and reserving the response
    /// words the validator will later expect back.
    pub fn add_transaction(
        &mut self,
        ty: TransactionType,
        address: u32,
        payload: Payload<'a>,
    ) -> Result<(), Error> {
        let id = self.transactions.len() as u16;
        match (ty, payload) {
            (t, Payload::Read(dest)) if t.is_read() => self.push_read(t, address, dest, id),
            (t, Payload::Write(words))
                if !t.is_read() && t != TransactionType::RmwBits && t != TransactionType::RmwSum =>
            {
                self.push_write(t, address, words, id)
            }
            (TransactionType::RmwBits, Payload::RmwBits { and_mask, or_mask, destination }) => {
                self.push_rmw_bits(address, and_mask, or_mask, destination, id)
            }
            (TransactionType::RmwSum, Payload::RmwSum { addend, destination }) => {
                self.push_rmw_sum(address, addend, destination, id)
            }
            _ => Err(Error::logic("transaction type does not match payload variant")),
        }
    }

    fn push_read(
        &mut self,
        ty: TransactionType,
        address: u32,
        dest: Destination<'a>,
        id: u16,
    ) -> Result<(), Error> {
        let n = dest.len();
        self.check_capacity(2, 1 + n)?;

        let request_header_offset = self.request_len;
        self.request[request_header_offset] = encode_transaction_header(ty, n as u8, id);
        self.request[request_header_offset + 1] = address;
        self.request_len += 2;

        let response_header_offset = self.response_capacity;
        let response_first_payload_offset = response_header_offset + 1;
        self.response_capacity += 1 + n;
        self.response_len = self.response_capacity;

        self.transactions.push(TransactionRecord {
            ty,
            request_header_offset,
            response_header_offset,
            response_first_payload_offset,
            expected_response_words: n as u8,
            destination: dest,
        });
        Ok(())
    }

    fn push_write(
        &mut self,
        ty: TransactionType,
        address: u32,
        words: &[u32],
        id: u16,
    ) -> Result<(), Error> {
        let n = words.len();
        self.check_capacity(2 + n, 1)?;

        let request_header_offset = self.request_len;
        self.request[request_header_offset] = encode_transaction_header(ty, n as u8, id);
        self.request[request_header_offset + 1] = address;
        for (i, word) in words.iter().enumerate() {
            self.request[request_header_offset + 2 + i] = *word;
        }
        self.request_len += 2 + n;

        let response_header_offset = self.response_capacity;
        self.response_capacity += 1;
        self.response_len = self.response_capacity;

        self.transactions.push(TransactionRecord {
            ty,
            request_header_offset,
            response_header_offset,
            response_first_payload_offset: response_header_offset + 1,
            expected_response_words: 0,
            destination: Destination::Owned(Vec::new()),
        });
        Ok(())
    }

    fn push_rmw_bits(
        &mut self,
        address: u32,
        and_mask: u32,
        or_mask: u32,
        destination: Option<Destination<'a>>,
        id: u16,
    ) -> Result<(), Error> {
        self.check_capacity(4, 2)?;

        let request_header_offset = self.request_len;
        self.request[request_header_offset] =
            encode_transaction_header(TransactionType::RmwBits, 1, id);
        self.request[request_header_offset + 1] = address;
        self.request[request_header_offset + 2] = and_mask;
        self.request[request_header_offset + 3] = or_mask;
        self.request_len += 4;

        let response_header_offset = self.response_capacity;
        let response_first_payload_offset = response_header_offset + 1;
        self.response_capacity += 2;
        self.response_len = self.response_capacity;

        self.transactions.push(TransactionRecord {
            ty: TransactionType::RmwBits,
            request_header_offset,
            response_header_offset,
            response_first_payload_offset,
            expected_response_words: 1,
            destination: destination.unwrap_or_else(|| Destination::Owned(vec![0])),
        });
        Ok(())
    }

    fn push_rmw_sum(
        &mut self,
        address: u32,
        addend: u32,
        destination: Option<Destination<'a>>,
        id: u16,
    ) -> Result<(), Error> {
        self.check_capacity(3, 2)?;

        let request_header_offset = self.request_len;
        self.request[request_header_offset] =
            encode_transaction_header(TransactionType::RmwSum, 1, id);
        self.request[request_header_offset + 1] = address;
        self.request[request_header_offset + 2] = addend;
        self.request_len += 3;

        let response_header_offset = self.response_capacity;
        let response_first_payload_offset = response_header_offset + 1;
        self.response_capacity += 2;
        self.response_len = self.response_capacity;

        self.transactions.push(TransactionRecord {
            ty: TransactionType::RmwSum,
            request_header_offset,
            response_header_offset,
            response_first_payload_offset,
            expected_response_words: 1,
            destination: destination.unwrap_or_else(|| Destination::Owned(vec![0])),
        });
        Ok(())
    }

    /// Convenience for a single-word write.
    pub fn add_word_write(&mut self, address: u32, value: u32) -> Result<(), Error> {
        self.add_transaction(TransactionType::Write, address, Payload::Write(&[value]))
    }

    /// Convenience for changing a sub-word bit field in place. A full
    /// 32-bit change degrades to a plain write; anything narrower is
    /// expressed as an `RmwBits` with `new = (old & and_mask) | or_mask`.
    pub fn add_bit_change(
        &mut self,
        address: u32,
        data: u32,
        nbits: u32,
        shift: u32,
    ) -> Result<(), Error> {
        if nbits == 32 {
            return self.add_transaction(TransactionType::Write, address, Payload::Write(&[data]));
        }

        let mask = (1u32 << nbits) - 1;
        let and_mask = !(mask << shift);
        let or_mask = (data & mask) << shift;

        self.add_transaction(
            TransactionType::RmwBits,
            address,
            Payload::RmwBits {
                and_mask,
                or_mask,
                destination: None,
            },
        )
    }

    /// Clears the transaction list and rewinds both sizes to 1; the
    /// packet header at word 0 is left untouched. Calling this twice
    /// in a row is equivalent to calling it once.
    pub fn reset(&mut self) {
        self.transactions.clear();
        self.request_len = 1;
        self.response_capacity = 1;
        self.response_len = 1;
    }
}

impl Default for Packet<'_> {
    fn default() -> Self {
        Packet::new()
    }
}
