use crate::core::builder::Packet;
use crate::core::error::Error;
use crate::core::header::{decode_transaction_header, info_mnemonic};
use crate::core::transaction::TransactionOutcome;

/// Walks a received response against the transaction list a
/// [`Packet`] built its request from, copying read data into caller
/// destinations and reporting the first fault encountered.
///
/// Transactions are validated strictly in request order. On the first
/// failure, validation stops — later transactions are neither checked
/// nor reported, matching the target's own in-order processing.
pub fn validate(packet: &mut Packet<'_>) -> (Vec<TransactionOutcome>, Result<(), Error>) {
    let mut outcomes = Vec::new();

    if packet.response_words().is_empty() {
        return (outcomes, Err(Error::network("empty response")));
    }
    if packet.response_words()[0] != packet.request_words()[0] {
        return (
            outcomes,
            Err(Error::network("response packet header does not match request")),
        );
    }
    if packet.response_len() > packet.response_capacity() {
        return (
            outcomes,
            Err(Error::network("response larger than reserved capacity")),
        );
    }

    let response = packet.response_words().to_vec();
    let transaction_count = packet.transactions().len();

    for i in 0..transaction_count {
        let header_offset = packet.transactions()[i].response_header_offset;
        let header_word = match response.get(header_offset) {
            Some(word) => *word,
            None => {
                return (
                    outcomes,
                    Err(Error::ipbus(format!(
                        "response transaction {i} header missing at word {header_offset}"
                    ))),
                )
            }
        };
        let header = decode_transaction_header(header_word);

        let expected_ty = packet.transactions()[i].ty;
        if header.version != 2 || header.id != i as u16 || header.ty != Some(expected_ty) {
            return (
                outcomes,
                Err(Error::ipbus(format!(
                    "transaction {i} header mismatch: expected type {expected_ty:?} id {i}, got {header:?}"
                ))),
            );
        }

        let declared_words = header.words;
        let address = packet.request_words()[packet.transactions()[i].request_header_offset + 1];

        if declared_words > 0 {
            if expected_ty.is_read() {
                let first = packet.transactions()[i].response_first_payload_offset;
                let ahead = response.len().saturating_sub(first);
                let to_copy = ahead.min(declared_words as usize);

                {
                    let dest = packet.transactions_mut()[i].destination.as_mut_slice();
                    for (slot, word) in dest.iter_mut().zip(&response[first..first + to_copy]) {
                        *slot = *word;
                    }
                }

                if (declared_words as usize) > ahead {
                    outcomes.push(TransactionOutcome::ReadSucceeded { index: i, words: ahead });
                    if header.info == 0 {
                        return (
                            outcomes,
                            Err(Error::ipbus(format!(
                                "read transaction from {address:08X} truncated: {ahead}/{declared_words} words received"
                            ))),
                        );
                    }
                } else {
                    outcomes.push(TransactionOutcome::ReadSucceeded {
                        index: i,
                        words: declared_words as usize,
                    });
                }
            } else if matches!(
                expected_ty,
                crate::core::header::TransactionType::RmwBits | crate::core::header::TransactionType::RmwSum
            ) {
                if declared_words != 1 {
                    return (
                        outcomes,
                        Err(Error::ipbus(format!(
                            "RMW transaction {i} declared {declared_words} words, expected 1"
                        ))),
                    );
                }
                let first = packet.transactions()[i].response_first_payload_offset;
                if let Some(word) = response.get(first) {
                    let dest = packet.transactions_mut()[i].destination.as_mut_slice();
                    if let Some(slot) = dest.first_mut() {
                        *slot = *word;
                    }
                }
                outcomes.push(TransactionOutcome::ReadSucceeded { index: i, words: 1 });
                outcomes.push(TransactionOutcome::WriteSucceeded { index: i, words: 1 });
            } else {
                outcomes.push(TransactionOutcome::WriteSucceeded {
                    index: i,
                    words: declared_words as usize,
                });
            }
        } else if !expected_ty.is_read() {
            outcomes.push(TransactionOutcome::WriteSucceeded { index: i, words: 0 });
        }

        if header.info != 0 {
            return (
                outcomes,
                Err(Error::ipbus(format!(
                    "transaction {i} at {address:08X} faulted: {}",
                    info_mnemonic(header.info)
                ))),
            );
        }
    }

    (outcomes, Ok(()))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::core::builder::Payload;
    use crate::core::header::{encode_packet_header, encode_transaction_header, PacketType, TransactionType};
    use crate::core::transaction::Destination;

    #[test]
    fn single_read_succeeds() {
        let mut dest = [0u32; 1];
        let mut packet = Packet::new();
        packet
            .add_transaction(
                TransactionType::Read,
                0xDEADBEEF,
                Payload::Read(Destination::Borrowed(&mut dest)),
            )
            .unwrap();

        let response = packet.response_buffer_mut();
        response[0] = encode_packet_header(PacketType::Control, 0);
        response[1] = encode_transaction_header(TransactionType::Read, 1, 0);
        response[2] = 0x0000_002A;
        packet.set_response_len(3);

        let (outcomes, result) = validate(&mut packet);
        assert!(result.is_ok());
        assert_eq!(outcomes, vec![TransactionOutcome::ReadSucceeded { index: 0, words: 1 }]);
        assert_eq!(dest, [0x0000_002A]);
    }

    #[test]
    fn write_then_read_delivers_both_outcomes() {
        let mut dest = [0u32; 1];
        let mut packet = Packet::new();
        packet.add_word_write(0x1000, 0x11223344).unwrap();
        packet
            .add_transaction(
                TransactionType::Read,
                0x2000,
                Payload::Read(Destination::Borrowed(&mut dest)),
            )
            .unwrap();

        {
            let response = packet.response_buffer_mut();
            response[0] = encode_packet_header(PacketType::Control, 0);
            response[1] = encode_transaction_header(TransactionType::Write, 1, 0);
            response[2] = encode_transaction_header(TransactionType::Read, 1, 1);
            response[3] = 0x5555_5555;
        }
        packet.set_response_len(4);

        let (outcomes, result) = validate(&mut packet);
        assert!(result.is_ok());
        assert_eq!(
            outcomes,
            vec![
                TransactionOutcome::WriteSucceeded { index: 0, words: 1 },
                TransactionOutcome::ReadSucceeded { index: 1, words: 1 },
            ]
        );
        assert_eq!(dest, [0x5555_5555]);
    }

    #[test]
    fn truncated_read_copies_partial_data_then_errors() {
        let mut dest = [0u32; 4];
        let mut packet = Packet::new();
        packet
            .add_transaction(
                TransactionType::Read,
                0x3000,
                Payload::Read(Destination::Borrowed(&mut dest)),
            )
            .unwrap();

        {
            let response = packet.response_buffer_mut();
            response[0] = encode_packet_header(PacketType::Control, 0);
            response[1] = encode_transaction_header(TransactionType::Read, 4, 0);
            response[2] = 0x1111_1111;
            response[3] = 0x2222_2222;
        }
        packet.set_response_len(4);

        let (outcomes, result) = validate(&mut packet);
        assert_eq!(outcomes, vec![TransactionOutcome::ReadSucceeded { index: 0, words: 2 }]);
        let err = result.unwrap_err();
        assert_eq!(err.kind, crate::core::error::ErrorKind::IPbus);
        assert!(err.message.contains("truncated: 2/4"));
        assert_eq!(dest[..2], [0x1111_1111, 0x2222_2222]);
    }

    #[test]
    fn rmw_bits_clearing_bit_delivers_pre_modification_value() {
        let mut packet = Packet::new();
        packet.add_bit_change(0x4000, 0, 1, 5).unwrap();

        {
            let response = packet.response_buffer_mut();
            response[0] = encode_packet_header(PacketType::Control, 0);
            response[1] = encode_transaction_header(TransactionType::RmwBits, 1, 0);
            response[2] = 0xFFFF_FFFF;
        }
        packet.set_response_len(3);

        let (outcomes, result) = validate(&mut packet);
        assert!(result.is_ok());
        assert_eq!(
            outcomes,
            vec![
                TransactionOutcome::ReadSucceeded { index: 0, words: 1 },
                TransactionOutcome::WriteSucceeded { index: 0, words: 1 },
            ]
        );
        assert_eq!(packet.transactions()[0].destination.as_slice(), &[0xFFFF_FFFFu32]);
    }

    #[test]
    fn mismatched_packet_header_is_rejected() {
        let mut packet = Packet::new();
        packet.add_word_write(0x10, 1).unwrap();

        {
            let response = packet.response_buffer_mut();
            response[0] = encode_packet_header(PacketType::Status, 0);
            response[1] = encode_transaction_header(TransactionType::Write, 1, 0);
        }
        packet.set_response_len(2);

        let (_, result) = validate(&mut packet);
        assert_eq!(result.unwrap_err().kind, crate::core::error::ErrorKind::Network);
    }
}
