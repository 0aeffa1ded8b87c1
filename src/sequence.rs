use crate::NET_MAX_SEQUENCE;

/// Returns true if `seq` lies within the half window ending at `ack`, accounting for wrap.
/// Sequences in the backroom were already received, anything else is still ahead.
pub fn is_seq_in_backroom(seq: u16, ack: u16) -> bool {
    let seq = seq as i32;
    let ack = ack as i32;
    let bottom = ack - (NET_MAX_SEQUENCE as i32) / 2;
    if bottom < 0 {
        seq <= ack || seq >= bottom + NET_MAX_SEQUENCE as i32
    } else {
        seq <= ack && seq >= bottom
    }
}

#[inline]
pub(crate) fn next_sequence(sequence: u16) -> u16 {
    (sequence + 1) % NET_MAX_SEQUENCE
}
