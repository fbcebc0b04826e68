//! Mesh address derivation
//!
//! Nodes are addressed by an IPv6 address inside `0200::/7` computed from
//! their public key: the key is bit-inverted, the run of leading one bits is
//! counted into the second byte, and the bits after the first zero fill the
//! rest. The link layer only uses this for log output.

use std::net::Ipv6Addr;

use crate::types::PeerIdentity;

/// First byte of every mesh address
pub const ADDRESS_PREFIX: u8 = 0x02;

/// Derive the mesh address owned by `identity`
pub fn address_for_key(identity: &PeerIdentity) -> Ipv6Addr {
    let inverted: Vec<u8> = identity.iter().map(|b| !b).collect();

    let mut ones: u8 = 0;
    let mut done = false;
    let mut acc: u8 = 0;
    let mut acc_bits = 0;
    let mut tail = Vec::with_capacity(inverted.len());

    for idx in 0..inverted.len() * 8 {
        let bit = (inverted[idx / 8] >> (7 - (idx % 8))) & 1;
        if !done {
            if bit != 0 {
                ones = ones.saturating_add(1);
            } else {
                done = true;
            }
            continue;
        }
        acc = (acc << 1) | bit;
        acc_bits += 1;
        if acc_bits == 8 {
            tail.push(acc);
            acc = 0;
            acc_bits = 0;
        }
    }

    let mut addr = [0u8; 16];
    addr[0] = ADDRESS_PREFIX;
    addr[1] = ones;
    let n = tail.len().min(addr.len() - 2);
    addr[2..2 + n].copy_from_slice(&tail[..n]);
    Ipv6Addr::from(addr)
}
