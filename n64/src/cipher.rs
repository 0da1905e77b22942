//! Nibble arithmetic the PIF and CIC share for scrambling and continuous authentication.
//!
//! Every value is a nibble; every store masks to four bits.

/// Undo one [`encode_round`]. The running value starts at 0xf.
pub fn decode_round(buf: &mut [u8]) {
    let mut prev = 0xf;
    for cell in buf.iter_mut() {
        let old = *cell;
        *cell = cell.wrapping_sub(prev + 1) & 0xf;
        prev = old;
    }
}

pub fn encode_round(buf: &mut [u8]) {
    for i in 1..buf.len() {
        buf[i] = (buf[i] + buf[i - 1] + 1) & 0xf;
    }
}

/// Re-key one 16 nibble compare segment in place.
///
/// The last cell holds the iteration count minus one. Cell 0 is never read.
pub fn compare_round(seg: &mut [u8; 16]) {
    let mut x = seg[15];
    loop {
        let mut a = x;
        let mut i = 1;

        a = (a + seg[i] + 1) & 0xf;
        seg[i] = a;
        i += 1;

        let next = !(a + seg[i] + 1) & 0xf;
        a = std::mem::replace(&mut seg[i], next);
        i += 1;

        let sum = a + seg[i] + 1;
        a = sum & 0xf;
        if sum < 0x10 {
            a = std::mem::replace(&mut seg[i], a);
            i += 1;
        }

        a = (a + seg[i]) & 0xf;
        seg[i] = a;
        i += 1;

        let next = (a + seg[i]) & 0xf;
        a = std::mem::replace(&mut seg[i], next);
        i += 1;

        let sum = a + 8;
        a = sum & 0xf;
        if sum < 0x10 {
            a = (a + seg[i]) & 0xf;
        }
        a = std::mem::replace(&mut seg[i], a);
        i += 1;

        while i < 16 {
            a = (a + seg[i] + 1) & 0xf;
            seg[i] = a;
            i += 1;
        }

        if x == 0 {
            break;
        }
        x -= 1;
    }
}

/// CIC-NUS-6105 challenge response, computed in place over the buffer.
pub fn challenge(buf: &mut [u8], mut a: u8) {
    let mut carry = true;
    for cell in buf.iter_mut() {
        let mut y = a + *cell;
        if *cell & 1 == 0 {
            y += 8;
        }
        if a & 0b10 == 0 {
            y += 4;
        }
        let mut z = y + y;
        if !carry {
            z += 7;
        }
        let sum = (y & 0xf) + (z & 0xf) + carry as u8;
        carry = sum & 0x10 != 0;
        a = !sum & 0xf;
        *cell = a;
    }
}

/// Response of chips without the challenge circuit.
pub fn complement(buf: &mut [u8]) {
    for cell in buf.iter_mut() {
        *cell ^= 0xf;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::util::nibble_string;

    #[test]
    fn decode_undoes_encode() {
        let seed = [0xb, 0x5, 0x3, 0xf, 0x3, 0xf];
        let mut buf = seed;
        encode_round(&mut buf);
        encode_round(&mut buf);
        assert_eq!(nibble_string(&buf), "bd393d");
        decode_round(&mut buf);
        decode_round(&mut buf);
        assert_eq!(buf, seed);
    }

    #[test]
    fn checksum_needs_four_rounds() {
        let mut buf = [0, 0, 0, 0, 0xa, 0x5, 0x3, 0x6, 0xc, 0x0, 0xf, 0x1, 0xd, 0x8, 0x5, 0x9];
        let plain = buf;
        for _ in 0..4 {
            encode_round(&mut buf);
        }
        assert_eq!(nibble_string(&buf), "04e2fac5210fce2f");
        for _ in 0..4 {
            decode_round(&mut buf);
        }
        assert_eq!(buf, plain);
    }

    #[test]
    fn compare_round_is_deterministic() {
        let mut a: [u8; 16] = core::array::from_fn(|i| i as u8);
        let mut b = a;
        compare_round(&mut a);
        compare_round(&mut b);
        assert_eq!(a, b);
        assert_eq!(nibble_string(&a), "092c1e66c3f84c50");

        let mut zero = [0; 16];
        compare_round(&mut zero);
        assert_eq!(nibble_string(&zero), "01d1008123456789");
    }

    #[test]
    fn compare_round_ignores_cell_zero() {
        let mut a = [3; 16];
        let mut b = [3; 16];
        b[0] = 0xc;
        compare_round(&mut a);
        compare_round(&mut b);
        assert_eq!(a[1..], b[1..]);
    }

    #[test]
    fn challenge_golden_vector() {
        let mut buf = [0; 32];
        challenge(&mut buf, 5);
        assert_eq!(nibble_string(&buf), "bf9f9f9f9f9f9f9f9f9f9f9f9f9f9f9f");
    }

    #[test]
    fn complement_is_an_involution() {
        let mut buf = [0x0, 0x5, 0xf];
        complement(&mut buf);
        assert_eq!(buf, [0xf, 0xa, 0x0]);
        complement(&mut buf);
        assert_eq!(buf, [0x0, 0x5, 0xf]);
    }
}
